// build.rs

use std::process::{exit, Command};

const SHADERS: &[&str] = &[
    "shaders/sample_3d.vert",
    "shaders/sample_3d.frag",
    "shaders/particle.vert",
    "shaders/particle.frag",
    "shaders/particle.comp",
];

fn main() {
    for shader in SHADERS {
        match Command::new("glslc")
            .args([*shader, "-o", &format!("{shader}.spv")])
            .status()
        {
            Err(err) => {
                println!("{}", err);
                exit(1);
            }
            Ok(status) => {
                if !status.success() {
                    println!("glslc failed on {shader}: {status}");
                    exit(1);
                }
            }
        }

        println!("cargo::rerun-if-changed={shader}");
    }
}
