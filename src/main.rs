use anyhow::Result;

use engine::vulkan::GpuPurposes;
use engine::{Engine, EngineConfig};

mod demo;

fn main() -> Result<()> {
    pretty_env_logger::init();

    let config = EngineConfig {
        title: "Ember Engine".to_string(),
        ..Default::default()
    };
    let purposes = GpuPurposes::new(&["render", "copy"], &["particle"]);
    let scenes = demo::scene_registry();

    let engine = Engine::new(config, purposes, scenes, "first");
    match engine {
        Err(err) => println!("{}", err),
        Ok(e) => e.run()?,
    }

    Ok(())
}
