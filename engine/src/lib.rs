#![allow(clippy::too_many_arguments)]

use anyhow::Result;
use log::*;
use std::path::PathBuf;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

pub mod actor;
pub mod asset;
pub mod input;
pub mod particles;
pub mod scene;
pub mod screenshot;
pub mod shader;
pub mod vulkan;

pub use vulkanalia;
pub use winit;

use asset::AssetCache;
use input::InputState;
use scene::{Scene, SceneRegistry};
use shader::ShaderCache;
use vulkan::{Gpu, GpuPurposes};

/// Everything configurable from the outside; the engine itself has no other
/// knobs.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub asset_root: PathBuf,
    pub shader_root: PathBuf,
    pub screenshot_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Ember Engine".to_string(),
            width: 1024,
            height: 768,
            asset_root: PathBuf::from("assets"),
            shader_root: PathBuf::from("shaders"),
            screenshot_dir: scene::default_screenshot_dir(),
        }
    }
}

/// Owns the window, the GPU instance, the scene-scoped caches and the
/// current scene, and drives them through the event loop.
pub struct Engine {
    window: Window,
    event_loop: EventLoop<()>,
    gpu: Gpu,
    assets: AssetCache,
    shaders: ShaderCache,
    input: InputState,
    scenes: SceneRegistry,
    current_scene: Scene,
    config: EngineConfig,
    resized: bool,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        purposes: GpuPurposes,
        scenes: SceneRegistry,
        initial_scene: &str,
    ) -> Result<Engine> {
        // Window
        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title(&config.title)
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .build(&event_loop)?;

        let gpu = unsafe { Gpu::new(&window, &config.title, purposes)? };
        let mut assets = AssetCache::new(&config.asset_root);
        let mut shaders = ShaderCache::new(&config.shader_root);
        let input = InputState::new();

        let mut current_scene = scenes.create(initial_scene)?;
        unsafe {
            current_scene.initialize(&gpu, &mut assets, &mut shaders, &input)?;
        }

        Ok(Engine {
            window,
            event_loop,
            gpu,
            assets,
            shaders,
            input,
            scenes,
            current_scene,
            config,
            resized: false,
        })
    }

    pub fn run(self) -> Result<()> {
        let Engine {
            window,
            event_loop,
            mut gpu,
            mut assets,
            mut shaders,
            mut input,
            scenes,
            mut current_scene,
            config,
            mut resized,
        } = self;

        let mut destroyed = false;

        event_loop.run(move |event, elwt| {
            match event {
                // Request a redraw when all events were processed.
                Event::AboutToWait => window.request_redraw(),
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::RedrawRequested if !elwt.exiting() && !destroyed => {
                        let result = unsafe {
                            drive_frame(
                                &window,
                                &mut gpu,
                                &mut assets,
                                &mut shaders,
                                &mut input,
                                &scenes,
                                &mut current_scene,
                                &config,
                                &mut resized,
                            )
                        };
                        match result {
                            Ok(continuous) => {
                                if !continuous {
                                    elwt.exit();
                                }
                            }
                            Err(error) => {
                                error!("Frame failed: {:?}", error);
                                elwt.exit();
                            }
                        }
                        if elwt.exiting() && !destroyed {
                            destroyed = true;
                            unsafe {
                                shutdown(
                                    &mut gpu,
                                    &mut assets,
                                    &mut shaders,
                                    &mut current_scene,
                                );
                            }
                        }
                    }
                    WindowEvent::Resized(_) => {
                        resized = true;
                    }
                    WindowEvent::CloseRequested => {
                        elwt.exit();
                        if !destroyed {
                            destroyed = true;
                            unsafe {
                                shutdown(
                                    &mut gpu,
                                    &mut assets,
                                    &mut shaders,
                                    &mut current_scene,
                                );
                            }
                        }
                    }
                    event => input.handle_window_event(&event),
                },
                _ => {}
            }
        })?;

        Ok(())
    }
}

/// One pass of the per-frame protocol: pending resize, scene transition,
/// update, render, input epoch. Returns false when the scene asked to quit.
unsafe fn drive_frame(
    window: &Window,
    gpu: &mut Gpu,
    assets: &mut AssetCache,
    shaders: &mut ShaderCache,
    input: &mut InputState,
    scenes: &SceneRegistry,
    current_scene: &mut Scene,
    config: &EngineConfig,
    resized: &mut bool,
) -> Result<bool> {
    if *resized {
        // A zero extent means the window is minimized; skip frames until a
        // usable extent shows up.
        if !gpu.recreate_swapchain(window.inner_size())? {
            return Ok(true);
        }
        *resized = false;
    }

    if current_scene.is_changed() {
        if let Some(next) = current_scene.next_scene_name() {
            if scenes.contains(next) {
                let next = next.to_string();
                info!(
                    "Scene transition `{}` -> `{}`.",
                    current_scene.name(),
                    next
                );
                gpu.wait_idle()?;
                current_scene.destroy(gpu);
                assets.reset(gpu.device());
                shaders.reset(gpu.device());

                *current_scene = scenes.create(&next)?;
                current_scene.initialize(gpu, assets, shaders, input)?;
            }
        }
    }

    current_scene.update(gpu, assets, shaders, input)?;
    current_scene.render(gpu, assets, input, &config.screenshot_dir)?;
    input.end_frame();

    Ok(current_scene.is_continuous())
}

unsafe fn shutdown(
    gpu: &mut Gpu,
    assets: &mut AssetCache,
    shaders: &mut ShaderCache,
    current_scene: &mut Scene,
) {
    if gpu.wait_idle().is_err() {
        warn!("Device did not go idle cleanly during shutdown.");
    }
    current_scene.destroy(gpu);
    assets.reset(gpu.device());
    shaders.reset(gpu.device());
    gpu.destroy();
}
