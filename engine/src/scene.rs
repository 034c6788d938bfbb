use anyhow::Result;
use log::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use vulkanalia::prelude::v1_0::*;
use winit::keyboard::KeyCode;

use crate::actor::{Actor, ActorContext};
use crate::asset::AssetCache;
use crate::input::InputState;
use crate::screenshot;
use crate::shader::ShaderCache;
use crate::vulkan::buffer::Buffer;
use crate::vulkan::Gpu;

#[derive(Debug, Error)]
#[error("scene not registered: `{0}`")]
pub struct SceneNotFound(pub String);

/// An ordered set of actors driven through the initialize/update/render
/// cycle, plus the staging buffers kept alive until the submission using
/// them has been waited on.
pub struct Scene {
    name: String,
    actors: Vec<Box<dyn Actor>>,
    staging_buffers: Vec<Buffer>,
    start: Option<Instant>,
    elapsed: f32,
    continuous: bool,
    changed: bool,
    next_scene: Option<String>,
    waits_on_compute: bool,
}

impl Scene {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actors: Vec::new(),
            staging_buffers: Vec::new(),
            start: None,
            elapsed: 0.0,
            continuous: true,
            changed: false,
            next_scene: None,
            waits_on_compute: false,
        }
    }

    pub fn with_actor(mut self, actor: Box<dyn Actor>) -> Self {
        self.actors.push(actor);
        self
    }

    /// Names the scene switched to when the transition key fires.
    pub fn with_next_scene(mut self, next: impl Into<String>) -> Self {
        self.next_scene = Some(next.into());
        self
    }

    /// Makes the render submission wait for the compute semaphore; required
    /// whenever an actor in this scene dispatches compute work consumed by
    /// the graphics pass.
    pub fn with_compute_wait(mut self) -> Self {
        self.waits_on_compute = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn next_scene_name(&self) -> Option<&str> {
        self.next_scene.as_deref()
    }

    pub fn staging_buffer_count(&self) -> usize {
        self.staging_buffers.len()
    }

    /// Brackets all actor initialization inside one "copy" recording, submits
    /// it synchronously and releases the staging buffers it referenced.
    pub unsafe fn initialize(
        &mut self,
        gpu: &Gpu,
        assets: &mut AssetCache,
        shaders: &mut ShaderCache,
        input: &InputState,
    ) -> Result<()> {
        info!("Initializing scene `{}`.", self.name);
        let device = gpu.device();

        let copy_command_buffer = gpu.graphic_command_buffer("copy")?;
        copy_command_buffer.reset(device)?;
        copy_command_buffer.begin(device)?;

        let mut ctx = ActorContext {
            gpu,
            assets,
            shaders,
            input,
            staging_buffers: &mut self.staging_buffers,
            elapsed: 0.0,
        };
        for actor in &mut self.actors {
            actor.initialize(&mut ctx)?;
        }

        let copy_command_buffer = gpu.graphic_command_buffer("copy")?;
        copy_command_buffer.end(device)?;
        gpu.submit_copy(copy_command_buffer)?;
        gpu.release_staging_buffers(&mut self.staging_buffers);

        self.start = Some(Instant::now());
        Ok(())
    }

    /// Acquires the next image, then runs actor updates (which record and
    /// submit any compute work).
    pub unsafe fn update(
        &mut self,
        gpu: &mut Gpu,
        assets: &mut AssetCache,
        shaders: &mut ShaderCache,
        input: &InputState,
    ) -> Result<()> {
        if let Some(start) = self.start {
            self.elapsed = start.elapsed().as_secs_f32();
        }

        if input.just_pressed(KeyCode::Escape) {
            self.continuous = false;
        }
        if self.next_scene.is_some() && input.just_pressed(KeyCode::Enter) {
            self.changed = true;
        }

        gpu.acquire_frame()?;

        let mut ctx = ActorContext {
            gpu,
            assets,
            shaders,
            input,
            staging_buffers: &mut self.staging_buffers,
            elapsed: self.elapsed,
        };
        for actor in &mut self.actors {
            actor.update(&mut ctx)?;
        }
        Ok(())
    }

    /// Records the render stream inside one render-pass bracket, submits it
    /// against the frame's wait set, optionally captures the screen, presents
    /// and rotates the frame slots.
    pub unsafe fn render(
        &mut self,
        gpu: &mut Gpu,
        assets: &AssetCache,
        input: &InputState,
        screenshot_dir: &Path,
    ) -> Result<()> {
        let device = gpu.device();
        let render_command_buffer = gpu.graphic_command_buffer("render")?;

        render_command_buffer.reset(device)?;
        render_command_buffer.begin(device)?;
        render_command_buffer.begin_render_pass(device, gpu.swapchain());

        for actor in &self.actors {
            actor.render(gpu, assets)?;
        }

        let render_command_buffer = gpu.graphic_command_buffer("render")?;
        render_command_buffer.end_render_pass(device);
        render_command_buffer.end(device)?;

        let mut aux_waits = Vec::new();
        if self.waits_on_compute {
            if let Some(sync) = gpu.compute_sync() {
                aux_waits.push((
                    sync.current_semaphore(),
                    vk::PipelineStageFlags::VERTEX_INPUT,
                ));
            }
        }
        gpu.submit_render(render_command_buffer, &aux_waits)?;

        if input.just_pressed(KeyCode::Space) {
            match screenshot::capture(gpu, screenshot_dir) {
                Ok(path) => info!("Saved screenshot to `{}`.", path.display()),
                Err(error) => warn!("Screenshot failed: {}", error),
            }
        }

        gpu.present_frame()?;
        Ok(())
    }

    /// Tears down every actor-owned GPU resource. The caller must have waited
    /// for device idle first.
    pub unsafe fn destroy(&mut self, gpu: &Gpu) {
        for actor in &mut self.actors {
            actor.destroy(gpu.device());
        }
        self.actors.clear();
        gpu.release_staging_buffers(&mut self.staging_buffers);
    }
}

/// Scene factories keyed by name; a fresh scene is built for every visit so
/// no state leaks across transitions.
#[derive(Default)]
pub struct SceneRegistry {
    factories: HashMap<String, Box<dyn Fn() -> Scene>>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: impl Fn() -> Scene + 'static) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Scene, SceneNotFound> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| SceneNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

/// Where screenshots are written; the file name carries a timestamp.
pub fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("output/screenshot")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_fresh_scenes() {
        let mut registry = SceneRegistry::new();
        registry.register("first", || Scene::new("first").with_next_scene("second"));

        let scene = registry.create("first").unwrap();
        assert_eq!(scene.name(), "first");
        assert_eq!(scene.next_scene_name(), Some("second"));
        assert!(!scene.is_changed());
        assert!(scene.is_continuous());

        assert!(registry.contains("first"));
        assert!(matches!(registry.create("missing"), Err(SceneNotFound(_))));
    }

    #[test]
    fn new_scene_has_no_staging_buffers() {
        let scene = Scene::new("empty");
        assert_eq!(scene.staging_buffer_count(), 0);
    }
}
