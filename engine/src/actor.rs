use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::collections::HashMap;
use vulkanalia::Device;
use winit::keyboard::KeyCode;

use crate::asset::AssetCache;
use crate::input::InputState;
use crate::particles::ParticleEngine;
use crate::shader::ShaderCache;
use crate::vulkan::buffer::Buffer;
use crate::vulkan::descriptor::DescriptorSet;
use crate::vulkan::pipeline::Pipeline;
use crate::vulkan::Gpu;

/// Model/view/projection block shared by vertex shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Position {
    pub model: Mat4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Pipeline, descriptor set and named per-frame-slot uniform buffers for one
/// render or compute workload.
#[derive(Debug)]
pub struct ResourceBundle {
    pub pipeline: Pipeline,
    pub descriptor_set: DescriptorSet,
    pub uniform_buffers: HashMap<String, Vec<Buffer>>,
}

impl ResourceBundle {
    pub fn new(pipeline: Pipeline, descriptor_set: DescriptorSet) -> Self {
        Self {
            pipeline,
            descriptor_set,
            uniform_buffers: HashMap::new(),
        }
    }

    /// Uniform buffer for `name` bound to one frame slot.
    pub fn uniform_buffer(&self, name: &str, frame: usize) -> Result<&Buffer> {
        self.uniform_buffers
            .get(name)
            .and_then(|buffers| buffers.get(frame))
            .ok_or_else(|| anyhow::anyhow!("uniform buffer not registered: `{name}`"))
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        for buffers in self.uniform_buffers.values() {
            for buffer in buffers {
                buffer.destroy(device);
            }
        }
        self.uniform_buffers.clear();
        self.descriptor_set.destroy(device);
        self.pipeline.destroy(device);
    }
}

/// Everything an actor may touch while initializing or updating: the GPU
/// instance, the scene-scoped caches, polled input and the staging buffers
/// held until the current submission retires.
pub struct ActorContext<'a> {
    pub gpu: &'a Gpu,
    pub assets: &'a mut AssetCache,
    pub shaders: &'a mut ShaderCache,
    pub input: &'a InputState,
    pub staging_buffers: &'a mut Vec<Buffer>,
    pub elapsed: f32,
}

/// A scene participant. `initialize` runs inside the scene's "copy"
/// recording, `update` before submission, `render` inside the scene's render
/// pass bracket.
pub trait Actor {
    unsafe fn initialize(&mut self, ctx: &mut ActorContext) -> Result<()>;
    unsafe fn update(&mut self, ctx: &mut ActorContext) -> Result<()>;
    unsafe fn render(&self, gpu: &Gpu, assets: &AssetCache) -> Result<()>;
    unsafe fn destroy(&mut self, device: &Device);
}

/// The attachment behaviors an actor can carry, dispatched by tag.
#[derive(Debug)]
pub enum Attachment {
    Move(MoveBehavior),
    Particles(ParticleEngine),
}

impl Attachment {
    pub unsafe fn initialize(&mut self, ctx: &mut ActorContext) -> Result<()> {
        match self {
            Attachment::Move(_) => Ok(()),
            Attachment::Particles(engine) => engine.initialize(ctx),
        }
    }

    pub unsafe fn update(&mut self, owner: &mut Position, ctx: &mut ActorContext) -> Result<()> {
        match self {
            Attachment::Move(behavior) => {
                behavior.update(owner, ctx.input);
                Ok(())
            }
            Attachment::Particles(engine) => engine.update(ctx),
        }
    }

    pub unsafe fn render(&self, gpu: &Gpu, _assets: &AssetCache) -> Result<()> {
        match self {
            Attachment::Move(_) => Ok(()),
            Attachment::Particles(engine) => engine.render(gpu),
        }
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        match self {
            Attachment::Move(_) => {}
            Attachment::Particles(engine) => engine.destroy(device),
        }
    }
}

/// Keyboard-driven translation of the owner's model matrix.
#[derive(Debug)]
pub struct MoveBehavior {
    step: f32,
}

impl Default for MoveBehavior {
    fn default() -> Self {
        Self { step: 2.0 }
    }
}

impl MoveBehavior {
    pub fn new(step: f32) -> Self {
        Self { step }
    }

    pub fn update(&mut self, owner: &mut Position, input: &InputState) {
        let step = self.step;
        let translation = if input.pressed(KeyCode::KeyA) {
            Some(Vec3::new(-step, 0.0, 0.0))
        } else if input.pressed(KeyCode::KeyD) {
            Some(Vec3::new(step, 0.0, 0.0))
        } else if input.pressed(KeyCode::KeyW) {
            Some(Vec3::new(0.0, 0.0, step))
        } else if input.pressed(KeyCode::KeyS) {
            Some(Vec3::new(0.0, 0.0, -step))
        } else if input.pressed(KeyCode::KeyK) {
            Some(Vec3::new(0.0, step, 0.0))
        } else if input.pressed(KeyCode::KeyJ) {
            Some(Vec3::new(0.0, -step, 0.0))
        } else {
            None
        };

        if let Some(translation) = translation {
            owner.model = Mat4::from_translation(translation) * owner.model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_block_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Position>(), 3 * 64);
    }

    #[test]
    fn move_behavior_is_inert_without_input() {
        let mut behavior = MoveBehavior::new(1.0);
        let mut position = Position::default();
        let input = InputState::new();
        behavior.update(&mut position, &input);
        assert_eq!(position.model, Mat4::IDENTITY);
    }
}
