//! Sample scenes: a textured mesh with keyboard movement, a second variant
//! of it, and the GPU-driven particle demo. Enter advances to the next
//! scene, Escape quits, Space captures the screen.

use anyhow::{anyhow, Result};
use glam::{Mat4, Vec3};

use engine::actor::{Actor, ActorContext, Attachment, MoveBehavior, Position, ResourceBundle};
use engine::asset::{AssetCache, Vertex};
use engine::particles::{ParticleEngine, DEFAULT_PARTICLE_NUM};
use engine::scene::{Scene, SceneRegistry};
use engine::shader::ShaderStage;
use engine::vulkan::descriptor::{DescriptorBinding, DescriptorSet, DescriptorWrite};
use engine::vulkan::constants::BUFFERING_FRAME_NUM;
use engine::vulkan::buffer::Buffer;
use engine::vulkan::pipeline::{GraphicsPipelineDesc, Pipeline};
use engine::vulkan::Gpu;
use engine::vulkanalia::prelude::v1_0::*;

const POSITION_BINDING: u32 = 0;
const SAMPLER_BINDING: u32 = 1;

/// Textured OBJ model spinning in place, movable with the keyboard.
struct SampleActor {
    asset_key: &'static str,
    texture_path: &'static str,
    model_path: &'static str,
    spin_speed: f32,
    position: Position,
    bundle: Option<ResourceBundle>,
    attachments: Vec<Attachment>,
}

impl SampleActor {
    fn new(
        asset_key: &'static str,
        texture_path: &'static str,
        model_path: &'static str,
        spin_speed: f32,
    ) -> Self {
        Self {
            asset_key,
            texture_path,
            model_path,
            spin_speed,
            position: Position::default(),
            bundle: None,
            attachments: vec![Attachment::Move(MoveBehavior::default())],
        }
    }

    fn bundle(&self) -> Result<&ResourceBundle> {
        self.bundle
            .as_ref()
            .ok_or_else(|| anyhow!("actor `{}` was not initialized", self.asset_key))
    }
}

impl Actor for SampleActor {
    unsafe fn initialize(&mut self, ctx: &mut ActorContext) -> Result<()> {
        let gpu = ctx.gpu;
        let device = gpu.device();

        ctx.assets.register_pixels(self.texture_path, self.asset_key)?;
        ctx.assets.register_obj(self.model_path, self.asset_key)?;
        ctx.assets
            .upload_texture(gpu, self.asset_key, ctx.staging_buffers)?;
        ctx.assets
            .upload_mesh(gpu, self.asset_key, ctx.staging_buffers)?;

        let bindings = [
            DescriptorBinding {
                binding: POSITION_BINDING,
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                stages: vk::ShaderStageFlags::VERTEX,
            },
            DescriptorBinding {
                binding: SAMPLER_BINDING,
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                stages: vk::ShaderStageFlags::FRAGMENT,
            },
        ];
        let descriptor_set = DescriptorSet::new(device, &bindings, BUFFERING_FRAME_NUM)?;

        let mut position_buffers = Vec::with_capacity(BUFFERING_FRAME_NUM);
        for _ in 0..BUFFERING_FRAME_NUM {
            position_buffers.push(Buffer::uniform(
                gpu.vulkan_device(),
                std::mem::size_of::<Position>() as u64,
            )?);
        }

        let texture = ctx.assets.texture(self.asset_key)?;
        for frame in 0..BUFFERING_FRAME_NUM {
            descriptor_set.update(
                device,
                frame,
                &[
                    DescriptorWrite::UniformBuffer {
                        binding: POSITION_BINDING,
                        buffer: &position_buffers[frame],
                    },
                    DescriptorWrite::ImageSampler {
                        binding: SAMPLER_BINDING,
                        view: texture.view(),
                        sampler: texture.sampler(),
                    },
                ],
            );
        }

        ctx.shaders.load(device, "sample_3d.vert", self.asset_key)?;
        ctx.shaders.load(device, "sample_3d.frag", self.asset_key)?;

        let vertex_bindings = [Vertex::binding_description()];
        let vertex_attributes = Vertex::attribute_descriptions();
        let pipeline = Pipeline::graphics(
            device,
            gpu.swapchain().render_pass(),
            gpu.samples(),
            descriptor_set.layout(),
            &GraphicsPipelineDesc {
                vertex_shader: ctx.shaders.get(ShaderStage::Vertex, self.asset_key)?,
                fragment_shader: ctx.shaders.get(ShaderStage::Fragment, self.asset_key)?,
                bindings: &vertex_bindings,
                attributes: &vertex_attributes,
                topology: vk::PrimitiveTopology::TRIANGLE_LIST,
                depth_compare: vk::CompareOp::LESS,
                blend_enable: false,
            },
        )?;

        let mut bundle = ResourceBundle::new(pipeline, descriptor_set);
        bundle
            .uniform_buffers
            .insert("position".to_string(), position_buffers);
        self.bundle = Some(bundle);

        for attachment in &mut self.attachments {
            attachment.initialize(ctx)?;
        }
        Ok(())
    }

    unsafe fn update(&mut self, ctx: &mut ActorContext) -> Result<()> {
        for attachment in &mut self.attachments {
            attachment.update(&mut self.position, ctx)?;
        }

        let gpu = ctx.gpu;
        let extent = gpu.swapchain().extent();
        let scroll = ctx.input.scroll();

        let spin = Mat4::from_rotation_z(self.spin_speed.to_radians() * ctx.elapsed);
        let view = Mat4::look_at_rh(
            Vec3::new(2.0, 2.0, 2.0 + scroll.y / 500.0),
            Vec3::ZERO,
            Vec3::Z,
        );
        let mut projection = Mat4::perspective_rh(
            (45.0 + scroll.x / 200.0_f32).to_radians(),
            extent.width as f32 / extent.height as f32,
            0.1,
            10.0,
        );
        // Vulkan clip space has an inverted y compared to OpenGL conventions.
        projection.y_axis.y *= -1.0;

        let uniform = Position {
            model: self.position.model * spin,
            view,
            projection,
        };

        let frame = gpu.swapchain().current_frame();
        self.bundle()?
            .uniform_buffer("position", frame)?
            .write(gpu.device(), &[uniform])?;
        Ok(())
    }

    unsafe fn render(&self, gpu: &Gpu, assets: &AssetCache) -> Result<()> {
        let device = gpu.device();
        let bundle = self.bundle()?;
        let mesh = assets.mesh(self.asset_key)?;
        let command_buffer = gpu.graphic_command_buffer("render")?;
        let frame = gpu.swapchain().current_frame();

        device.cmd_bind_pipeline(
            command_buffer.handle(),
            vk::PipelineBindPoint::GRAPHICS,
            bundle.pipeline.handle(),
        );
        device.cmd_bind_vertex_buffers(
            command_buffer.handle(),
            0,
            &[mesh.vertex_buffer()?.handle()],
            &[0],
        );
        device.cmd_bind_index_buffer(
            command_buffer.handle(),
            mesh.index_buffer()?.handle(),
            0,
            vk::IndexType::UINT32,
        );
        device.cmd_bind_descriptor_sets(
            command_buffer.handle(),
            vk::PipelineBindPoint::GRAPHICS,
            bundle.pipeline.layout(),
            0,
            &[bundle.descriptor_set.set(frame)],
            &[],
        );
        device.cmd_draw_indexed(
            command_buffer.handle(),
            mesh.indices.len() as u32,
            1,
            0,
            0,
            0,
        );

        for attachment in &self.attachments {
            attachment.render(gpu, assets)?;
        }
        Ok(())
    }

    unsafe fn destroy(&mut self, device: &Device) {
        for attachment in &mut self.attachments {
            attachment.destroy(device);
        }
        if let Some(mut bundle) = self.bundle.take() {
            bundle.destroy(device);
        }
    }
}

/// Actor whose only job is to host the particle engine attachment.
struct ComputeActor {
    position: Position,
    attachments: Vec<Attachment>,
}

impl ComputeActor {
    fn new(particle_num: usize) -> Self {
        Self {
            position: Position::default(),
            attachments: vec![Attachment::Particles(ParticleEngine::new(particle_num))],
        }
    }
}

impl Actor for ComputeActor {
    unsafe fn initialize(&mut self, ctx: &mut ActorContext) -> Result<()> {
        for attachment in &mut self.attachments {
            attachment.initialize(ctx)?;
        }
        Ok(())
    }

    unsafe fn update(&mut self, ctx: &mut ActorContext) -> Result<()> {
        for attachment in &mut self.attachments {
            attachment.update(&mut self.position, ctx)?;
        }
        Ok(())
    }

    unsafe fn render(&self, gpu: &Gpu, assets: &AssetCache) -> Result<()> {
        for attachment in &self.attachments {
            attachment.render(gpu, assets)?;
        }
        Ok(())
    }

    unsafe fn destroy(&mut self, device: &Device) {
        for attachment in &mut self.attachments {
            attachment.destroy(device);
        }
    }
}

pub fn scene_registry() -> SceneRegistry {
    let mut registry = SceneRegistry::new();
    registry.register("first", || {
        Scene::new("first")
            .with_actor(Box::new(SampleActor::new(
                "room",
                "sample_3d.png",
                "sample_3d.obj",
                60.0,
            )))
            .with_next_scene("second")
    });
    registry.register("second", || {
        Scene::new("second")
            .with_actor(Box::new(SampleActor::new(
                "room",
                "sample_3d.png",
                "sample_3d.obj",
                -30.0,
            )))
            .with_next_scene("particles")
    });
    registry.register("particles", || {
        Scene::new("particles")
            .with_actor(Box::new(ComputeActor::new(DEFAULT_PARTICLE_NUM)))
            .with_compute_wait()
            .with_next_scene("first")
    });
    registry
}
