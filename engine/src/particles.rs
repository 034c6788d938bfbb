use anyhow::{anyhow, Result};
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec4};
use rand::Rng;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::Device;

use crate::actor::{ActorContext, ResourceBundle};
use crate::shader::{ShaderCache, ShaderStage};
use crate::vulkan::buffer::Buffer;
use crate::vulkan::constants::BUFFERING_FRAME_NUM;
use crate::vulkan::descriptor::{DescriptorBinding, DescriptorSet, DescriptorWrite};
use crate::vulkan::pipeline::{GraphicsPipelineDesc, Pipeline};
use crate::vulkan::Gpu;

pub const WORKGROUP_SIZE: u32 = 256;
pub const DEFAULT_PARTICLE_NUM: usize = 8192;

const DELTA_TIME_BINDING: u32 = 10;
const PARTICLE_INPUT_BINDING: u32 = 11;
const PARTICLE_OUTPUT_BINDING: u32 = 12;

/// One simulated particle; doubles as the vertex format of the point draw.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Particle {
    pub position: Vec2,
    pub velocity: Vec2,
    pub color: Vec4,
}

impl Particle {
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(std::mem::size_of::<Particle>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription::builder()
                .location(0)
                .binding(0)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(0)
                .build(),
            vk::VertexInputAttributeDescription::builder()
                .location(1)
                .binding(0)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset((2 * std::mem::size_of::<Vec2>()) as u32)
                .build(),
        ]
    }
}

/// Storage-buffer slot read by the compute pass for frame slot `frame`: the
/// buffer written one frame earlier.
pub fn input_slot(frame: usize, buffering_num: usize) -> usize {
    (frame + buffering_num - 1) % buffering_num
}

/// Seeds particles uniformly over a disk, velocity pointing outward.
pub fn seed_particles(
    count: usize,
    extent: vk::Extent2D,
    rng: &mut impl Rng,
) -> Vec<Particle> {
    let aspect = extent.height as f32 / extent.width as f32;
    (0..count)
        .map(|_| {
            let radius = 0.25 * rng.gen::<f32>().sqrt();
            let theta = rng.gen::<f32>() * 2.0 * std::f32::consts::PI;
            let position = Vec2::new(radius * theta.cos() * aspect, radius * theta.sin());
            Particle {
                position,
                velocity: position.normalize_or_zero() * 0.00015,
                color: Vec4::new(rng.gen(), rng.gen(), rng.gen(), 1.0),
            }
        })
        .collect()
}

/// GPU-driven particle simulation: a compute pass advances the population in
/// a ping-pong storage buffer pair, and the graphics pass draws the freshly
/// written slot as a point list.
///
/// Both slots receive the same seed upload so the very first compute pass
/// has a valid previous frame to read.
#[derive(Debug)]
pub struct ParticleEngine {
    particle_num: usize,
    storage_buffers: Vec<Buffer>,
    compute: Option<ResourceBundle>,
    graphics_pipeline: Option<Pipeline>,
}

impl ParticleEngine {
    pub fn new(particle_num: usize) -> Self {
        Self {
            particle_num,
            storage_buffers: Vec::new(),
            compute: None,
            graphics_pipeline: None,
        }
    }

    pub unsafe fn initialize(&mut self, ctx: &mut ActorContext) -> Result<()> {
        let gpu = ctx.gpu;
        let device = gpu.device();
        let extent = gpu.swapchain().extent();

        let mut rng = rand::thread_rng();
        let particles = seed_particles(self.particle_num, extent, &mut rng);
        let buffer_size = (std::mem::size_of::<Particle>() * particles.len()) as u64;

        // Descriptor layout shared by the compute dispatch and the vertex
        // stage reading the delta-time block.
        let bindings = [
            DescriptorBinding {
                binding: DELTA_TIME_BINDING,
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                stages: vk::ShaderStageFlags::COMPUTE | vk::ShaderStageFlags::VERTEX,
            },
            DescriptorBinding {
                binding: PARTICLE_INPUT_BINDING,
                ty: vk::DescriptorType::STORAGE_BUFFER,
                stages: vk::ShaderStageFlags::COMPUTE,
            },
            DescriptorBinding {
                binding: PARTICLE_OUTPUT_BINDING,
                ty: vk::DescriptorType::STORAGE_BUFFER,
                stages: vk::ShaderStageFlags::COMPUTE,
            },
        ];
        let descriptor_set = DescriptorSet::new(device, &bindings, BUFFERING_FRAME_NUM)?;

        // Identical seed data into both ping-pong slots through one staging
        // buffer.
        let staging = Buffer::staging(gpu.vulkan_device(), buffer_size)?;
        staging.write(device, &particles)?;
        let copy_command_buffer = gpu.graphic_command_buffer("copy")?;
        for _ in 0..BUFFERING_FRAME_NUM {
            let storage = Buffer::device_local(
                gpu.vulkan_device(),
                buffer_size,
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER,
            )?;
            copy_command_buffer.copy_buffer(device, &staging, &storage, buffer_size);
            self.storage_buffers.push(storage);
        }
        ctx.staging_buffers.push(staging);

        let mut delta_time_buffers = Vec::with_capacity(BUFFERING_FRAME_NUM);
        for _ in 0..BUFFERING_FRAME_NUM {
            delta_time_buffers.push(Buffer::uniform(
                gpu.vulkan_device(),
                std::mem::size_of::<f32>() as u64,
            )?);
        }

        for frame in 0..BUFFERING_FRAME_NUM {
            descriptor_set.update(
                device,
                frame,
                &[
                    DescriptorWrite::UniformBuffer {
                        binding: DELTA_TIME_BINDING,
                        buffer: &delta_time_buffers[frame],
                    },
                    DescriptorWrite::StorageBuffer {
                        binding: PARTICLE_INPUT_BINDING,
                        buffer: &self.storage_buffers[input_slot(frame, BUFFERING_FRAME_NUM)],
                    },
                    DescriptorWrite::StorageBuffer {
                        binding: PARTICLE_OUTPUT_BINDING,
                        buffer: &self.storage_buffers[frame],
                    },
                ],
            );
        }

        let (compute_pipeline, graphics_pipeline) =
            Self::build_pipelines(gpu, ctx.shaders, &descriptor_set)?;

        let mut bundle = ResourceBundle::new(compute_pipeline, descriptor_set);
        bundle
            .uniform_buffers
            .insert("delta_time".to_string(), delta_time_buffers);
        self.compute = Some(bundle);
        self.graphics_pipeline = Some(graphics_pipeline);
        Ok(())
    }

    unsafe fn build_pipelines(
        gpu: &Gpu,
        shaders: &mut ShaderCache,
        descriptor_set: &DescriptorSet,
    ) -> Result<(Pipeline, Pipeline)> {
        let device = gpu.device();
        shaders.load(device, "particle.vert", "particle")?;
        shaders.load(device, "particle.frag", "particle")?;
        shaders.load(device, "particle.comp", "particle")?;

        let compute_pipeline = Pipeline::compute(
            device,
            descriptor_set.layout(),
            shaders.get(ShaderStage::Compute, "particle")?,
        )?;

        let bindings = [Particle::binding_description()];
        let attributes = Particle::attribute_descriptions();
        let graphics_pipeline = Pipeline::graphics(
            device,
            gpu.swapchain().render_pass(),
            gpu.samples(),
            descriptor_set.layout(),
            &GraphicsPipelineDesc {
                vertex_shader: shaders.get(ShaderStage::Vertex, "particle")?,
                fragment_shader: shaders.get(ShaderStage::Fragment, "particle")?,
                bindings: &bindings,
                attributes: &attributes,
                topology: vk::PrimitiveTopology::POINT_LIST,
                depth_compare: vk::CompareOp::LESS_OR_EQUAL,
                blend_enable: true,
            },
        )?;

        Ok((compute_pipeline, graphics_pipeline))
    }

    /// Writes the frame's delta time, records the compute dispatch reading
    /// last frame's slot and writing this frame's, and submits it with the
    /// dedicated fence/semaphore pair.
    pub unsafe fn update(&mut self, ctx: &mut ActorContext) -> Result<()> {
        let gpu = ctx.gpu;
        let device = gpu.device();
        let sync = gpu
            .compute_sync()
            .ok_or_else(|| anyhow!("particle engine requires a declared compute purpose"))?;
        let frame = sync.current_frame();
        let compute = self
            .compute
            .as_ref()
            .ok_or_else(|| anyhow!("particle engine was not initialized"))?;

        // The previous use of this slot must retire before its command
        // buffer and uniform buffer are touched again.
        sync.wait_current(device)?;

        let delta_time = ctx.elapsed;
        compute
            .uniform_buffer("delta_time", frame)?
            .write(device, &[delta_time])?;

        let command_buffer = gpu.compute_command_buffer("particle")?;
        command_buffer.reset(device)?;
        command_buffer.begin(device)?;
        device.cmd_bind_pipeline(
            command_buffer.handle(),
            vk::PipelineBindPoint::COMPUTE,
            compute.pipeline.handle(),
        );
        device.cmd_bind_descriptor_sets(
            command_buffer.handle(),
            vk::PipelineBindPoint::COMPUTE,
            compute.pipeline.layout(),
            0,
            &[compute.descriptor_set.set(frame)],
            &[],
        );
        device.cmd_dispatch(
            command_buffer.handle(),
            self.particle_num as u32 / WORKGROUP_SIZE,
            1,
            1,
        );
        command_buffer.end(device)?;

        gpu.submit_compute(command_buffer)?;
        Ok(())
    }

    /// Binds the slot the compute pass just wrote as the vertex buffer and
    /// draws the population as points.
    pub unsafe fn render(&self, gpu: &Gpu) -> Result<()> {
        let device = gpu.device();
        let sync = gpu
            .compute_sync()
            .ok_or_else(|| anyhow!("particle engine requires a declared compute purpose"))?;
        let frame = sync.current_frame();
        let pipeline = self
            .graphics_pipeline
            .as_ref()
            .ok_or_else(|| anyhow!("particle engine was not initialized"))?;

        let command_buffer = gpu.graphic_command_buffer("render")?;
        device.cmd_bind_pipeline(
            command_buffer.handle(),
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.handle(),
        );
        device.cmd_bind_vertex_buffers(
            command_buffer.handle(),
            0,
            &[self.storage_buffers[frame].handle()],
            &[0],
        );
        device.cmd_draw(
            command_buffer.handle(),
            self.particle_num as u32,
            1,
            0,
            0,
        );
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        if let Some(mut bundle) = self.compute.take() {
            bundle.destroy(device);
        }
        if let Some(pipeline) = self.graphics_pipeline.take() {
            pipeline.destroy(device);
        }
        for buffer in self.storage_buffers.drain(..) {
            buffer.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn ping_pong_slots() {
        // Frame k reads the slot written on frame k-1 and writes slot k.
        assert_eq!(input_slot(0, 2), 1);
        assert_eq!(input_slot(1, 2), 0);
        assert_eq!(input_slot(0, 3), 2);
        assert_eq!(input_slot(2, 3), 1);
    }

    #[test]
    fn seeded_particles_stay_in_disk() {
        let mut rng = StdRng::seed_from_u64(7);
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let particles = seed_particles(512, extent, &mut rng);
        assert_eq!(particles.len(), 512);

        let aspect = 600.0 / 800.0;
        for particle in &particles {
            // x is squeezed by the aspect ratio, y bounded by the disk radius.
            assert!(particle.position.x.abs() <= 0.25 * aspect + f32::EPSILON);
            assert!(particle.position.y.abs() <= 0.25 + f32::EPSILON);
            assert!((0.0..=1.0).contains(&particle.color.x));
            assert_eq!(particle.color.w, 1.0);
        }
    }

    #[test]
    fn seeded_velocity_points_outward() {
        let mut rng = StdRng::seed_from_u64(11);
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        for particle in seed_particles(64, extent, &mut rng) {
            let speed = particle.velocity.length();
            if particle.position.length() > f32::EPSILON {
                assert!((speed - 0.00015).abs() < 1e-6);
                let dot = particle.velocity.normalize().dot(particle.position.normalize());
                assert!(dot > 0.999);
            }
        }
    }

    #[test]
    fn particle_vertex_layout() {
        assert_eq!(std::mem::size_of::<Particle>(), 32);
        let attributes = Particle::attribute_descriptions();
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].offset, 16);
    }
}
