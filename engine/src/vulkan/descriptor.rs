use anyhow::Result;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::Device;

use super::buffer::Buffer;

/// One binding slot in a descriptor set layout.
#[derive(Copy, Clone, Debug)]
pub struct DescriptorBinding {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub stages: vk::ShaderStageFlags,
}

/// Resource to late-bind into an already allocated descriptor set.
#[derive(Copy, Clone, Debug)]
pub enum DescriptorWrite<'a> {
    UniformBuffer { binding: u32, buffer: &'a Buffer },
    StorageBuffer { binding: u32, buffer: &'a Buffer },
    ImageSampler {
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

/// Layout, pool and one descriptor set per frame slot.
///
/// Built once per resource owner; after construction only `update` is used,
/// rebinding buffer/image handles in place without reallocating the sets.
#[derive(Debug)]
pub struct DescriptorSet {
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl DescriptorSet {
    pub unsafe fn new(
        device: &Device,
        bindings: &[DescriptorBinding],
        buffering_num: usize,
    ) -> Result<Self> {
        let layout_bindings = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.ty)
                    .descriptor_count(1)
                    .stage_flags(b.stages)
                    .build()
            })
            .collect::<Vec<_>>();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        let layout = device.create_descriptor_set_layout(&layout_info, None)?;

        // One pool size entry per binding, each sized to the frame count.
        let pool_sizes = bindings
            .iter()
            .map(|b| {
                vk::DescriptorPoolSize::builder()
                    .type_(b.ty)
                    .descriptor_count(buffering_num as u32)
                    .build()
            })
            .collect::<Vec<_>>();
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(buffering_num as u32)
            .pool_sizes(&pool_sizes);
        let pool = device.create_descriptor_pool(&pool_info, None)?;

        let layouts = vec![layout; buffering_num];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let sets = device.allocate_descriptor_sets(&allocate_info)?;

        Ok(Self { layout, pool, sets })
    }

    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn set(&self, frame: usize) -> vk::DescriptorSet {
        self.sets[frame]
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Rebinds resources on the set belonging to one frame slot.
    pub unsafe fn update(&self, device: &Device, frame: usize, writes: &[DescriptorWrite]) {
        for write in writes {
            match write {
                DescriptorWrite::UniformBuffer { binding, buffer } => {
                    let info = vk::DescriptorBufferInfo::builder()
                        .buffer(buffer.handle())
                        .offset(0)
                        .range(buffer.size());
                    let buffer_info = &[info];
                    let write = vk::WriteDescriptorSet::builder()
                        .dst_set(self.sets[frame])
                        .dst_binding(*binding)
                        .dst_array_element(0)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(buffer_info);
                    device.update_descriptor_sets(&[write], &[] as &[vk::CopyDescriptorSet]);
                }
                DescriptorWrite::StorageBuffer { binding, buffer } => {
                    let info = vk::DescriptorBufferInfo::builder()
                        .buffer(buffer.handle())
                        .offset(0)
                        .range(buffer.size());
                    let buffer_info = &[info];
                    let write = vk::WriteDescriptorSet::builder()
                        .dst_set(self.sets[frame])
                        .dst_binding(*binding)
                        .dst_array_element(0)
                        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                        .buffer_info(buffer_info);
                    device.update_descriptor_sets(&[write], &[] as &[vk::CopyDescriptorSet]);
                }
                DescriptorWrite::ImageSampler {
                    binding,
                    view,
                    sampler,
                } => {
                    let info = vk::DescriptorImageInfo::builder()
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .image_view(*view)
                        .sampler(*sampler);
                    let image_info = &[info];
                    let write = vk::WriteDescriptorSet::builder()
                        .dst_set(self.sets[frame])
                        .dst_binding(*binding)
                        .dst_array_element(0)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(image_info);
                    device.update_descriptor_sets(&[write], &[] as &[vk::CopyDescriptorSet]);
                }
            }
        }
    }

    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_descriptor_pool(self.pool, None);
        device.destroy_descriptor_set_layout(self.layout, None);
    }
}
