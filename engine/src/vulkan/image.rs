use anyhow::Result;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::Device;

use super::device::VulkanDevice;

/// Device image with its backing memory and view.
#[derive(Debug)]
pub struct Image {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

impl Image {
    pub unsafe fn new(
        device: &VulkanDevice,
        width: u32,
        height: u32,
        mip_levels: u32,
        samples: vk::SampleCountFlags,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspects: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let image = device.vk_device.create_image(&info, None)?;

        let requirements = device.vk_device.get_image_memory_requirements(image);
        let memory_type_index = device.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = device.vk_device.allocate_memory(&allocate_info, None)?;

        device.vk_device.bind_image_memory(image, memory, 0)?;

        let subresource_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(aspects)
            .base_mip_level(0)
            .level_count(mip_levels)
            .base_array_layer(0)
            .layer_count(1);
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::_2D)
            .format(format)
            .subresource_range(subresource_range);
        let view = device.vk_device.create_image_view(&view_info, None)?;

        Ok(Self {
            image,
            memory,
            view,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_image_view(self.view, None);
        device.free_memory(self.memory, None);
        device.destroy_image(self.image, None);
    }
}

/// Sampled image plus its sampler; the mip chain length is derived from the
/// source resolution.
#[derive(Debug)]
pub struct Texture {
    image: Image,
    sampler: vk::Sampler,
    mip_levels: u32,
    width: u32,
    height: u32,
}

impl Texture {
    pub const FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

    pub unsafe fn new(device: &VulkanDevice, width: u32, height: u32) -> Result<Self> {
        let mip_levels = mip_levels(width, height);

        let image = Image::new(
            device,
            width,
            height,
            mip_levels,
            vk::SampleCountFlags::_1,
            Self::FORMAT,
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::ImageAspectFlags::COLOR,
        )?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(device.max_sampler_anisotropy())
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(mip_levels as f32)
            .mip_lod_bias(0.0);
        let sampler = device.vk_device.create_sampler(&sampler_info, None)?;

        Ok(Self {
            image,
            sampler,
            mip_levels,
            width,
            height,
        })
    }

    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_sampler(self.sampler, None);
        self.image.destroy(device);
    }
}

/// Full mip chain length for a base image of the given size.
pub fn mip_levels(width: u32, height: u32) -> u32 {
    (width.max(height) as f32).log2().floor() as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_length() {
        assert_eq!(mip_levels(512, 256), 10);
        assert_eq!(mip_levels(256, 512), 10);
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(1024, 1024), 11);
        assert_eq!(mip_levels(100, 60), 7);
    }
}
