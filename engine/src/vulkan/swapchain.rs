use anyhow::Result;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSwapchainExtension;
use vulkanalia::Device;
use winit::dpi::PhysicalSize;

use super::constants;
use super::device::{SwapchainSupport, VulkanDevice};
use super::image::Image;
use super::instance::VulkanInstance;
use super::sync::{next_frame, Fence};

/// Presentable images, their framebuffers, the render pass drawing into them
/// and the per-frame-slot synchronization gating their reuse.
///
/// The frame slot index and the acquired image index are distinct: the
/// present engine may hand images back out of round-robin order, so a
/// per-image fence table remembers which slot's fence last covered each
/// image and is waited on before the image is reused.
#[derive(Debug)]
pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    format: vk::Format,
    extent: vk::Extent2D,
    color_image: Image,
    depth_image: Image,
    image_available_semaphores: Vec<vk::Semaphore>,
    render_finished_semaphores: Vec<vk::Semaphore>,
    in_flight_fences: Vec<Fence>,
    images_in_flight: Vec<vk::Fence>,
    current_frame: usize,
    acquired_image: usize,
}

impl Swapchain {
    pub unsafe fn new(
        instance: &VulkanInstance,
        device: &VulkanDevice,
        window_size: PhysicalSize<u32>,
    ) -> Result<Self> {
        let support = SwapchainSupport::get(instance, device.physical_device())?;

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, window_size);

        let mut image_count = support.capabilities.min_image_count + 1;
        if support.capabilities.max_image_count != 0
            && image_count > support.capabilities.max_image_count
        {
            image_count = support.capabilities.max_image_count;
        }

        let indices = device.queue_family_indices();
        let mut queue_family_indices = vec![];
        let image_sharing_mode = if indices.is_equal_families() {
            vk::SharingMode::EXCLUSIVE
        } else {
            queue_family_indices.push(indices.graphics_compute);
            queue_family_indices.push(indices.present);
            vk::SharingMode::CONCURRENT
        };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(instance.surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .image_sharing_mode(image_sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = device.vk_device.create_swapchain_khr(&info, None)?;
        let images = device.vk_device.get_swapchain_images_khr(swapchain)?;
        let format = surface_format.format;

        let image_views = images
            .iter()
            .map(|i| {
                let subresource_range = vk::ImageSubresourceRange::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1);
                let info = vk::ImageViewCreateInfo::builder()
                    .image(*i)
                    .view_type(vk::ImageViewType::_2D)
                    .format(format)
                    .subresource_range(subresource_range);
                device.vk_device.create_image_view(&info, None)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let samples = device.max_sample_count();
        let depth_format = device.find_depth_format(&instance.vk_instance)?;
        let render_pass =
            create_render_pass(&device.vk_device, format, depth_format, samples)?;

        // Multisampled color target resolved into the presentable image, plus
        // the depth attachment, both sized to the swapchain extent.
        let color_image = Image::new(
            device,
            extent.width,
            extent.height,
            1,
            samples,
            format,
            vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth_image = Image::new(
            device,
            extent.width,
            extent.height,
            1,
            samples,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )?;

        let framebuffers = image_views
            .iter()
            .map(|i| {
                let attachments = &[color_image.view(), depth_image.view(), *i];
                let create_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);
                device.vk_device.create_framebuffer(&create_info, None)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let mut image_available_semaphores = Vec::new();
        let mut render_finished_semaphores = Vec::new();
        let mut in_flight_fences = Vec::new();
        for _ in 0..constants::BUFFERING_FRAME_NUM {
            image_available_semaphores
                .push(device.vk_device.create_semaphore(&semaphore_info, None)?);
            render_finished_semaphores
                .push(device.vk_device.create_semaphore(&semaphore_info, None)?);
            in_flight_fences.push(Fence::new(&device.vk_device, true)?);
        }

        let images_in_flight = images.iter().map(|_| vk::Fence::null()).collect();

        Ok(Self {
            swapchain,
            images,
            image_views,
            framebuffers,
            render_pass,
            format,
            extent,
            color_image,
            depth_image,
            image_available_semaphores,
            render_finished_semaphores,
            in_flight_fences,
            images_in_flight,
            current_frame: 0,
            acquired_image: 0,
        })
    }

    /// Blocks until the current frame slot's previous use has retired, then
    /// acquires the next presentable image. If that image is still covered by
    /// another slot's fence, waits on that too before claiming the table
    /// entry for this slot.
    pub unsafe fn acquire_next_image(&mut self, device: &Device) -> Result<usize> {
        self.in_flight_fences[self.current_frame].wait(device)?;

        let image_index = device
            .acquire_next_image_khr(
                self.swapchain,
                u64::MAX,
                self.image_available_semaphores[self.current_frame],
                vk::Fence::null(),
            )?
            .0 as usize;

        if !self.images_in_flight[image_index].is_null() {
            device.wait_for_fences(&[self.images_in_flight[image_index]], true, u64::MAX)?;
        }
        self.images_in_flight[image_index] = self.in_flight_fences[self.current_frame].handle();

        self.acquired_image = image_index;
        Ok(image_index)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn acquired_image(&self) -> usize {
        self.acquired_image
    }

    pub fn acquired_image_handle(&self) -> vk::Image {
        self.images[self.acquired_image]
    }

    pub fn acquired_framebuffer(&self) -> vk::Framebuffer {
        self.framebuffers[self.acquired_image]
    }

    pub fn current_fence(&self) -> &Fence {
        &self.in_flight_fences[self.current_frame]
    }

    pub fn image_available_semaphore(&self) -> vk::Semaphore {
        self.image_available_semaphores[self.current_frame]
    }

    pub fn render_finished_semaphore(&self) -> vk::Semaphore {
        self.render_finished_semaphores[self.current_frame]
    }

    pub fn advance(&mut self) {
        self.current_frame = next_frame(self.current_frame, constants::BUFFERING_FRAME_NUM);
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        for fence in &self.in_flight_fences {
            fence.destroy(device);
        }
        for semaphore in &self.render_finished_semaphores {
            device.destroy_semaphore(*semaphore, None);
        }
        for semaphore in &self.image_available_semaphores {
            device.destroy_semaphore(*semaphore, None);
        }
        self.in_flight_fences.clear();
        self.render_finished_semaphores.clear();
        self.image_available_semaphores.clear();
        self.images_in_flight.clear();

        self.depth_image.destroy(device);
        self.color_image.destroy(device);
        for framebuffer in &self.framebuffers {
            device.destroy_framebuffer(*framebuffer, None);
        }
        for image_view in &self.image_views {
            device.destroy_image_view(*image_view, None);
        }
        self.framebuffers.clear();
        self.image_views.clear();

        device.destroy_render_pass(self.render_pass, None);
        device.destroy_swapchain_khr(self.swapchain, None);
    }
}

unsafe fn create_render_pass(
    device: &Device,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let depth_stencil_attachment = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

    let color_resolve_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::_1)
        .load_op(vk::AttachmentLoadOp::DONT_CARE)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    let depth_stencil_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    let color_resolve_attachment_ref = vk::AttachmentReference::builder()
        .attachment(2)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

    let color_attachments = &[color_attachment_ref];
    let resolve_attachments = &[color_resolve_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_stencil_attachment_ref)
        .resolve_attachments(resolve_attachments);

    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        );

    let attachments = &[
        color_attachment,
        depth_stencil_attachment,
        color_resolve_attachment,
    ];
    let subpasses = &[subpass];
    let dependencies = &[dependency];
    let info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    Ok(device.create_render_pass(&info, None)?)
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .cloned()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| formats[0])
}

pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .cloned()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: PhysicalSize<u32>,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window_size.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window_size.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR::builder()
            .format(format)
            .color_space(color_space)
            .build()
    }

    #[test]
    fn prefers_bgra_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [surface_format(
            vk::Format::R8G8B8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn extent_clamps_to_surface_bounds() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.current_extent.width = u32::MAX;
        capabilities.min_image_extent = vk::Extent2D {
            width: 100,
            height: 100,
        };
        capabilities.max_image_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };

        let extent = choose_extent(&capabilities, PhysicalSize::new(5000, 50));
        assert_eq!(extent.width, 800);
        assert_eq!(extent.height, 100);
    }

    #[test]
    fn extent_uses_current_when_fixed() {
        let mut capabilities = vk::SurfaceCapabilitiesKHR::default();
        capabilities.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let extent = choose_extent(&capabilities, PhysicalSize::new(5000, 50));
        assert_eq!(extent.width, 640);
        assert_eq!(extent.height, 480);
    }
}
