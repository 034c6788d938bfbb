use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashMap;
use vulkanalia::{
    loader::{LibloadingLoader, LIBRARY},
    vk::{self, DeviceV1_0, Handle, HasBuilder, InstanceV1_0, KhrSwapchainExtension},
    Device, Entry,
};
use winit::dpi::PhysicalSize;
use winit::window::Window;

use buffer::Buffer;
use command_buffer::CommandBuffer;
use device::VulkanDevice;
use instance::VulkanInstance;
use swapchain::Swapchain;
use sync::ComputeSync;
use thiserror::Error;

pub mod buffer;
pub mod command_buffer;
pub mod constants;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod pipeline;
pub mod swapchain;
pub mod sync;

#[derive(Debug, Error)]
#[error("command buffer purpose not registered: `{0}`")]
pub struct PurposeNotFound(pub String);

/// Names of the command streams the application will record into. Graphics
/// purposes get one buffer per swapchain image, compute purposes one per
/// frame slot.
#[derive(Clone, Debug, Default)]
pub struct GpuPurposes {
    pub graphics: Vec<String>,
    pub compute: Vec<String>,
}

impl GpuPurposes {
    pub fn new(graphics: &[&str], compute: &[&str]) -> Self {
        Self {
            graphics: graphics.iter().map(|s| s.to_string()).collect(),
            compute: compute.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Composition root for everything GPU-side: device, swapchain,
/// purpose-tagged command buffers and the submission paths.
///
/// A single CPU thread drives both queues; all cross-queue ordering is
/// expressed through the fence/semaphore graph, never implied.
pub struct Gpu {
    _entry: Entry,
    instance: VulkanInstance,
    device: VulkanDevice,
    swapchain: Swapchain,
    graphic_command_buffers: Vec<HashMap<String, CommandBuffer>>,
    compute_command_buffers: Vec<HashMap<String, CommandBuffer>>,
    compute_sync: Option<ComputeSync>,
    purposes: GpuPurposes,
}

impl Gpu {
    pub unsafe fn new(window: &Window, app_name: &str, purposes: GpuPurposes) -> Result<Gpu> {
        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;

        let instance = VulkanInstance::new(window, &entry, app_name)?;
        let device = VulkanDevice::new(&entry, &instance, !purposes.compute.is_empty())?;
        let swapchain = Swapchain::new(&instance, &device, window.inner_size())?;

        let graphic_command_buffers = Gpu::create_command_buffers(
            &device,
            &purposes.graphics,
            swapchain.image_count(),
        )?;
        let compute_command_buffers = Gpu::create_command_buffers(
            &device,
            &purposes.compute,
            constants::BUFFERING_FRAME_NUM,
        )?;

        let compute_sync = if purposes.compute.is_empty() {
            None
        } else {
            Some(ComputeSync::new(
                &device.vk_device,
                constants::BUFFERING_FRAME_NUM,
            )?)
        };

        Ok(Gpu {
            _entry: entry,
            instance,
            device,
            swapchain,
            graphic_command_buffers,
            compute_command_buffers,
            compute_sync,
            purposes,
        })
    }

    unsafe fn create_command_buffers(
        device: &VulkanDevice,
        purposes: &[String],
        count: usize,
    ) -> Result<Vec<HashMap<String, CommandBuffer>>> {
        let family = device.queue_family_indices().graphics_compute;
        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            let mut map = HashMap::new();
            for purpose in purposes {
                map.insert(purpose.clone(), CommandBuffer::new(&device.vk_device, family)?);
            }
            buffers.push(map);
        }
        Ok(buffers)
    }

    pub fn device(&self) -> &Device {
        &self.device.vk_device
    }

    pub fn vulkan_device(&self) -> &VulkanDevice {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.device.max_sample_count()
    }

    /// Whether the format supports linear filtering for blits, required by
    /// mip-chain generation.
    pub unsafe fn supports_linear_blit(&self, format: vk::Format) -> bool {
        let properties = self
            .instance
            .vk_instance
            .get_physical_device_format_properties(self.device.physical_device(), format);
        properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    pub fn compute_sync(&self) -> Option<&ComputeSync> {
        self.compute_sync.as_ref()
    }

    /// Command stream for `purpose`, bound to the acquired swapchain image.
    pub fn graphic_command_buffer(&self, purpose: &str) -> Result<&CommandBuffer> {
        self.graphic_command_buffers[self.swapchain.acquired_image()]
            .get(purpose)
            .ok_or_else(|| anyhow!(PurposeNotFound(purpose.to_string())))
    }

    /// Command stream for `purpose`, bound to the current compute frame slot.
    pub fn compute_command_buffer(&self, purpose: &str) -> Result<&CommandBuffer> {
        let sync = self
            .compute_sync
            .as_ref()
            .ok_or_else(|| anyhow!("no compute purposes were declared"))?;
        self.compute_command_buffers[sync.current_frame()]
            .get(purpose)
            .ok_or_else(|| anyhow!(PurposeNotFound(purpose.to_string())))
    }

    /// Runs the acquire step of the frame protocol: waits for the current
    /// frame slot to retire, then claims the next presentable image.
    pub unsafe fn acquire_frame(&mut self) -> Result<usize> {
        self.swapchain.acquire_next_image(&self.device.vk_device)
    }

    /// Submits transfer work recorded into a "copy"-style buffer and blocks
    /// until the device is idle, so staging buffers referenced by the
    /// submission can be released immediately afterwards.
    pub unsafe fn submit_copy(&self, command_buffer: &CommandBuffer) -> Result<()> {
        let command_buffers = &[command_buffer.handle()];
        let submit_info = vk::SubmitInfo::builder().command_buffers(command_buffers);
        self.device.vk_device.queue_submit(
            self.device.graphics_queue(),
            &[submit_info],
            vk::Fence::null(),
        )?;
        self.device.vk_device.device_wait_idle()?;
        Ok(())
    }

    /// Submits the render stream: waits on image-available plus any auxiliary
    /// semaphores (each with its own stage mask), signals render-finished and
    /// attaches the frame slot's fence.
    pub unsafe fn submit_render(
        &self,
        command_buffer: &CommandBuffer,
        aux_waits: &[(vk::Semaphore, vk::PipelineStageFlags)],
    ) -> Result<()> {
        let mut wait_semaphores = Vec::with_capacity(aux_waits.len() + 1);
        let mut wait_stages = Vec::with_capacity(aux_waits.len() + 1);
        for (semaphore, stage) in aux_waits {
            wait_semaphores.push(*semaphore);
            wait_stages.push(*stage);
        }
        wait_semaphores.push(self.swapchain.image_available_semaphore());
        wait_stages.push(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        let command_buffers = &[command_buffer.handle()];
        let signal_semaphores = &[self.swapchain.render_finished_semaphore()];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        self.swapchain.current_fence().reset(&self.device.vk_device)?;
        self.device.vk_device.queue_submit(
            self.device.graphics_queue(),
            &[submit_info],
            self.swapchain.current_fence().handle(),
        )?;
        Ok(())
    }

    /// Submits the current compute stream, signalling the compute semaphore
    /// for this slot and attaching the compute fence.
    pub unsafe fn submit_compute(&self, command_buffer: &CommandBuffer) -> Result<()> {
        let sync = self
            .compute_sync
            .as_ref()
            .ok_or_else(|| anyhow!("no compute purposes were declared"))?;
        let queue = self
            .device
            .compute_queue()
            .ok_or_else(|| anyhow!("compute queue was not created"))?;

        let command_buffers = &[command_buffer.handle()];
        let signal_semaphores = &[sync.current_semaphore()];
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        sync.reset_current(&self.device.vk_device)?;
        self.device.vk_device.queue_submit(
            queue,
            &[submit_info],
            sync.current_fence().handle(),
        )?;
        Ok(())
    }

    /// Presents the acquired image and rotates the frame slots, including the
    /// compute slot when one exists.
    pub unsafe fn present_frame(&mut self) -> Result<()> {
        let wait_semaphores = &[self.swapchain.render_finished_semaphore()];
        let swapchains = &[self.swapchain.handle()];
        let image_indices = &[self.swapchain.acquired_image() as u32];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        self.device
            .vk_device
            .queue_present_khr(self.device.present_queue(), &present_info)?;

        self.swapchain.advance();
        if let Some(sync) = self.compute_sync.as_mut() {
            sync.advance();
        }
        Ok(())
    }

    /// Tears down and rebuilds the swapchain, its framebuffers, sync objects
    /// and image-bound command buffers for a new surface extent. Returns
    /// false without touching anything while the extent is zero (minimized
    /// window); callers skip the frame and retry.
    pub unsafe fn recreate_swapchain(&mut self, window_size: PhysicalSize<u32>) -> Result<bool> {
        if window_size.width == 0 || window_size.height == 0 {
            return Ok(false);
        }

        info!(
            "Recreating swapchain ({}x{}).",
            window_size.width, window_size.height
        );
        self.device.wait_idle()?;

        for map in &self.graphic_command_buffers {
            for command_buffer in map.values() {
                command_buffer.destroy(&self.device.vk_device);
            }
        }
        self.graphic_command_buffers.clear();
        self.swapchain.destroy(&self.device.vk_device);

        self.swapchain = Swapchain::new(&self.instance, &self.device, window_size)?;
        self.graphic_command_buffers = Gpu::create_command_buffers(
            &self.device,
            &self.purposes.graphics,
            self.swapchain.image_count(),
        )?;
        Ok(true)
    }

    pub unsafe fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    /// Destroys staging buffers once the work using them has completed.
    pub unsafe fn release_staging_buffers(&self, staging_buffers: &mut Vec<Buffer>) {
        for buffer in staging_buffers.drain(..) {
            buffer.destroy(&self.device.vk_device);
        }
    }

    pub unsafe fn destroy(&mut self) {
        if let Some(sync) = self.compute_sync.as_mut() {
            sync.destroy(&self.device.vk_device);
        }
        for map in self
            .graphic_command_buffers
            .iter()
            .chain(self.compute_command_buffers.iter())
        {
            for command_buffer in map.values() {
                command_buffer.destroy(&self.device.vk_device);
            }
        }
        self.graphic_command_buffers.clear();
        self.compute_command_buffers.clear();
        self.swapchain.destroy(&self.device.vk_device);
        self.device.destroy();
        self.instance.destroy();
    }
}
