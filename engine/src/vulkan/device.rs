use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashSet;
use thiserror::Error;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSurfaceExtension;
use vulkanalia::{Device, Entry, Instance};

use super::constants;
use super::instance::VulkanInstance;

#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

/// Physical + logical device and the queues pulled out of it.
///
/// Selection is a hard precondition: if no physical device offers a combined
/// graphics/compute family, a present-capable family, the required extensions,
/// usable surface formats and sampler anisotropy, construction fails and the
/// engine cannot start.
#[derive(Debug)]
pub struct VulkanDevice {
    pub vk_device: Device,
    physical_device: vk::PhysicalDevice,
    indices: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    compute_queue: Option<vk::Queue>,
    memory: vk::PhysicalDeviceMemoryProperties,
    properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    unsafe fn pick_physical_device(
        instance: &VulkanInstance,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        for physical_device in instance.vk_instance.enumerate_physical_devices()? {
            let properties = instance
                .vk_instance
                .get_physical_device_properties(physical_device);

            match VulkanDevice::check_physical_device(instance, physical_device) {
                Err(error) => warn!(
                    "Skipping physical device (`{}`): {}",
                    properties.device_name, error
                ),
                Ok(indices) => {
                    info!("Selected physical device (`{}`).", properties.device_name);
                    return Ok((physical_device, indices));
                }
            }
        }
        Err(anyhow!("Failed to find suitable physical device."))
    }

    unsafe fn check_physical_device(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<QueueFamilyIndices> {
        let indices = QueueFamilyIndices::get(instance, physical_device)?;

        let extensions = instance
            .vk_instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect::<HashSet<_>>();
        if !constants::DEVICE_EXTENSIONS
            .iter()
            .all(|e| extensions.contains(e))
        {
            return Err(anyhow!(SuitabilityError(
                "required device extensions support"
            )));
        }

        let support = SwapchainSupport::get(instance, physical_device)?;
        if support.formats.is_empty() || support.present_modes.is_empty() {
            return Err(anyhow!(SuitabilityError("swapchain support")));
        }

        let features = instance
            .vk_instance
            .get_physical_device_features(physical_device);
        if features.sampler_anisotropy != vk::TRUE {
            return Err(anyhow!(SuitabilityError("sampler anisotropy")));
        }

        Ok(indices)
    }

    /// Builds the logical device. A compute queue is pulled out only when the
    /// caller declared compute workloads.
    pub unsafe fn new(
        entry: &Entry,
        instance: &VulkanInstance,
        with_compute: bool,
    ) -> Result<VulkanDevice> {
        let (physical_device, indices) = VulkanDevice::pick_physical_device(instance)?;

        let mut unique_families = HashSet::new();
        unique_families.insert(indices.graphics_compute);
        unique_families.insert(indices.present);

        let queue_priorities = &[1.0];
        let queue_infos = unique_families
            .iter()
            .map(|i| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*i)
                    .queue_priorities(queue_priorities)
                    .build()
            })
            .collect::<Vec<_>>();

        let layers = if constants::VALIDATION_ENABLED {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let mut extensions = constants::DEVICE_EXTENSIONS
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        if cfg!(target_os = "macos") && entry.version()? >= constants::PORTABILITY_MACOS_VERSION {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .fill_mode_non_solid(true)
            .full_draw_index_uint32(true);

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance
            .vk_instance
            .create_device(physical_device, &info, None)?;

        let graphics_queue = device.get_device_queue(indices.graphics_compute, 0);
        let present_queue = device.get_device_queue(indices.present, 0);
        let compute_queue = if with_compute {
            Some(device.get_device_queue(indices.graphics_compute, 0))
        } else {
            None
        };

        let memory = instance
            .vk_instance
            .get_physical_device_memory_properties(physical_device);
        let properties = instance
            .vk_instance
            .get_physical_device_properties(physical_device);

        Ok(VulkanDevice {
            vk_device: device,
            physical_device,
            indices,
            graphics_queue,
            present_queue,
            compute_queue,
            memory,
            properties,
        })
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        self.indices
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.compute_queue
    }

    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }

    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        find_memory_type(&self.memory, type_filter, properties)
    }

    pub unsafe fn find_supported_format(
        &self,
        instance: &Instance,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        candidates
            .iter()
            .cloned()
            .find(|f| {
                let properties =
                    instance.get_physical_device_format_properties(self.physical_device, *f);
                match tiling {
                    vk::ImageTiling::LINEAR => {
                        properties.linear_tiling_features.contains(features)
                    }
                    vk::ImageTiling::OPTIMAL => {
                        properties.optimal_tiling_features.contains(features)
                    }
                    _ => false,
                }
            })
            .ok_or_else(|| anyhow!("Failed to find supported format."))
    }

    pub unsafe fn find_depth_format(&self, instance: &Instance) -> Result<vk::Format> {
        self.find_supported_format(
            instance,
            &[
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT,
            ],
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    pub fn max_sample_count(&self) -> vk::SampleCountFlags {
        let counts = self.properties.limits.framebuffer_color_sample_counts
            & self.properties.limits.framebuffer_depth_sample_counts;
        [
            vk::SampleCountFlags::_64,
            vk::SampleCountFlags::_32,
            vk::SampleCountFlags::_16,
            vk::SampleCountFlags::_8,
            vk::SampleCountFlags::_4,
            vk::SampleCountFlags::_2,
        ]
        .iter()
        .cloned()
        .find(|c| counts.contains(*c))
        .unwrap_or(vk::SampleCountFlags::_1)
    }

    pub unsafe fn wait_idle(&self) -> Result<()> {
        self.vk_device.device_wait_idle()?;
        Ok(())
    }

    pub unsafe fn destroy(&mut self) {
        self.vk_device.destroy_device(None);
    }
}

pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory.memory_type_count)
        .find(|i| {
            (type_filter & (1 << i)) != 0
                && memory.memory_types[*i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or_else(|| anyhow!("Failed to find suitable memory type."))
}

#[derive(Copy, Clone, Debug)]
pub struct QueueFamilyIndices {
    pub graphics_compute: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub unsafe fn get(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance
            .vk_instance
            .get_physical_device_queue_family_properties(physical_device);

        let graphics_compute = properties
            .iter()
            .position(|p| {
                p.queue_flags
                    .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
            })
            .map(|i| i as u32);

        let mut present = None;
        for (index, _) in properties.iter().enumerate() {
            if instance.vk_instance.get_physical_device_surface_support_khr(
                physical_device,
                index as u32,
                instance.surface(),
            )? {
                present = Some(index as u32);
                break;
            }
        }

        if let (Some(graphics_compute), Some(present)) = (graphics_compute, present) {
            Ok(Self {
                graphics_compute,
                present,
            })
        } else {
            Err(anyhow!(SuitabilityError(
                "required queue families (graphics+compute, present)"
            )))
        }
    }

    pub fn is_equal_families(&self) -> bool {
        self.graphics_compute == self.present
    }
}

#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        Ok(Self {
            capabilities: instance
                .vk_instance
                .get_physical_device_surface_capabilities_khr(
                    physical_device,
                    instance.surface(),
                )?,
            formats: instance
                .vk_instance
                .get_physical_device_surface_formats_khr(physical_device, instance.surface())?,
            present_modes: instance
                .vk_instance
                .get_physical_device_surface_present_modes_khr(
                    physical_device,
                    instance.surface(),
                )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties::default();
        memory.memory_type_count = flags.len() as u32;
        for (i, f) in flags.iter().enumerate() {
            memory.memory_types[i].property_flags = *f;
        }
        memory
    }

    #[test]
    fn memory_type_respects_filter_and_flags() {
        let memory = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        let index = find_memory_type(
            &memory,
            0b11,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        assert_eq!(index, 1);

        // Type 1 matches the flags but is masked out by the filter.
        let masked = find_memory_type(
            &memory,
            0b01,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        );
        assert!(masked.is_err());
    }

    #[test]
    fn memory_type_fails_when_nothing_matches() {
        let memory = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&memory, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).is_err());
    }
}
