use vulkanalia::{vk, Version};

/// Number of frames the CPU may prepare while the GPU is still working on
/// earlier ones. Raising it trades latency for throughput; the frame
/// protocol does not change.
pub const BUFFERING_FRAME_NUM: usize = 2;

pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);
pub const VALIDATION_ENABLED: bool = cfg!(debug_assertions);
pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");
pub const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];
