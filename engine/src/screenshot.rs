use anyhow::{anyhow, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use vulkanalia::prelude::v1_0::*;

use crate::vulkan::buffer::Buffer;
use crate::vulkan::Gpu;

/// Copies the presentable image of the current frame into a readback buffer
/// and writes it out as a timestamped PNG. The image is transitioned to a
/// transfer source and back around the copy; the submission is synchronous,
/// so the staging memory can be read and released immediately.
pub unsafe fn capture(gpu: &Gpu, out_dir: &Path) -> Result<PathBuf> {
    let device = gpu.device();
    let swapchain = gpu.swapchain();
    let extent = swapchain.extent();
    let image = swapchain.acquired_image_handle();

    let buffer_size = u64::from(extent.width) * u64::from(extent.height) * 4;
    let readback = Buffer::readback(gpu.vulkan_device(), buffer_size)?;

    let copy_command_buffer = gpu.graphic_command_buffer("copy")?;
    copy_command_buffer.reset(device)?;
    copy_command_buffer.begin(device)?;
    copy_command_buffer.transition_image_layout(
        device,
        image,
        vk::ImageLayout::PRESENT_SRC_KHR,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        1,
    )?;
    copy_command_buffer.copy_image_to_buffer(device, image, extent, &readback);
    copy_command_buffer.transition_image_layout(
        device,
        image,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
        1,
    )?;
    copy_command_buffer.end(device)?;
    gpu.submit_copy(copy_command_buffer)?;

    let mut pixels = readback.read_bytes(device)?;
    readback.destroy(device);

    if is_bgra(swapchain.format()) {
        swap_red_blue(&mut pixels);
    }

    std::fs::create_dir_all(out_dir)?;
    let timestamp = Local::now().format("%Y_%m%d_%H%M%S");
    let path = out_dir.join(format!("screenshot_{timestamp}.png"));

    let encoded = image::RgbaImage::from_raw(extent.width, extent.height, pixels)
        .ok_or_else(|| anyhow!("captured pixel buffer has the wrong size"))?;
    encoded.save(&path)?;
    Ok(path)
}

fn is_bgra(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::B8G8R8A8_SRGB | vk::Format::B8G8R8A8_UNORM
    )
}

/// Converts BGRA byte order to the RGBA order the PNG encoder expects.
fn swap_red_blue(pixels: &mut [u8]) {
    for pixel in pixels.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn red_blue_swap() {
        let mut pixels = vec![1, 2, 3, 4, 10, 20, 30, 40];
        swap_red_blue(&mut pixels);
        assert_eq!(pixels, vec![3, 2, 1, 4, 30, 20, 10, 40]);
    }

    #[test]
    fn bgra_formats_detected() {
        assert!(is_bgra(vk::Format::B8G8R8A8_SRGB));
        assert!(!is_bgra(vk::Format::R8G8B8A8_SRGB));
    }
}
