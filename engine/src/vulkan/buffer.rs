use anyhow::Result;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::Device;

use super::device::VulkanDevice;

/// Device memory plus the buffer handle bound to it.
///
/// The three constructors cover the buffer roles the engine needs:
/// device-local buffers fed through the staging path, host-visible uniform
/// buffers rewritten every frame, and short-lived staging buffers that only
/// exist until the submission copying out of them has completed.
#[derive(Debug)]
pub struct Buffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl Buffer {
    pub unsafe fn new(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = device.vk_device.create_buffer(&buffer_info, None)?;

        let requirements = device.vk_device.get_buffer_memory_requirements(buffer);
        let memory_type_index =
            device.find_memory_type(requirements.memory_type_bits, properties)?;
        let allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = device.vk_device.allocate_memory(&allocate_info, None)?;

        device.vk_device.bind_buffer_memory(buffer, memory, 0)?;

        Ok(Self {
            buffer,
            memory,
            size,
        })
    }

    /// Device-local buffer reachable only through a staging copy.
    pub unsafe fn device_local(
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        Self::new(
            device,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
    }

    /// Host-visible uniform buffer, mapped and rewritten per frame slot.
    pub unsafe fn uniform(device: &VulkanDevice, size: vk::DeviceSize) -> Result<Self> {
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Host-visible scratch buffer used to transit CPU data to the device.
    pub unsafe fn staging(device: &VulkanDevice, size: vk::DeviceSize) -> Result<Self> {
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Staging buffer readable by the CPU, used for screen captures.
    pub unsafe fn readback(device: &VulkanDevice, size: vk::DeviceSize) -> Result<Self> {
        Self::new(
            device,
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub unsafe fn map(&self, device: &Device) -> Result<*mut std::ffi::c_void> {
        Ok(device.map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())?)
    }

    pub unsafe fn unmap(&self, device: &Device) {
        device.unmap_memory(self.memory);
    }

    /// Maps, memcopies `data` in and unmaps again.
    pub unsafe fn write<T: bytemuck::Pod>(&self, device: &Device, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mapped = self.map(device)?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.cast(), bytes.len());
        self.unmap(device);
        Ok(())
    }

    /// Maps and copies the buffer contents out, for readback buffers.
    pub unsafe fn read_bytes(&self, device: &Device) -> Result<Vec<u8>> {
        let mapped = self.map(device)?;
        let mut bytes = vec![0u8; self.size as usize];
        std::ptr::copy_nonoverlapping(mapped.cast::<u8>(), bytes.as_mut_ptr(), bytes.len());
        self.unmap(device);
        Ok(bytes)
    }

    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}
