use anyhow::Result;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::Device;

/// CPU-observable completion signal for submitted GPU work.
#[derive(Debug)]
pub struct Fence {
    fence: vk::Fence,
}

impl Fence {
    pub unsafe fn new(device: &Device, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(Self {
            fence: device.create_fence(&info, None)?,
        })
    }

    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    pub unsafe fn wait(&self, device: &Device) -> Result<()> {
        device.wait_for_fences(&[self.fence], true, u64::MAX)?;
        Ok(())
    }

    pub unsafe fn reset(&self, device: &Device) -> Result<()> {
        device.reset_fences(&[self.fence])?;
        Ok(())
    }

    pub unsafe fn destroy(&self, device: &Device) {
        device.destroy_fence(self.fence, None);
    }
}

/// Fence/semaphore pair per frame slot for compute submissions, rotating
/// independently of the swapchain's own sync objects.
#[derive(Debug)]
pub struct ComputeSync {
    fences: Vec<Fence>,
    semaphores: Vec<vk::Semaphore>,
    current_frame: usize,
}

impl ComputeSync {
    pub unsafe fn new(device: &Device, buffering_num: usize) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();

        let mut fences = Vec::with_capacity(buffering_num);
        let mut semaphores = Vec::with_capacity(buffering_num);
        for _ in 0..buffering_num {
            fences.push(Fence::new(device, true)?);
            semaphores.push(device.create_semaphore(&semaphore_info, None)?);
        }

        Ok(Self {
            fences,
            semaphores,
            current_frame: 0,
        })
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn current_fence(&self) -> &Fence {
        &self.fences[self.current_frame]
    }

    pub fn current_semaphore(&self) -> vk::Semaphore {
        self.semaphores[self.current_frame]
    }

    pub unsafe fn wait_current(&self, device: &Device) -> Result<()> {
        self.fences[self.current_frame].wait(device)
    }

    pub unsafe fn reset_current(&self, device: &Device) -> Result<()> {
        self.fences[self.current_frame].reset(device)
    }

    pub fn advance(&mut self) {
        self.current_frame = next_frame(self.current_frame, self.fences.len());
    }

    pub unsafe fn destroy(&mut self, device: &Device) {
        for fence in &self.fences {
            fence.destroy(device);
        }
        for semaphore in &self.semaphores {
            device.destroy_semaphore(*semaphore, None);
        }
        self.fences.clear();
        self.semaphores.clear();
    }
}

/// Advances a rotating frame-slot index.
pub fn next_frame(current: usize, buffering_num: usize) -> usize {
    (current + 1) % buffering_num
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rotation_wraps() {
        assert_eq!(next_frame(0, 2), 1);
        assert_eq!(next_frame(1, 2), 0);
        assert_eq!(next_frame(2, 3), 0);
    }

    #[test]
    fn frame_rotation_after_k_cycles() {
        for buffering_num in 1..=4 {
            let mut frame = 0;
            for k in 1..=10 {
                frame = next_frame(frame, buffering_num);
                assert_eq!(frame, k % buffering_num);
            }
        }
    }
}
