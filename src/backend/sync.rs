// Synchronization primitives
//
// Fence: CPU<->GPU, gates reuse of the command buffer.
// Semaphores: GPU<->GPU, order acquire -> render -> present. Never waited on
// by the CPU.

use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::GpuError;

/// Synchronization for the single frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub frame_complete: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self, GpuError> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            frame_complete: vk::Fence::null(),
            device,
        };

        // fields are filled one by one so Drop releases whatever was created
        unsafe {
            let device = &sync.device.device;
            sync.image_available = device
                .create_semaphore(&semaphore_info, None)
                .map_err(GpuError::vulkan("Failed to create semaphore"))?;
            sync.render_finished = device
                .create_semaphore(&semaphore_info, None)
                .map_err(GpuError::vulkan("Failed to create semaphore"))?;
            sync.frame_complete = device
                .create_fence(&fence_info, None)
                .map_err(GpuError::vulkan("Failed to create fence"))?;
        }

        Ok(sync)
    }

    /// Block until the frame's previous submission completed
    pub fn wait(&self, timeout_ns: u64) -> Result<(), GpuError> {
        let result = unsafe {
            self.device
                .device
                .wait_for_fences(&[self.frame_complete], true, timeout_ns)
        };
        match result {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GpuError::FenceTimeout { timeout_ns }),
            Err(e) => Err(GpuError::vulkan("Failed to wait for frame fence")(e)),
        }
    }

    pub fn reset(&self) -> Result<(), GpuError> {
        unsafe { self.device.device.reset_fences(&[self.frame_complete]) }
            .map_err(GpuError::vulkan("Failed to reset frame fence"))
    }

    /// Wait out a signal on the image-available semaphore that no frame
    /// submission will consume (the acquisition was abandoned).
    ///
    /// Submits an empty batch waiting on it and blocks until the queue is idle,
    /// leaving the semaphore unsignalled for the next acquisition.
    pub fn consume_image_available(&self, queue: vk::Queue) -> Result<(), GpuError> {
        let wait_semaphores = [self.image_available];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);

        unsafe {
            let device = &self.device.device;
            device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .map_err(GpuError::vulkan("Failed to submit semaphore wait"))?;
            device
                .queue_wait_idle(queue)
                .map_err(GpuError::vulkan("Failed to wait for semaphore wait"))
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_fence(self.frame_complete, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_semaphore(self.image_available, None);
        }
    }
}
