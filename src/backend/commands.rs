// Command pool, the per-frame command buffer, and one-shot submissions
//
// The frame command buffer is reset and re-recorded every frame; the fence in
// `FrameSync` guarantees its previous execution has finished by then.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::GpuError;
use crate::recorder::CommandEncoder;

pub struct CommandContext {
    pub pool: vk::CommandPool,
    pub frame_buffer: vk::CommandBuffer,
    device: Arc<VulkanDevice>,
}

impl CommandContext {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_family())
            // RESET: the frame buffer is reset individually every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let mut context = Self {
            pool,
            frame_buffer: vk::CommandBuffer::null(),
            device,
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        context.frame_buffer = unsafe { context.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffer")?[0];

        Ok(context)
    }

    /// Encoder writing into the frame command buffer
    pub fn encoder(&self) -> VkEncoder<'_> {
        VkEncoder {
            device: &self.device.device,
            cmd: self.frame_buffer,
        }
    }

    /// Record with `record`, submit, and block until the GPU has executed it
    pub fn submit_one_time<F>(&self, timeout_ns: u64, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate transfer command buffer")?[0];

        let fence = match unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.free_command_buffers(self.pool, &[cmd]) };
                return Err(e).context("Failed to create transfer fence");
            }
        };

        let result = (|| -> Result<()> {
            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::default()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                device.begin_command_buffer(cmd, &begin_info)?;
                record(device, cmd);
                device.end_command_buffer(cmd)?;

                let command_buffers = [cmd];
                let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
                device
                    .queue_submit(self.device.graphics_queue, &[submit_info], fence)
                    .context("Failed to submit transfer")?;

                match device.wait_for_fences(&[fence], true, timeout_ns) {
                    Ok(()) => Ok(()),
                    Err(vk::Result::TIMEOUT) => Err(GpuError::FenceTimeout { timeout_ns }.into()),
                    Err(e) => Err(e).context("Failed to wait for transfer"),
                }
            }
        })();

        if result.is_err() {
            // a timed-out copy may still reference the buffers; drain before releasing
            if let Err(e) = self.device.wait_queue_idle() {
                log::error!("Failed to drain queue after failed transfer: {:#}", e);
            }
        }

        unsafe {
            device.destroy_fence(fence, None);
            device.free_command_buffers(self.pool, &[cmd]);
        }

        result
    }
}

impl Drop for CommandContext {
    fn drop(&mut self) {
        unsafe {
            // also frees the frame command buffer
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}

/// `CommandEncoder` over a Vulkan command buffer
pub struct VkEncoder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl CommandEncoder for VkEncoder<'_> {
    fn begin(&mut self) -> Result<()> {
        unsafe {
            self.device
                .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
            self.device
                .begin_command_buffer(self.cmd, &vk::CommandBufferBeginInfo::default())
                .context("Failed to begin command buffer")
        }
    }

    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(self.cmd, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device.cmd_set_viewport(self.cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(self.cmd, 0, &[scissor]);
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.cmd, 0, &[buffer], &[0]);
        }
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer, index_type: vk::IndexType) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.cmd, buffer, 0, index_type);
        }
    }

    fn draw(&mut self, vertex_count: u32) {
        unsafe {
            self.device.cmd_draw(self.cmd, vertex_count, 1, 0, 0);
        }
    }

    fn draw_indexed(&mut self, index_count: u32) {
        unsafe {
            self.device.cmd_draw_indexed(self.cmd, index_count, 1, 0, 0, 0);
        }
    }

    fn end_render_pass(&mut self) {
        unsafe {
            self.device.cmd_end_render_pass(self.cmd);
        }
    }

    fn end(&mut self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.cmd) }.context("Failed to end command buffer")
    }
}
