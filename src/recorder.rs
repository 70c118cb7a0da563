// Command recording for one frame
//
// Order is fixed: begin -> begin render pass -> bind pipeline -> viewport and
// scissor -> bind buffers -> draw -> end render pass -> end. Viewport and
// scissor always use the extent the bound framebuffer was created with.

use anyhow::Result;
use ash::vk;

/// The recording surface `record_frame` writes to
pub trait CommandEncoder {
    fn begin(&mut self) -> Result<()>;
    fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);
    fn set_viewport_and_scissor(&mut self, extent: vk::Extent2D);
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);
    fn bind_index_buffer(&mut self, buffer: vk::Buffer, index_type: vk::IndexType);
    fn draw(&mut self, vertex_count: u32);
    fn draw_indexed(&mut self, index_count: u32);
    fn end_render_pass(&mut self);
    fn end(&mut self) -> Result<()>;
}

/// How the geometry is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCall {
    Vertices {
        count: u32,
    },
    Indexed {
        index_buffer: vk::Buffer,
        index_type: vk::IndexType,
        count: u32,
    },
}

/// Everything needed to record one frame into one swapchain image
#[derive(Debug, Clone, Copy)]
pub struct FramePass {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub vertex_buffer: Option<vk::Buffer>,
    pub draw: DrawCall,
    pub clear_color: [f32; 4],
}

pub fn record_frame<E: CommandEncoder>(encoder: &mut E, pass: &FramePass) -> Result<()> {
    encoder.begin()?;

    encoder.begin_render_pass(pass.render_pass, pass.framebuffer, pass.extent, pass.clear_color);
    encoder.bind_pipeline(pass.pipeline);
    encoder.set_viewport_and_scissor(pass.extent);

    if let Some(buffer) = pass.vertex_buffer {
        encoder.bind_vertex_buffer(buffer);
    }

    match pass.draw {
        DrawCall::Vertices { count } => encoder.draw(count),
        DrawCall::Indexed {
            index_buffer,
            index_type,
            count,
        } => {
            encoder.bind_index_buffer(index_buffer, index_type);
            encoder.draw_indexed(count);
        }
    }

    encoder.end_render_pass();
    encoder.end()
}
