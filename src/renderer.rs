// =============================================================================
// RENDERER - all GPU state for one window
// =============================================================================
//
// OWNERSHIP:
// ┌─────────────────────────────────────────────────────────────────┐
// │  VulkanInstance                                                 │
// │    ├── Surface                                                  │
// │    └── VulkanDevice                                             │
// │          ├── RenderPass ── GraphicsPipeline                     │
// │          ├── Swapchain (images, views, framebuffers)            │
// │          ├── GpuBuffer (vertex, index)                          │
// │          ├── CommandContext (pool, frame command buffer)        │
// │          └── FrameSync (fence, two semaphores)                  │
// └─────────────────────────────────────────────────────────────────┘
//
// Field order below is drop order: leaves first, instance last.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

use crate::backend::buffer::{BufferUsage, GpuBuffer};
use crate::backend::commands::CommandContext;
use crate::backend::pipeline::{GraphicsPipeline, RenderPass, VertexLayout};
use crate::backend::selector::select_adapter;
use crate::backend::shader::ShaderModule;
use crate::backend::swapchain::SwapchainPlan;
use crate::backend::sync::FrameSync;
use crate::backend::{Surface, Swapchain, VulkanDevice, VulkanInstance};
use crate::config::Config;
use crate::frame_loop::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::recorder::{record_frame, DrawCall, FramePass};
use crate::scene::{Placement, SceneDesc, VertexInput};

pub struct Renderer {
    frame_sync: FrameSync,
    commands: CommandContext,
    index_buffer: Option<GpuBuffer>,
    vertex_buffer: Option<GpuBuffer>,
    pipeline: GraphicsPipeline,
    swapchain: Swapchain,
    render_pass: RenderPass,
    surface: Surface,
    device: Arc<VulkanDevice>,

    /// Indices when an index buffer is bound, vertices otherwise
    draw_count: u32,
    clear_color: [f32; 4],
    acquire_timeout_ns: u64,
    fence_timeout_ns: u64,
    window_extent: vk::Extent2D,
}

impl Renderer {
    /// Build everything needed to draw `scene` into `window`.
    ///
    /// Any failure here is fatal; whatever was created so far is released
    /// in reverse order as the partially built values drop.
    pub fn new<W>(config: &Config, window: &W, window_extent: vk::Extent2D, scene: &SceneDesc) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        log::info!("Initializing Vulkan...");

        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        // Validation layers only in debug builds
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let instance = VulkanInstance::new(&config.window.title, enable_validation, Some(display))?;
        let surface = Surface::new(instance.clone(), window)?;

        let adapter = select_adapter(&instance, Some(&surface))?;
        let device = VulkanDevice::new(instance, adapter)?;

        // The render pass is created against the format the swapchain will use
        let preferred_mode = config.present_mode();
        let plan = SwapchainPlan::query(&device, &surface, preferred_mode, window_extent)?;
        let render_pass = RenderPass::new(device.clone(), plan.surface_format.format)?;

        let swapchain = Swapchain::new(
            device.clone(),
            &surface,
            render_pass.render_pass,
            render_pass.format,
            preferred_mode,
            window_extent,
        )?;

        let pipeline = {
            let directory = &config.shaders.directory;
            let vertex_shader = ShaderModule::load(device.clone(), &directory.join(scene.vertex_shader))?;
            let fragment_shader =
                ShaderModule::load(device.clone(), &directory.join(scene.fragment_shader))?;

            GraphicsPipeline::new(
                device.clone(),
                &render_pass,
                &vertex_shader,
                &fragment_shader,
                &VertexLayout::for_input(scene.input),
            )?
        };

        let commands = CommandContext::new(device.clone())?;

        let upload = |usage: BufferUsage, bytes: &[u8]| match scene.placement {
            Placement::HostVisible => GpuBuffer::upload(device.clone(), usage, bytes),
            Placement::DeviceLocal => GpuBuffer::upload_staged(
                device.clone(),
                &commands,
                usage,
                bytes,
                config.graphics.fence_timeout_ns,
            ),
        };

        let vertex_buffer = match scene.input {
            VertexInput::None => None,
            VertexInput::PositionColor => Some(
                upload(BufferUsage::Vertex, scene.vertex_bytes()).context("Failed to upload vertices")?,
            ),
        };
        let index_buffer = scene
            .index_bytes()
            .map(|bytes| upload(BufferUsage::Index, bytes))
            .transpose()
            .context("Failed to upload indices")?;

        let draw_count = scene.index_count().unwrap_or_else(|| scene.vertex_count());

        let frame_sync = FrameSync::new(device.clone())?;

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            frame_sync,
            commands,
            index_buffer,
            vertex_buffer,
            pipeline,
            swapchain,
            render_pass,
            surface,
            device,
            draw_count,
            clear_color: config.graphics.clear_color,
            acquire_timeout_ns: config.graphics.acquire_timeout_ns,
            fence_timeout_ns: config.graphics.fence_timeout_ns,
            window_extent,
        })
    }

    /// Window size used when the surface leaves the extent to the swapchain
    pub fn set_window_extent(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };
    }

    fn frame_pass(&self, image_index: u32) -> Result<FramePass> {
        let draw = match &self.index_buffer {
            Some(indices) => DrawCall::Indexed {
                index_buffer: indices.buffer,
                index_type: vk::IndexType::UINT16,
                count: self.draw_count,
            },
            None => DrawCall::Vertices {
                count: self.draw_count,
            },
        };

        Ok(FramePass {
            render_pass: self.render_pass.render_pass,
            framebuffer: self.swapchain.framebuffer(image_index)?,
            extent: self.swapchain.extent,
            pipeline: self.pipeline.pipeline,
            vertex_buffer: self.vertex_buffer.as_ref().map(|b| b.buffer),
            draw,
            clear_color: self.clear_color,
        })
    }
}

impl FrameBackend for Renderer {
    fn wait_for_frame(&mut self) -> Result<()> {
        Ok(self.frame_sync.wait(self.fence_timeout_ns)?)
    }

    fn acquire_image(&mut self) -> Result<AcquireOutcome> {
        Ok(self
            .swapchain
            .acquire_next_image(self.acquire_timeout_ns, self.frame_sync.image_available)?)
    }

    fn reset_frame_fence(&mut self) -> Result<()> {
        Ok(self.frame_sync.reset()?)
    }

    fn record_commands(&mut self, image_index: u32) -> Result<()> {
        let pass = self.frame_pass(image_index)?;
        record_frame(&mut self.commands.encoder(), &pass)
    }

    fn submit(&mut self) -> Result<()> {
        let wait_semaphores = [self.frame_sync.image_available];
        // Only the color write has to wait for the image; vertex work may start early
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.commands.frame_buffer];
        let signal_semaphores = [self.frame_sync.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                self.frame_sync.frame_complete,
            )
        }
        .context("Failed to submit frame")
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        Ok(self.swapchain.present(
            self.device.graphics_queue,
            image_index,
            self.frame_sync.render_finished,
        )?)
    }

    fn release_acquired_image(&mut self) -> Result<()> {
        Ok(self
            .frame_sync
            .consume_image_available(self.device.graphics_queue)?)
    }

    fn recreate_swapchain(&mut self) -> Result<bool> {
        // Nothing may still reference the old images
        self.device.wait_idle()?;

        self.swapchain
            .recreate(&self.surface, self.render_pass.render_pass, self.window_extent)
    }

    fn drain(&mut self) -> Result<()> {
        self.device.wait_queue_idle()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("Failed to drain device before teardown: {:#}", e);
        }
    }
}
