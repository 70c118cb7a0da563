// Swapchain - Window presentation
//
// Owns the chain of presentable images plus one view and one framebuffer per
// image. On invalidation the whole cluster is torn down (framebuffers, then
// views, then the swapchain) and rebuilt from freshly queried surface state;
// it is never patched. Callers always go through the accessors, so nothing
// holds a handle across a rebuild.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::{Surface, VulkanDevice};
use crate::error::GpuError;
use crate::frame_loop::{AcquireOutcome, PresentOutcome, StaleReason};

/// Choose surface format (prefer SRGB, otherwise whatever comes first)
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// Preferred mode if offered, otherwise FIFO (always supported)
pub fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if present_modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// One more than the driver minimum, within the driver maximum (0 = unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && count > caps.max_image_count {
        caps.max_image_count
    } else {
        count
    }
}

/// The surface's extent, or the window size clamped to limits when the
/// surface leaves it to the swapchain
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window.width.clamp(
                caps.min_image_extent.width,
                caps.max_image_extent.width,
            ),
            height: window.height.clamp(
                caps.min_image_extent.height,
                caps.max_image_extent.height,
            ),
        }
    }
}

/// Everything a swapchain build decides up front
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    pub fn choose(
        caps: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        present_modes: &[vk::PresentModeKHR],
        preferred_mode: vk::PresentModeKHR,
        window: vk::Extent2D,
    ) -> Result<Self> {
        let surface_format = choose_surface_format(formats).context("No suitable surface format")?;

        Ok(Self {
            image_count: choose_image_count(caps),
            extent: choose_extent(caps, window),
            surface_format,
            present_mode: choose_present_mode(present_modes, preferred_mode),
            pre_transform: caps.current_transform,
        })
    }

    /// Query the surface right now and decide
    pub fn query(
        device: &VulkanDevice,
        surface: &Surface,
        preferred_mode: vk::PresentModeKHR,
        window: vk::Extent2D,
    ) -> Result<Self> {
        let physical_device = device.adapter.physical_device;
        let caps = surface.capabilities(physical_device)?;
        let formats = surface.formats(physical_device)?;
        let present_modes = surface.present_modes(physical_device)?;

        Self::choose(&caps, &formats, &present_modes, preferred_mode, window)
    }

    /// A zero-sized surface (minimised window) cannot back a swapchain
    pub fn is_drawable(&self) -> bool {
        self.extent.width > 0 && self.extent.height > 0
    }
}

/// Classify the result of an acquisition
pub fn classify_acquire(result: ash::prelude::VkResult<(u32, bool)>) -> Result<AcquireOutcome, GpuError> {
    match result {
        Ok((_, true)) => Ok(AcquireOutcome::Stale(StaleReason::Suboptimal)),
        Ok((index, false)) => Ok(AcquireOutcome::Image(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale(StaleReason::OutOfDate)),
        Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
            Ok(AcquireOutcome::Stale(StaleReason::Timeout))
        }
        Err(e) => Err(GpuError::vulkan("Failed to acquire swapchain image")(e)),
    }
}

/// Classify the result of a presentation
pub fn classify_present(result: ash::prelude::VkResult<bool>) -> Result<PresentOutcome, GpuError> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) => Ok(PresentOutcome::Stale(StaleReason::Suboptimal)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale(StaleReason::OutOfDate)),
        Err(e) => Err(GpuError::vulkan("Failed to present swapchain image")(e)),
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    preferred_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    /// Create the swapchain cluster for `render_pass`.
    ///
    /// `window` is only used when the surface does not dictate an extent.
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        render_pass: vk::RenderPass,
        render_pass_format: vk::Format,
        preferred_mode: vk::PresentModeKHR,
        window: vk::Extent2D,
    ) -> Result<Self> {
        let loader = ash::khr::swapchain::Device::new(&device.instance.instance, &device.device);

        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            loader,
            images: Vec::new(),
            image_views: Vec::new(),
            framebuffers: Vec::new(),
            format: render_pass_format,
            extent: vk::Extent2D::default(),
            preferred_mode,
            device,
        };

        let plan = SwapchainPlan::query(&swapchain.device, surface, preferred_mode, window)?;
        swapchain.build(surface, render_pass, &plan)?;
        Ok(swapchain)
    }

    /// Tear down and rebuild against the surface's current state.
    ///
    /// Returns `false` and leaves the old chain alone while the surface has no
    /// area. The caller must ensure the GPU no longer uses the old images.
    pub fn recreate(
        &mut self,
        surface: &Surface,
        render_pass: vk::RenderPass,
        window: vk::Extent2D,
    ) -> Result<bool> {
        let plan = SwapchainPlan::query(&self.device, surface, self.preferred_mode, window)?;
        if !plan.is_drawable() {
            log::debug!("Surface has zero extent, postponing swapchain rebuild");
            return Ok(false);
        }

        self.destroy();
        self.build(surface, render_pass, &plan)?;
        Ok(true)
    }

    fn build(
        &mut self,
        surface: &Surface,
        render_pass: vk::RenderPass,
        plan: &SwapchainPlan,
    ) -> Result<()> {
        if plan.surface_format.format != self.format {
            return Err(GpuError::SurfaceFormatChanged {
                expected: self.format,
                found: plan.surface_format.format,
            }
            .into());
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        self.swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;
        self.extent = plan.extent;

        self.images = unsafe { self.loader.get_swapchain_images(self.swapchain) }
            .context("Failed to get swapchain images")?;

        // Views and framebuffers are pushed as they are created so a failure
        // part-way leaves only valid handles for destroy()
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            self.image_views.push(view);
        }

        for &view in &self.image_views {
            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            self.framebuffers.push(framebuffer);
        }

        log::info!(
            "Created swapchain: {} images, {}x{}, {:?}, {:?}",
            self.images.len(),
            self.extent.width,
            self.extent.height,
            self.format,
            plan.present_mode
        );

        Ok(())
    }

    /// Destroy framebuffers, then views, then the swapchain itself
    fn destroy(&mut self) {
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
            self.images.clear();
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .with_context(|| format!("No framebuffer for swapchain image {}", image_index))
    }

    /// Acquire next image for rendering, signalling `semaphore`
    pub fn acquire_next_image(
        &self,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome, GpuError> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
        };
        classify_acquire(result)
    }

    /// Present rendered image to screen once `wait_semaphore` is signalled
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentOutcome, GpuError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };
        classify_present(result)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        }
    }

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    const WINDOW: vk::Extent2D = vk::Extent2D {
        width: 640,
        height: 480,
    };

    #[test]
    fn requests_one_image_above_minimum() {
        assert_eq!(choose_image_count(&caps(2, 0, (640, 480))), 3);
        assert_eq!(choose_image_count(&caps(2, 8, (640, 480))), 3);
        assert_eq!(choose_image_count(&caps(3, 3, (640, 480))), 3);
    }

    #[test]
    fn surface_extent_wins_over_window_size() {
        assert_eq!(
            choose_extent(&caps(2, 0, (800, 600)), WINDOW),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn undefined_surface_extent_clamps_window_size() {
        let mut c = caps(2, 0, (u32::MAX, u32::MAX));
        c.max_image_extent = vk::Extent2D {
            width: 500,
            height: 4096,
        };
        assert_eq!(
            choose_extent(&c, WINDOW),
            vk::Extent2D {
                width: 500,
                height: 480
            }
        );
    }

    #[test]
    fn srgb_preferred_then_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
        assert_eq!(
            choose_surface_format(&formats[..1]).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn planning_twice_against_unchanged_surface_is_identical() {
        let c = caps(2, 0, (1024, 768));
        let formats = [format(vk::Format::B8G8R8A8_SRGB)];
        let modes = [vk::PresentModeKHR::FIFO];

        let first = SwapchainPlan::choose(&c, &formats, &modes, vk::PresentModeKHR::FIFO, WINDOW).unwrap();
        let second = SwapchainPlan::choose(&c, &formats, &modes, vk::PresentModeKHR::FIFO, WINDOW).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.image_count, 3);
        assert_eq!(
            first.extent,
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );
    }

    #[test]
    fn minimised_surface_is_not_drawable() {
        let plan = SwapchainPlan::choose(
            &caps(2, 0, (0, 0)),
            &[format(vk::Format::B8G8R8A8_SRGB)],
            &[vk::PresentModeKHR::FIFO],
            vk::PresentModeKHR::FIFO,
            WINDOW,
        )
        .unwrap();
        assert!(!plan.is_drawable());
    }

    #[test]
    fn planning_without_formats_fails() {
        let result = SwapchainPlan::choose(
            &caps(2, 0, (640, 480)),
            &[],
            &[vk::PresentModeKHR::FIFO],
            vk::PresentModeKHR::FIFO,
            WINDOW,
        );
        assert!(result.is_err());
    }

    #[test]
    fn acquire_results_map_to_recreate_or_fatal() {
        assert_eq!(classify_acquire(Ok((2, false))).unwrap(), AcquireOutcome::Image(2));
        assert_eq!(
            classify_acquire(Ok((2, true))).unwrap(),
            AcquireOutcome::Stale(StaleReason::Suboptimal)
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::Stale(StaleReason::OutOfDate)
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::TIMEOUT)).unwrap(),
            AcquireOutcome::Stale(StaleReason::Timeout)
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn present_results_map_to_recreate_or_fatal() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(
            classify_present(Ok(true)).unwrap(),
            PresentOutcome::Stale(StaleReason::Suboptimal)
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::Stale(StaleReason::OutOfDate)
        );
        assert!(classify_present(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }
}
