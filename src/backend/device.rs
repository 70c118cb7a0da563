// Vulkan Device - the logical context
//
// Responsibilities:
// - Logical device + the single graphics/present queue
// - Draining the queue before anything derived from it is destroyed
//
// Every GPU object created afterwards holds an `Arc<VulkanDevice>`, so the
// device outlives all of them; it in turn keeps the instance alive.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::selector::{required_extensions, Adapter};
use super::VulkanInstance;

pub struct VulkanDevice {
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub adapter: Adapter,
    pub instance: Arc<VulkanInstance>,
}

impl VulkanDevice {
    pub fn new(instance: Arc<VulkanInstance>, adapter: Adapter) -> Result<Arc<Self>> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(adapter.queue_family)
            .queue_priorities(&queue_priorities);

        let extensions: Vec<_> = required_extensions(adapter.requirement)
            .into_iter()
            .map(|name| name.as_ptr())
            .collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device = unsafe {
            instance
                .instance
                .create_device(adapter.physical_device, &create_info, None)
        }
        .context("Failed to create logical device")?;

        let graphics_queue = unsafe { device.get_device_queue(adapter.queue_family, 0) };

        log::info!("Logical device ready on {}", adapter.name);

        Ok(Arc::new(Self {
            device,
            graphics_queue,
            adapter,
            instance,
        }))
    }

    pub fn queue_family(&self) -> u32 {
        self.adapter.queue_family
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.adapter.memory_properties
    }

    /// Block until the graphics queue has no outstanding work
    pub fn wait_queue_idle(&self) -> Result<()> {
        unsafe { self.device.queue_wait_idle(self.graphics_queue) }
            .context("Failed to wait for graphics queue")
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_device(None);
        }
    }
}
