// GPU buffers for vertex and index data
//
// Buffers are created once, written once and never resized. Each one owns its
// memory and releases both on drop, including on early error returns.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::commands::CommandContext;
use super::memory::find_memory_type;
use super::VulkanDevice;
use crate::error::GpuError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Host-side source of a copy into a device-local buffer
    Staging,
}

impl BufferUsage {
    pub fn flags(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }
}

const HOST_UPLOAD: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub usage: BufferUsage,
    host_visible: bool,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    /// Create a buffer and bind freshly allocated memory with `memory_flags`
    fn allocate(
        device: Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: BufferUsage,
        usage_flags: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::EmptyUpload.into());
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage_flags)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .context("Failed to create buffer")?;

        let mut gpu_buffer = Self {
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            usage,
            host_visible: memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
            device,
        };

        let requirements = unsafe {
            gpu_buffer
                .device
                .device
                .get_buffer_memory_requirements(buffer)
        };

        let memory_type_index = find_memory_type(
            gpu_buffer.device.memory_properties(),
            requirements.memory_type_bits,
            memory_flags,
        )?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        gpu_buffer.memory = unsafe { gpu_buffer.device.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate buffer memory")?;

        unsafe {
            gpu_buffer
                .device
                .device
                .bind_buffer_memory(buffer, gpu_buffer.memory, 0)
        }
        .context("Failed to bind buffer memory")?;

        Ok(gpu_buffer)
    }

    /// Create a host-visible buffer holding `bytes`.
    ///
    /// The mapped range is flushed even when the memory type reports
    /// coherency.
    pub fn upload(device: Arc<VulkanDevice>, usage: BufferUsage, bytes: &[u8]) -> Result<Self> {
        let size = bytes.len() as vk::DeviceSize;
        let buffer = Self::allocate(device, size, usage, usage.flags(), HOST_UPLOAD)?;
        buffer.write(bytes)?;

        log::debug!("Uploaded {} bytes into {:?} buffer", size, usage);
        Ok(buffer)
    }

    /// Upload through a staging buffer into device-local memory
    pub fn upload_staged(
        device: Arc<VulkanDevice>,
        commands: &CommandContext,
        usage: BufferUsage,
        bytes: &[u8],
        timeout_ns: u64,
    ) -> Result<Self> {
        anyhow::ensure!(usage != BufferUsage::Staging, "cannot stage into a staging buffer");
        let staging = Self::upload(device.clone(), BufferUsage::Staging, bytes)?;

        let destination = Self::allocate(
            device,
            staging.size,
            usage,
            vk::BufferUsageFlags::TRANSFER_DST | usage.flags(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: staging.size,
        };
        commands
            .submit_one_time(timeout_ns, |device, cmd| unsafe {
                device.cmd_copy_buffer(cmd, staging.buffer, destination.buffer, &[region]);
            })
            .context("Failed to copy staging buffer")?;

        log::debug!(
            "Staged {} bytes into device-local {:?} buffer",
            destination.size,
            usage
        );
        Ok(destination)
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let device = &self.device.device;
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")?
                .cast::<u8>();
            ptr.copy_from_nonoverlapping(bytes.as_ptr(), bytes.len());

            let range = vk::MappedMemoryRange::default()
                .memory(self.memory)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            let flushed = device.flush_mapped_memory_ranges(&[range]);
            device.unmap_memory(self.memory);
            flushed.context("Failed to flush buffer memory")
        }
    }

    /// Copy the buffer's contents back to the host (host-visible buffers only)
    pub fn read_back(&self) -> Result<Vec<u8>> {
        anyhow::ensure!(self.host_visible, "{:?} buffer is not host-visible", self.usage);

        let device = &self.device.device;
        let mut bytes = vec![0u8; self.size as usize];
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .context("Failed to map buffer memory")?
                .cast::<u8>();

            let range = vk::MappedMemoryRange::default()
                .memory(self.memory)
                .offset(0)
                .size(vk::WHOLE_SIZE);
            let invalidated = device.invalidate_mapped_memory_ranges(&[range]);
            if invalidated.is_ok() {
                ptr.copy_to_nonoverlapping(bytes.as_mut_ptr(), bytes.len());
            }
            device.unmap_memory(self.memory);
            invalidated.context("Failed to invalidate buffer memory")?;
        }
        Ok(bytes)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}
