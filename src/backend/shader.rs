// Shader module loading
//
// SPIR-V comes pre-compiled (see build.rs); its contents are opaque here.
// Modules only need to live until the pipeline has been created.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::VulkanDevice;

pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V bytes
    pub fn from_bytes(device: Arc<VulkanDevice>, code: &[u8]) -> Result<Self> {
        // read_spv copies into u32 words, so alignment of `code` does not matter
        let words = ash::util::read_spv(&mut std::io::Cursor::new(code))
            .context("Shader bytecode is not valid SPIR-V")?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        Ok(Self { module, device })
    }

    /// Load a compiled shader from disk
    pub fn load(device: Arc<VulkanDevice>, path: &Path) -> Result<Self> {
        let code = std::fs::read(path)
            .with_context(|| format!("Failed to read shader: {:?}", path))?;
        log::debug!("Loaded shader {:?} ({} bytes)", path, code.len());

        Self::from_bytes(device, &code).with_context(|| format!("Shader {:?}", path))
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}
