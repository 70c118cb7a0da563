// Device selection
//
// Policy: the first adapter that satisfies every requirement wins. There is
// no scoring; an environment without a usable adapter is a fatal error.
//
// The Vulkan queries are gathered into plain `AdapterInfo` descriptions first
// so the policy itself can be checked against synthetic adapters.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;

use super::{Surface, VulkanInstance};
use crate::error::GpuError;

/// Capabilities of one queue family, checked independently
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub graphics: bool,
    pub present: bool,
}

/// Everything the selection policy looks at for one adapter
#[derive(Debug, Clone, Default)]
pub struct AdapterInfo {
    pub queue_families: Vec<QueueFamilyInfo>,
    pub swapchain_extension: bool,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

/// What the adapter will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Graphics submission and presentation to a surface
    Presentation,
    /// Graphics submission only (uploads, tests)
    Offscreen,
}

impl AdapterInfo {
    /// First queue family that meets the requirement
    pub fn queue_family(&self, requirement: Requirement) -> Option<u32> {
        self.queue_families
            .iter()
            .position(|family| match requirement {
                Requirement::Presentation => family.graphics && family.present,
                Requirement::Offscreen => family.graphics,
            })
            .map(|index| index as u32)
    }

    pub fn is_suitable(&self, requirement: Requirement) -> bool {
        let family = self.queue_family(requirement).is_some();
        match requirement {
            Requirement::Offscreen => family,
            Requirement::Presentation => {
                family
                    && self.swapchain_extension
                    && self.surface_format_count > 0
                    && self.present_mode_count > 0
            }
        }
    }
}

/// Index of the first suitable adapter and its queue family
pub fn first_suitable(candidates: &[AdapterInfo], requirement: Requirement) -> Option<(usize, u32)> {
    candidates.iter().enumerate().find_map(|(index, info)| {
        if info.is_suitable(requirement) {
            info.queue_family(requirement).map(|family| (index, family))
        } else {
            None
        }
    })
}

/// The chosen physical device. Immutable once selected.
#[derive(Clone)]
pub struct Adapter {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub requirement: Requirement,
}

/// Pick an adapter that can render and, when `surface` is given, present to it
pub fn select_adapter(instance: &VulkanInstance, surface: Option<&Surface>) -> Result<Adapter> {
    let requirement = if surface.is_some() {
        Requirement::Presentation
    } else {
        Requirement::Offscreen
    };

    let devices = unsafe { instance.instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    let infos: Vec<_> = devices
        .iter()
        .enumerate()
        .map(|(index, &device)| or_excluded(index, describe_adapter(instance, device, surface)))
        .collect();

    let (index, queue_family) =
        first_suitable(&infos, requirement).ok_or(GpuError::NoSuitableAdapter)?;
    let physical_device = devices[index];

    let (properties, memory_properties) = unsafe {
        (
            instance.instance.get_physical_device_properties(physical_device),
            instance
                .instance
                .get_physical_device_memory_properties(physical_device),
        )
    };
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_string());

    log::info!(
        "Selected GPU: {} (queue family {}, {} of {} adapters considered)",
        name,
        queue_family,
        index + 1,
        devices.len()
    );
    log::info!(
        "API Version: {}.{}.{}",
        vk::api_version_major(properties.api_version),
        vk::api_version_minor(properties.api_version),
        vk::api_version_patch(properties.api_version)
    );

    Ok(Adapter {
        physical_device,
        queue_family,
        name,
        properties,
        memory_properties,
        requirement,
    })
}

/// An adapter whose queries failed takes no further part in selection
fn or_excluded(index: usize, described: Result<AdapterInfo>) -> AdapterInfo {
    described.unwrap_or_else(|e| {
        log::warn!("Skipping adapter {}: {:#}", index, e);
        AdapterInfo::default()
    })
}

fn describe_adapter(
    instance: &VulkanInstance,
    device: vk::PhysicalDevice,
    surface: Option<&Surface>,
) -> Result<AdapterInfo> {
    let families = unsafe {
        instance
            .instance
            .get_physical_device_queue_family_properties(device)
    };

    let mut queue_families = Vec::with_capacity(families.len());
    for (index, family) in families.iter().enumerate() {
        let present = match surface {
            Some(surface) => surface.supports_queue_family(device, index as u32)?,
            None => false,
        };
        queue_families.push(QueueFamilyInfo {
            graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            present,
        });
    }

    let extensions = unsafe { instance.instance.enumerate_device_extension_properties(device) }
        .context("Failed to enumerate device extensions")?;
    let swapchain_extension = extensions.iter().any(|ext| {
        ext.extension_name_as_c_str()
            .map(|name| name == ash::khr::swapchain::NAME)
            .unwrap_or(false)
    });

    let (surface_format_count, present_mode_count) = match surface {
        Some(surface) if swapchain_extension => (
            surface.formats(device)?.len(),
            surface.present_modes(device)?.len(),
        ),
        _ => (0, 0),
    };

    Ok(AdapterInfo {
        queue_families,
        swapchain_extension,
        surface_format_count,
        present_mode_count,
    })
}

/// Device extensions to enable for the given use
pub fn required_extensions(requirement: Requirement) -> Vec<&'static CStr> {
    match requirement {
        Requirement::Presentation => vec![ash::khr::swapchain::NAME],
        Requirement::Offscreen => vec![],
    }
}
