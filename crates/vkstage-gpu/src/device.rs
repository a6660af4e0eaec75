//! Physical device selection and logical device creation.

use crate::driver::{DeviceInfo, Driver};
use crate::error::{GpuError, Result};
use crate::instance::{cstr_name, to_cstring};
use ash::vk;
use std::collections::BTreeSet;
use std::ffi::CString;

/// Queue family indices used by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    /// Family used for the depth-to-shadow copy. Equals `graphics` when the
    /// shadow pass is disabled.
    pub transfer: u32,
}

impl QueueFamilies {
    /// Distinct families, one queue each.
    pub fn unique(&self) -> Vec<u32> {
        [self.graphics, self.present, self.transfer]
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// The selected physical device.
#[derive(Debug, Clone, Copy)]
pub struct PhysicalDeviceChoice {
    pub physical_device: vk::PhysicalDevice,
    /// The device exposes `VK_KHR_portability_subset`, which must then be enabled.
    pub portability_subset: bool,
}

/// Pick the first device that supports swapchains on the attached surface.
///
/// No scoring is done: enumeration order decides among suitable devices.
pub fn select_physical_device<D: Driver>(driver: &D) -> Result<PhysicalDeviceChoice> {
    let devices = driver.enumerate_physical_devices()?;
    if devices.is_empty() {
        tracing::error!("No Vulkan physical devices found");
        return Err(GpuError::NoSuitableDevice);
    }

    let swapchain = cstr_name(ash::khr::swapchain::NAME);
    let portability = cstr_name(ash::khr::portability_subset::NAME);

    for physical_device in devices {
        let extensions = driver.device_extensions(physical_device)?;
        if !extensions.iter().any(|e| e == swapchain) {
            tracing::debug!("Skipping {physical_device:?}: no swapchain support");
            continue;
        }

        let formats = driver.surface_formats(physical_device)?;
        let present_modes = driver.present_modes(physical_device)?;
        if formats.is_empty() || present_modes.is_empty() {
            tracing::debug!("Skipping {physical_device:?}: no surface formats or present modes");
            continue;
        }

        let portability_subset = extensions.iter().any(|e| e == portability);
        tracing::info!(?physical_device, portability_subset, "Selected physical device");
        return Ok(PhysicalDeviceChoice {
            physical_device,
            portability_subset,
        });
    }

    tracing::error!("No physical device supports the surface");
    Err(GpuError::NoSuitableDevice)
}

/// Find the graphics, present and (with `shadow_pass`) transfer families.
pub fn select_queue_families<D: Driver>(
    driver: &D,
    physical_device: vk::PhysicalDevice,
    shadow_pass: bool,
) -> Result<QueueFamilies> {
    let families = driver.queue_family_properties(physical_device);

    let mut graphics = None;
    let mut present = None;
    let mut transfer = None;

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(index);
        }
        if present.is_none() && driver.surface_support(physical_device, index)? {
            present = Some(index);
        }
        if transfer.is_none() && family.queue_flags.contains(vk::QueueFlags::TRANSFER) {
            transfer = Some(index);
        }
    }

    let graphics = graphics.ok_or_else(|| {
        tracing::error!("No graphics queue family");
        GpuError::NoSuitableDevice
    })?;
    let present = present.ok_or_else(|| {
        tracing::error!("No present queue family");
        GpuError::NoSuitableDevice
    })?;
    // Graphics queues implicitly support transfer even if the bit is not reported.
    let transfer = if shadow_pass {
        transfer.unwrap_or(graphics)
    } else {
        graphics
    };

    tracing::debug!(graphics, present, transfer, "Selected queue families");
    Ok(QueueFamilies {
        graphics,
        present,
        transfer,
    })
}

/// Logical device state shared by the other components.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub physical_device: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
}

/// Create the logical device with one queue per distinct family.
pub fn create_logical_device<D: Driver>(
    driver: &mut D,
    choice: PhysicalDeviceChoice,
    families: QueueFamilies,
    layers: &[CString],
) -> Result<DeviceContext> {
    let mut extensions = vec![to_cstring(cstr_name(ash::khr::swapchain::NAME))?];
    if choice.portability_subset {
        extensions.push(to_cstring(cstr_name(ash::khr::portability_subset::NAME))?);
    }

    let info = DeviceInfo {
        queue_families: families.unique(),
        extensions,
        layers: layers.to_vec(),
    };

    driver
        .create_device(choice.physical_device, &info)
        .map_err(|e| {
            tracing::error!("Failed to create logical device: {e}");
            GpuError::from(e)
        })?;
    tracing::info!(queues = info.queue_families.len(), "Created logical device");

    Ok(DeviceContext {
        physical_device: choice.physical_device,
        memory_properties: driver.memory_properties(choice.physical_device),
        families,
        graphics_queue: driver.device_queue(families.graphics),
        present_queue: driver.device_queue(families.present),
        transfer_queue: driver.device_queue(families.transfer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_families_are_sorted_and_deduplicated() {
        let families = QueueFamilies {
            graphics: 2,
            present: 0,
            transfer: 2,
        };
        assert_eq!(families.unique(), vec![0, 2]);

        let shared = QueueFamilies {
            graphics: 0,
            present: 0,
            transfer: 0,
        };
        assert_eq!(shared.unique(), vec![0]);
    }
}
