//! Vulkan instance creation.

use crate::config::BackendConfig;
use crate::driver::{Driver, InstanceInfo};
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};

/// Engine name reported to the driver.
pub const ENGINE_NAME: &str = "vkstage";

/// An ash extension-name constant as `&str`.
pub(crate) fn cstr_name(name: &CStr) -> &str {
    name.to_str().unwrap_or_default()
}

pub(crate) fn to_cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| GpuError::Other(format!("Name contains a NUL byte: {name:?}")))
}

/// Result of instance creation.
#[derive(Debug, Default)]
pub struct InstanceState {
    /// Validation layers enabled on the instance. The device enables the same set.
    pub layers: Vec<CString>,
    /// Debug report callback, if validation is active.
    pub debug_callback: Option<vk::DebugReportCallbackEXT>,
}

/// Validation layers from `config` that the driver actually provides.
pub fn available_validation_layers<D: Driver>(driver: &D, config: &BackendConfig) -> Result<Vec<String>> {
    if !config.validation {
        return Ok(Vec::new());
    }

    let available = driver.instance_layers()?;
    let mut enabled = Vec::new();
    for candidate in &config.validation_layers {
        if available.iter().any(|layer| layer == candidate) {
            tracing::debug!("Enabling validation layer {candidate}");
            enabled.push(candidate.clone());
        } else {
            tracing::debug!("Validation layer {candidate} not available");
        }
    }
    if enabled.is_empty() {
        tracing::warn!("Validation requested but no validation layer is available");
    }
    Ok(enabled)
}

/// Create the Vulkan instance.
///
/// Fails if any of `extensions` is missing. Optional extensions are added
/// when the driver lists them.
pub fn create_instance<D: Driver>(
    driver: &mut D,
    config: &BackendConfig,
    extensions: &[&str],
) -> Result<InstanceState> {
    let available = driver.instance_extensions()?;
    for name in &available {
        tracing::debug!("Instance extension available: {name}");
    }

    let has = |name: &str| available.iter().any(|ext| ext == name);

    let mut enabled: Vec<String> = Vec::with_capacity(extensions.len() + 2);
    for &name in extensions {
        if !has(name) {
            tracing::error!("Required instance extension {name} is not supported");
            return Err(GpuError::ExtensionNotSupported(name.to_string()));
        }
        enabled.push(name.to_string());
    }

    let properties2 = cstr_name(ash::khr::get_physical_device_properties2::NAME);
    if has(properties2) && !enabled.iter().any(|e| e == properties2) {
        tracing::debug!("Enabling optional extension {properties2}");
        enabled.push(properties2.to_string());
    }

    let layers = available_validation_layers(driver, config)?;
    let debug_report = cstr_name(ash::ext::debug_report::NAME);
    let use_debug_report = !layers.is_empty() && has(debug_report);
    if use_debug_report && !enabled.iter().any(|e| e == debug_report) {
        enabled.push(debug_report.to_string());
    }

    let portability = cstr_name(ash::khr::portability_enumeration::NAME);
    let flags = if enabled.iter().any(|e| e == portability) {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };

    let info = InstanceInfo {
        app_name: to_cstring(&config.app_name)?,
        engine_name: to_cstring(ENGINE_NAME)?,
        api_version: vk::API_VERSION_1_0,
        extensions: enabled
            .iter()
            .map(|e| to_cstring(e))
            .collect::<Result<_>>()?,
        layers: layers
            .iter()
            .map(|l| to_cstring(l))
            .collect::<Result<_>>()?,
        flags,
    };

    driver.create_instance(&info).map_err(|e| {
        tracing::error!("Failed to create instance: {e}");
        GpuError::from(e)
    })?;
    tracing::info!(
        "Created Vulkan instance for {} with {} extensions and {} layers",
        config.app_name,
        info.extensions.len(),
        info.layers.len()
    );

    let debug_callback = if use_debug_report {
        match driver.create_debug_callback() {
            Ok(callback) => Some(callback),
            Err(e) => {
                tracing::warn!("Could not install debug report callback: {e}");
                None
            }
        }
    } else {
        None
    };

    Ok(InstanceState {
        layers: info.layers,
        debug_callback,
    })
}
