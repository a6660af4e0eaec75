//! GPU error types.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the frame backend.
///
/// An out-of-date or suboptimal swapchain is never reported through this
/// type; those statuses trigger a transparent swapchain rebuild instead.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No physical device offers swapchain support for the surface.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// No memory type satisfies both the requirement mask and the property flags.
    #[error("No memory type matches bits {type_bits:#b} with properties {properties:?}")]
    NoMatchingMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// A SPIR-V file or packaged asset could not be read.
    #[error("Failed to load shader {path}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Shader compilation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// The requested layout pair has no known barrier masks.
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// A pipeline slot was addressed in a state that does not allow the operation.
    #[error("Invalid pipeline slot: {0}")]
    InvalidPipelineSlot(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
