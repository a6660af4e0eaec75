//! Vulkan frame backend for the vkstage renderer.
//!
//! This crate provides:
//! - Instance and device bootstrap with optional validation layers
//! - Swapchain management with transparent recreation
//! - Slot-addressed graphics pipelines that survive swapchain rebuilds
//! - Frames-in-flight synchronization
//! - Draw command recording and an optional depth-to-shadow copy pass
//! - Buffers, images and samplers with per-object memory
//!
//! All Vulkan calls go through the [`Driver`] trait. [`AshDriver`] talks to
//! the system loader; [`mock::MockDriver`] is an in-memory stand-in for tests.

pub mod ash_driver;
pub mod backend;
pub mod command;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod instance;
pub mod layout;
pub mod memory;
pub mod mock;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use ash_driver::AshDriver;
pub use backend::{AcquiredImage, Backend, DrawPass};
pub use config::{BackendBuilder, BackendConfig};
pub use driver::Driver;
pub use error::{GpuError, Result};
pub use memory::{GpuBuffer, GpuImage};
pub use pipeline::{
    NoBindings, PipelineConfigurator, PipelineLayoutDesc, PipelineRequest, PipelineSlot,
    PipelineSource, SlotIndex, VertexInputLayout,
};
pub use shader::{FileShaderLoader, MemoryShaderLoader, ShaderLoader};
pub use swapchain::Swapchain;
pub use sync::{FrameSync, FrameSynchronizer};
