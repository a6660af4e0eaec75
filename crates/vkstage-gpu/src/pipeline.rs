//! Slot-addressed graphics pipeline registry.
//!
//! Every pipeline lives in a slot of [`PipelineRegistry`]. A slot is either
//! [`PipelineSlot::Live`] or [`PipelineSlot::Deleted`]; deleted slots keep
//! their [`PipelineSource`] so they can be rebuilt in place, either on request
//! or after the swapchain is recreated. Slots are never compacted.

use crate::driver::Driver;
use crate::error::{GpuError, Result};
use crate::shader::ShaderLoader;
use ash::vk;
use std::ffi::CStr;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Vertex bindings and attributes of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct VertexInputLayout {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

/// Descriptor set layouts and push constant ranges of a pipeline layout.
#[derive(Debug, Clone, Default)]
pub struct PipelineLayoutDesc {
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
}

/// Caller-provided configuration hooks.
///
/// The registry knows nothing about vertex formats or uniform layouts; both
/// hooks run every time the slot's pipeline is built, including rebuilds after
/// a swapchain recreation.
pub trait PipelineConfigurator {
    /// Fill in vertex bindings and attributes.
    fn vertex_input(&self, _layout: &mut VertexInputLayout) -> Result<()> {
        Ok(())
    }

    /// Fill in descriptor set layouts and push constant ranges.
    fn pipeline_layout(&self, _layout: &mut PipelineLayoutDesc) -> Result<()> {
        Ok(())
    }
}

/// Configurator for pipelines without vertex input or descriptors.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBindings;

impl PipelineConfigurator for NoBindings {}

/// Everything needed to (re)build a pipeline slot.
#[derive(Clone)]
pub struct PipelineSource {
    pub vertex_path: PathBuf,
    pub fragment_path: PathBuf,
    pub configurator: Arc<dyn PipelineConfigurator>,
}

impl PipelineSource {
    /// Source with no vertex input and an empty pipeline layout.
    pub fn new(vertex_path: impl Into<PathBuf>, fragment_path: impl Into<PathBuf>) -> Self {
        Self {
            vertex_path: vertex_path.into(),
            fragment_path: fragment_path.into(),
            configurator: Arc::new(NoBindings),
        }
    }

    /// Replace the configurator.
    #[must_use]
    pub fn with_configurator(mut self, configurator: Arc<dyn PipelineConfigurator>) -> Self {
        self.configurator = configurator;
        self
    }
}

impl fmt::Debug for PipelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineSource")
            .field("vertex_path", &self.vertex_path)
            .field("fragment_path", &self.fragment_path)
            .finish_non_exhaustive()
    }
}

/// Index of a pipeline slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotIndex(usize);

impl SlotIndex {
    /// Wrap a raw slot number.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw slot number.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a pipeline should be built.
#[derive(Debug, Clone)]
pub enum PipelineRequest {
    /// Append a new slot.
    New(PipelineSource),
    /// Rebuild a deleted slot, optionally with a different source.
    Reuse {
        index: SlotIndex,
        replace: Option<PipelineSource>,
    },
}

/// Vulkan objects owned by a live slot.
#[derive(Debug)]
pub struct LivePipeline {
    pub source: PipelineSource,
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

/// State of a registry slot.
#[derive(Debug)]
pub enum PipelineSlot {
    Live(LivePipeline),
    Deleted(PipelineSource),
}

impl PipelineSlot {
    /// Source the slot was (or will be) built from.
    pub fn source(&self) -> &PipelineSource {
        match self {
            Self::Live(live) => &live.source,
            Self::Deleted(source) => source,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }
}

/// Fixed-function state shared by every pipeline.
#[derive(Debug, Clone, Copy)]
pub struct FixedFunctionState {
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
    pub polygon_mode: vk::PolygonMode,
    pub line_width: f32,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub blend: vk::PipelineColorBlendAttachmentState,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare_op: vk::CompareOp,
    pub min_depth_bounds: f32,
    pub max_depth_bounds: f32,
    pub samples: vk::SampleCountFlags,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            polygon_mode: vk::PolygonMode::FILL,
            line_width: 1.0,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend: vk::PipelineColorBlendAttachmentState {
                blend_enable: vk::TRUE,
                src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
                dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
                color_blend_op: vk::BlendOp::ADD,
                src_alpha_blend_factor: vk::BlendFactor::ONE,
                dst_alpha_blend_factor: vk::BlendFactor::ZERO,
                alpha_blend_op: vk::BlendOp::ADD,
                color_write_mask: vk::ColorComponentFlags::RGBA,
            },
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }
}

/// Complete description of a graphics pipeline handed to the driver.
///
/// Viewport and scissor are static and cover `extent`.
#[derive(Debug, Clone)]
pub struct GraphicsPipelineDesc {
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
    pub entry_point: &'static CStr,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
    pub vertex_input: VertexInputLayout,
    pub fixed: FixedFunctionState,
}

/// Render pass and extent pipelines are baked against.
#[derive(Debug, Clone, Copy)]
pub struct PipelineTarget {
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
}

/// Growable table of pipeline slots.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    slots: Vec<PipelineSlot>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots ever allocated.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: SlotIndex) -> Option<&PipelineSlot> {
        self.slots.get(index.0)
    }

    /// The live pipeline in `index`, if any.
    pub fn live(&self, index: SlotIndex) -> Option<&LivePipeline> {
        match self.slots.get(index.0) {
            Some(PipelineSlot::Live(live)) => Some(live),
            _ => None,
        }
    }

    /// Indices of every live slot.
    pub fn live_indices(&self) -> Vec<SlotIndex> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_live())
            .map(|(index, _)| SlotIndex(index))
            .collect()
    }

    /// Build a pipeline according to `request`.
    ///
    /// A failed `New` request does not allocate a slot. A failed `Reuse`
    /// leaves the slot deleted with its previous source.
    pub fn create<D: Driver>(
        &mut self,
        driver: &mut D,
        loader: &dyn ShaderLoader,
        target: PipelineTarget,
        request: PipelineRequest,
    ) -> Result<SlotIndex> {
        match request {
            PipelineRequest::New(source) => {
                let live = build_pipeline(driver, loader, target, source)?;
                self.slots.push(PipelineSlot::Live(live));
                let index = SlotIndex(self.slots.len() - 1);
                tracing::debug!(%index, "Created pipeline in new slot");
                Ok(index)
            }
            PipelineRequest::Reuse { index, replace } => {
                let source = match self.slots.get(index.0) {
                    None => {
                        return Err(GpuError::InvalidPipelineSlot(format!(
                            "pipeline {index} has never been created"
                        )))
                    }
                    Some(PipelineSlot::Live(_)) => {
                        return Err(GpuError::InvalidPipelineSlot(format!(
                            "pipeline {index} has not been deleted"
                        )))
                    }
                    Some(PipelineSlot::Deleted(stored)) => {
                        replace.unwrap_or_else(|| stored.clone())
                    }
                };
                let live = build_pipeline(driver, loader, target, source)?;
                self.slots[index.0] = PipelineSlot::Live(live);
                tracing::debug!(%index, "Rebuilt pipeline in reused slot");
                Ok(index)
            }
        }
    }

    /// Destroy the pipeline in `index`. Deleted slots are left untouched.
    pub fn destroy<D: Driver>(&mut self, driver: &mut D, index: SlotIndex) -> Result<()> {
        let Some(slot) = self.slots.get_mut(index.0) else {
            return Err(GpuError::InvalidPipelineSlot(format!(
                "pipeline {index} has never been created"
            )));
        };
        if let PipelineSlot::Live(live) = slot {
            let source = live.source.clone();
            destroy_live(driver, live);
            *slot = PipelineSlot::Deleted(source);
        }
        Ok(())
    }

    /// Destroy every live pipeline, keeping sources. Returns the affected slots.
    pub fn invalidate_live<D: Driver>(&mut self, driver: &mut D) -> Vec<SlotIndex> {
        let indices = self.live_indices();
        for &index in &indices {
            // Indices come from live_indices, so destroy cannot fail.
            let _ = self.destroy(driver, index);
        }
        indices
    }

    /// Rebuild `indices` from their stored sources against a new target.
    ///
    /// Every slot is attempted; the first error is returned.
    pub fn rebuild<D: Driver>(
        &mut self,
        driver: &mut D,
        loader: &dyn ShaderLoader,
        target: PipelineTarget,
        indices: &[SlotIndex],
    ) -> Result<()> {
        let mut first_error = None;
        for &index in indices {
            let request = PipelineRequest::Reuse {
                index,
                replace: None,
            };
            if let Err(e) = self.create(driver, loader, target, request) {
                tracing::error!(%index, "Failed to rebuild pipeline: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Destroy every live pipeline and forget all slots.
    pub fn shutdown<D: Driver>(&mut self, driver: &mut D) {
        for slot in &mut self.slots {
            if let PipelineSlot::Live(live) = slot {
                destroy_live(driver, live);
            }
        }
        self.slots.clear();
    }
}

fn destroy_live<D: Driver>(driver: &mut D, live: &LivePipeline) {
    driver.destroy_pipeline(live.pipeline);
    driver.destroy_pipeline_layout(live.layout);
    driver.destroy_shader_module(live.vertex_module);
    driver.destroy_shader_module(live.fragment_module);
}

fn create_module<D: Driver>(
    driver: &mut D,
    loader: &dyn ShaderLoader,
    path: &std::path::Path,
) -> Result<vk::ShaderModule> {
    let code = loader.load(path)?;
    driver.create_shader_module(&code).map_err(|e| {
        GpuError::ShaderCompilation(format!("{}: {e}", path.display()))
    })
}

fn build_pipeline<D: Driver>(
    driver: &mut D,
    loader: &dyn ShaderLoader,
    target: PipelineTarget,
    source: PipelineSource,
) -> Result<LivePipeline> {
    let vertex_module = create_module(driver, loader, &source.vertex_path)?;
    let fragment_module = match create_module(driver, loader, &source.fragment_path) {
        Ok(module) => module,
        Err(e) => {
            driver.destroy_shader_module(vertex_module);
            return Err(e);
        }
    };

    let release_modules = |driver: &mut D| {
        driver.destroy_shader_module(vertex_module);
        driver.destroy_shader_module(fragment_module);
    };

    let mut vertex_input = VertexInputLayout::default();
    let mut layout_desc = PipelineLayoutDesc::default();
    let configured = source
        .configurator
        .vertex_input(&mut vertex_input)
        .and_then(|()| source.configurator.pipeline_layout(&mut layout_desc));
    if let Err(e) = configured {
        release_modules(driver);
        return Err(e);
    }

    let layout = match driver.create_pipeline_layout(&layout_desc) {
        Ok(layout) => layout,
        Err(e) => {
            release_modules(driver);
            return Err(GpuError::PipelineCreation(format!("pipeline layout: {e}")));
        }
    };

    let desc = GraphicsPipelineDesc {
        vertex_module,
        fragment_module,
        entry_point: c"main",
        layout,
        render_pass: target.render_pass,
        extent: target.extent,
        vertex_input,
        fixed: FixedFunctionState::default(),
    };
    let pipeline = match driver.create_graphics_pipeline(&desc) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            driver.destroy_pipeline_layout(layout);
            release_modules(driver);
            return Err(GpuError::PipelineCreation(e.to_string()));
        }
    };

    Ok(LivePipeline {
        source,
        vertex_module,
        fragment_module,
        layout,
        pipeline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_function_defaults() {
        let state = FixedFunctionState::default();
        assert_eq!(state.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(state.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(state.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(state.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert!(state.depth_test && state.depth_write);
        assert_eq!(state.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(state.blend.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            state.blend.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
        assert_eq!(state.blend.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.blend.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
    }

    #[test]
    fn slot_source_survives_deletion() {
        let source = PipelineSource::new("a.vert.spv", "a.frag.spv");
        let slot = PipelineSlot::Deleted(source);
        assert!(!slot.is_live());
        assert_eq!(slot.source().vertex_path, PathBuf::from("a.vert.spv"));
    }

    #[test]
    fn empty_registry() {
        let registry = PipelineRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.slot(SlotIndex::new(0)).is_none());
        assert!(registry.live_indices().is_empty());
    }
}
