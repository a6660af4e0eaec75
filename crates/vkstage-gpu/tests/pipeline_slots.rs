//! Pipeline slot allocation, deletion and reuse.

mod common;

use ash::vk;
use common::{
    assert_clean, backend_with, quad, ready_backend, reuse, triangle, ALT_FRAGMENT, ALT_VERTEX,
    FRAGMENT, GARBAGE, VERTEX,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vkstage_gpu::mock::{MockDriver, ObjectKind};
use vkstage_gpu::{
    GpuError, PipelineConfigurator, PipelineLayoutDesc, PipelineRequest, PipelineSource, SlotIndex,
    VertexInputLayout,
};

#[test]
fn new_slots_are_appended() {
    let mut backend = ready_backend(false, 2);

    let a = backend.create_pipeline(triangle()).unwrap();
    let b = backend.create_pipeline(quad()).unwrap();
    let c = backend.create_pipeline(triangle()).unwrap();
    assert_eq!([a, b, c].map(SlotIndex::index), [0, 1, 2]);

    // A deleted slot is never handed out for a New request.
    backend.destroy_pipeline(b).unwrap();
    let d = backend.create_pipeline(triangle()).unwrap();
    assert_eq!(d.index(), 3);
    assert_eq!(backend.pipelines().len(), 4);
    assert_eq!(
        backend.pipelines().live_indices(),
        vec![a, c, d],
        "only the destroyed slot is deleted"
    );
    assert_eq!(backend.driver().live_of(ObjectKind::Pipeline), 3);

    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn reuse_rebuilds_from_stored_source() {
    let mut backend = ready_backend(false, 2);
    let _ = backend.create_pipeline(triangle()).unwrap();
    let slot = backend.create_pipeline(quad()).unwrap();

    backend.destroy_pipeline(slot).unwrap();
    let deleted = backend.pipeline_slot(slot).unwrap();
    assert!(!deleted.is_live());
    assert_eq!(deleted.source().vertex_path, PathBuf::from(ALT_VERTEX));

    assert_eq!(backend.create_pipeline(reuse(slot)).unwrap(), slot);
    let live = backend.pipelines().live(slot).unwrap();
    assert_eq!(live.source.vertex_path, PathBuf::from(ALT_VERTEX));
    assert_eq!(live.source.fragment_path, PathBuf::from(ALT_FRAGMENT));
    assert_eq!(backend.pipelines().len(), 2);
}

#[test]
fn reuse_can_replace_the_source() {
    let mut backend = ready_backend(false, 2);
    let slot = backend.create_pipeline(triangle()).unwrap();
    backend.destroy_pipeline(slot).unwrap();

    let request = PipelineRequest::Reuse {
        index: slot,
        replace: Some(PipelineSource::new(ALT_VERTEX, ALT_FRAGMENT)),
    };
    backend.create_pipeline(request).unwrap();

    let live = backend.pipelines().live(slot).unwrap();
    assert_eq!(live.source.vertex_path, PathBuf::from(ALT_VERTEX));

    // The replacement is what survives the next deletion.
    backend.destroy_pipeline(slot).unwrap();
    assert_eq!(
        backend.pipeline_slot(slot).unwrap().source().fragment_path,
        PathBuf::from(ALT_FRAGMENT)
    );
}

#[test]
fn invalid_slot_requests_are_rejected() {
    let mut backend = ready_backend(false, 2);
    let slot = backend.create_pipeline(triangle()).unwrap();

    let live = backend.create_pipeline(reuse(slot)).unwrap_err();
    assert!(matches!(live, GpuError::InvalidPipelineSlot(_)), "{live}");

    let never = backend.create_pipeline(reuse(SlotIndex::new(5))).unwrap_err();
    assert!(matches!(never, GpuError::InvalidPipelineSlot(_)), "{never}");

    let out_of_range = backend.destroy_pipeline(SlotIndex::new(9)).unwrap_err();
    assert!(matches!(out_of_range, GpuError::InvalidPipelineSlot(_)));

    backend.destroy_pipeline(slot).unwrap();
    backend.destroy_pipeline(slot).unwrap();
    assert_eq!(backend.driver().live_of(ObjectKind::Pipeline), 0);

    let unbound = backend
        .bind_pipeline(vk::CommandBuffer::null(), slot)
        .unwrap_err();
    assert!(matches!(unbound, GpuError::InvalidPipelineSlot(_)));

    // Failed requests never allocate.
    assert_eq!(backend.pipelines().len(), 1);
    assert!(backend.driver().violations().is_empty());
}

#[test]
fn failed_creation_allocates_no_slot() {
    let mut backend = ready_backend(false, 2);
    backend.driver_mut().fail_pipeline_creation = true;

    let err = backend.create_pipeline(triangle()).unwrap_err();
    assert!(matches!(err, GpuError::PipelineCreation(_)), "{err}");
    assert!(backend.pipelines().is_empty());
    assert_eq!(backend.driver().live_of(ObjectKind::ShaderModule), 0);
    assert_eq!(backend.driver().live_of(ObjectKind::PipelineLayout), 0);

    backend.driver_mut().fail_pipeline_creation = false;
    assert_eq!(backend.create_pipeline(triangle()).unwrap().index(), 0);
}

#[test]
fn failed_reuse_keeps_slot_deleted() {
    let mut backend = ready_backend(false, 2);
    let slot = backend.create_pipeline(triangle()).unwrap();
    backend.destroy_pipeline(slot).unwrap();

    backend.driver_mut().fail_pipeline_creation = true;
    assert!(backend.create_pipeline(reuse(slot)).is_err());
    let stored = backend.pipeline_slot(slot).unwrap();
    assert!(!stored.is_live());
    assert_eq!(stored.source().vertex_path, PathBuf::from(VERTEX));
}

#[test]
fn shader_errors_are_classified() {
    let mut backend = ready_backend(false, 2);

    let missing = PipelineRequest::New(PipelineSource::new("shaders/missing.spv", FRAGMENT));
    match backend.create_pipeline(missing).unwrap_err() {
        GpuError::ShaderLoad { path, .. } => {
            assert_eq!(path, PathBuf::from("shaders/missing.spv"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let garbage = PipelineRequest::New(PipelineSource::new(VERTEX, GARBAGE));
    let err = backend.create_pipeline(garbage).unwrap_err();
    assert!(matches!(err, GpuError::ShaderCompilation(_)), "{err}");

    // The vertex module built before the fragment failure is released.
    assert_eq!(backend.driver().live_of(ObjectKind::ShaderModule), 0);
    assert!(backend.pipelines().is_empty());
}

#[test]
fn pipelines_need_a_swapchain() {
    let mut backend = backend_with(MockDriver::new(), false);
    backend.create_instance(&[]).unwrap();
    backend.init(2).unwrap();

    let err = backend.create_pipeline(triangle()).unwrap_err();
    assert!(matches!(err, GpuError::InvalidState(_)), "{err}");
}

#[derive(Default)]
struct CountingLayout {
    builds: AtomicUsize,
}

impl PipelineConfigurator for CountingLayout {
    fn vertex_input(&self, layout: &mut VertexInputLayout) -> vkstage_gpu::Result<()> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        layout.bindings.push(vk::VertexInputBindingDescription {
            binding: 0,
            stride: 24,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        layout.attributes.push(vk::VertexInputAttributeDescription {
            location: 0,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: 0,
        });
        Ok(())
    }

    fn pipeline_layout(&self, layout: &mut PipelineLayoutDesc) -> vkstage_gpu::Result<()> {
        layout.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: 64,
        });
        Ok(())
    }
}

#[test]
fn configurator_runs_on_every_build() {
    let mut backend = ready_backend(false, 2);
    let hooks = Arc::new(CountingLayout::default());
    let source = PipelineSource::new(VERTEX, FRAGMENT).with_configurator(hooks.clone());

    let slot = backend.create_pipeline(PipelineRequest::New(source)).unwrap();
    assert_eq!(hooks.builds.load(Ordering::SeqCst), 1);

    backend.recreate().unwrap();
    assert_eq!(hooks.builds.load(Ordering::SeqCst), 2);

    backend.destroy_pipeline(slot).unwrap();
    backend.create_pipeline(reuse(slot)).unwrap();
    assert_eq!(hooks.builds.load(Ordering::SeqCst), 3);

    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

struct Rejecting;

impl PipelineConfigurator for Rejecting {
    fn pipeline_layout(&self, _layout: &mut PipelineLayoutDesc) -> vkstage_gpu::Result<()> {
        Err(GpuError::Other("descriptor layout unavailable".to_string()))
    }
}

#[test]
fn configurator_errors_propagate_without_leaks() {
    let mut backend = ready_backend(false, 2);
    let source = PipelineSource::new(VERTEX, FRAGMENT).with_configurator(Arc::new(Rejecting));

    let err = backend.create_pipeline(PipelineRequest::New(source)).unwrap_err();
    assert!(matches!(err, GpuError::Other(_)), "{err}");
    assert_eq!(backend.driver().live_of(ObjectKind::ShaderModule), 0);
    assert!(backend.pipelines().is_empty());
}
