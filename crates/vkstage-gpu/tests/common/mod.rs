//! Shared fixtures for backend integration tests.

#![allow(dead_code)]

use ash::vk;
use vkstage_gpu::mock::{MockCall, MockDriver};
use vkstage_gpu::{
    AcquiredImage, Backend, BackendBuilder, DrawPass, MemoryShaderLoader, PipelineRequest,
    PipelineSource, Result, SlotIndex,
};

pub const SPIRV_MAGIC: u32 = 0x0723_0203;

pub const VERTEX: &str = "shaders/triangle.vert.spv";
pub const FRAGMENT: &str = "shaders/triangle.frag.spv";
pub const ALT_VERTEX: &str = "shaders/quad.vert.spv";
pub const ALT_FRAGMENT: &str = "shaders/quad.frag.spv";
/// Packaged, but not valid SPIR-V.
pub const GARBAGE: &str = "shaders/garbage.spv";

pub fn shaders() -> MemoryShaderLoader {
    let module = [SPIRV_MAGIC, 0x0001_0000, 0, 8, 0];
    MemoryShaderLoader::new()
        .with_words(VERTEX, &module)
        .with_words(FRAGMENT, &module)
        .with_words(ALT_VERTEX, &module)
        .with_words(ALT_FRAGMENT, &module)
        .with_words(GARBAGE, &[1, 2, 3])
}

/// Route backend logs through the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Backend over `driver` with packaged test shaders and no validation.
pub fn backend_with(driver: MockDriver, shadow_pass: bool) -> Backend<MockDriver> {
    init_tracing();
    BackendBuilder::new()
        .app_name("vkstage-tests")
        .validation(false)
        .shadow_pass(shadow_pass)
        .build(driver)
        .with_shader_loader(shaders())
}

/// Backend with instance, device and an 800x600 swapchain.
pub fn ready_backend_with(
    driver: MockDriver,
    shadow_pass: bool,
    frames: usize,
) -> Backend<MockDriver> {
    let mut backend = backend_with(driver, shadow_pass);
    backend.create_instance(&["VK_KHR_surface"]).unwrap();
    backend.init(frames).unwrap();
    backend.set_width_height(800, 600);
    backend.create_swapchain().unwrap();
    backend
}

pub fn ready_backend(shadow_pass: bool, frames: usize) -> Backend<MockDriver> {
    ready_backend_with(MockDriver::new(), shadow_pass, frames)
}

/// Ready backend with one triangle pipeline and sync objects.
pub fn running_backend(shadow_pass: bool, frames: usize) -> (Backend<MockDriver>, SlotIndex) {
    let mut backend = ready_backend(shadow_pass, frames);
    let slot = backend.create_pipeline(triangle()).unwrap();
    backend.create_sync_objects().unwrap();
    (backend, slot)
}

pub fn triangle() -> PipelineRequest {
    PipelineRequest::New(PipelineSource::new(VERTEX, FRAGMENT))
}

pub fn quad() -> PipelineRequest {
    PipelineRequest::New(PipelineSource::new(ALT_VERTEX, ALT_FRAGMENT))
}

pub fn reuse(index: SlotIndex) -> PipelineRequest {
    PipelineRequest::Reuse {
        index,
        replace: None,
    }
}

/// Drives acquire, record, submit and present, freeing each frame slot's
/// command buffers only after its fence has been waited on.
pub struct FrameLoop {
    pending: Vec<Vec<vk::CommandBuffer>>,
}

impl FrameLoop {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: vec![Vec::new(); frames_in_flight],
        }
    }

    fn record(backend: &mut Backend<MockDriver>, pipeline: SlotIndex) -> Result<vk::CommandBuffer> {
        let cmd = backend.begin_draw_command_buffer()?;
        backend.bind_pipeline(cmd, pipeline)?;
        backend.end_draw_command_buffer(cmd)?;
        Ok(cmd)
    }

    fn reclaim(&mut self, backend: &mut Backend<MockDriver>, frame_index: usize) -> Result<()> {
        backend.wait_for_frame(frame_index)?;
        for cmd in self.pending[frame_index].drain(..) {
            backend.destroy_draw_command_buffer(cmd)?;
        }
        Ok(())
    }

    /// Render one frame. Returns the acquired image, or `None` if the frame
    /// was skipped because the swapchain was rebuilt.
    pub fn render(
        &mut self,
        backend: &mut Backend<MockDriver>,
        pipeline: SlotIndex,
    ) -> Result<Option<AcquiredImage>> {
        let Some(acquired) = backend.acquire_next_image()? else {
            return Ok(None);
        };
        self.reclaim(backend, acquired.frame_index)?;

        if backend.config().shadow_pass {
            let shadow = Self::record(backend, pipeline)?;
            self.pending[acquired.frame_index].push(shadow);
            backend.draw(shadow, DrawPass::Shadow)?;
            backend.copy_depth_to_shadow_image()?;
        }

        let cmd = Self::record(backend, pipeline)?;
        self.pending[acquired.frame_index].push(cmd);
        backend.draw(cmd, DrawPass::Main)?;
        backend.present_next_image()?;
        Ok(Some(acquired))
    }

    /// Free every outstanding command buffer.
    pub fn release(&mut self, backend: &mut Backend<MockDriver>) -> Result<()> {
        for frame_index in 0..self.pending.len() {
            self.reclaim(backend, frame_index)?;
        }
        Ok(())
    }
}

pub fn count(driver: &MockDriver, matches: impl Fn(&MockCall) -> bool) -> usize {
    driver.calls().iter().filter(|call| matches(call)).count()
}

pub fn assert_clean(driver: &MockDriver) {
    assert!(
        driver.violations().is_empty(),
        "driver violations: {:#?}",
        driver.violations()
    );
    assert!(
        driver.is_clean(),
        "{} objects still alive after shutdown",
        driver.live_count()
    );
}
