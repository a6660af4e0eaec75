//! The owning frame backend.
//!
//! [`Backend`] holds the instance, device, command pool, swapchain, pipeline
//! registry and frame synchronization for one surface. Callers drive it in a
//! fixed order:
//!
//! 1. [`create_instance`](Backend::create_instance)
//! 2. [`init`](Backend::init)
//! 3. [`set_width_height`](Backend::set_width_height) and
//!    [`create_swapchain`](Backend::create_swapchain)
//! 4. [`create_pipeline`](Backend::create_pipeline), once per pipeline
//! 5. [`create_sync_objects`](Backend::create_sync_objects)
//! 6. per frame: acquire, record, [`draw`](Backend::draw),
//!    [`present_next_image`](Backend::present_next_image)
//!
//! An out-of-date or suboptimal swapchain reported by acquire or present is
//! never surfaced as an error. The swapchain and every live pipeline are
//! rebuilt in place and the frame is skipped.

use crate::command::{self, CommandPool, DrawTarget};
use crate::config::BackendConfig;
use crate::device::{self, DeviceContext};
use crate::driver::{Driver, ImageInfo, SubmitInfo};
use crate::error::{GpuError, Result};
use crate::instance::{self, InstanceState};
use crate::layout;
use crate::memory::{self, GpuBuffer, GpuImage};
use crate::pipeline::{
    PipelineRegistry, PipelineRequest, PipelineSlot, PipelineTarget, SlotIndex,
};
use crate::shader::{FileShaderLoader, ShaderLoader};
use crate::swapchain::{Swapchain, SwapchainRequest};
use crate::sync::{self, FrameSynchronizer};
use ash::vk;

/// Which pass a draw submission belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawPass {
    /// Depth-only pass rendered before the shadow copy. Requires the shadow pass.
    Shadow,
    /// The pass whose output is presented.
    Main,
}

/// A successfully acquired swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    /// Index into the swapchain images.
    pub image_index: u32,
    /// Frame slot whose sync objects this frame uses.
    pub frame_index: usize,
}

fn not_ready(what: &str) -> GpuError {
    GpuError::InvalidState(format!("{what} has not been created"))
}

/// Owning Vulkan frame backend.
pub struct Backend<D: Driver> {
    driver: D,
    config: BackendConfig,
    shader_loader: Box<dyn ShaderLoader>,
    instance: Option<InstanceState>,
    device: Option<DeviceContext>,
    pool: Option<CommandPool>,
    transfer_pool: Option<CommandPool>,
    frames_in_flight: usize,
    width: u32,
    height: u32,
    swapchain: Option<Swapchain>,
    pipelines: PipelineRegistry,
    /// Slots invalidated by a rebuild that have not been rebuilt yet.
    pending_rebuild: Vec<SlotIndex>,
    sync: Option<FrameSynchronizer>,
    acquired: Option<u32>,
    shadow_layout_stale: bool,
    recreations: usize,
}

impl<D: Driver> Backend<D> {
    /// Create a backend over `driver`. No Vulkan objects are created yet.
    pub fn new(driver: D, config: BackendConfig) -> Self {
        Self {
            driver,
            config,
            shader_loader: Box::new(FileShaderLoader),
            instance: None,
            device: None,
            pool: None,
            transfer_pool: None,
            frames_in_flight: 0,
            width: 0,
            height: 0,
            swapchain: None,
            pipelines: PipelineRegistry::new(),
            pending_rebuild: Vec::new(),
            sync: None,
            acquired: None,
            shadow_layout_stale: false,
            recreations: 0,
        }
    }

    /// Replace the shader loader used for pipeline creation.
    #[must_use]
    pub fn with_shader_loader(mut self, loader: impl ShaderLoader + 'static) -> Self {
        self.shader_loader = Box::new(loader);
        self
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Set the color the render pass clears to.
    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.config.clear_color = color;
    }

    pub fn device(&self) -> Option<&DeviceContext> {
        self.device.as_ref()
    }

    pub fn swapchain(&self) -> Option<&Swapchain> {
        self.swapchain.as_ref()
    }

    pub fn pipelines(&self) -> &PipelineRegistry {
        &self.pipelines
    }

    pub fn pipeline_slot(&self, index: SlotIndex) -> Option<&PipelineSlot> {
        self.pipelines.slot(index)
    }

    /// Current frame slot, if sync objects exist.
    pub fn frame_index(&self) -> Option<usize> {
        self.sync.as_ref().map(FrameSynchronizer::frame_index)
    }

    /// Image index returned by the last successful acquire.
    pub fn acquired_image(&self) -> Option<u32> {
        self.acquired
    }

    /// How many times the swapchain has been rebuilt after going stale.
    pub fn recreation_count(&self) -> usize {
        self.recreations
    }

    // Bootstrap

    /// Create the instance with `extensions`, which must all be supported.
    pub fn create_instance(&mut self, extensions: &[&str]) -> Result<()> {
        if self.instance.is_some() {
            return Err(GpuError::InvalidState("Instance already created".to_string()));
        }
        let state = instance::create_instance(&mut self.driver, &self.config, extensions)?;
        self.instance = Some(state);
        Ok(())
    }

    /// Select a physical device and queues, create the logical device and
    /// the command pool.
    pub fn init(&mut self, frames_in_flight: usize) -> Result<()> {
        let instance = self.instance.as_ref().ok_or_else(|| not_ready("Instance"))?;
        if self.device.is_some() {
            return Err(GpuError::InvalidState("Device already initialized".to_string()));
        }

        let choice = device::select_physical_device(&self.driver)?;
        let families = device::select_queue_families(
            &self.driver,
            choice.physical_device,
            self.config.shadow_pass,
        )?;
        let context =
            device::create_logical_device(&mut self.driver, choice, families, &instance.layers)?;

        let pool = match CommandPool::new(&mut self.driver, families.graphics) {
            Ok(pool) => pool,
            Err(e) => {
                tracing::error!("Could not create command pool: {e}");
                self.driver.destroy_device();
                return Err(e);
            }
        };
        tracing::debug!("Command pool created");

        // The shadow copy buffer must come from a pool on the queue it is submitted to.
        let transfer_pool = if families.transfer == families.graphics {
            None
        } else {
            match CommandPool::new(&mut self.driver, families.transfer) {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::error!("Could not create transfer command pool: {e}");
                    pool.destroy(&mut self.driver);
                    self.driver.destroy_device();
                    return Err(e);
                }
            }
        };

        self.frames_in_flight = frames_in_flight;
        self.device = Some(context);
        self.pool = Some(pool);
        self.transfer_pool = transfer_pool;
        Ok(())
    }

    // Swapchain

    /// Set the size used by the next swapchain creation or rebuild.
    pub fn set_width_height(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn swapchain_request(&self) -> SwapchainRequest {
        SwapchainRequest {
            width: self.width,
            height: self.height,
            vsync: self.config.vsync,
            shadow_pass: self.config.shadow_pass,
            transfer_pool: self.transfer_pool,
        }
    }

    /// Create the swapchain.
    ///
    /// Pipelines invalidated by an earlier failed [`recreate`](Self::recreate)
    /// are rebuilt against it. If that rebuild fails the swapchain is kept.
    pub fn create_swapchain(&mut self) -> Result<()> {
        if self.swapchain.is_some() {
            return Err(GpuError::InvalidState("Swapchain already created".to_string()));
        }
        let device = self.device.as_ref().ok_or_else(|| not_ready("Device"))?;
        let pool = self.pool.ok_or_else(|| not_ready("Command pool"))?;
        let request = self.swapchain_request();
        let swapchain = Swapchain::new(&mut self.driver, device, &pool, request)?;
        self.swapchain = Some(swapchain);
        self.rebuild_pending_pipelines()
    }

    fn rebuild_pending_pipelines(&mut self) -> Result<()> {
        if self.pending_rebuild.is_empty() {
            return Ok(());
        }
        // Slots reused by the caller in the meantime are already live.
        let pending: Vec<SlotIndex> = std::mem::take(&mut self.pending_rebuild)
            .into_iter()
            .filter(|&index| self.pipelines.live(index).is_none())
            .collect();
        let target = self.pipeline_target()?;
        let rebuilt =
            self.pipelines
                .rebuild(&mut self.driver, self.shader_loader.as_ref(), target, &pending);
        self.pending_rebuild = pending
            .into_iter()
            .filter(|&index| self.pipelines.live(index).is_none())
            .collect();
        if !self.pending_rebuild.is_empty() {
            tracing::warn!(
                count = self.pending_rebuild.len(),
                "Pipelines left for the next rebuild"
            );
        }
        rebuilt
    }

    /// Wait for the device to go idle and destroy the swapchain.
    pub fn destroy_swapchain(&mut self) -> Result<()> {
        let Some(mut swapchain) = self.swapchain.take() else {
            return Ok(());
        };
        let idle = self.driver.device_wait_idle();
        swapchain.destroy(&mut self.driver);
        self.acquired = None;
        idle?;
        Ok(())
    }

    /// Rebuild the swapchain and every live pipeline.
    ///
    /// Deleted pipeline slots stay deleted. Pipelines that could not be
    /// rebuilt because a step failed are retried by the next successful
    /// swapchain creation.
    pub fn recreate(&mut self) -> Result<()> {
        tracing::info!(
            width = self.width,
            height = self.height,
            "Recreating swapchain and pipelines"
        );
        self.driver.device_wait_idle()?;

        for index in self.pipelines.invalidate_live(&mut self.driver) {
            if !self.pending_rebuild.contains(&index) {
                self.pending_rebuild.push(index);
            }
        }
        self.destroy_swapchain()?;
        self.shadow_layout_stale = true;
        self.create_swapchain()?;
        self.recreations += 1;
        Ok(())
    }

    // Pipelines

    fn pipeline_target(&self) -> Result<PipelineTarget> {
        let swapchain = self.swapchain.as_ref().ok_or_else(|| not_ready("Swapchain"))?;
        Ok(PipelineTarget {
            render_pass: swapchain.render_pass,
            extent: swapchain.extent,
        })
    }

    /// Build a pipeline against the current swapchain.
    pub fn create_pipeline(&mut self, request: PipelineRequest) -> Result<SlotIndex> {
        let target = self.pipeline_target()?;
        let index = self
            .pipelines
            .create(&mut self.driver, self.shader_loader.as_ref(), target, request)
            .map_err(|e| {
                tracing::error!("Pipeline creation failed: {e}");
                e
            })?;
        self.shadow_layout_stale = true;
        Ok(index)
    }

    /// Destroy the pipeline in `index`, keeping its source for reuse.
    ///
    /// Waits for the device to go idle first if the slot is live.
    pub fn destroy_pipeline(&mut self, index: SlotIndex) -> Result<()> {
        if self.pipelines.live(index).is_some() {
            self.driver.device_wait_idle()?;
        }
        self.pipelines.destroy(&mut self.driver, index)
    }

    // Frame synchronization

    pub fn create_sync_objects(&mut self) -> Result<()> {
        if self.device.is_none() {
            return Err(not_ready("Device"));
        }
        if self.sync.is_some() {
            return Err(GpuError::InvalidState("Sync objects already created".to_string()));
        }
        let sync = FrameSynchronizer::new(
            &mut self.driver,
            self.frames_in_flight,
            self.config.shadow_pass,
        )?;
        self.sync = Some(sync);
        Ok(())
    }

    pub fn destroy_sync_objects(&mut self) -> Result<()> {
        let Some(sync) = self.sync.take() else {
            return Ok(());
        };
        let idle = self.driver.device_wait_idle();
        sync.destroy(&mut self.driver);
        idle?;
        Ok(())
    }

    /// Block until the last submission of frame slot `frame_index` has completed.
    ///
    /// Command buffers submitted for that slot may be freed afterwards.
    pub fn wait_for_frame(&mut self, frame_index: usize) -> Result<()> {
        let sync = self.sync.as_ref().ok_or_else(|| not_ready("Sync objects"))?;
        let fence = sync
            .frame(frame_index)
            .ok_or_else(|| GpuError::InvalidState(format!("No frame slot {frame_index}")))?
            .fence;
        sync::wait_for_fence(&mut self.driver, fence)
    }

    /// Advance the frame slot and acquire the next swapchain image.
    ///
    /// Returns `Ok(None)` if the swapchain was out of date; it has been
    /// rebuilt and the frame should be skipped.
    pub fn acquire_next_image(&mut self) -> Result<Option<AcquiredImage>> {
        let sync = self.sync.as_mut().ok_or_else(|| not_ready("Sync objects"))?;
        let swapchain = self.swapchain.as_ref().ok_or_else(|| not_ready("Swapchain"))?;

        let frame_index = sync.advance();
        let semaphore = sync.current().acquire;
        self.acquired = None;

        match self.driver.acquire_next_image(swapchain.swapchain, semaphore) {
            Ok((image_index, suboptimal)) => {
                if suboptimal {
                    tracing::debug!("Acquired image from a suboptimal swapchain");
                }
                self.acquired = Some(image_index);
                Ok(Some(AcquiredImage {
                    image_index,
                    frame_index,
                }))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                tracing::warn!("Swapchain out of date while acquiring next image");
                self.recreate()?;
                Ok(None)
            }
            Err(e) => {
                tracing::error!("Could not acquire swapchain image: {e}");
                Err(e.into())
            }
        }
    }

    // Command recording

    /// Allocate a command buffer and begin the render pass on the acquired image.
    pub fn begin_draw_command_buffer(&mut self) -> Result<vk::CommandBuffer> {
        let image_index = self
            .acquired
            .ok_or_else(|| GpuError::InvalidState("No swapchain image acquired".to_string()))?;
        let pool = self.pool.ok_or_else(|| not_ready("Command pool"))?;
        let device = self.device.as_ref().ok_or_else(|| not_ready("Device"))?;
        let swapchain = self.swapchain.as_ref().ok_or_else(|| not_ready("Swapchain"))?;

        if self.config.shadow_pass {
            // The shadow copy leaves the depth image in TRANSFER_SRC.
            layout::transition_image_layout(
                &mut self.driver,
                &pool,
                device.graphics_queue,
                swapchain.depth.image,
                swapchain.depth.format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                true,
            )?;
        }

        let framebuffer = *swapchain
            .framebuffers
            .get(image_index as usize)
            .ok_or_else(|| GpuError::InvalidState(format!("No framebuffer for image {image_index}")))?;
        let target = DrawTarget {
            render_pass: swapchain.render_pass,
            framebuffer,
            extent: swapchain.extent,
        };
        command::begin_draw(&mut self.driver, &pool, &target, self.config.clear_color).map_err(|e| {
            tracing::error!("Could not begin draw command buffer: {e}");
            e
        })
    }

    /// Bind the live pipeline in `index` to `cmd`.
    pub fn bind_pipeline(&mut self, cmd: vk::CommandBuffer, index: SlotIndex) -> Result<()> {
        let live = self.pipelines.live(index).ok_or_else(|| {
            GpuError::InvalidPipelineSlot(format!("pipeline {index} is not live"))
        })?;
        self.driver.cmd_bind_pipeline(cmd, live.pipeline);
        Ok(())
    }

    /// Bind `buffer` as vertex binding 0.
    pub fn bind_vertex_buffer(&mut self, cmd: vk::CommandBuffer, buffer: &GpuBuffer) -> Result<()> {
        if !buffer.usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
            return Err(GpuError::Other(format!(
                "Buffer {:?} was not created with VERTEX_BUFFER usage",
                buffer.buffer
            )));
        }
        self.driver.cmd_bind_vertex_buffer(cmd, buffer.buffer);
        Ok(())
    }

    /// Record a non-indexed draw of `vertex_count` vertices, one instance.
    pub fn draw_vertices(&mut self, cmd: vk::CommandBuffer, vertex_count: u32) {
        self.driver.cmd_draw(cmd, vertex_count);
    }

    /// Record a depth clear over the whole swap extent.
    pub fn clear_depth_attachment(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        let extent = self
            .swapchain
            .as_ref()
            .ok_or_else(|| not_ready("Swapchain"))?
            .extent;
        command::clear_depth(&mut self.driver, cmd, extent);
        Ok(())
    }

    pub fn end_draw_command_buffer(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        command::end_draw(&mut self.driver, cmd)
    }

    /// Free a draw command buffer.
    ///
    /// Its frame slot must have been waited on with
    /// [`wait_for_frame`](Self::wait_for_frame).
    pub fn destroy_draw_command_buffer(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        let pool = self.pool.ok_or_else(|| not_ready("Command pool"))?;
        pool.free(&mut self.driver, cmd);
        Ok(())
    }

    // Submission and presentation

    /// Submit `cmd` for the current frame slot.
    ///
    /// Waits for the slot's fence first and resets it right before the submit.
    /// If the submit fails the slot's sync objects are replaced so the next
    /// frame on it does not block.
    ///
    /// A shadow submission waits on image acquisition and signals the shadow
    /// semaphore; the main submission waits on the shadow semaphore if a
    /// shadow pass was submitted this frame, otherwise on image acquisition.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn draw(&mut self, cmd: vk::CommandBuffer, pass: DrawPass) -> Result<()> {
        let graphics_queue = self
            .device
            .as_ref()
            .ok_or_else(|| not_ready("Device"))?
            .graphics_queue;
        let sync = self.sync.as_ref().ok_or_else(|| not_ready("Sync objects"))?;
        let frame = *sync.current();

        let (wait, signal) = match pass {
            DrawPass::Shadow => {
                let draw_shadow = frame.draw_shadow.ok_or_else(|| {
                    GpuError::InvalidState("Shadow pass is not enabled".to_string())
                })?;
                (frame.acquire, draw_shadow)
            }
            DrawPass::Main => match frame.draw_shadow {
                Some(draw_shadow) if sync.shadow_submitted() => (draw_shadow, frame.draw),
                _ => (frame.acquire, frame.draw),
            },
        };

        sync::wait_for_fence(&mut self.driver, frame.fence)?;

        let submit = SubmitInfo {
            command_buffer: cmd,
            wait_semaphore: Some(wait),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: Some(signal),
        };
        if let Err(e) = self.submit_frame(graphics_queue, &submit, frame.fence) {
            tracing::error!("Could not submit draw command buffer: {e}");
            // The wait semaphore is still signaled and the fence may be unsignaled.
            if let Some(sync) = self.sync.as_mut() {
                sync.replace_current(&mut self.driver)?;
            }
            return Err(e);
        }

        if let Some(sync) = self.sync.as_mut() {
            sync.set_shadow_submitted(pass == DrawPass::Shadow);
        }
        Ok(())
    }

    /// Reset `fence` and submit, after any pending shadow layout refresh.
    ///
    /// The fence is only reset once nothing else can fail before the submit.
    fn submit_frame(&mut self, queue: vk::Queue, submit: &SubmitInfo, fence: vk::Fence) -> Result<()> {
        if self.shadow_layout_stale {
            self.refresh_shadow_layout()?;
        }
        self.driver.reset_fence(fence)?;
        self.driver.queue_submit(queue, submit, fence)?;
        Ok(())
    }

    /// Move the shadow image to a sampleable layout after pipelines changed.
    fn refresh_shadow_layout(&mut self) -> Result<()> {
        let Some(shadow) = self.swapchain.as_ref().and_then(|s| s.shadow) else {
            self.shadow_layout_stale = false;
            return Ok(());
        };
        let pool = self.pool.ok_or_else(|| not_ready("Command pool"))?;
        let queue = self
            .device
            .as_ref()
            .ok_or_else(|| not_ready("Device"))?
            .graphics_queue;
        layout::transition_image_layout(
            &mut self.driver,
            &pool,
            queue,
            shadow.image.image,
            shadow.image.format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            true,
        )?;
        self.shadow_layout_stale = false;
        Ok(())
    }

    /// Present the acquired image once the current frame's main pass is done.
    pub fn present_next_image(&mut self) -> Result<()> {
        let image_index = self
            .acquired
            .take()
            .ok_or_else(|| GpuError::InvalidState("No swapchain image acquired".to_string()))?;
        let present_queue = self
            .device
            .as_ref()
            .ok_or_else(|| not_ready("Device"))?
            .present_queue;
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or_else(|| not_ready("Swapchain"))?
            .swapchain;
        let wait = self
            .sync
            .as_ref()
            .ok_or_else(|| not_ready("Sync objects"))?
            .current()
            .draw;

        match self
            .driver
            .queue_present(present_queue, swapchain, image_index, wait)
        {
            Ok(false) => Ok(()),
            Ok(true) => {
                tracing::debug!("Swapchain suboptimal while presenting");
                self.recreate()
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                tracing::warn!("Swapchain out of date while presenting");
                self.recreate()
            }
            Err(e) => {
                tracing::error!("Could not present swapchain image: {e}");
                Err(e.into())
            }
        }
    }

    /// Copy the depth attachment into the shadow image on the transfer queue.
    ///
    /// Blocks on the current frame's fence before and after the copy. The
    /// shadow image ends up in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn copy_depth_to_shadow_image(&mut self) -> Result<()> {
        if !self.config.shadow_pass {
            return Err(GpuError::InvalidState("Shadow pass is not enabled".to_string()));
        }
        let pool = self.pool.ok_or_else(|| not_ready("Command pool"))?;
        let device = self.device.as_ref().ok_or_else(|| not_ready("Device"))?;
        let swapchain = self.swapchain.as_ref().ok_or_else(|| not_ready("Swapchain"))?;
        let shadow = swapchain.shadow.ok_or_else(|| not_ready("Shadow image"))?;
        let depth = swapchain.depth;
        let fence = self
            .sync
            .as_ref()
            .ok_or_else(|| not_ready("Sync objects"))?
            .current()
            .fence;
        let (graphics_queue, transfer_queue) = (device.graphics_queue, device.transfer_queue);

        sync::wait_for_fence(&mut self.driver, fence)?;

        layout::transition_image_layout(
            &mut self.driver,
            &pool,
            graphics_queue,
            depth.image,
            depth.format,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            true,
        )?;
        // From here on the shadow image is not sampleable until a copy lands.
        self.shadow_layout_stale = true;
        layout::transition_image_layout(
            &mut self.driver,
            &pool,
            graphics_queue,
            shadow.image.image,
            shadow.image.format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            true,
        )?;

        self.driver.reset_fence(fence)?;
        let submitted =
            self.driver
                .queue_submit(transfer_queue, &SubmitInfo::standalone(shadow.copy_cmd), fence);
        if let Err(e) = submitted {
            tracing::error!("Could not submit shadow copy: {e}");
            // The shadow semaphore of this frame is still signaled.
            if let Some(sync) = self.sync.as_mut() {
                sync.replace_current(&mut self.driver)?;
            }
            return Err(e.into());
        }
        sync::wait_for_fence(&mut self.driver, fence)?;

        layout::transition_image_layout(
            &mut self.driver,
            &pool,
            graphics_queue,
            shadow.image.image,
            shadow.image.format,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            true,
        )?;
        self.shadow_layout_stale = false;
        Ok(())
    }

    // Resources

    /// Create a buffer backed by memory with `properties`.
    pub fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        let device = self.device.as_ref().ok_or_else(|| not_ready("Device"))?;
        memory::create_buffer(
            &mut self.driver,
            &device.memory_properties,
            size,
            usage,
            properties,
        )
    }

    pub fn destroy_buffer(&mut self, buffer: &GpuBuffer) {
        memory::destroy_buffer(&mut self.driver, buffer);
    }

    /// Upload `data` into a host-visible buffer.
    pub fn write_buffer<T: bytemuck::Pod>(&mut self, buffer: &GpuBuffer, data: &[T]) -> Result<()> {
        memory::write_buffer(&mut self.driver, buffer, data)
    }

    /// Copy `size` bytes between buffers and wait for completion.
    pub fn copy_buffer(&mut self, src: &GpuBuffer, dst: &GpuBuffer, size: vk::DeviceSize) -> Result<()> {
        let pool = self.pool.ok_or_else(|| not_ready("Command pool"))?;
        let queue = self
            .device
            .as_ref()
            .ok_or_else(|| not_ready("Device"))?
            .graphics_queue;
        memory::copy_buffer(&mut self.driver, &pool, queue, src.buffer, dst.buffer, size)
    }

    /// Create a 2D image backed by memory with `properties`.
    pub fn create_image(
        &mut self,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuImage> {
        let device = self.device.as_ref().ok_or_else(|| not_ready("Device"))?;
        let info = ImageInfo {
            extent: vk::Extent2D { width, height },
            format,
            tiling,
            usage,
        };
        memory::create_image(&mut self.driver, &device.memory_properties, &info, properties)
    }

    pub fn destroy_image(&mut self, image: &GpuImage) {
        memory::destroy_image(&mut self.driver, image);
    }

    /// Copy buffer texels into an image in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(&mut self, buffer: &GpuBuffer, image: &GpuImage) -> Result<()> {
        let pool = self.pool.ok_or_else(|| not_ready("Command pool"))?;
        let queue = self
            .device
            .as_ref()
            .ok_or_else(|| not_ready("Device"))?
            .graphics_queue;
        memory::copy_buffer_to_image(
            &mut self.driver,
            &pool,
            queue,
            buffer.buffer,
            image.image,
            image.extent,
        )
    }

    /// Transition `image` between two supported layouts and wait for completion.
    pub fn transition_image_layout(
        &mut self,
        image: &GpuImage,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        only_depth: bool,
    ) -> Result<()> {
        let pool = self.pool.ok_or_else(|| not_ready("Command pool"))?;
        let queue = self
            .device
            .as_ref()
            .ok_or_else(|| not_ready("Device"))?
            .graphics_queue;
        layout::transition_image_layout(
            &mut self.driver,
            &pool,
            queue,
            image.image,
            image.format,
            old,
            new,
            only_depth,
        )
    }

    pub fn create_image_view(
        &mut self,
        image: &GpuImage,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        memory::create_image_view(&mut self.driver, image.image, image.format, aspect)
    }

    pub fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.driver.destroy_image_view(view);
    }

    /// Create a linear sampler with `address_mode` on all axes.
    pub fn create_sampler(&mut self, address_mode: vk::SamplerAddressMode) -> Result<vk::Sampler> {
        Ok(self.driver.create_sampler(&memory::sampler_info(address_mode))?)
    }

    pub fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        self.driver.destroy_sampler(sampler);
    }

    // Shutdown

    /// Destroy everything the backend owns, in reverse creation order.
    ///
    /// Teardown always runs to completion; an error from the initial idle wait
    /// is returned afterwards. Calling it again is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        let mut idle = Ok(());
        if self.device.is_some() {
            idle = self.driver.device_wait_idle();
            if let Err(e) = idle {
                tracing::warn!("Device did not go idle before shutdown: {e}");
            }

            self.pipelines.shutdown(&mut self.driver);
            self.pending_rebuild.clear();
            if let Some(sync) = self.sync.take() {
                sync.destroy(&mut self.driver);
            }
            if let Some(mut swapchain) = self.swapchain.take() {
                swapchain.destroy(&mut self.driver);
            }
            if let Some(pool) = self.transfer_pool.take() {
                pool.destroy(&mut self.driver);
            }
            if let Some(pool) = self.pool.take() {
                pool.destroy(&mut self.driver);
            }
            self.driver.destroy_device();
            self.device = None;
            self.acquired = None;
        }

        if let Some(instance) = self.instance.take() {
            if let Some(callback) = instance.debug_callback {
                self.driver.destroy_debug_callback(callback);
            }
            self.driver.destroy_instance();
            tracing::info!("Backend shut down");
        }

        idle.map_err(GpuError::from)
    }
}

impl<D: Driver> Drop for Backend<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Error while dropping backend: {e}");
        }
    }
}
