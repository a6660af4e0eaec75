//! Command buffer management.

use crate::driver::{Driver, RenderPassBegin, SubmitInfo};
use crate::error::Result;
use ash::vk;

/// Command pool for allocating command buffers.
#[derive(Debug, Clone, Copy)]
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool on `queue_family`.
    pub fn new<D: Driver>(driver: &mut D, queue_family: u32) -> Result<Self> {
        let pool = driver.create_command_pool(queue_family)?;
        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single primary command buffer.
    pub fn allocate<D: Driver>(&self, driver: &mut D) -> Result<vk::CommandBuffer> {
        Ok(driver.allocate_command_buffer(self.pool)?)
    }

    pub fn free<D: Driver>(&self, driver: &mut D, cmd: vk::CommandBuffer) {
        driver.free_command_buffer(self.pool, cmd);
    }

    /// Destroy the command pool.
    ///
    /// Command buffers allocated from it are released with it.
    pub fn destroy<D: Driver>(&self, driver: &mut D) {
        driver.destroy_command_pool(self.pool);
    }
}

/// Execute a single-time command buffer.
///
/// Records through `record`, submits without a fence and waits for the
/// device to go idle before freeing the buffer.
pub fn execute_single_time_commands<D, F>(
    driver: &mut D,
    pool: &CommandPool,
    queue: vk::Queue,
    record: F,
) -> Result<()>
where
    D: Driver,
    F: FnOnce(&mut D, vk::CommandBuffer),
{
    let cmd = pool.allocate(driver)?;
    let result = submit_and_wait(driver, cmd, queue, record);
    pool.free(driver, cmd);
    result
}

fn submit_and_wait<D, F>(driver: &mut D, cmd: vk::CommandBuffer, queue: vk::Queue, record: F) -> Result<()>
where
    D: Driver,
    F: FnOnce(&mut D, vk::CommandBuffer),
{
    driver.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
    record(driver, cmd);
    driver.end_command_buffer(cmd)?;

    let submitted = driver.queue_submit(queue, &SubmitInfo::standalone(cmd), vk::Fence::null());
    // Wait even after a failed submit so the buffer is never freed while in flight.
    let idle = driver.device_wait_idle();
    submitted?;
    idle?;
    Ok(())
}

/// Framebuffer and render pass a draw command buffer renders into.
#[derive(Debug, Clone, Copy)]
pub struct DrawTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

/// Allocate a primary command buffer and begin the render pass on `target`.
///
/// Color is cleared to `clear_color` and depth to 1.0.
pub fn begin_draw<D: Driver>(
    driver: &mut D,
    pool: &CommandPool,
    target: &DrawTarget,
    clear_color: [f32; 4],
) -> Result<vk::CommandBuffer> {
    let cmd = pool.allocate(driver)?;
    if let Err(e) = driver.begin_command_buffer(cmd, vk::CommandBufferUsageFlags::empty()) {
        pool.free(driver, cmd);
        return Err(e.into());
    }

    let begin = RenderPassBegin {
        render_pass: target.render_pass,
        framebuffer: target.framebuffer,
        extent: target.extent,
        clear_values: vec![
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ],
    };
    driver.cmd_begin_render_pass(cmd, &begin);
    Ok(cmd)
}

/// End the render pass and finish recording.
pub fn end_draw<D: Driver>(driver: &mut D, cmd: vk::CommandBuffer) -> Result<()> {
    driver.cmd_end_render_pass(cmd);
    driver.end_command_buffer(cmd)?;
    Ok(())
}

/// Record a clear of the depth attachment to 1.0 over `extent`.
pub fn clear_depth<D: Driver>(driver: &mut D, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    let attachment = vk::ClearAttachment {
        aspect_mask: vk::ImageAspectFlags::DEPTH,
        color_attachment: 0,
        clear_value: vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    };
    let rect = vk::ClearRect {
        rect: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
        base_array_layer: 0,
        layer_count: 1,
    };
    driver.cmd_clear_attachments(cmd, attachment, rect);
}
