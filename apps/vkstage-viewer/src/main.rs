//! vkstage demo viewer
//!
//! Opens a window and drives the frame backend through its documented call
//! order: instance, surface, device, swapchain, pipeline, sync objects, then
//! the per-frame acquire/record/submit/present loop. Draws a slowly rotating
//! triangle over an animated clear color.
//!
//! ## Usage
//!
//! ```bash
//! glslc apps/vkstage-viewer/shaders/triangle.vert -o apps/vkstage-viewer/shaders/triangle.vert.spv
//! glslc apps/vkstage-viewer/shaders/triangle.frag -o apps/vkstage-viewer/shaders/triangle.frag.spv
//! cargo run -p vkstage-viewer -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod config;

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat2, Vec2, Vec3};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use vkstage_gpu::{
    AshDriver, Backend, BackendBuilder, DrawPass, FileShaderLoader, GpuBuffer, PipelineConfigurator,
    PipelineRequest, PipelineSource, SlotIndex, VertexInputLayout,
};

use crate::config::ViewerConfig;

/// Clear color at the start and midpoint of the animation.
const CLEAR_FROM: Vec3 = Vec3::new(0.02, 0.02, 0.05);
const CLEAR_TO: Vec3 = Vec3::new(0.10, 0.12, 0.25);

/// Triangle rotation speed in radians per second.
const SPIN_SPEED: f32 = 0.6;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct Vertex {
    position: Vec2,
    color: Vec3,
}

/// Counter-clockwise in framebuffer space, so it survives back-face culling.
const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: Vec2::new(0.0, -0.5),
        color: Vec3::new(1.0, 0.2, 0.2),
    },
    Vertex {
        position: Vec2::new(-0.5, 0.5),
        color: Vec3::new(0.2, 0.2, 1.0),
    },
    Vertex {
        position: Vec2::new(0.5, 0.5),
        color: Vec3::new(0.2, 1.0, 0.2),
    },
];

/// Vertex layout of [`Vertex`] at binding 0.
struct TriangleLayout;

impl PipelineConfigurator for TriangleLayout {
    fn vertex_input(&self, layout: &mut VertexInputLayout) -> vkstage_gpu::Result<()> {
        layout.bindings.push(vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        layout.attributes.extend([
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, color) as u32,
            },
        ]);
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let config = ViewerConfig::from_args()?;
    if config.help {
        print_help();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("vkstage viewer starting...");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = ViewerRunner {
        config,
        state: None,
    };
    event_loop.run_app(&mut runner)?;

    Ok(())
}

fn print_help() {
    eprintln!(
        "vkstage demo viewer

USAGE:
    cargo run -p vkstage-viewer -- [OPTIONS]

OPTIONS:
    --vertex <PATH>           Vertex shader SPIR-V
                              Default: apps/vkstage-viewer/shaders/triangle.vert.spv
    --fragment <PATH>         Fragment shader SPIR-V
                              Default: apps/vkstage-viewer/shaders/triangle.frag.spv
    --width <N>               Initial window width (default: 1280)
    --height <N>              Initial window height (default: 720)
    --frames-in-flight <N>    Frames recorded ahead of the GPU (default: 2)
    --shadows                 Render a shadow pass and copy its depth
    --vsync                   Force FIFO presentation
    --validation              Enable validation layers (default in debug builds)
    --no-validation           Disable validation layers
    -h, --help                Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                  Set log level (e.g., info, debug, trace)"
    );
}

struct ViewerRunner {
    config: ViewerConfig,
    state: Option<ViewerState>,
}

/// Everything that exists while the window is open.
///
/// `backend` is declared before `window` so it is dropped first: the surface
/// must go before the window it was created for.
struct ViewerState {
    backend: Backend<AshDriver>,
    window: Arc<Window>,
    pipeline: SlotIndex,
    /// One vertex buffer per frame slot, rewritten once the slot is free.
    vertex_buffers: Vec<GpuBuffer>,
    /// Command buffers submitted from each frame slot, freed on its next turn.
    pending: Vec<Vec<vk::CommandBuffer>>,
    shadows: bool,
    started: Instant,
    frames: u64,
}

impl ApplicationHandler for ViewerRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match ViewerState::new(event_loop, &self.config) {
            Ok(state) => {
                self.state = Some(state);
                info!("Viewer ready");
            }
            Err(e) => {
                error!("Failed to initialize viewer: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.render_frame() {
                        error!("Render error: {e:#}");
                        if let Some(mut state) = self.state.take() {
                            state.cleanup();
                        }
                        event_loop.exit();
                    }
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size) {
                        error!("Resize error: {e:#}");
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

impl ViewerState {
    fn new(event_loop: &ActiveEventLoop, config: &ViewerConfig) -> anyhow::Result<Self> {
        let window_attrs = Window::default_attributes()
            .with_title("vkstage viewer")
            .with_inner_size(PhysicalSize::new(config.width, config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let extensions = AshDriver::required_window_extensions(window.as_ref())?;
        let extensions: Vec<&str> = extensions.iter().map(String::as_str).collect();

        let mut backend = BackendBuilder::new()
            .app_name("vkstage viewer")
            .validation(config.validation)
            .shadow_pass(config.shadows)
            .vsync(config.vsync)
            .build(AshDriver::load()?)
            .with_shader_loader(FileShaderLoader);

        backend.create_instance(&extensions)?;
        backend.driver_mut().attach_window(window.as_ref())?;
        backend.init(config.frames_in_flight)?;

        let size = window.inner_size();
        backend.set_width_height(size.width, size.height);
        backend.create_swapchain()?;

        let source = PipelineSource::new(config.vertex_shader.clone(), config.fragment_shader.clone())
            .with_configurator(Arc::new(TriangleLayout));
        let pipeline = backend.create_pipeline(PipelineRequest::New(source))?;
        backend.create_sync_objects()?;

        let mut vertex_buffers = Vec::with_capacity(config.frames_in_flight);
        for _ in 0..config.frames_in_flight {
            let buffer = backend.create_buffer(
                std::mem::size_of_val(&TRIANGLE) as vk::DeviceSize,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )?;
            backend.write_buffer(&buffer, &TRIANGLE)?;
            vertex_buffers.push(buffer);
        }

        if let Some(swapchain) = backend.swapchain() {
            info!(
                "Swapchain {}x{} with {} images, {:?}",
                swapchain.extent.width,
                swapchain.extent.height,
                swapchain.image_count(),
                swapchain.present_mode
            );
        }

        Ok(Self {
            backend,
            window,
            pipeline,
            vertex_buffers,
            pending: vec![Vec::new(); config.frames_in_flight],
            shadows: config.shadows,
            started: Instant::now(),
            frames: 0,
        })
    }

    fn render_frame(&mut self) -> anyhow::Result<()> {
        let Some(acquired) = self.backend.acquire_next_image()? else {
            // The swapchain was rebuilt; try again next redraw.
            return Ok(());
        };
        let frame = acquired.frame_index;

        self.backend.wait_for_frame(frame)?;
        for cmd in self.pending[frame].drain(..) {
            self.backend.destroy_draw_command_buffer(cmd)?;
        }

        let elapsed = self.started.elapsed().as_secs_f32();
        let spin = Mat2::from_angle(elapsed * SPIN_SPEED);
        let vertices = TRIANGLE.map(|v| Vertex {
            position: spin * v.position,
            ..v
        });
        self.backend.write_buffer(&self.vertex_buffers[frame], &vertices)?;

        let pulse = (elapsed * 0.5).sin().mul_add(0.5, 0.5);
        self.backend
            .set_clear_color(CLEAR_FROM.lerp(CLEAR_TO, pulse).extend(1.0).to_array());

        if self.shadows {
            self.record_pass(frame, DrawPass::Shadow)?;
            self.backend.copy_depth_to_shadow_image()?;
        }
        self.record_pass(frame, DrawPass::Main)?;
        self.backend.present_next_image()?;

        self.frames += 1;
        if self.frames % 600 == 0 {
            let fps = self.frames as f64 / self.started.elapsed().as_secs_f64();
            info!(frames = self.frames, "Average {fps:.1} fps");
        }
        Ok(())
    }

    fn record_pass(&mut self, frame: usize, pass: DrawPass) -> anyhow::Result<()> {
        let cmd = self.backend.begin_draw_command_buffer()?;
        self.pending[frame].push(cmd);
        self.backend.bind_pipeline(cmd, self.pipeline)?;
        self.backend
            .bind_vertex_buffer(cmd, &self.vertex_buffers[frame])?;
        self.backend.draw_vertices(cmd, TRIANGLE.len() as u32);
        self.backend.end_draw_command_buffer(cmd)?;
        self.backend.draw(cmd, pass)?;
        Ok(())
    }

    fn handle_resize(&mut self, size: PhysicalSize<u32>) -> anyhow::Result<()> {
        if size.width == 0 || size.height == 0 {
            // Minimized; keep the old swapchain until the window comes back.
            return Ok(());
        }
        self.backend.set_width_height(size.width, size.height);
        self.backend.recreate()?;
        info!("Resized to {}x{}", size.width, size.height);
        Ok(())
    }

    fn cleanup(&mut self) {
        // Waiting on every slot lets its command buffers be freed.
        for frame in 0..self.pending.len() {
            if let Err(e) = self.backend.wait_for_frame(frame) {
                warn!("Frame {frame} did not finish: {e}");
                continue;
            }
            for cmd in self.pending[frame].drain(..) {
                if let Err(e) = self.backend.destroy_draw_command_buffer(cmd) {
                    warn!("Could not free command buffer: {e}");
                }
            }
        }
        for buffer in self.vertex_buffers.drain(..) {
            self.backend.destroy_buffer(&buffer);
        }
        if let Err(e) = self.backend.shutdown() {
            warn!("Shutdown reported an error: {e}");
        }
        info!("Rendered {} frames", self.frames);
    }
}
