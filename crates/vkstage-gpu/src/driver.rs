//! Driver seam between the backend and the Vulkan API.
//!
//! Every Vulkan entry point the backend needs is a method on [`Driver`].
//! Create-infos that carry `p_next` chains in `ash` are replaced by plain owned
//! descriptions so that implementations can be written without unsafe
//! lifetimes. Status codes are returned as [`VkResult`] so that
//! `ERROR_OUT_OF_DATE_KHR`, `SUBOPTIMAL_KHR` and `TIMEOUT` reach the backend
//! untouched.
//!
//! The backend only ever passes handles it obtained from the same driver, and
//! never destroys a handle twice. Implementations may rely on that.

use crate::pipeline::{GraphicsPipelineDesc, PipelineLayoutDesc};
use ash::prelude::VkResult;
use ash::vk;
use std::ffi::CString;

/// Instance creation parameters.
#[derive(Debug, Clone, Default)]
pub struct InstanceInfo {
    pub app_name: CString,
    pub engine_name: CString,
    pub api_version: u32,
    pub extensions: Vec<CString>,
    pub layers: Vec<CString>,
    pub flags: vk::InstanceCreateFlags,
}

/// Logical device creation parameters.
///
/// One queue is requested per entry of `queue_families`; entries are unique.
#[derive(Debug, Clone, Default)]
pub struct DeviceInfo {
    pub queue_families: Vec<u32>,
    pub extensions: Vec<CString>,
    pub layers: Vec<CString>,
}

/// Swapchain creation parameters. The surface is the one attached to the driver.
#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    pub min_image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
}

/// A single-mip, single-layer 2D image with exclusive sharing and one sample.
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
}

/// A 2D view over the first mip and layer of an image.
#[derive(Debug, Clone, Copy)]
pub struct ImageViewInfo {
    pub image: vk::Image,
    pub format: vk::Format,
    pub aspect: vk::ImageAspectFlags,
}

/// A single-subpass render pass with one color and one depth attachment.
#[derive(Debug, Clone)]
pub struct RenderPassInfo {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub color_reference: vk::AttachmentReference,
    pub depth_reference: vk::AttachmentReference,
    pub dependencies: Vec<vk::SubpassDependency>,
}

/// Framebuffer creation parameters.
#[derive(Debug, Clone)]
pub struct FramebufferInfo {
    pub render_pass: vk::RenderPass,
    pub attachments: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
}

/// Sampler creation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerInfo {
    pub filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    pub max_anisotropy: Option<f32>,
    pub border_color: vk::BorderColor,
    pub min_lod: f32,
    pub max_lod: f32,
}

/// Render pass begin parameters.
#[derive(Clone)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: Vec<vk::ClearValue>,
}

// `vk::ClearValue` is a union without a `Debug` impl.
impl std::fmt::Debug for RenderPassBegin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPassBegin")
            .field("render_pass", &self.render_pass)
            .field("framebuffer", &self.framebuffer)
            .field("extent", &self.extent)
            .field("clear_values", &self.clear_values.len())
            .finish()
    }
}

/// Single image memory barrier covering the first mip and layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Single command buffer submission with at most one wait and one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitInfo {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: Option<vk::Semaphore>,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: Option<vk::Semaphore>,
}

impl SubmitInfo {
    /// Submission with no semaphores.
    pub fn standalone(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            wait_semaphore: None,
            wait_stage: vk::PipelineStageFlags::empty(),
            signal_semaphore: None,
        }
    }
}

/// Vulkan entry points used by the backend.
pub trait Driver {
    // Instance

    /// Names of the instance extensions the loader reports.
    fn instance_extensions(&self) -> VkResult<Vec<String>>;
    /// Names of the instance layers the loader reports.
    fn instance_layers(&self) -> VkResult<Vec<String>>;
    fn create_instance(&mut self, info: &InstanceInfo) -> VkResult<()>;
    /// Install a debug report callback for errors and warnings.
    fn create_debug_callback(&mut self) -> VkResult<vk::DebugReportCallbackEXT>;
    fn destroy_debug_callback(&mut self, callback: vk::DebugReportCallbackEXT);
    /// Destroy the instance together with any attached surface.
    fn destroy_instance(&mut self);

    // Physical device and surface queries

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>>;
    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<String>>;
    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties>;
    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> VkResult<bool>;
    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(&self, physical_device: vk::PhysicalDevice)
        -> VkResult<Vec<vk::PresentModeKHR>>;
    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties;
    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties;

    // Logical device

    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        info: &DeviceInfo,
    ) -> VkResult<()>;
    fn device_queue(&self, queue_family: u32) -> vk::Queue;
    fn device_wait_idle(&mut self) -> VkResult<()>;
    fn destroy_device(&mut self);

    // Swapchain

    fn create_swapchain(&mut self, info: &SwapchainInfo) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR);
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// Returns whether the swapchain is suboptimal.
    fn queue_present(
        &mut self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool>;

    // Memory, buffers and images

    fn allocate_memory(&mut self, size: vk::DeviceSize, memory_type: u32)
        -> VkResult<vk::DeviceMemory>;
    fn free_memory(&mut self, memory: vk::DeviceMemory);
    /// Map `memory`, copy `data` at `offset`, unmap.
    fn write_memory(
        &mut self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()>;
    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer>;
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn bind_buffer_memory(&mut self, buffer: vk::Buffer, memory: vk::DeviceMemory)
        -> VkResult<()>;
    fn destroy_buffer(&mut self, buffer: vk::Buffer);
    fn create_image(&mut self, info: &ImageInfo) -> VkResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(&mut self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()>;
    fn destroy_image(&mut self, image: vk::Image);
    fn create_image_view(&mut self, info: &ImageViewInfo) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&mut self, view: vk::ImageView);
    fn create_sampler(&mut self, info: &SamplerInfo) -> VkResult<vk::Sampler>;
    fn destroy_sampler(&mut self, sampler: vk::Sampler);

    // Render pass and framebuffers

    fn create_render_pass(&mut self, info: &RenderPassInfo) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);
    fn create_framebuffer(&mut self, info: &FramebufferInfo) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    // Pipelines

    fn create_shader_module(&mut self, code: &[u32]) -> VkResult<vk::ShaderModule>;
    fn destroy_shader_module(&mut self, module: vk::ShaderModule);
    fn create_pipeline_layout(&mut self, desc: &PipelineLayoutDesc)
        -> VkResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&mut self, desc: &GraphicsPipelineDesc)
        -> VkResult<vk::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);

    // Synchronization

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);
    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&mut self, fence: vk::Fence);
    /// Returns `Err(vk::Result::TIMEOUT)` if the fence did not signal in time.
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()>;
    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()>;

    // Command buffers

    fn create_command_pool(&mut self, queue_family: u32) -> VkResult<vk::CommandPool>;
    /// Destroy the pool together with every command buffer allocated from it.
    fn destroy_command_pool(&mut self, pool: vk::CommandPool);
    fn allocate_command_buffer(&mut self, pool: vk::CommandPool)
        -> VkResult<vk::CommandBuffer>;
    fn free_command_buffer(&mut self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer);
    fn begin_command_buffer(
        &mut self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()>;
    fn end_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
    fn queue_submit(
        &mut self,
        queue: vk::Queue,
        submit: &SubmitInfo,
        fence: vk::Fence,
    ) -> VkResult<()>;
    fn queue_wait_idle(&mut self, queue: vk::Queue) -> VkResult<()>;

    // Recorded commands

    fn cmd_begin_render_pass(&mut self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&mut self, command_buffer: vk::CommandBuffer);
    fn cmd_bind_pipeline(&mut self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_vertex_buffer(&mut self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_draw(&mut self, command_buffer: vk::CommandBuffer, vertex_count: u32);
    fn cmd_pipeline_barrier(&mut self, command_buffer: vk::CommandBuffer, barrier: &ImageBarrier);
    fn cmd_copy_buffer(
        &mut self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    );
    fn cmd_copy_buffer_to_image(
        &mut self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    );
    fn cmd_copy_image(
        &mut self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageCopy,
    );
    fn cmd_clear_attachments(
        &mut self,
        command_buffer: vk::CommandBuffer,
        attachment: vk::ClearAttachment,
        rect: vk::ClearRect,
    );
}
