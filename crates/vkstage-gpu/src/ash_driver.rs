//! [`Driver`] implementation on top of `ash`.
//!
//! `AshDriver` owns the loader entry, the instance, the logical device, the
//! extension loaders and the window surface. The surface is attached after
//! instance creation with [`AshDriver::attach_window`].

use crate::driver::{
    DeviceInfo, Driver, FramebufferInfo, ImageBarrier, ImageInfo, ImageViewInfo, InstanceInfo,
    RenderPassBegin, RenderPassInfo, SamplerInfo, SubmitInfo, SwapchainInfo,
};
use crate::error::{GpuError, Result};
use crate::pipeline::{GraphicsPipelineDesc, PipelineLayoutDesc};
use ash::prelude::VkResult;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, c_void, CStr};

/// Returned by calls made before the object they need exists.
const NOT_INITIALIZED: vk::Result = vk::Result::ERROR_INITIALIZATION_FAILED;

unsafe extern "system" fn debug_report_callback(
    flags: vk::DebugReportFlagsEXT,
    _object_type: vk::DebugReportObjectTypeEXT,
    _object: u64,
    _location: usize,
    _message_code: i32,
    _layer_prefix: *const c_char,
    message: *const c_char,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if message.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid NUL-terminated message.
    let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    if flags.contains(vk::DebugReportFlagsEXT::ERROR) {
        tracing::error!("validation layer: {message}");
    } else if flags.intersects(
        vk::DebugReportFlagsEXT::WARNING | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING,
    ) {
        tracing::warn!("validation layer: {message}");
    } else {
        tracing::debug!("validation layer: {message}");
    }
    vk::FALSE
}

fn c_name(raw: &[c_char]) -> String {
    // SAFETY: Vulkan name arrays are NUL-terminated.
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Vulkan driver backed by the system loader.
pub struct AshDriver {
    entry: ash::Entry,
    instance: Option<ash::Instance>,
    surface_loader: Option<ash::khr::surface::Instance>,
    debug_report: Option<ash::ext::debug_report::Instance>,
    surface: vk::SurfaceKHR,
    device: Option<ash::Device>,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
}

impl AshDriver {
    /// Load the Vulkan loader library.
    pub fn load() -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;
        Ok(Self {
            entry,
            instance: None,
            surface_loader: None,
            debug_report: None,
            surface: vk::SurfaceKHR::null(),
            device: None,
            swapchain_loader: None,
        })
    }

    /// Instance extensions needed to present to `window`.
    pub fn required_window_extensions<W: HasDisplayHandle>(window: &W) -> Result<Vec<String>> {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let extensions = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;
        Ok(extensions
            .iter()
            // SAFETY: ash-window returns static NUL-terminated names.
            .map(|&name| unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
            .collect())
    }

    /// Create the presentation surface for `window`.
    ///
    /// Must be called after instance creation and before device selection.
    /// The window must outlive the driver's instance.
    pub fn attach_window<W>(&mut self, window: &W) -> Result<()>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let instance = self
            .instance
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Instance has not been created".to_string()))?;
        if self.surface != vk::SurfaceKHR::null() {
            return Err(GpuError::InvalidState("A window is already attached".to_string()));
        }

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        self.surface = unsafe {
            ash_window::create_surface(
                &self.entry,
                instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;
        tracing::debug!("Surface created");
        Ok(())
    }

    fn instance(&self) -> VkResult<&ash::Instance> {
        self.instance.as_ref().ok_or(NOT_INITIALIZED)
    }

    fn surface_loader(&self) -> VkResult<&ash::khr::surface::Instance> {
        self.surface_loader.as_ref().ok_or(NOT_INITIALIZED)
    }

    fn device(&self) -> VkResult<&ash::Device> {
        self.device.as_ref().ok_or(NOT_INITIALIZED)
    }

    fn swapchain_loader(&self) -> VkResult<&ash::khr::swapchain::Device> {
        self.swapchain_loader.as_ref().ok_or(NOT_INITIALIZED)
    }
}

impl Drop for AshDriver {
    fn drop(&mut self) {
        // Normally the backend has already torn everything down.
        self.destroy_device();
        self.destroy_instance();
    }
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl Driver for AshDriver {
    fn instance_extensions(&self) -> VkResult<Vec<String>> {
        let properties = unsafe { self.entry.enumerate_instance_extension_properties(None)? };
        Ok(properties.iter().map(|p| c_name(&p.extension_name)).collect())
    }

    fn instance_layers(&self) -> VkResult<Vec<String>> {
        let properties = unsafe { self.entry.enumerate_instance_layer_properties()? };
        Ok(properties.iter().map(|p| c_name(&p.layer_name)).collect())
    }

    fn create_instance(&mut self, info: &InstanceInfo) -> VkResult<()> {
        let app_info = vk::ApplicationInfo::default()
            .application_name(&info.app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&info.engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(info.api_version);

        let extension_names: Vec<*const c_char> =
            info.extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_names: Vec<*const c_char> = info.layers.iter().map(|l| l.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names)
            .flags(info.flags);

        let instance = unsafe { self.entry.create_instance(&create_info, None)? };
        self.surface_loader = Some(ash::khr::surface::Instance::new(&self.entry, &instance));
        self.debug_report = Some(ash::ext::debug_report::Instance::new(&self.entry, &instance));
        self.instance = Some(instance);
        Ok(())
    }

    fn create_debug_callback(&mut self) -> VkResult<vk::DebugReportCallbackEXT> {
        let loader = self.debug_report.as_ref().ok_or(NOT_INITIALIZED)?;
        let info = vk::DebugReportCallbackCreateInfoEXT::default()
            .flags(
                vk::DebugReportFlagsEXT::ERROR
                    | vk::DebugReportFlagsEXT::WARNING
                    | vk::DebugReportFlagsEXT::PERFORMANCE_WARNING,
            )
            .pfn_callback(Some(debug_report_callback));
        unsafe { loader.create_debug_report_callback(&info, None) }
    }

    fn destroy_debug_callback(&mut self, callback: vk::DebugReportCallbackEXT) {
        if let Some(loader) = &self.debug_report {
            unsafe { loader.destroy_debug_report_callback(callback, None) };
        }
    }

    fn destroy_instance(&mut self) {
        if let Some(loader) = &self.surface_loader {
            if self.surface != vk::SurfaceKHR::null() {
                unsafe { loader.destroy_surface(self.surface, None) };
                self.surface = vk::SurfaceKHR::null();
            }
        }
        self.surface_loader = None;
        self.debug_report = None;
        if let Some(instance) = self.instance.take() {
            unsafe { instance.destroy_instance(None) };
        }
    }

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        unsafe { self.instance()?.enumerate_physical_devices() }
    }

    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        let properties =
            unsafe { self.instance()?.enumerate_device_extension_properties(physical_device)? };
        Ok(properties.iter().map(|p| c_name(&p.extension_name)).collect())
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.instance
            .as_ref()
            .map(|i| unsafe { i.get_physical_device_queue_family_properties(physical_device) })
            .unwrap_or_default()
    }

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> VkResult<bool> {
        unsafe {
            self.surface_loader()?.get_physical_device_surface_support(
                physical_device,
                queue_family,
                self.surface,
            )
        }
    }

    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_capabilities(physical_device, self.surface)
        }
    }

    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_formats(physical_device, self.surface)
        }
    }

    fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader()?
                .get_physical_device_surface_present_modes(physical_device, self.surface)
        }
    }

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties {
        self.instance
            .as_ref()
            .map(|i| unsafe { i.get_physical_device_format_properties(physical_device, format) })
            .unwrap_or_default()
    }

    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        self.instance
            .as_ref()
            .map(|i| unsafe { i.get_physical_device_memory_properties(physical_device) })
            .unwrap_or_default()
    }

    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        info: &DeviceInfo,
    ) -> VkResult<()> {
        let instance = self.instance()?;
        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = info
            .queue_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extension_names: Vec<*const c_char> =
            info.extensions.iter().map(|e| e.as_ptr()).collect();
        let layer_names: Vec<*const c_char> = info.layers.iter().map(|l| l.as_ptr()).collect();

        // Older loaders still read device layers.
        #[allow(deprecated)]
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extension_names)
            .enabled_layer_names(&layer_names);

        let device = unsafe { instance.create_device(physical_device, &create_info, None)? };
        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);
        self.swapchain_loader = Some(swapchain_loader);
        self.device = Some(device);
        Ok(())
    }

    fn device_queue(&self, queue_family: u32) -> vk::Queue {
        self.device
            .as_ref()
            .map_or(vk::Queue::null(), |d| unsafe { d.get_device_queue(queue_family, 0) })
    }

    fn device_wait_idle(&mut self) -> VkResult<()> {
        unsafe { self.device()?.device_wait_idle() }
    }

    fn destroy_device(&mut self) {
        self.swapchain_loader = None;
        if let Some(device) = self.device.take() {
            unsafe { device.destroy_device(None) };
        }
    }

    fn create_swapchain(&mut self, info: &SwapchainInfo) -> VkResult<vk::SwapchainKHR> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(info.min_image_count)
            .image_format(info.surface_format.format)
            .image_color_space(info.surface_format.color_space)
            .image_extent(info.extent)
            .image_array_layers(1)
            .image_usage(info.usage)
            .image_sharing_mode(info.sharing_mode)
            .queue_family_indices(&info.queue_family_indices)
            .pre_transform(info.pre_transform)
            .composite_alpha(info.composite_alpha)
            .present_mode(info.present_mode)
            .clipped(true);
        unsafe { self.swapchain_loader()?.create_swapchain(&create_info, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader()?.get_swapchain_images(swapchain) }
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        if let Some(loader) = &self.swapchain_loader {
            unsafe { loader.destroy_swapchain(swapchain, None) };
        }
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader()?
                .acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    fn queue_present(
        &mut self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.swapchain_loader()?.queue_present(queue, &present_info) }
    }

    fn allocate_memory(
        &mut self,
        size: vk::DeviceSize,
        memory_type: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(size)
            .memory_type_index(memory_type);
        unsafe { self.device()?.allocate_memory(&info, None) }
    }

    fn free_memory(&mut self, memory: vk::DeviceMemory) {
        if let Some(device) = &self.device {
            unsafe { device.free_memory(memory, None) };
        }
    }

    fn write_memory(
        &mut self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        let device = self.device()?;
        unsafe {
            let ptr = device.map_memory(
                memory,
                offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            device.unmap_memory(memory);
        }
        Ok(())
    }

    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe { self.device()?.create_buffer(&info, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        self.device
            .as_ref()
            .map(|d| unsafe { d.get_buffer_memory_requirements(buffer) })
            .unwrap_or_default()
    }

    fn bind_buffer_memory(
        &mut self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
    ) -> VkResult<()> {
        unsafe { self.device()?.bind_buffer_memory(buffer, memory, 0) }
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_buffer(buffer, None) };
        }
    }

    fn create_image(&mut self, info: &ImageInfo) -> VkResult<vk::Image> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: info.extent.width,
                height: info.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(info.format)
            .tiling(info.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(info.usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        unsafe { self.device()?.create_image(&create_info, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        self.device
            .as_ref()
            .map(|d| unsafe { d.get_image_memory_requirements(image) })
            .unwrap_or_default()
    }

    fn bind_image_memory(&mut self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        unsafe { self.device()?.bind_image_memory(image, memory, 0) }
    }

    fn destroy_image(&mut self, image: vk::Image) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_image(image, None) };
        }
    }

    fn create_image_view(&mut self, info: &ImageViewInfo) -> VkResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(info.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(info.format)
            .subresource_range(subresource_range(info.aspect));
        unsafe { self.device()?.create_image_view(&create_info, None) }
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_image_view(view, None) };
        }
    }

    fn create_sampler(&mut self, info: &SamplerInfo) -> VkResult<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(info.filter)
            .min_filter(info.filter)
            .mipmap_mode(info.mipmap_mode)
            .address_mode_u(info.address_mode)
            .address_mode_v(info.address_mode)
            .address_mode_w(info.address_mode)
            .anisotropy_enable(info.max_anisotropy.is_some())
            .max_anisotropy(info.max_anisotropy.unwrap_or(1.0))
            .border_color(info.border_color)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(info.min_lod)
            .max_lod(info.max_lod);
        unsafe { self.device()?.create_sampler(&create_info, None) }
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_sampler(sampler, None) };
        }
    }

    fn create_render_pass(&mut self, info: &RenderPassInfo) -> VkResult<vk::RenderPass> {
        let color_references = [info.color_reference];
        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_references)
            .depth_stencil_attachment(&info.depth_reference);
        let subpasses = [subpass];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&info.attachments)
            .subpasses(&subpasses)
            .dependencies(&info.dependencies);
        unsafe { self.device()?.create_render_pass(&create_info, None) }
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_render_pass(render_pass, None) };
        }
    }

    fn create_framebuffer(&mut self, info: &FramebufferInfo) -> VkResult<vk::Framebuffer> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(info.render_pass)
            .attachments(&info.attachments)
            .width(info.extent.width)
            .height(info.extent.height)
            .layers(1);
        unsafe { self.device()?.create_framebuffer(&create_info, None) }
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(code);
        unsafe { self.device()?.create_shader_module(&create_info, None) }
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_shader_module(module, None) };
        }
    }

    fn create_pipeline_layout(
        &mut self,
        desc: &PipelineLayoutDesc,
    ) -> VkResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&desc.set_layouts)
            .push_constant_ranges(&desc.push_constant_ranges);
        unsafe { self.device()?.create_pipeline_layout(&create_info, None) }
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_pipeline_layout(layout, None) };
        }
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> VkResult<vk::Pipeline> {
        let fixed = &desc.fixed;

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(desc.vertex_module)
                .name(desc.entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(desc.fragment_module)
                .name(desc.entry_point),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&desc.vertex_input.bindings)
            .vertex_attribute_descriptions(&desc.vertex_input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(fixed.topology)
            .primitive_restart_enable(fixed.primitive_restart);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: desc.extent.width as f32,
            height: desc.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: desc.extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(fixed.polygon_mode)
            .line_width(fixed.line_width)
            .cull_mode(fixed.cull_mode)
            .front_face(fixed.front_face)
            .depth_bias_enable(false);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(fixed.samples)
            .sample_shading_enable(false);

        let blend_attachments = [fixed.blend];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(fixed.depth_test)
            .depth_write_enable(fixed.depth_write)
            .depth_compare_op(fixed.depth_compare_op)
            .depth_bounds_test_enable(false)
            .min_depth_bounds(fixed.min_depth_bounds)
            .max_depth_bounds(fixed.max_depth_bounds)
            .stencil_test_enable(false);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .layout(desc.layout)
            .render_pass(desc.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device()?
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| e)?
        };
        pipelines.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_pipeline(pipeline, None) };
        }
    }

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        unsafe { self.device()?.create_semaphore(&info, None) }
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        unsafe { self.device()?.create_fence(&info, None) }
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_fence(fence, None) };
        }
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        unsafe { self.device()?.wait_for_fences(&[fence], true, timeout_ns) }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device()?.reset_fences(&[fence]) }
    }

    fn create_command_pool(&mut self, queue_family: u32) -> VkResult<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        unsafe { self.device()?.create_command_pool(&info, None) }
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        if let Some(device) = &self.device {
            unsafe { device.destroy_command_pool(pool, None) };
        }
    }

    fn allocate_command_buffer(
        &mut self,
        pool: vk::CommandPool,
    ) -> VkResult<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.device()?.allocate_command_buffers(&info)? };
        buffers.into_iter().next().ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn free_command_buffer(&mut self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        if let Some(device) = &self.device {
            unsafe { device.free_command_buffers(pool, &[command_buffer]) };
        }
    }

    fn begin_command_buffer(
        &mut self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        unsafe { self.device()?.begin_command_buffer(command_buffer, &info) }
    }

    fn end_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device()?.end_command_buffer(command_buffer) }
    }

    fn queue_submit(
        &mut self,
        queue: vk::Queue,
        submit: &SubmitInfo,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let command_buffers = [submit.command_buffer];
        let wait_semaphores: Vec<vk::Semaphore> = submit.wait_semaphore.into_iter().collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = submit
            .wait_semaphore
            .map(|_| submit.wait_stage)
            .into_iter()
            .collect();
        let signal_semaphores: Vec<vk::Semaphore> = submit.signal_semaphore.into_iter().collect();

        let info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);
        unsafe { self.device()?.queue_submit(queue, &[info], fence) }
    }

    fn queue_wait_idle(&mut self, queue: vk::Queue) -> VkResult<()> {
        unsafe { self.device()?.queue_wait_idle(queue) }
    }

    fn cmd_begin_render_pass(&mut self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        let Some(device) = &self.device else { return };
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: begin.extent,
            })
            .clear_values(&begin.clear_values);
        unsafe { device.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE) };
    }

    fn cmd_end_render_pass(&mut self, command_buffer: vk::CommandBuffer) {
        if let Some(device) = &self.device {
            unsafe { device.cmd_end_render_pass(command_buffer) };
        }
    }

    fn cmd_bind_pipeline(&mut self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        if let Some(device) = &self.device {
            unsafe {
                device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
            }
        }
    }

    fn cmd_bind_vertex_buffer(&mut self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        if let Some(device) = &self.device {
            unsafe { device.cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[0]) };
        }
    }

    fn cmd_draw(&mut self, command_buffer: vk::CommandBuffer, vertex_count: u32) {
        if let Some(device) = &self.device {
            unsafe { device.cmd_draw(command_buffer, vertex_count, 1, 0, 0) };
        }
    }

    fn cmd_pipeline_barrier(&mut self, command_buffer: vk::CommandBuffer, barrier: &ImageBarrier) {
        let Some(device) = &self.device else { return };
        let image_barrier = vk::ImageMemoryBarrier::default()
            .old_layout(barrier.old_layout)
            .new_layout(barrier.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(barrier.image)
            .subresource_range(subresource_range(barrier.aspect))
            .src_access_mask(barrier.src_access)
            .dst_access_mask(barrier.dst_access);
        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                barrier.src_stage,
                barrier.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[image_barrier],
            );
        }
    }

    fn cmd_copy_buffer(
        &mut self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        if let Some(device) = &self.device {
            unsafe { device.cmd_copy_buffer(command_buffer, src, dst, &[region]) };
        }
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) {
        if let Some(device) = &self.device {
            unsafe { device.cmd_copy_buffer_to_image(command_buffer, src, dst, dst_layout, &[region]) };
        }
    }

    fn cmd_copy_image(
        &mut self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        src_layout: vk::ImageLayout,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::ImageCopy,
    ) {
        if let Some(device) = &self.device {
            unsafe {
                device.cmd_copy_image(command_buffer, src, src_layout, dst, dst_layout, &[region]);
            }
        }
    }

    fn cmd_clear_attachments(
        &mut self,
        command_buffer: vk::CommandBuffer,
        attachment: vk::ClearAttachment,
        rect: vk::ClearRect,
    ) {
        if let Some(device) = &self.device {
            unsafe { device.cmd_clear_attachments(command_buffer, &[attachment], &[rect]) };
        }
    }
}
