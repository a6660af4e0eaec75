//! Scriptable in-memory driver.
//!
//! [`MockDriver`] hands out fake handles, tracks their lifetimes and models
//! the parts of Vulkan's execution model the backend relies on: fences,
//! binary semaphores and in-flight command buffers. Misuse is recorded as a
//! violation instead of panicking so tests can assert on a clean run.
//!
//! Acquire and present results can be scripted to simulate a surface that
//! goes out of date.

use crate::driver::{
    DeviceInfo, Driver, FramebufferInfo, ImageBarrier, ImageInfo, ImageViewInfo, InstanceInfo,
    RenderPassBegin, RenderPassInfo, SamplerInfo, SubmitInfo, SwapchainInfo,
};
use crate::pipeline::{GraphicsPipelineDesc, PipelineLayoutDesc};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::collections::{HashMap, VecDeque};

const PHYSICAL_DEVICE_BASE: u64 = 0x10_0000;
const QUEUE_BASE: u64 = 0x20_0000;
const SPIRV_MAGIC: u32 = 0x0723_0203;
const MEMORY_ALIGNMENT: vk::DeviceSize = 256;

/// Kind of a tracked object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    DebugCallback,
    Swapchain,
    Memory,
    Buffer,
    Image,
    ImageView,
    Sampler,
    RenderPass,
    Framebuffer,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    Semaphore,
    Fence,
    CommandPool,
    CommandBuffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Unsignaled,
    Pending,
    Signaled,
}

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    CreateInstance {
        extensions: Vec<String>,
        layers: Vec<String>,
        flags: vk::InstanceCreateFlags,
    },
    CreateDevice {
        physical_device: vk::PhysicalDevice,
        queue_families: Vec<u32>,
        extensions: Vec<String>,
    },
    DeviceWaitIdle,
    CreateSwapchain {
        swapchain: vk::SwapchainKHR,
        min_image_count: u32,
        extent: vk::Extent2D,
        present_mode: vk::PresentModeKHR,
    },
    DestroySwapchain(vk::SwapchainKHR),
    AcquireNextImage {
        semaphore: vk::Semaphore,
        result: vk::Result,
    },
    Present {
        image_index: u32,
        wait_semaphore: vk::Semaphore,
        result: vk::Result,
    },
    CreatePipeline {
        pipeline: vk::Pipeline,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    },
    DestroyPipeline(vk::Pipeline),
    WaitForFence(vk::Fence),
    ResetFence(vk::Fence),
    Submit {
        queue: vk::Queue,
        submit: SubmitInfo,
        fence: vk::Fence,
    },
    BeginRenderPass {
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        /// First clear value read as a float color.
        color: [f32; 4],
        /// Second clear value read as depth.
        depth: f32,
    },
    BindPipeline {
        command_buffer: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    },
    BindVertexBuffer {
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
    },
    Draw {
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
    },
    Barrier(ImageBarrier),
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
    },
    CopyImage {
        src: vk::Image,
        dst: vk::Image,
    },
    ClearDepth {
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    },
}

/// A fake physical device.
#[derive(Debug, Clone)]
pub struct MockPhysicalDevice {
    pub extensions: Vec<String>,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    /// Families that can present to the surface.
    pub present_families: Vec<u32>,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Formats usable as optimal-tiling depth attachments.
    pub depth_formats: Vec<vk::Format>,
    pub memory_types: Vec<vk::MemoryPropertyFlags>,
    /// Requirement mask reported for every buffer and image.
    pub memory_type_bits: u32,
}

impl Default for MockPhysicalDevice {
    fn default() -> Self {
        Self {
            extensions: vec!["VK_KHR_swapchain".to_string()],
            queue_families: vec![vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS
                    | vk::QueueFlags::COMPUTE
                    | vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            }],
            present_families: vec![0],
            surface_formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST,
            },
            depth_formats: vec![vk::Format::D32_SFLOAT],
            memory_types: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            ],
            memory_type_bits: 0b11,
        }
    }
}

impl MockPhysicalDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: self.memory_types.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (slot, &flags) in properties.memory_types.iter_mut().zip(&self.memory_types) {
            slot.property_flags = flags;
            slot.heap_index = 0;
        }
        properties
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    command_buffer: u64,
    fence: u64,
    queue: u64,
}

/// In-memory driver for tests.
#[derive(Debug)]
pub struct MockDriver {
    /// Instance extensions the fake loader reports.
    pub instance_extensions: Vec<String>,
    /// Instance layers the fake loader reports.
    pub instance_layers: Vec<String>,
    pub physical_devices: Vec<MockPhysicalDevice>,
    /// Make debug callback creation fail.
    pub fail_debug_callback: bool,
    /// Make graphics pipeline creation fail.
    pub fail_pipeline_creation: bool,
    /// Make memory allocation fail.
    pub fail_allocations: bool,
    /// Make submissions that signal a fence fail with `ERROR_DEVICE_LOST`.
    pub fail_fenced_submits: bool,

    next_handle: u64,
    instance_alive: bool,
    device: Option<usize>,
    live: HashMap<u64, ObjectKind>,
    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    in_flight: Vec<InFlight>,
    command_buffers: HashMap<u64, u64>,
    memory: HashMap<u64, (vk::MemoryPropertyFlags, Vec<u8>)>,
    object_sizes: HashMap<u64, vk::DeviceSize>,
    swapchain_images: HashMap<u64, Vec<vk::Image>>,
    next_image: HashMap<u64, u32>,
    acquire_script: VecDeque<vk::Result>,
    present_script: VecDeque<vk::Result>,
    calls: Vec<MockCall>,
    violations: Vec<String>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Driver with one default physical device and the surface extensions.
    pub fn new() -> Self {
        Self::with_devices(vec![MockPhysicalDevice::default()])
    }

    pub fn with_devices(physical_devices: Vec<MockPhysicalDevice>) -> Self {
        Self {
            instance_extensions: vec![
                "VK_KHR_surface".to_string(),
                "VK_KHR_xcb_surface".to_string(),
                "VK_KHR_get_physical_device_properties2".to_string(),
                "VK_EXT_debug_report".to_string(),
            ],
            instance_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            physical_devices,
            fail_debug_callback: false,
            fail_pipeline_creation: false,
            fail_allocations: false,
            fail_fenced_submits: false,
            next_handle: 1,
            instance_alive: false,
            device: None,
            live: HashMap::new(),
            fences: HashMap::new(),
            semaphores: HashMap::new(),
            in_flight: Vec::new(),
            command_buffers: HashMap::new(),
            memory: HashMap::new(),
            object_sizes: HashMap::new(),
            swapchain_images: HashMap::new(),
            next_image: HashMap::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            calls: Vec::new(),
            violations: Vec::new(),
        }
    }

    /// Return `result` from the next acquire instead of success.
    pub fn script_acquire(&mut self, result: vk::Result) {
        self.acquire_script.push_back(result);
    }

    /// Return `result` from the next present instead of success.
    pub fn script_present(&mut self, result: vk::Result) {
        self.present_script.push_back(result);
    }

    /// Report a fixed surface extent on every physical device.
    pub fn set_current_extent(&mut self, width: u32, height: u32) {
        for device in &mut self.physical_devices {
            device.capabilities.current_extent = vk::Extent2D { width, height };
        }
    }

    pub fn calls(&self) -> &[MockCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Number of live objects of any kind.
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of live objects of `kind`.
    pub fn live_of(&self, kind: ObjectKind) -> usize {
        self.live.values().filter(|&&k| k == kind).count()
    }

    /// No instance, no device and no live objects remain.
    pub fn is_clean(&self) -> bool {
        self.live.is_empty() && !self.instance_alive && self.device.is_none()
    }

    pub fn instance_alive(&self) -> bool {
        self.instance_alive
    }

    pub fn device_alive(&self) -> bool {
        self.device.is_some()
    }

    /// Bytes written to `memory`.
    pub fn memory_contents(&self, memory: vk::DeviceMemory) -> Option<&[u8]> {
        self.memory.get(&memory.as_raw()).map(|(_, data)| data.as_slice())
    }

    /// Images owned by `swapchain`.
    pub fn images_of(&self, swapchain: vk::SwapchainKHR) -> &[vk::Image] {
        self.swapchain_images
            .get(&swapchain.as_raw())
            .map_or(&[], Vec::as_slice)
    }

    pub fn physical_device_handle(index: usize) -> vk::PhysicalDevice {
        vk::PhysicalDevice::from_raw(PHYSICAL_DEVICE_BASE + index as u64)
    }

    pub fn queue_handle(family: u32) -> vk::Queue {
        vk::Queue::from_raw(QUEUE_BASE + u64::from(family))
    }

    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }

    fn physical(&self, physical_device: vk::PhysicalDevice) -> Option<&MockPhysicalDevice> {
        let index = physical_device.as_raw().checked_sub(PHYSICAL_DEVICE_BASE)?;
        self.physical_devices.get(usize::try_from(index).ok()?)
    }

    fn selected(&self) -> Option<&MockPhysicalDevice> {
        self.device.and_then(|index| self.physical_devices.get(index))
    }

    fn create<H: Handle>(&mut self, kind: ObjectKind) -> H {
        if self.device.is_none() && kind != ObjectKind::DebugCallback {
            self.violation(format!("{kind:?} created without a device"));
        }
        let raw = self.next_handle;
        self.next_handle += 1;
        self.live.insert(raw, kind);
        H::from_raw(raw)
    }

    fn check(&mut self, raw: u64, kind: ObjectKind, op: &str) -> bool {
        match self.live.get(&raw) {
            Some(&found) if found == kind => true,
            Some(&found) => {
                self.violation(format!("{op}: handle {raw:#x} is a {found:?}, not a {kind:?}"));
                false
            }
            None => {
                self.violation(format!("{op}: unknown or destroyed {kind:?} {raw:#x}"));
                false
            }
        }
    }

    fn destroy(&mut self, raw: u64, kind: ObjectKind, op: &str) {
        if self.check(raw, kind, op) {
            self.live.remove(&raw);
        }
    }

    fn is_swapchain_image(&self, image: vk::Image) -> bool {
        self.swapchain_images
            .values()
            .any(|images| images.contains(&image))
    }

    fn requirements(&self, raw: u64) -> vk::MemoryRequirements {
        let size = self.object_sizes.get(&raw).copied().unwrap_or(0);
        vk::MemoryRequirements {
            size: size.div_ceil(MEMORY_ALIGNMENT).max(1) * MEMORY_ALIGNMENT,
            alignment: MEMORY_ALIGNMENT,
            memory_type_bits: self.selected().map_or(0b11, |d| d.memory_type_bits),
        }
    }

    /// Retire submissions matching `done`, signaling their fences.
    fn retire(&mut self, done: impl Fn(&InFlight) -> bool) {
        let (finished, pending): (Vec<_>, Vec<_>) =
            self.in_flight.iter().copied().partition(|submission| done(submission));
        for submission in finished {
            if submission.fence != 0 {
                self.fences.insert(submission.fence, FenceState::Signaled);
            }
        }
        self.in_flight = pending;
    }

    fn signal(&mut self, semaphore: vk::Semaphore, op: &str) {
        if !self.check(semaphore.as_raw(), ObjectKind::Semaphore, op) {
            return;
        }
        if self.semaphores.insert(semaphore.as_raw(), true) == Some(true) {
            self.violation(format!("{op}: semaphore {semaphore:?} signaled twice"));
        }
    }

    fn consume(&mut self, semaphore: vk::Semaphore, op: &str) {
        if !self.check(semaphore.as_raw(), ObjectKind::Semaphore, op) {
            return;
        }
        if self.semaphores.insert(semaphore.as_raw(), false) != Some(true) {
            self.violation(format!("{op}: waited on unsignaled semaphore {semaphore:?}"));
        }
    }

    fn check_command_buffer(&mut self, command_buffer: vk::CommandBuffer, op: &str) {
        self.check(command_buffer.as_raw(), ObjectKind::CommandBuffer, op);
    }
}

/// Clear values of a color plus depth render pass. Missing entries read as zero.
fn color_depth_clear(values: &[vk::ClearValue]) -> ([f32; 4], f32) {
    // SAFETY: both union variants are plain floats and integers, so any bit
    // pattern is a valid value.
    let color = values.first().map_or([0.0; 4], |v| unsafe { v.color.float32 });
    let depth = values.get(1).map_or(0.0, |v| unsafe { v.depth_stencil.depth });
    (color, depth)
}

fn lossy(names: &[std::ffi::CString]) -> Vec<String> {
    names
        .iter()
        .map(|n| n.to_string_lossy().into_owned())
        .collect()
}

impl Driver for MockDriver {
    fn instance_extensions(&self) -> VkResult<Vec<String>> {
        Ok(self.instance_extensions.clone())
    }

    fn instance_layers(&self) -> VkResult<Vec<String>> {
        Ok(self.instance_layers.clone())
    }

    fn create_instance(&mut self, info: &InstanceInfo) -> VkResult<()> {
        let extensions = lossy(&info.extensions);
        let layers = lossy(&info.layers);
        self.calls.push(MockCall::CreateInstance {
            extensions: extensions.clone(),
            layers: layers.clone(),
            flags: info.flags,
        });

        if self.instance_alive {
            self.violation("instance created twice".to_string());
        }
        if extensions.iter().any(|e| !self.instance_extensions.contains(e)) {
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }
        if layers.iter().any(|l| !self.instance_layers.contains(l)) {
            return Err(vk::Result::ERROR_LAYER_NOT_PRESENT);
        }
        self.instance_alive = true;
        Ok(())
    }

    fn create_debug_callback(&mut self) -> VkResult<vk::DebugReportCallbackEXT> {
        if self.fail_debug_callback {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok(self.create(ObjectKind::DebugCallback))
    }

    fn destroy_debug_callback(&mut self, callback: vk::DebugReportCallbackEXT) {
        self.destroy(callback.as_raw(), ObjectKind::DebugCallback, "destroy_debug_callback");
    }

    fn destroy_instance(&mut self) {
        if !self.instance_alive {
            self.violation("destroy_instance without an instance".to_string());
        }
        if self.device.is_some() {
            self.violation("instance destroyed before the device".to_string());
        }
        if self.live_of(ObjectKind::DebugCallback) > 0 {
            self.violation("instance destroyed with a live debug callback".to_string());
        }
        self.instance_alive = false;
    }

    fn enumerate_physical_devices(&self) -> VkResult<Vec<vk::PhysicalDevice>> {
        if !self.instance_alive {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        Ok((0..self.physical_devices.len())
            .map(Self::physical_device_handle)
            .collect())
    }

    fn device_extensions(&self, physical_device: vk::PhysicalDevice) -> VkResult<Vec<String>> {
        self.physical(physical_device)
            .map(|d| d.extensions.clone())
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.physical(physical_device)
            .map(|d| d.queue_families.clone())
            .unwrap_or_default()
    }

    fn surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> VkResult<bool> {
        self.physical(physical_device)
            .map(|d| d.present_families.contains(&queue_family))
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<vk::SurfaceCapabilitiesKHR> {
        self.physical(physical_device)
            .map(|d| d.capabilities)
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::SurfaceFormatKHR>> {
        self.physical(physical_device)
            .map(|d| d.surface_formats.clone())
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> VkResult<Vec<vk::PresentModeKHR>> {
        self.physical(physical_device)
            .map(|d| d.present_modes.clone())
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn format_properties(
        &self,
        physical_device: vk::PhysicalDevice,
        format: vk::Format,
    ) -> vk::FormatProperties {
        let supported = self
            .physical(physical_device)
            .is_some_and(|d| d.depth_formats.contains(&format));
        vk::FormatProperties {
            optimal_tiling_features: if supported {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            },
            ..Default::default()
        }
    }

    fn memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        self.physical(physical_device)
            .map(MockPhysicalDevice::memory_properties)
            .unwrap_or_default()
    }

    fn create_device(
        &mut self,
        physical_device: vk::PhysicalDevice,
        info: &DeviceInfo,
    ) -> VkResult<()> {
        self.calls.push(MockCall::CreateDevice {
            physical_device,
            queue_families: info.queue_families.clone(),
            extensions: lossy(&info.extensions),
        });
        if !self.instance_alive {
            self.violation("device created without an instance".to_string());
        }
        if self.device.is_some() {
            self.violation("device created twice".to_string());
        }

        let Some(index) = physical_device
            .as_raw()
            .checked_sub(PHYSICAL_DEVICE_BASE)
            .and_then(|i| usize::try_from(i).ok())
            .filter(|&i| i < self.physical_devices.len())
        else {
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        };

        let family_count = self.physical_devices[index].queue_families.len() as u32;
        if info.queue_families.iter().any(|&f| f >= family_count) {
            self.violation(format!("queue families {:?} out of range", info.queue_families));
        }
        let mut sorted = info.queue_families.clone();
        sorted.dedup();
        if sorted.len() != info.queue_families.len() {
            self.violation(format!("duplicate queue families {:?}", info.queue_families));
        }
        let device_extensions = self.physical_devices[index].extensions.clone();
        if lossy(&info.extensions)
            .iter()
            .any(|e| !device_extensions.contains(e))
        {
            return Err(vk::Result::ERROR_EXTENSION_NOT_PRESENT);
        }

        self.device = Some(index);
        Ok(())
    }

    fn device_queue(&self, queue_family: u32) -> vk::Queue {
        Self::queue_handle(queue_family)
    }

    fn device_wait_idle(&mut self) -> VkResult<()> {
        self.calls.push(MockCall::DeviceWaitIdle);
        self.retire(|_| true);
        Ok(())
    }

    fn destroy_device(&mut self) {
        if self.device.is_none() {
            self.violation("destroy_device without a device".to_string());
        }
        if !self.in_flight.is_empty() {
            self.violation(format!(
                "device destroyed with {} submissions in flight",
                self.in_flight.len()
            ));
        }
        let mut leaked: Vec<ObjectKind> = self
            .live
            .values()
            .copied()
            .filter(|&k| k != ObjectKind::DebugCallback)
            .collect();
        if !leaked.is_empty() {
            leaked.sort_by_key(|k| format!("{k:?}"));
            self.violation(format!("device destroyed with live children: {leaked:?}"));
        }
        self.device = None;
    }

    fn create_swapchain(&mut self, info: &SwapchainInfo) -> VkResult<vk::SwapchainKHR> {
        let swapchain: vk::SwapchainKHR = self.create(ObjectKind::Swapchain);
        let images: Vec<vk::Image> = (0..info.min_image_count)
            .map(|_| {
                let raw = self.next_handle;
                self.next_handle += 1;
                vk::Image::from_raw(raw)
            })
            .collect();
        self.swapchain_images.insert(swapchain.as_raw(), images);
        self.next_image.insert(swapchain.as_raw(), 0);
        self.calls.push(MockCall::CreateSwapchain {
            swapchain,
            min_image_count: info.min_image_count,
            extent: info.extent,
            present_mode: info.present_mode,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.swapchain_images
            .get(&swapchain.as_raw())
            .cloned()
            .ok_or(vk::Result::ERROR_UNKNOWN)
    }

    fn destroy_swapchain(&mut self, swapchain: vk::SwapchainKHR) {
        self.calls.push(MockCall::DestroySwapchain(swapchain));
        self.destroy(swapchain.as_raw(), ObjectKind::Swapchain, "destroy_swapchain");
        self.swapchain_images.remove(&swapchain.as_raw());
        self.next_image.remove(&swapchain.as_raw());
    }

    fn acquire_next_image(
        &mut self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let result = self.acquire_script.pop_front().unwrap_or(vk::Result::SUCCESS);
        self.calls.push(MockCall::AcquireNextImage { semaphore, result });
        self.check(swapchain.as_raw(), ObjectKind::Swapchain, "acquire_next_image");

        match result {
            vk::Result::SUCCESS | vk::Result::SUBOPTIMAL_KHR => {
                let count = self.images_of(swapchain).len().max(1) as u32;
                let next = self.next_image.entry(swapchain.as_raw()).or_insert(0);
                let image_index = *next % count;
                *next = (image_index + 1) % count;
                self.signal(semaphore, "acquire_next_image");
                Ok((image_index, result == vk::Result::SUBOPTIMAL_KHR))
            }
            error => Err(error),
        }
    }

    fn queue_present(
        &mut self,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VkResult<bool> {
        let result = self.present_script.pop_front().unwrap_or(vk::Result::SUCCESS);
        self.calls.push(MockCall::Present {
            image_index,
            wait_semaphore,
            result,
        });
        self.check(swapchain.as_raw(), ObjectKind::Swapchain, "queue_present");
        if image_index as usize >= self.images_of(swapchain).len() {
            self.violation(format!("present of out-of-range image {image_index}"));
        }
        self.consume(wait_semaphore, "queue_present");

        match result {
            vk::Result::SUCCESS => Ok(false),
            vk::Result::SUBOPTIMAL_KHR => Ok(true),
            error => Err(error),
        }
    }

    fn allocate_memory(
        &mut self,
        size: vk::DeviceSize,
        memory_type: u32,
    ) -> VkResult<vk::DeviceMemory> {
        if self.fail_allocations {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let Some(flags) = self
            .selected()
            .and_then(|d| d.memory_types.get(memory_type as usize).copied())
        else {
            self.violation(format!("allocation from unknown memory type {memory_type}"));
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        };
        let memory: vk::DeviceMemory = self.create(ObjectKind::Memory);
        let len = usize::try_from(size).map_err(|_| vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;
        self.memory.insert(memory.as_raw(), (flags, vec![0; len]));
        Ok(memory)
    }

    fn free_memory(&mut self, memory: vk::DeviceMemory) {
        self.destroy(memory.as_raw(), ObjectKind::Memory, "free_memory");
        self.memory.remove(&memory.as_raw());
    }

    fn write_memory(
        &mut self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        let Some((flags, contents)) = self.memory.get_mut(&memory.as_raw()) else {
            self.violation(format!("write to unknown memory {memory:?}"));
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        };
        if !flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let message = format!("mapped memory {memory:?} that is not host visible");
            self.violation(message);
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            let message = format!("write of {} bytes at {start} overflows {memory:?}", data.len());
            self.violation(message);
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let buffer: vk::Buffer = self.create(ObjectKind::Buffer);
        self.object_sizes.insert(buffer.as_raw(), size);
        Ok(buffer)
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        self.requirements(buffer.as_raw())
    }

    fn bind_buffer_memory(
        &mut self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
    ) -> VkResult<()> {
        self.check(buffer.as_raw(), ObjectKind::Buffer, "bind_buffer_memory");
        self.check(memory.as_raw(), ObjectKind::Memory, "bind_buffer_memory");
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        self.destroy(buffer.as_raw(), ObjectKind::Buffer, "destroy_buffer");
        self.object_sizes.remove(&buffer.as_raw());
    }

    fn create_image(&mut self, info: &ImageInfo) -> VkResult<vk::Image> {
        let image: vk::Image = self.create(ObjectKind::Image);
        let size = u64::from(info.extent.width) * u64::from(info.extent.height) * 4;
        self.object_sizes.insert(image.as_raw(), size);
        Ok(image)
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        self.requirements(image.as_raw())
    }

    fn bind_image_memory(&mut self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        self.check(image.as_raw(), ObjectKind::Image, "bind_image_memory");
        self.check(memory.as_raw(), ObjectKind::Memory, "bind_image_memory");
        Ok(())
    }

    fn destroy_image(&mut self, image: vk::Image) {
        self.destroy(image.as_raw(), ObjectKind::Image, "destroy_image");
        self.object_sizes.remove(&image.as_raw());
    }

    fn create_image_view(&mut self, info: &ImageViewInfo) -> VkResult<vk::ImageView> {
        if !self.is_swapchain_image(info.image) {
            self.check(info.image.as_raw(), ObjectKind::Image, "create_image_view");
        }
        Ok(self.create(ObjectKind::ImageView))
    }

    fn destroy_image_view(&mut self, view: vk::ImageView) {
        self.destroy(view.as_raw(), ObjectKind::ImageView, "destroy_image_view");
    }

    fn create_sampler(&mut self, _info: &SamplerInfo) -> VkResult<vk::Sampler> {
        Ok(self.create(ObjectKind::Sampler))
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        self.destroy(sampler.as_raw(), ObjectKind::Sampler, "destroy_sampler");
    }

    fn create_render_pass(&mut self, _info: &RenderPassInfo) -> VkResult<vk::RenderPass> {
        Ok(self.create(ObjectKind::RenderPass))
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.destroy(render_pass.as_raw(), ObjectKind::RenderPass, "destroy_render_pass");
    }

    fn create_framebuffer(&mut self, info: &FramebufferInfo) -> VkResult<vk::Framebuffer> {
        self.check(info.render_pass.as_raw(), ObjectKind::RenderPass, "create_framebuffer");
        for view in &info.attachments {
            self.check(view.as_raw(), ObjectKind::ImageView, "create_framebuffer");
        }
        Ok(self.create(ObjectKind::Framebuffer))
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.destroy(framebuffer.as_raw(), ObjectKind::Framebuffer, "destroy_framebuffer");
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VkResult<vk::ShaderModule> {
        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(vk::Result::ERROR_INVALID_SHADER_NV);
        }
        Ok(self.create(ObjectKind::ShaderModule))
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        self.destroy(module.as_raw(), ObjectKind::ShaderModule, "destroy_shader_module");
    }

    fn create_pipeline_layout(
        &mut self,
        _desc: &PipelineLayoutDesc,
    ) -> VkResult<vk::PipelineLayout> {
        Ok(self.create(ObjectKind::PipelineLayout))
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        self.destroy(layout.as_raw(), ObjectKind::PipelineLayout, "destroy_pipeline_layout");
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> VkResult<vk::Pipeline> {
        let op = "create_graphics_pipeline";
        self.check(desc.vertex_module.as_raw(), ObjectKind::ShaderModule, op);
        self.check(desc.fragment_module.as_raw(), ObjectKind::ShaderModule, op);
        self.check(desc.layout.as_raw(), ObjectKind::PipelineLayout, op);
        self.check(desc.render_pass.as_raw(), ObjectKind::RenderPass, op);
        if self.fail_pipeline_creation {
            return Err(vk::Result::ERROR_UNKNOWN);
        }
        let pipeline: vk::Pipeline = self.create(ObjectKind::Pipeline);
        self.calls.push(MockCall::CreatePipeline {
            pipeline,
            render_pass: desc.render_pass,
            extent: desc.extent,
        });
        Ok(pipeline)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.calls.push(MockCall::DestroyPipeline(pipeline));
        self.destroy(pipeline.as_raw(), ObjectKind::Pipeline, "destroy_pipeline");
    }

    fn create_semaphore(&mut self) -> VkResult<vk::Semaphore> {
        let semaphore: vk::Semaphore = self.create(ObjectKind::Semaphore);
        self.semaphores.insert(semaphore.as_raw(), false);
        Ok(semaphore)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.destroy(semaphore.as_raw(), ObjectKind::Semaphore, "destroy_semaphore");
        self.semaphores.remove(&semaphore.as_raw());
    }

    fn create_fence(&mut self, signaled: bool) -> VkResult<vk::Fence> {
        let fence: vk::Fence = self.create(ObjectKind::Fence);
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.fences.insert(fence.as_raw(), state);
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        if self.fences.get(&fence.as_raw()) == Some(&FenceState::Pending) {
            self.violation(format!("fence {fence:?} destroyed while pending"));
        }
        self.destroy(fence.as_raw(), ObjectKind::Fence, "destroy_fence");
        self.fences.remove(&fence.as_raw());
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, _timeout_ns: u64) -> VkResult<()> {
        self.calls.push(MockCall::WaitForFence(fence));
        let raw = fence.as_raw();
        match self.fences.get(&raw).copied() {
            Some(FenceState::Signaled) => Ok(()),
            Some(FenceState::Pending) => {
                self.retire(|submission| submission.fence == raw);
                Ok(())
            }
            Some(FenceState::Unsignaled) => {
                self.violation(format!("wait on fence {fence:?} that will never signal"));
                Err(vk::Result::ERROR_DEVICE_LOST)
            }
            None => {
                self.violation(format!("wait on unknown fence {fence:?}"));
                Err(vk::Result::ERROR_DEVICE_LOST)
            }
        }
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VkResult<()> {
        self.calls.push(MockCall::ResetFence(fence));
        let raw = fence.as_raw();
        match self.fences.get(&raw).copied() {
            Some(FenceState::Pending) => {
                self.violation(format!("reset of pending fence {fence:?}"));
            }
            None => self.violation(format!("reset of unknown fence {fence:?}")),
            _ => {}
        }
        self.fences.insert(raw, FenceState::Unsignaled);
        Ok(())
    }

    fn create_command_pool(&mut self, _queue_family: u32) -> VkResult<vk::CommandPool> {
        Ok(self.create(ObjectKind::CommandPool))
    }

    fn destroy_command_pool(&mut self, pool: vk::CommandPool) {
        let raw = pool.as_raw();
        let buffers: Vec<u64> = self
            .command_buffers
            .iter()
            .filter(|(_, &owner)| owner == raw)
            .map(|(&cmd, _)| cmd)
            .collect();
        for cmd in buffers {
            if self.in_flight.iter().any(|s| s.command_buffer == cmd) {
                self.violation(format!("pool destroyed while buffer {cmd:#x} is in flight"));
            }
            self.command_buffers.remove(&cmd);
            self.live.remove(&cmd);
        }
        self.destroy(raw, ObjectKind::CommandPool, "destroy_command_pool");
    }

    fn allocate_command_buffer(
        &mut self,
        pool: vk::CommandPool,
    ) -> VkResult<vk::CommandBuffer> {
        self.check(pool.as_raw(), ObjectKind::CommandPool, "allocate_command_buffer");
        let cmd: vk::CommandBuffer = self.create(ObjectKind::CommandBuffer);
        self.command_buffers.insert(cmd.as_raw(), pool.as_raw());
        Ok(cmd)
    }

    fn free_command_buffer(&mut self, pool: vk::CommandPool, command_buffer: vk::CommandBuffer) {
        let raw = command_buffer.as_raw();
        if self.in_flight.iter().any(|s| s.command_buffer == raw) {
            self.violation(format!("command buffer {command_buffer:?} freed while in flight"));
        }
        if self.command_buffers.get(&raw) != Some(&pool.as_raw()) {
            self.violation(format!("command buffer {command_buffer:?} freed to the wrong pool"));
        }
        self.destroy(raw, ObjectKind::CommandBuffer, "free_command_buffer");
        self.command_buffers.remove(&raw);
    }

    fn begin_command_buffer(
        &mut self,
        command_buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        self.check_command_buffer(command_buffer, "begin_command_buffer");
        Ok(())
    }

    fn end_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.check_command_buffer(command_buffer, "end_command_buffer");
        Ok(())
    }

    fn queue_submit(
        &mut self,
        queue: vk::Queue,
        submit: &SubmitInfo,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let op = "queue_submit";
        if self.fail_fenced_submits && fence != vk::Fence::null() {
            return Err(vk::Result::ERROR_DEVICE_LOST);
        }
        self.calls.push(MockCall::Submit {
            queue,
            submit: *submit,
            fence,
        });
        self.check_command_buffer(submit.command_buffer, op);

        if fence != vk::Fence::null() {
            match self.fences.get(&fence.as_raw()).copied() {
                Some(FenceState::Unsignaled) => {}
                Some(state) => {
                    self.violation(format!("submit with fence {fence:?} in state {state:?}"));
                }
                None => self.violation(format!("submit with unknown fence {fence:?}")),
            }
            self.fences.insert(fence.as_raw(), FenceState::Pending);
        }
        if let Some(wait) = submit.wait_semaphore {
            self.consume(wait, op);
        }
        if let Some(signal) = submit.signal_semaphore {
            self.signal(signal, op);
        }

        self.in_flight.push(InFlight {
            command_buffer: submit.command_buffer.as_raw(),
            fence: fence.as_raw(),
            queue: queue.as_raw(),
        });
        Ok(())
    }

    fn queue_wait_idle(&mut self, queue: vk::Queue) -> VkResult<()> {
        let raw = queue.as_raw();
        self.retire(|submission| submission.queue == raw);
        Ok(())
    }

    fn cmd_begin_render_pass(&mut self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.check_command_buffer(command_buffer, "cmd_begin_render_pass");
        self.check(begin.framebuffer.as_raw(), ObjectKind::Framebuffer, "cmd_begin_render_pass");
        let (color, depth) = color_depth_clear(&begin.clear_values);
        self.calls.push(MockCall::BeginRenderPass {
            command_buffer,
            framebuffer: begin.framebuffer,
            extent: begin.extent,
            color,
            depth,
        });
    }

    fn cmd_end_render_pass(&mut self, command_buffer: vk::CommandBuffer) {
        self.check_command_buffer(command_buffer, "cmd_end_render_pass");
    }

    fn cmd_bind_pipeline(&mut self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.check_command_buffer(command_buffer, "cmd_bind_pipeline");
        self.check(pipeline.as_raw(), ObjectKind::Pipeline, "cmd_bind_pipeline");
        self.calls.push(MockCall::BindPipeline {
            command_buffer,
            pipeline,
        });
    }

    fn cmd_bind_vertex_buffer(&mut self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        self.check_command_buffer(command_buffer, "cmd_bind_vertex_buffer");
        self.check(buffer.as_raw(), ObjectKind::Buffer, "cmd_bind_vertex_buffer");
        self.calls.push(MockCall::BindVertexBuffer {
            command_buffer,
            buffer,
        });
    }

    fn cmd_draw(&mut self, command_buffer: vk::CommandBuffer, vertex_count: u32) {
        self.check_command_buffer(command_buffer, "cmd_draw");
        self.calls.push(MockCall::Draw {
            command_buffer,
            vertex_count,
        });
    }

    fn cmd_pipeline_barrier(&mut self, command_buffer: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.check_command_buffer(command_buffer, "cmd_pipeline_barrier");
        if !self.is_swapchain_image(barrier.image) {
            self.check(barrier.image.as_raw(), ObjectKind::Image, "cmd_pipeline_barrier");
        }
        self.calls.push(MockCall::Barrier(*barrier));
    }

    fn cmd_copy_buffer(
        &mut self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        self.check_command_buffer(command_buffer, "cmd_copy_buffer");
        self.check(src.as_raw(), ObjectKind::Buffer, "cmd_copy_buffer");
        self.check(dst.as_raw(), ObjectKind::Buffer, "cmd_copy_buffer");
        self.calls.push(MockCall::CopyBuffer {
            src,
            dst,
            size: region.size,
        });
    }

    fn cmd_copy_buffer_to_image(
        &mut self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        _region: vk::BufferImageCopy,
    ) {
        self.check_command_buffer(command_buffer, "cmd_copy_buffer_to_image");
        self.check(src.as_raw(), ObjectKind::Buffer, "cmd_copy_buffer_to_image");
        self.check(dst.as_raw(), ObjectKind::Image, "cmd_copy_buffer_to_image");
        self.calls.push(MockCall::CopyBufferToImage { src, dst });
    }

    fn cmd_copy_image(
        &mut self,
        command_buffer: vk::CommandBuffer,
        src: vk::Image,
        _src_layout: vk::ImageLayout,
        dst: vk::Image,
        _dst_layout: vk::ImageLayout,
        _region: vk::ImageCopy,
    ) {
        self.check_command_buffer(command_buffer, "cmd_copy_image");
        self.check(src.as_raw(), ObjectKind::Image, "cmd_copy_image");
        self.check(dst.as_raw(), ObjectKind::Image, "cmd_copy_image");
        self.calls.push(MockCall::CopyImage { src, dst });
    }

    fn cmd_clear_attachments(
        &mut self,
        command_buffer: vk::CommandBuffer,
        _attachment: vk::ClearAttachment,
        rect: vk::ClearRect,
    ) {
        self.check_command_buffer(command_buffer, "cmd_clear_attachments");
        self.calls.push(MockCall::ClearDepth {
            command_buffer,
            extent: rect.rect.extent,
        });
    }
}
