//! Swapchain management.
//!
//! A [`Swapchain`] owns everything whose shape depends on the surface extent:
//! color views, the depth attachment, the optional shadow target, the render
//! pass and one framebuffer per image. All of it is destroyed and rebuilt as a
//! unit.

use crate::command::CommandPool;
use crate::device::DeviceContext;
use crate::driver::{Driver, FramebufferInfo, ImageInfo, RenderPassInfo, SwapchainInfo};
use crate::error::{GpuError, Result};
use crate::layout::transition_image_layout;
use crate::memory::{self, GpuImage};
use ash::vk;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Composite alpha modes in order of preference.
pub const COMPOSITE_ALPHA_PREFERENCE: [vk::CompositeAlphaFlagsKHR; 4] = [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::INHERIT,
];

/// Select the best surface format.
///
/// A single `UNDEFINED` entry means the surface accepts anything.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };

    match available {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(preferred),
        _ => available
            .iter()
            .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
            .or_else(|| available.first())
            .copied(),
    }
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        // FIFO is always supported
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Number of swapchain images to request.
///
/// Prefers three, then two, and never goes below the surface minimum. A
/// maximum of zero means the surface imposes no upper bound.
pub fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let max = capabilities.max_image_count;
    let preferred = if max == 0 || max >= 3 {
        3
    } else if max >= 2 {
        2
    } else {
        capabilities.min_image_count
    };
    preferred.max(capabilities.min_image_count)
}

/// First supported composite alpha mode in preference order.
pub fn select_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> Option<vk::CompositeAlphaFlagsKHR> {
    COMPOSITE_ALPHA_PREFERENCE
        .into_iter()
        .find(|&mode| capabilities.supported_composite_alpha.contains(mode))
}

/// Calculate swapchain extent.
///
/// Surfaces that report a fixed current extent dictate it; otherwise the
/// requested size is clamped to the supported range.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width.max(capabilities.min_image_extent.width),
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height.max(capabilities.min_image_extent.height),
            ),
        }
    }
}

/// Sharing mode and family list for swapchain images.
pub fn image_sharing(graphics: u32, present: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics == present {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics, present])
    }
}

/// First depth format usable as an optimal-tiling depth attachment.
pub fn select_depth_format<D: Driver>(
    driver: &D,
    physical_device: vk::PhysicalDevice,
) -> Result<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| {
            driver
                .format_properties(physical_device, format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| {
            tracing::error!("No supported depth attachment format");
            GpuError::SwapchainCreation("no supported depth format".to_string())
        })
}

/// Render pass with one color attachment presented afterwards and one depth attachment.
pub fn render_pass_info(color_format: vk::Format, depth_format: vk::Format) -> RenderPassInfo {
    let color = vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: depth_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };

    RenderPassInfo {
        attachments: vec![color, depth],
        color_reference: vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
        depth_reference: vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        },
        dependencies: vec![dependency],
    }
}

/// Depth image that the shadow pass copies into, sampled by later passes.
#[derive(Debug, Clone, Copy)]
pub struct ShadowTarget {
    pub image: GpuImage,
    pub view: vk::ImageView,
    /// Prebuilt depth-to-shadow copy, submitted on the transfer queue.
    pub copy_cmd: vk::CommandBuffer,
    /// Pool `copy_cmd` was allocated from.
    pub copy_pool: CommandPool,
}

/// What the swapchain is built for.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainRequest {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub shadow_pass: bool,
    /// Pool on the transfer family for the shadow copy. The graphics pool is
    /// used when this is `None`.
    pub transfer_pool: Option<CommandPool>,
}

/// Swapchain wrapper.
#[derive(Debug)]
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub depth: GpuImage,
    pub depth_view: vk::ImageView,
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub shadow: Option<ShadowTarget>,
}

impl Swapchain {
    fn empty() -> Self {
        Self {
            swapchain: vk::SwapchainKHR::null(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            image_views: Vec::new(),
            depth: GpuImage::null(),
            depth_view: vk::ImageView::null(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            shadow: None,
        }
    }

    /// Create the swapchain and every extent-dependent attachment.
    ///
    /// On failure everything created so far is released.
    pub fn new<D: Driver>(
        driver: &mut D,
        device: &DeviceContext,
        pool: &CommandPool,
        request: SwapchainRequest,
    ) -> Result<Self> {
        let mut swapchain = Self::empty();
        if let Err(e) = swapchain.build(driver, device, pool, request) {
            tracing::error!("Swapchain creation failed: {e}");
            swapchain.destroy(driver);
            return Err(e);
        }
        tracing::info!(
            "Created swapchain {}x{} with {} images ({:?}, {:?})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len(),
            swapchain.surface_format.format,
            swapchain.present_mode
        );
        Ok(swapchain)
    }

    fn build<D: Driver>(
        &mut self,
        driver: &mut D,
        device: &DeviceContext,
        pool: &CommandPool,
        request: SwapchainRequest,
    ) -> Result<()> {
        let physical_device = device.physical_device;
        let capabilities = driver.surface_capabilities(physical_device)?;
        let formats = driver.surface_formats(physical_device)?;
        let present_modes = driver.present_modes(physical_device)?;

        self.surface_format = select_surface_format(&formats)
            .ok_or_else(|| GpuError::SwapchainCreation("no surface formats".to_string()))?;
        self.present_mode = select_present_mode(&present_modes, request.vsync);
        self.extent = calculate_extent(&capabilities, request.width, request.height);
        let composite_alpha = select_composite_alpha(&capabilities).ok_or_else(|| {
            GpuError::SwapchainCreation("no supported composite alpha mode".to_string())
        })?;
        let (sharing_mode, queue_family_indices) =
            image_sharing(device.families.graphics, device.families.present);

        let info = SwapchainInfo {
            min_image_count: select_image_count(&capabilities),
            surface_format: self.surface_format,
            extent: self.extent,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            sharing_mode,
            queue_family_indices,
            pre_transform: capabilities.current_transform,
            composite_alpha,
            present_mode: self.present_mode,
        };
        self.swapchain = driver
            .create_swapchain(&info)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        self.images = driver.swapchain_images(self.swapchain)?;
        for &image in &self.images {
            let view = memory::create_image_view(
                driver,
                image,
                self.surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.image_views.push(view);
        }

        let depth_format = select_depth_format(driver, physical_device)?;
        let (depth, depth_view) = create_depth_target(
            driver,
            device,
            pool,
            depth_format,
            self.extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC,
        )?;
        self.depth = depth;
        self.depth_view = depth_view;

        if request.shadow_pass {
            let (image, view) = create_depth_target(
                driver,
                device,
                pool,
                depth_format,
                self.extent,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
            )?;
            let copy_pool = request.transfer_pool.unwrap_or(*pool);
            self.shadow = Some(ShadowTarget {
                image,
                view,
                copy_cmd: vk::CommandBuffer::null(),
                copy_pool,
            });
            let copy_cmd = record_shadow_copy(driver, &copy_pool, &self.depth, &image)?;
            if let Some(shadow) = self.shadow.as_mut() {
                shadow.copy_cmd = copy_cmd;
            }
        }

        self.render_pass =
            driver.create_render_pass(&render_pass_info(self.surface_format.format, depth_format))?;

        for &view in &self.image_views {
            let framebuffer = driver.create_framebuffer(&FramebufferInfo {
                render_pass: self.render_pass,
                attachments: vec![view, self.depth_view],
                extent: self.extent,
            })?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    /// Number of swapchain images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroy the swapchain and its attachments.
    ///
    /// Null members (from a partial build) are skipped. The caller must make
    /// sure the device is idle.
    pub fn destroy<D: Driver>(&mut self, driver: &mut D) {
        for framebuffer in self.framebuffers.drain(..) {
            driver.destroy_framebuffer(framebuffer);
        }

        if let Some(shadow) = self.shadow.take() {
            if shadow.copy_cmd != vk::CommandBuffer::null() {
                shadow.copy_pool.free(driver, shadow.copy_cmd);
            }
            destroy_depth_target(driver, &shadow.image, shadow.view);
        }
        destroy_depth_target(driver, &self.depth, self.depth_view);
        self.depth = GpuImage::null();
        self.depth_view = vk::ImageView::null();

        if self.render_pass != vk::RenderPass::null() {
            driver.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }

        for view in self.image_views.drain(..) {
            driver.destroy_image_view(view);
        }
        self.images.clear();

        if self.swapchain != vk::SwapchainKHR::null() {
            driver.destroy_swapchain(self.swapchain);
            self.swapchain = vk::SwapchainKHR::null();
        }
    }
}

fn create_depth_target<D: Driver>(
    driver: &mut D,
    device: &DeviceContext,
    pool: &CommandPool,
    format: vk::Format,
    extent: vk::Extent2D,
    usage: vk::ImageUsageFlags,
) -> Result<(GpuImage, vk::ImageView)> {
    let info = ImageInfo {
        extent,
        format,
        tiling: vk::ImageTiling::OPTIMAL,
        usage,
    };
    let image = memory::create_image(
        driver,
        &device.memory_properties,
        &info,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    let view = match memory::create_image_view(driver, image.image, format, vk::ImageAspectFlags::DEPTH) {
        Ok(view) => view,
        Err(e) => {
            memory::destroy_image(driver, &image);
            return Err(e);
        }
    };

    if let Err(e) = transition_image_layout(
        driver,
        pool,
        device.graphics_queue,
        image.image,
        format,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        false,
    ) {
        destroy_depth_target(driver, &image, view);
        return Err(e);
    }

    Ok((image, view))
}

fn destroy_depth_target<D: Driver>(driver: &mut D, image: &GpuImage, view: vk::ImageView) {
    if view != vk::ImageView::null() {
        driver.destroy_image_view(view);
    }
    if !image.is_null() {
        memory::destroy_image(driver, image);
    }
}

/// Record the reusable depth-to-shadow copy command buffer.
fn record_shadow_copy<D: Driver>(
    driver: &mut D,
    pool: &CommandPool,
    depth: &GpuImage,
    shadow: &GpuImage,
) -> Result<vk::CommandBuffer> {
    let cmd = pool.allocate(driver)?;

    let subresource = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::DEPTH,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let region = vk::ImageCopy {
        src_subresource: subresource,
        src_offset: vk::Offset3D::default(),
        dst_subresource: subresource,
        dst_offset: vk::Offset3D::default(),
        extent: vk::Extent3D {
            width: depth.extent.width,
            height: depth.extent.height,
            depth: 1,
        },
    };

    let recorded = driver
        .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::empty())
        .and_then(|()| {
            driver.cmd_copy_image(
                cmd,
                depth.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                shadow.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                region,
            );
            driver.end_command_buffer(cmd)
        });

    if let Err(e) = recorded {
        pool.free(driver, cmd);
        return Err(e.into());
    }
    Ok(cmd)
}
