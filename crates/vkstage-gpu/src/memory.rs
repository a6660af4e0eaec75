//! GPU buffers, images and their memory.
//!
//! Memory is allocated per object: each buffer or image owns exactly one
//! `vk::DeviceMemory`, chosen as the first memory type that satisfies both the
//! object's requirement mask and the requested property flags. Objects and
//! their memory are always released together.

use crate::command::{execute_single_time_commands, CommandPool};
use crate::driver::{Driver, ImageInfo, ImageViewInfo, SamplerInfo};
use crate::error::{GpuError, Result};
use ash::vk;

/// Index of the first memory type matching `type_bits` and `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
        .ok_or(GpuError::NoMatchingMemoryType {
            type_bits,
            properties,
        })
}

/// A buffer together with its dedicated memory.
#[derive(Debug, Clone, Copy)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

/// An image together with its dedicated memory.
#[derive(Debug, Clone, Copy)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl GpuImage {
    /// Null image, used before the first allocation.
    pub fn null() -> Self {
        Self {
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.image == vk::Image::null()
    }
}

fn allocate<D: Driver>(
    driver: &mut D,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type =
        find_memory_type(memory_properties, requirements.memory_type_bits, properties)?;
    driver
        .allocate_memory(requirements.size, memory_type)
        .map_err(|e| GpuError::AllocationFailed(format!("{} bytes: {e}", requirements.size)))
}

/// Create a buffer and bind freshly allocated memory to it.
pub fn create_buffer<D: Driver>(
    driver: &mut D,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> Result<GpuBuffer> {
    let buffer = driver.create_buffer(size, usage)?;
    let requirements = driver.buffer_memory_requirements(buffer);

    let memory = match allocate(driver, memory_properties, requirements, properties) {
        Ok(memory) => memory,
        Err(e) => {
            tracing::error!("Failed to back buffer of {size} bytes: {e}");
            driver.destroy_buffer(buffer);
            return Err(e);
        }
    };

    if let Err(e) = driver.bind_buffer_memory(buffer, memory) {
        driver.destroy_buffer(buffer);
        driver.free_memory(memory);
        return Err(e.into());
    }

    Ok(GpuBuffer {
        buffer,
        memory,
        size,
        usage,
    })
}

/// Destroy a buffer and free its memory.
pub fn destroy_buffer<D: Driver>(driver: &mut D, buffer: &GpuBuffer) {
    driver.destroy_buffer(buffer.buffer);
    driver.free_memory(buffer.memory);
}

/// Copy `data` into host-visible buffer memory.
pub fn write_buffer<D: Driver, T: bytemuck::Pod>(
    driver: &mut D,
    buffer: &GpuBuffer,
    data: &[T],
) -> Result<()> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    if bytes.len() as vk::DeviceSize > buffer.size {
        return Err(GpuError::Other(format!(
            "Write of {} bytes exceeds buffer size {}",
            bytes.len(),
            buffer.size
        )));
    }
    driver.write_memory(buffer.memory, 0, bytes)?;
    Ok(())
}

/// Create a 2D image and bind freshly allocated memory to it.
pub fn create_image<D: Driver>(
    driver: &mut D,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    info: &ImageInfo,
    properties: vk::MemoryPropertyFlags,
) -> Result<GpuImage> {
    let image = driver.create_image(info)?;
    let requirements = driver.image_memory_requirements(image);

    let memory = match allocate(driver, memory_properties, requirements, properties) {
        Ok(memory) => memory,
        Err(e) => {
            tracing::error!(
                "Failed to back {}x{} image: {e}",
                info.extent.width,
                info.extent.height
            );
            driver.destroy_image(image);
            return Err(e);
        }
    };

    if let Err(e) = driver.bind_image_memory(image, memory) {
        driver.destroy_image(image);
        driver.free_memory(memory);
        return Err(e.into());
    }

    Ok(GpuImage {
        image,
        memory,
        format: info.format,
        extent: info.extent,
    })
}

/// Destroy an image and free its memory.
pub fn destroy_image<D: Driver>(driver: &mut D, image: &GpuImage) {
    driver.destroy_image(image.image);
    driver.free_memory(image.memory);
}

/// Create a 2D view over `image`.
pub fn create_image_view<D: Driver>(
    driver: &mut D,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    driver
        .create_image_view(&ImageViewInfo {
            image,
            format,
            aspect,
        })
        .map_err(|e| {
            tracing::error!("Failed to create image view: {e}");
            e.into()
        })
}

/// Copy `size` bytes from `src` to `dst` and wait for completion.
pub fn copy_buffer<D: Driver>(
    driver: &mut D,
    pool: &CommandPool,
    queue: vk::Queue,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> Result<()> {
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    execute_single_time_commands(driver, pool, queue, |driver, cmd| {
        driver.cmd_copy_buffer(cmd, src, dst, region);
    })
}

/// Copy tightly packed texels from `buffer` into the color aspect of `image`.
///
/// The image must be in `TRANSFER_DST_OPTIMAL`.
pub fn copy_buffer_to_image<D: Driver>(
    driver: &mut D,
    pool: &CommandPool,
    queue: vk::Queue,
    buffer: vk::Buffer,
    image: vk::Image,
    extent: vk::Extent2D,
) -> Result<()> {
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        },
    };
    execute_single_time_commands(driver, pool, queue, |driver, cmd| {
        driver.cmd_copy_buffer_to_image(
            cmd,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            region,
        );
    })
}

/// Linear sampler with the given address mode.
pub fn sampler_info(address_mode: vk::SamplerAddressMode) -> SamplerInfo {
    SamplerInfo {
        filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode,
        max_anisotropy: None,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        min_lod: 0.0,
        max_lod: 0.0,
    }
}
