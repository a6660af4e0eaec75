//! Image layout transitions.
//!
//! Only a fixed set of `(old, new)` layout pairs is recognized. Each pair maps
//! to the access masks and pipeline stages of its barrier; everything else is
//! rejected with [`GpuError::UnsupportedLayoutTransition`] before any command
//! buffer is allocated.

use crate::command::{execute_single_time_commands, CommandPool};
use crate::driver::{Driver, ImageBarrier};
use crate::error::{GpuError, Result};
use ash::vk;

/// Access masks and stages for one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Every layout pair the backend knows how to transition.
pub const SUPPORTED_TRANSITIONS: [(vk::ImageLayout, vk::ImageLayout); 6] = [
    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
    (
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    ),
    (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
    (
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    ),
    (vk::ImageLayout::PRESENT_SRC_KHR, vk::ImageLayout::GENERAL),
    (
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    ),
];

/// Barrier masks for `old -> new`.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            A::TRANSFER_WRITE,
            A::SHADER_READ,
            S::TRANSFER,
            S::FRAGMENT_SHADER,
        ),
        // Contents are discarded, so there is no prior write to wait for.
        (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::empty(), A::SHADER_READ, S::TOP_OF_PIPE, S::FRAGMENT_SHADER)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::PRESENT_SRC_KHR, L::GENERAL) => {
            (A::MEMORY_READ, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
        }
        (L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => (
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            A::TRANSFER_READ,
            S::LATE_FRAGMENT_TESTS,
            S::TRANSFER,
        ),
        _ => return Err(GpuError::UnsupportedLayoutTransition { old, new }),
    };

    Ok(TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Whether `format` carries a stencil component.
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Aspect mask a barrier on an image of `format` must cover.
pub fn barrier_aspect(format: vk::Format, new: vk::ImageLayout, only_depth: bool) -> vk::ImageAspectFlags {
    if new == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL || only_depth {
        if has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Build the barrier for a supported transition.
pub fn image_barrier(
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    only_depth: bool,
) -> Result<ImageBarrier> {
    let masks = transition_masks(old, new)?;
    Ok(ImageBarrier {
        image,
        old_layout: old,
        new_layout: new,
        aspect: barrier_aspect(format, new, only_depth),
        src_access: masks.src_access,
        dst_access: masks.dst_access,
        src_stage: masks.src_stage,
        dst_stage: masks.dst_stage,
    })
}

/// Transition `image` synchronously through a single-time command buffer.
#[allow(clippy::too_many_arguments)]
pub fn transition_image_layout<D: Driver>(
    driver: &mut D,
    pool: &CommandPool,
    queue: vk::Queue,
    image: vk::Image,
    format: vk::Format,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
    only_depth: bool,
) -> Result<()> {
    let barrier = image_barrier(image, format, old, new, only_depth).map_err(|e| {
        tracing::error!("{e}");
        e
    })?;
    execute_single_time_commands(driver, pool, queue, |driver, cmd| {
        driver.cmd_pipeline_barrier(cmd, &barrier);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_supported_pair_has_masks() {
        for (old, new) in SUPPORTED_TRANSITIONS {
            assert!(transition_masks(old, new).is_ok(), "{old:?} -> {new:?}");
        }
    }

    #[test]
    fn unsupported_pairs_are_rejected() {
        let rejected = [
            (vk::ImageLayout::GENERAL, vk::ImageLayout::PRESENT_SRC_KHR),
            (
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ),
            (
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::UNDEFINED),
        ];
        for (old, new) in rejected {
            assert!(matches!(
                transition_masks(old, new),
                Err(GpuError::UnsupportedLayoutTransition { .. })
            ));
        }
    }

    #[test]
    fn depth_attachment_masks() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(masks
            .dst_access
            .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
    }

    #[test]
    fn aspect_selection() {
        let depth = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        let read = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;

        assert_eq!(
            barrier_aspect(vk::Format::D32_SFLOAT, depth, false),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            barrier_aspect(vk::Format::D24_UNORM_S8_UINT, depth, false),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            barrier_aspect(vk::Format::D32_SFLOAT, read, true),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            barrier_aspect(vk::Format::R8G8B8A8_SRGB, read, false),
            vk::ImageAspectFlags::COLOR
        );
    }
}
