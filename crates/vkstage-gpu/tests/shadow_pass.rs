//! Shadow pass submission order and the depth-to-shadow copy.

mod common;

use ash::vk;
use common::{
    assert_clean, backend_with, count, quad, ready_backend_with, running_backend, FrameLoop,
};
use vkstage_gpu::driver::{ImageBarrier, SubmitInfo};
use vkstage_gpu::mock::{MockCall, MockDriver, MockPhysicalDevice, ObjectKind};
use vkstage_gpu::{DrawPass, GpuError};

/// Fenced submissions in call order.
fn fenced_submits(driver: &MockDriver) -> Vec<(vk::Queue, SubmitInfo)> {
    driver
        .calls()
        .iter()
        .filter_map(|call| match call {
            MockCall::Submit {
                queue,
                submit,
                fence,
            } if *fence != vk::Fence::null() => Some((*queue, *submit)),
            _ => None,
        })
        .collect()
}

fn barriers(calls: &[MockCall]) -> Vec<ImageBarrier> {
    calls
        .iter()
        .filter_map(|call| match call {
            MockCall::Barrier(barrier) => Some(*barrier),
            _ => None,
        })
        .collect()
}

fn transitions_of(barriers: &[ImageBarrier], image: vk::Image) -> Vec<(vk::ImageLayout, vk::ImageLayout)> {
    barriers
        .iter()
        .filter(|b| b.image == image)
        .map(|b| (b.old_layout, b.new_layout))
        .collect()
}

#[test]
fn shadow_main_and_present_are_chained() {
    let (mut backend, slot) = running_backend(true, 2);
    let mut frames = FrameLoop::new(2);
    for _ in 0..3 {
        frames.render(&mut backend, slot).unwrap();
    }

    let copy_cmd = backend.swapchain().unwrap().shadow.unwrap().copy_cmd;
    let graphics = backend.device().unwrap().graphics_queue;
    let transfer = backend.device().unwrap().transfer_queue;

    let acquires: Vec<vk::Semaphore> = backend
        .driver()
        .calls()
        .iter()
        .filter_map(|call| match call {
            MockCall::AcquireNextImage { semaphore, .. } => Some(*semaphore),
            _ => None,
        })
        .collect();
    let presents: Vec<vk::Semaphore> = backend
        .driver()
        .calls()
        .iter()
        .filter_map(|call| match call {
            MockCall::Present { wait_semaphore, .. } => Some(*wait_semaphore),
            _ => None,
        })
        .collect();

    let submits = fenced_submits(backend.driver());
    assert_eq!(submits.len(), 9);
    for (frame, chunk) in submits.chunks(3).enumerate() {
        let [(shadow_queue, shadow), (copy_queue, copy), (main_queue, main)] = chunk else {
            unreachable!();
        };
        assert_eq!(*shadow_queue, graphics);
        assert_eq!(shadow.wait_semaphore, Some(acquires[frame]));

        assert_eq!(*copy_queue, transfer);
        assert_eq!(copy.command_buffer, copy_cmd);
        assert_eq!(copy.wait_semaphore, None);
        assert_eq!(copy.signal_semaphore, None);

        assert_eq!(*main_queue, graphics);
        assert_eq!(main.wait_semaphore, shadow.signal_semaphore);
        assert_ne!(main.signal_semaphore, shadow.signal_semaphore);
        assert_eq!(main.signal_semaphore, Some(presents[frame]));
    }

    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn copy_moves_shadow_image_to_a_sampleable_layout() {
    let (mut backend, slot) = running_backend(true, 2);
    let mut frames = FrameLoop::new(2);
    // The first frame also refreshes the stale shadow layout.
    frames.render(&mut backend, slot).unwrap();
    backend.driver_mut().clear_calls();
    frames.render(&mut backend, slot).unwrap();

    let swapchain = backend.swapchain().unwrap();
    let depth = swapchain.depth.image;
    let shadow = swapchain.shadow.unwrap().image.image;
    let recorded = barriers(backend.driver().calls());

    use vk::ImageLayout as L;
    assert_eq!(
        transitions_of(&recorded, shadow),
        vec![
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
        ]
    );
    // Shadow pass begin, copy source, main pass begin.
    assert_eq!(
        transitions_of(&recorded, depth),
        vec![
            (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
            (L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL, L::TRANSFER_SRC_OPTIMAL),
            (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ]
    );
    assert!(recorded
        .iter()
        .filter(|b| b.image == depth || b.image == shadow)
        .all(|b| b.aspect == vk::ImageAspectFlags::DEPTH));

    assert_eq!(
        count(backend.driver(), |call| matches!(
            call,
            MockCall::CopyImage { .. }
        )),
        0,
        "the copy command buffer is recorded once per swapchain"
    );
}

#[test]
fn stale_shadow_layout_is_refreshed_once_per_change() {
    let (mut backend, slot) = running_backend(true, 2);
    let mut frames = FrameLoop::new(2);
    let refreshes = |backend: &vkstage_gpu::Backend<MockDriver>| {
        let shadow = backend.swapchain().unwrap().shadow.unwrap().image.image;
        transitions_of(&barriers(backend.driver().calls()), shadow)
            .into_iter()
            .filter(|&pair| {
                pair == (
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )
            })
            .count()
    };

    backend.driver_mut().clear_calls();
    for _ in 0..3 {
        frames.render(&mut backend, slot).unwrap();
    }
    assert_eq!(refreshes(&backend), 1);

    backend.create_pipeline(quad()).unwrap();
    backend.driver_mut().clear_calls();
    frames.render(&mut backend, slot).unwrap();
    frames.render(&mut backend, slot).unwrap();
    assert_eq!(refreshes(&backend), 1);

    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn separate_transfer_family_is_used_for_the_copy() {
    let device = MockPhysicalDevice {
        queue_families: vec![
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    let mut backend = ready_backend_with(MockDriver::with_devices(vec![device]), true, 2);
    let slot = backend.create_pipeline(common::triangle()).unwrap();
    backend.create_sync_objects().unwrap();

    let context = backend.device().unwrap();
    assert_eq!(context.families.graphics, 0);
    assert_eq!(context.families.transfer, 1);
    assert_eq!(context.transfer_queue, MockDriver::queue_handle(1));
    // One pool per family so the copy buffer matches its queue.
    assert_eq!(backend.driver().live_of(ObjectKind::CommandPool), 2);
    assert!(backend.driver().calls().iter().any(|call| matches!(
        call,
        MockCall::CreateDevice { queue_families, .. } if *queue_families == vec![0, 1]
    )));

    let mut frames = FrameLoop::new(2);
    frames.render(&mut backend, slot).unwrap();
    let copy_cmd = backend.swapchain().unwrap().shadow.unwrap().copy_cmd;
    let copy_queue = fenced_submits(backend.driver())
        .into_iter()
        .find(|(_, submit)| submit.command_buffer == copy_cmd)
        .map(|(queue, _)| queue);
    assert_eq!(copy_queue, Some(MockDriver::queue_handle(1)));

    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn transfer_family_is_graphics_without_shadow_pass() {
    let device = MockPhysicalDevice {
        queue_families: vec![
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::GRAPHICS,
                queue_count: 1,
                ..Default::default()
            },
            vk::QueueFamilyProperties {
                queue_flags: vk::QueueFlags::TRANSFER,
                queue_count: 1,
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    let backend = ready_backend_with(MockDriver::with_devices(vec![device]), false, 2);
    let families = backend.device().unwrap().families;
    assert_eq!(families.transfer, families.graphics);
    assert_eq!(families.unique(), vec![0]);
}

#[test]
fn main_pass_alone_waits_on_acquire() {
    let (mut backend, slot) = running_backend(true, 2);
    let acquired = backend.acquire_next_image().unwrap().unwrap();
    let cmd = backend.begin_draw_command_buffer().unwrap();
    backend.bind_pipeline(cmd, slot).unwrap();
    backend.end_draw_command_buffer(cmd).unwrap();
    backend.draw(cmd, DrawPass::Main).unwrap();
    backend.present_next_image().unwrap();

    let acquire = backend.driver().calls().iter().find_map(|call| match call {
        MockCall::AcquireNextImage { semaphore, .. } => Some(*semaphore),
        _ => None,
    });
    let (_, main) = *fenced_submits(backend.driver()).last().unwrap();
    assert_eq!(main.wait_semaphore, acquire);

    backend.wait_for_frame(acquired.frame_index).unwrap();
    backend.destroy_draw_command_buffer(cmd).unwrap();
    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn shadow_operations_need_the_shadow_pass() {
    let (mut backend, slot) = running_backend(false, 2);
    assert!(backend.swapchain().unwrap().shadow.is_none());
    assert_eq!(backend.driver().live_of(ObjectKind::Semaphore), 4);

    let acquired = backend.acquire_next_image().unwrap().unwrap();
    let cmd = backend.begin_draw_command_buffer().unwrap();
    backend.bind_pipeline(cmd, slot).unwrap();
    backend.end_draw_command_buffer(cmd).unwrap();

    let err = backend.draw(cmd, DrawPass::Shadow).unwrap_err();
    assert!(matches!(err, GpuError::InvalidState(_)), "{err}");
    let err = backend.copy_depth_to_shadow_image().unwrap_err();
    assert!(matches!(err, GpuError::InvalidState(_)), "{err}");

    // The rejected shadow draw left the frame usable.
    backend.draw(cmd, DrawPass::Main).unwrap();
    backend.present_next_image().unwrap();
    backend.wait_for_frame(acquired.frame_index).unwrap();
    backend.destroy_draw_command_buffer(cmd).unwrap();
    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn shadow_targets_follow_the_swapchain() {
    let mut backend = backend_with(MockDriver::new(), true);
    backend.create_instance(&[]).unwrap();
    backend.init(2).unwrap();
    backend.set_width_height(640, 480);
    backend.create_swapchain().unwrap();

    let swapchain = backend.swapchain().unwrap();
    let shadow = swapchain.shadow.unwrap();
    assert_ne!(shadow.image.image, swapchain.depth.image);
    assert_eq!(shadow.image.extent, swapchain.extent);
    assert_eq!(shadow.image.format, swapchain.depth.format);
    assert_ne!(shadow.copy_cmd, vk::CommandBuffer::null());
    assert!(backend.driver().calls().iter().any(|call| matches!(
        call,
        MockCall::CopyImage { src, dst } if *src == swapchain.depth.image && *dst == shadow.image.image
    )));

    backend.destroy_swapchain().unwrap();
    assert_eq!(backend.driver().live_of(ObjectKind::CommandBuffer), 0);
    assert_eq!(backend.driver().live_of(ObjectKind::Image), 0);
    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}

#[test]
fn failed_shadow_copy_skips_the_frame() {
    let (mut backend, slot) = running_backend(true, 1);
    let acquired = backend.acquire_next_image().unwrap().unwrap();
    let shadow_cmd = backend.begin_draw_command_buffer().unwrap();
    backend.bind_pipeline(shadow_cmd, slot).unwrap();
    backend.end_draw_command_buffer(shadow_cmd).unwrap();
    backend.draw(shadow_cmd, DrawPass::Shadow).unwrap();

    backend.driver_mut().fail_fenced_submits = true;
    let err = backend.copy_depth_to_shadow_image().unwrap_err();
    assert!(
        matches!(err, GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)),
        "{err}"
    );
    backend.driver_mut().fail_fenced_submits = false;

    backend.wait_for_frame(acquired.frame_index).unwrap();
    backend.destroy_draw_command_buffer(shadow_cmd).unwrap();

    // The next frame moves the half-copied shadow image back to a sampleable
    // layout before running the copy again.
    backend.driver_mut().clear_calls();
    let mut frames = FrameLoop::new(1);
    assert!(frames.render(&mut backend, slot).unwrap().is_some());

    use vk::ImageLayout as L;
    let shadow = backend.swapchain().unwrap().shadow.unwrap().image.image;
    assert_eq!(
        transitions_of(&barriers(backend.driver().calls()), shadow),
        vec![
            (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL),
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL),
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL),
        ]
    );
    assert!(
        backend.driver().violations().is_empty(),
        "{:#?}",
        backend.driver().violations()
    );

    frames.release(&mut backend).unwrap();
    backend.shutdown().unwrap();
    assert_clean(backend.driver());
}
