//! Synchronization primitives.

use crate::driver::Driver;
use crate::error::{GpuError, Result};
use ash::vk;

/// Wait for a fence to be signaled.
///
/// Waits with an infinite timeout and keeps waiting while the driver reports
/// `TIMEOUT`.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub fn wait_for_fence<D: Driver>(driver: &mut D, fence: vk::Fence) -> Result<()> {
    loop {
        match driver.wait_for_fence(fence, u64::MAX) {
            Ok(()) => return Ok(()),
            Err(vk::Result::TIMEOUT) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Synchronization objects for one frame slot.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Fence signaled when the slot's last submission completes.
    pub fence: vk::Fence,
    /// Semaphore signaled when the swapchain image is available.
    pub acquire: vk::Semaphore,
    /// Semaphore signaled when the main pass is complete.
    pub draw: vk::Semaphore,
    /// Semaphore signaled when the shadow pass is complete.
    pub draw_shadow: Option<vk::Semaphore>,
}

impl FrameSync {
    fn new<D: Driver>(driver: &mut D, shadow_pass: bool) -> Result<Self> {
        let fence = driver.create_fence(true)?;
        let mut sync = Self {
            fence,
            acquire: vk::Semaphore::null(),
            draw: vk::Semaphore::null(),
            draw_shadow: None,
        };
        if let Err(e) = sync.create_semaphores(driver, shadow_pass) {
            sync.destroy(driver);
            return Err(e);
        }
        Ok(sync)
    }

    fn create_semaphores<D: Driver>(&mut self, driver: &mut D, shadow_pass: bool) -> Result<()> {
        self.acquire = driver.create_semaphore()?;
        self.draw = driver.create_semaphore()?;
        if shadow_pass {
            self.draw_shadow = Some(driver.create_semaphore()?);
        }
        Ok(())
    }

    fn destroy<D: Driver>(&self, driver: &mut D) {
        driver.destroy_fence(self.fence);
        for semaphore in [Some(self.acquire), Some(self.draw), self.draw_shadow]
            .into_iter()
            .flatten()
            .filter(|s| *s != vk::Semaphore::null())
        {
            driver.destroy_semaphore(semaphore);
        }
    }
}

/// Rotating set of per-frame synchronization objects.
#[derive(Debug)]
pub struct FrameSynchronizer {
    frames: Vec<FrameSync>,
    frame_index: usize,
    shadow_submitted: bool,
}

impl FrameSynchronizer {
    /// Create sync objects for `frames_in_flight` slots.
    ///
    /// Fences start signaled so the first wait on each slot returns
    /// immediately.
    pub fn new<D: Driver>(driver: &mut D, frames_in_flight: usize, shadow_pass: bool) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(GpuError::InvalidState(
                "At least one frame in flight is required".to_string(),
            ));
        }

        let mut frames = Vec::with_capacity(frames_in_flight);
        for index in 0..frames_in_flight {
            match FrameSync::new(driver, shadow_pass) {
                Ok(sync) => frames.push(sync),
                Err(e) => {
                    tracing::error!("Could not create sync objects for frame {index}: {e}");
                    for sync in &frames {
                        sync.destroy(driver);
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!("Created sync objects for {frames_in_flight} frames");
        Ok(Self {
            frames,
            frame_index: 0,
            shadow_submitted: false,
        })
    }

    /// Advance to the next frame slot and return its index.
    pub fn advance(&mut self) -> usize {
        self.frame_index = (self.frame_index + 1) % self.frames.len();
        self.shadow_submitted = false;
        self.frame_index
    }

    /// Get the current frame index.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Get the current frame's sync objects.
    pub fn current(&self) -> &FrameSync {
        &self.frames[self.frame_index]
    }

    /// Sync objects of an arbitrary slot.
    pub fn frame(&self, index: usize) -> Option<&FrameSync> {
        self.frames.get(index)
    }

    /// Whether the current frame's shadow pass has been submitted.
    pub fn shadow_submitted(&self) -> bool {
        self.shadow_submitted
    }

    pub fn set_shadow_submitted(&mut self, submitted: bool) {
        self.shadow_submitted = submitted;
    }

    /// Swap the current slot's fence and semaphores for fresh ones.
    ///
    /// Used after a failed submission left the fence unsignaled or a
    /// semaphore signaled with no one to wait on it. Nothing submitted on
    /// the slot may still be pending.
    pub fn replace_current<D: Driver>(&mut self, driver: &mut D) -> Result<()> {
        let shadow_pass = self.current().draw_shadow.is_some();
        let fresh = FrameSync::new(driver, shadow_pass)?;
        let stale = std::mem::replace(&mut self.frames[self.frame_index], fresh);
        stale.destroy(driver);
        self.shadow_submitted = false;
        tracing::debug!(frame = self.frame_index, "Replaced frame sync objects");
        Ok(())
    }

    /// Destroy all sync objects.
    ///
    /// The caller must make sure no submission still references them.
    pub fn destroy<D: Driver>(self, driver: &mut D) {
        for sync in &self.frames {
            sync.destroy(driver);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DeviceInfo;
    use crate::mock::{MockDriver, ObjectKind};

    fn driver() -> MockDriver {
        let mut driver = MockDriver::new();
        let device_info = DeviceInfo {
            queue_families: vec![0],
            ..Default::default()
        };
        driver.create_instance(&Default::default()).unwrap();
        driver
            .create_device(MockDriver::physical_device_handle(0), &device_info)
            .unwrap();
        driver
    }

    #[test]
    fn frame_index_wraps() {
        let mut driver = driver();
        let mut sync = FrameSynchronizer::new(&mut driver, 3, false).unwrap();
        assert_eq!(sync.frame_index(), 0);

        let visited: Vec<usize> = (0..7).map(|_| sync.advance()).collect();
        assert_eq!(visited, vec![1, 2, 0, 1, 2, 0, 1]);
        sync.destroy(&mut driver);
    }

    #[test]
    fn shadow_semaphores_only_with_shadow_pass() {
        let mut driver = driver();
        let plain = FrameSynchronizer::new(&mut driver, 2, false).unwrap();
        assert!(plain.current().draw_shadow.is_none());
        assert_eq!(driver.live_of(ObjectKind::Semaphore), 4);

        let shadow = FrameSynchronizer::new(&mut driver, 2, true).unwrap();
        assert!(shadow.current().draw_shadow.is_some());
        assert_eq!(driver.live_of(ObjectKind::Semaphore), 10);

        plain.destroy(&mut driver);
        shadow.destroy(&mut driver);
        assert_eq!(driver.live_count(), 0);
        assert!(driver.violations().is_empty());
    }

    #[test]
    fn zero_frames_is_rejected() {
        let mut driver = driver();
        assert!(matches!(
            FrameSynchronizer::new(&mut driver, 0, false),
            Err(GpuError::InvalidState(_))
        ));
        assert_eq!(driver.live_count(), 0);
    }

    #[test]
    fn advance_clears_shadow_flag() {
        let mut driver = driver();
        let mut sync = FrameSynchronizer::new(&mut driver, 2, true).unwrap();
        sync.set_shadow_submitted(true);
        assert!(sync.shadow_submitted());
        sync.advance();
        assert!(!sync.shadow_submitted());
        sync.destroy(&mut driver);
    }

    #[test]
    fn replacing_a_slot_leaves_it_waitable() {
        let mut driver = driver();
        let mut sync = FrameSynchronizer::new(&mut driver, 2, true).unwrap();
        sync.advance();
        let old = *sync.current();
        // Fence left unsignaled, as after a failed submit.
        driver.reset_fence(old.fence).unwrap();
        sync.set_shadow_submitted(true);

        sync.replace_current(&mut driver).unwrap();
        let new = *sync.current();
        assert_ne!(new.fence, old.fence);
        assert_ne!(new.acquire, old.acquire);
        assert!(new.draw_shadow.is_some());
        assert!(!sync.shadow_submitted());
        assert_eq!(sync.frame_index(), 1);

        wait_for_fence(&mut driver, new.fence).unwrap();
        assert_eq!(driver.live_of(ObjectKind::Fence), 2);
        assert_eq!(driver.live_of(ObjectKind::Semaphore), 6);
        assert!(driver.violations().is_empty());
        sync.destroy(&mut driver);
        assert_eq!(driver.live_count(), 0);
    }

    #[test]
    fn fences_start_signaled() {
        let mut driver = driver();
        let sync = FrameSynchronizer::new(&mut driver, 2, false).unwrap();
        for index in 0..2 {
            let fence = sync.frame(index).unwrap().fence;
            wait_for_fence(&mut driver, fence).unwrap();
            driver.reset_fence(fence).unwrap();
        }
        assert!(driver.violations().is_empty());
        sync.destroy(&mut driver);
    }
}
