// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync, plus the bookkeeping
// that decides which frame slot and fence a swapchain image belongs to.

use anyhow::{Context, Result};
use ash::vk;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the first wait returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create sync objects for a frame")?;
            let in_flight_fence = match device.device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(e).context("Failed to create sync objects for a frame");
                }
            };

            Ok(Self {
                image_available,
                in_flight_fence,
            })
        }
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Create `count` binary semaphores, releasing them all if one fails
pub fn create_semaphores(device: &VulkanDevice, count: usize) -> Result<Vec<vk::Semaphore>> {
    let semaphore_info = vk::SemaphoreCreateInfo::default();
    let mut semaphores = Vec::with_capacity(count);

    for _ in 0..count {
        match unsafe { device.device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(e) => {
                destroy_semaphores(&device.device, &semaphores);
                return Err(e).context("Failed to create render semaphores");
            }
        }
    }

    Ok(semaphores)
}

pub fn destroy_semaphores(device: &ash::Device, semaphores: &[vk::Semaphore]) {
    unsafe {
        for &semaphore in semaphores {
            device.destroy_semaphore(semaphore, None);
        }
    }
}

/// Per swapchain image: fence of the last frame that rendered to it, and the
/// semaphore presentation waits on.
#[derive(Debug, Clone, Copy)]
struct ImageSlot {
    fence: vk::Fence,
    render_finished: vk::Semaphore,
}

/// Tracks the current frame slot and the per-image sync state.
///
/// With more swapchain images than frame slots (or out-of-order acquires) an
/// image can come back while the frame that last rendered to it is still on
/// the GPU; `claim_image` hands back that frame's fence so the caller waits.
/// `render_finished` is keyed by image because presentation holds it until the
/// image is acquired again, not until the frame slot comes round.
#[derive(Debug)]
pub struct FramesInFlight {
    max_frames: usize,
    current: usize,
    images: Vec<ImageSlot>,
}

impl FramesInFlight {
    pub fn new(max_frames: usize) -> Self {
        Self {
            max_frames: max_frames.max(1),
            current: 0,
            images: Vec::new(),
        }
    }

    /// Index of the frame slot being recorded
    pub fn current(&self) -> usize {
        self.current
    }

    /// Mark `image_index` as used by `fence`.
    ///
    /// Returns the fence of the previous frame using this image, if any.
    pub fn claim_image(&mut self, image_index: usize, fence: vk::Fence) -> Option<vk::Fence> {
        let slot = self.images.get_mut(image_index)?;
        let previous = std::mem::replace(&mut slot.fence, fence);
        (previous != vk::Fence::null() && previous != fence).then_some(previous)
    }

    /// Semaphore signalled when rendering to `image_index` is done
    pub fn render_finished(&self, image_index: usize) -> Option<vk::Semaphore> {
        self.images.get(image_index).map(|slot| slot.render_finished)
    }

    /// Start over with one image per semaphore in `render_finished`.
    ///
    /// Forgets image ownership and returns the semaphores of the previous
    /// swapchain for the caller to destroy.
    pub fn reset_images(&mut self, render_finished: Vec<vk::Semaphore>) -> Vec<vk::Semaphore> {
        let previous = self.images.iter().map(|slot| slot.render_finished).collect();
        self.images = render_finished
            .into_iter()
            .map(|render_finished| ImageSlot {
                fence: vk::Fence::null(),
                render_finished,
            })
            .collect();
        previous
    }

    /// Move to the next frame slot
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.max_frames;
    }
}

/// When the swapchain has to be (re)built and whether a frame can be drawn.
///
/// Tracks the window size the next swapchain is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainState {
    window_extent: vk::Extent2D,
    needs_rebuild: bool,
    is_minimized: bool,
}

impl SwapchainState {
    /// State for a window of `width` x `height` with no swapchain yet
    pub fn new(width: u32, height: u32) -> Self {
        let mut state = Self {
            window_extent: vk::Extent2D { width, height },
            needs_rebuild: true,
            is_minimized: false,
        };
        state.resize(width, height);
        state
    }

    /// Record a new window size; a non-zero size requests a rebuild
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_extent = vk::Extent2D { width, height };

        if width == 0 || height == 0 {
            self.is_minimized = true;
        } else {
            self.is_minimized = false;
            self.needs_rebuild = true;
        }
    }

    /// Swapchain reported out-of-date or suboptimal
    pub fn mark_stale(&mut self) {
        self.needs_rebuild = true;
    }

    /// Swapchain was recreated for the current extent
    pub fn rebuilt(&mut self) {
        self.needs_rebuild = false;
    }

    /// Zero-sized windows have nothing to present to
    pub fn should_render(&self) -> bool {
        !self.is_minimized
    }

    pub fn needs_rebuild(&self) -> bool {
        self.needs_rebuild
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.window_extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn fence(raw: u64) -> vk::Fence {
        vk::Fence::from_raw(raw)
    }

    fn semaphores(raw: &[u64]) -> Vec<vk::Semaphore> {
        raw.iter().map(|&raw| vk::Semaphore::from_raw(raw)).collect()
    }

    fn frames(max_frames: usize, image_count: usize) -> FramesInFlight {
        let mut frames = FramesInFlight::new(max_frames);
        let raw: Vec<u64> = (100..100 + image_count as u64).collect();
        frames.reset_images(semaphores(&raw));
        frames
    }

    #[test]
    fn test_frame_index_wraps() {
        let mut frames = frames(2, 3);
        assert_eq!(frames.current(), 0);
        frames.advance();
        assert_eq!(frames.current(), 1);
        frames.advance();
        assert_eq!(frames.current(), 0);
    }

    #[test]
    fn test_zero_frames_treated_as_one() {
        let mut frames = frames(0, 2);
        frames.advance();
        assert_eq!(frames.current(), 0);
    }

    #[test]
    fn test_first_claim_has_nothing_to_wait_on() {
        let mut frames = frames(2, 3);
        assert_eq!(frames.claim_image(0, fence(10)), None);
        assert_eq!(frames.claim_image(1, fence(11)), None);
    }

    #[test]
    fn test_reclaimed_image_returns_previous_fence() {
        let mut frames = frames(2, 3);
        frames.claim_image(2, fence(10));
        assert_eq!(frames.claim_image(2, fence(11)), Some(fence(10)));
        assert_eq!(frames.claim_image(2, fence(10)), Some(fence(11)));
    }

    #[test]
    fn test_same_fence_not_waited_twice() {
        // The slot fence was already waited on before acquiring
        let mut frames = frames(2, 2);
        frames.claim_image(1, fence(10));
        assert_eq!(frames.claim_image(1, fence(10)), None);
    }

    #[test]
    fn test_reset_forgets_owners() {
        let mut frames = frames(2, 2);
        frames.claim_image(0, fence(10));
        frames.reset_images(semaphores(&[1, 2, 3, 4]));
        assert_eq!(frames.claim_image(0, fence(11)), None);
        assert_eq!(frames.claim_image(3, fence(11)), None);
    }

    #[test]
    fn test_out_of_range_image_ignored() {
        let mut frames = frames(2, 2);
        assert_eq!(frames.claim_image(5, fence(10)), None);
        assert_eq!(frames.render_finished(5), None);
    }

    #[test]
    fn test_render_semaphore_follows_image_not_slot() {
        // 3 images, 2 slots: slot 0 renders image 0, then image 2
        let mut frames = frames(2, 3);
        assert_eq!(frames.current(), 0);
        let first = frames.render_finished(0);
        frames.advance();
        frames.advance();
        assert_eq!(frames.current(), 0);
        let second = frames.render_finished(2);

        assert_ne!(first, second);
        assert_eq!(second, Some(vk::Semaphore::from_raw(102)));
    }

    #[test]
    fn test_reset_hands_back_old_semaphores() {
        let mut frames = frames(2, 3);
        let old = frames.reset_images(semaphores(&[7, 8]));
        assert_eq!(old, semaphores(&[100, 101, 102]));
        assert_eq!(frames.render_finished(1), Some(vk::Semaphore::from_raw(8)));

        let old = frames.reset_images(Vec::new());
        assert_eq!(old, semaphores(&[7, 8]));
        assert_eq!(frames.render_finished(0), None);
    }

    #[test]
    fn test_minimized_window_skips_rendering() {
        let mut state = SwapchainState::new(800, 600);
        assert!(state.should_render());

        state.resize(0, 0);
        assert!(!state.should_render());

        let state = SwapchainState::new(0, 600);
        assert!(!state.should_render());
    }

    #[test]
    fn test_restore_from_minimized_requests_rebuild() {
        let mut state = SwapchainState::new(800, 600);
        state.rebuilt();

        state.resize(0, 0);
        assert!(!state.needs_rebuild());

        state.resize(800, 600);
        assert!(state.should_render());
        assert!(state.needs_rebuild());
        assert_eq!(state.extent(), vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn test_stale_swapchain_cleared_by_rebuild() {
        let mut state = SwapchainState::new(800, 600);
        assert!(state.needs_rebuild());
        state.rebuilt();
        assert!(!state.needs_rebuild());

        state.mark_stale();
        assert!(state.needs_rebuild());
        state.rebuilt();
        assert!(!state.needs_rebuild());
    }
}
