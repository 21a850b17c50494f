//! Swapchain acquire/present rotation (C10). Grounded on
//! the acquire-semaphore-rotation scheme in wgpu-hal's `surface.rs`
//! (`Swapchain`, `SurfaceTexture`, `acquire_texture`, `configure`,
//! `unconfigure`), generalized to the explicit `acquireFences` /
//! post-acquire-fence reuse protocol this module adds.

use std::time::Duration;

use ash::vk;

use crate::error::{DeviceError, SurfaceError};

/// One vsync at 60 Hz.
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(16);

/// The Vulkan calls swapchain rotation needs, isolated so the rotation
/// bookkeeping in this module is unit-testable without a real
/// `ash::Device`/`ash::khr::swapchain::Device`.
pub trait VulkanSwapchain {
    fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
        timeout: Duration,
    ) -> Result<(u32, bool), SurfaceError>;

    fn wait_for_fence(&self, fence: vk::Fence, timeout: Duration) -> Result<bool, DeviceError>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<(), DeviceError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcquiredImage {
    pub image_index: u32,
    pub suboptimal: bool,
}

pub struct SwapchainImages {
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

/// Acquire-side rotation state: `N` acquire semaphores/fences rotated by
/// `nextAcquireIdx`, independent from the per-image present semaphores
/// (rationale: the driver picks the image *after* the
/// acquire semaphore is chosen, so acquire semaphores cannot be indexed
/// by image).
pub struct SwapchainRotation {
    acquire_semaphores: Vec<vk::Semaphore>,
    acquire_fences: Vec<vk::Fence>,
    present_semaphores: Vec<vk::Semaphore>,
    post_acquire_fence: vk::Fence,

    next_acquire_idx: usize,
    current_acquire_idx: Option<usize>,
    current_image_index: Option<u32>,
    image_acquired: bool,
}

impl SwapchainRotation {
    pub fn new(
        acquire_semaphores: Vec<vk::Semaphore>,
        acquire_fences: Vec<vk::Fence>,
        present_semaphores: Vec<vk::Semaphore>,
        post_acquire_fence: vk::Fence,
    ) -> Self {
        assert_eq!(acquire_semaphores.len(), acquire_fences.len());
        Self {
            acquire_semaphores,
            acquire_fences,
            present_semaphores,
            post_acquire_fence,
            next_acquire_idx: 0,
            current_acquire_idx: None,
            current_image_index: None,
            image_acquired: false,
        }
    }

    pub fn acquire_count(&self) -> usize {
        self.acquire_semaphores.len()
    }

    pub fn current_acquire_semaphore(&self) -> Option<vk::Semaphore> {
        self.current_acquire_idx.map(|i| self.acquire_semaphores[i])
    }

    pub fn present_semaphore_for(&self, image_index: u32) -> vk::Semaphore {
        self.present_semaphores[image_index as usize]
    }

    /// Returns `Ok(None)` to mean "skip this frame" (step 1 or 3
    /// timeout), `Ok(Some(_))` on a successful acquire (possibly
    /// suboptimal), `Err` on any other surface error.
    pub fn acquire(&mut self, device: &impl VulkanSwapchain) -> Result<Option<AcquiredImage>, SurfaceError> {
        profiling::scope!("SwapchainRotation::acquire");
        let i = self.next_acquire_idx;

        // Step 1: wait on acquireFences[i]; timeout => skip without
        // advancing nextAcquireIdx.
        let reached = device
            .wait_for_fence(self.acquire_fences[i], ACQUIRE_TIMEOUT)
            .map_err(SurfaceError::from)?;
        if !reached {
            return Ok(None);
        }

        // Step 2: reset acquireFences[i].
        device.reset_fence(self.acquire_fences[i]).map_err(SurfaceError::from)?;

        // Step 3: acquire next image with acquireSemaphores[i] and the
        // post-acquire fence.
        let (image_index, suboptimal) = match device.acquire_next_image(
            self.acquire_semaphores[i],
            self.post_acquire_fence,
            ACQUIRE_TIMEOUT,
        ) {
            Ok(result) => result,
            Err(SurfaceError::Timeout) => return Ok(None),
            Err(other) => return Err(other),
        };

        // Step 4: wait on the post-acquire fence, then reset it (driver
        // quirk: the image isn't guaranteed ready when the semaphore
        // signals on some Windows/Intel drivers).
        let post_acquire_reached = device
            .wait_for_fence(self.post_acquire_fence, ACQUIRE_TIMEOUT)
            .map_err(SurfaceError::from)?;
        if !post_acquire_reached {
            return Ok(None);
        }
        device
            .reset_fence(self.post_acquire_fence)
            .map_err(SurfaceError::from)?;

        // Step 5: record state and advance the rotation index.
        self.current_acquire_idx = Some(i);
        self.current_image_index = Some(image_index);
        self.image_acquired = true;
        self.next_acquire_idx = (i + 1) % self.acquire_semaphores.len();

        Ok(Some(AcquiredImage {
            image_index,
            suboptimal,
        }))
    }

    /// Fence the next submit-for-present must signal, so a future
    /// acquire of this same rotation slot knows when its semaphore is
    /// safe to reuse.
    pub fn acquire_fence_to_signal(&self) -> Option<vk::Fence> {
        self.current_acquire_idx.map(|i| self.acquire_fences[i])
    }

    /// Clears per-acquire state after a present, independent of whether
    /// the caller starts a fresh acquire immediately.
    pub fn finish_present(&mut self) {
        self.image_acquired = false;
        self.current_acquire_idx = None;
        self.current_image_index = None;
    }

    pub fn is_image_acquired(&self) -> bool {
        self.image_acquired
    }
}

impl From<DeviceError> for SurfaceError {
    fn from(err: DeviceError) -> Self {
        SurfaceError::Device(err)
    }
}
