//! Per-frame command submission engine (C6): a ring of
//! frame slots, each owning a transient command pool, with CPU/GPU
//! overlap driven by the fence abstraction in `fence.rs`. New
//! component — wgpu-hal itself tracks submissions inside `wgpu-core`,
//! not the HAL backend, but the bookkeeping follows the same
//! `fence.maintain(...)` call shape `queue.rs` uses before a submit.

use std::time::Duration;

use ash::vk;

use crate::error::WaitError;
use crate::fence::{Fence, FenceValue, VulkanSync};

/// Double-buffering: the ring has a fixed length of two.
pub const FRAME_RING_LEN: usize = 2;

#[derive(Clone, Copy, Debug)]
pub struct FrameEngineConfig {
    /// Open question: the original hardcodes 5s; this
    /// makes it configurable instead.
    pub submit_wait_timeout: Duration,
}

impl Default for FrameEngineConfig {
    fn default() -> Self {
        Self {
            submit_wait_timeout: Duration::from_secs(5),
        }
    }
}

struct FrameSlot {
    command_pool: vk::CommandPool,
    /// Zero means nothing has been submitted from this slot yet.
    fence_value: FenceValue,
}

/// Operations on a frame slot's transient command pool, isolated behind
/// a trait so the ring-advance bookkeeping is unit-testable without a
/// real `ash::Device`.
pub trait VulkanCommandPool {
    fn create_command_pool(&self) -> vk::CommandPool;
    /// `vkResetCommandPool`, bulk-resetting every buffer allocated from it.
    fn reset_command_pool(&self, pool: vk::CommandPool);
}

pub struct FrameEngine {
    config: FrameEngineConfig,
    slots: [FrameSlot; FRAME_RING_LEN],
    frame_index: u64,
}

impl FrameEngine {
    pub fn new(device: &impl VulkanCommandPool, config: FrameEngineConfig) -> Self {
        Self {
            config,
            slots: std::array::from_fn(|_| FrameSlot {
                command_pool: device.create_command_pool(),
                fence_value: 0,
            }),
            frame_index: 0,
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    fn current_slot_index(&self) -> usize {
        (self.frame_index % FRAME_RING_LEN as u64) as usize
    }

    pub fn current_command_pool(&self) -> vk::CommandPool {
        self.slots[self.current_slot_index()].command_pool
    }

    /// Records the fence value the current slot's submission was
    /// signaled to, so a future `advance_frame` knows what to wait on
    /// before resetting this slot's pool.
    pub fn record_submit(&mut self, value: FenceValue) {
        let index = self.current_slot_index();
        self.slots[index].fence_value = value;
    }

    /// Advances the ring, waits on the slot about to be reused if it has
    /// an outstanding submission, then bulk-resets its command pool.
    pub fn advance_frame(
        &mut self,
        device: &impl VulkanCommandPool,
        fence: &Fence,
        sync: &impl VulkanSync,
    ) -> Result<(), WaitError> {
        self.frame_index += 1;
        let index = self.current_slot_index();
        let pending = self.slots[index].fence_value;
        if pending > 0 {
            fence.wait_for_value(sync, pending, self.config.submit_wait_timeout)?;
        }
        self.slots[index].fence_value = 0;
        device.reset_command_pool(self.slots[index].command_pool);
        Ok(())
    }

    /// Fence value the slot about to be reused on the *next*
    /// `advance_frame` is still waiting on, without mutating state.
    /// Exposed for tests and diagnostics.
    fn pending_fence_value_for(&self, frame_index: u64) -> FenceValue {
        let index = (frame_index % FRAME_RING_LEN as u64) as usize;
        self.slots[index].fence_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakePools {
        next_handle: RefCell<u64>,
        reset_counts: RefCell<HashMap<u64, u32>>,
    }

    impl FakePools {
        fn new() -> Self {
            Self {
                next_handle: RefCell::new(1),
                reset_counts: RefCell::new(HashMap::new()),
            }
        }

        fn reset_count(&self, pool: vk::CommandPool) -> u32 {
            *self.reset_counts.borrow().get(&pool.as_raw()).unwrap_or(&0)
        }
    }

    impl VulkanCommandPool for FakePools {
        fn create_command_pool(&self) -> vk::CommandPool {
            let mut next = self.next_handle.borrow_mut();
            let handle = vk::CommandPool::from_raw(*next);
            *next += 1;
            handle
        }

        fn reset_command_pool(&self, pool: vk::CommandPool) {
            *self.reset_counts.borrow_mut().entry(pool.as_raw()).or_insert(0) += 1;
        }
    }

    #[derive(Default)]
    struct FakeSync {
        signaled_up_to: RefCell<u64>,
    }

    impl FakeSync {
        fn signal(&self, value: u64) {
            *self.signaled_up_to.borrow_mut() = value;
        }
    }

    impl VulkanSync for FakeSync {
        fn create_fence(&self) -> Result<vk::Fence, crate::error::DeviceError> {
            Ok(vk::Fence::null())
        }
        fn reset_fence(&self, _fence: vk::Fence) -> Result<(), crate::error::DeviceError> {
            Ok(())
        }
        fn fence_status(&self, _fence: vk::Fence) -> Result<bool, crate::error::DeviceError> {
            Ok(true)
        }
        fn wait_for_fence(
            &self,
            _fence: vk::Fence,
            _timeout: Duration,
        ) -> Result<bool, crate::error::DeviceError> {
            Ok(true)
        }
        fn semaphore_counter_value(&self, _semaphore: vk::Semaphore) -> Result<u64, crate::error::DeviceError> {
            Ok(*self.signaled_up_to.borrow())
        }
        fn wait_semaphore_value(
            &self,
            _semaphore: vk::Semaphore,
            value: u64,
            _timeout: Duration,
        ) -> Result<bool, crate::error::DeviceError> {
            Ok(*self.signaled_up_to.borrow() >= value)
        }
    }

    #[test]
    fn slots_get_distinct_command_pools() {
        let pools = FakePools::new();
        let engine = FrameEngine::new(&pools, FrameEngineConfig::default());
        assert_ne!(engine.slots[0].command_pool, engine.slots[1].command_pool);
    }

    #[test]
    fn property_5_ring_safety_across_n_plus_one_cycles() {
        // property 5: after N+1 submit+advance cycles, the
        // oldest slot's pool has been reset exactly once, and no slot is
        // reset while its fence_value exceeds last_completed.
        let pools = FakePools::new();
        let fence_sema = FakeSync::default();
        let mut fence = Fence::new_timeline(vk::Semaphore::from_raw(1));
        let mut engine = FrameEngine::new(&pools, FrameEngineConfig::default());

        let slot0_pool = engine.current_command_pool();

        for _ in 0..FRAME_RING_LEN + 1 {
            let value = fence.next_signal_value();
            fence_sema.signal(value);
            engine.record_submit(value);
            engine.advance_frame(&pools, &fence, &fence_sema).unwrap();
        }

        // slot 0 is visited at frame_index 0 and again at frame_index 2;
        // it should have been reset exactly once by the time we've done
        // FRAME_RING_LEN+1 = 3 cycles (advances at frame_index 1 and 2,
        // the second of which reuses slot 0).
        assert_eq!(pools.reset_count(slot0_pool), 1);
    }

    #[test]
    fn advance_without_prior_submit_does_not_wait() {
        let pools = FakePools::new();
        let fence_sema = FakeSync::default();
        let fence = Fence::new_timeline(vk::Semaphore::from_raw(1));
        let mut engine = FrameEngine::new(&pools, FrameEngineConfig::default());
        // No record_submit call: fence_value is 0, so advance must not
        // block on an unsignaled fence.
        engine.advance_frame(&pools, &fence, &fence_sema).unwrap();
    }

    #[test]
    fn advance_times_out_on_unsignaled_submission() {
        let pools = FakePools::new();
        let fence_sema = FakeSync::default();
        let fence = Fence::new_timeline(vk::Semaphore::from_raw(1));
        let mut engine = FrameEngine::new(&pools, FrameEngineConfig {
            submit_wait_timeout: Duration::from_millis(1),
        });
        let value = fence.next_signal_value();
        engine.record_submit(value);
        // fence_sema never signals `value`, so this must time out rather
        // than silently resetting a pool with in-flight work.
        let result = engine.advance_frame(&pools, &fence, &fence_sema);
        assert_eq!(result, Err(WaitError::Timeout));
        assert_eq!(pools.reset_count(engine.current_command_pool()), 0);
    }

    #[test]
    fn pending_fence_value_tracks_slot_assignment() {
        let pools = FakePools::new();
        let fence_sema = FakeSync::default();
        let fence = Fence::new_timeline(vk::Semaphore::from_raw(1));
        let mut engine = FrameEngine::new(&pools, FrameEngineConfig::default());
        let value = fence.next_signal_value();
        engine.record_submit(value);
        assert_eq!(engine.pending_fence_value_for(0), value);
        fence_sema.signal(value);
        engine.advance_frame(&pools, &fence, &fence_sema).unwrap();
        assert_eq!(engine.pending_fence_value_for(0), 0);
    }
}
