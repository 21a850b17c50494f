//! GPU allocator (C3): per-memory-type buddy pools plus
//! dedicated-allocation fallback. Shared-mutable behind a single mutex,
//! mirroring `Device::mem_allocator: Mutex<gpu_alloc::GpuAllocator<_>>`
//! in `wgpu-hal`'s vulkan backend — this module is the home-grown
//! replacement for that crate.

use ash::vk;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::buddy::{BuddyAllocator, BuddyBlock};
use crate::error::{AllocationError, DeviceError};
use crate::memory_type::{self, MemoryTypeRequest};
use crate::types::MemoryUsage;

#[derive(Clone, Copy, Debug)]
pub struct AllocatorConfig {
    pub block_size: u64,
    pub min_allocation_size: u64,
    pub dedicated_threshold: u64,
    pub max_blocks_per_heap: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            block_size: 64 << 20,
            min_allocation_size: 256,
            dedicated_threshold: 32 << 20,
            max_blocks_per_heap: 8,
        }
    }
}

pub struct AllocationRequest {
    pub size: u64,
    pub alignment: u64,
    pub usage: MemoryUsage,
    pub allowed_types: u32,
}

/// A handle to a suballocation or a dedicated allocation. Pooled
/// `MemoryBlock`s are weak tokens whose lifetime ends at `free`; the
/// allocator exclusively owns every `vk::DeviceMemory` it hands out.
#[derive(Debug)]
pub struct MemoryBlock {
    pub memory: vk::DeviceMemory,
    pub offset: u64,
    pub size: u64,
    pub memory_type_index: u32,
    dedicated: bool,
    buddy_block: Option<BuddyBlock>,
    /// Shared CPU pointer for the whole `vk::DeviceMemory` this block
    /// lives on, if the memory type is host-visible and has been mapped.
    pub mapped_ptr: Option<*mut u8>,
}

// The raw pointer is a view into device memory the allocator owns; it is
// only ever read/written through `&mut` access gated by the caller's own
// synchronization, same contract wgpu-hal's buffer mapping relies on.
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

impl MemoryBlock {
    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }
}

struct PoolBlock {
    memory: vk::DeviceMemory,
    buddy: BuddyAllocator,
    mapped_ptr: Option<*mut u8>,
}

#[derive(Default)]
struct TypePool {
    blocks: Vec<PoolBlock>,
}

struct Inner {
    pools: FxHashMap<u32, TypePool>,
    dedicated: FxHashMap<usize, (vk::DeviceMemory, u32)>,
    next_dedicated_key: usize,
}

pub struct GpuAllocator {
    config: AllocatorConfig,
    memory_types: Vec<vk::MemoryType>,
    inner: Mutex<Inner>,
}

impl GpuAllocator {
    pub fn new(memory_properties: &vk::PhysicalDeviceMemoryProperties, config: AllocatorConfig) -> Self {
        assert!(config.block_size.is_power_of_two());
        assert!(config.min_allocation_size.is_power_of_two());
        assert!(config.min_allocation_size <= config.block_size);

        let memory_types =
            memory_properties.memory_types[..memory_properties.memory_type_count as usize].to_vec();

        Self {
            config,
            memory_types,
            inner: Mutex::new(Inner {
                pools: FxHashMap::default(),
                dedicated: FxHashMap::default(),
                next_dedicated_key: 0,
            }),
        }
    }

    fn round_size(&self, request: &AllocationRequest) -> u64 {
        let aligned = request.size.max(1).next_multiple_of(request.alignment.max(1));
        aligned.max(self.config.min_allocation_size)
    }

    /// Allocates device memory using the provided callback, which performs
    /// the actual `vkAllocateMemory`/`vkFreeMemory` calls — kept generic so
    /// the pure bookkeeping logic in this module is unit-testable without
    /// a real Vulkan device.
    pub fn alloc(
        &self,
        device: &impl VulkanMemory,
        request: &AllocationRequest,
    ) -> Result<MemoryBlock, AllocationError> {
        profiling::scope!("GpuAllocator::alloc");
        let size = self.round_size(request);
        let memory_type_index = memory_type::select_memory_type(
            &self.memory_types,
            &MemoryTypeRequest {
                allowed_types: request.allowed_types,
                usage: request.usage,
            },
        )?;

        if size >= self.config.dedicated_threshold {
            return self.alloc_dedicated(device, size, memory_type_index);
        }

        let mut inner = self.inner.lock();
        let pool = inner.pools.entry(memory_type_index).or_default();

        for block in &mut pool.blocks {
            if let Ok(buddy_block) = block.buddy.alloc(size) {
                return Ok(MemoryBlock {
                    memory: block.memory,
                    offset: buddy_block.offset(),
                    size: buddy_block.size(),
                    memory_type_index,
                    dedicated: false,
                    buddy_block: Some(buddy_block),
                    mapped_ptr: block.mapped_ptr.map(|base| {
                        // SAFETY: offset is within the block's size, validated by
                        // the buddy allocator that just handed it out.
                        unsafe { base.add(buddy_block.offset() as usize) }
                    }),
                });
            }
        }

        if pool.blocks.len() < self.config.max_blocks_per_heap {
            let is_host_visible = memory_type::is_host_visible(&self.memory_types[memory_type_index as usize]);
            let memory = device.allocate(self.config.block_size, memory_type_index)?;
            let mapped_ptr = if is_host_visible {
                Some(device.map(memory, self.config.block_size)?)
            } else {
                None
            };
            let mut buddy = BuddyAllocator::new(self.config.block_size, self.config.min_allocation_size);
            let buddy_block = buddy
                .alloc(size)
                .expect("fresh block must satisfy a request below dedicated_threshold");
            pool.blocks.push(PoolBlock {
                memory,
                buddy,
                mapped_ptr,
            });
            log::debug!(
                "gpu allocator: grew memory-type {memory_type_index} pool to {} blocks",
                pool.blocks.len()
            );
            return Ok(MemoryBlock {
                memory,
                offset: buddy_block.offset(),
                size: buddy_block.size(),
                memory_type_index,
                dedicated: false,
                buddy_block: Some(buddy_block),
                mapped_ptr: mapped_ptr.map(|base| unsafe { base.add(buddy_block.offset() as usize) }),
            });
        }

        drop(inner);
        self.alloc_dedicated(device, size, memory_type_index)
    }

    fn alloc_dedicated(
        &self,
        device: &impl VulkanMemory,
        size: u64,
        memory_type_index: u32,
    ) -> Result<MemoryBlock, AllocationError> {
        let memory = device.allocate(size, memory_type_index)?;
        let is_host_visible = memory_type::is_host_visible(&self.memory_types[memory_type_index as usize]);
        let mapped_ptr = if is_host_visible {
            Some(device.map(memory, size)?)
        } else {
            None
        };

        let mut inner = self.inner.lock();
        let key = inner.next_dedicated_key;
        inner.next_dedicated_key += 1;
        inner.dedicated.insert(key, (memory, memory_type_index));

        Ok(MemoryBlock {
            memory,
            offset: 0,
            size,
            memory_type_index,
            dedicated: true,
            buddy_block: None,
            mapped_ptr,
        })
    }

    pub fn free(&self, device: &impl VulkanMemory, block: MemoryBlock) -> Result<(), DeviceError> {
        if block.dedicated {
            let mut inner = self.inner.lock();
            let key = inner
                .dedicated
                .iter()
                .find(|(_, &(memory, _))| memory == block.memory)
                .map(|(&key, _)| key);
            if let Some(key) = key {
                inner.dedicated.remove(&key);
            }
            drop(inner);
            device.free(block.memory);
            return Ok(());
        }

        let mut inner = self.inner.lock();
        let pool = inner
            .pools
            .get_mut(&block.memory_type_index)
            .expect("freed block references a known memory-type pool");
        let pool_block = pool
            .blocks
            .iter_mut()
            .find(|b| b.memory == block.memory)
            .expect("freed block references a known pool block");
        pool_block
            .buddy
            .free(block.buddy_block.expect("pooled block always carries a buddy descriptor"))
            .expect("caller passed back a block this allocator issued");
        Ok(())
    }

    pub fn stats(&self) -> AllocatorStats {
        let inner = self.inner.lock();
        let pooled_blocks = inner.pools.values().map(|p| p.blocks.len()).sum();
        let dedicated_allocations = inner.dedicated.len();
        AllocatorStats {
            pooled_blocks,
            dedicated_allocations,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AllocatorStats {
    pub pooled_blocks: usize,
    pub dedicated_allocations: usize,
}

/// The Vulkan-memory operations the allocator needs, kept behind a
/// trait so the pool/dedicated-allocation bookkeeping above can be
/// exercised in tests with a fake implementation instead of a real
/// `ash::Device`.
pub trait VulkanMemory {
    fn allocate(&self, size: u64, memory_type_index: u32) -> Result<vk::DeviceMemory, DeviceError>;
    fn free(&self, memory: vk::DeviceMemory);
    fn map(&self, memory: vk::DeviceMemory, size: u64) -> Result<*mut u8, DeviceError>;
}
