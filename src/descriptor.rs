//! Grow-on-demand descriptor-set allocator (C4). Replaces
//! `gpu_descriptor::DescriptorAllocator` with hand-rolled pool management,
//! grounded on the same `Device::desc_allocator: Mutex<...>` field in
//! `wgpu-hal`'s vulkan backend that this module's `DescriptorAllocator`
//! plays the role of.

use ash::vk;
use parking_lot::Mutex;

use crate::error::DescriptorAllocatorError;
use crate::types::DescriptorCounts;

#[derive(Clone, Copy, Debug)]
pub struct DescriptorAllocatorConfig {
    pub initial_pool_size: u32,
    pub max_pool_size: u32,
    pub growth_factor: u32,
}

impl Default for DescriptorAllocatorConfig {
    fn default() -> Self {
        Self {
            initial_pool_size: 64,
            max_pool_size: 4096,
            growth_factor: 2,
        }
    }
}

struct Pool {
    raw: vk::DescriptorPool,
    max_sets: u32,
    allocated_sets: u32,
}

pub struct DescriptorAllocator {
    config: DescriptorAllocatorConfig,
    pools: Mutex<Vec<Pool>>,
}

/// The Vulkan descriptor-pool operations this allocator drives, kept
/// behind a trait so pool-growth bookkeeping is unit-testable without a
/// real device.
pub trait VulkanDescriptors {
    /// Returns `Ok(pool)` or `Err(FailedToCreatePool)`.
    fn create_pool(
        &self,
        max_sets: u32,
        sizes: &[(vk::DescriptorType, u32)],
    ) -> Result<vk::DescriptorPool, DescriptorAllocatorError>;

    /// Mirrors `vkAllocateDescriptorSets`: `Ok(Some(set))` on success,
    /// `Ok(None)` on `OUT_OF_POOL_MEMORY`/`FRAGMENTED_POOL` (try the next
    /// pool), `Err` on any other failure.
    fn allocate_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> Result<Option<vk::DescriptorSet>, DescriptorAllocatorError>;
}

fn pool_sizes_for(counts: &DescriptorCounts, pool_size: u32) -> Vec<(vk::DescriptorType, u32)> {
    let mut sizes = Vec::new();
    if counts.is_empty() {
        // Generic defaults proportional to the new pool size.
        sizes.push((vk::DescriptorType::SAMPLER, pool_size));
        sizes.push((vk::DescriptorType::SAMPLED_IMAGE, pool_size));
        sizes.push((vk::DescriptorType::UNIFORM_BUFFER, pool_size));
        sizes.push((vk::DescriptorType::STORAGE_BUFFER, pool_size));
        return sizes;
    }

    let scaled = counts.scale(pool_size);
    let entries = [
        (vk::DescriptorType::SAMPLER, scaled.samplers),
        (vk::DescriptorType::SAMPLED_IMAGE, scaled.sampled_images),
        (vk::DescriptorType::STORAGE_IMAGE, scaled.storage_images),
        (vk::DescriptorType::UNIFORM_BUFFER, scaled.uniform_buffers),
        (vk::DescriptorType::STORAGE_BUFFER, scaled.storage_buffers),
        (
            vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
            scaled.uniform_texel_buffers,
        ),
        (
            vk::DescriptorType::STORAGE_TEXEL_BUFFER,
            scaled.storage_texel_buffers,
        ),
        (vk::DescriptorType::INPUT_ATTACHMENT, scaled.input_attachments),
    ];
    for (ty, count) in entries {
        if count > 0 {
            sizes.push((ty, count));
        }
    }
    if sizes.is_empty() {
        // At least one entry must exist for vkCreateDescriptorPool.
        sizes.push((vk::DescriptorType::UNIFORM_BUFFER, 1));
    }
    sizes
}

impl DescriptorAllocator {
    pub fn new(config: DescriptorAllocatorConfig) -> Self {
        Self {
            config,
            pools: Mutex::new(Vec::new()),
        }
    }

    pub fn allocate(
        &self,
        device: &impl VulkanDescriptors,
        layout: vk::DescriptorSetLayout,
        counts: &DescriptorCounts,
    ) -> Result<(vk::DescriptorSet, vk::DescriptorPool), DescriptorAllocatorError> {
        profiling::scope!("DescriptorAllocator::allocate");
        let mut pools = self.pools.lock();

        for pool in pools.iter_mut() {
            if pool.allocated_sets >= pool.max_sets {
                continue;
            }
            match device.allocate_set(pool.raw, layout)? {
                Some(set) => {
                    pool.allocated_sets += 1;
                    return Ok((set, pool.raw));
                }
                None => continue,
            }
        }

        let pool_size = (self.config.initial_pool_size
            * self.config.growth_factor.pow(pools.len() as u32))
        .min(self.config.max_pool_size);
        let sizes = pool_sizes_for(counts, pool_size);
        let raw = device.create_pool(pool_size, &sizes)?;
        log::debug!(
            "descriptor allocator: created pool #{} with max_sets={pool_size}",
            pools.len()
        );

        let mut pool = Pool {
            raw,
            max_sets: pool_size,
            allocated_sets: 0,
        };
        let result = device
            .allocate_set(raw, layout)?
            .ok_or(DescriptorAllocatorError::FailedToAllocate)?;
        pool.allocated_sets += 1;
        pools.push(pool);
        Ok((result, raw))
    }

    pub fn free(&self, pool_handle: vk::DescriptorPool) {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.iter_mut().find(|p| p.raw == pool_handle) {
            pool.allocated_sets = pool.allocated_sets.saturating_sub(1);
        }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }
}
