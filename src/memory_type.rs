//! Picks a Vulkan memory-type index from usage flags (C2).
//! No Vulkan calls — operates purely on a `vk::PhysicalDeviceMemoryProperties`
//! snapshot the caller already queried.

use ash::vk;

use crate::error::AllocationError;
use crate::types::MemoryUsage;

/// The property-flag bits this selector knows how to reason about.
/// Types whose flags are not a subset of this set are "exotic" and are
/// skipped entirely, to avoid silently making a wrong choice.
fn known_flags() -> vk::MemoryPropertyFlags {
    vk::MemoryPropertyFlags::DEVICE_LOCAL
        | vk::MemoryPropertyFlags::HOST_VISIBLE
        | vk::MemoryPropertyFlags::HOST_COHERENT
        | vk::MemoryPropertyFlags::HOST_CACHED
        | vk::MemoryPropertyFlags::LAZILY_ALLOCATED
}

pub struct MemoryTypeRequest {
    pub allowed_types: u32,
    pub usage: MemoryUsage,
}

#[derive(Clone, Copy, Debug, Default)]
struct Preference {
    required: vk::MemoryPropertyFlags,
    preferred: vk::MemoryPropertyFlags,
}

fn preference_for(usage: MemoryUsage) -> Preference {
    let mut required = vk::MemoryPropertyFlags::empty();
    let mut preferred = vk::MemoryPropertyFlags::empty();

    if usage.intersects(MemoryUsage::HOST_ACCESS | MemoryUsage::UPLOAD | MemoryUsage::DOWNLOAD) {
        required |= vk::MemoryPropertyFlags::HOST_VISIBLE;
    }
    if usage.contains(MemoryUsage::UPLOAD) {
        preferred |= vk::MemoryPropertyFlags::HOST_COHERENT;
    }
    if usage.contains(MemoryUsage::DOWNLOAD) {
        preferred |= vk::MemoryPropertyFlags::HOST_CACHED;
    }
    if usage.contains(MemoryUsage::FAST_DEVICE_ACCESS)
        && !usage.intersects(MemoryUsage::HOST_ACCESS | MemoryUsage::UPLOAD | MemoryUsage::DOWNLOAD)
    {
        preferred |= vk::MemoryPropertyFlags::DEVICE_LOCAL;
    }
    if usage.contains(MemoryUsage::TRANSIENT) {
        preferred |= vk::MemoryPropertyFlags::LAZILY_ALLOCATED;
    }

    Preference { required, preferred }
}

fn is_known(flags: vk::MemoryPropertyFlags) -> bool {
    known_flags().contains(flags)
}

pub fn is_host_visible(memory_type: &vk::MemoryType) -> bool {
    memory_type
        .property_flags
        .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
}

/// Two-pass search over `memory_types[0..type_count]`: demand
/// `required | preferred` first, then fall back to `required` alone.
pub fn select_memory_type(
    memory_types: &[vk::MemoryType],
    request: &MemoryTypeRequest,
) -> Result<u32, AllocationError> {
    let pref = preference_for(request.usage);

    let search = |mask: vk::MemoryPropertyFlags| -> Option<u32> {
        memory_types.iter().enumerate().find_map(|(index, ty)| {
            let allowed = request.allowed_types & (1 << index) != 0;
            if !allowed || !is_known(ty.property_flags) {
                return None;
            }
            if ty.property_flags.contains(mask) {
                Some(index as u32)
            } else {
                None
            }
        })
    };

    if let Some(index) = search(pref.required | pref.preferred) {
        return Ok(index);
    }
    search(pref.required).ok_or(AllocationError::NoSuitableMemoryType)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_type(flags: vk::MemoryPropertyFlags) -> vk::MemoryType {
        vk::MemoryType {
            property_flags: flags,
            heap_index: 0,
        }
    }

    #[test]
    fn host_access_requires_host_visible() {
        let types = [
            mem_type(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            mem_type(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT),
        ];
        let index = select_memory_type(
            &types,
            &MemoryTypeRequest {
                allowed_types: 0b11,
                usage: MemoryUsage::HOST_ACCESS,
            },
        )
        .unwrap();
        assert_eq!(index, 1);
        assert!(types[index as usize]
            .property_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
    }

    #[test]
    fn fast_device_access_prefers_device_local_when_available() {
        let types = [
            mem_type(vk::MemoryPropertyFlags::HOST_VISIBLE),
            mem_type(vk::MemoryPropertyFlags::DEVICE_LOCAL),
        ];
        let index = select_memory_type(
            &types,
            &MemoryTypeRequest {
                allowed_types: 0b11,
                usage: MemoryUsage::FAST_DEVICE_ACCESS,
            },
        )
        .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn falls_back_to_required_only_when_preferred_unavailable() {
        let types = [mem_type(vk::MemoryPropertyFlags::HOST_VISIBLE)];
        let index = select_memory_type(
            &types,
            &MemoryTypeRequest {
                allowed_types: 0b1,
                usage: MemoryUsage::UPLOAD | MemoryUsage::HOST_ACCESS,
            },
        )
        .unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn exotic_types_are_skipped() {
        let exotic = vk::MemoryPropertyFlags::from_raw(1 << 20);
        let types = [
            mem_type(exotic | vk::MemoryPropertyFlags::HOST_VISIBLE),
            mem_type(vk::MemoryPropertyFlags::HOST_VISIBLE),
        ];
        let index = select_memory_type(
            &types,
            &MemoryTypeRequest {
                allowed_types: 0b11,
                usage: MemoryUsage::HOST_ACCESS,
            },
        )
        .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn respects_allowed_type_bitmask() {
        let types = [
            mem_type(vk::MemoryPropertyFlags::HOST_VISIBLE),
            mem_type(vk::MemoryPropertyFlags::HOST_VISIBLE),
        ];
        // Only type 1 is allowed by vkGetBufferMemoryRequirements here.
        let index = select_memory_type(
            &types,
            &MemoryTypeRequest {
                allowed_types: 0b10,
                usage: MemoryUsage::HOST_ACCESS,
            },
        )
        .unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn no_suitable_type_is_reported() {
        let types = [mem_type(vk::MemoryPropertyFlags::DEVICE_LOCAL)];
        let result = select_memory_type(
            &types,
            &MemoryTypeRequest {
                allowed_types: 0b1,
                usage: MemoryUsage::HOST_ACCESS,
            },
        );
        assert_eq!(result, Err(AllocationError::NoSuitableMemoryType));
    }
}
