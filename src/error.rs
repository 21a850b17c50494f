//! Error taxonomy shared by every component.
//!
//! Kinds follow the semantic categories of the outer spec: validation
//! (misuse, caught before any Vulkan call), resource exhaustion,
//! synchronization outcomes, surface events, and driver bugs.

use ash::vk;
use thiserror::Error;

/// Errors surfaced by anything that talks to an `ash::Device`.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device lost")]
    Lost,
    #[error("unexpected driver error")]
    Unexpected,
}

impl From<vk::Result> for DeviceError {
    fn from(result: vk::Result) -> Self {
        #![allow(unreachable_code)]
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                #[cfg(feature = "oom_panic")]
                panic!("Out of memory ({result:?})");

                Self::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => {
                #[cfg(feature = "device_lost_panic")]
                panic!("Device lost");

                Self::Lost
            }
            _ => {
                log::warn!("Unrecognized device error {result:?}");
                Self::Unexpected
            }
        }
    }
}

/// Errors surfaced by swapchain acquire/present.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum SurfaceError {
    /// The surface must be reconfigured before further use.
    #[error("surface is out of date and must be reconfigured")]
    Outdated,
    #[error("surface was lost")]
    Lost,
    #[error("wait timed out")]
    Timeout,
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors surfaced by any wait operation (fences, frame engine).
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("wait timed out")]
    Timeout,
    #[error("device lost")]
    DeviceLost,
}

impl From<DeviceError> for WaitError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Lost => Self::DeviceLost,
            DeviceError::OutOfMemory | DeviceError::Unexpected => Self::Timeout,
        }
    }
}

/// Buddy-allocator failures. Purely arithmetic, no Vulkan
/// involvement.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum BuddyError {
    #[error("no block large enough to satisfy the request")]
    OutOfMemory,
    #[error("requested size is zero or exceeds the arena")]
    InvalidSize,
    #[error("offset was not allocated, or was allocated at a different order")]
    DoubleFree,
}

/// GPU-allocator failures (C2/C3).
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("no memory type matches the requested usage and allowed-type mask")]
    NoSuitableMemoryType,
    #[error(transparent)]
    Buddy(#[from] BuddyError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Descriptor-pool manager failures (C4).
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DescriptorAllocatorError {
    #[error("failed to create a new descriptor pool")]
    FailedToCreatePool,
    #[error("failed to allocate a descriptor set even from a freshly created pool")]
    FailedToAllocate,
}

/// A Vulkan call returned `VK_SUCCESS` but handed back a null handle.
/// Observed on some Intel drivers during pipeline creation.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("driver returned a null handle on a successful call")]
pub struct DriverBugError;

/// Consumer-misuse errors, checked and returned before any Vulkan call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("resource descriptor has size zero")]
    ZeroSizeResource,
    #[error("render pipeline descriptor has no vertex shader")]
    MissingVertexShader,
    #[error("handle does not belong to this device")]
    InvalidHandle,
    #[error("descriptor is missing required field: {0}")]
    MissingField(&'static str),
}

/// Failures anywhere along `create_buffer`/`create_texture`'s
/// validate → create → allocate → bind pipeline (C8).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CreateResourceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Device(#[from] DeviceError),
}
