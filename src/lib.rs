//! A WebGPU-flavored hardware abstraction layer over raw Vulkan.
//!
//! This crate implements the hard engineering inside a Vulkan backend —
//! GPU memory sub-allocation, per-frame command submission, descriptor
//! pool management, render-pass/framebuffer interning, and swapchain
//! acquire/present rotation — without the surrounding backend-selection
//! machinery. It is deliberately narrow: no instance/adapter
//! enumeration, no surface-platform glue, no WGSL→SPIR-V translation.
//!
//! # Collaborators
//!
//! Four things are expected from whoever embeds this crate, none of
//! which it implements itself:
//!
//! - a **shader compiler**, a function from WGSL source to SPIR-V words;
//! - a **Vulkan command table**, the instance/device function pointers
//!   an `ash::Entry`/`ash::Instance`/`ash::Device` already loaded;
//! - a **surface-platform** adapter, turning a native window handle into
//!   a `vk::SurfaceKHR`;
//! - a **logger** sink — this crate talks to it through the `log` crate
//!   facade, same as the rest of the ecosystem it was grown alongside.
//!
//! # Module layout
//!
//! | Module | Component |
//! |---|---|
//! | [`buddy`] | C1 — buddy allocator |
//! | [`memory_type`] | C2 — memory-type selector |
//! | [`allocator`] | C3 — GPU allocator |
//! | [`descriptor`] | C4 — descriptor allocator |
//! | [`fence`] | C5 — fence abstraction |
//! | [`frame`] | C6 — frame engine |
//! | [`render_pass`] | C7 — render-pass/framebuffer cache |
//! | [`resource`] | C8 — resource factory |
//! | [`command`] | C9 — command encoder |
//! | [`swapchain`] | C10 — swapchain acquire/present |

pub mod allocator;
pub mod buddy;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod fence;
pub mod frame;
pub mod memory_type;
pub mod render_pass;
pub mod resource;
pub mod swapchain;
pub mod types;

pub use device::{Device, DeviceShared};
pub use error::{
    AllocationError, BuddyError, DescriptorAllocatorError, DeviceError, DriverBugError, SurfaceError,
    ValidationError, WaitError,
};
