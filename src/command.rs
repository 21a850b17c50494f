//! Command encoder (C9): `Allocated → Recording →
//! Ended | Discarded` state machine plus recorded operations. `Temp`
//! and the free/discarded command-buffer pools are grounded directly on
//! the same-named fields in `wgpu-hal`'s vulkan `mod.rs`.

use ash::vk;

use crate::render_pass::{FramebufferKey, RenderPassKey};
use crate::types::{BufferUsage, TextureUsage};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderState {
    Allocated,
    Recording,
    Ended,
    Discarded,
}

/// Allocation-recycling pool for one `CommandEncoder`, grounded on
/// `Temp { marker, buffer_barriers, image_barriers }` in `wgpu-hal`'s
/// vulkan `mod.rs`.
#[derive(Default)]
pub struct Temp {
    pub buffer_barriers: Vec<vk::BufferMemoryBarrier>,
    pub image_barriers: Vec<vk::ImageMemoryBarrier>,
}

impl Temp {
    pub fn clear(&mut self) {
        self.buffer_barriers.clear();
        self.image_barriers.clear();
    }
}

pub struct CommandEncoder {
    pool: vk::CommandPool,
    active: Option<vk::CommandBuffer>,
    state: EncoderState,
    temp: Temp,
    /// Command buffers in the Vulkan "initial" state, ready to reuse.
    free: Vec<vk::CommandBuffer>,
}

impl CommandEncoder {
    pub fn new(pool: vk::CommandPool) -> Self {
        Self {
            pool,
            active: None,
            state: EncoderState::Allocated,
            temp: Temp::default(),
            free: Vec::new(),
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn command_pool(&self) -> vk::CommandPool {
        self.pool
    }

    /// Transitions `Allocated -> Recording`, taking a buffer from the
    /// free list or asking the caller to allocate one.
    pub fn begin(&mut self, allocate: impl FnOnce() -> vk::CommandBuffer) {
        if self.state != EncoderState::Allocated {
            return;
        }
        let buffer = self.free.pop().unwrap_or_else(allocate);
        self.active = Some(buffer);
        self.state = EncoderState::Recording;
    }

    pub fn end(&mut self) -> Option<vk::CommandBuffer> {
        if self.state != EncoderState::Recording {
            return None;
        }
        self.state = EncoderState::Ended;
        self.temp.clear();
        self.active
    }

    pub fn discard(&mut self) {
        if self.state == EncoderState::Recording {
            if let Some(buffer) = self.active.take() {
                self.free.push(buffer);
            }
        }
        self.state = EncoderState::Discarded;
        self.temp.clear();
    }

    /// Returns the crate back to `Allocated` for reuse from the same
    /// pool's next bulk reset.
    pub fn reset(&mut self) {
        if let Some(buffer) = self.active.take() {
            self.free.push(buffer);
        }
        self.state = EncoderState::Allocated;
    }

    fn recording(&self) -> Option<vk::CommandBuffer> {
        if self.state == EncoderState::Recording {
            self.active
        } else {
            None
        }
    }

    /// Every record method checks `state == Recording` and is a silent
    /// no-op on mismatch — consumer-level error surfacing is the outer
    /// library's concern.
    pub fn record(&self, op: impl FnOnce(vk::CommandBuffer)) {
        if let Some(buffer) = self.recording() {
            op(buffer);
        }
    }
}

/// Per-usage access/stage lookup for buffer barriers.
pub fn buffer_barrier_access_stage(usage: BufferUsage) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    let mut access = vk::AccessFlags::empty();
    let mut stage = vk::PipelineStageFlags::empty();

    if usage.contains(BufferUsage::COPY_SRC) {
        access |= vk::AccessFlags::TRANSFER_READ;
        stage |= vk::PipelineStageFlags::TRANSFER;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        access |= vk::AccessFlags::TRANSFER_WRITE;
        stage |= vk::PipelineStageFlags::TRANSFER;
    }
    if usage.contains(BufferUsage::VERTEX) {
        access |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
        stage |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if usage.contains(BufferUsage::INDEX) {
        access |= vk::AccessFlags::INDEX_READ;
        stage |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        access |= vk::AccessFlags::UNIFORM_READ;
        stage |= vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        access |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
        stage |= vk::PipelineStageFlags::VERTEX_SHADER
            | vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        access |= vk::AccessFlags::INDIRECT_COMMAND_READ;
        stage |= vk::PipelineStageFlags::DRAW_INDIRECT;
    }

    (access, stage)
}

/// Per-usage access/stage/layout lookup for texture barriers.
pub fn texture_barrier_access_stage_layout(
    usage: TextureUsage,
) -> (vk::AccessFlags, vk::PipelineStageFlags, vk::ImageLayout) {
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        return (
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        return (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER
                | vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::ImageLayout::GENERAL,
        );
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        return (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
    }
    if usage.contains(TextureUsage::COPY_SRC) {
        return (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
    }
    if usage.contains(TextureUsage::COPY_DST) {
        return (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
    }
    (
        vk::AccessFlags::empty(),
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::ImageLayout::UNDEFINED,
    )
}

/// Builds the render-pass and framebuffer keys `begin_render_pass`
/// consults via `render_pass::RenderPassCache`. Pairing
/// is handled by the resource factory at encode time; this module only
/// owns the encoder's own state machine and barrier math, so the keys
/// themselves are built by the device wiring in `device.rs`.
pub fn clear_values_in_attachment_order(key: &RenderPassKey, clears: &[vk::ClearValue]) -> Vec<vk::ClearValue> {
    // Clear values must be supplied in the same order as attachments:
    // colors, then depth if present.
    let mut ordered = Vec::with_capacity(key.colors.len() + key.depth.is_some() as usize);
    ordered.extend_from_slice(&clears[..key.colors.len().min(clears.len())]);
    if key.depth.is_some() {
        if let Some(&value) = clears.get(key.colors.len()) {
            ordered.push(value);
        }
    }
    ordered
}
