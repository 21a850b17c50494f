//! The slice of WebGPU-flavored types this core touches directly.
//!
//! A full HAL would pull these from a sibling `wgpu-types` crate; this
//! core folds in only the subset it needs rather than carrying a
//! dependency on hundreds of unrelated WebGPU surface types.

use bitflags::bitflags;

bitflags! {
    /// How a buffer will be used, mirroring `wgpu-hal`'s `BufferUses`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const MAP_READ = 1 << 0;
        const MAP_WRITE = 1 << 1;
        const COPY_SRC = 1 << 2;
        const COPY_DST = 1 << 3;
        const UNIFORM = 1 << 4;
        const STORAGE = 1 << 5;
        const INDEX = 1 << 6;
        const VERTEX = 1 << 7;
        const INDIRECT = 1 << 8;
        /// Buffer is mapped at creation time and must be host-visible.
        const MAPPED_AT_CREATION = 1 << 9;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

/// Directs the memory-type selector.
bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryUsage: u32 {
        const HOST_ACCESS = 1 << 0;
        const UPLOAD = 1 << 1;
        const DOWNLOAD = 1 << 2;
        const FAST_DEVICE_ACCESS = 1 << 3;
        const TRANSIENT = 1 << 4;
    }
}

/// Eight unsigned counters, closed under scalar multiplication.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorCounts {
    pub samplers: u32,
    pub sampled_images: u32,
    pub storage_images: u32,
    pub uniform_buffers: u32,
    pub storage_buffers: u32,
    pub uniform_texel_buffers: u32,
    pub storage_texel_buffers: u32,
    pub input_attachments: u32,
}

impl DescriptorCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Scalar multiplication, used to size pools off a bind-group-layout
    /// shape.
    pub fn scale(&self, factor: u32) -> Self {
        Self {
            samplers: self.samplers * factor,
            sampled_images: self.sampled_images * factor,
            storage_images: self.storage_images * factor,
            uniform_buffers: self.uniform_buffers * factor,
            storage_buffers: self.storage_buffers * factor,
            uniform_texel_buffers: self.uniform_texel_buffers * factor,
            storage_texel_buffers: self.storage_texel_buffers * factor,
            input_attachments: self.input_attachments * factor,
        }
    }
}

impl std::ops::Add for DescriptorCounts {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            samplers: self.samplers + rhs.samplers,
            sampled_images: self.sampled_images + rhs.sampled_images,
            storage_images: self.storage_images + rhs.storage_images,
            uniform_buffers: self.uniform_buffers + rhs.uniform_buffers,
            storage_buffers: self.storage_buffers + rhs.storage_buffers,
            uniform_texel_buffers: self.uniform_texel_buffers + rhs.uniform_texel_buffers,
            storage_texel_buffers: self.storage_texel_buffers + rhs.storage_texel_buffers,
            input_attachments: self.input_attachments + rhs.input_attachments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_counts_scale_is_linear() {
        let counts = DescriptorCounts {
            uniform_buffers: 2,
            samplers: 1,
            ..Default::default()
        };
        let scaled = counts.scale(64);
        assert_eq!(scaled.uniform_buffers, 128);
        assert_eq!(scaled.samplers, 64);
        assert_eq!(scaled.sampled_images, 0);
    }

    #[test]
    fn descriptor_counts_add() {
        let a = DescriptorCounts {
            samplers: 1,
            ..Default::default()
        };
        let b = DescriptorCounts {
            samplers: 2,
            storage_buffers: 3,
            ..Default::default()
        };
        let sum = a + b;
        assert_eq!(sum.samplers, 3);
        assert_eq!(sum.storage_buffers, 3);
    }
}
