//! Resource factory (C8): buffers, textures, views,
//! samplers, bind-group layouts, bind groups, pipeline layouts, shader
//! modules, and pipelines. Struct shapes are grounded directly on the
//! same-named types in `wgpu-hal`'s vulkan `mod.rs` (`Buffer { raw,
//! block }`, `Texture { raw, drop_guard, block, usage, format,
//! raw_flags, copy_size, view_formats }`, `BindGroupLayout`,
//! `PipelineLayout`, `BindGroup`, `ShaderModule`), with the
//! `gpu_alloc`/`gpu_descriptor` block fields replaced by this crate's
//! own `allocator::MemoryBlock`/descriptor allocation.

use ash::vk;
use parking_lot::Mutex;

use crate::allocator::{AllocationRequest, GpuAllocator, VulkanMemory};
use crate::error::{CreateResourceError, DeviceError, DriverBugError, ValidationError};
use crate::types::{BufferUsage, DescriptorCounts, MemoryUsage, TextureUsage};

#[derive(Debug)]
pub struct Buffer {
    pub raw: vk::Buffer,
    pub block: Option<Mutex<crate::allocator::MemoryBlock>>,
}

impl Buffer {
    /// Valid only when the buffer was created with a host-visible usage;
    /// computed as `base + suballocation_offset` against the shared
    /// mapping of the underlying `vk::DeviceMemory`.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.block.as_ref().and_then(|b| b.lock().mapped_ptr)
    }
}

#[derive(Debug)]
pub struct Texture {
    pub raw: vk::Image,
    pub block: Option<crate::allocator::MemoryBlock>,
    pub usage: TextureUsage,
    pub format: vk::Format,
    pub raw_flags: vk::ImageCreateFlags,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub extent: vk::Extent3D,
}

#[derive(Debug)]
pub struct TextureView {
    pub raw: vk::ImageView,
    pub format: vk::Format,
    /// Swapchain views are owned by the swapchain and reused across
    /// frames; destroying one here is a no-op (creating
    /// fresh per-frame views triggers driver bugs on some vendors).
    pub is_swapchain: bool,
}

#[derive(Debug)]
pub struct Sampler {
    pub raw: vk::Sampler,
}

#[derive(Debug)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
}

#[derive(Debug)]
pub struct BindGroupLayout {
    pub raw: vk::DescriptorSetLayout,
    pub counts: DescriptorCounts,
}

#[derive(Debug)]
pub struct BindGroup {
    pub set: vk::DescriptorSet,
    pub pool: vk::DescriptorPool,
}

#[derive(Debug)]
pub struct PipelineLayout {
    pub raw: vk::PipelineLayout,
}

#[derive(Debug)]
pub enum ShaderModule {
    /// Already-translated SPIR-V, little-endian 32-bit words.
    Spirv(vk::ShaderModule),
}

#[derive(Debug)]
pub struct RenderPipeline {
    pub raw: vk::Pipeline,
}

#[derive(Debug)]
pub struct ComputePipeline {
    pub raw: vk::Pipeline,
}

/// Every render pipeline declares this same dynamic-state set, so
/// multiple pipelines sharing a pass never trigger validation warnings
/// about mismatched dynamic state.
pub const RENDER_PIPELINE_DYNAMIC_STATES: &[vk::DynamicState] = &[
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::BLEND_CONSTANTS,
    vk::DynamicState::STENCIL_REFERENCE,
];

pub struct BufferDescriptor {
    pub size: u64,
    pub usage: BufferUsage,
    pub mapped_at_creation: bool,
}

pub struct TextureDescriptor {
    pub extent: vk::Extent3D,
    pub mip_level_count: u32,
    pub sample_count: u32,
    pub format: vk::Format,
    pub usage: TextureUsage,
    pub view_formats: Vec<vk::Format>,
    pub array_layers: u32,
}

pub struct RenderPipelineDescriptor<'a> {
    pub layout: &'a PipelineLayout,
    pub vertex: &'a ShaderModule,
    pub fragment: Option<&'a ShaderModule>,
    pub render_pass: vk::RenderPass,
}

/// Checks a Vulkan object-creation result for the driver-quirk failure
/// mode: success return with a null handle (observed on
/// some Intel drivers). Open question: the bind-group
/// layouts referenced by a failed pipeline creation are *not* cleaned up
/// here; the caller must destroy them explicitly.
pub fn check_driver_bug(handle: vk::Pipeline) -> Result<vk::Pipeline, DriverBugError> {
    if handle == vk::Pipeline::null() {
        Err(DriverBugError)
    } else {
        Ok(handle)
    }
}

/// Translates a buffer usage bitset into the memory-usage hints the
/// allocator's memory-type selector consumes.
pub fn buffer_memory_usage(usage: BufferUsage, mapped_at_creation: bool) -> MemoryUsage {
    let mut memory_usage = MemoryUsage::empty();
    let host_visible = usage.intersects(BufferUsage::MAP_READ | BufferUsage::MAP_WRITE)
        || usage.contains(BufferUsage::COPY_DST) && mapped_at_creation
        || mapped_at_creation;
    if host_visible {
        memory_usage |= MemoryUsage::HOST_ACCESS;
    }
    if usage.contains(BufferUsage::MAP_WRITE) {
        memory_usage |= MemoryUsage::UPLOAD;
    }
    if usage.contains(BufferUsage::MAP_READ) {
        memory_usage |= MemoryUsage::DOWNLOAD;
    }
    if !host_visible {
        memory_usage |= MemoryUsage::FAST_DEVICE_ACCESS;
    }
    memory_usage
}

/// Depth/stencil formats get `DEPTH_STENCIL_ATTACHMENT` instead of
/// `COLOR_ATTACHMENT`; 2D textures with >= 6 layers get
/// `CUBE_COMPATIBLE`; a populated `view_formats` list gets
/// `MUTABLE_FORMAT`.
pub fn texture_create_flags(desc: &TextureDescriptor) -> vk::ImageCreateFlags {
    let mut flags = vk::ImageCreateFlags::empty();
    if desc.array_layers >= 6 {
        flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
    }
    if !desc.view_formats.is_empty() {
        flags |= vk::ImageCreateFlags::MUTABLE_FORMAT;
    }
    flags
}

/// Translates a buffer usage bitset into the `vk::BufferUsageFlags` bits
/// that back it.
pub fn buffer_usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    flags
}

/// Translates a texture usage bitset into `vk::ImageUsageFlags`,
/// replacing `RENDER_ATTACHMENT` with `DEPTH_STENCIL_ATTACHMENT` instead
/// of `COLOR_ATTACHMENT` for depth/stencil formats.
pub fn texture_usage_flags(usage: TextureUsage, format: vk::Format) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsage::STORAGE_BINDING) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
        flags |= if is_depth_stencil_format(format) {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
    }
    flags
}

pub fn is_depth_stencil_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::S8_UINT
    )
}

pub fn validate_buffer_descriptor(desc: &BufferDescriptor) -> Result<(), ValidationError> {
    if desc.size == 0 {
        return Err(ValidationError::ZeroSizeResource);
    }
    Ok(())
}

pub fn validate_texture_descriptor(desc: &TextureDescriptor) -> Result<(), ValidationError> {
    if desc.extent.width == 0 || desc.extent.height == 0 || desc.extent.depth == 0 {
        return Err(ValidationError::ZeroSizeResource);
    }
    Ok(())
}

pub fn validate_render_pipeline_descriptor(desc: &RenderPipelineDescriptor) -> Result<(), ValidationError> {
    let _ = desc.fragment; // a fragment shader is optional; vertex is not.
    match desc.vertex {
        ShaderModule::Spirv(raw) if *raw != vk::ShaderModule::null() => Ok(()),
        _ => Err(ValidationError::MissingVertexShader),
    }
}

/// Creates a buffer and backs it with memory from the allocator:
/// `vkCreateBuffer`, query memory requirements, `GpuAllocator::alloc`,
/// `vkBindBufferMemory`. A host-visible buffer's `mapped_ptr` comes
/// straight from the allocation, mapped once when its owning
/// `vk::DeviceMemory` block was first carved out.
pub fn create_buffer(
    device: &ash::Device,
    allocator: &GpuAllocator,
    vk_allocator: &impl VulkanMemory,
    desc: &BufferDescriptor,
) -> Result<Buffer, CreateResourceError> {
    validate_buffer_descriptor(desc)?;

    let create_info = vk::BufferCreateInfo {
        size: desc.size,
        usage: buffer_usage_flags(desc.usage),
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let raw = unsafe { device.create_buffer(&create_info, None) }.map_err(DeviceError::from)?;

    let requirements = unsafe { device.get_buffer_memory_requirements(raw) };
    let request = AllocationRequest {
        size: requirements.size,
        alignment: requirements.alignment,
        usage: buffer_memory_usage(desc.usage, desc.mapped_at_creation),
        allowed_types: requirements.memory_type_bits,
    };
    let block = allocator.alloc(vk_allocator, &request).map_err(|err| {
        unsafe { device.destroy_buffer(raw, None) };
        err
    })?;

    if let Err(result) = unsafe { device.bind_buffer_memory(raw, block.memory, block.offset) } {
        unsafe { device.destroy_buffer(raw, None) };
        let _ = allocator.free(vk_allocator, block);
        return Err(DeviceError::from(result).into());
    }

    Ok(Buffer {
        raw,
        block: Some(Mutex::new(block)),
    })
}

/// Creates a texture and backs it with memory from the allocator, the
/// same create → query → allocate → bind flow as [`create_buffer`].
/// Textures are never host-visible, so no mapping is requested.
pub fn create_texture(
    device: &ash::Device,
    allocator: &GpuAllocator,
    vk_allocator: &impl VulkanMemory,
    desc: &TextureDescriptor,
) -> Result<Texture, CreateResourceError> {
    validate_texture_descriptor(desc)?;

    let raw_flags = texture_create_flags(desc);
    let image_type = if desc.extent.depth > 1 {
        vk::ImageType::TYPE_3D
    } else {
        vk::ImageType::TYPE_2D
    };
    let create_info = vk::ImageCreateInfo {
        flags: raw_flags,
        image_type,
        format: desc.format,
        extent: desc.extent,
        mip_levels: desc.mip_level_count,
        array_layers: desc.array_layers,
        samples: crate::render_pass::sample_count_flags(desc.sample_count),
        tiling: vk::ImageTiling::OPTIMAL,
        usage: texture_usage_flags(desc.usage, desc.format),
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        ..Default::default()
    };
    let raw = unsafe { device.create_image(&create_info, None) }.map_err(DeviceError::from)?;

    let requirements = unsafe { device.get_image_memory_requirements(raw) };
    let request = AllocationRequest {
        size: requirements.size,
        alignment: requirements.alignment,
        usage: MemoryUsage::FAST_DEVICE_ACCESS,
        allowed_types: requirements.memory_type_bits,
    };
    let block = allocator.alloc(vk_allocator, &request).map_err(|err| {
        unsafe { device.destroy_image(raw, None) };
        err
    })?;

    if let Err(result) = unsafe { device.bind_image_memory(raw, block.memory, block.offset) } {
        unsafe { device.destroy_image(raw, None) };
        let _ = allocator.free(vk_allocator, block);
        return Err(DeviceError::from(result).into());
    }

    Ok(Texture {
        raw,
        block: Some(block),
        usage: desc.usage,
        format: desc.format,
        raw_flags,
        mip_level_count: desc.mip_level_count,
        sample_count: desc.sample_count,
        extent: desc.extent,
    })
}

/// The suballocation shape for a host-visible buffer: free the memory
/// block after destroying the Vulkan buffer, so the shared mapping stays
/// valid for the buffer's full lifetime.
pub fn destroy_buffer(
    device: &ash::Device,
    allocator: &crate::allocator::GpuAllocator,
    vk_allocator: &impl crate::allocator::VulkanMemory,
    buffer: Buffer,
) -> Result<(), DeviceError> {
    unsafe { device.destroy_buffer(buffer.raw, None) };
    if let Some(block) = buffer.block {
        allocator.free(vk_allocator, block.into_inner())?;
    }
    Ok(())
}

pub fn destroy_texture(
    device: &ash::Device,
    allocator: &GpuAllocator,
    vk_allocator: &impl VulkanMemory,
    texture: Texture,
) -> Result<(), DeviceError> {
    unsafe { device.destroy_image(texture.raw, None) };
    if let Some(block) = texture.block {
        allocator.free(vk_allocator, block)?;
    }
    Ok(())
}
