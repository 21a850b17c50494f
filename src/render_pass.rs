//! Render-pass / framebuffer interning cache (C7). Direct
//! generalization of `RenderPassKey`/`FramebufferKey` and the
//! `Mutex<rustc_hash::FxHashMap<_, _>>` fields on `DeviceShared` in
//! `wgpu-hal`'s vulkan backend.

use std::hash::Hash;

use arrayvec::ArrayVec;
use ash::vk;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::DeviceError;

pub const MAX_COLOR_ATTACHMENTS: usize = 8;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ColorAttachmentKey {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub final_layout: vk::ImageLayout,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DepthAttachmentKey {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub stencil_load_op: vk::AttachmentLoadOp,
    pub stencil_store_op: vk::AttachmentStoreOp,
}

/// Content-addressed description of a render pass.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct RenderPassKey {
    pub colors: ArrayVec<ColorAttachmentKey, MAX_COLOR_ATTACHMENTS>,
    pub depth: Option<DepthAttachmentKey>,
    pub sample_count: u32,
    pub has_msaa_resolve: bool,
}

/// Content-addressed description of a framebuffer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct FramebufferKey {
    pub render_pass: vk::RenderPass,
    pub color: Option<vk::ImageView>,
    pub resolve: Option<vk::ImageView>,
    pub depth: Option<vk::ImageView>,
    pub width: u32,
    pub height: u32,
}

/// Attachment references for the single subpass every render pass built
/// here has, indices matching the position each attachment was pushed
/// into the accompanying `Vec<vk::AttachmentDescription>`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubpassAttachments {
    pub colors: ArrayVec<vk::AttachmentReference, MAX_COLOR_ATTACHMENTS>,
    pub resolves: ArrayVec<vk::AttachmentReference, MAX_COLOR_ATTACHMENTS>,
    pub depth: Option<vk::AttachmentReference>,
}

pub(crate) fn sample_count_flags(count: u32) -> vk::SampleCountFlags {
    match count {
        1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        _ => vk::SampleCountFlags::TYPE_1,
    }
}

fn initial_layout_for(load_op: vk::AttachmentLoadOp, final_layout: vk::ImageLayout) -> vk::ImageLayout {
    if load_op == vk::AttachmentLoadOp::LOAD {
        final_layout
    } else {
        vk::ImageLayout::UNDEFINED
    }
}

/// Builds the attachment descriptions and subpass references for `key`,
/// in (color, resolve-if-MSAA, depth-if-present) order. Pure
/// struct-building, no Vulkan calls.
///
/// When `key.has_msaa_resolve` is set, each multisampled color
/// attachment's store op is overridden to `DONT_CARE` and its final
/// layout to `COLOR_ATTACHMENT_OPTIMAL` — the resolve attachment is what
/// actually gets stored and presented. An attachment whose load op is
/// `LOAD` gets `initial_layout == final_layout`, since its contents must
/// already be in that layout from a previous pass.
pub fn render_pass_attachments(key: &RenderPassKey) -> (Vec<vk::AttachmentDescription>, SubpassAttachments) {
    let mut descriptions = Vec::with_capacity(key.colors.len() * 2 + 1);
    let mut refs = SubpassAttachments::default();
    let samples = sample_count_flags(key.sample_count);

    for color in &key.colors {
        let (store_op, final_layout) = if key.has_msaa_resolve {
            (vk::AttachmentStoreOp::DONT_CARE, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        } else {
            (color.store_op, color.final_layout)
        };
        let index = descriptions.len() as u32;
        descriptions.push(vk::AttachmentDescription {
            format: color.format,
            samples,
            load_op: color.load_op,
            store_op,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: initial_layout_for(color.load_op, final_layout),
            final_layout,
            ..Default::default()
        });
        refs.colors.push(vk::AttachmentReference {
            attachment: index,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
    }

    if key.has_msaa_resolve {
        for color in &key.colors {
            let index = descriptions.len() as u32;
            descriptions.push(vk::AttachmentDescription {
                format: color.format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::DONT_CARE,
                store_op: color.store_op,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: color.final_layout,
                ..Default::default()
            });
            refs.resolves.push(vk::AttachmentReference {
                attachment: index,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            });
        }
    }

    if let Some(depth) = key.depth {
        let final_layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        let index = descriptions.len() as u32;
        descriptions.push(vk::AttachmentDescription {
            format: depth.format,
            samples,
            load_op: depth.load_op,
            store_op: depth.store_op,
            stencil_load_op: depth.stencil_load_op,
            stencil_store_op: depth.stencil_store_op,
            initial_layout: initial_layout_for(depth.load_op, final_layout),
            final_layout,
            ..Default::default()
        });
        refs.depth = Some(vk::AttachmentReference {
            attachment: index,
            layout: final_layout,
        });
    }

    (descriptions, refs)
}

/// The Vulkan object-creation calls this cache drives, isolated so the
/// interning/eviction bookkeeping is unit-testable without a real
/// device. `create_render_pass` receives the already-built attachment
/// descriptions and subpass references — the one `vkCreateRenderPass`
/// call is all an implementor has left to do.
pub trait VulkanRenderTargets {
    fn create_render_pass(
        &self,
        attachments: &[vk::AttachmentDescription],
        subpass: &SubpassAttachments,
    ) -> Result<vk::RenderPass, DeviceError>;
    fn create_framebuffer(&self, key: &FramebufferKey) -> Result<vk::Framebuffer, DeviceError>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
}

#[derive(Default)]
struct Inner {
    render_passes: FxHashMap<RenderPassKey, vk::RenderPass>,
    framebuffers: FxHashMap<FramebufferKey, vk::Framebuffer>,
}

/// Render passes never become invalid once created; framebuffers are
/// evicted (and destroyed) when any image view they reference is about
/// to be destroyed.
pub struct RenderPassCache {
    inner: RwLock<Inner>,
}

impl RenderPassCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn get_or_create_render_pass(
        &self,
        device: &impl VulkanRenderTargets,
        key: &RenderPassKey,
    ) -> Result<vk::RenderPass, DeviceError> {
        profiling::scope!("RenderPassCache::get_or_create_render_pass");
        if let Some(&raw) = self.inner.read().render_passes.get(key) {
            return Ok(raw);
        }
        let mut inner = self.inner.write();
        // Another thread may have raced us between the read-unlock and
        // the write-lock acquire.
        if let Some(&raw) = inner.render_passes.get(key) {
            return Ok(raw);
        }
        let (attachments, subpass) = render_pass_attachments(key);
        let raw = device.create_render_pass(&attachments, &subpass)?;
        inner.render_passes.insert(key.clone(), raw);
        Ok(raw)
    }

    pub fn get_or_create_framebuffer(
        &self,
        device: &impl VulkanRenderTargets,
        key: &FramebufferKey,
    ) -> Result<vk::Framebuffer, DeviceError> {
        if let Some(&raw) = self.inner.read().framebuffers.get(key) {
            return Ok(raw);
        }
        let mut inner = self.inner.write();
        if let Some(&raw) = inner.framebuffers.get(key) {
            return Ok(raw);
        }
        let raw = device.create_framebuffer(key)?;
        inner.framebuffers.insert(*key, raw);
        Ok(raw)
    }

    /// Evicts (and destroys) every framebuffer referencing `view`, ahead
    /// of that view's own destruction.
    pub fn evict_framebuffers_referencing(&self, device: &impl VulkanRenderTargets, view: vk::ImageView) {
        let mut inner = self.inner.write();
        let stale: Vec<FramebufferKey> = inner
            .framebuffers
            .keys()
            .filter(|key| key.color == Some(view) || key.resolve == Some(view) || key.depth == Some(view))
            .cloned()
            .collect();
        for key in stale {
            if let Some(raw) = inner.framebuffers.remove(&key) {
                device.destroy_framebuffer(raw);
            }
        }
    }

    pub fn render_pass_count(&self) -> usize {
        self.inner.read().render_passes.len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.inner.read().framebuffers.len()
    }
}

impl Default for RenderPassCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeTargets {
        next_pass: RefCell<u64>,
        next_fb: RefCell<u64>,
        creates: RefCell<u32>,
    }

    impl FakeTargets {
        fn new() -> Self {
            Self {
                next_pass: RefCell::new(1),
                next_fb: RefCell::new(1),
                creates: RefCell::new(0),
            }
        }
    }

    impl VulkanRenderTargets for FakeTargets {
        fn create_render_pass(
            &self,
            _attachments: &[vk::AttachmentDescription],
            _subpass: &SubpassAttachments,
        ) -> Result<vk::RenderPass, DeviceError> {
            *self.creates.borrow_mut() += 1;
            let mut next = self.next_pass.borrow_mut();
            let raw = vk::RenderPass::from_raw(*next);
            *next += 1;
            Ok(raw)
        }

        fn create_framebuffer(&self, _key: &FramebufferKey) -> Result<vk::Framebuffer, DeviceError> {
            let mut next = self.next_fb.borrow_mut();
            let raw = vk::Framebuffer::from_raw(*next);
            *next += 1;
            Ok(raw)
        }

        fn destroy_framebuffer(&self, _framebuffer: vk::Framebuffer) {}
    }

    fn sample_key() -> RenderPassKey {
        let mut colors = ArrayVec::new();
        colors.push(ColorAttachmentKey {
            format: vk::Format::R8G8B8A8_UNORM,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        RenderPassKey {
            colors,
            depth: None,
            sample_count: 1,
            has_msaa_resolve: false,
        }
    }

    #[test]
    fn property_6_equal_keys_yield_identical_handles() {
        let device = FakeTargets::new();
        let cache = RenderPassCache::new();
        let k1 = sample_key();
        let k2 = sample_key();
        assert_eq!(k1, k2);

        let a = cache.get_or_create_render_pass(&device, &k1).unwrap();
        let b = cache.get_or_create_render_pass(&device, &k2).unwrap();
        assert_eq!(a, b);
        assert_eq!(*device.creates.borrow(), 1);
        assert_eq!(cache.render_pass_count(), 1);
    }

    #[test]
    fn distinct_keys_create_distinct_passes() {
        let device = FakeTargets::new();
        let cache = RenderPassCache::new();
        let k1 = sample_key();
        let mut k2 = sample_key();
        k2.sample_count = 4;

        let a = cache.get_or_create_render_pass(&device, &k1).unwrap();
        let b = cache.get_or_create_render_pass(&device, &k2).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.render_pass_count(), 2);
    }

    #[test]
    fn framebuffer_eviction_on_view_destruction() {
        let device = FakeTargets::new();
        let cache = RenderPassCache::new();
        let pass = cache.get_or_create_render_pass(&device, &sample_key()).unwrap();
        let view = vk::ImageView::from_raw(42);
        let key = FramebufferKey {
            render_pass: pass,
            color: Some(view),
            resolve: None,
            depth: None,
            width: 4,
            height: 4,
        };
        cache.get_or_create_framebuffer(&device, &key).unwrap();
        assert_eq!(cache.framebuffer_count(), 1);

        cache.evict_framebuffers_referencing(&device, view);
        assert_eq!(cache.framebuffer_count(), 0);
    }

    #[test]
    fn render_passes_survive_framebuffer_eviction() {
        let device = FakeTargets::new();
        let cache = RenderPassCache::new();
        let pass = cache.get_or_create_render_pass(&device, &sample_key()).unwrap();
        let view = vk::ImageView::from_raw(7);
        let key = FramebufferKey {
            render_pass: pass,
            color: Some(view),
            resolve: None,
            depth: None,
            width: 4,
            height: 4,
        };
        cache.get_or_create_framebuffer(&device, &key).unwrap();
        cache.evict_framebuffers_referencing(&device, view);
        assert_eq!(cache.render_pass_count(), 1);
    }

    fn msaa_key() -> RenderPassKey {
        let mut colors = ArrayVec::new();
        colors.push(ColorAttachmentKey {
            format: vk::Format::R8G8B8A8_UNORM,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        });
        RenderPassKey {
            colors,
            depth: Some(DepthAttachmentKey {
                format: vk::Format::D32_SFLOAT,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            }),
            sample_count: 4,
            has_msaa_resolve: true,
        }
    }

    #[test]
    fn attachments_are_ordered_color_resolve_depth() {
        let (descriptions, subpass) = render_pass_attachments(&msaa_key());
        // one color, one resolve, one depth
        assert_eq!(descriptions.len(), 3);
        assert_eq!(subpass.colors.len(), 1);
        assert_eq!(subpass.colors[0].attachment, 0);
        assert_eq!(subpass.resolves.len(), 1);
        assert_eq!(subpass.resolves[0].attachment, 1);
        assert_eq!(subpass.depth.unwrap().attachment, 2);
    }

    #[test]
    fn msaa_resolve_overrides_multisampled_color_store_op_and_layout() {
        let (descriptions, _) = render_pass_attachments(&msaa_key());
        let color = descriptions[0];
        assert_eq!(color.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(color.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(color.samples, vk::SampleCountFlags::TYPE_4);

        let resolve = descriptions[1];
        assert_eq!(resolve.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(resolve.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(resolve.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn non_msaa_color_keeps_its_own_store_op_and_final_layout() {
        let (descriptions, _) = render_pass_attachments(&sample_key());
        assert_eq!(descriptions[0].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(descriptions[0].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
    }

    #[test]
    fn load_op_load_sets_initial_layout_to_final_layout() {
        let mut key = sample_key();
        key.colors[0].load_op = vk::AttachmentLoadOp::LOAD;
        let (descriptions, _) = render_pass_attachments(&key);
        assert_eq!(descriptions[0].initial_layout, descriptions[0].final_layout);
    }

    #[test]
    fn load_op_clear_leaves_initial_layout_undefined() {
        let (descriptions, _) = render_pass_attachments(&sample_key());
        assert_eq!(descriptions[0].initial_layout, vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn depth_only_pass_has_no_color_or_resolve_refs() {
        let key = RenderPassKey {
            colors: ArrayVec::new(),
            depth: Some(DepthAttachmentKey {
                format: vk::Format::D32_SFLOAT,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            }),
            sample_count: 1,
            has_msaa_resolve: false,
        };
        let (descriptions, subpass) = render_pass_attachments(&key);
        assert_eq!(descriptions.len(), 1);
        assert!(subpass.colors.is_empty());
        assert!(subpass.resolves.is_empty());
        assert_eq!(subpass.depth.unwrap().layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
    }
}
