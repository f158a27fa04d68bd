use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::{debug, warn};

use gpuwire_protocol::{TextureDimension, TextureFormat, TextureUsage, MAX_ATTACHMENTS, MAX_SUBPASSES};

use crate::backend::{Backend, BackendError, ErrorCallback};

/// Presentable images per swap chain.
pub const BACKBUFFER_COUNT: u32 = 3;

/// Magic word every SPIR-V module starts with.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Opaque object reference handed out by [`NullBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NullHandle(u64);

impl NullHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NullHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "null:{}", self.0)
    }
}

#[derive(Debug, Default, Clone)]
struct Subpass {
    color: BTreeMap<u32, u32>,
    depth_stencil: Option<u32>,
}

#[derive(Debug, Default, Clone)]
struct RenderPassDesc {
    formats: Option<Vec<Option<TextureFormat>>>,
    subpasses: Option<Vec<Subpass>>,
    error: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct TextureDesc {
    dimension: Option<TextureDimension>,
    extent: Option<(u32, u32, u32)>,
    format: Option<TextureFormat>,
    mip_levels: Option<u32>,
    allowed_usage: Option<TextureUsage>,
}

#[derive(Debug, Clone)]
struct Texture {
    format: TextureFormat,
    allowed_usage: TextureUsage,
    frozen: Option<TextureUsage>,
}

#[derive(Debug, Default, Clone)]
struct FramebufferDesc {
    render_pass: Option<NullHandle>,
    dimensions: Option<(u32, u32)>,
    attachments: BTreeMap<u32, NullHandle>,
}

#[derive(Debug, Default, Clone)]
struct SwapChainState {
    config: Option<(TextureFormat, TextureUsage, u32, u32)>,
    next_index: u32,
    acquired: Option<NullHandle>,
}

#[derive(Debug, Clone)]
enum NullObject {
    Device,
    RenderPassBuilder(RenderPassDesc),
    RenderPass { formats: Vec<TextureFormat> },
    TextureBuilder(TextureDesc),
    Texture(Texture),
    TextureViewBuilder { texture: NullHandle },
    TextureView { texture: NullHandle },
    FramebufferBuilder(FramebufferDesc),
    Framebuffer,
    ShaderModuleBuilder { code: Option<Vec<u32>> },
    ShaderModule,
    SwapChainBuilder { implementation: Option<u64> },
    SwapChain(SwapChainState),
}

impl NullObject {
    fn kind(&self) -> &'static str {
        match self {
            NullObject::Device => "Device",
            NullObject::RenderPassBuilder(_) => "RenderPassBuilder",
            NullObject::RenderPass { .. } => "RenderPass",
            NullObject::TextureBuilder(_) => "TextureBuilder",
            NullObject::Texture(_) => "Texture",
            NullObject::TextureViewBuilder { .. } => "TextureViewBuilder",
            NullObject::TextureView { .. } => "TextureView",
            NullObject::FramebufferBuilder(_) => "FramebufferBuilder",
            NullObject::Framebuffer => "Framebuffer",
            NullObject::ShaderModuleBuilder { .. } => "ShaderModuleBuilder",
            NullObject::ShaderModule => "ShaderModule",
            NullObject::SwapChainBuilder { .. } => "SwapChainBuilder",
            NullObject::SwapChain(_) => "SwapChain",
        }
    }
}

/// Headless backend that keeps every object in an arena and validates
/// descriptors the way a native device would, without touching a GPU.
///
/// Used by the CLI demo and the test suites; it also counts releases of
/// handles it no longer knows, which is how double releases are detected.
pub struct NullBackend {
    objects: HashMap<NullHandle, NullObject>,
    next_handle: u64,
    device: NullHandle,
    error_callback: Option<ErrorCallback>,
    stale_releases: usize,
}

impl NullBackend {
    pub fn new() -> Self {
        let device = NullHandle(1);
        let mut objects = HashMap::new();
        objects.insert(device, NullObject::Device);
        Self {
            objects,
            next_handle: 2,
            device,
            error_callback: None,
            stale_releases: 0,
        }
    }

    /// Live objects, not counting the device.
    pub fn live_objects(&self) -> usize {
        self.objects.len() - 1
    }

    /// Live objects of one kind (`"RenderPass"`, `"Texture"`, ...).
    pub fn count(&self, kind: &str) -> usize {
        self.objects.values().filter(|o| o.kind() == kind).count()
    }

    /// Kind of a live object, `None` once released.
    pub fn kind_of(&self, handle: NullHandle) -> Option<&'static str> {
        self.objects.get(&handle).map(NullObject::kind)
    }

    /// Releases of handles that were already gone.
    pub fn stale_releases(&self) -> usize {
        self.stale_releases
    }

    fn alloc(&mut self, object: NullObject) -> NullHandle {
        let handle = NullHandle(self.next_handle);
        self.next_handle += 1;
        debug!("null backend: {} -> {}", object.kind(), handle);
        self.objects.insert(handle, object);
        handle
    }

    fn report(&mut self, message: String) {
        match self.error_callback.as_mut() {
            Some(callback) => callback(&message),
            None => warn!("null backend error with no callback installed: {}", message),
        }
    }

    fn take_builder(&mut self, handle: NullHandle, kind: &str) -> Result<NullObject, BackendError> {
        match self.objects.remove(&handle) {
            Some(object) if object.kind() == kind => Ok(object),
            Some(other) => {
                let found = other.kind();
                self.objects.insert(handle, other);
                Err(BackendError::new(format!("{} is a {}, expected {}", handle, found, kind)))
            }
            None => Err(BackendError::new(format!("{} {} does not exist", kind, handle))),
        }
    }

    fn render_pass_builder(&mut self, handle: &NullHandle) -> Option<&mut RenderPassDesc> {
        match self.objects.get_mut(handle) {
            Some(NullObject::RenderPassBuilder(desc)) => Some(desc),
            _ => None,
        }
    }

    fn texture_builder(&mut self, handle: &NullHandle) -> Option<&mut TextureDesc> {
        match self.objects.get_mut(handle) {
            Some(NullObject::TextureBuilder(desc)) => Some(desc),
            _ => None,
        }
    }

    fn framebuffer_builder(&mut self, handle: &NullHandle) -> Option<&mut FramebufferDesc> {
        match self.objects.get_mut(handle) {
            Some(NullObject::FramebufferBuilder(desc)) => Some(desc),
            _ => None,
        }
    }

    fn swap_chain(&mut self, handle: &NullHandle) -> Option<&mut SwapChainState> {
        match self.objects.get_mut(handle) {
            Some(NullObject::SwapChain(state)) => Some(state),
            _ => None,
        }
    }

    fn not_a(&mut self, handle: &NullHandle, kind: &str, op: &str) {
        let found = self.kind_of(*handle).unwrap_or("released object");
        self.report(format!("{}: {} is a {}, expected {}", op, handle, found, kind));
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPassDesc {
    fn fail(&mut self, message: String) {
        self.error.get_or_insert(message);
    }

    fn subpass(&mut self, index: u32) -> Result<&mut Subpass, String> {
        let subpasses = self
            .subpasses
            .as_mut()
            .ok_or_else(|| format!("subpass {} set before the subpass count", index))?;
        let count = subpasses.len();
        subpasses
            .get_mut(index as usize)
            .ok_or_else(|| format!("subpass {} out of range ({} subpasses)", index, count))
    }

    fn attachment_in_range(&self, attachment: u32) -> Result<(), String> {
        match &self.formats {
            Some(formats) if (attachment as usize) < formats.len() => Ok(()),
            Some(formats) => Err(format!(
                "attachment {} out of range ({} attachments)",
                attachment,
                formats.len()
            )),
            None => Err(format!("attachment {} referenced before the attachment count", attachment)),
        }
    }

    fn validate(&self) -> Result<Vec<TextureFormat>, String> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let formats = self.formats.as_ref().ok_or("render pass attachment count was never set")?;
        let subpasses = self.subpasses.as_ref().ok_or("render pass subpass count was never set")?;
        if subpasses.is_empty() {
            return Err("render pass needs at least one subpass".to_string());
        }
        let mut resolved = Vec::with_capacity(formats.len());
        for (index, format) in formats.iter().enumerate() {
            resolved.push(format.ok_or_else(|| format!("render pass attachment {} has no format", index))?);
        }
        for (index, subpass) in subpasses.iter().enumerate() {
            for attachment in subpass.color.values() {
                if let Some(Some(format)) = formats.get(*attachment as usize) {
                    if format.is_depth_stencil() {
                        return Err(format!(
                            "subpass {} uses depth-stencil attachment {} as a color output",
                            index, attachment
                        ));
                    }
                }
            }
            if let Some(attachment) = subpass.depth_stencil {
                if let Some(Some(format)) = formats.get(attachment as usize) {
                    if !format.is_depth_stencil() {
                        return Err(format!(
                            "subpass {} uses color attachment {} as depth-stencil",
                            index, attachment
                        ));
                    }
                }
            }
        }
        Ok(resolved)
    }
}

impl TextureDesc {
    fn validate(&self) -> Result<Texture, String> {
        let (width, height, depth) = self.extent.ok_or("texture extent was never set")?;
        let format = self.format.ok_or("texture format was never set")?;
        let levels = self.mip_levels.ok_or("texture mip levels were never set")?;
        if width == 0 || height == 0 || depth == 0 {
            return Err(format!("texture extent {}x{}x{} has a zero dimension", width, height, depth));
        }
        if levels == 0 {
            return Err("texture mip levels must be at least 1, got 0".to_string());
        }
        let max_levels = 32 - width.max(height).leading_zeros();
        if levels > max_levels {
            return Err(format!(
                "texture mip levels {} exceed the {} levels a {}x{} texture can have",
                levels, max_levels, width, height
            ));
        }
        let allowed_usage = self.allowed_usage.unwrap_or_else(TextureUsage::empty);
        let unknown = allowed_usage.bits() & !TextureUsage::all().bits();
        if unknown != 0 {
            return Err(format!("texture allowed usage has unknown bits {:#x}", unknown));
        }
        match self.dimension.unwrap_or_default() {
            TextureDimension::E2D if depth != 1 => {
                return Err(format!("2D texture must have depth 1, got {}", depth));
            }
            TextureDimension::E2D => {}
        }
        Ok(Texture {
            format,
            allowed_usage,
            frozen: None,
        })
    }
}

impl Backend for NullBackend {
    type Object = NullHandle;

    fn device(&self) -> NullHandle {
        self.device
    }

    fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.error_callback = Some(callback);
    }

    fn release(&mut self, object: NullHandle) {
        if object == self.device {
            return;
        }
        match self.objects.remove(&object) {
            Some(released) => debug!("null backend: released {} {}", released.kind(), object),
            None => {
                self.stale_releases += 1;
                warn!("null backend: release of unknown handle {}", object);
            }
        }
    }

    // ── Device ──────────────────────────────────────────────

    fn device_create_render_pass_builder(&mut self, _device: &NullHandle) -> NullHandle {
        self.alloc(NullObject::RenderPassBuilder(RenderPassDesc::default()))
    }

    fn device_create_texture_builder(&mut self, _device: &NullHandle) -> NullHandle {
        self.alloc(NullObject::TextureBuilder(TextureDesc::default()))
    }

    fn device_create_framebuffer_builder(&mut self, _device: &NullHandle) -> NullHandle {
        self.alloc(NullObject::FramebufferBuilder(FramebufferDesc::default()))
    }

    fn device_create_shader_module_builder(&mut self, _device: &NullHandle) -> NullHandle {
        self.alloc(NullObject::ShaderModuleBuilder { code: None })
    }

    fn device_create_swap_chain_builder(&mut self, _device: &NullHandle) -> NullHandle {
        self.alloc(NullObject::SwapChainBuilder { implementation: None })
    }

    // ── Render pass builder ─────────────────────────────────

    fn render_pass_builder_set_attachment_count(&mut self, builder: &NullHandle, count: u32) {
        let Some(desc) = self.render_pass_builder(builder) else {
            return self.not_a(builder, "RenderPassBuilder", "SetAttachmentCount");
        };
        if desc.formats.is_some() {
            desc.fail("render pass attachment count set twice".to_string());
        } else if count > MAX_ATTACHMENTS {
            desc.fail(format!(
                "render pass attachment count {} exceeds the limit of {}",
                count, MAX_ATTACHMENTS
            ));
        } else {
            desc.formats = Some(vec![None; count as usize]);
        }
    }

    fn render_pass_builder_attachment_set_format(
        &mut self,
        builder: &NullHandle,
        attachment: u32,
        format: TextureFormat,
    ) {
        let Some(desc) = self.render_pass_builder(builder) else {
            return self.not_a(builder, "RenderPassBuilder", "AttachmentSetFormat");
        };
        match desc.attachment_in_range(attachment) {
            Ok(()) => {
                if let Some(slot) = desc.formats.as_mut().and_then(|f| f.get_mut(attachment as usize)) {
                    *slot = Some(format);
                }
            }
            Err(e) => desc.fail(e),
        }
    }

    fn render_pass_builder_set_subpass_count(&mut self, builder: &NullHandle, count: u32) {
        let Some(desc) = self.render_pass_builder(builder) else {
            return self.not_a(builder, "RenderPassBuilder", "SetSubpassCount");
        };
        if desc.subpasses.is_some() {
            desc.fail("render pass subpass count set twice".to_string());
        } else if count > MAX_SUBPASSES {
            desc.fail(format!(
                "render pass subpass count {} exceeds the limit of {}",
                count, MAX_SUBPASSES
            ));
        } else {
            desc.subpasses = Some(vec![Subpass::default(); count as usize]);
        }
    }

    fn render_pass_builder_subpass_set_color_attachment(
        &mut self,
        builder: &NullHandle,
        subpass: u32,
        output_index: u32,
        attachment: u32,
    ) {
        let Some(desc) = self.render_pass_builder(builder) else {
            return self.not_a(builder, "RenderPassBuilder", "SubpassSetColorAttachment");
        };
        let result = desc.attachment_in_range(attachment).and_then(|()| {
            desc.subpass(subpass)?.color.insert(output_index, attachment);
            Ok(())
        });
        if let Err(e) = result {
            desc.fail(e);
        }
    }

    fn render_pass_builder_subpass_set_depth_stencil_attachment(
        &mut self,
        builder: &NullHandle,
        subpass: u32,
        attachment: u32,
    ) {
        let Some(desc) = self.render_pass_builder(builder) else {
            return self.not_a(builder, "RenderPassBuilder", "SubpassSetDepthStencilAttachment");
        };
        let result = desc.attachment_in_range(attachment).and_then(|()| {
            desc.subpass(subpass)?.depth_stencil = Some(attachment);
            Ok(())
        });
        if let Err(e) = result {
            desc.fail(e);
        }
    }

    fn render_pass_builder_get_result(&mut self, builder: NullHandle) -> Result<NullHandle, BackendError> {
        let NullObject::RenderPassBuilder(desc) = self.take_builder(builder, "RenderPassBuilder")? else {
            return Err(BackendError::new("render pass builder vanished"));
        };
        let formats = desc.validate().map_err(BackendError::new)?;
        Ok(self.alloc(NullObject::RenderPass { formats }))
    }

    // ── Texture builder ─────────────────────────────────────

    fn texture_builder_set_dimension(&mut self, builder: &NullHandle, dimension: TextureDimension) {
        match self.texture_builder(builder) {
            Some(desc) => desc.dimension = Some(dimension),
            None => self.not_a(builder, "TextureBuilder", "SetDimension"),
        }
    }

    fn texture_builder_set_extent(&mut self, builder: &NullHandle, width: u32, height: u32, depth: u32) {
        match self.texture_builder(builder) {
            Some(desc) => desc.extent = Some((width, height, depth)),
            None => self.not_a(builder, "TextureBuilder", "SetExtent"),
        }
    }

    fn texture_builder_set_format(&mut self, builder: &NullHandle, format: TextureFormat) {
        match self.texture_builder(builder) {
            Some(desc) => desc.format = Some(format),
            None => self.not_a(builder, "TextureBuilder", "SetFormat"),
        }
    }

    fn texture_builder_set_mip_levels(&mut self, builder: &NullHandle, levels: u32) {
        match self.texture_builder(builder) {
            Some(desc) => desc.mip_levels = Some(levels),
            None => self.not_a(builder, "TextureBuilder", "SetMipLevels"),
        }
    }

    fn texture_builder_set_allowed_usage(&mut self, builder: &NullHandle, usage: TextureUsage) {
        match self.texture_builder(builder) {
            Some(desc) => desc.allowed_usage = Some(usage),
            None => self.not_a(builder, "TextureBuilder", "SetAllowedUsage"),
        }
    }

    fn texture_builder_get_result(&mut self, builder: NullHandle) -> Result<NullHandle, BackendError> {
        let NullObject::TextureBuilder(desc) = self.take_builder(builder, "TextureBuilder")? else {
            return Err(BackendError::new("texture builder vanished"));
        };
        let texture = desc.validate().map_err(BackendError::new)?;
        Ok(self.alloc(NullObject::Texture(texture)))
    }

    // ── Texture / texture view ──────────────────────────────

    fn texture_freeze_usage(&mut self, texture: &NullHandle, usage: TextureUsage) {
        let message = match self.objects.get_mut(texture) {
            Some(NullObject::Texture(state)) => {
                if state.frozen.is_some() {
                    Some(format!("texture {} usage is already frozen", texture))
                } else if !state.allowed_usage.contains(usage) {
                    Some(format!(
                        "texture {} usage {:?} is not within allowed usage {:?}",
                        texture, usage, state.allowed_usage
                    ))
                } else {
                    state.frozen = Some(usage);
                    None
                }
            }
            _ => return self.not_a(texture, "Texture", "FreezeUsage"),
        };
        if let Some(message) = message {
            self.report(message);
        }
    }

    fn texture_create_texture_view_builder(&mut self, texture: &NullHandle) -> NullHandle {
        self.alloc(NullObject::TextureViewBuilder { texture: *texture })
    }

    fn texture_view_builder_get_result(&mut self, builder: NullHandle) -> Result<NullHandle, BackendError> {
        let NullObject::TextureViewBuilder { texture } = self.take_builder(builder, "TextureViewBuilder")?
        else {
            return Err(BackendError::new("texture view builder vanished"));
        };
        if !matches!(self.objects.get(&texture), Some(NullObject::Texture(_))) {
            return Err(BackendError::new(format!("texture {} was released before its view", texture)));
        }
        Ok(self.alloc(NullObject::TextureView { texture }))
    }

    // ── Framebuffer builder ─────────────────────────────────

    fn framebuffer_builder_set_render_pass(&mut self, builder: &NullHandle, render_pass: &NullHandle) {
        match self.framebuffer_builder(builder) {
            Some(desc) => desc.render_pass = Some(*render_pass),
            None => self.not_a(builder, "FramebufferBuilder", "SetRenderPass"),
        }
    }

    fn framebuffer_builder_set_dimensions(&mut self, builder: &NullHandle, width: u32, height: u32) {
        match self.framebuffer_builder(builder) {
            Some(desc) => desc.dimensions = Some((width, height)),
            None => self.not_a(builder, "FramebufferBuilder", "SetDimensions"),
        }
    }

    fn framebuffer_builder_set_attachment(&mut self, builder: &NullHandle, slot: u32, view: &NullHandle) {
        match self.framebuffer_builder(builder) {
            Some(desc) => {
                desc.attachments.insert(slot, *view);
            }
            None => self.not_a(builder, "FramebufferBuilder", "SetAttachment"),
        }
    }

    fn framebuffer_builder_get_result(&mut self, builder: NullHandle) -> Result<NullHandle, BackendError> {
        let NullObject::FramebufferBuilder(desc) = self.take_builder(builder, "FramebufferBuilder")? else {
            return Err(BackendError::new("framebuffer builder vanished"));
        };
        let render_pass = desc
            .render_pass
            .ok_or_else(|| BackendError::new("framebuffer render pass was never set"))?;
        let formats = match self.objects.get(&render_pass) {
            Some(NullObject::RenderPass { formats }) => formats.clone(),
            _ => {
                return Err(BackendError::new(format!(
                    "framebuffer render pass {} is not a live render pass",
                    render_pass
                )))
            }
        };
        match desc.dimensions {
            Some((w, h)) if w > 0 && h > 0 => {}
            Some((w, h)) => {
                return Err(BackendError::new(format!("framebuffer dimensions {}x{} are empty", w, h)))
            }
            None => return Err(BackendError::new("framebuffer dimensions were never set")),
        }
        for (slot, expected) in formats.iter().enumerate() {
            let view = desc
                .attachments
                .get(&(slot as u32))
                .ok_or_else(|| BackendError::new(format!("framebuffer attachment {} was never set", slot)))?;
            let texture = match self.objects.get(view) {
                Some(NullObject::TextureView { texture }) => *texture,
                _ => {
                    return Err(BackendError::new(format!(
                        "framebuffer attachment {} ({}) is not a live texture view",
                        slot, view
                    )))
                }
            };
            match self.objects.get(&texture) {
                Some(NullObject::Texture(t)) if t.format == *expected => {}
                Some(NullObject::Texture(t)) => {
                    return Err(BackendError::new(format!(
                        "framebuffer attachment {} is {:?}, render pass expects {:?}",
                        slot, t.format, expected
                    )))
                }
                _ => {
                    return Err(BackendError::new(format!(
                        "framebuffer attachment {} views a released texture",
                        slot
                    )))
                }
            }
        }
        if let Some(extra) = desc.attachments.keys().find(|slot| **slot as usize >= formats.len()) {
            return Err(BackendError::new(format!(
                "framebuffer attachment {} out of range ({} attachments)",
                extra,
                formats.len()
            )));
        }
        Ok(self.alloc(NullObject::Framebuffer))
    }

    // ── Shader module builder ───────────────────────────────

    fn shader_module_builder_set_source(&mut self, builder: &NullHandle, code: &[u32]) {
        match self.objects.get_mut(builder) {
            Some(NullObject::ShaderModuleBuilder { code: slot }) => *slot = Some(code.to_vec()),
            _ => self.not_a(builder, "ShaderModuleBuilder", "SetSource"),
        }
    }

    fn shader_module_builder_get_result(&mut self, builder: NullHandle) -> Result<NullHandle, BackendError> {
        let NullObject::ShaderModuleBuilder { code } = self.take_builder(builder, "ShaderModuleBuilder")?
        else {
            return Err(BackendError::new("shader module builder vanished"));
        };
        let code = code.ok_or_else(|| BackendError::new("shader module source was never set"))?;
        match code.first() {
            None => return Err(BackendError::new("shader module source is empty")),
            Some(&SPIRV_MAGIC) => {}
            Some(other) => {
                return Err(BackendError::new(format!(
                    "shader module source is not SPIR-V (magic {:#010x})",
                    other
                )))
            }
        }
        Ok(self.alloc(NullObject::ShaderModule))
    }

    // ── Swap chain ──────────────────────────────────────────

    fn swap_chain_builder_set_implementation(&mut self, builder: &NullHandle, implementation: u64) {
        match self.objects.get_mut(builder) {
            Some(NullObject::SwapChainBuilder { implementation: slot }) => *slot = Some(implementation),
            _ => self.not_a(builder, "SwapChainBuilder", "SetImplementation"),
        }
    }

    fn swap_chain_builder_get_result(&mut self, builder: NullHandle) -> Result<NullHandle, BackendError> {
        let NullObject::SwapChainBuilder { implementation } = self.take_builder(builder, "SwapChainBuilder")?
        else {
            return Err(BackendError::new("swap chain builder vanished"));
        };
        match implementation {
            Some(0) => Err(BackendError::new("swap chain implementation is null")),
            Some(_) => Ok(self.alloc(NullObject::SwapChain(SwapChainState::default()))),
            None => Err(BackendError::new("swap chain implementation was never set")),
        }
    }

    fn swap_chain_configure(
        &mut self,
        swap_chain: &NullHandle,
        format: TextureFormat,
        usage: TextureUsage,
        width: u32,
        height: u32,
    ) {
        let message = match self.swap_chain(swap_chain) {
            Some(_) if width == 0 || height == 0 => {
                Some(format!("swap chain {} configured with empty size {}x{}", swap_chain, width, height))
            }
            Some(state) => {
                state.config = Some((format, usage, width, height));
                None
            }
            None => return self.not_a(swap_chain, "SwapChain", "Configure"),
        };
        if let Some(message) = message {
            self.report(message);
        }
    }

    fn swap_chain_get_next_texture(&mut self, swap_chain: &NullHandle) -> Result<(NullHandle, u32), BackendError> {
        let Some(state) = self.swap_chain(swap_chain) else {
            return Err(BackendError::new(format!("{} is not a live swap chain", swap_chain)));
        };
        let (format, usage, _, _) = state
            .config
            .ok_or_else(|| BackendError::new(format!("swap chain {} was never configured", swap_chain)))?;
        let index = state.next_index;
        state.next_index = (state.next_index + 1) % BACKBUFFER_COUNT;

        let texture = self.alloc(NullObject::Texture(Texture {
            format,
            allowed_usage: usage | TextureUsage::PRESENT,
            frozen: Some(usage),
        }));
        if let Some(state) = self.swap_chain(swap_chain) {
            state.acquired = Some(texture);
        }
        Ok((texture, index))
    }

    fn swap_chain_present(&mut self, swap_chain: &NullHandle, texture: &NullHandle) {
        let message = match self.swap_chain(swap_chain) {
            Some(state) if state.acquired == Some(*texture) => {
                state.acquired = None;
                None
            }
            Some(_) => Some(format!(
                "texture {} is not the image swap chain {} handed out last",
                texture, swap_chain
            )),
            None => return self.not_a(swap_chain, "SwapChain", "Present"),
        };
        match message {
            Some(message) => self.report(message),
            None => debug!("null backend: presented {} on {}", texture, swap_chain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture_builder(backend: &mut NullBackend, levels: u32) -> NullHandle {
        let device = backend.device();
        let builder = backend.device_create_texture_builder(&device);
        backend.texture_builder_set_extent(&builder, 640, 480, 1);
        backend.texture_builder_set_format(&builder, TextureFormat::D32FloatS8Uint);
        backend.texture_builder_set_mip_levels(&builder, levels);
        builder
    }

    #[test]
    fn test_texture_mip_levels_validated() {
        let mut backend = NullBackend::new();
        let builder = texture_builder(&mut backend, 0);
        let err = backend.texture_builder_get_result(builder).unwrap_err();
        assert!(err.message.contains("mip levels"), "{}", err);
        // The builder is consumed either way.
        assert_eq!(backend.live_objects(), 0);

        let builder = texture_builder(&mut backend, 1);
        let texture = backend.texture_builder_get_result(builder).unwrap();
        assert_eq!(backend.kind_of(texture), Some("Texture"));
    }

    #[test]
    fn test_release_twice_is_counted() {
        let mut backend = NullBackend::new();
        let device = backend.device();
        let builder = backend.device_create_swap_chain_builder(&device);
        backend.release(builder);
        backend.release(builder);
        backend.release(device);
        assert_eq!(backend.stale_releases(), 1);
    }

    #[test]
    fn test_shader_module_requires_spirv() {
        let mut backend = NullBackend::new();
        let device = backend.device();
        let builder = backend.device_create_shader_module_builder(&device);
        backend.shader_module_builder_set_source(&builder, &[0xdead_beef, 1]);
        assert!(backend.shader_module_builder_get_result(builder).is_err());

        let builder = backend.device_create_shader_module_builder(&device);
        backend.shader_module_builder_set_source(&builder, &[SPIRV_MAGIC, 0x0001_0000]);
        assert!(backend.shader_module_builder_get_result(builder).is_ok());
    }
}
