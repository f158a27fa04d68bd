//! The call surface the replayer drives.
//!
//! A backend is a procedure table: one method per (object type, operation)
//! pair on the wire. The replayer is written once against this trait and
//! never sees concrete backend types; objects are opaque `Self::Object`
//! values it stores in its object table.
//!
//! Error reporting follows the device model: `*_get_result` and
//! `swap_chain_get_next_texture` return `Err` when validation fails, and
//! every other failure goes through the installed error callback.

use std::fmt;

use gpuwire_protocol::{TextureDimension, TextureFormat, TextureUsage};

/// Device-wide error callback. Receives a human-readable message.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// A backend rejected an object it was asked to create.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub trait Backend {
    type Object: Clone + fmt::Debug;

    /// The device every session on this backend is bound to.
    fn device(&self) -> Self::Object;

    fn set_error_callback(&mut self, callback: ErrorCallback);

    /// Drop the backend's reference to an object.
    fn release(&mut self, object: Self::Object);

    // ── Device ──────────────────────────────────────────────
    fn device_create_render_pass_builder(&mut self, device: &Self::Object) -> Self::Object;
    fn device_create_texture_builder(&mut self, device: &Self::Object) -> Self::Object;
    fn device_create_framebuffer_builder(&mut self, device: &Self::Object) -> Self::Object;
    fn device_create_shader_module_builder(&mut self, device: &Self::Object) -> Self::Object;
    fn device_create_swap_chain_builder(&mut self, device: &Self::Object) -> Self::Object;

    // ── Render pass builder ─────────────────────────────────
    fn render_pass_builder_set_attachment_count(&mut self, builder: &Self::Object, count: u32);
    fn render_pass_builder_attachment_set_format(
        &mut self,
        builder: &Self::Object,
        attachment: u32,
        format: TextureFormat,
    );
    fn render_pass_builder_set_subpass_count(&mut self, builder: &Self::Object, count: u32);
    fn render_pass_builder_subpass_set_color_attachment(
        &mut self,
        builder: &Self::Object,
        subpass: u32,
        output_index: u32,
        attachment: u32,
    );
    fn render_pass_builder_subpass_set_depth_stencil_attachment(
        &mut self,
        builder: &Self::Object,
        subpass: u32,
        attachment: u32,
    );
    fn render_pass_builder_get_result(
        &mut self,
        builder: Self::Object,
    ) -> Result<Self::Object, BackendError>;

    // ── Texture builder ─────────────────────────────────────
    fn texture_builder_set_dimension(&mut self, builder: &Self::Object, dimension: TextureDimension);
    fn texture_builder_set_extent(&mut self, builder: &Self::Object, width: u32, height: u32, depth: u32);
    fn texture_builder_set_format(&mut self, builder: &Self::Object, format: TextureFormat);
    fn texture_builder_set_mip_levels(&mut self, builder: &Self::Object, levels: u32);
    fn texture_builder_set_allowed_usage(&mut self, builder: &Self::Object, usage: TextureUsage);
    fn texture_builder_get_result(&mut self, builder: Self::Object) -> Result<Self::Object, BackendError>;

    // ── Texture / texture view ──────────────────────────────
    fn texture_freeze_usage(&mut self, texture: &Self::Object, usage: TextureUsage);
    fn texture_create_texture_view_builder(&mut self, texture: &Self::Object) -> Self::Object;
    fn texture_view_builder_get_result(
        &mut self,
        builder: Self::Object,
    ) -> Result<Self::Object, BackendError>;

    // ── Framebuffer builder ─────────────────────────────────
    fn framebuffer_builder_set_render_pass(&mut self, builder: &Self::Object, render_pass: &Self::Object);
    fn framebuffer_builder_set_dimensions(&mut self, builder: &Self::Object, width: u32, height: u32);
    fn framebuffer_builder_set_attachment(&mut self, builder: &Self::Object, slot: u32, view: &Self::Object);
    fn framebuffer_builder_get_result(
        &mut self,
        builder: Self::Object,
    ) -> Result<Self::Object, BackendError>;

    // ── Shader module builder ───────────────────────────────
    fn shader_module_builder_set_source(&mut self, builder: &Self::Object, code: &[u32]);
    fn shader_module_builder_get_result(
        &mut self,
        builder: Self::Object,
    ) -> Result<Self::Object, BackendError>;

    // ── Swap chain ──────────────────────────────────────────
    fn swap_chain_builder_set_implementation(&mut self, builder: &Self::Object, implementation: u64);
    fn swap_chain_builder_get_result(
        &mut self,
        builder: Self::Object,
    ) -> Result<Self::Object, BackendError>;
    fn swap_chain_configure(
        &mut self,
        swap_chain: &Self::Object,
        format: TextureFormat,
        usage: TextureUsage,
        width: u32,
        height: u32,
    );
    /// Returns the next presentable texture and its backbuffer index.
    fn swap_chain_get_next_texture(
        &mut self,
        swap_chain: &Self::Object,
    ) -> Result<(Self::Object, u32), BackendError>;
    fn swap_chain_present(&mut self, swap_chain: &Self::Object, texture: &Self::Object);
}
