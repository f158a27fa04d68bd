//! Backend wrapper that logs every call before forwarding it.
//!
//! Two runs that drive the same inner backend through the same sequence
//! of calls produce identical logs, so a replayed session can be compared
//! call-for-call against direct use of the backend.

use std::fmt::Debug;

use gpuwire_protocol::{TextureDimension, TextureFormat, TextureUsage};

use crate::backend::{Backend, BackendError, ErrorCallback};

pub struct RecordingBackend<B: Backend> {
    inner: B,
    calls: Vec<String>,
}

impl<B: Backend> RecordingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            calls: Vec::new(),
        }
    }

    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    fn record(&mut self, call: String) {
        tracing::trace!("backend call: {}", call);
        self.calls.push(call);
    }

    fn record_result<T: Debug>(&mut self, call: String, result: &Result<T, BackendError>) {
        match result {
            Ok(value) => self.record(format!("{} -> {:?}", call, value)),
            Err(e) => self.record(format!("{} -> error: {}", call, e)),
        }
    }
}

impl<B: Backend> Backend for RecordingBackend<B> {
    type Object = B::Object;

    fn device(&self) -> Self::Object {
        self.inner.device()
    }

    fn set_error_callback(&mut self, callback: ErrorCallback) {
        self.inner.set_error_callback(callback);
    }

    fn release(&mut self, object: Self::Object) {
        self.record(format!("release({:?})", object));
        self.inner.release(object);
    }

    fn device_create_render_pass_builder(&mut self, device: &Self::Object) -> Self::Object {
        let created = self.inner.device_create_render_pass_builder(device);
        self.record(format!("device_create_render_pass_builder({:?}) -> {:?}", device, created));
        created
    }

    fn device_create_texture_builder(&mut self, device: &Self::Object) -> Self::Object {
        let created = self.inner.device_create_texture_builder(device);
        self.record(format!("device_create_texture_builder({:?}) -> {:?}", device, created));
        created
    }

    fn device_create_framebuffer_builder(&mut self, device: &Self::Object) -> Self::Object {
        let created = self.inner.device_create_framebuffer_builder(device);
        self.record(format!("device_create_framebuffer_builder({:?}) -> {:?}", device, created));
        created
    }

    fn device_create_shader_module_builder(&mut self, device: &Self::Object) -> Self::Object {
        let created = self.inner.device_create_shader_module_builder(device);
        self.record(format!("device_create_shader_module_builder({:?}) -> {:?}", device, created));
        created
    }

    fn device_create_swap_chain_builder(&mut self, device: &Self::Object) -> Self::Object {
        let created = self.inner.device_create_swap_chain_builder(device);
        self.record(format!("device_create_swap_chain_builder({:?}) -> {:?}", device, created));
        created
    }

    fn render_pass_builder_set_attachment_count(&mut self, builder: &Self::Object, count: u32) {
        self.record(format!("render_pass_builder_set_attachment_count({:?}, {})", builder, count));
        self.inner.render_pass_builder_set_attachment_count(builder, count);
    }

    fn render_pass_builder_attachment_set_format(
        &mut self,
        builder: &Self::Object,
        attachment: u32,
        format: TextureFormat,
    ) {
        self.record(format!(
            "render_pass_builder_attachment_set_format({:?}, {}, {:?})",
            builder, attachment, format
        ));
        self.inner.render_pass_builder_attachment_set_format(builder, attachment, format);
    }

    fn render_pass_builder_set_subpass_count(&mut self, builder: &Self::Object, count: u32) {
        self.record(format!("render_pass_builder_set_subpass_count({:?}, {})", builder, count));
        self.inner.render_pass_builder_set_subpass_count(builder, count);
    }

    fn render_pass_builder_subpass_set_color_attachment(
        &mut self,
        builder: &Self::Object,
        subpass: u32,
        output_index: u32,
        attachment: u32,
    ) {
        self.record(format!(
            "render_pass_builder_subpass_set_color_attachment({:?}, {}, {}, {})",
            builder, subpass, output_index, attachment
        ));
        self.inner
            .render_pass_builder_subpass_set_color_attachment(builder, subpass, output_index, attachment);
    }

    fn render_pass_builder_subpass_set_depth_stencil_attachment(
        &mut self,
        builder: &Self::Object,
        subpass: u32,
        attachment: u32,
    ) {
        self.record(format!(
            "render_pass_builder_subpass_set_depth_stencil_attachment({:?}, {}, {})",
            builder, subpass, attachment
        ));
        self.inner
            .render_pass_builder_subpass_set_depth_stencil_attachment(builder, subpass, attachment);
    }

    fn render_pass_builder_get_result(&mut self, builder: Self::Object) -> Result<Self::Object, BackendError> {
        let call = format!("render_pass_builder_get_result({:?})", builder);
        let result = self.inner.render_pass_builder_get_result(builder);
        self.record_result(call, &result);
        result
    }

    fn texture_builder_set_dimension(&mut self, builder: &Self::Object, dimension: TextureDimension) {
        self.record(format!("texture_builder_set_dimension({:?}, {:?})", builder, dimension));
        self.inner.texture_builder_set_dimension(builder, dimension);
    }

    fn texture_builder_set_extent(&mut self, builder: &Self::Object, width: u32, height: u32, depth: u32) {
        self.record(format!(
            "texture_builder_set_extent({:?}, {}, {}, {})",
            builder, width, height, depth
        ));
        self.inner.texture_builder_set_extent(builder, width, height, depth);
    }

    fn texture_builder_set_format(&mut self, builder: &Self::Object, format: TextureFormat) {
        self.record(format!("texture_builder_set_format({:?}, {:?})", builder, format));
        self.inner.texture_builder_set_format(builder, format);
    }

    fn texture_builder_set_mip_levels(&mut self, builder: &Self::Object, levels: u32) {
        self.record(format!("texture_builder_set_mip_levels({:?}, {})", builder, levels));
        self.inner.texture_builder_set_mip_levels(builder, levels);
    }

    fn texture_builder_set_allowed_usage(&mut self, builder: &Self::Object, usage: TextureUsage) {
        self.record(format!("texture_builder_set_allowed_usage({:?}, {:?})", builder, usage));
        self.inner.texture_builder_set_allowed_usage(builder, usage);
    }

    fn texture_builder_get_result(&mut self, builder: Self::Object) -> Result<Self::Object, BackendError> {
        let call = format!("texture_builder_get_result({:?})", builder);
        let result = self.inner.texture_builder_get_result(builder);
        self.record_result(call, &result);
        result
    }

    fn texture_freeze_usage(&mut self, texture: &Self::Object, usage: TextureUsage) {
        self.record(format!("texture_freeze_usage({:?}, {:?})", texture, usage));
        self.inner.texture_freeze_usage(texture, usage);
    }

    fn texture_create_texture_view_builder(&mut self, texture: &Self::Object) -> Self::Object {
        let created = self.inner.texture_create_texture_view_builder(texture);
        self.record(format!("texture_create_texture_view_builder({:?}) -> {:?}", texture, created));
        created
    }

    fn texture_view_builder_get_result(&mut self, builder: Self::Object) -> Result<Self::Object, BackendError> {
        let call = format!("texture_view_builder_get_result({:?})", builder);
        let result = self.inner.texture_view_builder_get_result(builder);
        self.record_result(call, &result);
        result
    }

    fn framebuffer_builder_set_render_pass(&mut self, builder: &Self::Object, render_pass: &Self::Object) {
        self.record(format!("framebuffer_builder_set_render_pass({:?}, {:?})", builder, render_pass));
        self.inner.framebuffer_builder_set_render_pass(builder, render_pass);
    }

    fn framebuffer_builder_set_dimensions(&mut self, builder: &Self::Object, width: u32, height: u32) {
        self.record(format!(
            "framebuffer_builder_set_dimensions({:?}, {}, {})",
            builder, width, height
        ));
        self.inner.framebuffer_builder_set_dimensions(builder, width, height);
    }

    fn framebuffer_builder_set_attachment(&mut self, builder: &Self::Object, slot: u32, view: &Self::Object) {
        self.record(format!(
            "framebuffer_builder_set_attachment({:?}, {}, {:?})",
            builder, slot, view
        ));
        self.inner.framebuffer_builder_set_attachment(builder, slot, view);
    }

    fn framebuffer_builder_get_result(&mut self, builder: Self::Object) -> Result<Self::Object, BackendError> {
        let call = format!("framebuffer_builder_get_result({:?})", builder);
        let result = self.inner.framebuffer_builder_get_result(builder);
        self.record_result(call, &result);
        result
    }

    fn shader_module_builder_set_source(&mut self, builder: &Self::Object, code: &[u32]) {
        self.record(format!(
            "shader_module_builder_set_source({:?}, {} words)",
            builder,
            code.len()
        ));
        self.inner.shader_module_builder_set_source(builder, code);
    }

    fn shader_module_builder_get_result(&mut self, builder: Self::Object) -> Result<Self::Object, BackendError> {
        let call = format!("shader_module_builder_get_result({:?})", builder);
        let result = self.inner.shader_module_builder_get_result(builder);
        self.record_result(call, &result);
        result
    }

    fn swap_chain_builder_set_implementation(&mut self, builder: &Self::Object, implementation: u64) {
        self.record(format!(
            "swap_chain_builder_set_implementation({:?}, {:#x})",
            builder, implementation
        ));
        self.inner.swap_chain_builder_set_implementation(builder, implementation);
    }

    fn swap_chain_builder_get_result(&mut self, builder: Self::Object) -> Result<Self::Object, BackendError> {
        let call = format!("swap_chain_builder_get_result({:?})", builder);
        let result = self.inner.swap_chain_builder_get_result(builder);
        self.record_result(call, &result);
        result
    }

    fn swap_chain_configure(
        &mut self,
        swap_chain: &Self::Object,
        format: TextureFormat,
        usage: TextureUsage,
        width: u32,
        height: u32,
    ) {
        self.record(format!(
            "swap_chain_configure({:?}, {:?}, {:?}, {}, {})",
            swap_chain, format, usage, width, height
        ));
        self.inner.swap_chain_configure(swap_chain, format, usage, width, height);
    }

    fn swap_chain_get_next_texture(
        &mut self,
        swap_chain: &Self::Object,
    ) -> Result<(Self::Object, u32), BackendError> {
        let call = format!("swap_chain_get_next_texture({:?})", swap_chain);
        let result = self.inner.swap_chain_get_next_texture(swap_chain);
        self.record_result(call, &result);
        result
    }

    fn swap_chain_present(&mut self, swap_chain: &Self::Object, texture: &Self::Object) {
        self.record(format!("swap_chain_present({:?}, {:?})", swap_chain, texture));
        self.inner.swap_chain_present(swap_chain, texture);
    }
}
