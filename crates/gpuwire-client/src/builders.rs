//! Builder proxies.
//!
//! Every builder is a one-way state machine: `Open` until `get_result`
//! finalizes it, or `Invalid` once a local precondition fails. Invalid
//! calls are rejected here and never reach the wire. Dropping a builder
//! that was not finalized releases it on the server.

use std::sync::Arc;

use tracing::debug;

use gpuwire_protocol::{
    Command, ObjectHandle, ObjectType, TextureDimension, TextureFormat, TextureUsage,
    MAX_ATTACHMENTS, MAX_SUBPASSES,
};

use crate::error::ClientError;
use crate::objects::{Framebuffer, RenderPass, ShaderModule, SwapChain, Texture, TextureView};
use crate::session::ClientShared;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderState {
    Open,
    Finalized,
    Invalid(String),
}

struct BuilderCore {
    handle: ObjectHandle,
    session: Arc<ClientShared>,
    state: BuilderState,
}

impl BuilderCore {
    fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            handle,
            session,
            state: BuilderState::Open,
        }
    }

    fn check(&self) -> Result<(), ClientError> {
        match &self.state {
            BuilderState::Open => Ok(()),
            BuilderState::Finalized => Err(ClientError::BuilderFinalized),
            BuilderState::Invalid(reason) => Err(ClientError::InvalidBuilder(reason.clone())),
        }
    }

    /// Move to `Invalid` and produce the error for the offending call.
    fn reject(&mut self, message: String) -> ClientError {
        debug!("{} invalidated: {}", self.handle, message);
        self.state = BuilderState::Invalid(message.clone());
        ClientError::Validation(message)
    }

    fn send(&mut self, command: Command) -> Result<(), ClientError> {
        self.check()?;
        self.session.send(command)
    }

    /// Send a setter that references another proxy of the same session.
    fn send_with(&mut self, session: &Arc<ClientShared>, argument: ObjectHandle, command: Command) -> Result<(), ClientError> {
        self.check()?;
        if !Arc::ptr_eq(&self.session, session) {
            return Err(self.reject(format!("{} belongs to a different session", argument)));
        }
        self.session.send_with(self.handle, argument, command)
    }

    fn finish(
        &mut self,
        product: ObjectType,
        make: impl FnOnce(ObjectHandle) -> Command,
    ) -> Result<ObjectHandle, ClientError> {
        self.check()?;
        let handle = self.session.finish(self.handle, product, make)?;
        self.state = BuilderState::Finalized;
        Ok(handle)
    }
}

impl Drop for BuilderCore {
    fn drop(&mut self) {
        if self.state != BuilderState::Finalized {
            self.session.destroy(self.handle);
        }
    }
}

macro_rules! builder_common {
    ($name:ident) => {
        impl $name {
            pub fn handle(&self) -> ObjectHandle {
                self.core.handle
            }

            pub fn state(&self) -> &BuilderState {
                &self.core.state
            }
        }
    };
}

// ── Render pass ─────────────────────────────────────────────

pub struct RenderPassBuilder {
    core: BuilderCore,
    attachment_count: Option<u32>,
    subpass_count: Option<u32>,
}

builder_common!(RenderPassBuilder);

impl RenderPassBuilder {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            core: BuilderCore::new(session, handle),
            attachment_count: None,
            subpass_count: None,
        }
    }

    fn check_attachment(&mut self, attachment: u32) -> Result<(), ClientError> {
        let count = self.attachment_count;
        match count {
            Some(count) if attachment < count => Ok(()),
            Some(count) => Err(self.core.reject(format!(
                "attachment {} out of range ({} attachments)",
                attachment, count
            ))),
            None => Err(self.core.reject(format!(
                "attachment {} used before the attachment count was set",
                attachment
            ))),
        }
    }

    fn check_subpass(&mut self, subpass: u32) -> Result<(), ClientError> {
        let count = self.subpass_count;
        match count {
            Some(count) if subpass < count => Ok(()),
            Some(count) => Err(self.core.reject(format!(
                "subpass {} out of range ({} subpasses)",
                subpass, count
            ))),
            None => Err(self.core.reject(format!(
                "subpass {} used before the subpass count was set",
                subpass
            ))),
        }
    }

    pub fn set_attachment_count(&mut self, count: u32) -> Result<(), ClientError> {
        self.core.check()?;
        if self.attachment_count.is_some() {
            return Err(self.core.reject("attachment count set twice".to_string()));
        }
        if count > MAX_ATTACHMENTS {
            return Err(self.core.reject(format!(
                "attachment count {} exceeds the limit of {}",
                count, MAX_ATTACHMENTS
            )));
        }
        self.core.send(Command::RenderPassBuilderSetAttachmentCount {
            builder: self.core.handle,
            count,
        })?;
        self.attachment_count = Some(count);
        Ok(())
    }

    pub fn attachment_set_format(&mut self, attachment: u32, format: TextureFormat) -> Result<(), ClientError> {
        self.core.check()?;
        self.check_attachment(attachment)?;
        self.core.send(Command::RenderPassBuilderAttachmentSetFormat {
            builder: self.core.handle,
            attachment,
            format,
        })
    }

    pub fn set_subpass_count(&mut self, count: u32) -> Result<(), ClientError> {
        self.core.check()?;
        if self.subpass_count.is_some() {
            return Err(self.core.reject("subpass count set twice".to_string()));
        }
        if count > MAX_SUBPASSES {
            return Err(self.core.reject(format!(
                "subpass count {} exceeds the limit of {}",
                count, MAX_SUBPASSES
            )));
        }
        self.core.send(Command::RenderPassBuilderSetSubpassCount {
            builder: self.core.handle,
            count,
        })?;
        self.subpass_count = Some(count);
        Ok(())
    }

    pub fn subpass_set_color_attachment(
        &mut self,
        subpass: u32,
        output_index: u32,
        attachment: u32,
    ) -> Result<(), ClientError> {
        self.core.check()?;
        self.check_subpass(subpass)?;
        self.check_attachment(attachment)?;
        self.core.send(Command::RenderPassBuilderSubpassSetColorAttachment {
            builder: self.core.handle,
            subpass,
            output_index,
            attachment,
        })
    }

    pub fn subpass_set_depth_stencil_attachment(&mut self, subpass: u32, attachment: u32) -> Result<(), ClientError> {
        self.core.check()?;
        self.check_subpass(subpass)?;
        self.check_attachment(attachment)?;
        self.core.send(Command::RenderPassBuilderSubpassSetDepthStencilAttachment {
            builder: self.core.handle,
            subpass,
            attachment,
        })
    }

    pub fn get_result(&mut self) -> Result<RenderPass, ClientError> {
        let builder = self.core.handle;
        let handle = self.core.finish(ObjectType::RenderPass, |result| {
            Command::RenderPassBuilderGetResult { builder, result }
        })?;
        Ok(RenderPass::new(
            Arc::clone(&self.core.session),
            handle,
            self.attachment_count.unwrap_or(0),
        ))
    }
}

// ── Texture ─────────────────────────────────────────────────

pub struct TextureBuilder {
    core: BuilderCore,
}

builder_common!(TextureBuilder);

impl TextureBuilder {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            core: BuilderCore::new(session, handle),
        }
    }

    pub fn set_dimension(&mut self, dimension: TextureDimension) -> Result<(), ClientError> {
        self.core.send(Command::TextureBuilderSetDimension {
            builder: self.core.handle,
            dimension,
        })
    }

    pub fn set_extent(&mut self, width: u32, height: u32, depth: u32) -> Result<(), ClientError> {
        self.core.send(Command::TextureBuilderSetExtent {
            builder: self.core.handle,
            width,
            height,
            depth,
        })
    }

    pub fn set_format(&mut self, format: TextureFormat) -> Result<(), ClientError> {
        self.core.send(Command::TextureBuilderSetFormat {
            builder: self.core.handle,
            format,
        })
    }

    pub fn set_mip_levels(&mut self, levels: u32) -> Result<(), ClientError> {
        self.core.send(Command::TextureBuilderSetMipLevels {
            builder: self.core.handle,
            levels,
        })
    }

    pub fn set_allowed_usage(&mut self, usage: TextureUsage) -> Result<(), ClientError> {
        self.core.send(Command::TextureBuilderSetAllowedUsage {
            builder: self.core.handle,
            usage: usage.bits(),
        })
    }

    pub fn get_result(&mut self) -> Result<Texture, ClientError> {
        let builder = self.core.handle;
        let handle = self.core.finish(ObjectType::Texture, |result| {
            Command::TextureBuilderGetResult { builder, result }
        })?;
        Ok(Texture::new(Arc::clone(&self.core.session), handle))
    }
}

// ── Texture view ────────────────────────────────────────────

pub struct TextureViewBuilder {
    core: BuilderCore,
    texture: Texture,
}

builder_common!(TextureViewBuilder);

impl TextureViewBuilder {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle, texture: Texture) -> Self {
        Self {
            core: BuilderCore::new(session, handle),
            texture,
        }
    }

    pub fn get_result(&mut self) -> Result<TextureView, ClientError> {
        let builder = self.core.handle;
        let handle = self.core.finish(ObjectType::TextureView, |result| {
            Command::TextureViewBuilderGetResult { builder, result }
        })?;
        Ok(TextureView::new(
            Arc::clone(&self.core.session),
            handle,
            self.texture.clone(),
        ))
    }
}

// ── Framebuffer ─────────────────────────────────────────────

pub struct FramebufferBuilder {
    core: BuilderCore,
    /// Attachment count of the render pass set so far.
    slots: Option<u32>,
}

builder_common!(FramebufferBuilder);

impl FramebufferBuilder {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            core: BuilderCore::new(session, handle),
            slots: None,
        }
    }

    pub fn set_render_pass(&mut self, render_pass: &RenderPass) -> Result<(), ClientError> {
        let command = Command::FramebufferBuilderSetRenderPass {
            builder: self.core.handle,
            render_pass: render_pass.handle(),
        };
        self.core.send_with(&render_pass.inner.session, render_pass.handle(), command)?;
        self.slots = Some(render_pass.attachment_count());
        Ok(())
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) -> Result<(), ClientError> {
        self.core.send(Command::FramebufferBuilderSetDimensions {
            builder: self.core.handle,
            width,
            height,
        })
    }

    pub fn set_attachment(&mut self, slot: u32, view: &TextureView) -> Result<(), ClientError> {
        self.core.check()?;
        let slots = self.slots;
        match slots {
            Some(count) if slot < count => {}
            Some(count) => {
                return Err(self.core.reject(format!(
                    "framebuffer slot {} out of range ({} attachments)",
                    slot, count
                )))
            }
            None => {
                return Err(self.core.reject(format!(
                    "framebuffer slot {} set before the render pass",
                    slot
                )))
            }
        }
        let command = Command::FramebufferBuilderSetAttachment {
            builder: self.core.handle,
            slot,
            view: view.handle(),
        };
        self.core.send_with(&view.inner.session, view.handle(), command)
    }

    pub fn get_result(&mut self) -> Result<Framebuffer, ClientError> {
        let builder = self.core.handle;
        let handle = self.core.finish(ObjectType::Framebuffer, |result| {
            Command::FramebufferBuilderGetResult { builder, result }
        })?;
        Ok(Framebuffer::new(Arc::clone(&self.core.session), handle))
    }
}

// ── Shader module ───────────────────────────────────────────

pub struct ShaderModuleBuilder {
    core: BuilderCore,
}

builder_common!(ShaderModuleBuilder);

impl ShaderModuleBuilder {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            core: BuilderCore::new(session, handle),
        }
    }

    /// SPIR-V words of the module.
    pub fn set_source(&mut self, code: &[u32]) -> Result<(), ClientError> {
        self.core.check()?;
        if code.is_empty() {
            return Err(self.core.reject("shader source is empty".to_string()));
        }
        self.core.send(Command::ShaderModuleBuilderSetSource {
            builder: self.core.handle,
            code: code.to_vec(),
        })
    }

    pub fn get_result(&mut self) -> Result<ShaderModule, ClientError> {
        let builder = self.core.handle;
        let handle = self.core.finish(ObjectType::ShaderModule, |result| {
            Command::ShaderModuleBuilderGetResult { builder, result }
        })?;
        Ok(ShaderModule::new(Arc::clone(&self.core.session), handle))
    }
}

// ── Swap chain ──────────────────────────────────────────────

pub struct SwapChainBuilder {
    core: BuilderCore,
}

builder_common!(SwapChainBuilder);

impl SwapChainBuilder {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            core: BuilderCore::new(session, handle),
        }
    }

    /// Opaque native swap chain implementation the server presents through.
    pub fn set_implementation(&mut self, implementation: u64) -> Result<(), ClientError> {
        self.core.send(Command::SwapChainBuilderSetImplementation {
            builder: self.core.handle,
            implementation,
        })
    }

    pub fn get_result(&mut self) -> Result<SwapChain, ClientError> {
        let builder = self.core.handle;
        let handle = self.core.finish(ObjectType::SwapChain, |result| {
            Command::SwapChainBuilderGetResult { builder, result }
        })?;
        Ok(SwapChain::new(Arc::clone(&self.core.session), handle))
    }
}
