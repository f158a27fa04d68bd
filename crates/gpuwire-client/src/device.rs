use std::sync::Arc;

use gpuwire_core::config::ChannelConfig;
use gpuwire_protocol::{Command, ObjectHandle, ObjectType};
use gpuwire_transport::{ChannelSink, ChannelSource};

use crate::builders::{
    FramebufferBuilder, RenderPassBuilder, ShaderModuleBuilder, SwapChainBuilder, TextureBuilder,
};
use crate::encoder::CommandEncoder;
use crate::error::ClientError;
use crate::session::{ClientMetrics, ClientShared, SessionStatus};

/// Client proxy for the remote device, and the entry point of a session.
///
/// Calls are encoded into the outbound channel and only reach the server
/// on [`Device::flush`]. Errors the server reports come back through
/// [`Device::handle_events`], which runs the registered error callback.
#[derive(Clone)]
pub struct Device {
    session: Arc<ClientShared>,
}

impl Device {
    /// Bootstrap the client end of a session over two channels.
    pub fn connect<O, I>(outbound: O, inbound: I, config: &ChannelConfig) -> Self
    where
        O: ChannelSink + Send + 'static,
        I: ChannelSource + Send + 'static,
    {
        let encoder = CommandEncoder::new(Box::new(outbound), config.compression_threshold);
        Self {
            session: Arc::new(ClientShared::new(encoder, Box::new(inbound))),
        }
    }

    pub fn handle(&self) -> ObjectHandle {
        ObjectHandle::device()
    }

    pub fn create_render_pass_builder(&self) -> Result<RenderPassBuilder, ClientError> {
        let handle = self.create(ObjectType::RenderPassBuilder, |device, result| {
            Command::DeviceCreateRenderPassBuilder { device, result }
        })?;
        Ok(RenderPassBuilder::new(Arc::clone(&self.session), handle))
    }

    pub fn create_texture_builder(&self) -> Result<TextureBuilder, ClientError> {
        let handle = self.create(ObjectType::TextureBuilder, |device, result| {
            Command::DeviceCreateTextureBuilder { device, result }
        })?;
        Ok(TextureBuilder::new(Arc::clone(&self.session), handle))
    }

    pub fn create_framebuffer_builder(&self) -> Result<FramebufferBuilder, ClientError> {
        let handle = self.create(ObjectType::FramebufferBuilder, |device, result| {
            Command::DeviceCreateFramebufferBuilder { device, result }
        })?;
        Ok(FramebufferBuilder::new(Arc::clone(&self.session), handle))
    }

    pub fn create_shader_module_builder(&self) -> Result<ShaderModuleBuilder, ClientError> {
        let handle = self.create(ObjectType::ShaderModuleBuilder, |device, result| {
            Command::DeviceCreateShaderModuleBuilder { device, result }
        })?;
        Ok(ShaderModuleBuilder::new(Arc::clone(&self.session), handle))
    }

    pub fn create_swap_chain_builder(&self) -> Result<SwapChainBuilder, ClientError> {
        let handle = self.create(ObjectType::SwapChainBuilder, |device, result| {
            Command::DeviceCreateSwapChainBuilder { device, result }
        })?;
        Ok(SwapChainBuilder::new(Arc::clone(&self.session), handle))
    }

    fn create(
        &self,
        ty: ObjectType,
        make: impl FnOnce(ObjectHandle, ObjectHandle) -> Command,
    ) -> Result<ObjectHandle, ClientError> {
        let device = self.handle();
        self.session.create(ty, &[], |result| make(device, result))
    }

    /// Register the device-wide error callback, replacing any previous one.
    pub fn set_error_callback(&self, callback: impl FnMut(&str) + Send + 'static) {
        self.session.set_callback(Box::new(callback));
    }

    /// Hand every call encoded so far to the server.
    pub fn flush(&self) -> Result<(), ClientError> {
        self.session.flush()
    }

    /// Process the server's events. Returns how many were handled.
    pub fn handle_events(&self) -> Result<usize, ClientError> {
        self.session.handle_events()
    }

    /// Bytes encoded but not yet flushed.
    pub fn buffered(&self) -> usize {
        self.session.buffered()
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn is_terminated(&self) -> bool {
        self.status() != SessionStatus::Active
    }

    pub fn metrics(&self) -> ClientMetrics {
        self.session.metrics()
    }

    /// End the session. Every proxy becomes inert, later calls fail with
    /// `SessionClosed`, and the error callback is dropped.
    pub fn disconnect(&self) {
        self.session.disconnect();
    }
}
