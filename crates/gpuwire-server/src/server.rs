use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use gpuwire_core::config::ChannelConfig;
use gpuwire_core::ObjectTable;
use gpuwire_protocol::wire::{self, RecordReader};
use gpuwire_protocol::{
    Command, ObjectHandle, ObjectType, ProtocolViolation, ServerEvent, TextureUsage,
};
use gpuwire_transport::{ChannelSink, ChannelSource};

use crate::backend::{Backend, BackendError};
use crate::error::ServerError;
use crate::session::{MetricsSnapshot, SessionMetrics, SessionState};

/// What the server holds for a client identity.
#[derive(Debug, Clone)]
enum Replayed<O> {
    Live(O),
    /// Creation failed or an input was invalid. The client was told once;
    /// everything built from a poisoned object is poisoned too.
    Poisoned,
}

/// Server side of one session: decodes client records in order and
/// replays them against a backend, sending errors and value results back.
///
/// Nothing happens until [`WireServer::handle_commands`] is called; events
/// become visible to the client only after [`WireServer::flush`].
pub struct WireServer<B: Backend> {
    backend: B,
    objects: ObjectTable<Replayed<B::Object>>,
    inbound: Box<dyn ChannelSource + Send>,
    outbound: Box<dyn ChannelSink + Send>,
    compression_threshold: usize,
    backend_errors: Arc<Mutex<Vec<String>>>,
    state: SessionState,
    metrics: SessionMetrics,
    torn_down: bool,
}

impl<B: Backend> WireServer<B> {
    /// Bootstrap a session: install the backend error callback and register
    /// the backend's device under the well-known device identity.
    pub fn new<I, O>(mut backend: B, inbound: I, outbound: O, config: &ChannelConfig) -> Self
    where
        I: ChannelSource + Send + 'static,
        O: ChannelSink + Send + 'static,
    {
        let backend_errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&backend_errors);
        backend.set_error_callback(Box::new(move |message: &str| {
            sink.lock().push(message.to_string());
        }));

        let objects = ObjectTable::new();
        // A fresh table cannot already hold the device.
        let _ = objects.insert(ObjectHandle::device(), Replayed::Live(backend.device()));
        info!(
            compression_threshold = config.compression_threshold,
            "server session started"
        );

        Self {
            backend,
            objects,
            inbound: Box::new(inbound),
            outbound: Box::new(outbound),
            compression_threshold: config.compression_threshold,
            backend_errors,
            state: SessionState::Active,
            metrics: SessionMetrics::default(),
            torn_down: false,
        }
    }

    /// Drain every flushed batch from the client and replay its records.
    /// Returns the number of records replayed.
    ///
    /// A protocol violation terminates the session: decoding stops at the
    /// offending record, `SessionTerminated` is flushed to the client and
    /// every later call fails with [`ServerError::SessionClosed`].
    pub fn handle_commands(&mut self) -> Result<usize, ServerError> {
        self.ensure_active()?;

        let mut replayed = 0;
        loop {
            let batch = match self.inbound.poll_incoming() {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => return Err(self.terminate(e.into())),
            };
            SessionMetrics::bump(&self.metrics.batches_received, 1);
            SessionMetrics::bump(&self.metrics.bytes_received, batch.len() as u64);

            for record in RecordReader::new(&batch) {
                let command = match record.and_then(|r| wire::decode_command(&r)) {
                    Ok(command) => command,
                    Err(e) => return Err(self.terminate(ProtocolViolation::from(e).into())),
                };
                debug!("replay {:?}", command.opcode());
                if let Err(e) = self.replay(command) {
                    return Err(self.terminate(e));
                }
                SessionMetrics::bump(&self.metrics.records_replayed, 1);
                replayed += 1;
            }
        }
        Ok(replayed)
    }

    /// Make queued events visible to the client.
    pub fn flush(&mut self) -> Result<(), ServerError> {
        self.outbound.flush().map_err(ServerError::from)
    }

    /// Release every backend object the session still owns. Idempotent;
    /// also runs on drop.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let mut released = 0u64;
        for (handle, object) in self.objects.drain() {
            if let Replayed::Live(object) = object {
                if handle.ty != ObjectType::Device {
                    self.backend.release(object);
                    released += 1;
                }
            }
        }
        SessionMetrics::bump(&self.metrics.objects_released, released);
        if self.state.is_active() {
            self.state = SessionState::Terminated {
                reason: "session torn down".to_string(),
            };
        }
        let snapshot = self.metrics.snapshot();
        info!(
            records = snapshot.records_replayed,
            bytes = snapshot.bytes_received,
            backend_errors = snapshot.backend_errors,
            events = snapshot.events_sent,
            released,
            "server session torn down"
        );
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_terminated(&self) -> bool {
        !self.state.is_active()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Live or poisoned entries of one type.
    pub fn object_count(&self, ty: ObjectType) -> usize {
        self.objects.count(ty)
    }

    pub fn contains(&self, handle: ObjectHandle) -> bool {
        self.objects.contains(handle)
    }

    pub fn is_poisoned(&self, handle: ObjectHandle) -> bool {
        matches!(self.objects.resolve(handle, handle.ty), Ok(Replayed::Poisoned))
    }

    /// The backend object behind a live identity.
    pub fn backend_object(&self, handle: ObjectHandle) -> Option<B::Object> {
        match self.objects.resolve(handle, handle.ty) {
            Ok(Replayed::Live(object)) => Some(object),
            _ => None,
        }
    }

    fn ensure_active(&self) -> Result<(), ServerError> {
        match &self.state {
            SessionState::Active => Ok(()),
            SessionState::Terminated { reason } => Err(ServerError::SessionClosed(reason.clone())),
        }
    }

    fn terminate(&mut self, error: ServerError) -> ServerError {
        let reason = error.to_string();
        warn!("terminating session: {}", reason);
        self.state = SessionState::Terminated {
            reason: reason.clone(),
        };
        // Best effort: the client may be gone or its channel full.
        let notice = ServerEvent::SessionTerminated { reason };
        if self.emit(notice).is_ok() {
            let _ = self.outbound.flush();
        }
        error
    }

    // ── Event path ──────────────────────────────────────────

    fn emit(&mut self, event: ServerEvent) -> Result<(), ServerError> {
        let record = wire::encode_event(&event, self.compression_threshold)
            .map_err(ProtocolViolation::from)?;
        self.outbound.write(&record)?;
        SessionMetrics::bump(&self.metrics.events_sent, 1);
        Ok(())
    }

    fn device_error(&mut self, message: String) -> Result<(), ServerError> {
        warn!("device error: {}", message);
        SessionMetrics::bump(&self.metrics.backend_errors, 1);
        self.emit(ServerEvent::DeviceError {
            device: ObjectHandle::device(),
            message,
        })
    }

    fn object_error(&mut self, object: ObjectHandle, message: String) -> Result<(), ServerError> {
        warn!("{} is invalid: {}", object, message);
        SessionMetrics::bump(&self.metrics.backend_errors, 1);
        self.emit(ServerEvent::ObjectError {
            device: ObjectHandle::device(),
            object,
            message,
        })
    }

    /// Forward whatever the backend's error callback collected.
    fn drain_backend_errors(&mut self) -> Result<(), ServerError> {
        let pending = std::mem::take(&mut *self.backend_errors.lock());
        for message in pending {
            self.device_error(message)?;
        }
        Ok(())
    }

    // ── Object table helpers ────────────────────────────────

    fn resolve(
        &self,
        handle: ObjectHandle,
        expected: ObjectType,
    ) -> Result<Replayed<B::Object>, ProtocolViolation> {
        Ok(self.objects.resolve(handle, expected)?)
    }

    /// A result identity must be of the produced type, non-null and unused.
    fn check_fresh(&self, result: ObjectHandle, expected: ObjectType) -> Result<(), ProtocolViolation> {
        if result.ty != expected {
            return Err(ProtocolViolation::TypeMismatch {
                handle: result,
                expected,
            });
        }
        if result.is_null() {
            return Err(ProtocolViolation::InvalidHandle(result));
        }
        if self.objects.contains(result) {
            return Err(ProtocolViolation::DuplicateIdentity(result));
        }
        Ok(())
    }

    fn insert(&self, handle: ObjectHandle, object: Replayed<B::Object>) -> Result<(), ProtocolViolation> {
        Ok(self.objects.insert(handle, object)?)
    }

    // ── Replay ──────────────────────────────────────────────

    fn replay(&mut self, command: Command) -> Result<(), ServerError> {
        match command {
            Command::DeviceCreateRenderPassBuilder { device, result } => {
                self.create(device, ObjectType::Device, result, ObjectType::RenderPassBuilder, |b, d| {
                    b.device_create_render_pass_builder(d)
                })?
            }
            Command::DeviceCreateTextureBuilder { device, result } => {
                self.create(device, ObjectType::Device, result, ObjectType::TextureBuilder, |b, d| {
                    b.device_create_texture_builder(d)
                })?
            }
            Command::DeviceCreateFramebufferBuilder { device, result } => {
                self.create(device, ObjectType::Device, result, ObjectType::FramebufferBuilder, |b, d| {
                    b.device_create_framebuffer_builder(d)
                })?
            }
            Command::DeviceCreateShaderModuleBuilder { device, result } => {
                self.create(device, ObjectType::Device, result, ObjectType::ShaderModuleBuilder, |b, d| {
                    b.device_create_shader_module_builder(d)
                })?
            }
            Command::DeviceCreateSwapChainBuilder { device, result } => {
                self.create(device, ObjectType::Device, result, ObjectType::SwapChainBuilder, |b, d| {
                    b.device_create_swap_chain_builder(d)
                })?
            }

            Command::RenderPassBuilderSetAttachmentCount { builder, count } => {
                self.set(builder, ObjectType::RenderPassBuilder, |b, o| {
                    b.render_pass_builder_set_attachment_count(o, count)
                })?
            }
            Command::RenderPassBuilderAttachmentSetFormat {
                builder,
                attachment,
                format,
            } => self.set(builder, ObjectType::RenderPassBuilder, |b, o| {
                b.render_pass_builder_attachment_set_format(o, attachment, format)
            })?,
            Command::RenderPassBuilderSetSubpassCount { builder, count } => {
                self.set(builder, ObjectType::RenderPassBuilder, |b, o| {
                    b.render_pass_builder_set_subpass_count(o, count)
                })?
            }
            Command::RenderPassBuilderSubpassSetColorAttachment {
                builder,
                subpass,
                output_index,
                attachment,
            } => self.set(builder, ObjectType::RenderPassBuilder, |b, o| {
                b.render_pass_builder_subpass_set_color_attachment(o, subpass, output_index, attachment)
            })?,
            Command::RenderPassBuilderSubpassSetDepthStencilAttachment {
                builder,
                subpass,
                attachment,
            } => self.set(builder, ObjectType::RenderPassBuilder, |b, o| {
                b.render_pass_builder_subpass_set_depth_stencil_attachment(o, subpass, attachment)
            })?,
            Command::RenderPassBuilderGetResult { builder, result } => {
                self.finish(builder, ObjectType::RenderPassBuilder, result, ObjectType::RenderPass, |b, o| {
                    b.render_pass_builder_get_result(o)
                })?
            }

            Command::TextureBuilderSetDimension { builder, dimension } => {
                self.set(builder, ObjectType::TextureBuilder, |b, o| {
                    b.texture_builder_set_dimension(o, dimension)
                })?
            }
            Command::TextureBuilderSetExtent {
                builder,
                width,
                height,
                depth,
            } => self.set(builder, ObjectType::TextureBuilder, |b, o| {
                b.texture_builder_set_extent(o, width, height, depth)
            })?,
            Command::TextureBuilderSetFormat { builder, format } => {
                self.set(builder, ObjectType::TextureBuilder, |b, o| {
                    b.texture_builder_set_format(o, format)
                })?
            }
            Command::TextureBuilderSetMipLevels { builder, levels } => {
                self.set(builder, ObjectType::TextureBuilder, |b, o| {
                    b.texture_builder_set_mip_levels(o, levels)
                })?
            }
            Command::TextureBuilderSetAllowedUsage { builder, usage } => {
                let usage = TextureUsage::from_bits_retain(usage);
                self.set(builder, ObjectType::TextureBuilder, |b, o| {
                    b.texture_builder_set_allowed_usage(o, usage)
                })?
            }
            Command::TextureBuilderGetResult { builder, result } => {
                self.finish(builder, ObjectType::TextureBuilder, result, ObjectType::Texture, |b, o| {
                    b.texture_builder_get_result(o)
                })?
            }

            Command::TextureFreezeUsage { texture, usage } => {
                let usage = TextureUsage::from_bits_retain(usage);
                match self.resolve(texture, ObjectType::Texture)? {
                    Replayed::Live(object) => self.backend.texture_freeze_usage(&object, usage),
                    Replayed::Poisoned => {
                        self.device_error(format!("FreezeUsage on invalid {}", texture))?
                    }
                }
            }
            Command::TextureCreateTextureViewBuilder { texture, result } => {
                self.create(texture, ObjectType::Texture, result, ObjectType::TextureViewBuilder, |b, t| {
                    b.texture_create_texture_view_builder(t)
                })?
            }
            Command::TextureViewBuilderGetResult { builder, result } => self.finish(
                builder,
                ObjectType::TextureViewBuilder,
                result,
                ObjectType::TextureView,
                |b, o| b.texture_view_builder_get_result(o),
            )?,

            Command::FramebufferBuilderSetRenderPass { builder, render_pass } => self.set_with(
                builder,
                ObjectType::FramebufferBuilder,
                render_pass,
                ObjectType::RenderPass,
                |b, o, rp| b.framebuffer_builder_set_render_pass(o, rp),
            )?,
            Command::FramebufferBuilderSetDimensions { builder, width, height } => {
                self.set(builder, ObjectType::FramebufferBuilder, |b, o| {
                    b.framebuffer_builder_set_dimensions(o, width, height)
                })?
            }
            Command::FramebufferBuilderSetAttachment { builder, slot, view } => self.set_with(
                builder,
                ObjectType::FramebufferBuilder,
                view,
                ObjectType::TextureView,
                |b, o, v| b.framebuffer_builder_set_attachment(o, slot, v),
            )?,
            Command::FramebufferBuilderGetResult { builder, result } => self.finish(
                builder,
                ObjectType::FramebufferBuilder,
                result,
                ObjectType::Framebuffer,
                |b, o| b.framebuffer_builder_get_result(o),
            )?,

            Command::ShaderModuleBuilderSetSource { builder, code } => {
                self.set(builder, ObjectType::ShaderModuleBuilder, |b, o| {
                    b.shader_module_builder_set_source(o, &code)
                })?
            }
            Command::ShaderModuleBuilderGetResult { builder, result } => self.finish(
                builder,
                ObjectType::ShaderModuleBuilder,
                result,
                ObjectType::ShaderModule,
                |b, o| b.shader_module_builder_get_result(o),
            )?,

            Command::SwapChainBuilderSetImplementation {
                builder,
                implementation,
            } => self.set(builder, ObjectType::SwapChainBuilder, |b, o| {
                b.swap_chain_builder_set_implementation(o, implementation)
            })?,
            Command::SwapChainBuilderGetResult { builder, result } => self.finish(
                builder,
                ObjectType::SwapChainBuilder,
                result,
                ObjectType::SwapChain,
                |b, o| b.swap_chain_builder_get_result(o),
            )?,
            Command::SwapChainConfigure {
                swap_chain,
                format,
                usage,
                width,
                height,
            } => {
                let usage = TextureUsage::from_bits_retain(usage);
                match self.resolve(swap_chain, ObjectType::SwapChain)? {
                    Replayed::Live(object) => {
                        self.backend.swap_chain_configure(&object, format, usage, width, height)
                    }
                    Replayed::Poisoned => {
                        self.device_error(format!("Configure on invalid {}", swap_chain))?
                    }
                }
            }
            Command::SwapChainGetNextTexture { swap_chain, result } => {
                self.next_texture(swap_chain, result)?
            }
            Command::SwapChainPresent { swap_chain, texture } => {
                let chain = self.resolve(swap_chain, ObjectType::SwapChain)?;
                let image = self.resolve(texture, ObjectType::Texture)?;
                match (chain, image) {
                    (Replayed::Live(chain), Replayed::Live(image)) => {
                        self.backend.swap_chain_present(&chain, &image)
                    }
                    _ => self.device_error(format!(
                        "Present of {} on {} references an invalid object",
                        texture, swap_chain
                    ))?,
                }
            }

            Command::Destroy { object } => self.destroy(object)?,
        }

        self.drain_backend_errors()
    }

    /// Creating call whose receiver is not consumed.
    fn create(
        &mut self,
        receiver: ObjectHandle,
        receiver_ty: ObjectType,
        result: ObjectHandle,
        result_ty: ObjectType,
        op: impl FnOnce(&mut B, &B::Object) -> B::Object,
    ) -> Result<(), ServerError> {
        let parent = self.resolve(receiver, receiver_ty)?;
        self.check_fresh(result, result_ty)?;
        let created = match parent {
            Replayed::Live(parent) => Replayed::Live(op(&mut self.backend, &parent)),
            Replayed::Poisoned => Replayed::Poisoned,
        };
        self.insert(result, created)?;
        Ok(())
    }

    /// Builder setter with plain-value arguments.
    fn set(
        &mut self,
        builder: ObjectHandle,
        builder_ty: ObjectType,
        op: impl FnOnce(&mut B, &B::Object),
    ) -> Result<(), ServerError> {
        if let Replayed::Live(object) = self.resolve(builder, builder_ty)? {
            op(&mut self.backend, &object);
        }
        Ok(())
    }

    /// Builder setter taking another object. A poisoned argument poisons
    /// the builder.
    fn set_with(
        &mut self,
        builder: ObjectHandle,
        builder_ty: ObjectType,
        argument: ObjectHandle,
        argument_ty: ObjectType,
        op: impl FnOnce(&mut B, &B::Object, &B::Object),
    ) -> Result<(), ServerError> {
        let target = self.resolve(builder, builder_ty)?;
        let input = self.resolve(argument, argument_ty)?;
        match (target, input) {
            (Replayed::Live(target), Replayed::Live(input)) => op(&mut self.backend, &target, &input),
            (Replayed::Poisoned, _) => {}
            (Replayed::Live(target), Replayed::Poisoned) => {
                self.objects.with(builder, builder_ty, |slot| *slot = Replayed::Poisoned)
                    .map_err(ProtocolViolation::from)?;
                self.backend.release(target);
                self.object_error(builder, format!("{} references invalid {}", builder, argument))?;
            }
        }
        Ok(())
    }

    /// `GetResult`: consumes the builder identity and registers its product.
    fn finish(
        &mut self,
        builder: ObjectHandle,
        builder_ty: ObjectType,
        result: ObjectHandle,
        result_ty: ObjectType,
        op: impl FnOnce(&mut B, B::Object) -> Result<B::Object, BackendError>,
    ) -> Result<(), ServerError> {
        let target = self.resolve(builder, builder_ty)?;
        self.check_fresh(result, result_ty)?;
        self.objects.remove(builder);

        let product = match target {
            Replayed::Live(target) => match op(&mut self.backend, target) {
                Ok(object) => Replayed::Live(object),
                Err(e) => {
                    self.object_error(result, e.message)?;
                    Replayed::Poisoned
                }
            },
            Replayed::Poisoned => Replayed::Poisoned,
        };
        self.insert(result, product)?;
        Ok(())
    }

    fn next_texture(&mut self, swap_chain: ObjectHandle, result: ObjectHandle) -> Result<(), ServerError> {
        let chain = self.resolve(swap_chain, ObjectType::SwapChain)?;
        self.check_fresh(result, ObjectType::Texture)?;

        let acquired = match chain {
            Replayed::Live(chain) => self.backend.swap_chain_get_next_texture(&chain),
            Replayed::Poisoned => Err(BackendError::new(format!("{} is invalid", swap_chain))),
        };
        match acquired {
            Ok((texture, backbuffer_index)) => {
                self.insert(result, Replayed::Live(texture))?;
                self.emit(ServerEvent::NextTexture {
                    swap_chain,
                    texture: result,
                    backbuffer_index,
                })?;
            }
            Err(e) => {
                self.insert(result, Replayed::Poisoned)?;
                self.object_error(result, e.message)?;
            }
        }
        Ok(())
    }

    fn destroy(&mut self, object: ObjectHandle) -> Result<(), ServerError> {
        if object.ty == ObjectType::Device {
            return Err(ProtocolViolation::Indestructible(object).into());
        }
        match self.objects.remove(object) {
            Some(Replayed::Live(backend_object)) => {
                self.backend.release(backend_object);
                SessionMetrics::bump(&self.metrics.objects_released, 1);
            }
            Some(Replayed::Poisoned) => {}
            None => debug!("destroy of unknown {} ignored", object),
        }
        Ok(())
    }
}

impl<B: Backend> Drop for WireServer<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
