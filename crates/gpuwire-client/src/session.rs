//! Client-side session state shared by every proxy of one device.
//!
//! All mutable state sits behind one mutex so proxies can be sent across
//! threads. The error callback lives behind its own lock and is always
//! invoked with the session lock released, so a callback may call back
//! into the device.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use gpuwire_core::{IdAllocator, ObjectTable};
use gpuwire_protocol::wire::{self, RecordReader};
use gpuwire_protocol::{Command, ObjectHandle, ObjectType, ProtocolViolation, ServerEvent};
use gpuwire_transport::ChannelSource;

use crate::encoder::CommandEncoder;
use crate::error::ClientError;

/// Device-wide error callback.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Terminated { reason: String },
}

/// Counters for one client session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientMetrics {
    pub records_encoded: u64,
    pub bytes_encoded: u64,
    pub flushes: u64,
    pub events_handled: u64,
    pub errors_reported: u64,
}

/// What the client knows about one identity it allocated.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProxyState {
    pub poisoned: bool,
    /// Identities this object was created from or configured with.
    pub parents: Vec<ObjectHandle>,
    /// Set on swap chain images once the server reports the index.
    pub backbuffer_index: Option<u32>,
    /// Builder ↔ product link, kept after `GetResult` so errors reported
    /// against the builder still reach its product.
    pub linked: Option<ObjectHandle>,
}

struct Session {
    encoder: CommandEncoder,
    events: Box<dyn ChannelSource + Send>,
    ids: IdAllocator,
    objects: ObjectTable<ProxyState>,
    status: SessionStatus,
    flushes: u64,
    events_handled: u64,
    errors_reported: u64,
}

pub(crate) struct ClientShared {
    session: Mutex<Session>,
    callback: Mutex<Option<ErrorCallback>>,
}

impl Session {
    fn ensure_active(&self) -> Result<(), ClientError> {
        match &self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Terminated { reason } => Err(ClientError::SessionClosed(reason.clone())),
        }
    }

    fn terminate(&mut self, reason: String) {
        if let SessionStatus::Active = self.status {
            warn!("client session terminated: {}", reason);
            self.status = SessionStatus::Terminated { reason };
        }
    }

    /// Every encoding failure breaks the session: a record the server
    /// never sees leaves the two object tables out of step.
    fn encode(&mut self, command: &Command) -> Result<(), ClientError> {
        self.ensure_active()?;
        if let Err(e) = self.encoder.encode(command) {
            self.terminate(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    fn is_poisoned(&self, handle: ObjectHandle) -> bool {
        self.objects
            .resolve(handle, handle.ty)
            .map(|state| state.poisoned)
            .unwrap_or(false)
    }

    /// Poison `root` and everything created from it or configured with it.
    fn poison(&self, root: ObjectHandle) {
        let mut poisoned: HashSet<ObjectHandle> = HashSet::new();
        poisoned.insert(root);
        let _ = self.objects.with(root, root.ty, |state| state.poisoned = true);

        loop {
            let mut spread = Vec::new();
            self.objects.for_each_mut(|handle, state| {
                if !state.poisoned && state.parents.iter().any(|p| poisoned.contains(p)) {
                    state.poisoned = true;
                    spread.push(handle);
                }
            });
            if spread.is_empty() {
                break;
            }
            poisoned.extend(spread);
        }
    }

    /// The live identity an event about `handle` should apply to.
    fn event_target(&self, handle: ObjectHandle) -> Option<ObjectHandle> {
        let state = self.objects.resolve(handle, handle.ty).ok()?;
        match state.linked {
            // A finalized builder forwards to its product.
            Some(product) if handle.ty.is_builder() => Some(product),
            _ => Some(handle),
        }
    }

    /// Apply one event. Returns a message for the error callback, if any.
    fn apply(&mut self, event: ServerEvent) -> Option<String> {
        match event {
            ServerEvent::DeviceError { message, .. } => Some(message),
            ServerEvent::ObjectError { object, message, .. } => match self.event_target(object) {
                Some(target) => {
                    self.poison(target);
                    Some(format!("{}: {}", object, message))
                }
                None => {
                    debug!("error for destroyed {} ignored: {}", object, message);
                    None
                }
            },
            ServerEvent::NextTexture {
                texture,
                backbuffer_index,
                ..
            } => {
                let updated = self
                    .objects
                    .with(texture, ObjectType::Texture, |state| {
                        state.backbuffer_index = Some(backbuffer_index)
                    })
                    .is_ok();
                if !updated {
                    debug!("next texture {} already destroyed", texture);
                }
                None
            }
            ServerEvent::SessionTerminated { reason } => {
                let message = format!("server terminated the session: {}", reason);
                self.terminate(reason);
                Some(message)
            }
        }
    }
}

impl ClientShared {
    pub fn new(
        encoder: CommandEncoder,
        events: Box<dyn ChannelSource + Send>,
    ) -> Self {
        let objects = ObjectTable::new();
        // A fresh table cannot already hold the device.
        let _ = objects.insert(ObjectHandle::device(), ProxyState::default());
        info!("client session started");
        Self {
            session: Mutex::new(Session {
                encoder,
                events,
                ids: IdAllocator::new(),
                objects,
                status: SessionStatus::Active,
                flushes: 0,
                events_handled: 0,
                errors_reported: 0,
            }),
            callback: Mutex::new(None),
        }
    }

    /// Allocate an identity of type `ty`, encode its creating command and
    /// register it. `parents` are the inputs it inherits poison from.
    pub fn create(
        &self,
        ty: ObjectType,
        parents: &[ObjectHandle],
        make: impl FnOnce(ObjectHandle) -> Command,
    ) -> Result<ObjectHandle, ClientError> {
        let mut session = self.session.lock();
        session.ensure_active()?;
        let handle = session
            .ids
            .alloc(ty)
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        session.encode(&make(handle))?;

        let poisoned = parents.iter().any(|p| session.is_poisoned(*p));
        session.objects.insert(
            handle,
            ProxyState {
                poisoned,
                parents: parents.to_vec(),
                ..ProxyState::default()
            },
        )
        .map_err(ProtocolViolation::from)?;
        Ok(handle)
    }

    /// Encode `GetResult` for `builder` and register the product, linked
    /// back to the builder.
    pub fn finish(
        &self,
        builder: ObjectHandle,
        product_ty: ObjectType,
        make: impl FnOnce(ObjectHandle) -> Command,
    ) -> Result<ObjectHandle, ClientError> {
        let mut session = self.session.lock();
        session.ensure_active()?;
        let product = session
            .ids
            .alloc(product_ty)
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        session.encode(&make(product))?;

        let inherited = session
            .objects
            .with(builder, builder.ty, |state| {
                state.linked = Some(product);
                state.clone()
            })
            .map_err(ProtocolViolation::from)?;
        session
            .objects
            .insert(
                product,
                ProxyState {
                    poisoned: inherited.poisoned,
                    parents: inherited.parents,
                    backbuffer_index: None,
                    linked: Some(builder),
                },
            )
            .map_err(ProtocolViolation::from)?;
        Ok(product)
    }

    /// Encode a command that creates nothing.
    pub fn send(&self, command: Command) -> Result<(), ClientError> {
        self.session.lock().encode(&command)
    }

    /// Encode a setter that makes `builder` depend on `argument`.
    pub fn send_with(&self, builder: ObjectHandle, argument: ObjectHandle, command: Command) -> Result<(), ClientError> {
        let mut session = self.session.lock();
        session.encode(&command)?;
        let poisoned = session.is_poisoned(argument);
        let _ = session.objects.with(builder, builder.ty, |state| {
            state.parents.push(argument);
            state.poisoned |= poisoned;
        });
        Ok(())
    }

    /// Forget `handle` and tell the server to release it. Silent once the
    /// session is over.
    pub fn destroy(&self, handle: ObjectHandle) {
        let mut session = self.session.lock();
        if let Some(state) = session.objects.remove(handle) {
            // A product takes its finalized builder's entry with it.
            if let Some(linked) = state.linked {
                if linked.ty.is_builder() {
                    session.objects.remove(linked);
                }
            }
        }
        if session.ensure_active().is_err() {
            return;
        }
        if let Err(e) = session.encode(&Command::Destroy { object: handle }) {
            warn!("failed to encode destroy of {}: {}", handle, e);
        }
    }

    pub fn is_poisoned(&self, handle: ObjectHandle) -> bool {
        self.session.lock().is_poisoned(handle)
    }

    pub fn backbuffer_index(&self, handle: ObjectHandle) -> Option<u32> {
        let session = self.session.lock();
        session
            .objects
            .resolve(handle, ObjectType::Texture)
            .ok()
            .and_then(|state| state.backbuffer_index)
    }

    pub fn flush(&self) -> Result<(), ClientError> {
        let mut session = self.session.lock();
        session.ensure_active()?;
        if let Err(e) = session.encoder.flush() {
            session.terminate(e.to_string());
            return Err(e);
        }
        session.flushes += 1;
        Ok(())
    }

    pub fn buffered(&self) -> usize {
        self.session.lock().encoder.buffered()
    }

    /// Drain every flushed event batch from the server, update cached
    /// proxy state and run the error callback for each reported error.
    pub fn handle_events(&self) -> Result<usize, ClientError> {
        let mut messages = Vec::new();
        let outcome = self.drain_events(&mut messages);
        self.report(messages);
        outcome
    }

    fn drain_events(&self, messages: &mut Vec<String>) -> Result<usize, ClientError> {
        let mut session = self.session.lock();
        session.ensure_active()?;

        let mut handled = 0;
        loop {
            let batch = match session.events.poll_incoming() {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    let e = ClientError::from(e);
                    session.terminate(e.to_string());
                    return Err(e);
                }
            };
            for record in RecordReader::new(&batch) {
                let event = match record.and_then(|r| wire::decode_event(&r)) {
                    Ok(event) => event,
                    Err(e) => {
                        let violation = ProtocolViolation::from(e);
                        session.terminate(violation.to_string());
                        messages.push(format!("malformed event stream: {}", violation));
                        return Err(violation.into());
                    }
                };
                debug!("event {:?}", event.opcode());
                if let Some(message) = session.apply(event) {
                    messages.push(message);
                }
                session.events_handled += 1;
                handled += 1;
            }
        }
        Ok(handled)
    }

    fn report(&self, messages: Vec<String>) {
        if messages.is_empty() {
            return;
        }
        self.session.lock().errors_reported += messages.len() as u64;

        let taken = self.callback.lock().take();
        let Some(mut callback) = taken else {
            for message in &messages {
                warn!("device error with no callback registered: {}", message);
            }
            return;
        };
        for message in &messages {
            callback(message);
        }
        // Keep a callback registered from inside the callback.
        let mut slot = self.callback.lock();
        if slot.is_none() {
            *slot = Some(callback);
        }
    }

    pub fn set_callback(&self, callback: ErrorCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// End the session locally: deregister the callback and invalidate
    /// every identity. Idempotent.
    pub fn disconnect(&self) {
        let mut session = self.session.lock();
        session.terminate("disconnected".to_string());
        let dropped = session.objects.drain().len();
        drop(session);
        self.callback.lock().take();
        debug!(identities = dropped, "client session disconnected");
    }

    pub fn status(&self) -> SessionStatus {
        self.session.lock().status.clone()
    }

    pub fn metrics(&self) -> ClientMetrics {
        let session = self.session.lock();
        ClientMetrics {
            records_encoded: session.encoder.records_encoded(),
            bytes_encoded: session.encoder.bytes_encoded(),
            flushes: session.flushes,
            events_handled: session.events_handled,
            errors_reported: session.errors_reported,
        }
    }
}
