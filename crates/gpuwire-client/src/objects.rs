//! Proxies for finished objects.
//!
//! Proxies are cheap handles: cloning shares one identity, and dropping
//! the last clone sends `Destroy` for it.

use std::fmt;
use std::sync::Arc;

use gpuwire_protocol::{Command, ObjectHandle, ObjectType, TextureFormat, TextureUsage};

use crate::builders::TextureViewBuilder;
use crate::error::ClientError;
use crate::session::ClientShared;

pub(crate) struct ProxyInner {
    pub(crate) handle: ObjectHandle,
    pub(crate) session: Arc<ClientShared>,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        self.session.destroy(self.handle);
    }
}

macro_rules! proxy_object {
    ($(#[$meta:meta])* $name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            pub(crate) inner: Arc<ProxyInner>,
            $($field: $ty,)*
        }

        impl $name {
            pub fn handle(&self) -> ObjectHandle {
                self.inner.handle
            }

            /// Whether the server reported this object, or something it
            /// was built from, as invalid. Reflects events handled so far.
            pub fn is_poisoned(&self) -> bool {
                self.inner.session.is_poisoned(self.inner.handle)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("handle", &self.inner.handle)
                    .finish()
            }
        }
    };
}

proxy_object!(
    /// A finished render pass. Caches its attachment count so framebuffer
    /// slots can be checked without a round trip.
    RenderPass { attachment_count: u32 }
);
proxy_object!(Texture {});
proxy_object!(
    /// A view keeps the texture it views alive.
    TextureView { texture: Texture }
);
proxy_object!(Framebuffer {});
proxy_object!(ShaderModule {});
proxy_object!(SwapChain {});

fn inner(session: Arc<ClientShared>, handle: ObjectHandle) -> Arc<ProxyInner> {
    Arc::new(ProxyInner { handle, session })
}

impl RenderPass {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle, attachment_count: u32) -> Self {
        Self {
            inner: inner(session, handle),
            attachment_count,
        }
    }

    pub fn attachment_count(&self) -> u32 {
        self.attachment_count
    }
}

impl Texture {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            inner: inner(session, handle),
        }
    }

    /// Fix the usage the texture will be used with from now on.
    pub fn freeze_usage(&self, usage: TextureUsage) -> Result<(), ClientError> {
        self.inner.session.send(Command::TextureFreezeUsage {
            texture: self.handle(),
            usage: usage.bits(),
        })
    }

    pub fn create_texture_view_builder(&self) -> Result<TextureViewBuilder, ClientError> {
        let texture = self.handle();
        let handle = self.inner.session.create(ObjectType::TextureViewBuilder, &[texture], |result| {
            Command::TextureCreateTextureViewBuilder { texture, result }
        })?;
        Ok(TextureViewBuilder::new(Arc::clone(&self.inner.session), handle, self.clone()))
    }

    /// Index of the swap chain image this texture wraps. `None` until the
    /// server's answer has been handled, and for ordinary textures.
    pub fn backbuffer_index(&self) -> Option<u32> {
        self.inner.session.backbuffer_index(self.handle())
    }
}

impl TextureView {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle, texture: Texture) -> Self {
        Self {
            inner: inner(session, handle),
            texture,
        }
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }
}

impl Framebuffer {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            inner: inner(session, handle),
        }
    }
}

impl ShaderModule {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            inner: inner(session, handle),
        }
    }
}

impl SwapChain {
    pub(crate) fn new(session: Arc<ClientShared>, handle: ObjectHandle) -> Self {
        Self {
            inner: inner(session, handle),
        }
    }

    pub fn configure(
        &self,
        format: TextureFormat,
        usage: TextureUsage,
        width: u32,
        height: u32,
    ) -> Result<(), ClientError> {
        self.inner.session.send(Command::SwapChainConfigure {
            swap_chain: self.handle(),
            format,
            usage: usage.bits(),
            width,
            height,
        })
    }

    /// Acquire the next image. The texture is usable immediately; its
    /// backbuffer index arrives with the server's events.
    pub fn get_next_texture(&self) -> Result<Texture, ClientError> {
        let swap_chain = self.handle();
        let handle = self.inner.session.create(ObjectType::Texture, &[swap_chain], |result| {
            Command::SwapChainGetNextTexture { swap_chain, result }
        })?;
        Ok(Texture::new(Arc::clone(&self.inner.session), handle))
    }

    pub fn present(&self, texture: &Texture) -> Result<(), ClientError> {
        if !Arc::ptr_eq(&self.inner.session, &texture.inner.session) {
            return Err(ClientError::Validation(format!(
                "{} belongs to a different session",
                texture.handle()
            )));
        }
        self.inner.session.send(Command::SwapChainPresent {
            swap_chain: self.handle(),
            texture: texture.handle(),
        })
    }
}
