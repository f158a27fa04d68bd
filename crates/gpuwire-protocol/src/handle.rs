use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity the device is registered under on both sides of a session.
pub const DEVICE_ID: u32 = 1;

/// A wire-safe reference to an object owned by the peer.
/// The client assigns `id` when it issues the creating command; ids are
/// scoped to `ty`, so two objects of different types may share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub struct ObjectHandle {
    /// Type tag, checked by the decoder against the opcode's expectation
    pub ty: ObjectType,
    /// Identity within the type scope (0 is never allocated)
    pub id: u32,
}

impl ObjectHandle {
    pub const fn new(ty: ObjectType, id: u32) -> Self {
        Self { ty, id }
    }

    /// The handle every session registers its device under.
    pub const fn device() -> Self {
        Self::new(ObjectType::Device, DEVICE_ID)
    }

    pub fn is_null(&self) -> bool {
        self.id == 0
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.ty, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum ObjectType {
    Device,
    RenderPassBuilder,
    RenderPass,
    TextureBuilder,
    Texture,
    TextureViewBuilder,
    TextureView,
    FramebufferBuilder,
    Framebuffer,
    ShaderModuleBuilder,
    ShaderModule,
    SwapChainBuilder,
    SwapChain,
}

impl ObjectType {
    pub const COUNT: usize = 13;

    pub const ALL: [ObjectType; Self::COUNT] = [
        ObjectType::Device,
        ObjectType::RenderPassBuilder,
        ObjectType::RenderPass,
        ObjectType::TextureBuilder,
        ObjectType::Texture,
        ObjectType::TextureViewBuilder,
        ObjectType::TextureView,
        ObjectType::FramebufferBuilder,
        ObjectType::Framebuffer,
        ObjectType::ShaderModuleBuilder,
        ObjectType::ShaderModule,
        ObjectType::SwapChainBuilder,
        ObjectType::SwapChain,
    ];

    /// Dense index, usable for per-type arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The object type a builder produces, or `None` for non-builders.
    pub fn product(self) -> Option<ObjectType> {
        match self {
            ObjectType::RenderPassBuilder => Some(ObjectType::RenderPass),
            ObjectType::TextureBuilder => Some(ObjectType::Texture),
            ObjectType::TextureViewBuilder => Some(ObjectType::TextureView),
            ObjectType::FramebufferBuilder => Some(ObjectType::Framebuffer),
            ObjectType::ShaderModuleBuilder => Some(ObjectType::ShaderModule),
            ObjectType::SwapChainBuilder => Some(ObjectType::SwapChain),
            _ => None,
        }
    }

    pub fn is_builder(self) -> bool {
        self.product().is_some()
    }

    pub fn name(self) -> &'static str {
        match self {
            ObjectType::Device => "Device",
            ObjectType::RenderPassBuilder => "RenderPassBuilder",
            ObjectType::RenderPass => "RenderPass",
            ObjectType::TextureBuilder => "TextureBuilder",
            ObjectType::Texture => "Texture",
            ObjectType::TextureViewBuilder => "TextureViewBuilder",
            ObjectType::TextureView => "TextureView",
            ObjectType::FramebufferBuilder => "FramebufferBuilder",
            ObjectType::Framebuffer => "Framebuffer",
            ObjectType::ShaderModuleBuilder => "ShaderModuleBuilder",
            ObjectType::ShaderModule => "ShaderModule",
            ObjectType::SwapChainBuilder => "SwapChainBuilder",
            ObjectType::SwapChain => "SwapChain",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
