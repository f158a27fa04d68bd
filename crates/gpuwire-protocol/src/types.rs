use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum TextureFormat {
    R8G8B8A8Unorm,
    D32FloatS8Uint,
}

impl TextureFormat {
    pub fn is_depth_stencil(self) -> bool {
        matches!(self, TextureFormat::D32FloatS8Uint)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum TextureDimension {
    #[default]
    E2D,
}

/// Most attachments one render pass can declare.
pub const MAX_ATTACHMENTS: u32 = 16;
/// Most subpasses one render pass can declare.
pub const MAX_SUBPASSES: u32 = 16;

bitflags::bitflags! {
    /// Texture usage bits. Travels on the wire as its raw `u32` so that
    /// unknown bits reach the backend's validation instead of being dropped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const TRANSFER_SRC      = 0b0000_0001;
        const TRANSFER_DST      = 0b0000_0010;
        const SAMPLED           = 0b0000_0100;
        const STORAGE           = 0b0000_1000;
        const OUTPUT_ATTACHMENT = 0b0001_0000;
        const PRESENT           = 0b0010_0000;
    }
}
