use serde::{Deserialize, Serialize};

use crate::handle::ObjectHandle;
use crate::opcode::Opcode;
use crate::types::{TextureDimension, TextureFormat};

/// One client → server call record.
///
/// Every variant names its receiver first. Creating calls carry a `result`
/// handle the client has already allocated; the server stores the backend
/// object it gets back under exactly that handle.
/// Usage masks travel as raw bits (see [`crate::types::TextureUsage`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize,
         rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
pub enum Command {
    // ── Device ──────────────────────────────────────────────
    DeviceCreateRenderPassBuilder {
        device: ObjectHandle,
        result: ObjectHandle,
    },
    DeviceCreateTextureBuilder {
        device: ObjectHandle,
        result: ObjectHandle,
    },
    DeviceCreateFramebufferBuilder {
        device: ObjectHandle,
        result: ObjectHandle,
    },
    DeviceCreateShaderModuleBuilder {
        device: ObjectHandle,
        result: ObjectHandle,
    },
    DeviceCreateSwapChainBuilder {
        device: ObjectHandle,
        result: ObjectHandle,
    },

    // ── Render pass builder ─────────────────────────────────
    RenderPassBuilderSetAttachmentCount {
        builder: ObjectHandle,
        count: u32,
    },
    RenderPassBuilderAttachmentSetFormat {
        builder: ObjectHandle,
        attachment: u32,
        format: TextureFormat,
    },
    RenderPassBuilderSetSubpassCount {
        builder: ObjectHandle,
        count: u32,
    },
    RenderPassBuilderSubpassSetColorAttachment {
        builder: ObjectHandle,
        subpass: u32,
        output_index: u32,
        attachment: u32,
    },
    RenderPassBuilderSubpassSetDepthStencilAttachment {
        builder: ObjectHandle,
        subpass: u32,
        attachment: u32,
    },
    RenderPassBuilderGetResult {
        builder: ObjectHandle,
        result: ObjectHandle,
    },

    // ── Texture builder ─────────────────────────────────────
    TextureBuilderSetDimension {
        builder: ObjectHandle,
        dimension: TextureDimension,
    },
    TextureBuilderSetExtent {
        builder: ObjectHandle,
        width: u32,
        height: u32,
        depth: u32,
    },
    TextureBuilderSetFormat {
        builder: ObjectHandle,
        format: TextureFormat,
    },
    TextureBuilderSetMipLevels {
        builder: ObjectHandle,
        levels: u32,
    },
    TextureBuilderSetAllowedUsage {
        builder: ObjectHandle,
        usage: u32,
    },
    TextureBuilderGetResult {
        builder: ObjectHandle,
        result: ObjectHandle,
    },

    // ── Texture / texture view ──────────────────────────────
    TextureFreezeUsage {
        texture: ObjectHandle,
        usage: u32,
    },
    TextureCreateTextureViewBuilder {
        texture: ObjectHandle,
        result: ObjectHandle,
    },
    TextureViewBuilderGetResult {
        builder: ObjectHandle,
        result: ObjectHandle,
    },

    // ── Framebuffer builder ─────────────────────────────────
    FramebufferBuilderSetRenderPass {
        builder: ObjectHandle,
        render_pass: ObjectHandle,
    },
    FramebufferBuilderSetDimensions {
        builder: ObjectHandle,
        width: u32,
        height: u32,
    },
    FramebufferBuilderSetAttachment {
        builder: ObjectHandle,
        slot: u32,
        view: ObjectHandle,
    },
    FramebufferBuilderGetResult {
        builder: ObjectHandle,
        result: ObjectHandle,
    },

    // ── Shader module builder ───────────────────────────────
    ShaderModuleBuilderSetSource {
        builder: ObjectHandle,
        code: Vec<u32>,
    },
    ShaderModuleBuilderGetResult {
        builder: ObjectHandle,
        result: ObjectHandle,
    },

    // ── Swap chain ──────────────────────────────────────────
    SwapChainBuilderSetImplementation {
        builder: ObjectHandle,
        implementation: u64,
    },
    SwapChainBuilderGetResult {
        builder: ObjectHandle,
        result: ObjectHandle,
    },
    SwapChainConfigure {
        swap_chain: ObjectHandle,
        format: TextureFormat,
        usage: u32,
        width: u32,
        height: u32,
    },
    /// Value-returning call: the backbuffer index comes back as a
    /// `NextTexture` event.
    SwapChainGetNextTexture {
        swap_chain: ObjectHandle,
        result: ObjectHandle,
    },
    SwapChainPresent {
        swap_chain: ObjectHandle,
        texture: ObjectHandle,
    },

    // ── Lifetime ────────────────────────────────────────────
    Destroy {
        object: ObjectHandle,
    },
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::DeviceCreateRenderPassBuilder { .. } => Opcode::DeviceCreateRenderPassBuilder,
            Command::DeviceCreateTextureBuilder { .. } => Opcode::DeviceCreateTextureBuilder,
            Command::DeviceCreateFramebufferBuilder { .. } => Opcode::DeviceCreateFramebufferBuilder,
            Command::DeviceCreateShaderModuleBuilder { .. } => Opcode::DeviceCreateShaderModuleBuilder,
            Command::DeviceCreateSwapChainBuilder { .. } => Opcode::DeviceCreateSwapChainBuilder,
            Command::RenderPassBuilderSetAttachmentCount { .. } => Opcode::RenderPassBuilderSetAttachmentCount,
            Command::RenderPassBuilderAttachmentSetFormat { .. } => Opcode::RenderPassBuilderAttachmentSetFormat,
            Command::RenderPassBuilderSetSubpassCount { .. } => Opcode::RenderPassBuilderSetSubpassCount,
            Command::RenderPassBuilderSubpassSetColorAttachment { .. } => {
                Opcode::RenderPassBuilderSubpassSetColorAttachment
            }
            Command::RenderPassBuilderSubpassSetDepthStencilAttachment { .. } => {
                Opcode::RenderPassBuilderSubpassSetDepthStencilAttachment
            }
            Command::RenderPassBuilderGetResult { .. } => Opcode::RenderPassBuilderGetResult,
            Command::TextureBuilderSetDimension { .. } => Opcode::TextureBuilderSetDimension,
            Command::TextureBuilderSetExtent { .. } => Opcode::TextureBuilderSetExtent,
            Command::TextureBuilderSetFormat { .. } => Opcode::TextureBuilderSetFormat,
            Command::TextureBuilderSetMipLevels { .. } => Opcode::TextureBuilderSetMipLevels,
            Command::TextureBuilderSetAllowedUsage { .. } => Opcode::TextureBuilderSetAllowedUsage,
            Command::TextureBuilderGetResult { .. } => Opcode::TextureBuilderGetResult,
            Command::TextureFreezeUsage { .. } => Opcode::TextureFreezeUsage,
            Command::TextureCreateTextureViewBuilder { .. } => Opcode::TextureCreateTextureViewBuilder,
            Command::TextureViewBuilderGetResult { .. } => Opcode::TextureViewBuilderGetResult,
            Command::FramebufferBuilderSetRenderPass { .. } => Opcode::FramebufferBuilderSetRenderPass,
            Command::FramebufferBuilderSetDimensions { .. } => Opcode::FramebufferBuilderSetDimensions,
            Command::FramebufferBuilderSetAttachment { .. } => Opcode::FramebufferBuilderSetAttachment,
            Command::FramebufferBuilderGetResult { .. } => Opcode::FramebufferBuilderGetResult,
            Command::ShaderModuleBuilderSetSource { .. } => Opcode::ShaderModuleBuilderSetSource,
            Command::ShaderModuleBuilderGetResult { .. } => Opcode::ShaderModuleBuilderGetResult,
            Command::SwapChainBuilderSetImplementation { .. } => Opcode::SwapChainBuilderSetImplementation,
            Command::SwapChainBuilderGetResult { .. } => Opcode::SwapChainBuilderGetResult,
            Command::SwapChainConfigure { .. } => Opcode::SwapChainConfigure,
            Command::SwapChainGetNextTexture { .. } => Opcode::SwapChainGetNextTexture,
            Command::SwapChainPresent { .. } => Opcode::SwapChainPresent,
            Command::Destroy { .. } => Opcode::Destroy,
        }
    }

    /// The handle this command creates, if any.
    pub fn result(&self) -> Option<ObjectHandle> {
        match self {
            Command::DeviceCreateRenderPassBuilder { result, .. }
            | Command::DeviceCreateTextureBuilder { result, .. }
            | Command::DeviceCreateFramebufferBuilder { result, .. }
            | Command::DeviceCreateShaderModuleBuilder { result, .. }
            | Command::DeviceCreateSwapChainBuilder { result, .. }
            | Command::RenderPassBuilderGetResult { result, .. }
            | Command::TextureBuilderGetResult { result, .. }
            | Command::TextureCreateTextureViewBuilder { result, .. }
            | Command::TextureViewBuilderGetResult { result, .. }
            | Command::FramebufferBuilderGetResult { result, .. }
            | Command::ShaderModuleBuilderGetResult { result, .. }
            | Command::SwapChainBuilderGetResult { result, .. }
            | Command::SwapChainGetNextTexture { result, .. } => Some(*result),
            _ => None,
        }
    }
}
