//! Record opcodes. The numeric values are part of the wire format.

macro_rules! opcodes {
    ($($name:ident = $value:literal),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($name = $value,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            pub fn from_raw(raw: u16) -> Option<Self> {
                match raw {
                    $($value => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name),)*
                }
            }
        }
    };
}

opcodes! {
    // ── Client → server ─────────────────────────────────────
    DeviceCreateRenderPassBuilder = 0x0001,
    DeviceCreateTextureBuilder = 0x0002,
    DeviceCreateFramebufferBuilder = 0x0003,
    DeviceCreateShaderModuleBuilder = 0x0004,
    DeviceCreateSwapChainBuilder = 0x0005,

    RenderPassBuilderSetAttachmentCount = 0x0010,
    RenderPassBuilderAttachmentSetFormat = 0x0011,
    RenderPassBuilderSetSubpassCount = 0x0012,
    RenderPassBuilderSubpassSetColorAttachment = 0x0013,
    RenderPassBuilderSubpassSetDepthStencilAttachment = 0x0014,
    RenderPassBuilderGetResult = 0x0015,

    TextureBuilderSetDimension = 0x0020,
    TextureBuilderSetExtent = 0x0021,
    TextureBuilderSetFormat = 0x0022,
    TextureBuilderSetMipLevels = 0x0023,
    TextureBuilderSetAllowedUsage = 0x0024,
    TextureBuilderGetResult = 0x0025,

    TextureFreezeUsage = 0x0030,
    TextureCreateTextureViewBuilder = 0x0031,
    TextureViewBuilderGetResult = 0x0032,

    FramebufferBuilderSetRenderPass = 0x0040,
    FramebufferBuilderSetDimensions = 0x0041,
    FramebufferBuilderSetAttachment = 0x0042,
    FramebufferBuilderGetResult = 0x0043,

    ShaderModuleBuilderSetSource = 0x0050,
    ShaderModuleBuilderGetResult = 0x0051,

    SwapChainBuilderSetImplementation = 0x0060,
    SwapChainBuilderGetResult = 0x0061,
    SwapChainConfigure = 0x0062,
    SwapChainGetNextTexture = 0x0063,
    SwapChainPresent = 0x0064,

    Destroy = 0x00F0,

    // ── Server → client ─────────────────────────────────────
    DeviceError = 0x8001,
    ObjectError = 0x8002,
    NextTexture = 0x8003,
    SessionTerminated = 0x8004,
}

impl Opcode {
    /// Events travel server → client; everything else is a command.
    pub fn is_event(self) -> bool {
        (self as u16) & 0x8000 != 0
    }

    pub fn raw(self) -> u16 {
        self as u16
    }
}
