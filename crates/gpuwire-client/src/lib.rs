pub mod builders;
pub mod device;
pub mod encoder;
pub mod error;
pub mod objects;
pub mod session;

pub use builders::{
    BuilderState, FramebufferBuilder, RenderPassBuilder, ShaderModuleBuilder, SwapChainBuilder,
    TextureBuilder, TextureViewBuilder,
};
pub use device::Device;
pub use error::ClientError;
pub use objects::{Framebuffer, RenderPass, ShaderModule, SwapChain, Texture, TextureView};
pub use session::{ClientMetrics, ErrorCallback, SessionStatus};
