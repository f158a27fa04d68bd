pub mod handle;
pub mod types;
pub mod opcode;
pub mod commands;
pub mod events;
pub mod wire;
pub mod error;

pub use commands::Command;
pub use error::ProtocolViolation;
pub use events::ServerEvent;
pub use handle::{ObjectHandle, ObjectType};
pub use opcode::Opcode;
pub use types::{TextureDimension, TextureFormat, TextureUsage, MAX_ATTACHMENTS, MAX_SUBPASSES};
