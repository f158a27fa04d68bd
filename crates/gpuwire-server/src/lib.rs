pub mod backend;
pub mod error;
pub mod null_backend;
pub mod recording;
pub mod server;
pub mod session;

pub use backend::{Backend, BackendError, ErrorCallback};
pub use error::ServerError;
pub use null_backend::{NullBackend, NullHandle};
pub use recording::RecordingBackend;
pub use server::WireServer;
pub use session::{MetricsSnapshot, SessionState};
