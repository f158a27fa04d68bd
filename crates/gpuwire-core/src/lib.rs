pub mod config;
pub mod error;
pub mod object_table;

pub use config::WireConfig;
pub use error::CoreError;
pub use object_table::{IdAllocator, ObjectTable};
