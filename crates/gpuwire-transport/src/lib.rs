pub mod channel;
pub mod stream;
pub mod error;

pub use channel::{memory_channel, ChannelReader, ChannelSink, ChannelSource, ChannelWriter};
pub use error::TransportError;
