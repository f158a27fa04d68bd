use tracing::trace;

use gpuwire_protocol::wire;
use gpuwire_protocol::{Command, ProtocolViolation};
use gpuwire_transport::ChannelSink;

use crate::error::ClientError;

/// Turns proxy calls into records on the outbound channel.
/// Records accumulate in the channel until [`CommandEncoder::flush`].
pub struct CommandEncoder {
    sink: Box<dyn ChannelSink + Send>,
    compression_threshold: usize,
    records: u64,
    bytes: u64,
}

impl CommandEncoder {
    pub fn new(sink: Box<dyn ChannelSink + Send>, compression_threshold: usize) -> Self {
        Self {
            sink,
            compression_threshold,
            records: 0,
            bytes: 0,
        }
    }

    /// Append one record. On failure nothing is appended.
    pub fn encode(&mut self, command: &Command) -> Result<usize, ClientError> {
        let record = wire::encode_command(command, self.compression_threshold)
            .map_err(ProtocolViolation::from)?;
        self.sink.write(&record)?;
        self.records += 1;
        self.bytes += record.len() as u64;
        trace!(opcode = ?command.opcode(), bytes = record.len(), "encoded");
        Ok(record.len())
    }

    pub fn flush(&mut self) -> Result<(), ClientError> {
        Ok(self.sink.flush()?)
    }

    /// Bytes written since the last flush.
    pub fn buffered(&self) -> usize {
        self.sink.buffered()
    }

    pub fn records_encoded(&self) -> u64 {
        self.records
    }

    pub fn bytes_encoded(&self) -> u64 {
        self.bytes
    }
}
