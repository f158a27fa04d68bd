//! Ordered, explicitly flushed, capacity-bounded byte channels.
//!
//! A channel has two halves. The writer buffers records until `flush`,
//! which hands the buffered batch to the reader as one unit. Capacity
//! bounds every byte in flight: buffered on the writer plus flushed but not
//! yet polled by the reader. Nothing blocks; a peer that never drains its
//! inbound side eventually makes the writer fail with `CapacityExceeded`.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::TransportError;

/// Write half of the transport contract.
pub trait ChannelSink {
    /// Append one complete record. Never writes part of a record.
    fn write(&mut self, record: &[u8]) -> Result<(), TransportError>;

    /// Make everything written so far visible to the peer.
    fn flush(&mut self) -> Result<(), TransportError>;

    /// Bytes written but not yet flushed.
    fn buffered(&self) -> usize;
}

/// Read half of the transport contract.
pub trait ChannelSource {
    /// Take the next flushed batch, or `None` if nothing is pending.
    /// A batch always holds whole records in issuance order.
    fn poll_incoming(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

struct Shared {
    delivered: VecDeque<Vec<u8>>,
    delivered_bytes: usize,
    writer_closed: bool,
    reader_closed: bool,
}

/// Create an in-process channel that holds at most `capacity` bytes in flight.
pub fn memory_channel(capacity: usize) -> (ChannelWriter, ChannelReader) {
    let shared = Arc::new(Mutex::new(Shared {
        delivered: VecDeque::new(),
        delivered_bytes: 0,
        writer_closed: false,
        reader_closed: false,
    }));
    (
        ChannelWriter {
            shared: shared.clone(),
            pending: Vec::new(),
            capacity,
        },
        ChannelReader { shared },
    )
}

pub struct ChannelWriter {
    shared: Arc<Mutex<Shared>>,
    pending: Vec<u8>,
    capacity: usize,
}

impl ChannelWriter {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes flushed to the reader that it has not polled yet.
    pub fn undelivered(&self) -> usize {
        self.shared.lock().delivered_bytes
    }
}

impl ChannelSink for ChannelWriter {
    fn write(&mut self, record: &[u8]) -> Result<(), TransportError> {
        let shared = self.shared.lock();
        if shared.reader_closed {
            return Err(TransportError::Closed);
        }

        let in_flight = self.pending.len() + shared.delivered_bytes;
        let available = self.capacity.saturating_sub(in_flight);
        if record.len() > available {
            return Err(TransportError::CapacityExceeded {
                size: record.len(),
                available,
                capacity: self.capacity,
            });
        }
        drop(shared);

        self.pending.extend_from_slice(record);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut shared = self.shared.lock();
        if shared.reader_closed {
            return Err(TransportError::Closed);
        }
        let batch = std::mem::take(&mut self.pending);
        trace!(bytes = batch.len(), "flushing batch");
        shared.delivered_bytes += batch.len();
        shared.delivered.push_back(batch);
        Ok(())
    }

    fn buffered(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.shared.lock().writer_closed = true;
    }
}

pub struct ChannelReader {
    shared: Arc<Mutex<Shared>>,
}

impl ChannelReader {
    /// True once the writer is gone and every flushed batch has been polled.
    pub fn is_closed(&self) -> bool {
        let shared = self.shared.lock();
        shared.writer_closed && shared.delivered.is_empty()
    }
}

impl ChannelSource for ChannelReader {
    fn poll_incoming(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut shared = self.shared.lock();
        let batch = shared.delivered.pop_front();
        if let Some(ref b) = batch {
            shared.delivered_bytes -= b.len();
        }
        Ok(batch)
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        self.shared.lock().reader_closed = true;
    }
}
