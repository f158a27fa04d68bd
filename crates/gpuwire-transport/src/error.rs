#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire format error: {0}")]
    Wire(#[from] gpuwire_protocol::wire::WireError),

    #[error("capacity exceeded: {size} byte record, {available} of {capacity} bytes available")]
    CapacityExceeded {
        size: usize,
        available: usize,
        capacity: usize,
    },

    #[error("channel closed")]
    Closed,
}

impl TransportError {
    /// Capacity exhaustion breaks the wire contract and is fatal to a
    /// session; every other transport failure is reported as-is.
    pub fn violation(&self) -> Option<gpuwire_protocol::ProtocolViolation> {
        match self {
            TransportError::CapacityExceeded { size, available, capacity } => {
                Some(gpuwire_protocol::ProtocolViolation::CapacityExceeded {
                    size: *size,
                    available: *available,
                    capacity: *capacity,
                })
            }
            _ => None,
        }
    }
}
