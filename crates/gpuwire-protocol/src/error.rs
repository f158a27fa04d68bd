use crate::handle::{ObjectHandle, ObjectType};
use crate::wire::WireError;

/// A fatal breach of the wire contract. Either endpoint that observes one
/// terminates its session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("invalid handle: {0}")]
    InvalidHandle(ObjectHandle),

    #[error("type mismatch: {handle} used where {expected} was expected")]
    TypeMismatch {
        handle: ObjectHandle,
        expected: ObjectType,
    },

    #[error("duplicate identity: {0}")]
    DuplicateIdentity(ObjectHandle),

    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error("capacity exceeded: {size} byte record, {available} of {capacity} bytes available")]
    CapacityExceeded {
        size: usize,
        available: usize,
        capacity: usize,
    },

    #[error("{0} cannot be destroyed over the wire")]
    Indestructible(ObjectHandle),
}

impl From<WireError> for ProtocolViolation {
    fn from(e: WireError) -> Self {
        match e {
            WireError::UnknownOpcode(raw) => ProtocolViolation::UnknownOpcode(raw),
            other => ProtocolViolation::Malformed(other.to_string()),
        }
    }
}
