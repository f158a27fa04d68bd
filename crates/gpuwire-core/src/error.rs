use gpuwire_protocol::{ObjectHandle, ObjectType, ProtocolViolation};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("handle not found: {0}")]
    HandleNotFound(ObjectHandle),

    #[error("duplicate handle: {0}")]
    DuplicateHandle(ObjectHandle),

    #[error("type mismatch: {handle} used where {expected} was expected")]
    TypeMismatch {
        handle: ObjectHandle,
        expected: ObjectType,
    },

    #[error("no identities left for {0}")]
    IdentitiesExhausted(ObjectType),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for ProtocolViolation {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::HandleNotFound(handle) => ProtocolViolation::InvalidHandle(handle),
            CoreError::DuplicateHandle(handle) => ProtocolViolation::DuplicateIdentity(handle),
            CoreError::TypeMismatch { handle, expected } => {
                ProtocolViolation::TypeMismatch { handle, expected }
            }
            other => ProtocolViolation::Malformed(other.to_string()),
        }
    }
}
