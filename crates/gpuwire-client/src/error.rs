use gpuwire_protocol::ProtocolViolation;
use gpuwire_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A local precondition failed; nothing was sent.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("builder already finalized")]
    BuilderFinalized,

    #[error("builder is invalid: {0}")]
    InvalidBuilder(String),

    #[error("session closed: {0}")]
    SessionClosed(String),

    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e.violation() {
            Some(violation) => ClientError::Protocol(violation),
            None => ClientError::Transport(e),
        }
    }
}
