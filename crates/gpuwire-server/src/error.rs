use gpuwire_protocol::ProtocolViolation;
use gpuwire_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    #[error("transport error: {0}")]
    Transport(TransportError),

    #[error("session closed: {0}")]
    SessionClosed(String),
}

impl From<TransportError> for ServerError {
    fn from(e: TransportError) -> Self {
        match e.violation() {
            Some(violation) => ServerError::Protocol(violation),
            None => ServerError::Transport(e),
        }
    }
}
