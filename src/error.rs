use std::time::Duration;
use thiserror::Error;

/// Frame-level decode failure. Always recovered locally: the frame is dropped
/// and the session continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed frame payload: {0}")]
    Malformed(String),

    #[error("sample rate mismatch: expected {expected} Hz, frame declared {declared} Hz")]
    FormatMismatch { expected: u32, declared: u32 },
}

/// Errors surfaced by the bridge components.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("engine send buffer saturated")]
    Backpressure,

    #[error("speech engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("speech engine closed the connection: {0}")]
    EngineClosed(String),

    #[error("caller transport disconnected")]
    TransportDisconnected,

    #[error("no start message within {0:?}")]
    SetupTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("collaborator call failed: {0}")]
    Collaborator(String),
}

impl BridgeError {
    /// Connection-level errors end the session; frame-level ones do not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BridgeError::Decode(_) | BridgeError::Backpressure | BridgeError::Protocol(_)
        )
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
