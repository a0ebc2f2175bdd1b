use thiserror::Error;

/// Failures inside the relay core. None of these are reported to clients;
/// the only visible effect is a closed connection.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A frame was not a valid envelope
    #[error("invalid envelope: {0}")]
    Codec(#[from] serde_json::Error),

    /// Reading from or writing to a connection's socket failed
    #[error("transport error: {0}")]
    Transport(String),

    /// The router task is gone, usually because the process is shutting down
    #[error("session hub is not running")]
    HubClosed,
}
