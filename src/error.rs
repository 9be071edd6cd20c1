//! Error types for the telemetry session.

use crate::telemetry::types::SourceKind;
use thiserror::Error;

/// Result type for telemetry operations
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Errors that end (or refuse to start) a telemetry session.
///
/// Malformed protocol lines never show up here; the decoder drops them.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Framing overflow: {len} bytes buffered without a newline (limit {limit})")]
    FramingOverflow { len: usize, limit: usize },

    /// The user backed out of the connection attempt (e.g. closed the port picker).
    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("{0} source is already active")]
    AlreadyActive(SourceKind),
}

impl From<std::io::Error> for TelemetryError {
    fn from(e: std::io::Error) -> Self {
        TelemetryError::Transport(e.to_string())
    }
}
