//! Event and state types shared by the telemetry producers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One decoded unit of sensor telemetry.
///
/// Transient: produced by the decoder or simulator, folded into the
/// metrics snapshot, then dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Validated pulse reading in beats per minute
    BpmReading(f64),
    /// Momentary heartbeat marker
    BeatPulse,
    /// State of the hardware bulb
    ActuatorState(bool),
}

/// Which producer is feeding the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Hardware,
    Simulated,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Hardware => write!(f, "Hardware"),
            SourceKind::Simulated => write!(f, "Simulated"),
        }
    }
}

/// Process-wide connection status.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Streaming(SourceKind),
    Error(String),
}

impl ConnectionState {
    /// The active source, if any.
    pub fn source(&self) -> Option<SourceKind> {
        match self {
            ConnectionState::Streaming(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, ConnectionState::Streaming(_))
    }

    /// Whether the state is terminal for a session (no producer running).
    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Streaming(kind) => write!(f, "Streaming ({kind})"),
            ConnectionState::Error(reason) => write!(f, "Error: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_queries() {
        assert!(ConnectionState::Disconnected.is_idle());
        assert!(ConnectionState::Error("boom".into()).is_idle());
        assert!(!ConnectionState::Connecting.is_idle());

        let streaming = ConnectionState::Streaming(SourceKind::Simulated);
        assert!(streaming.is_streaming());
        assert_eq!(streaming.source(), Some(SourceKind::Simulated));
        assert_eq!(ConnectionState::Connecting.source(), None);
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(TelemetryEvent::BpmReading(72.0)).unwrap();
        assert_eq!(json["type"], "bpm_reading");
        assert_eq!(json["value"], 72.0);

        let json = serde_json::to_value(ConnectionState::Streaming(SourceKind::Hardware)).unwrap();
        assert_eq!(json["state"], "streaming");
        assert_eq!(json["detail"], "hardware");
    }
}
