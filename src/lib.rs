//! Neurocalm Agent - Heart-rate telemetry and stress feedback.
//!
//! This library ingests a line-oriented heart-rate stream from a sensor
//! board (or a built-in simulator), derives a coarse stress level from it,
//! and raises throttled high-stress alerts.
//!
//! # Guarantees
//!
//! - **One source**: at most one producer feeds the pipeline at a time
//! - **Clean stops**: no event from a stopped source is ever applied
//! - **Tolerant input**: malformed lines are dropped, never fatal
//! - **Bounded memory**: the chart window and the framer buffer are capped
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Neurocalm Agent                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Transport  │──▶│   Framer    │──▶│   Decoder   │       │
//! │  │(serial/file)│   │   (lines)   │   │  (events)   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │  ┌─────────────┐                            │              │
//! │  │  Simulator  │────────────────────────────┤              │
//! │  └─────────────┘                            ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Alerts    │◀──│   Metrics   │──▶│   Rolling   │       │
//! │  │ (throttle)  │   │  Pipeline   │   │   Window    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use neurocalm_agent::{Config, ConnectionLifecycle};
//!
//! # async fn demo() -> Result<(), neurocalm_agent::TelemetryError> {
//! let lifecycle = ConnectionLifecycle::new(Config::default());
//! lifecycle.activate_simulation().await?;
//!
//! let mut snapshots = lifecycle.subscribe_snapshots();
//! while snapshots.changed().await.is_ok() {
//!     let snapshot = *snapshots.borrow();
//!     println!("{} BPM ({})", snapshot.bpm, snapshot.stress_level);
//! }
//! # Ok(())
//! # }
//! ```

pub mod coach;
pub mod config;
pub mod core;
pub mod error;
pub mod lifecycle;
pub mod session;
pub mod telemetry;

// Re-export key types at crate root for convenience
pub use config::{AlertConfig, Config, ConfigError, SerialConfig};
pub use core::{AlertEvent, BeatPulse, MetricsPipeline, MetricsSnapshot, StressLevel, WindowSample};
pub use error::{TelemetryError, TelemetryResult};
pub use lifecycle::ConnectionLifecycle;
pub use session::{SessionStats, SharedSessionLog};
pub use telemetry::{ConnectionState, SourceKind, TelemetryEvent, Transport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice shown alongside derived metrics.
pub const WELLNESS_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║                  NEUROCALM AGENT - WELLNESS NOTICE               ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  Neurocalm turns a heart-rate stream into simple stress cues.    ║
║                                                                  ║
║  ✓ WHAT IT SHOWS:                                                ║
║    • Heart rate as reported by your sensor (BPM)                 ║
║    • A stress level derived from BPM alone                       ║
║    • An HRV proxy computed from BPM                              ║
║                                                                  ║
║  ✗ WHAT IT IS NOT:                                               ║
║    • The HRV proxy is not a heart-rate-variability measurement   ║
║    • Nothing here is a medical device or diagnosis               ║
║                                                                  ║
║  All data stays on this machine and is discarded when the        ║
║  session ends.                                                   ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
