//! Core functionality for the Neurocalm agent.
//!
//! This module contains:
//! - The metrics pipeline deriving BPM, HRV proxy, and stress level
//! - The rolling window of BPM samples used for charting
//! - Alert throttling for high-stress notifications and nudges

pub mod alerts;
pub mod metrics;
pub mod window;

// Re-export commonly used types
pub use alerts::{AlertEvent, AlertPhase, AlertThrottle, AlertThrottleState};
pub use metrics::{
    hrv_proxy, BeatPulse, MetricsPipeline, MetricsSnapshot, PipelineOutput, StressLevel,
};
pub use window::{RollingWindow, WindowSample, DEFAULT_WINDOW_CAPACITY};
