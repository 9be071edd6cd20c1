//! Folding telemetry events into the live metrics snapshot.

use crate::config::{AlertConfig, Config};
use crate::core::alerts::{AlertEvent, AlertThrottle};
use crate::core::window::{RollingWindow, WindowSample, DEFAULT_WINDOW_CAPACITY};
use crate::telemetry::types::TelemetryEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Readings above this are High stress.
pub const HIGH_STRESS_ABOVE_BPM: f64 = 100.0;
/// Readings above this (and not High) are Medium stress.
pub const MEDIUM_STRESS_ABOVE_BPM: f64 = 80.0;

/// Three-tier stress classification derived solely from BPM.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum StressLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl StressLevel {
    /// `bpm > 100` is High, `80 < bpm <= 100` is Medium, anything else Low.
    pub fn classify(bpm: f64) -> Self {
        if bpm > HIGH_STRESS_ABOVE_BPM {
            StressLevel::High
        } else if bpm > MEDIUM_STRESS_ABOVE_BPM {
            StressLevel::Medium
        } else {
            StressLevel::Low
        }
    }

    /// Short advice line for the level.
    pub fn guidance(&self) -> &'static str {
        match self {
            StressLevel::Low => "You are in a relaxed state. Great for creative work.",
            StressLevel::Medium => "Mild engagement detected. Good for focused study.",
            StressLevel::High => "Elevated stress detected. Recommended: Take a short break.",
        }
    }
}

impl fmt::Display for StressLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StressLevel::Low => write!(f, "Low"),
            StressLevel::Medium => write!(f, "Medium"),
            StressLevel::High => write!(f, "High"),
        }
    }
}

/// Synthetic HRV proxy: `max(20, 100 - (bpm - 60) * 1.5)`, floored.
///
/// This is a display heuristic that falls as heart rate rises. It is not
/// a heart-rate-variability measurement and has no medical meaning.
pub fn hrv_proxy(bpm: f64) -> u32 {
    (100.0 - (bpm - 60.0) * 1.5).max(20.0).floor() as u32
}

/// Current derived metrics. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub bpm: u32,
    pub hrv: u32,
    pub stress_level: StressLevel,
    pub actuator_on: bool,
    pub timestamp: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// Snapshot shown before any reading arrives.
    pub fn idle(at: DateTime<Utc>) -> Self {
        Self {
            bpm: 0,
            hrv: 0,
            stress_level: StressLevel::Low,
            actuator_on: false,
            timestamp: at,
        }
    }

    /// Snapshot derived from an accepted reading.
    pub fn from_reading(bpm: f64, actuator_on: bool, at: DateTime<Utc>) -> Self {
        Self {
            bpm: bpm.round().max(0.0) as u32,
            hrv: hrv_proxy(bpm),
            stress_level: StressLevel::classify(bpm),
            actuator_on,
            timestamp: at,
        }
    }

    /// Copy with a different actuator state.
    pub fn with_actuator(&self, actuator_on: bool, at: DateTime<Utc>) -> Self {
        Self {
            actuator_on,
            timestamp: at,
            ..*self
        }
    }
}

/// Momentary heartbeat signal for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatPulse {
    pub at: DateTime<Utc>,
    /// When the indicator should go dark again
    pub clears_at: DateTime<Utc>,
}

/// Everything produced by one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutput {
    /// New snapshot, if the event replaced it
    pub snapshot: Option<MetricsSnapshot>,
    pub beat: Option<BeatPulse>,
    pub alerts: Vec<AlertEvent>,
}

impl PipelineOutput {
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.beat.is_none() && self.alerts.is_empty()
    }
}

/// Single-writer fold of telemetry into snapshot, window, and alerts.
#[derive(Debug, Clone)]
pub struct MetricsPipeline {
    snapshot: MetricsSnapshot,
    window: RollingWindow,
    throttle: AlertThrottle,
    beat_pulse: chrono::Duration,
    beat_until: Option<DateTime<Utc>>,
    connected: bool,
}

impl MetricsPipeline {
    pub fn new(window_capacity: usize, beat_pulse: Duration, alerts: AlertConfig) -> Self {
        Self {
            snapshot: MetricsSnapshot::idle(Utc::now()),
            window: RollingWindow::new(window_capacity),
            throttle: AlertThrottle::new(alerts),
            beat_pulse: chrono::Duration::from_std(beat_pulse)
                .unwrap_or_else(|_| chrono::Duration::milliseconds(150)),
            beat_until: None,
            connected: false,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.window_capacity, config.beat_pulse, config.alerts)
    }

    /// Process one event that arrived at `at`.
    pub fn apply(&mut self, event: TelemetryEvent, at: DateTime<Utc>) -> PipelineOutput {
        match event {
            TelemetryEvent::BpmReading(bpm) => {
                let snapshot = MetricsSnapshot::from_reading(bpm, self.snapshot.actuator_on, at);
                self.snapshot = snapshot;
                self.window.append(WindowSample::new(at, bpm));
                let alerts = self.throttle.observe(&snapshot, self.connected, at);

                PipelineOutput {
                    snapshot: Some(snapshot),
                    beat: None,
                    alerts,
                }
            }
            TelemetryEvent::BeatPulse => {
                let pulse = BeatPulse {
                    at,
                    clears_at: at + self.beat_pulse,
                };
                self.beat_until = Some(pulse.clears_at);

                PipelineOutput {
                    beat: Some(pulse),
                    ..PipelineOutput::default()
                }
            }
            TelemetryEvent::ActuatorState(on) => {
                let snapshot = self.snapshot.with_actuator(on, at);
                self.snapshot = snapshot;

                PipelineOutput {
                    snapshot: Some(snapshot),
                    ..PipelineOutput::default()
                }
            }
        }
    }

    /// Advance alert timers with no new event.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<AlertEvent> {
        self.throttle.poll(self.connected, now)
    }

    /// Return to the idle snapshot with an empty window and fresh timers.
    pub fn reset(&mut self, at: DateTime<Utc>) {
        self.snapshot = MetricsSnapshot::idle(at);
        self.window.clear();
        self.throttle.reset();
        self.beat_until = None;
        self.connected = false;
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.snapshot
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    pub fn throttle(&self) -> &AlertThrottle {
        &self.throttle
    }

    /// Whether the beat indicator is lit at `now`.
    pub fn beat_active(&self, now: DateTime<Utc>) -> bool {
        self.beat_until.is_some_and(|until| now < until)
    }
}

impl Default for MetricsPipeline {
    fn default() -> Self {
        Self::new(
            DEFAULT_WINDOW_CAPACITY,
            Duration::from_millis(150),
            AlertConfig::default(),
        )
    }
}
