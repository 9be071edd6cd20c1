//! Throttling of high-stress alerts.
//!
//! Two independent timescales run off the snapshot stream:
//!
//! - **Nudge**: fires once when stress has been `High` continuously for the
//!   sustain threshold (5 s). A blip shorter than that never nudges, and a
//!   nudge re-arms only after stress leaves `High` and comes back.
//! - **Notify**: fires when stress is `High` while connected and no
//!   notification went out within the cooldown (60 s). The cooldown keeps
//!   running even if stress drops in between.
//!
//! All times are passed in, so the throttle is deterministic under test.

use crate::config::AlertConfig;
use crate::core::metrics::{MetricsSnapshot, StressLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const NOTIFY_TITLE: &str = "High Stress Detected";
pub const NUDGE_MESSAGE: &str =
    "I'm detecting high stress levels. Consider taking a 2-minute breathing break.";

/// User-facing alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertEvent {
    /// Rate-limited notification for ongoing high stress
    Notify {
        title: String,
        body: String,
        bpm: u32,
        at: DateTime<Utc>,
    },
    /// One-shot coping suggestion for a sustained episode
    Nudge {
        message: String,
        bpm: u32,
        at: DateTime<Utc>,
    },
}

impl AlertEvent {
    fn notify(bpm: u32, at: DateTime<Utc>) -> Self {
        AlertEvent::Notify {
            title: NOTIFY_TITLE.to_string(),
            body: format!("BPM is {bpm}. Take a moment to breathe."),
            bpm,
            at,
        }
    }

    fn nudge(bpm: u32, at: DateTime<Utc>) -> Self {
        AlertEvent::Nudge {
            message: NUDGE_MESSAGE.to_string(),
            bpm,
            at,
        }
    }

    pub fn is_notify(&self) -> bool {
        matches!(self, AlertEvent::Notify { .. })
    }

    pub fn is_nudge(&self) -> bool {
        matches!(self, AlertEvent::Nudge { .. })
    }
}

/// Coarse view of what the throttle is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertPhase {
    /// Not high, no cooldown running
    Idle,
    /// Notification cooldown running (stress may or may not still be high)
    Cooling,
    /// High episode in progress, nudge not yet fired
    Sustaining,
}

/// Mutable throttle state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertThrottleState {
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Set when the current episode has nudged; cleared when the episode ends
    pub last_nudge_at: Option<DateTime<Utc>>,
    pub sustained_high_since: Option<DateTime<Utc>>,
}

/// Stateful gate between the metrics pipeline and the presentation layer.
#[derive(Debug, Clone)]
pub struct AlertThrottle {
    config: AlertConfig,
    state: AlertThrottleState,
    /// Most recent bpm seen during the current high episode
    episode_bpm: u32,
}

impl AlertThrottle {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            state: AlertThrottleState::default(),
            episode_bpm: 0,
        }
    }

    /// Feed a freshly published snapshot.
    pub fn observe(
        &mut self,
        snapshot: &MetricsSnapshot,
        connected: bool,
        now: DateTime<Utc>,
    ) -> Vec<AlertEvent> {
        if snapshot.stress_level != StressLevel::High {
            if self.state.sustained_high_since.take().is_some() {
                tracing::debug!("High-stress episode ended");
            }
            self.state.last_nudge_at = None;
            return Vec::new();
        }

        if self.state.sustained_high_since.is_none() {
            tracing::debug!(bpm = snapshot.bpm, "High-stress episode started");
            self.state.sustained_high_since = Some(now);
        }
        self.episode_bpm = snapshot.bpm;

        self.poll(connected, now)
    }

    /// Re-evaluate timers without a new snapshot.
    ///
    /// Lets a sustained episode nudge on time even if the sensor goes quiet.
    pub fn poll(&mut self, connected: bool, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let Some(since) = self.state.sustained_high_since else {
            return Vec::new();
        };

        let mut alerts = Vec::new();

        if connected && self.cooldown_elapsed(now) {
            self.state.last_notified_at = Some(now);
            alerts.push(AlertEvent::notify(self.episode_bpm, now));
        }

        if self.state.last_nudge_at.is_none()
            && elapsed_at_least(since, now, self.config.sustain_threshold)
        {
            self.state.last_nudge_at = Some(now);
            alerts.push(AlertEvent::nudge(self.episode_bpm, now));
        }

        alerts
    }

    /// Forget everything, including the notification cooldown.
    pub fn reset(&mut self) {
        self.state = AlertThrottleState::default();
        self.episode_bpm = 0;
    }

    pub fn phase(&self, now: DateTime<Utc>) -> AlertPhase {
        if self.state.sustained_high_since.is_some() && self.state.last_nudge_at.is_none() {
            AlertPhase::Sustaining
        } else if !self.cooldown_elapsed(now) {
            AlertPhase::Cooling
        } else {
            AlertPhase::Idle
        }
    }

    pub fn state(&self) -> &AlertThrottleState {
        &self.state
    }

    fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.state.last_notified_at {
            Some(last) => elapsed_at_least(last, now, self.config.notify_cooldown),
            None => true,
        }
    }
}

impl Default for AlertThrottle {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

/// `now - since >= threshold`; a clock that went backwards counts as not elapsed.
fn elapsed_at_least(since: DateTime<Utc>, now: DateTime<Utc>, threshold: Duration) -> bool {
    (now - since)
        .to_std()
        .map(|elapsed| elapsed >= threshold)
        .unwrap_or(false)
}
