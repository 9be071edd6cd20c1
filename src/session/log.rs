//! Per-session telemetry counters.
//!
//! Tracks how much traffic the current session has seen so the user can
//! tell a quiet sensor from a noisy link. Nothing here is persisted.

use crate::core::alerts::AlertEvent;
use crate::core::metrics::PipelineOutput;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Identity of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// Counters for the current session.
#[derive(Debug, Default)]
pub struct SessionLog {
    records_framed: AtomicU64,
    lines_discarded: AtomicU64,
    readings_accepted: AtomicU64,
    beats: AtomicU64,
    actuator_changes: AtomicU64,
    notifications: AtomicU64,
    nudges: AtomicU64,
    session: Mutex<Option<SessionInfo>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the counters and stamp a new session.
    pub fn begin(&self, id: Uuid) -> SessionInfo {
        self.reset();
        let info = SessionInfo {
            id,
            started_at: Utc::now(),
        };
        *self.session.lock() = Some(info);
        info
    }

    /// Record a framed record and whether the decoder kept it.
    pub fn record_line(&self, decoded: bool) {
        self.records_framed.fetch_add(1, Ordering::Relaxed);
        if !decoded {
            self.lines_discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reading(&self) {
        self.readings_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_actuator_change(&self) {
        self.actuator_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the beat and alerts carried by a pipeline output.
    pub fn record_output(&self, output: &PipelineOutput) {
        if output.beat.is_some() {
            self.beats.fetch_add(1, Ordering::Relaxed);
        }
        self.record_alerts(&output.alerts);
    }

    pub fn record_alerts(&self, alerts: &[AlertEvent]) {
        for alert in alerts {
            match alert {
                AlertEvent::Notify { .. } => self.notifications.fetch_add(1, Ordering::Relaxed),
                AlertEvent::Nudge { .. } => self.nudges.fetch_add(1, Ordering::Relaxed),
            };
        }
    }

    pub fn stats(&self) -> SessionStats {
        let session = *self.session.lock();
        SessionStats {
            session_id: session.map(|s| s.id),
            session_start: session.map(|s| s.started_at),
            session_duration_secs: session
                .map(|s| (Utc::now() - s.started_at).num_seconds().max(0) as u64)
                .unwrap_or(0),
            records_framed: self.records_framed.load(Ordering::Relaxed),
            lines_discarded: self.lines_discarded.load(Ordering::Relaxed),
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            beats: self.beats.load(Ordering::Relaxed),
            actuator_changes: self.actuator_changes.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            nudges: self.nudges.load(Ordering::Relaxed),
        }
    }

    /// Summary for display at the end of a session.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Session ID: {}\n\
             - Records framed: {}\n\
             - Lines discarded: {}\n\
             - Readings accepted: {}\n\
             - Beats: {}\n\
             - Bulb changes: {}\n\
             - Notifications: {}\n\
             - Nudges: {}\n\
             - Session duration: {} seconds",
            stats
                .session_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "none".to_string()),
            stats.records_framed,
            stats.lines_discarded,
            stats.readings_accepted,
            stats.beats,
            stats.actuator_changes,
            stats.notifications,
            stats.nudges,
            stats.session_duration_secs
        )
    }

    /// Reset all counters.
    pub fn reset(&self) {
        self.records_framed.store(0, Ordering::Relaxed);
        self.lines_discarded.store(0, Ordering::Relaxed);
        self.readings_accepted.store(0, Ordering::Relaxed);
        self.beats.store(0, Ordering::Relaxed);
        self.actuator_changes.store(0, Ordering::Relaxed);
        self.notifications.store(0, Ordering::Relaxed);
        self.nudges.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of session counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: Option<Uuid>,
    pub session_start: Option<DateTime<Utc>>,
    pub session_duration_secs: u64,
    pub records_framed: u64,
    pub lines_discarded: u64,
    pub readings_accepted: u64,
    pub beats: u64,
    pub actuator_changes: u64,
    pub notifications: u64,
    pub nudges: u64,
}

/// Thread-safe shared session log.
pub type SharedSessionLog = Arc<SessionLog>;

/// Create a new shared session log.
pub fn create_shared_log() -> SharedSessionLog {
    Arc::new(SessionLog::new())
}
