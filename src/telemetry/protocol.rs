//! Decoder for the sensor board's line protocol.
//!
//! | Line pattern              | Event                  |
//! |---------------------------|------------------------|
//! | `BPM:<number>`            | `BpmReading`, if 30 < value < 220 |
//! | contains `Beat detected`  | `BeatPulse`            |
//! | contains `Bulb ON`        | `ActuatorState(true)`  |
//! | contains `Bulb OFF`       | `ActuatorState(false)` |
//! | anything else             | ignored                |
//!
//! The link is best-effort telemetry from a physical sensor, so every
//! malformed or out-of-range line is dropped without surfacing an error.

use crate::telemetry::types::TelemetryEvent;

pub const BPM_PREFIX: &str = "BPM:";
pub const BEAT_MARKER: &str = "Beat detected";
pub const ACTUATOR_ON_MARKER: &str = "Bulb ON";
pub const ACTUATOR_OFF_MARKER: &str = "Bulb OFF";

/// Readings at or below this are treated as electrical noise.
pub const MIN_BPM_EXCLUSIVE: f64 = 30.0;
/// Readings at or above this are treated as disconnect glitches.
pub const MAX_BPM_EXCLUSIVE: f64 = 220.0;

/// Decode one trimmed record.
///
/// Rules are not mutually exclusive; a record matching several of them
/// yields one event per rule, in rule order.
pub fn decode(record: &str) -> Vec<TelemetryEvent> {
    let mut events = Vec::new();

    if record.contains(BEAT_MARKER) {
        events.push(TelemetryEvent::BeatPulse);
    }

    if let Some(bpm) = parse_bpm(record) {
        events.push(TelemetryEvent::BpmReading(bpm));
    }

    if record.contains(ACTUATOR_ON_MARKER) {
        events.push(TelemetryEvent::ActuatorState(true));
    }

    if record.contains(ACTUATOR_OFF_MARKER) {
        events.push(TelemetryEvent::ActuatorState(false));
    }

    events
}

/// Extract an in-range reading from a `BPM:` record.
pub fn parse_bpm(record: &str) -> Option<f64> {
    if !record.starts_with(BPM_PREFIX) {
        return None;
    }

    let (_, remainder) = record.split_once(':')?;
    let value = leading_number(remainder)?;

    (value > MIN_BPM_EXCLUSIVE && value < MAX_BPM_EXCLUSIVE).then_some(value)
}

/// Parse the longest decimal prefix of `s`, ignoring leading whitespace.
///
/// Firmware builds differ in what they print after the number (units,
/// a second field), so only the numeric prefix is significant.
fn leading_number(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }

    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;

    if end < bytes.len() && bytes[end] == b'.' {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if frac_end > frac_start || digits > 0 {
            end = frac_end;
        }
    }

    if digits == 0 {
        return None;
    }

    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse().ok()
}
