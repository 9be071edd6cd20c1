//! Synthetic heart-rate source for demos and tests.
//!
//! Each tick emits a reading from a bounded random walk, the bulb state the
//! firmware would report for it, and a beat marker.

use crate::telemetry::types::TelemetryEvent;
use rand::Rng;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Starting point of every fresh walk.
pub const SEED_BPM: f64 = 75.0;
pub const MIN_SIMULATED_BPM: f64 = 60.0;
pub const MAX_SIMULATED_BPM: f64 = 130.0;
/// Largest step between consecutive readings, in either direction.
pub const MAX_STEP: i32 = 2;
/// The simulated firmware lights the bulb at or above this rate.
pub const ACTUATOR_ON_BPM: f64 = 80.0;

/// Bounded random walk over BPM values.
#[derive(Debug, Clone, Default)]
pub struct RandomWalk {
    previous: Option<f64>,
}

impl RandomWalk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a step and return the new value.
    pub fn step(&mut self, delta: i32) -> f64 {
        let base = self.previous.unwrap_or(SEED_BPM);
        let next = (base + delta as f64).clamp(MIN_SIMULATED_BPM, MAX_SIMULATED_BPM);
        self.previous = Some(next);
        next
    }

    /// Draw a uniform step in `-MAX_STEP..=MAX_STEP` and apply it.
    pub fn next_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> f64 {
        self.step(rng.gen_range(-MAX_STEP..=MAX_STEP))
    }

    pub fn previous(&self) -> Option<f64> {
        self.previous
    }
}

/// Events emitted for one simulated reading.
///
/// The beat indicator toggles every tick, so `beat` is true on every
/// other call and only those ticks carry a pulse.
pub fn tick_events(bpm: f64, beat: bool) -> Vec<TelemetryEvent> {
    let mut events = vec![
        TelemetryEvent::BpmReading(bpm),
        TelemetryEvent::ActuatorState(bpm >= ACTUATOR_ON_BPM),
    ];
    if beat {
        events.push(TelemetryEvent::BeatPulse);
    }
    events
}

/// Periodic event producer.
#[derive(Debug, Clone)]
pub struct Simulator {
    period: Duration,
}

impl Simulator {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Emit ticks until `cancel` fires or `emit` returns false.
    ///
    /// The first tick lands one period after the call. Every activation
    /// starts a new walk from [`SEED_BPM`] with a pulse on the first tick.
    pub async fn run<F>(self, cancel: CancellationToken, mut emit: F)
    where
        F: FnMut(&[TelemetryEvent]) -> bool,
    {
        let mut walk = RandomWalk::new();
        let mut beat = false;
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("Simulator cancelled");
                    break;
                }

                _ = ticker.tick() => {
                    let bpm = walk.next_with(&mut rand::thread_rng());
                    beat = !beat;
                    if !emit(tick_events(bpm, beat).as_slice()) {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_walk_starts_at_seed() {
        let mut walk = RandomWalk::new();
        assert_eq!(walk.previous(), None);
        assert_eq!(walk.step(0), 75.0);
        assert_eq!(walk.step(2), 77.0);
        assert_eq!(walk.step(-2), 75.0);
    }

    #[test]
    fn test_walk_is_clamped() {
        let mut walk = RandomWalk::new();
        for _ in 0..100 {
            walk.step(2);
        }
        assert_eq!(walk.previous(), Some(MAX_SIMULATED_BPM));
        for _ in 0..100 {
            walk.step(-2);
        }
        assert_eq!(walk.previous(), Some(MIN_SIMULATED_BPM));
    }

    #[test]
    fn test_random_steps_stay_bounded() {
        let mut walk = RandomWalk::new();
        let mut rng = rand::thread_rng();
        let mut last = SEED_BPM;
        for _ in 0..1000 {
            let next = walk.next_with(&mut rng);
            assert!((MIN_SIMULATED_BPM..=MAX_SIMULATED_BPM).contains(&next));
            assert!((next - last).abs() <= MAX_STEP as f64);
            last = next;
        }
    }

    #[test]
    fn test_tick_events_follow_reading() {
        assert_eq!(
            tick_events(79.0, true),
            vec![
                TelemetryEvent::BpmReading(79.0),
                TelemetryEvent::ActuatorState(false),
                TelemetryEvent::BeatPulse,
            ]
        );
        assert_eq!(
            tick_events(80.0, false),
            vec![
                TelemetryEvent::BpmReading(80.0),
                TelemetryEvent::ActuatorState(true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let sink = seen.clone();
        let task = tokio::spawn(Simulator::new(Duration::from_millis(1000)).run(
            cancel.clone(),
            move |events| {
                sink.lock().unwrap().extend_from_slice(events);
                true
            },
        ));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancel.cancel();
        task.await.unwrap();

        let events = seen.lock().unwrap().clone();
        // Three ticks, pulses on the first and third only.
        assert_eq!(events.len(), 8);
        let beats = events
            .iter()
            .filter(|e| matches!(e, TelemetryEvent::BeatPulse))
            .count();
        assert_eq!(beats, 2);
        assert_eq!(events[2], TelemetryEvent::BeatPulse);
        assert_eq!(events[7], TelemetryEvent::BeatPulse);
        match events[0] {
            TelemetryEvent::BpmReading(bpm) => assert!((73.0..=77.0).contains(&bpm)),
            other => panic!("unexpected first event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_cancel() {
        let count = Arc::new(Mutex::new(0usize));
        let cancel = CancellationToken::new();
        let sink = count.clone();
        let task = tokio::spawn(Simulator::new(Duration::from_millis(100)).run(
            cancel.clone(),
            move |_| {
                *sink.lock().unwrap() += 1;
                true
            },
        ));

        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        task.await.unwrap();
        let at_cancel = *count.lock().unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*count.lock().unwrap(), at_cancel);
        assert_eq!(at_cancel, 2);
    }
}
