//! Connection lifecycle for the telemetry source.
//!
//! The lifecycle decides which producer (sensor transport or simulator)
//! feeds the metrics pipeline and publishes everything the presentation
//! layer consumes:
//!
//! ```text
//!   Disconnected ──activate_hardware──▶ Connecting ──open ok──▶ Streaming(Hardware)
//!        ▲  ▲                               │  │                       │
//!        │  └────── user cancelled ─────────┘  └── open failed ──▶ Error(reason)
//!        │                                                            │
//!        └──── end of stream / deactivate ◀───────────────────────────┘
//!
//!   any state ──activate_simulation──▶ Streaming(Simulated) ──deactivate──▶ Disconnected
//! ```
//!
//! At most one producer is active. The pipeline and the active-source slot
//! live behind one lock; producers check their session is still current
//! under that lock before applying anything, so no event from a stopped
//! source can land after the reset.

use crate::config::Config;
use crate::core::alerts::{AlertEvent, AlertPhase};
use crate::core::metrics::{BeatPulse, MetricsPipeline, MetricsSnapshot, PipelineOutput};
use crate::core::window::WindowSample;
use crate::error::{TelemetryError, TelemetryResult};
use crate::session::{create_shared_log, SessionStats, SharedSessionLog};
use crate::telemetry::framer::LineFramer;
use crate::telemetry::protocol::decode;
use crate::telemetry::simulator::Simulator;
use crate::telemetry::transport::Transport;
use crate::telemetry::types::{ConnectionState, SourceKind, TelemetryEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How often alert timers are re-evaluated while a sensor is quiet.
const ALERT_TICK: Duration = Duration::from_millis(250);

/// Buffered alerts/beats per subscriber before the slowest one lags.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// The producer currently owning the pipeline.
struct ActiveSource {
    id: Uuid,
    kind: SourceKind,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct Engine {
    pipeline: MetricsPipeline,
    active: Option<ActiveSource>,
}

impl Engine {
    fn is_current(&self, id: Uuid) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.id == id && !a.cancel.is_cancelled())
    }
}

/// State shared between the lifecycle handle and its producer tasks.
struct Shared {
    engine: Mutex<Engine>,
    state_tx: watch::Sender<ConnectionState>,
    snapshot_tx: watch::Sender<MetricsSnapshot>,
    alert_tx: broadcast::Sender<AlertEvent>,
    beat_tx: broadcast::Sender<BeatPulse>,
    log: SharedSessionLog,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state.clone());
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn publish(&self, output: PipelineOutput) {
        self.log.record_output(&output);

        if let Some(snapshot) = output.snapshot {
            self.snapshot_tx.send_replace(snapshot);
        }
        if let Some(beat) = output.beat {
            // No subscribers is fine; the beat is transient.
            let _ = self.beat_tx.send(beat);
        }
        self.publish_alerts(output.alerts);
    }

    fn publish_alerts(&self, alerts: Vec<AlertEvent>) {
        for alert in alerts {
            match &alert {
                AlertEvent::Notify { bpm, .. } => tracing::info!(bpm, "High stress notification"),
                AlertEvent::Nudge { bpm, .. } => tracing::info!(bpm, "Sustained stress nudge"),
            }
            let _ = self.alert_tx.send(alert);
        }
    }

    /// Apply events for session `id`, in order.
    ///
    /// Returns false once that session is no longer the active one.
    fn ingest(&self, id: Uuid, events: &[TelemetryEvent], at: DateTime<Utc>) -> bool {
        let mut engine = self.engine.lock();
        if !engine.is_current(id) {
            return false;
        }
        self.apply_locked(&mut engine, events, at);
        true
    }

    /// Decode and apply one framed record for session `id`.
    fn ingest_record(&self, id: Uuid, record: &str, at: DateTime<Utc>) -> bool {
        let mut engine = self.engine.lock();
        if !engine.is_current(id) {
            return false;
        }

        let events = decode(record);
        self.log.record_line(!events.is_empty());
        if events.is_empty() {
            tracing::trace!(record, "Ignoring unrecognised line");
        }
        self.apply_locked(&mut engine, &events, at);
        true
    }

    fn apply_locked(&self, engine: &mut Engine, events: &[TelemetryEvent], at: DateTime<Utc>) {
        for event in events {
            match *event {
                TelemetryEvent::BpmReading(_) => self.log.record_reading(),
                TelemetryEvent::ActuatorState(on) if on != engine.pipeline.snapshot().actuator_on => {
                    self.log.record_actuator_change()
                }
                _ => {}
            }
            let output = engine.pipeline.apply(*event, at);
            self.publish(output);
        }
    }

    /// Re-evaluate alert timers for session `id`.
    fn tick(&self, id: Uuid, now: DateTime<Utc>) -> bool {
        let mut engine = self.engine.lock();
        if !engine.is_current(id) {
            return false;
        }
        let alerts = engine.pipeline.tick(now);
        self.log.record_alerts(&alerts);
        self.publish_alerts(alerts);
        true
    }

    /// Stop the active source (if any) and reset everything it produced.
    ///
    /// The source's task is handed back so the caller can wait for it
    /// outside the lock.
    fn teardown_locked(
        &self,
        engine: &mut Engine,
        end_state: ConnectionState,
    ) -> Option<ActiveSource> {
        let active = engine.active.take()?;
        active.cancel.cancel();

        engine.pipeline.reset(Utc::now());
        self.snapshot_tx.send_replace(engine.pipeline.snapshot());
        self.set_state(end_state);
        Some(active)
    }

    /// End session `id` from inside its own producer.
    fn finish_session(&self, id: Uuid, end_state: ConnectionState) {
        let mut engine = self.engine.lock();
        if engine.active.as_ref().is_some_and(|a| a.id == id) {
            // Dropping our own join handle just detaches the task.
            let _ = self.teardown_locked(&mut engine, end_state);
        }
    }

    /// Claim the pipeline for a new source, returning the one it displaced.
    fn install(
        &self,
        engine: &mut Engine,
        source: ActiveSource,
        state: ConnectionState,
    ) -> Option<ActiveSource> {
        let previous = self.teardown_locked(engine, ConnectionState::Disconnected);
        engine.active = Some(source);
        self.set_state(state);
        previous
    }

    fn attach_task(&self, id: Uuid, task: JoinHandle<()>) {
        let mut engine = self.engine.lock();
        match engine.active.as_mut() {
            Some(active) if active.id == id => active.task = Some(task),
            // Torn down before the task was attached; it exits on its own token.
            _ => {}
        }
    }
}

/// Wait for a displaced source to finish releasing its resources.
async fn join_source(source: Option<ActiveSource>) {
    let Some(source) = source else {
        return;
    };
    source.cancel.cancel();

    if let Some(task) = source.task {
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!(source = %source.kind, "Telemetry task panicked");
            }
        }
    }
}

/// Why a hardware pump stopped.
enum PumpOutcome {
    EndOfStream,
    Cancelled,
    Failed(TelemetryError),
}

/// Read the transport until it ends, fails, or the session is cancelled.
async fn pump<T: Transport>(
    shared: Arc<Shared>,
    id: Uuid,
    cancel: CancellationToken,
    mut transport: T,
    mut framer: LineFramer,
) {
    let mut ticker = tokio::time::interval(ALERT_TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break PumpOutcome::Cancelled,

            _ = ticker.tick() => {
                if !shared.tick(id, Utc::now()) {
                    break PumpOutcome::Cancelled;
                }
            }

            chunk = transport.next_chunk() => match chunk {
                Ok(Some(chunk)) => match framer.push(&chunk) {
                    Ok(records) => {
                        let mut current = true;
                        for record in records {
                            if !shared.ingest_record(id, &record, Utc::now()) {
                                current = false;
                                break;
                            }
                        }
                        if !current {
                            break PumpOutcome::Cancelled;
                        }
                    }
                    Err(e) => break PumpOutcome::Failed(e),
                },
                Ok(None) => break PumpOutcome::EndOfStream,
                Err(e) => break PumpOutcome::Failed(e),
            }
        }
    };

    if matches!(outcome, PumpOutcome::EndOfStream) {
        if let Some(rest) = framer.finish() {
            shared.ingest_record(id, &rest, Utc::now());
        }
    }

    if let Err(e) = transport.close().await {
        tracing::warn!(error = %e, "Failed to close transport");
    }

    match outcome {
        PumpOutcome::EndOfStream => {
            tracing::info!("Sensor stream ended");
            shared.finish_session(id, ConnectionState::Disconnected);
        }
        PumpOutcome::Failed(e) => {
            tracing::error!(error = %e, "Telemetry session failed");
            shared.finish_session(id, ConnectionState::Error(e.to_string()));
        }
        PumpOutcome::Cancelled => tracing::debug!("Telemetry pump stopped"),
    }
}

/// Owner of the single telemetry connection.
pub struct ConnectionLifecycle {
    config: Config,
    shared: Arc<Shared>,
}

impl ConnectionLifecycle {
    pub fn new(config: Config) -> Self {
        let pipeline = MetricsPipeline::from_config(&config);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (snapshot_tx, _) = watch::channel(pipeline.snapshot());
        let (alert_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (beat_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            shared: Arc::new(Shared {
                engine: Mutex::new(Engine {
                    pipeline,
                    active: None,
                }),
                state_tx,
                snapshot_tx,
                alert_tx,
                beat_tx,
                log: create_shared_log(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connect to a sensor over `transport` and start streaming from it.
    ///
    /// Returns once the transport is open and the pump is running, or once
    /// the attempt has failed or been cancelled. A user cancellation (from
    /// the transport or a concurrent [`deactivate`](Self::deactivate)) is
    /// not an error.
    pub async fn activate_hardware<T>(&self, mut transport: T) -> TelemetryResult<()>
    where
        T: Transport + 'static,
    {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let previous = {
            let mut engine = self.shared.engine.lock();
            if let Some(active) = engine.active.as_ref() {
                if active.kind == SourceKind::Hardware {
                    return Err(TelemetryError::AlreadyActive(SourceKind::Hardware));
                }
            }
            let source = ActiveSource {
                id,
                kind: SourceKind::Hardware,
                cancel: cancel.clone(),
                task: None,
            };
            self.shared.install(&mut engine, source, ConnectionState::Connecting)
        };
        join_source(previous).await;

        tracing::info!(transport = %transport.describe(), "Connecting to sensor");
        let opened = tokio::select! {
            biased;

            _ = cancel.cancelled() => None,
            result = transport.open() => Some(result),
        };

        match opened {
            None => {
                tracing::info!("Connection attempt abandoned");
                Ok(())
            }
            Some(Err(TelemetryError::Cancelled)) => {
                tracing::info!("User cancelled sensor connection");
                self.shared.finish_session(id, ConnectionState::Disconnected);
                Ok(())
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "Failed to open transport");
                self.shared
                    .finish_session(id, ConnectionState::Error(e.to_string()));
                Err(e)
            }
            Some(Ok(())) => {
                let still_current = {
                    let mut engine = self.shared.engine.lock();
                    if engine.is_current(id) {
                        engine.pipeline.set_connected(true);
                        self.shared.log.begin(id);
                        self.shared
                            .set_state(ConnectionState::Streaming(SourceKind::Hardware));
                        true
                    } else {
                        false
                    }
                };

                if !still_current {
                    if let Err(e) = transport.close().await {
                        tracing::warn!(error = %e, "Failed to close abandoned transport");
                    }
                    return Ok(());
                }

                let framer = LineFramer::with_limit(self.config.record_limit());
                let task = tokio::spawn(pump(
                    Arc::clone(&self.shared),
                    id,
                    cancel,
                    transport,
                    framer,
                ));
                self.shared.attach_task(id, task);
                Ok(())
            }
        }
    }

    /// Start the simulated sensor, stopping any other source first.
    ///
    /// Idempotent while the simulator is already running.
    pub async fn activate_simulation(&self) -> TelemetryResult<()> {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let previous = {
            let mut engine = self.shared.engine.lock();
            if engine
                .active
                .as_ref()
                .is_some_and(|a| a.kind == SourceKind::Simulated)
            {
                tracing::debug!("Simulator already running");
                return Ok(());
            }
            let source = ActiveSource {
                id,
                kind: SourceKind::Simulated,
                cancel: cancel.clone(),
                task: None,
            };
            let previous = self.shared.install(
                &mut engine,
                source,
                ConnectionState::Streaming(SourceKind::Simulated),
            );
            engine.pipeline.set_connected(true);
            self.shared.log.begin(id);
            previous
        };
        join_source(previous).await;

        let shared = Arc::clone(&self.shared);
        let simulator = Simulator::new(self.config.simulation_period);
        let task = tokio::spawn(simulator.run(cancel, move |events| {
            shared.ingest(id, events, Utc::now())
        }));
        self.shared.attach_task(id, task);

        tracing::info!(
            period_ms = self.config.simulation_period.as_millis() as u64,
            "Simulator started"
        );
        Ok(())
    }

    /// Stop whichever source is active and return to `Disconnected`.
    ///
    /// Cancels a pending connection attempt silently. Clears an `Error`
    /// state. Returns after the source has released its resources.
    pub async fn deactivate(&self) {
        let previous = {
            let mut engine = self.shared.engine.lock();
            let previous = self
                .shared
                .teardown_locked(&mut engine, ConnectionState::Disconnected);
            if previous.is_none() {
                self.shared.set_state(ConnectionState::Disconnected);
            }
            previous
        };
        join_source(previous).await;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.shared.snapshot_tx.borrow()
    }

    /// Charted history, oldest first.
    pub fn window(&self) -> Vec<WindowSample> {
        self.shared.engine.lock().pipeline.window().snapshot()
    }

    /// Whether the beat indicator is currently lit.
    pub fn beat_active(&self) -> bool {
        self.shared.engine.lock().pipeline.beat_active(Utc::now())
    }

    pub fn alert_phase(&self) -> AlertPhase {
        self.shared
            .engine
            .lock()
            .pipeline
            .throttle()
            .phase(Utc::now())
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<MetricsSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.shared.alert_tx.subscribe()
    }

    pub fn subscribe_beats(&self) -> broadcast::Receiver<BeatPulse> {
        self.shared.beat_tx.subscribe()
    }

    /// Counters for the current (or most recent) session.
    pub fn stats(&self) -> SessionStats {
        self.shared.log.stats()
    }

    pub fn session_log(&self) -> SharedSessionLog {
        Arc::clone(&self.shared.log)
    }
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Drop for ConnectionLifecycle {
    fn drop(&mut self) {
        // Producers hold their own Arc<Shared>; cancel them so they exit.
        if let Some(active) = self.shared.engine.lock().active.as_ref() {
            active.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::StressLevel;
    use crate::telemetry::transport::ChannelTransport;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let lifecycle = ConnectionLifecycle::default();
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
        assert_eq!(lifecycle.snapshot().bpm, 0);
        assert!(lifecycle.window().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_streams_and_resets() {
        let lifecycle = ConnectionLifecycle::default();
        lifecycle.activate_simulation().await.unwrap();
        assert_eq!(
            lifecycle.state(),
            ConnectionState::Streaming(SourceKind::Simulated)
        );

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(lifecycle.window().len(), 3);
        let bpm = lifecycle.snapshot().bpm;
        assert!((69..=81).contains(&bpm), "bpm {bpm}");

        lifecycle.deactivate().await;
        assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
        assert!(lifecycle.window().is_empty());
        assert_eq!(lifecycle.snapshot().bpm, 0);
        assert_eq!(lifecycle.snapshot().stress_level, StressLevel::Low);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(lifecycle.window().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reactivated_simulation_restarts_from_seed() {
        let lifecycle = ConnectionLifecycle::default();
        for _ in 0..3 {
            lifecycle.activate_simulation().await.unwrap();
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let first = lifecycle.window()[0].bpm;
            assert!((73.0..=77.0).contains(&first), "first reading {first}");
            lifecycle.deactivate().await;
        }
    }

    #[tokio::test]
    async fn test_hardware_pumps_records() {
        let lifecycle = ConnectionLifecycle::default();
        let (transport, sender) = ChannelTransport::pair(8);
        lifecycle.activate_hardware(transport).await.unwrap();
        assert_eq!(
            lifecycle.state(),
            ConnectionState::Streaming(SourceKind::Hardware)
        );

        let mut snapshots = lifecycle.subscribe_snapshots();
        sender.send("BPM:9").await;
        sender.send("0\nBulb ON\nnoise\n").await;
        snapshots.changed().await.unwrap();
        settle().await;

        let snapshot = lifecycle.snapshot();
        assert_eq!(snapshot.bpm, 90);
        assert!(snapshot.actuator_on);
        let stats = lifecycle.stats();
        assert_eq!(stats.records_framed, 3);
        assert_eq!(stats.lines_discarded, 1);
        assert_eq!(stats.readings_accepted, 1);
    }

    #[tokio::test]
    async fn test_beat_and_alert_phase_queries() {
        let config = Config {
            beat_pulse: Duration::from_secs(30),
            ..Config::default()
        };
        let lifecycle = ConnectionLifecycle::new(config);
        let (transport, sender) = ChannelTransport::pair(8);
        lifecycle.activate_hardware(transport).await.unwrap();
        assert!(!lifecycle.beat_active());
        assert_eq!(lifecycle.alert_phase(), AlertPhase::Idle);

        let mut beats = lifecycle.subscribe_beats();
        sender.send("Beat detected!\nBPM:130\n").await;
        beats.recv().await.unwrap();
        settle().await;

        assert!(lifecycle.beat_active());
        assert_eq!(lifecycle.alert_phase(), AlertPhase::Sustaining);

        lifecycle.deactivate().await;
        assert!(!lifecycle.beat_active());
        assert_eq!(lifecycle.alert_phase(), AlertPhase::Idle);
    }

    #[tokio::test]
    async fn test_second_hardware_activation_rejected() {
        let lifecycle = ConnectionLifecycle::default();
        let (transport, _sender) = ChannelTransport::pair(8);
        lifecycle.activate_hardware(transport).await.unwrap();

        let (other, _other_sender) = ChannelTransport::pair(8);
        assert!(matches!(
            lifecycle.activate_hardware(other).await,
            Err(TelemetryError::AlreadyActive(SourceKind::Hardware))
        ));
    }
}
