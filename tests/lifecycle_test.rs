//! Integration tests for the connection lifecycle

use async_trait::async_trait;
use neurocalm_agent::core::{AlertEvent, StressLevel, DEFAULT_WINDOW_CAPACITY};
use neurocalm_agent::telemetry::{ChannelTransport, ChunkSender};
use neurocalm_agent::{
    Config, ConnectionLifecycle, ConnectionState, SourceKind, TelemetryError, TelemetryResult,
    Transport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Poll until `check` holds, failing the test after [`WAIT`].
async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let result = timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

async fn connect(lifecycle: &ConnectionLifecycle) -> ChunkSender {
    let (transport, sender) = ChannelTransport::pair(16);
    lifecycle
        .activate_hardware(transport)
        .await
        .expect("Failed to activate hardware");
    assert_eq!(
        lifecycle.state(),
        ConnectionState::Streaming(SourceKind::Hardware)
    );
    sender
}

/// Keep sending until the transport reports it has been closed.
async fn wait_closed(sender: &ChunkSender) {
    let result = timeout(WAIT, async {
        while sender.send("noise\n").await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "transport was never closed");
}

#[tokio::test]
async fn test_end_to_end_sequence() {
    let lifecycle = ConnectionLifecycle::default();
    let mut alerts = lifecycle.subscribe_alerts();
    let sender = connect(&lifecycle).await;

    // Split mid-record on purpose.
    sender.send("BPM:72\nBeat det").await;
    sender.send("ected!\nBPM:85\nBulb ON\nBPM:1").await;
    sender.send("12\n").await;

    wait_until("three readings", || lifecycle.window().len() == 3).await;

    let levels: Vec<StressLevel> = lifecycle
        .window()
        .iter()
        .map(|s| StressLevel::classify(s.bpm))
        .collect();
    assert_eq!(
        levels,
        vec![StressLevel::Low, StressLevel::Medium, StressLevel::High]
    );

    let snapshot = lifecycle.snapshot();
    assert_eq!(snapshot.bpm, 112);
    assert_eq!(snapshot.hrv, 22);
    assert_eq!(snapshot.stress_level, StressLevel::High);
    assert!(snapshot.actuator_on);

    let stats = lifecycle.stats();
    assert_eq!(stats.readings_accepted, 3);
    assert_eq!(stats.beats, 1);
    assert_eq!(stats.actuator_changes, 1);
    assert_eq!(stats.lines_discarded, 0);

    let alert = timeout(WAIT, alerts.recv())
        .await
        .expect("no alert")
        .expect("alert channel closed");
    match alert {
        AlertEvent::Notify { title, body, bpm, .. } => {
            assert_eq!(title, "High Stress Detected");
            assert_eq!(body, "BPM is 112. Take a moment to breathe.");
            assert_eq!(bpm, 112);
        }
        other => panic!("expected a notification, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_lines_are_ignored() {
    let lifecycle = ConnectionLifecycle::default();
    let sender = connect(&lifecycle).await;

    sender
        .send("BPM:abc\nBPM:10\nBPM:300\ngarbage\n\n\nBPM:88\n")
        .await;
    wait_until("one accepted reading", || lifecycle.window().len() == 1).await;

    assert_eq!(lifecycle.snapshot().bpm, 88);
    assert_eq!(lifecycle.snapshot().stress_level, StressLevel::Medium);
    let stats = lifecycle.stats();
    assert_eq!(stats.records_framed, 5);
    assert_eq!(stats.lines_discarded, 4);
    assert!(lifecycle.state().is_streaming());
}

#[tokio::test]
async fn test_open_failure_then_recovery() {
    let lifecycle = ConnectionLifecycle::default();

    let result = lifecycle
        .activate_hardware(ChannelTransport::failing("port busy"))
        .await;
    assert!(matches!(result, Err(TelemetryError::Transport(_))));
    match lifecycle.state() {
        ConnectionState::Error(reason) => assert!(reason.contains("port busy")),
        other => panic!("expected error state, got {other:?}"),
    }

    let sender = connect(&lifecycle).await;
    sender.send("BPM:70\n").await;
    wait_until("a reading after recovery", || lifecycle.snapshot().bpm == 70).await;
}

#[tokio::test]
async fn test_user_cancel_is_silent() {
    let lifecycle = ConnectionLifecycle::default();
    let mut state = lifecycle.subscribe_state();

    lifecycle
        .activate_hardware(ChannelTransport::cancelled())
        .await
        .expect("cancellation should not be an error");

    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    assert!(state.has_changed().unwrap_or(false));
    assert!(!matches!(
        *state.borrow_and_update(),
        ConnectionState::Error(_)
    ));
}

/// A link whose `open` never finishes, like a port picker left open.
struct StalledTransport;

#[async_trait]
impl Transport for StalledTransport {
    async fn open(&mut self) -> TelemetryResult<()> {
        std::future::pending().await
    }

    async fn next_chunk(&mut self) -> TelemetryResult<Option<String>> {
        Ok(None)
    }

    async fn close(&mut self) -> TelemetryResult<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "stalled".to_string()
    }
}

#[tokio::test]
async fn test_deactivate_while_connecting_is_silent() {
    let lifecycle = ConnectionLifecycle::default();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut states = lifecycle.subscribe_state();
    let sink = seen.clone();
    let recorder = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            let done = state == ConnectionState::Disconnected;
            sink.lock().unwrap().push(state);
            if done {
                break;
            }
        }
    });

    let (result, ()) = tokio::join!(lifecycle.activate_hardware(StalledTransport), async {
        wait_until("connecting", || {
            lifecycle.state() == ConnectionState::Connecting
        })
        .await;
        lifecycle.deactivate().await;
    });

    assert!(result.is_ok());
    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    timeout(WAIT, recorder).await.unwrap().unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.last(), Some(&ConnectionState::Disconnected));
    assert!(!seen.iter().any(|s| matches!(s, ConnectionState::Error(_))));
    assert_eq!(lifecycle.stats().session_id, None);
}

#[tokio::test]
async fn test_configured_window_never_exceeds_thirty() {
    let config = Config {
        window_capacity: 50,
        ..Config::default()
    };
    let lifecycle = ConnectionLifecycle::new(config);
    let sender = connect(&lifecycle).await;

    let lines: String = (0..45).map(|i| format!("BPM:{}\n", 60 + i)).collect();
    sender.send(lines).await;
    wait_until("last reading", || lifecycle.snapshot().bpm == 104).await;

    let window = lifecycle.window();
    assert_eq!(window.len(), DEFAULT_WINDOW_CAPACITY);
    assert_eq!(window[0].bpm, 75.0);
}

#[tokio::test]
async fn test_end_of_stream_disconnects_and_clears() {
    let lifecycle = ConnectionLifecycle::default();
    let sender = connect(&lifecycle).await;

    sender.send("BPM:95\nBPM:96").await;
    drop(sender);

    wait_until("disconnect", || {
        lifecycle.state() == ConnectionState::Disconnected
    })
    .await;

    // The unterminated tail is still decoded before the reset.
    assert_eq!(lifecycle.stats().readings_accepted, 2);
    assert!(lifecycle.window().is_empty());
    assert_eq!(lifecycle.snapshot().bpm, 0);
    assert_eq!(lifecycle.snapshot().stress_level, StressLevel::Low);
    assert!(!lifecycle.snapshot().actuator_on);
}

#[tokio::test]
async fn test_link_failure_reports_error() {
    let lifecycle = ConnectionLifecycle::default();
    let sender = connect(&lifecycle).await;

    sender.send("BPM:90\n").await;
    sender.fail("device unplugged").await;

    wait_until("error state", || {
        matches!(lifecycle.state(), ConnectionState::Error(_))
    })
    .await;
    assert!(lifecycle.window().is_empty());

    lifecycle.deactivate().await;
    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_framing_overflow_reports_error() {
    let config = Config {
        max_record_len: 16,
        ..Config::default()
    };
    let lifecycle = ConnectionLifecycle::new(config);
    let sender = connect(&lifecycle).await;

    sender.send("x".repeat(40)).await;

    wait_until("overflow error", || {
        matches!(lifecycle.state(), ConnectionState::Error(ref r) if r.contains("Framing overflow"))
    })
    .await;
}

#[tokio::test]
async fn test_deactivate_closes_transport() {
    let lifecycle = ConnectionLifecycle::default();
    let sender = connect(&lifecycle).await;

    sender.send("BPM:77\n").await;
    wait_until("a reading", || lifecycle.window().len() == 1).await;

    lifecycle.deactivate().await;
    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    assert!(!sender.send("BPM:120\n").await);
    assert!(lifecycle.window().is_empty());
    assert_eq!(lifecycle.snapshot().bpm, 0);
}

#[tokio::test]
async fn test_simulation_replaces_hardware() {
    let lifecycle = ConnectionLifecycle::default();
    let sender = connect(&lifecycle).await;
    sender.send("BPM:101\n").await;
    wait_until("a reading", || lifecycle.window().len() == 1).await;

    lifecycle.activate_simulation().await.unwrap();
    assert_eq!(
        lifecycle.state(),
        ConnectionState::Streaming(SourceKind::Simulated)
    );
    wait_closed(&sender).await;
    assert!(lifecycle.window().is_empty());

    // And back again.
    let sender = connect(&lifecycle).await;
    sender.send("BPM:64\n").await;
    wait_until("hardware reading", || lifecycle.snapshot().bpm == 64).await;
    lifecycle.deactivate().await;
}

#[tokio::test]
async fn test_only_one_hardware_session() {
    let lifecycle = ConnectionLifecycle::default();
    let _sender = connect(&lifecycle).await;

    let (second, second_sender) = ChannelTransport::pair(4);
    let result = lifecycle.activate_hardware(second).await;
    assert!(matches!(
        result,
        Err(TelemetryError::AlreadyActive(SourceKind::Hardware))
    ));
    // The rejected transport was never taken over.
    drop(second_sender);
    assert!(lifecycle.state().is_streaming());
}

#[tokio::test]
async fn test_sustained_high_stress_nudges_once() {
    let mut config = Config::default();
    config.alerts.sustain_threshold = Duration::from_millis(100);
    let lifecycle = ConnectionLifecycle::new(config);
    let mut alerts = lifecycle.subscribe_alerts();
    let sender = connect(&lifecycle).await;

    sender.send("BPM:120\n").await;

    let first = timeout(WAIT, alerts.recv()).await.unwrap().unwrap();
    assert!(first.is_notify());
    let second = timeout(WAIT, alerts.recv()).await.unwrap().unwrap();
    assert!(second.is_nudge());

    // Still high, but a nudge only fires once per episode.
    sender.send("BPM:121\n").await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(alerts.try_recv().is_err());
    assert_eq!(lifecycle.stats().nudges, 1);
    assert_eq!(lifecycle.stats().notifications, 1);
}
