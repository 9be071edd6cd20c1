//! Neurocalm Agent CLI
//!
//! Heart-rate telemetry and stress feedback from the terminal.

use anyhow::Context;
use clap::{Parser, Subcommand};
use neurocalm_agent::{
    coach,
    core::{AlertEvent, StressLevel},
    telemetry::{FileTransport, ReaderTransport},
    Config, ConnectionLifecycle, ConnectionState, Transport, VERSION, WELLNESS_NOTICE,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "neurocalm")]
#[command(author = "Neurocalm")]
#[command(version = VERSION)]
#[command(about = "Heart-rate telemetry and stress feedback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream from a sensor board over a serial port
    Serial {
        /// Serial port (defaults to the configured port)
        #[arg(long)]
        port: Option<String>,

        /// Baud rate (defaults to the configured rate)
        #[arg(long)]
        baud: Option<u32>,

        /// List available ports and exit
        #[arg(long)]
        list: bool,
    },

    /// Stream from a captured telemetry file, or stdin with `-`
    Listen {
        /// Input file path or `-`
        #[arg(long, short, default_value = "-")]
        input: String,
    },

    /// Stream from the built-in simulator
    Simulate {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Ask the coach for a coping tip
    Ask {
        /// What you want to say
        text: String,

        /// Current heart rate, used to pick the stress level
        #[arg(long, default_value = "0")]
        bpm: u32,
    },

    /// Display the wellness notice
    Notice,

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serial { port, baud, list } => cmd_serial(port, baud, list).await,
        Commands::Listen { input } => cmd_listen(&input).await,
        Commands::Simulate { seconds } => cmd_simulate(seconds).await,
        Commands::Ask { text, bpm } => {
            cmd_ask(&text, bpm);
            Ok(())
        }
        Commands::Notice => {
            println!("{WELLNESS_NOTICE}");
            Ok(())
        }
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("neurocalm_agent=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "serial")]
async fn cmd_serial(port: Option<String>, baud: Option<u32>, list: bool) -> anyhow::Result<()> {
    use neurocalm_agent::telemetry::{available_ports, SerialTransport};

    if list {
        let ports = available_ports()?;
        if ports.is_empty() {
            println!("No serial ports found.");
        }
        for port in ports {
            println!("{port}");
        }
        return Ok(());
    }

    let config = load_config();
    let Some(port) = port.or_else(|| config.serial.port.clone()) else {
        eprintln!("Error: No serial port given.");
        eprintln!("Pass --port, or set serial.port in {:?}", Config::config_path());
        std::process::exit(1);
    };
    let baud = baud.unwrap_or(config.serial.baud_rate);

    println!("Neurocalm Agent v{VERSION}");
    println!();
    println!("Connecting to {port} at {baud} baud...");

    run_hardware(config, SerialTransport::new(port, baud)).await
}

#[cfg(not(feature = "serial"))]
async fn cmd_serial(_port: Option<String>, _baud: Option<u32>, _list: bool) -> anyhow::Result<()> {
    eprintln!("Error: serial support not enabled at compile time (build with --features serial)");
    std::process::exit(1);
}

async fn cmd_listen(input: &str) -> anyhow::Result<()> {
    let config = load_config();

    println!("Neurocalm Agent v{VERSION}");
    println!();

    if input == "-" {
        println!("Reading telemetry from stdin...");
        run_hardware(config, ReaderTransport::new("stdin", tokio::io::stdin())).await
    } else {
        let path = PathBuf::from(input);
        println!("Replaying telemetry from {path:?}...");
        run_hardware(config, FileTransport::new(path)).await
    }
}

async fn cmd_simulate(seconds: Option<u64>) -> anyhow::Result<()> {
    let config = load_config();

    println!("Neurocalm Agent v{VERSION}");
    println!();
    println!(
        "Starting simulator (one reading every {}ms)",
        config.simulation_period.as_millis()
    );
    println!("Press Ctrl+C to stop");
    println!();

    let stop = stop_token()?;
    let lifecycle = ConnectionLifecycle::new(config);
    lifecycle.activate_simulation().await?;

    run_session(&lifecycle, &stop, seconds.map(Duration::from_secs)).await;
    finish(&lifecycle).await;
    Ok(())
}

fn cmd_ask(text: &str, bpm: u32) {
    let stress = StressLevel::classify(f64::from(bpm));
    println!("{}", coach::respond(text, bpm, stress));
    if bpm > 0 {
        println!();
        println!("[{stress}] {}", stress.guidance());
    }
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Load the config file, falling back to defaults with a warning.
fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config: {e}");
            Config::default()
        }
    }
}

/// Token cancelled on Ctrl+C.
fn stop_token() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let handle = token.clone();
    ctrlc::set_handler(move || handle.cancel()).context("Error setting Ctrl+C handler")?;
    Ok(token)
}

async fn run_hardware<T>(config: Config, transport: T) -> anyhow::Result<()>
where
    T: Transport + 'static,
{
    let stop = stop_token()?;
    let lifecycle = ConnectionLifecycle::new(config);

    tokio::select! {
        result = lifecycle.activate_hardware(transport) => {
            result.context("Failed to connect")?;
        }
        _ = stop.cancelled() => {
            lifecycle.deactivate().await;
            println!("Connection cancelled.");
            return Ok(());
        }
    }

    match lifecycle.state() {
        ConnectionState::Streaming(_) => {
            println!("Connected. Press Ctrl+C to stop");
            println!();
        }
        // A short capture can end before we get here.
        _ if lifecycle.stats().session_id.is_some() => {}
        _ => {
            println!("Connection cancelled.");
            return Ok(());
        }
    }

    run_session(&lifecycle, &stop, None).await;
    let failure = match lifecycle.state() {
        ConnectionState::Error(reason) => Some(reason),
        _ => None,
    };
    finish(&lifecycle).await;

    match failure {
        Some(reason) => anyhow::bail!("Session failed: {reason}"),
        None => Ok(()),
    }
}

/// Print live updates until stopped, timed out, or the source goes idle.
async fn run_session(
    lifecycle: &ConnectionLifecycle,
    stop: &CancellationToken,
    limit: Option<Duration>,
) {
    let mut state = lifecycle.subscribe_state();
    let mut snapshots = lifecycle.subscribe_snapshots();
    let mut alerts = lifecycle.subscribe_alerts();
    let mut beats = lifecycle.subscribe_beats();

    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    if state.borrow_and_update().is_idle() {
        return;
    }

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = &mut deadline => break,

            Ok(()) = state.changed() => {
                let current = state.borrow_and_update().clone();
                if current.is_idle() {
                    println!("Source stopped: {current}");
                    break;
                }
            }

            Ok(()) = snapshots.changed() => {
                let s = *snapshots.borrow_and_update();
                println!(
                    "[{}] {:>3} BPM | HRV {:>3} | {:<6} | bulb {}",
                    s.timestamp.format("%H:%M:%S"),
                    s.bpm,
                    s.hrv,
                    s.stress_level,
                    if s.actuator_on { "on" } else { "off" }
                );
            }

            beat = beats.recv() => match beat {
                Ok(_) => println!("  ♥"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },

            alert = alerts.recv() => match alert {
                Ok(AlertEvent::Notify { title, body, .. }) => {
                    println!();
                    println!("*** {title}: {body}");
                    println!();
                }
                Ok(AlertEvent::Nudge { message, .. }) => {
                    println!();
                    println!(">>> {message}");
                    println!();
                }
                Err(RecvError::Lagged(n)) => eprintln!("Warning: missed {n} alerts"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn finish(lifecycle: &ConnectionLifecycle) {
    println!();
    println!("Stopping...");
    lifecycle.deactivate().await;

    println!();
    println!("{}", lifecycle.session_log().summary());
}
