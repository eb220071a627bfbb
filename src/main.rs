//! # Pendulum Telemetry
//!
//! Headless consumer for the acquisition core.
//!
//! Connects to the device, drains samples into the sliding window on a render
//! tick, and periodically logs what a plot of the window would show.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration, apply command-line overrides
//!    - Set up logging (console, plus a rolling file if configured)
//!    - Open the serial device and wait for it to settle
//!
//! 2. **Main Loop**
//!    - Drain queued samples into the window every refresh interval
//!    - Log a window summary every status interval
//!    - Handle Ctrl+C for graceful shutdown
//!
//! 3. **Shutdown**
//!    - Cancel acquisition and wait for the task to stop
//!    - A lost device ends the program with an error; there is no reconnect
//!
//! # Examples
//!
//! ```bash
//! cargo run --release -- --port /dev/ttyACM0 --baud 38400
//! ```
//!
//! Expected output:
//! ```text
//! INFO pendulum_telemetry: Pendulum Telemetry v0.1.0 starting...
//! INFO pendulum_telemetry::serial: Opened /dev/ttyACM0, waiting 2s for the device to settle
//! INFO pendulum_telemetry::acquisition::controller: Connected to /dev/ttyACM0
//! INFO pendulum_telemetry: Window 250/1000 samples over 12.48s, value 3.100..9.875, latest 4.250
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use pendulum_telemetry::acquisition::AcquisitionController;
use pendulum_telemetry::config::{Config, DisplayConfig, LoggingConfig};
use pendulum_telemetry::serial::available_ports;

/// File name prefix for rolling log files
const LOG_FILE_PREFIX: &str = "pendulum-telemetry.log";

#[derive(Parser, Debug)]
#[command(name = "pendulum-telemetry")]
#[command(about = "Live sliding-window telemetry from a serial device")]
#[command(version)]
struct CliArgs {
    /// TOML configuration file (built-in defaults when omitted)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the serial device path (e.g. /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,

    /// Override the baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = load_config(&args)?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Pendulum Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));

    if args.list_ports {
        for port in available_ports()? {
            println!("{}", port);
        }
        return Ok(());
    }

    let mut controller = AcquisitionController::new(config.window.capacity)?;
    controller
        .connect(&config.serial.connection())
        .await
        .with_context(|| format!("could not connect to {}", config.serial.port))?;

    info!("Press Ctrl+C to exit");
    run_consumer(&mut controller, &config.display).await
}

/// Load the config file (or defaults) and apply command-line overrides
fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }

    config.validate()?;
    Ok(config)
}

/// Install the tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level. The returned guard
/// must stay alive for buffered file output to be flushed.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let (file_layer, guard) = if logging.log_dir.is_empty() {
        (None, None)
    } else {
        std::fs::create_dir_all(&logging.log_dir)
            .with_context(|| format!("failed to create log directory {}", logging.log_dir))?;
        let appender = tracing_appender::rolling::daily(&logging.log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Drain the channel on every render tick until Ctrl+C or the session ends
async fn run_consumer(controller: &mut AcquisitionController, display: &DisplayConfig) -> Result<()> {
    let mut render_tick = interval(Duration::from_millis(display.refresh_interval_ms));
    render_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut status_tick = interval(Duration::from_secs(display.status_interval_s));
    status_tick.tick().await;

    loop {
        tokio::select! {
            _ = render_tick.tick() => {
                if let Err(e) = controller.drain_step() {
                    error!("Acquisition stopped: {}", e);
                    return Err(e).context("device session lost, restart to reconnect");
                }

                if !controller.has_session() {
                    info!("Device session ended");
                    break;
                }
            }

            _ = status_tick.tick() => log_window_status(controller),

            // Handle Ctrl+C for graceful shutdown
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                if let Some(summary) = controller.disconnect().await? {
                    info!(
                        "Session totals: {} lines, {} samples, {} malformed",
                        summary.stats.lines_read, summary.stats.samples, summary.stats.malformed
                    );
                }
                break;
            }
        }
    }

    Ok(())
}

/// One-line summary of the current window, as a plot would show it
fn log_window_status(controller: &AcquisitionController) {
    let snapshot = controller.snapshot();

    let (Some(first), Some(last)) = (snapshot.first(), snapshot.last()) else {
        info!(
            "Window empty, waiting for data from {}",
            controller.device_path().unwrap_or("<disconnected>")
        );
        return;
    };

    let (min, max) = snapshot
        .iter()
        .map(|s| s.value())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));

    info!(
        "Window {}/{} samples over {:.2}s, value {:.3}..{:.3}, latest {:.3}",
        snapshot.len(),
        controller.window().capacity(),
        last.timestamp() - first.timestamp(),
        min,
        max,
        last.value()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = CliArgs::try_parse_from(["pendulum-telemetry"]).unwrap();
        assert!(args.config.is_none());
        assert!(args.port.is_none());
        assert!(args.baud.is_none());
        assert!(!args.list_ports);
    }

    #[test]
    fn test_cli_overrides_applied() {
        let args = CliArgs::try_parse_from([
            "pendulum-telemetry",
            "--port",
            "/dev/ttyUSB3",
            "--baud",
            "115200",
        ])
        .unwrap();

        let config = load_config(&args).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB3");
        assert_eq!(config.serial.baud_rate, 115200);
    }

    #[test]
    fn test_cli_invalid_baud_rejected() {
        let args = CliArgs::try_parse_from(["pendulum-telemetry", "-b", "0"]).unwrap();
        assert!(load_config(&args).is_err());
    }

    #[test]
    fn test_missing_config_file_rejected() {
        let args =
            CliArgs::try_parse_from(["pendulum-telemetry", "-c", "/nonexistent/telemetry.toml"])
                .unwrap();
        assert!(load_config(&args).is_err());
    }
}
