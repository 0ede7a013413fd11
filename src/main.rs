//! # Radiometer Uplink
//!
//! One logging cycle of the field station: power the modem up, take a GPS
//! fix, append it to the data file, then upload the whole file over LTE.
//!
//! # Examples
//!
//! ```bash
//! RUST_LOG=debug cargo run --release -- config/default.toml
//! ```
//!
//! Expected output:
//! ```text
//! INFO radiometer_uplink: Radiometer Uplink v0.1.0 starting...
//! INFO radiometer_uplink::serial: Successfully opened modem at /dev/ttyUSB2 (9600 baud)
//! INFO radiometer_uplink::uplink::connectivity: Turning on modem
//! INFO radiometer_uplink::uplink::orchestrator: Uploading DATA.CSV to ftp.example.org:21
//! ```

use anyhow::{Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use radiometer_uplink::config::{Config, LoggingConfig};
use radiometer_uplink::delay::TokioDelay;
use radiometer_uplink::modem::sim7000::Sim7000;
use radiometer_uplink::position::PositionAcquirer;
use radiometer_uplink::serial::ModemSerial;
use radiometer_uplink::station::Station;
use radiometer_uplink::storage::dir::DirStorage;
use radiometer_uplink::storage::DataLog;
use radiometer_uplink::uplink::{Uplink, UplinkSettings};

/// Config file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of the daily rolling log files
const LOG_FILE_PREFIX: &str = "radiometer-uplink.log";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _guard = init_logging(&config.logging);

    info!("Radiometer Uplink v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let serial = ModemSerial::open(&config.serial.port, config.serial.baud_rate)?;
    info!("Modem serial port opened at: {}", serial.device_path());

    let modem = Sim7000::new(serial.into_port(), config.response_timeout());
    let storage = DirStorage::new(&config.storage.data_dir);
    let mut station = Station::new(modem, storage, TokioDelay);

    let mut uplink = Uplink::new(UplinkSettings::from(&config));
    uplink.monitor_mut().power_up(&mut station.modem).await;

    let mut acquirer = PositionAcquirer::new(config.gps_poll_interval());
    let fix = acquirer.acquire_fix(&mut station.modem, &mut station.delay).await;
    info!("Fix: {}", serde_json::to_string(&fix)?);

    let data_log = DataLog::new(config.storage.heading.as_str());
    data_log
        .append(&mut station.storage, &config.storage.data_file, &fix.to_record())
        .await
        .with_context(|| format!("Failed to log fix to {}", config.storage.data_file))?;

    let report = uplink
        .upload_file(&mut station, &config.storage.data_file)
        .await
        .with_context(|| format!("Failed to upload {}", config.storage.data_file))?;

    info!(
        "Uploaded {} records in {} segments ({} bytes, {} attempts)",
        report.records, report.segments, report.bytes, report.attempts
    );

    Ok(())
}

/// Console logging filtered by `RUST_LOG` (default `info`), plus a daily
/// rolling file when a log directory is configured.
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    guard
}
