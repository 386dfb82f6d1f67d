//! Check which configured sensors answer, without opening sessions.
//!
//! Usage:
//!   cargo run --bin sensor-probe
//!   cargo run --bin sensor-probe -- --library /opt/sensirion/lib
//!   cargo run --bin sensor-probe -- --simulate --json

use clap::Parser;
use sensirion_bridge::ffi::{self, NativeDriver, SimulatedDriver};
use sensirion_bridge::{Config, Lifecycle, Sensor};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sensor-probe")]
#[command(about = "Probe the configured Sensirion sensors and print what answers")]
struct Cli {
    /// JSON config file
    #[arg(long, short, env = "SENSIRION_CONFIG")]
    config: Option<PathBuf>,

    /// Driver library, or the directory containing libsensirion.so
    #[arg(long)]
    library: Option<PathBuf>,

    /// Probe the in-memory driver
    #[arg(long)]
    simulate: bool,

    /// One JSON object per sensor instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct ProbeReport {
    name: String,
    transport: String,
    ok: bool,
    #[serde(flatten)]
    info: sensirion_bridge::SensorInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> ExitCode {
    sensirion_bridge::config::load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut config = match Config::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(library) = cli.library {
        config.library_path = library;
    }

    let driver: Arc<dyn NativeDriver> = if cli.simulate || config.simulate {
        Arc::new(SimulatedDriver::new())
    } else {
        match ffi::load(&config.library_path) {
            Ok(library) => library,
            Err(e) => {
                eprintln!("Failed to load driver library: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    let mut failed = 0;
    for entry in &config.sensors {
        let mut sensor = Sensor::from_descriptor(entry.name.as_str(), &entry.descriptor, Arc::clone(&driver));
        let result = sensor.probe();
        let report = ProbeReport {
            name: entry.name.clone(),
            transport: entry.descriptor.transport().to_string(),
            ok: result.is_ok(),
            info: sensor.info(),
            error: result.err().map(|e| e.to_string()),
        };
        if !report.ok {
            failed += 1;
        }

        if cli.json {
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => eprintln!("Could not serialize report for '{}': {e}", report.name),
            }
        } else if let Some(error) = &report.error {
            println!("{:<10} {:<8} {:<20} FAILED {error}", report.name, report.info.model, report.transport);
        } else {
            println!(
                "{:<10} {:<8} {:<20} ok serial {}",
                report.name,
                report.info.model,
                report.transport,
                report.info.serial_number.as_deref().unwrap_or("-")
            );
        }
    }

    if failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
