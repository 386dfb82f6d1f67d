use clap::Parser;
use log::{error, info, warn};
use parking_lot::Mutex;
use sensirion_bridge::config::{self, Config};
use sensirion_bridge::ffi::{self, NativeDriver, SimulatedDriver};
use sensirion_bridge::{Lifecycle, Outcomes, SensorManager};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{Duration, MissedTickBehavior};

type SharedManager = Arc<Mutex<SensorManager>>;

#[derive(Parser)]
#[command(name = "sensirion-bridge")]
#[command(about = "Poll Sensirion sensors and print measurements as JSON lines")]
struct Cli {
    /// JSON config file
    #[arg(long, short, env = "SENSIRION_CONFIG")]
    config: Option<PathBuf>,

    /// Driver library, or the directory containing libsensirion.so
    #[arg(long)]
    library: Option<PathBuf>,

    /// Seconds between reads
    #[arg(long)]
    interval: Option<u64>,

    /// Read every sensor once and exit
    #[arg(long)]
    once: bool,

    /// Run against the in-memory driver
    #[arg(long)]
    simulate: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

/// Run `f` on the blocking pool, native calls may sleep or block on the bus.
async fn with_manager<T, F>(manager: &SharedManager, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&mut SensorManager) -> T + Send + 'static,
{
    let manager = Arc::clone(manager);
    match tokio::task::spawn_blocking(move || f(&mut *manager.lock())).await {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Sensor task failed: {e}");
            None
        }
    }
}

fn print_readings(manager: &mut SensorManager) {
    let outcomes = manager.read_all();
    for (_, record) in outcomes.successes() {
        match serde_json::to_string(record) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("Could not serialize reading of '{}': {e}", record.sensor),
        }
    }
    for (name, e) in outcomes.failures() {
        warn!("No reading from '{name}': {e}");
    }
}

/// One polling pass: retry Failed sensors, then read everything.
fn poll(manager: &mut SensorManager) {
    let recovered = manager.recover_failed();
    for (name, _) in recovered.successes() {
        info!("Sensor '{name}' is back");
    }
    print_readings(manager);
}

fn log_initialization(manager: &SensorManager, outcomes: &Outcomes<()>) {
    for (name, result) in outcomes.iter() {
        match result {
            Ok(()) => {
                if let Ok(sensor) = manager.get(name) {
                    let info = sensor.info();
                    info!(
                        "  {name}: {} serial {}",
                        info.model,
                        info.serial_number.as_deref().unwrap_or("unknown")
                    );
                }
            }
            Err(e) => error!("  {name}: {e}"),
        }
    }
}

#[tokio::main]
async fn main() {
    config::load_dotenv();
    init_logger();
    let cli = Cli::parse();
    info!("Starting Sensirion bridge");

    let mut config = match Config::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(library) = cli.library {
        config.library_path = library;
    }
    if let Some(interval) = cli.interval {
        config.poll_interval_secs = interval.max(1);
    }
    config.simulate |= cli.simulate;

    info!("Configuration loaded:");
    info!("  Library: {}", config.library_path.display());
    info!("  Poll interval: {}s", config.poll_interval_secs);
    info!("  Sensors: {}", config.sensors.len());

    let driver: Arc<dyn NativeDriver> = if config.simulate {
        info!("Using simulated driver");
        Arc::new(SimulatedDriver::new())
    } else {
        match ffi::load(&config.library_path) {
            Ok(library) => library,
            Err(e) => {
                error!("Failed to load driver library: {e}");
                std::process::exit(1);
            }
        }
    };

    let mut manager = SensorManager::new(driver).with_max_consecutive_failures(config.max_consecutive_failures);
    for entry in config.sensors {
        if let Err(e) = manager.register(entry.name, entry.descriptor) {
            warn!("Skipping sensor: {e}");
        }
    }
    let manager: SharedManager = Arc::new(Mutex::new(manager));

    info!("Initializing sensors");
    let ready = with_manager(&manager, |manager| {
        let outcomes = manager.initialize_all();
        log_initialization(manager, &outcomes);
        outcomes.len() - outcomes.failures().count()
    })
    .await
    .unwrap_or(0);
    if ready == 0 {
        warn!("No sensor is ready");
    }

    if cli.once {
        with_manager(&manager, print_readings).await;
    } else {
        info!("Sensirion bridge is running, press Ctrl+C to exit");
        let mut interval = tokio::time::interval(Duration::from_secs(config.poll_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    with_manager(&manager, poll).await;
                }
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => info!("Received shutdown signal"),
                        Err(e) => error!("Failed to listen for shutdown signal: {e}"),
                    }
                    break;
                }
            }
        }
    }

    with_manager(&manager, SensorManager::stop_all).await;
    info!("Sensirion bridge stopped");
}
