use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::descriptor::{SHTC3_ADDRESS, STC31C_ADDRESS, SensorDescriptor};
use crate::error::{BridgeError, Result};
use crate::manager::DEFAULT_MAX_CONSECUTIVE_FAILURES;

/// Directory under the user config dir holding `config.json`
const CONFIG_DIR: &str = "sensirion-bridge";
const CONFIG_FILE: &str = "config.json";

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    let Ok(content) = fs::read_to_string(env_path) else {
        return;
    };

    for (key, value) in parse_dotenv(&content) {
        // Only set if not already set (env vars take precedence)
        if std::env::var(key).is_err() {
            // SAFETY: called from main before the runtime starts any threads
            unsafe { std::env::set_var(key, value) };
        }
    }
}

fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    for line in content.lines() {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let mut value = value.trim();
            if value.len() >= 2
                && ((value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\'')))
            {
                value = &value[1..value.len() - 1];
            }
            pairs.push((key.trim(), value));
        }
    }
    pairs
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing `libsensirion.so`, or the library file itself
    pub library_path: PathBuf,
    pub poll_interval_secs: u64,
    /// Consecutive failed reads before a sensor is stopped, 0 disables
    pub max_consecutive_failures: u32,
    /// Use the in-memory driver instead of the native library
    pub simulate: bool,
    pub sensors: Vec<SensorEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEntry {
    pub name: String,
    #[serde(flatten)]
    pub descriptor: SensorDescriptor,
}

impl SensorEntry {
    pub fn new(name: impl Into<String>, descriptor: SensorDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_path: PathBuf::from("drivers_c/build"),
            poll_interval_secs: 5,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            simulate: false,
            sensors: vec![
                SensorEntry::new(
                    "stc31c",
                    SensorDescriptor::co2(1, STC31C_ADDRESS).with_compensation_source("shtc3"),
                ),
                SensorEntry::new("shtc3", SensorDescriptor::humidity(1, SHTC3_ADDRESS)),
                SensorEntry::new("sps30", SensorDescriptor::particulate("/dev/ttyUSB0")),
            ],
        }
    }
}

impl Config {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, else the file at [`Self::default_path`] if it exists,
    /// else the defaults. Environment overrides are applied last.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => {
                    log::info!("Using config file {}", path.display());
                    Self::load(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// `~/.config/sensirion-bridge/config.json` on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(path) = var("SENSIRION_LIB_PATH") {
            self.library_path = PathBuf::from(path);
        }
        if let Some(interval) = var("SENSIRION_POLL_INTERVAL")
            && let Ok(i) = interval.parse()
        {
            self.poll_interval_secs = i;
        }
        if let Some(max) = var("SENSIRION_MAX_FAILURES")
            && let Ok(m) = max.parse()
        {
            self.max_consecutive_failures = m;
        }
        if let Some(simulate) = var("SENSIRION_SIMULATE") {
            self.simulate = matches!(simulate.trim(), "1" | "true" | "yes");
        }

        // Hardware location overrides apply to every sensor on that transport
        if let Some(device) = var("SPS30_DEVICE") {
            for entry in &mut self.sensors {
                if let SensorDescriptor::Particulate { uart, .. } = &mut entry.descriptor {
                    uart.device = device.clone();
                }
            }
        }
        if let Some(bus) = var("I2C_BUS")
            && let Ok(b) = bus.parse::<u8>()
        {
            for entry in &mut self.sensors {
                if let SensorDescriptor::Co2 { i2c, .. } | SensorDescriptor::HumidityTemp { i2c, .. } =
                    &mut entry.descriptor
                {
                    i2c.bus = b;
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(BridgeError::Config("poll_interval_secs must be at least 1".to_string()));
        }
        for (i, entry) in self.sensors.iter().enumerate() {
            if let Some(other) = self.sensors[..i]
                .iter()
                .find(|other| other.descriptor.transport().same_device(&entry.descriptor.transport()))
            {
                return Err(BridgeError::Config(format!(
                    "sensors '{}' and '{}' both use {}",
                    other.name,
                    entry.name,
                    entry.descriptor.transport()
                )));
            }
            let Some(source) = entry.descriptor.compensation_source() else {
                continue;
            };
            let feeds = self.sensors.iter().any(|other| {
                other.name == source && matches!(other.descriptor, SensorDescriptor::HumidityTemp { .. })
            });
            if !feeds {
                return Err(BridgeError::Config(format!(
                    "sensor '{}' takes compensation from '{source}', which is not a humidity sensor",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}
