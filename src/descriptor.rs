//! Static sensor descriptions.
//!
//! A [`SensorDescriptor`] says what a sensor is and where it lives. It is
//! supplied by the caller (code or config file) and never changes after
//! construction.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter};

use crate::bridge::sps30::DEFAULT_BAUD;

/// Default I²C address of the STC31-C.
pub const STC31C_ADDRESS: u8 = 0x29;
/// Default I²C address of the SHTC3.
pub const SHTC3_ADDRESS: u8 = 0x44;
/// Binary gas setting for CO₂ in air, 0–40 vol%.
pub const BINARY_GAS_CO2_IN_AIR_40: u16 = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorKind {
    Co2,
    HumidityTemp,
    Particulate,
}

impl SensorKind {
    pub fn model(&self) -> &'static str {
        match self {
            SensorKind::Co2 => "STC31-C",
            SensorKind::HumidityTemp => "SHTC3",
            SensorKind::Particulate => "SPS30",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct I2cAddress {
    pub bus: u8,
    /// 7-bit address
    pub address: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UartPort {
    pub device: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

/// Transport identifier, passed through to the native layer unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport<'a> {
    I2c(&'a I2cAddress),
    Uart(&'a UartPort),
}

impl Transport<'_> {
    /// Whether both transports reach the same device: the same bus and
    /// address on I²C, the same device file on UART.
    pub fn same_device(&self, other: &Transport<'_>) -> bool {
        match (self, other) {
            (Transport::I2c(a), Transport::I2c(b)) => a == b,
            (Transport::Uart(a), Transport::Uart(b)) => a.device == b.device,
            _ => false,
        }
    }
}

impl std::fmt::Display for Transport<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::I2c(i2c) => write!(f, "i2c-{}@0x{:02X}", i2c.bus, i2c.address),
            Transport::Uart(uart) => write!(f, "{}@{}", uart.device, uart.baud),
        }
    }
}

/// Ambient values the STC31-C needs to compensate its reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Compensation {
    /// %RH
    pub relative_humidity: f32,
    /// °C
    pub temperature_c: f32,
    /// mbar
    pub pressure_mbar: f32,
}

impl Default for Compensation {
    fn default() -> Self {
        Self {
            relative_humidity: 50.0,
            temperature_c: 25.0,
            pressure_mbar: 1013.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Co2Config {
    /// Compensation applied during initialization. Without it the sensor
    /// refuses to read until [`crate::sensors::Co2Sensor::set_compensation`]
    /// has been called.
    pub compensation: Option<Compensation>,
    /// Name of a humidity sensor whose readings keep the compensation current.
    pub compensation_source: Option<String>,
    /// Automatic self-calibration
    pub self_calibration: bool,
    pub binary_gas: u16,
}

impl Default for Co2Config {
    fn default() -> Self {
        Self {
            compensation: None,
            compensation_source: None,
            self_calibration: false,
            binary_gas: BINARY_GAS_CO2_IN_AIR_40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Precision {
    #[default]
    High = 0,
    Medium = 1,
    Low = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementMode {
    /// One measurement per read.
    #[default]
    SingleShot,
    /// The driver samples on its own; reads return the latest sample.
    Periodic { interval_ms: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HumidityConfig {
    pub mode: MeasurementMode,
    pub precision: Precision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticulateConfig {
    pub auto_clean_days: u32,
    /// Time the sensor needs after starting measurement before data is valid.
    pub warmup_ms: u64,
}

impl Default for ParticulateConfig {
    fn default() -> Self {
        Self {
            auto_clean_days: 4,
            warmup_ms: 1100,
        }
    }
}

/// Identity of one sensor: kind, transport and model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorDescriptor {
    Co2 {
        i2c: I2cAddress,
        #[serde(default)]
        config: Co2Config,
    },
    HumidityTemp {
        i2c: I2cAddress,
        #[serde(default)]
        config: HumidityConfig,
    },
    Particulate {
        uart: UartPort,
        #[serde(default)]
        config: ParticulateConfig,
    },
}

impl SensorDescriptor {
    pub fn co2(bus: u8, address: u8) -> Self {
        SensorDescriptor::Co2 {
            i2c: I2cAddress { bus, address },
            config: Co2Config::default(),
        }
    }

    pub fn humidity(bus: u8, address: u8) -> Self {
        SensorDescriptor::HumidityTemp {
            i2c: I2cAddress { bus, address },
            config: HumidityConfig::default(),
        }
    }

    pub fn particulate(device: impl Into<String>) -> Self {
        SensorDescriptor::Particulate {
            uart: UartPort {
                device: device.into(),
                baud: DEFAULT_BAUD,
            },
            config: ParticulateConfig::default(),
        }
    }

    /// Set the CO₂ compensation. No effect on other kinds.
    pub fn with_compensation(mut self, compensation: Compensation) -> Self {
        if let SensorDescriptor::Co2 { config, .. } = &mut self {
            config.compensation = Some(compensation);
        }
        self
    }

    /// Compensate at the given humidity with default temperature and pressure.
    pub fn with_compensation_rh(self, relative_humidity: f32) -> Self {
        self.with_compensation(Compensation {
            relative_humidity,
            ..Compensation::default()
        })
    }

    /// Keep the CO₂ compensation fed by the named humidity sensor.
    pub fn with_compensation_source(mut self, source: impl Into<String>) -> Self {
        if let SensorDescriptor::Co2 { config, .. } = &mut self {
            config.compensation_source = Some(source.into());
        }
        self
    }

    pub fn with_self_calibration(mut self, enabled: bool) -> Self {
        if let SensorDescriptor::Co2 { config, .. } = &mut self {
            config.self_calibration = enabled;
        }
        self
    }

    pub fn with_mode(mut self, mode: MeasurementMode, precision: Precision) -> Self {
        if let SensorDescriptor::HumidityTemp { config, .. } = &mut self {
            *config = HumidityConfig { mode, precision };
        }
        self
    }

    pub fn with_auto_clean_days(mut self, days: u32) -> Self {
        if let SensorDescriptor::Particulate { config, .. } = &mut self {
            config.auto_clean_days = days;
        }
        self
    }

    pub fn with_warmup_ms(mut self, warmup_ms: u64) -> Self {
        if let SensorDescriptor::Particulate { config, .. } = &mut self {
            config.warmup_ms = warmup_ms;
        }
        self
    }

    pub fn kind(&self) -> SensorKind {
        match self {
            SensorDescriptor::Co2 { .. } => SensorKind::Co2,
            SensorDescriptor::HumidityTemp { .. } => SensorKind::HumidityTemp,
            SensorDescriptor::Particulate { .. } => SensorKind::Particulate,
        }
    }

    pub fn transport(&self) -> Transport<'_> {
        match self {
            SensorDescriptor::Co2 { i2c, .. } | SensorDescriptor::HumidityTemp { i2c, .. } => {
                Transport::I2c(i2c)
            }
            SensorDescriptor::Particulate { uart, .. } => Transport::Uart(uart),
        }
    }

    /// The humidity sensor feeding this CO₂ sensor, if any.
    pub fn compensation_source(&self) -> Option<&str> {
        match self {
            SensorDescriptor::Co2 { config, .. } => config.compensation_source.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let co2 = SensorDescriptor::co2(1, STC31C_ADDRESS)
            .with_compensation_rh(50.0)
            .with_compensation_source("shtc3");
        assert_eq!(co2.kind(), SensorKind::Co2);
        assert_eq!(co2.transport().to_string(), "i2c-1@0x29");
        assert_eq!(co2.compensation_source(), Some("shtc3"));
        let SensorDescriptor::Co2 { config, .. } = &co2 else {
            panic!("expected a CO2 descriptor");
        };
        assert_eq!(config.compensation.unwrap().relative_humidity, 50.0);
        assert_eq!(config.binary_gas, 19);

        // kind-specific builders leave other kinds alone
        let sps = SensorDescriptor::particulate("/dev/ttyUSB0").with_compensation_rh(10.0);
        assert_eq!(sps, SensorDescriptor::particulate("/dev/ttyUSB0"));
        assert_eq!(sps.transport().to_string(), "/dev/ttyUSB0@115200");
    }

    #[test]
    fn test_same_device() {
        let co2 = SensorDescriptor::co2(1, STC31C_ADDRESS);
        let rh = SensorDescriptor::humidity(1, STC31C_ADDRESS);
        assert!(co2.transport().same_device(&rh.transport()));
        assert!(!co2.transport().same_device(&SensorDescriptor::co2(2, STC31C_ADDRESS).transport()));

        let mut slow = SensorDescriptor::particulate("/dev/ttyUSB0");
        if let SensorDescriptor::Particulate { uart, .. } = &mut slow {
            uart.baud = 9600;
        }
        let fast = SensorDescriptor::particulate("/dev/ttyUSB0");
        assert!(slow.transport().same_device(&fast.transport()));
        assert!(!fast.transport().same_device(&SensorDescriptor::particulate("/dev/ttyUSB1").transport()));
        assert!(!fast.transport().same_device(&co2.transport()));
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{ "kind": "particulate", "uart": { "device": "/dev/ttyAMA0" } }"#;
        let descriptor: SensorDescriptor = serde_json::from_str(json).unwrap();
        let SensorDescriptor::Particulate { uart, config } = descriptor else {
            panic!("expected a particulate descriptor");
        };
        assert_eq!(uart.baud, 115_200);
        assert_eq!(config.auto_clean_days, 4);
        assert_eq!(config.warmup_ms, 1100);
    }

    #[test]
    fn test_deserialize_humidity_mode() {
        let json = r#"{
            "kind": "humidity_temp",
            "i2c": { "bus": 1, "address": 68 },
            "config": { "mode": { "periodic": { "interval_ms": 2000 } }, "precision": "low" }
        }"#;
        let descriptor: SensorDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(
            descriptor,
            SensorDescriptor::humidity(1, SHTC3_ADDRESS)
                .with_mode(MeasurementMode::Periodic { interval_ms: 2000 }, Precision::Low)
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(SensorKind::HumidityTemp.to_string(), "humidity_temp");
        assert_eq!(SensorKind::Particulate.model(), "SPS30");
    }
}
