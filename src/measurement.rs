//! Measurement values handed back to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One reading of one sensor. Fresh per read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    pub sensor: String,
    pub captured_at: DateTime<Utc>,
    #[serde(flatten)]
    pub values: Measurement,
}

impl MeasurementRecord {
    pub fn new(sensor: impl Into<String>, values: Measurement) -> Self {
        Self {
            sensor: sensor.into(),
            captured_at: Utc::now(),
            values,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Measurement {
    Co2 { co2_ppm: u32, temp_c: f32 },
    HumidityTemp { relative_humidity: f32, temp_c: f32 },
    Particulate(ParticulateMatter),
}

impl Measurement {
    pub fn co2_ppm(&self) -> Option<u32> {
        match self {
            Measurement::Co2 { co2_ppm, .. } => Some(*co2_ppm),
            _ => None,
        }
    }

    pub fn temperature(&self) -> Option<f32> {
        match self {
            Measurement::Co2 { temp_c, .. } | Measurement::HumidityTemp { temp_c, .. } => Some(*temp_c),
            Measurement::Particulate(_) => None,
        }
    }

    pub fn relative_humidity(&self) -> Option<f32> {
        match self {
            Measurement::HumidityTemp { relative_humidity, .. } => Some(*relative_humidity),
            _ => None,
        }
    }

    pub fn particulate(&self) -> Option<&ParticulateMatter> {
        match self {
            Measurement::Particulate(pm) => Some(pm),
            _ => None,
        }
    }
}

/// Mass concentrations in µg/m³, number concentrations in #/cm³, typical
/// particle size in µm.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ParticulateMatter {
    pub mc_1p0: f32,
    pub mc_2p5: f32,
    pub mc_4p0: f32,
    pub mc_10p0: f32,
    pub nc_0p5: f32,
    pub nc_1p0: f32,
    pub nc_2p5: f32,
    pub nc_4p0: f32,
    pub nc_10p0: f32,
    pub typical_particle_size: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FirmwareVersion {
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub hardware_revision: u8,
    pub shdlc_major: u8,
    pub shdlc_minor: u8,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.firmware_major, self.firmware_minor)
    }
}

/// Identification data collected while probing and initializing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SensorInfo {
    pub model: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<FirmwareVersion>,
}

impl SensorInfo {
    pub fn new(model: &'static str) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }
}
