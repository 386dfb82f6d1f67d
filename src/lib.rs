//! Sensirion sensor bridge library.
//!
//! Drives STC31-C (CO₂), SHTC3 (humidity/temperature) and SPS30 (particulate
//! matter) sensors through their native C drivers, loaded at runtime from
//! `libsensirion.so`.

pub mod bridge;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod ffi;
pub mod manager;
pub mod measurement;
pub mod sensors;

pub use config::Config;
pub use descriptor::{Compensation, SensorDescriptor, SensorKind};
pub use error::{BridgeError, ErrorKind, Result, SensorError};
pub use ffi::{NativeDriver, SimulatedDriver};
pub use manager::{Outcomes, SensorManager};
pub use measurement::{Measurement, MeasurementRecord, SensorInfo};
pub use sensors::{Lifecycle, Sensor, SensorState};
