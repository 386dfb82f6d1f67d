//! Sensor state machines.
//!
//! One type per sensor kind, each owning its native session. The kinds share
//! the [`Lifecycle`] contract and are dispatched through the closed [`Sensor`]
//! enum.
//!
//! ```text
//! Uninitialized -> Probing -> Initializing -> Ready <-> Sleeping
//!                     |            |            |
//!                     +----------> Failed <-----+
//! any state -> Stopped
//! ```

pub mod co2;
pub mod humidity;
pub mod particulate;
pub mod session;

use std::sync::Arc;

use strum::{AsRefStr, Display, EnumIter};

pub use co2::Co2Sensor;
pub use humidity::HumiditySensor;
pub use particulate::ParticulateSensor;
pub use session::SensorHandle;

use crate::descriptor::{SensorDescriptor, SensorKind};
use crate::error::SensorError;
use crate::ffi::NativeDriver;
use crate::measurement::{MeasurementRecord, SensorInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
pub enum SensorState {
    Uninitialized,
    Probing,
    Initializing,
    Ready,
    Sleeping,
    Failed,
    Stopped,
}

/// Operations every sensor kind supports.
pub trait Lifecycle {
    fn name(&self) -> &str;
    fn kind(&self) -> SensorKind;
    fn state(&self) -> SensorState;

    /// Identification data gathered so far.
    fn info(&self) -> SensorInfo;

    /// Check that the device answers on its transport without opening it.
    fn probe(&mut self) -> Result<(), SensorError>;

    /// Probe if needed, then open and configure the device.
    ///
    /// Either the sensor ends up Ready or the partly opened session is
    /// released and the sensor is Failed.
    fn initialize(&mut self) -> Result<(), SensorError>;

    fn read(&mut self) -> Result<MeasurementRecord, SensorError>;

    /// Release the session. A no-op once Stopped.
    fn stop(&mut self) -> Result<(), SensorError>;

    fn sleep(&mut self) -> Result<(), SensorError> {
        Ok(())
    }

    fn wake_up(&mut self) -> Result<(), SensorError> {
        Ok(())
    }
}

pub enum Sensor {
    Co2(Co2Sensor),
    HumidityTemp(HumiditySensor),
    Particulate(ParticulateSensor),
}

macro_rules! dispatch {
    ($self:expr, $sensor:ident => $body:expr) => {
        match $self {
            Sensor::Co2($sensor) => $body,
            Sensor::HumidityTemp($sensor) => $body,
            Sensor::Particulate($sensor) => $body,
        }
    };
}

impl Sensor {
    pub fn from_descriptor(
        name: impl Into<String>,
        descriptor: &SensorDescriptor,
        driver: Arc<dyn NativeDriver>,
    ) -> Self {
        match descriptor {
            SensorDescriptor::Co2 { i2c, config } => {
                Sensor::Co2(Co2Sensor::new(name, *i2c, config.clone(), driver))
            }
            SensorDescriptor::HumidityTemp { i2c, config } => {
                Sensor::HumidityTemp(HumiditySensor::new(name, *i2c, *config, driver))
            }
            SensorDescriptor::Particulate { uart, config } => {
                Sensor::Particulate(ParticulateSensor::new(name, uart.clone(), *config, driver))
            }
        }
    }

    pub fn as_co2_mut(&mut self) -> Option<&mut Co2Sensor> {
        match self {
            Sensor::Co2(sensor) => Some(sensor),
            _ => None,
        }
    }

    pub fn as_humidity_mut(&mut self) -> Option<&mut HumiditySensor> {
        match self {
            Sensor::HumidityTemp(sensor) => Some(sensor),
            _ => None,
        }
    }

    pub fn as_particulate_mut(&mut self) -> Option<&mut ParticulateSensor> {
        match self {
            Sensor::Particulate(sensor) => Some(sensor),
            _ => None,
        }
    }

    /// Stop and mark Failed, used when a sensor keeps failing.
    pub(crate) fn abandon(&mut self) {
        if let Err(e) = self.stop() {
            log::debug!("[{}] release while stopping a failing sensor: {e}", self.name());
        }
        dispatch!(self, s => s.core_mut().mark_failed())
    }
}

impl std::fmt::Debug for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sensor")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}

impl Lifecycle for Sensor {
    fn name(&self) -> &str {
        dispatch!(self, s => s.name())
    }

    fn kind(&self) -> SensorKind {
        dispatch!(self, s => s.kind())
    }

    fn state(&self) -> SensorState {
        dispatch!(self, s => s.state())
    }

    fn info(&self) -> SensorInfo {
        dispatch!(self, s => s.info())
    }

    fn probe(&mut self) -> Result<(), SensorError> {
        dispatch!(self, s => s.probe())
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        dispatch!(self, s => s.initialize())
    }

    fn read(&mut self) -> Result<MeasurementRecord, SensorError> {
        dispatch!(self, s => s.read())
    }

    fn stop(&mut self) -> Result<(), SensorError> {
        dispatch!(self, s => s.stop())
    }

    fn sleep(&mut self) -> Result<(), SensorError> {
        dispatch!(self, s => s.sleep())
    }

    fn wake_up(&mut self) -> Result<(), SensorError> {
        dispatch!(self, s => s.wake_up())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::SimulatedDriver;
    use strum::IntoEnumIterator;

    #[test]
    fn test_from_descriptor_picks_kind() {
        let driver: Arc<dyn NativeDriver> = Arc::new(SimulatedDriver::new());
        let descriptors = [
            SensorDescriptor::co2(1, 0x29),
            SensorDescriptor::humidity(1, 0x44),
            SensorDescriptor::particulate("/dev/ttyAMA0"),
        ];
        for descriptor in &descriptors {
            let sensor = Sensor::from_descriptor("s", descriptor, Arc::clone(&driver));
            assert_eq!(sensor.kind(), descriptor.kind());
            assert_eq!(sensor.state(), SensorState::Uninitialized);
            assert_eq!(sensor.info().model, descriptor.kind().model());
        }
    }

    #[test]
    fn test_abandon_marks_failed() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut sensor = Sensor::from_descriptor("shtc3", &SensorDescriptor::humidity(1, 0x44), driver.clone());
        sensor.initialize().unwrap();
        sensor.abandon();
        assert_eq!(sensor.state(), SensorState::Failed);
        assert_eq!(driver.open_sessions(), 0);
    }

    #[test]
    fn test_abandon_with_failing_close() {
        let driver = Arc::new(SimulatedDriver::new());
        let descriptor = SensorDescriptor::particulate("/dev/ttyAMA0").with_warmup_ms(0);
        let mut sensor = Sensor::from_descriptor("pm", &descriptor, driver.clone());
        sensor.initialize().unwrap();
        driver.fail_once("sps30_close", crate::error::status::BUS_ERROR);
        sensor.abandon();
        assert_eq!(sensor.state(), SensorState::Failed);
        assert_eq!(driver.call_count("sps30_close"), 1);
        // the handle counts as released, a later stop does not close again
        sensor.stop().unwrap();
        assert_eq!(driver.call_count("sps30_close"), 1);
    }

    #[test]
    fn test_state_names() {
        let names: Vec<String> = SensorState::iter().map(|s| s.to_string()).collect();
        assert_eq!(names[0], "Uninitialized");
        assert_eq!(names.len(), 7);
    }
}
