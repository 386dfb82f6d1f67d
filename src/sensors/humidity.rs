//! SHTC3 humidity and temperature sensor.

use std::sync::Arc;

use super::session::{SensorCore, check};
use super::{Lifecycle, SensorState};
use crate::bridge::encode_i2c_address;
use crate::bridge::sht4x::{self, Sht4xMeasurement, encode_mode};
use crate::descriptor::{HumidityConfig, I2cAddress, SensorKind};
use crate::error::{Phase, SensorError};
use crate::ffi::{NativeDriver, SessionHandle, Status};
use crate::measurement::{Measurement, MeasurementRecord, SensorInfo};

fn close(driver: &dyn NativeDriver, handle: SessionHandle) -> Status {
    driver.sht4x_close(handle)
}

/// The measurement mode is fixed for the lifetime of a session. To change
/// it, stop the sensor and build a new one from an updated descriptor.
pub struct HumiditySensor {
    core: SensorCore,
    i2c: I2cAddress,
    config: HumidityConfig,
}

impl HumiditySensor {
    pub fn new(name: impl Into<String>, i2c: I2cAddress, config: HumidityConfig, driver: Arc<dyn NativeDriver>) -> Self {
        Self {
            core: SensorCore::new(name, driver, SensorKind::HumidityTemp.model()),
            i2c,
            config,
        }
    }

    pub fn config(&self) -> &HumidityConfig {
        &self.config
    }

    /// Soft-reset the device and write the measurement mode again. Only
    /// while Ready.
    pub fn soft_reset(&mut self) -> Result<(), SensorError> {
        const OP: &str = "sht4x_soft_reset";
        let mode = encode_mode(self.config.mode, self.config.precision).map_err(|e| e.for_sensor(self.core.name()))?;
        self.core.with_session(OP, &[SensorState::Ready], |driver, handle| {
            check(Phase::Command, OP, driver.sht4x_soft_reset(handle))?;
            check(Phase::Command, "sht4x_configure", driver.sht4x_configure(handle, &mode))
        })?;
        log::info!("[{}] soft reset", self.core.name());
        Ok(())
    }

    pub(crate) fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }
}

impl Lifecycle for HumiditySensor {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> SensorKind {
        SensorKind::HumidityTemp
    }

    fn state(&self) -> SensorState {
        self.core.state()
    }

    fn info(&self) -> SensorInfo {
        self.core.info().clone()
    }

    fn probe(&mut self) -> Result<(), SensorError> {
        const OP: &str = "sht4x_probe";
        let i2c = self.i2c;
        self.core.probe_with(|driver, info| {
            let (bus, address) = encode_i2c_address(&i2c)?;
            let mut serial = 0;
            let status = driver.sht4x_probe(bus, address, &mut serial);
            check(Phase::Probe, OP, status)?;
            info.serial_number = Some(sht4x::decode_serial(status, serial)?);
            Ok(())
        })
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        self.core.begin_initialize()?;
        if !self.core.probed() {
            self.probe().map_err(SensorError::into_init_failure)?;
        }

        let i2c = self.i2c;
        let config = self.config;
        self.core.initialize_with(
            |driver| {
                let (bus, address) = encode_i2c_address(&i2c)?;
                let mut handle = 0;
                check(Phase::Initialize, "sht4x_open", driver.sht4x_open(bus, address, &mut handle))?;
                Ok(handle)
            },
            |driver, handle, _| {
                check(Phase::Initialize, "sht4x_soft_reset", driver.sht4x_soft_reset(handle))?;
                let mode = encode_mode(config.mode, config.precision)?;
                check(Phase::Initialize, "sht4x_configure", driver.sht4x_configure(handle, &mode))
            },
            close,
        )
    }

    fn read(&mut self) -> Result<MeasurementRecord, SensorError> {
        const OP: &str = "sht4x_measure";
        let (relative_humidity, temp_c) = self.core.with_session(OP, &[SensorState::Ready], |driver, handle| {
            let mut raw = Sht4xMeasurement::default();
            let status = driver.sht4x_measure(handle, &mut raw);
            check(Phase::Read, OP, status)?;
            sht4x::decode_measurement(status, &raw)
        })?;
        Ok(MeasurementRecord::new(
            self.core.name(),
            Measurement::HumidityTemp {
                relative_humidity,
                temp_c,
            },
        ))
    }

    fn stop(&mut self) -> Result<(), SensorError> {
        self.core.stop_with(|driver, handle, _| {
            check(Phase::Stop, "sht4x_close", driver.sht4x_close(handle))
        })
    }
}

impl Drop for HumiditySensor {
    fn drop(&mut self) {
        if self.core.state() != SensorState::Stopped
            && let Err(e) = self.stop()
        {
            log::debug!("[{}] stop on drop failed: {e}", self.core.name());
        }
    }
}
