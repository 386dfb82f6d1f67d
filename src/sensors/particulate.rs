//! SPS30 particulate matter sensor.
//!
//! Measurement runs continuously once started. The first data is available
//! about a second after `sps30_start_measurement`, so initialization and
//! wake-up wait for `warmup_ms` before returning.

use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use super::session::{SensorCore, check};
use super::{Lifecycle, SensorState};
use crate::bridge::sps30::{
    self, Sps30Measurement, Sps30Serial, Sps30VersionInformation, encode_auto_clean_days, encode_device_path,
};
use crate::descriptor::{ParticulateConfig, SensorKind, UartPort};
use crate::error::status::NO_ERROR;
use crate::error::{ErrorKind, Phase, SensorError};
use crate::ffi::{NativeDriver, SessionHandle, Status};
use crate::measurement::{FirmwareVersion, Measurement, MeasurementRecord, SensorInfo};

/// Sleep mode needs firmware 2.0 or newer.
const SLEEP_MIN_FIRMWARE_MAJOR: u8 = 2;

const MEASURING: &[SensorState] = &[SensorState::Ready];

fn close(driver: &dyn NativeDriver, handle: SessionHandle) -> Status {
    driver.sps30_close(handle)
}

pub struct ParticulateSensor {
    core: SensorCore,
    uart: UartPort,
    config: ParticulateConfig,
    firmware: Option<FirmwareVersion>,
}

impl ParticulateSensor {
    pub fn new(name: impl Into<String>, uart: UartPort, config: ParticulateConfig, driver: Arc<dyn NativeDriver>) -> Self {
        Self {
            core: SensorCore::new(name, driver, SensorKind::Particulate.model()),
            uart,
            config,
            firmware: None,
        }
    }

    fn device(&self) -> Result<CString, SensorError> {
        encode_device_path(&self.uart.device).map_err(|e| e.for_sensor(self.core.name()))
    }

    fn warm_up(&self) {
        if self.config.warmup_ms > 0 {
            log::debug!("[{}] waiting {} ms for first data", self.core.name(), self.config.warmup_ms);
            std::thread::sleep(Duration::from_millis(self.config.warmup_ms));
        }
    }

    fn supports_sleep(&self) -> bool {
        self.firmware
            .is_some_and(|v| v.firmware_major >= SLEEP_MIN_FIRMWARE_MAJOR)
    }

    /// Trigger the fan cleaning procedure. Only while measuring.
    pub fn start_fan_cleaning(&mut self) -> Result<(), SensorError> {
        const OP: &str = "sps30_start_manual_fan_cleaning";
        if self.core.state() != SensorState::Ready {
            return Err(self.core.error(
                ErrorKind::ReadError,
                OP,
                format!("fan cleaning needs a running measurement ({})", self.core.state()),
            ));
        }
        self.core.with_session(OP, MEASURING, |driver, handle| {
            check(Phase::Command, OP, driver.sps30_start_manual_fan_cleaning(handle))
        })?;
        log::info!("[{}] fan cleaning started", self.core.name());
        Ok(())
    }

    /// Auto-cleaning interval in days as reported by the device.
    pub fn auto_clean_interval(&mut self) -> Result<u32, SensorError> {
        const OP: &str = "sps30_get_fan_auto_cleaning_interval_days";
        self.core.with_session(OP, MEASURING, |driver, handle| {
            let mut days = 0;
            check(Phase::Command, OP, driver.sps30_get_fan_auto_cleaning_interval_days(handle, &mut days))?;
            Ok(u32::from(days))
        })
    }

    pub fn set_auto_clean_interval(&mut self, days: u32) -> Result<(), SensorError> {
        const OP: &str = "sps30_set_fan_auto_cleaning_interval_days";
        let raw = encode_auto_clean_days(days).map_err(|e| e.for_sensor(self.core.name()))?;
        self.core.with_session(OP, MEASURING, |driver, handle| {
            check(Phase::Command, OP, driver.sps30_set_fan_auto_cleaning_interval_days(handle, raw))
        })?;
        self.config.auto_clean_days = days;
        Ok(())
    }

    /// Soft-reset the device and start measuring again.
    ///
    /// The device comes out of a reset idle, with its settings kept. A reset
    /// that succeeds but cannot be followed by a measurement start leaves the
    /// sensor Failed.
    pub fn reset(&mut self) -> Result<(), SensorError> {
        const OP: &str = "sps30_reset";
        let mut idle = false;
        let result = self
            .core
            .with_session(OP, &[SensorState::Ready, SensorState::Sleeping], |driver, handle| {
                check(Phase::Command, OP, driver.sps30_reset(handle))?;
                let started = check(Phase::Command, "sps30_start_measurement", driver.sps30_start_measurement(handle));
                idle = started.is_err();
                started
            });
        if idle {
            self.core.mark_failed();
        }
        result?;
        self.core.set_state(SensorState::Ready);
        log::info!("[{}] reset", self.core.name());
        self.warm_up();
        Ok(())
    }

    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.firmware
    }

    pub(crate) fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }
}

impl Lifecycle for ParticulateSensor {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Particulate
    }

    fn state(&self) -> SensorState {
        self.core.state()
    }

    fn info(&self) -> SensorInfo {
        self.core.info().clone()
    }

    fn probe(&mut self) -> Result<(), SensorError> {
        let device = self.device()?;
        let baud = self.uart.baud;
        self.core.probe_with(|driver, _| {
            check(Phase::Probe, "sps30_probe", driver.sps30_probe(&device, baud))
        })
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        self.core.begin_initialize()?;
        let device = match self.device() {
            Ok(device) => device,
            Err(e) => {
                self.core.mark_failed();
                return Err(e.into_init_failure());
            }
        };
        if !self.core.probed() {
            self.probe().map_err(SensorError::into_init_failure)?;
        }

        let baud = self.uart.baud;
        let days = self.config.auto_clean_days;
        let firmware = self.core.initialize_with(
            |driver| {
                let mut handle = 0;
                check(Phase::Initialize, "sps30_open", driver.sps30_open(&device, baud, &mut handle))?;
                Ok(handle)
            },
            |driver, handle, info| {
                let mut raw = Sps30VersionInformation::default();
                let status = driver.sps30_read_version(handle, &mut raw);
                check(Phase::Initialize, "sps30_read_version", status)?;
                let firmware = sps30::decode_version(status, &raw)?;

                let mut serial = Sps30Serial::default();
                let status = driver.sps30_get_serial(handle, &mut serial);
                check(Phase::Initialize, "sps30_get_serial", status)?;
                info.serial_number = Some(sps30::decode_serial(status, &serial)?);
                info.firmware = Some(firmware);

                let days = encode_auto_clean_days(days)?;
                check(
                    Phase::Initialize,
                    "sps30_set_fan_auto_cleaning_interval_days",
                    driver.sps30_set_fan_auto_cleaning_interval_days(handle, days),
                )?;
                check(
                    Phase::Initialize,
                    "sps30_start_measurement",
                    driver.sps30_start_measurement(handle),
                )?;
                Ok(firmware)
            },
            close,
        )?;

        self.firmware = Some(firmware);
        log::debug!("[{}] firmware {}", self.core.name(), firmware);
        self.warm_up();
        Ok(())
    }

    fn read(&mut self) -> Result<MeasurementRecord, SensorError> {
        const OP: &str = "sps30_read_measurement";
        let pm = self.core.with_session(OP, MEASURING, |driver, handle| {
            let mut raw = Sps30Measurement::default();
            let status = driver.sps30_read_measurement(handle, &mut raw);
            check(Phase::Read, OP, status)?;
            sps30::decode_measurement(status, &raw)
        })?;
        Ok(MeasurementRecord::new(self.core.name(), Measurement::Particulate(pm)))
    }

    fn stop(&mut self) -> Result<(), SensorError> {
        let name = self.core.name().to_string();
        self.core.stop_with(|driver, handle, previous| {
            if previous == SensorState::Ready {
                let status = driver.sps30_stop_measurement(handle);
                if status != NO_ERROR {
                    log::warn!("[{name}] sps30_stop_measurement returned error code {status}");
                }
            }
            check(Phase::Stop, "sps30_close", driver.sps30_close(handle))
        })
    }

    /// Stop measuring and enter sleep mode. A no-op on firmware older than 2.0.
    fn sleep(&mut self) -> Result<(), SensorError> {
        match self.core.state() {
            SensorState::Sleeping => return Ok(()),
            SensorState::Ready if !self.supports_sleep() => {
                log::debug!("[{}] firmware does not support sleep", self.core.name());
                return Ok(());
            }
            _ => {}
        }

        let mut idle = false;
        let result = self.core.with_session("sps30_sleep", MEASURING, |driver, handle| {
            check(Phase::Command, "sps30_stop_measurement", driver.sps30_stop_measurement(handle))?;
            let status = driver.sps30_sleep(handle);
            if let Err(mut e) = check(Phase::Command, "sps30_sleep", status) {
                // back to measuring so the sensor stays usable
                let restart = driver.sps30_start_measurement(handle);
                if restart != NO_ERROR {
                    idle = true;
                    e.message = format!("{}, restarting measurement returned error code {restart}", e.message);
                }
                return Err(e);
            }
            Ok(())
        });
        if idle {
            log::error!("[{}] neither asleep nor measuring after a failed sleep", self.core.name());
            self.core.mark_failed();
        }
        result?;
        self.core.set_state(SensorState::Sleeping);
        Ok(())
    }

    fn wake_up(&mut self) -> Result<(), SensorError> {
        if self.core.state() == SensorState::Ready {
            return Ok(());
        }
        self.core.with_session("sps30_wake_up", &[SensorState::Sleeping], |driver, handle| {
            check(Phase::Command, "sps30_wake_up", driver.sps30_wake_up(handle))?;
            check(Phase::Command, "sps30_start_measurement", driver.sps30_start_measurement(handle))
        })?;
        self.core.set_state(SensorState::Ready);
        self.warm_up();
        Ok(())
    }
}

impl Drop for ParticulateSensor {
    fn drop(&mut self) {
        if self.core.state() != SensorState::Stopped
            && let Err(e) = self.stop()
        {
            log::debug!("[{}] stop on drop failed: {e}", self.core.name());
        }
    }
}
