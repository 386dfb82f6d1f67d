//! STC31-C CO₂ sensor.
//!
//! The STC31-C measures by thermal conductivity and needs the ambient
//! humidity, temperature and pressure to report an accurate concentration.
//! Without compensation the sensor refuses to read.

use std::sync::Arc;

use super::session::{SensorCore, check};
use super::{Lifecycle, SensorState};
use crate::bridge::encode_i2c_address;
use crate::bridge::stc3x::{
    self, Stc3xMeasurement, Stc3xProductInfo, encode_compensation, encode_config,
    encode_recalibration_reference,
};
use crate::descriptor::{Co2Config, Compensation, I2cAddress, SensorKind};
use crate::error::{ErrorKind, Phase, SensorError};
use crate::ffi::{NativeDriver, SessionHandle, Status};
use crate::measurement::{Measurement, MeasurementRecord, SensorInfo};

const AWAKE: &[SensorState] = &[SensorState::Ready];
const SESSION: &[SensorState] = &[SensorState::Ready, SensorState::Sleeping];

fn close(driver: &dyn NativeDriver, handle: SessionHandle) -> Status {
    driver.stc3x_close(handle)
}

pub struct Co2Sensor {
    core: SensorCore,
    i2c: I2cAddress,
    config: Co2Config,
    /// Compensation currently applied on the device.
    compensation: Option<Compensation>,
}

impl Co2Sensor {
    pub fn new(name: impl Into<String>, i2c: I2cAddress, config: Co2Config, driver: Arc<dyn NativeDriver>) -> Self {
        Self {
            core: SensorCore::new(name, driver, SensorKind::Co2.model()),
            i2c,
            config,
            compensation: None,
        }
    }

    pub fn compensation(&self) -> Option<Compensation> {
        self.compensation
    }

    /// Apply new ambient values. Allowed while Ready or Sleeping.
    pub fn set_compensation(&mut self, compensation: Compensation) -> Result<(), SensorError> {
        const OP: &str = "stc3x_set_compensation";
        let raw = encode_compensation(&compensation).map_err(|e| e.for_sensor(self.core.name()))?;
        self.core.with_session(OP, SESSION, |driver, handle| {
            check(Phase::Command, OP, driver.stc3x_set_compensation(handle, &raw))
        })?;
        log::debug!(
            "[{}] compensation set to {:.1} %RH, {:.1} °C, {:.0} mbar",
            self.core.name(),
            compensation.relative_humidity,
            compensation.temperature_c,
            compensation.pressure_mbar
        );
        self.compensation = Some(compensation);
        Ok(())
    }

    /// Recalibrate against a known reference concentration in vol%.
    pub fn forced_recalibration(&mut self, reference_vol_percent: f32) -> Result<(), SensorError> {
        const OP: &str = "stc3x_forced_recalibration";
        let ticks = encode_recalibration_reference(reference_vol_percent)
            .map_err(|e| e.for_sensor(self.core.name()))?;
        self.core.with_session(OP, AWAKE, |driver, handle| {
            check(Phase::Command, OP, driver.stc3x_forced_recalibration(handle, ticks))
        })?;
        log::info!(
            "[{}] recalibrated to {} vol% reference",
            self.core.name(),
            reference_vol_percent
        );
        Ok(())
    }

    pub fn self_calibration(&self) -> bool {
        self.config.self_calibration
    }

    /// Turn automatic self-calibration on or off. Only while Ready.
    ///
    /// The setting is kept for later initializations of this sensor.
    pub fn set_self_calibration(&mut self, enabled: bool) -> Result<(), SensorError> {
        const OP: &str = "stc3x_set_automatic_self_calibration";
        self.core.with_session(OP, AWAKE, |driver, handle| {
            check(Phase::Command, OP, driver.stc3x_set_automatic_self_calibration(handle, u8::from(enabled)))
        })?;
        self.config.self_calibration = enabled;
        log::info!(
            "[{}] automatic self-calibration {}",
            self.core.name(),
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub(crate) fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &SensorCore {
        &self.core
    }
}

impl Lifecycle for Co2Sensor {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn kind(&self) -> SensorKind {
        SensorKind::Co2
    }

    fn state(&self) -> SensorState {
        self.core.state()
    }

    fn info(&self) -> SensorInfo {
        self.core.info().clone()
    }

    fn probe(&mut self) -> Result<(), SensorError> {
        const OP: &str = "stc3x_probe";
        let i2c = self.i2c;
        self.core.probe_with(|driver, info| {
            let (bus, address) = encode_i2c_address(&i2c)?;
            let mut raw = Stc3xProductInfo::default();
            let status = driver.stc3x_probe(bus, address, &mut raw);
            check(Phase::Probe, OP, status)?;
            let (product_id, serial) = stc3x::decode_product_info(status, &raw)?;
            info.product_id = Some(product_id);
            info.serial_number = Some(serial);
            Ok(())
        })
    }

    fn initialize(&mut self) -> Result<(), SensorError> {
        self.core.begin_initialize()?;
        if !self.core.probed() {
            self.probe().map_err(SensorError::into_init_failure)?;
        }

        let i2c = self.i2c;
        let config = encode_config(self.config.binary_gas, self.config.self_calibration);
        let compensation = self.config.compensation;
        self.compensation = None;

        let applied = self.core.initialize_with(
            |driver| {
                let (bus, address) = encode_i2c_address(&i2c)?;
                let mut handle = 0;
                check(Phase::Initialize, "stc3x_open", driver.stc3x_open(bus, address, &mut handle))?;
                Ok(handle)
            },
            |driver, handle, _| {
                check(Phase::Initialize, "stc3x_configure", driver.stc3x_configure(handle, &config))?;
                if let Some(compensation) = compensation {
                    let raw = encode_compensation(&compensation)?;
                    check(
                        Phase::Initialize,
                        "stc3x_set_compensation",
                        driver.stc3x_set_compensation(handle, &raw),
                    )?;
                }
                Ok(compensation)
            },
            close,
        )?;

        self.compensation = applied;
        if applied.is_none() {
            log::warn!(
                "[{}] no compensation configured, reads fail until it is set",
                self.core.name()
            );
        }
        Ok(())
    }

    fn read(&mut self) -> Result<MeasurementRecord, SensorError> {
        const OP: &str = "stc3x_measure";
        self.core.session(OP, AWAKE)?;
        if self.compensation.is_none() {
            return Err(self.core.error(
                ErrorKind::InitializationError,
                OP,
                "compensation has not been set",
            ));
        }

        let (co2_ppm, temp_c) = self.core.with_session(OP, AWAKE, |driver, handle| {
            let mut raw = Stc3xMeasurement::default();
            let status = driver.stc3x_measure(handle, &mut raw);
            check(Phase::Read, OP, status)?;
            stc3x::decode_measurement(status, &raw)
        })?;
        Ok(MeasurementRecord::new(
            self.core.name(),
            Measurement::Co2 { co2_ppm, temp_c },
        ))
    }

    fn stop(&mut self) -> Result<(), SensorError> {
        self.core.stop_with(|driver, handle, _| {
            check(Phase::Stop, "stc3x_close", driver.stc3x_close(handle))
        })
    }

    fn sleep(&mut self) -> Result<(), SensorError> {
        const OP: &str = "stc3x_enter_sleep_mode";
        if self.core.state() == SensorState::Sleeping {
            return Ok(());
        }
        self.core.with_session(OP, AWAKE, |driver, handle| {
            check(Phase::Command, OP, driver.stc3x_enter_sleep_mode(handle))
        })?;
        self.core.set_state(SensorState::Sleeping);
        Ok(())
    }

    fn wake_up(&mut self) -> Result<(), SensorError> {
        const OP: &str = "stc3x_exit_sleep_mode";
        if self.core.state() == SensorState::Ready {
            return Ok(());
        }
        self.core.with_session(OP, &[SensorState::Sleeping], |driver, handle| {
            check(Phase::Command, OP, driver.stc3x_exit_sleep_mode(handle))
        })?;
        self.core.set_state(SensorState::Ready);
        Ok(())
    }
}

impl Drop for Co2Sensor {
    fn drop(&mut self) {
        if self.core.state() != SensorState::Stopped
            && let Err(e) = self.stop()
        {
            log::debug!("[{}] stop on drop failed: {e}", self.core.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::status::{BUS_ERROR, CRC_ERROR, INVALID_HANDLE, NACK_ERROR};
    use crate::ffi::SimulatedDriver;

    fn sensor(driver: &Arc<SimulatedDriver>, compensation: Option<Compensation>) -> Co2Sensor {
        let config = Co2Config {
            compensation,
            ..Co2Config::default()
        };
        Co2Sensor::new(
            "stc31c",
            I2cAddress { bus: 1, address: 0x29 },
            config,
            driver.clone(),
        )
    }

    fn rh50() -> Option<Compensation> {
        Some(Compensation {
            relative_humidity: 50.0,
            ..Compensation::default()
        })
    }

    #[test]
    fn test_initialize_sequence() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();
        assert_eq!(co2.state(), SensorState::Ready);
        assert_eq!(
            driver.calls(),
            vec!["stc3x_probe", "stc3x_open", "stc3x_configure", "stc3x_set_compensation"]
        );
        let config = driver.last_config().unwrap();
        assert_eq!(config.binary_gas, 19);
        assert_eq!(config.self_calibration, 0);
        assert_eq!(driver.last_compensation().unwrap().relative_humidity_ticks, 32768);

        let info = co2.info();
        assert_eq!(info.product_id, Some(0x0801_0301));
        assert_eq!(info.serial_number.as_deref(), Some("123456789ABCDEF"));
    }

    #[test]
    fn test_toggle_self_calibration() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        assert_eq!(co2.set_self_calibration(true).unwrap_err().kind, ErrorKind::ReadError);
        assert!(driver.calls().is_empty());

        co2.initialize().unwrap();
        assert_eq!(driver.self_calibration(), Some(false));
        co2.set_self_calibration(true).unwrap();
        assert!(co2.self_calibration());
        assert_eq!(driver.self_calibration(), Some(true));

        // a failed toggle keeps the previous setting
        driver.fail_once("stc3x_set_automatic_self_calibration", NACK_ERROR);
        assert_eq!(co2.set_self_calibration(false).unwrap_err().code, Some(NACK_ERROR));
        assert!(co2.self_calibration());

        // kept across a restart
        co2.stop().unwrap();
        let mut co2 = Co2Sensor::new("stc31c", I2cAddress { bus: 1, address: 0x29 }, co2.config.clone(), driver.clone());
        co2.initialize().unwrap();
        assert_eq!(driver.last_config().unwrap().self_calibration, 1);
    }

    #[test]
    fn test_read_converts_to_ppm() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();
        let record = co2.read().unwrap();
        assert_eq!(record.sensor, "stc31c");
        assert_eq!(record.values, Measurement::Co2 { co2_ppm: 412, temp_c: 23.5 });
    }

    #[test]
    fn test_read_without_compensation_makes_no_call() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, None);
        co2.initialize().unwrap();
        assert!(!driver.calls().contains(&"stc3x_set_compensation"));
        driver.clear_calls();

        let err = co2.read().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InitializationError);
        assert!(driver.calls().is_empty());
        assert_eq!(co2.state(), SensorState::Ready);

        co2.set_compensation(Compensation::default()).unwrap();
        assert!(co2.read().is_ok());
    }

    #[test]
    fn test_probe_nack() {
        let driver = Arc::new(SimulatedDriver::new());
        driver.fail_once("stc3x_probe", NACK_ERROR);
        let mut co2 = sensor(&driver, rh50());
        let err = co2.probe().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProbeFailed);
        assert_eq!(err.code, Some(NACK_ERROR));
        assert_eq!(co2.state(), SensorState::Failed);
        assert_eq!(driver.open_sessions(), 0);
    }

    #[test]
    fn test_probe_bus_error_is_transport() {
        let driver = Arc::new(SimulatedDriver::new());
        driver.fail_once("stc3x_probe", BUS_ERROR);
        let mut co2 = sensor(&driver, rh50());
        assert_eq!(co2.probe().unwrap_err().kind, ErrorKind::TransportUnavailable);
    }

    #[test]
    fn test_probe_failure_during_initialize() {
        let driver = Arc::new(SimulatedDriver::new());
        driver.fail_once("stc3x_probe", NACK_ERROR);
        let mut co2 = sensor(&driver, rh50());
        let err = co2.initialize().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InitializationError);
        assert_eq!(err.code, Some(NACK_ERROR));
        assert_eq!(driver.call_count("stc3x_open"), 0);
    }

    #[test]
    fn test_initialize_rollback_at_each_step() {
        for step in ["stc3x_open", "stc3x_configure", "stc3x_set_compensation"] {
            let driver = Arc::new(SimulatedDriver::new());
            driver.fail_once(step, CRC_ERROR);
            let mut co2 = sensor(&driver, rh50());

            let err = co2.initialize().unwrap_err();
            assert_eq!(err.kind, ErrorKind::InitializationError, "{step}");
            assert_eq!(err.code, Some(CRC_ERROR), "{step}");
            assert_eq!(co2.state(), SensorState::Failed, "{step}");
            assert_eq!(driver.open_sessions(), 0, "{step}");
            let expected_closes = if step == "stc3x_open" { 0 } else { 1 };
            assert_eq!(driver.call_count("stc3x_close"), expected_closes, "{step}");

            // starting over from Failed probes again
            co2.initialize().unwrap();
            assert_eq!(driver.call_count("stc3x_probe"), 2, "{step}");
        }
    }

    #[test]
    fn test_reinitialize_from_ready_is_rejected() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();
        let err = co2.initialize().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InitializationError);
        assert_eq!(co2.state(), SensorState::Ready);
        assert_eq!(driver.call_count("stc3x_open"), 1);
    }

    #[test]
    fn test_failed_read_stays_ready() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();

        driver.fail_once("stc3x_measure", 5);
        assert!(co2.read().unwrap_err().is_timeout());
        assert_eq!(co2.state(), SensorState::Ready);

        driver.set_co2(f32::NAN, 23.5);
        assert_eq!(co2.read().unwrap_err().kind, ErrorKind::DecodingError);
        assert_eq!(co2.state(), SensorState::Ready);
    }

    #[test]
    fn test_invalid_handle_fails_sensor() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();
        driver.fail_once("stc3x_measure", INVALID_HANDLE);
        assert_eq!(co2.read().unwrap_err().kind, ErrorKind::AlreadyStopped);
        assert_eq!(co2.state(), SensorState::Failed);
        assert!(co2.core().handle().is_none());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();
        co2.stop().unwrap();
        co2.stop().unwrap();
        assert_eq!(driver.call_count("stc3x_close"), 1);
        assert_eq!(co2.read().unwrap_err().kind, ErrorKind::AlreadyStopped);
    }

    #[test]
    fn test_stop_before_initialize() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.stop().unwrap();
        assert_eq!(co2.state(), SensorState::Stopped);
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_close_failure_still_releases() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();
        driver.fail_once("stc3x_close", BUS_ERROR);
        let err = co2.stop().unwrap_err();
        assert_eq!(err.code, Some(BUS_ERROR));
        assert_eq!(co2.state(), SensorState::Stopped);
        co2.stop().unwrap();
        assert_eq!(driver.call_count("stc3x_close"), 1);
    }

    #[test]
    fn test_drop_closes_session() {
        let driver = Arc::new(SimulatedDriver::new());
        {
            let mut co2 = sensor(&driver, rh50());
            co2.initialize().unwrap();
            assert_eq!(driver.open_sessions(), 1);
        }
        assert_eq!(driver.open_sessions(), 0);
    }

    #[test]
    fn test_sleep_and_wake() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();

        co2.sleep().unwrap();
        assert_eq!(co2.state(), SensorState::Sleeping);
        assert_eq!(co2.read().unwrap_err().kind, ErrorKind::ReadError);
        // compensation can still be updated while asleep
        co2.set_compensation(Compensation::default()).unwrap();

        co2.wake_up().unwrap();
        assert_eq!(co2.state(), SensorState::Ready);
        assert!(co2.read().is_ok());
        assert_eq!(driver.call_count("stc3x_enter_sleep_mode"), 1);
        assert_eq!(driver.call_count("stc3x_exit_sleep_mode"), 1);
    }

    #[test]
    fn test_compensation_out_of_range() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();
        driver.clear_calls();
        let err = co2
            .set_compensation(Compensation {
                relative_humidity: 120.0,
                ..Compensation::default()
            })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::EncodingError);
        assert_eq!(err.sensor, "stc31c");
        assert!(driver.calls().is_empty());
        assert_eq!(co2.compensation().unwrap().relative_humidity, 50.0);
    }

    #[test]
    fn test_forced_recalibration() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut co2 = sensor(&driver, rh50());
        co2.initialize().unwrap();
        co2.forced_recalibration(0.0).unwrap();
        assert_eq!(driver.last_recalibration(), Some(16384));
        assert_eq!(
            co2.forced_recalibration(150.0).unwrap_err().kind,
            ErrorKind::EncodingError
        );
    }
}
