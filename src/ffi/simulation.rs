//! In-memory driver for running without hardware.
//!
//! [`SimulatedDriver`] behaves like the driver library with one STC31-C, one
//! SHTC3 and one SPS30 attached: sessions are allocated by the `*_open` calls,
//! calls on unknown sessions fail with the invalid-handle status, and the most
//! recent calls are recorded. Failures can be injected per function.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::CStr;

use parking_lot::Mutex;

use super::{NativeDriver, SessionHandle, Status};
use crate::bridge::sht4x::{Sht4xMeasurement, Sht4xMode};
use crate::bridge::sps30::{SPS30_MAX_SERIAL_LEN, Sps30Measurement, Sps30Serial, Sps30VersionInformation};
use crate::bridge::stc3x::{Stc3xCompensation, Stc3xConfig, Stc3xMeasurement, Stc3xProductInfo};
use crate::error::status::{INVALID_HANDLE, NO_ERROR, SPS30_ERR_NOT_ENOUGH_DATA};

pub const SIMULATED_STC3X_PRODUCT_ID: u32 = 0x0801_0301;
pub const SIMULATED_STC3X_SERIAL: u64 = 0x0123_4567_89AB_CDEF;
pub const SIMULATED_SHT4X_SERIAL: u32 = 0x00AB_12CD;
pub const SIMULATED_SPS30_SERIAL: &str = "3B5C78E4D1F2A06E";

/// Calls kept in the log; older ones are dropped first.
pub const MAX_RECORDED_CALLS: usize = 1024;

struct SimState {
    calls: VecDeque<&'static str>,
    fail_once: HashMap<&'static str, VecDeque<Status>>,
    fail_always: HashMap<&'static str, Status>,
    next_handle: SessionHandle,
    sessions: HashSet<SessionHandle>,
    co2: Stc3xMeasurement,
    humidity: Sht4xMeasurement,
    particulate: Sps30Measurement,
    version: Sps30VersionInformation,
    auto_clean_days: u8,
    config: Option<Stc3xConfig>,
    compensation: Option<Stc3xCompensation>,
    mode: Option<Sht4xMode>,
    recalibration_ticks: Option<u16>,
    self_calibration: Option<u8>,
    measuring: bool,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            calls: VecDeque::new(),
            fail_once: HashMap::new(),
            fail_always: HashMap::new(),
            next_handle: 1,
            sessions: HashSet::new(),
            co2: Stc3xMeasurement {
                gas_concentration_vol: 0.0412,
                temperature: 23.5,
            },
            humidity: Sht4xMeasurement {
                temperature_milli_c: 23_500,
                humidity_milli_rh: 48_250,
            },
            particulate: Sps30Measurement {
                mc_1p0: 10.0,
                mc_2p5: 25.0,
                mc_4p0: 40.0,
                mc_10p0: 100.0,
                nc_0p5: 5.0,
                nc_1p0: 10.0,
                nc_2p5: 25.0,
                nc_4p0: 40.0,
                nc_10p0: 100.0,
                typical_particle_size: 2.5,
            },
            version: Sps30VersionInformation {
                firmware_major: 2,
                firmware_minor: 2,
                hardware_revision: 7,
                shdlc_major: 2,
                shdlc_minor: 0,
            },
            auto_clean_days: 4,
            config: None,
            compensation: None,
            mode: None,
            recalibration_ticks: None,
            self_calibration: None,
            measuring: false,
        }
    }
}

impl SimState {
    fn open_session(&mut self, handle: &mut SessionHandle) -> Result<(), Status> {
        *handle = self.next_handle;
        self.sessions.insert(self.next_handle);
        self.next_handle += 1;
        Ok(())
    }

    fn session(&self, handle: SessionHandle) -> Result<(), Status> {
        if self.sessions.contains(&handle) {
            Ok(())
        } else {
            Err(INVALID_HANDLE)
        }
    }
}

#[derive(Default)]
pub struct SimulatedDriver {
    state: Mutex<SimState>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `function` return `status`.
    ///
    /// Queued failures are consumed in order, one per call.
    pub fn fail_once(&self, function: &'static str, status: Status) {
        self.state.lock().fail_once.entry(function).or_default().push_back(status);
    }

    /// Make every call of `function` return `status` until cleared.
    pub fn fail_always(&self, function: &'static str, status: Status) {
        self.state.lock().fail_always.insert(function, status);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_once.clear();
        state.fail_always.clear();
    }

    pub fn set_co2(&self, gas_concentration_vol: f32, temperature: f32) {
        self.state.lock().co2 = Stc3xMeasurement {
            gas_concentration_vol,
            temperature,
        };
    }

    pub fn set_humidity(&self, temperature_milli_c: i32, humidity_milli_rh: i32) {
        self.state.lock().humidity = Sht4xMeasurement {
            temperature_milli_c,
            humidity_milli_rh,
        };
    }

    pub fn set_particulate(&self, measurement: Sps30Measurement) {
        self.state.lock().particulate = measurement;
    }

    pub fn set_firmware(&self, major: u8, minor: u8) {
        let mut state = self.state.lock();
        state.version.firmware_major = major;
        state.version.firmware_minor = minor;
    }

    /// Driver functions called so far, oldest first. At most
    /// [`MAX_RECORDED_CALLS`] are kept.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state.lock().calls.iter().copied().collect()
    }

    pub fn call_count(&self, function: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == function).count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn last_config(&self) -> Option<Stc3xConfig> {
        self.state.lock().config
    }

    pub fn last_compensation(&self) -> Option<Stc3xCompensation> {
        self.state.lock().compensation
    }

    pub fn last_mode(&self) -> Option<Sht4xMode> {
        self.state.lock().mode
    }

    pub fn last_recalibration(&self) -> Option<u16> {
        self.state.lock().recalibration_ticks
    }

    pub fn auto_clean_days(&self) -> u8 {
        self.state.lock().auto_clean_days
    }

    /// Automatic self-calibration as last written by configure or the toggle.
    pub fn self_calibration(&self) -> Option<bool> {
        self.state.lock().self_calibration.map(|v| v != 0)
    }

    /// Whether the SPS30 is running a measurement.
    pub fn measuring(&self) -> bool {
        self.state.lock().measuring
    }

    /// Record the call, apply injected failures, then run `body`.
    fn call(&self, function: &'static str, body: impl FnOnce(&mut SimState) -> Result<(), Status>) -> Status {
        let mut state = self.state.lock();
        if state.calls.len() == MAX_RECORDED_CALLS {
            state.calls.pop_front();
        }
        state.calls.push_back(function);
        log::trace!("simulated {function}");

        if let Some(queue) = state.fail_once.get_mut(function)
            && let Some(status) = queue.pop_front()
        {
            return status;
        }
        if let Some(status) = state.fail_always.get(function) {
            return *status;
        }
        match body(&mut *state) {
            Ok(()) => NO_ERROR,
            Err(status) => status,
        }
    }

    fn on_session(
        &self,
        function: &'static str,
        handle: SessionHandle,
        body: impl FnOnce(&mut SimState) -> Result<(), Status>,
    ) -> Status {
        self.call(function, |state| {
            state.session(handle)?;
            body(state)
        })
    }

    fn close(&self, function: &'static str, handle: SessionHandle) -> Status {
        self.on_session(function, handle, |state| {
            state.sessions.remove(&handle);
            Ok(())
        })
    }
}

impl NativeDriver for SimulatedDriver {
    fn stc3x_probe(&self, _bus: u8, _address: u8, info: &mut Stc3xProductInfo) -> Status {
        self.call("stc3x_probe", |_| {
            *info = Stc3xProductInfo {
                product_id: SIMULATED_STC3X_PRODUCT_ID,
                serial_number: SIMULATED_STC3X_SERIAL,
            };
            Ok(())
        })
    }

    fn stc3x_open(&self, _bus: u8, _address: u8, handle: &mut SessionHandle) -> Status {
        self.call("stc3x_open", |state| state.open_session(handle))
    }

    fn stc3x_configure(&self, handle: SessionHandle, config: &Stc3xConfig) -> Status {
        self.on_session("stc3x_configure", handle, |state| {
            state.config = Some(*config);
            state.self_calibration = Some(config.self_calibration);
            Ok(())
        })
    }

    fn stc3x_set_compensation(&self, handle: SessionHandle, compensation: &Stc3xCompensation) -> Status {
        self.on_session("stc3x_set_compensation", handle, |state| {
            state.compensation = Some(*compensation);
            Ok(())
        })
    }

    fn stc3x_measure(&self, handle: SessionHandle, out: &mut Stc3xMeasurement) -> Status {
        self.on_session("stc3x_measure", handle, |state| {
            *out = state.co2;
            Ok(())
        })
    }

    fn stc3x_forced_recalibration(&self, handle: SessionHandle, reference_ticks: u16) -> Status {
        self.on_session("stc3x_forced_recalibration", handle, |state| {
            state.recalibration_ticks = Some(reference_ticks);
            Ok(())
        })
    }

    fn stc3x_set_automatic_self_calibration(&self, handle: SessionHandle, enabled: u8) -> Status {
        self.on_session("stc3x_set_automatic_self_calibration", handle, |state| {
            state.self_calibration = Some(enabled);
            Ok(())
        })
    }

    fn stc3x_enter_sleep_mode(&self, handle: SessionHandle) -> Status {
        self.on_session("stc3x_enter_sleep_mode", handle, |_| Ok(()))
    }

    fn stc3x_exit_sleep_mode(&self, handle: SessionHandle) -> Status {
        self.on_session("stc3x_exit_sleep_mode", handle, |_| Ok(()))
    }

    fn stc3x_close(&self, handle: SessionHandle) -> Status {
        self.close("stc3x_close", handle)
    }

    fn sht4x_probe(&self, _bus: u8, _address: u8, serial: &mut u32) -> Status {
        self.call("sht4x_probe", |_| {
            *serial = SIMULATED_SHT4X_SERIAL;
            Ok(())
        })
    }

    fn sht4x_open(&self, _bus: u8, _address: u8, handle: &mut SessionHandle) -> Status {
        self.call("sht4x_open", |state| state.open_session(handle))
    }

    fn sht4x_soft_reset(&self, handle: SessionHandle) -> Status {
        self.on_session("sht4x_soft_reset", handle, |_| Ok(()))
    }

    fn sht4x_configure(&self, handle: SessionHandle, mode: &Sht4xMode) -> Status {
        self.on_session("sht4x_configure", handle, |state| {
            state.mode = Some(*mode);
            Ok(())
        })
    }

    fn sht4x_measure(&self, handle: SessionHandle, out: &mut Sht4xMeasurement) -> Status {
        self.on_session("sht4x_measure", handle, |state| {
            *out = state.humidity;
            Ok(())
        })
    }

    fn sht4x_close(&self, handle: SessionHandle) -> Status {
        self.close("sht4x_close", handle)
    }

    fn sps30_probe(&self, _device: &CStr, _baud: u32) -> Status {
        self.call("sps30_probe", |_| Ok(()))
    }

    fn sps30_open(&self, _device: &CStr, _baud: u32, handle: &mut SessionHandle) -> Status {
        self.call("sps30_open", |state| state.open_session(handle))
    }

    fn sps30_read_version(&self, handle: SessionHandle, out: &mut Sps30VersionInformation) -> Status {
        self.on_session("sps30_read_version", handle, |state| {
            *out = state.version;
            Ok(())
        })
    }

    fn sps30_get_serial(&self, handle: SessionHandle, out: &mut Sps30Serial) -> Status {
        self.on_session("sps30_get_serial", handle, |_| {
            let serial = SIMULATED_SPS30_SERIAL.as_bytes();
            out.bytes = [0; SPS30_MAX_SERIAL_LEN];
            out.bytes[..serial.len()].copy_from_slice(serial);
            Ok(())
        })
    }

    fn sps30_set_fan_auto_cleaning_interval_days(&self, handle: SessionHandle, days: u8) -> Status {
        self.on_session("sps30_set_fan_auto_cleaning_interval_days", handle, |state| {
            state.auto_clean_days = days;
            Ok(())
        })
    }

    fn sps30_get_fan_auto_cleaning_interval_days(&self, handle: SessionHandle, days: &mut u8) -> Status {
        self.on_session("sps30_get_fan_auto_cleaning_interval_days", handle, |state| {
            *days = state.auto_clean_days;
            Ok(())
        })
    }

    fn sps30_start_measurement(&self, handle: SessionHandle) -> Status {
        self.on_session("sps30_start_measurement", handle, |state| {
            state.measuring = true;
            Ok(())
        })
    }

    fn sps30_stop_measurement(&self, handle: SessionHandle) -> Status {
        self.on_session("sps30_stop_measurement", handle, |state| {
            state.measuring = false;
            Ok(())
        })
    }

    fn sps30_read_measurement(&self, handle: SessionHandle, out: &mut Sps30Measurement) -> Status {
        self.on_session("sps30_read_measurement", handle, |state| {
            if !state.measuring {
                return Err(SPS30_ERR_NOT_ENOUGH_DATA);
            }
            *out = state.particulate;
            Ok(())
        })
    }

    fn sps30_start_manual_fan_cleaning(&self, handle: SessionHandle) -> Status {
        self.on_session("sps30_start_manual_fan_cleaning", handle, |_| Ok(()))
    }

    fn sps30_sleep(&self, handle: SessionHandle) -> Status {
        self.on_session("sps30_sleep", handle, |_| Ok(()))
    }

    fn sps30_wake_up(&self, handle: SessionHandle) -> Status {
        self.on_session("sps30_wake_up", handle, |_| Ok(()))
    }

    fn sps30_reset(&self, handle: SessionHandle) -> Status {
        self.on_session("sps30_reset", handle, |state| {
            state.measuring = false;
            Ok(())
        })
    }

    fn sps30_close(&self, handle: SessionHandle) -> Status {
        self.on_session("sps30_close", handle, |state| {
            state.sessions.remove(&handle);
            state.measuring = false;
            Ok(())
        })
    }
}
