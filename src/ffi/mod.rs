//! Native driver contract.
//!
//! The Sensirion embedded drivers keep one device per bus in global state and
//! address it implicitly. The bridge does not call them directly: it loads
//! `libsensirion.so`, a thin C wrapper built next to the vendor drivers that
//! exports the session-based functions below. Every `*_open` returns a
//! `uint32_t` session id that the other calls of that family take first, and
//! every function returns the vendor `int16_t` status. A library that does not
//! export all of them is rejected at load time.
//!
//! [`NativeDriver`] has one method per exported function. Arguments are the
//! raw mirrors from [`crate::bridge`]. [`library::NativeLibrary`] implements it
//! on top of the shared library, [`simulation::SimulatedDriver`] in memory.

pub mod library;
pub mod simulation;

use std::ffi::CStr;

use crate::bridge::sht4x::{Sht4xMeasurement, Sht4xMode};
use crate::bridge::sps30::{Sps30Measurement, Sps30Serial, Sps30VersionInformation};
use crate::bridge::stc3x::{Stc3xCompensation, Stc3xConfig, Stc3xMeasurement, Stc3xProductInfo};

pub use library::{NativeLibrary, load, loaded};
pub use simulation::SimulatedDriver;

/// `int16_t` returned by every driver function, `0` on success.
pub type Status = i16;

/// `uint32_t` session id returned by the `*_open` functions.
pub type SessionHandle = u32;

/// File name of the driver library inside a library directory.
pub const LIBRARY_FILE_NAME: &str = "libsensirion.so";

pub trait NativeDriver: Send + Sync {
    fn stc3x_probe(&self, bus: u8, address: u8, info: &mut Stc3xProductInfo) -> Status;
    fn stc3x_open(&self, bus: u8, address: u8, handle: &mut SessionHandle) -> Status;
    fn stc3x_configure(&self, handle: SessionHandle, config: &Stc3xConfig) -> Status;
    fn stc3x_set_compensation(&self, handle: SessionHandle, compensation: &Stc3xCompensation) -> Status;
    fn stc3x_measure(&self, handle: SessionHandle, out: &mut Stc3xMeasurement) -> Status;
    fn stc3x_forced_recalibration(&self, handle: SessionHandle, reference_ticks: u16) -> Status;
    fn stc3x_set_automatic_self_calibration(&self, handle: SessionHandle, enabled: u8) -> Status;
    fn stc3x_enter_sleep_mode(&self, handle: SessionHandle) -> Status;
    fn stc3x_exit_sleep_mode(&self, handle: SessionHandle) -> Status;
    fn stc3x_close(&self, handle: SessionHandle) -> Status;

    fn sht4x_probe(&self, bus: u8, address: u8, serial: &mut u32) -> Status;
    fn sht4x_open(&self, bus: u8, address: u8, handle: &mut SessionHandle) -> Status;
    fn sht4x_soft_reset(&self, handle: SessionHandle) -> Status;
    fn sht4x_configure(&self, handle: SessionHandle, mode: &Sht4xMode) -> Status;
    fn sht4x_measure(&self, handle: SessionHandle, out: &mut Sht4xMeasurement) -> Status;
    fn sht4x_close(&self, handle: SessionHandle) -> Status;

    fn sps30_probe(&self, device: &CStr, baud: u32) -> Status;
    fn sps30_open(&self, device: &CStr, baud: u32, handle: &mut SessionHandle) -> Status;
    fn sps30_read_version(&self, handle: SessionHandle, out: &mut Sps30VersionInformation) -> Status;
    fn sps30_get_serial(&self, handle: SessionHandle, out: &mut Sps30Serial) -> Status;
    fn sps30_set_fan_auto_cleaning_interval_days(&self, handle: SessionHandle, days: u8) -> Status;
    fn sps30_get_fan_auto_cleaning_interval_days(&self, handle: SessionHandle, days: &mut u8) -> Status;
    fn sps30_start_measurement(&self, handle: SessionHandle) -> Status;
    fn sps30_stop_measurement(&self, handle: SessionHandle) -> Status;
    fn sps30_read_measurement(&self, handle: SessionHandle, out: &mut Sps30Measurement) -> Status;
    fn sps30_start_manual_fan_cleaning(&self, handle: SessionHandle) -> Status;
    fn sps30_sleep(&self, handle: SessionHandle) -> Status;
    fn sps30_wake_up(&self, handle: SessionHandle) -> Status;
    fn sps30_reset(&self, handle: SessionHandle) -> Status;
    fn sps30_close(&self, handle: SessionHandle) -> Status;
}
