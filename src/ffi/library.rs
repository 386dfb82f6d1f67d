//! Dynamically loaded Sensirion driver library.
//!
//! The library is opened once per process. Every symbol is resolved up front so
//! that a missing function fails at load time instead of in the middle of an
//! initialization sequence. The error names the first missing symbol, which is
//! what a plain vendor driver build without the session wrapper reports.

use std::ffi::{CStr, c_char};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use libloading::Library;

use super::{LIBRARY_FILE_NAME, NativeDriver, SessionHandle, Status};
use crate::bridge::sht4x::{Sht4xMeasurement, Sht4xMode};
use crate::bridge::sps30::{Sps30Measurement, Sps30Serial, Sps30VersionInformation};
use crate::bridge::stc3x::{Stc3xCompensation, Stc3xConfig, Stc3xMeasurement, Stc3xProductInfo};
use crate::error::{ErrorKind, SensorError};

macro_rules! native_symbols {
    ($($name:ident($($arg:ty),*);)*) => {
        struct Symbols {
            $($name: unsafe extern "C" fn($($arg),*) -> Status,)*
        }

        /// Every function the driver library has to export.
        pub const SYMBOL_NAMES: &[&str] = &[$(stringify!($name)),*];

        impl Symbols {
            fn resolve(library: &Library) -> Result<Self, (&'static str, libloading::Error)> {
                // SAFETY: the signatures below are the C prototypes of the
                // driver library. The copied fn pointers are kept next to the
                // `Library` that owns them and never outlive it.
                unsafe {
                    Ok(Self {
                        $($name: *library
                            .get::<unsafe extern "C" fn($($arg),*) -> Status>(
                                concat!(stringify!($name), "\0").as_bytes(),
                            )
                            .map_err(|e| (stringify!($name), e))?,)*
                    })
                }
            }
        }
    };
}

native_symbols! {
    stc3x_probe(u8, u8, *mut Stc3xProductInfo);
    stc3x_open(u8, u8, *mut u32);
    stc3x_configure(u32, *const Stc3xConfig);
    stc3x_set_compensation(u32, *const Stc3xCompensation);
    stc3x_measure(u32, *mut Stc3xMeasurement);
    stc3x_forced_recalibration(u32, u16);
    stc3x_set_automatic_self_calibration(u32, u8);
    stc3x_enter_sleep_mode(u32);
    stc3x_exit_sleep_mode(u32);
    stc3x_close(u32);

    sht4x_probe(u8, u8, *mut u32);
    sht4x_open(u8, u8, *mut u32);
    sht4x_soft_reset(u32);
    sht4x_configure(u32, *const Sht4xMode);
    sht4x_measure(u32, *mut Sht4xMeasurement);
    sht4x_close(u32);

    sps30_probe(*const c_char, u32);
    sps30_open(*const c_char, u32, *mut u32);
    sps30_read_version(u32, *mut Sps30VersionInformation);
    sps30_get_serial(u32, *mut c_char);
    sps30_set_fan_auto_cleaning_interval_days(u32, u8);
    sps30_get_fan_auto_cleaning_interval_days(u32, *mut u8);
    sps30_start_measurement(u32);
    sps30_stop_measurement(u32);
    sps30_read_measurement(u32, *mut Sps30Measurement);
    sps30_start_manual_fan_cleaning(u32);
    sps30_sleep(u32);
    sps30_wake_up(u32);
    sps30_reset(u32);
    sps30_close(u32);
}

/// The opened driver library with all of its entry points.
pub struct NativeLibrary {
    path: PathBuf,
    symbols: Symbols,
    // Dropped last; `symbols` points into it.
    _library: Library,
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary").field("path", &self.path).finish_non_exhaustive()
    }
}

fn unavailable(message: String) -> SensorError {
    SensorError::new(ErrorKind::TransportUnavailable, "driver", "load", message)
}

/// A directory is taken to contain `libsensirion.so`.
pub fn resolve_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(LIBRARY_FILE_NAME)
    } else {
        path.to_path_buf()
    }
}

impl NativeLibrary {
    /// Open the library at `path` (a file, or a directory holding
    /// `libsensirion.so`) and resolve every driver symbol.
    pub fn open(path: &Path) -> Result<Self, SensorError> {
        let path = resolve_path(path);
        log::debug!("Loading driver library {}", path.display());

        // SAFETY: loading runs the library's initializers. The driver library
        // has none beyond the C runtime's.
        let library = unsafe { Library::new(&path) }
            .map_err(|e| unavailable(format!("cannot load {}: {e}", path.display())))?;
        let symbols = Symbols::resolve(&library).map_err(|(symbol, e)| {
            unavailable(format!(
                "{} does not export `{symbol}`, it is not a session wrapper build of the drivers: {e}",
                path.display()
            ))
        })?;

        log::info!("Loaded driver library {}", path.display());
        Ok(Self {
            path,
            symbols,
            _library: library,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

static LIBRARY: OnceLock<Arc<NativeLibrary>> = OnceLock::new();

/// Load the process-wide driver library.
///
/// The first successful call wins. Later calls return the same library, a
/// different `path` is ignored with a warning.
pub fn load(path: &Path) -> Result<Arc<NativeLibrary>, SensorError> {
    if let Some(library) = LIBRARY.get() {
        let requested = resolve_path(path);
        if requested != library.path() {
            log::warn!(
                "Driver library already loaded from {}, ignoring {}",
                library.path().display(),
                requested.display()
            );
        }
        return Ok(Arc::clone(library));
    }
    let library = Arc::new(NativeLibrary::open(path)?);
    Ok(Arc::clone(LIBRARY.get_or_init(|| library)))
}

/// The process-wide driver library, if [`load`] has succeeded.
pub fn loaded() -> Option<Arc<NativeLibrary>> {
    LIBRARY.get().cloned()
}

// SAFETY (all methods): arguments are references to repr(C) mirrors or valid
// C strings that live for the duration of the call. The driver does not keep
// any of the pointers after returning.
impl NativeDriver for NativeLibrary {
    fn stc3x_probe(&self, bus: u8, address: u8, info: &mut Stc3xProductInfo) -> Status {
        unsafe { (self.symbols.stc3x_probe)(bus, address, info) }
    }

    fn stc3x_open(&self, bus: u8, address: u8, handle: &mut SessionHandle) -> Status {
        unsafe { (self.symbols.stc3x_open)(bus, address, handle) }
    }

    fn stc3x_configure(&self, handle: SessionHandle, config: &Stc3xConfig) -> Status {
        unsafe { (self.symbols.stc3x_configure)(handle, config) }
    }

    fn stc3x_set_compensation(&self, handle: SessionHandle, compensation: &Stc3xCompensation) -> Status {
        unsafe { (self.symbols.stc3x_set_compensation)(handle, compensation) }
    }

    fn stc3x_measure(&self, handle: SessionHandle, out: &mut Stc3xMeasurement) -> Status {
        unsafe { (self.symbols.stc3x_measure)(handle, out) }
    }

    fn stc3x_forced_recalibration(&self, handle: SessionHandle, reference_ticks: u16) -> Status {
        unsafe { (self.symbols.stc3x_forced_recalibration)(handle, reference_ticks) }
    }

    fn stc3x_set_automatic_self_calibration(&self, handle: SessionHandle, enabled: u8) -> Status {
        unsafe { (self.symbols.stc3x_set_automatic_self_calibration)(handle, enabled) }
    }

    fn stc3x_enter_sleep_mode(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.stc3x_enter_sleep_mode)(handle) }
    }

    fn stc3x_exit_sleep_mode(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.stc3x_exit_sleep_mode)(handle) }
    }

    fn stc3x_close(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.stc3x_close)(handle) }
    }

    fn sht4x_probe(&self, bus: u8, address: u8, serial: &mut u32) -> Status {
        unsafe { (self.symbols.sht4x_probe)(bus, address, serial) }
    }

    fn sht4x_open(&self, bus: u8, address: u8, handle: &mut SessionHandle) -> Status {
        unsafe { (self.symbols.sht4x_open)(bus, address, handle) }
    }

    fn sht4x_soft_reset(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.sht4x_soft_reset)(handle) }
    }

    fn sht4x_configure(&self, handle: SessionHandle, mode: &Sht4xMode) -> Status {
        unsafe { (self.symbols.sht4x_configure)(handle, mode) }
    }

    fn sht4x_measure(&self, handle: SessionHandle, out: &mut Sht4xMeasurement) -> Status {
        unsafe { (self.symbols.sht4x_measure)(handle, out) }
    }

    fn sht4x_close(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.sht4x_close)(handle) }
    }

    fn sps30_probe(&self, device: &CStr, baud: u32) -> Status {
        unsafe { (self.symbols.sps30_probe)(device.as_ptr(), baud) }
    }

    fn sps30_open(&self, device: &CStr, baud: u32, handle: &mut SessionHandle) -> Status {
        unsafe { (self.symbols.sps30_open)(device.as_ptr(), baud, handle) }
    }

    fn sps30_read_version(&self, handle: SessionHandle, out: &mut Sps30VersionInformation) -> Status {
        unsafe { (self.symbols.sps30_read_version)(handle, out) }
    }

    fn sps30_get_serial(&self, handle: SessionHandle, out: &mut Sps30Serial) -> Status {
        // the driver writes at most SPS30_MAX_SERIAL_LEN bytes
        unsafe { (self.symbols.sps30_get_serial)(handle, out.bytes.as_mut_ptr().cast::<c_char>()) }
    }

    fn sps30_set_fan_auto_cleaning_interval_days(&self, handle: SessionHandle, days: u8) -> Status {
        unsafe { (self.symbols.sps30_set_fan_auto_cleaning_interval_days)(handle, days) }
    }

    fn sps30_get_fan_auto_cleaning_interval_days(&self, handle: SessionHandle, days: &mut u8) -> Status {
        unsafe { (self.symbols.sps30_get_fan_auto_cleaning_interval_days)(handle, days) }
    }

    fn sps30_start_measurement(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.sps30_start_measurement)(handle) }
    }

    fn sps30_stop_measurement(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.sps30_stop_measurement)(handle) }
    }

    fn sps30_read_measurement(&self, handle: SessionHandle, out: &mut Sps30Measurement) -> Status {
        unsafe { (self.symbols.sps30_read_measurement)(handle, out) }
    }

    fn sps30_start_manual_fan_cleaning(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.sps30_start_manual_fan_cleaning)(handle) }
    }

    fn sps30_sleep(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.sps30_sleep)(handle) }
    }

    fn sps30_wake_up(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.sps30_wake_up)(handle) }
    }

    fn sps30_reset(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.sps30_reset)(handle) }
    }

    fn sps30_close(&self, handle: SessionHandle) -> Status {
        unsafe { (self.symbols.sps30_close)(handle) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_resolves_to_library_file() {
        let dir = std::env::temp_dir();
        assert_eq!(resolve_path(&dir), dir.join("libsensirion.so"));
        let file = Path::new("/opt/sensirion/libsensirion-custom.so");
        assert_eq!(resolve_path(file), file);
    }

    #[test]
    fn test_missing_library_is_transport_unavailable() {
        let err = NativeLibrary::open(Path::new("/nonexistent/libsensirion.so")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportUnavailable);
        assert!(err.message.contains("/nonexistent/libsensirion.so"));
    }

    #[test]
    fn test_symbol_names_cover_every_family() {
        assert_eq!(SYMBOL_NAMES.len(), 30);
        let unique: std::collections::HashSet<&str> = SYMBOL_NAMES.iter().copied().collect();
        assert_eq!(unique.len(), SYMBOL_NAMES.len());
        for family in ["stc3x_", "sht4x_", "sps30_"] {
            for function in ["probe", "open", "close"] {
                let name = format!("{family}{function}");
                assert!(SYMBOL_NAMES.contains(&name.as_str()), "{name}");
            }
        }
        assert!(SYMBOL_NAMES.contains(&"sps30_reset"));
        assert!(SYMBOL_NAMES.contains(&"stc3x_set_automatic_self_calibration"));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_library_without_driver_symbols_names_the_missing_one() {
        // any loadable library that is not the wrapper
        let err = NativeLibrary::open(Path::new("libc.so.6")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportUnavailable);
        assert!(err.message.contains("`stc3x_probe`"), "{}", err.message);
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        assert!(load(Path::new("/nonexistent/dir/libsensirion.so")).is_err());
        assert!(loaded().is_none());
    }
}
