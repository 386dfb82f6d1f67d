//! Binary bridge between host values and the native driver structures.
//!
//! Every structure the driver library reads or writes has a `#[repr(C)]`
//! mirror here. Host values go through an `encode_*` function (range checked
//! against the native field type) before a call, and native results come back
//! through a `decode_*` function (status and physical range checked) before
//! they are handed to the sensor layer. Raw structures never leave this module
//! and [`crate::ffi`].
//!
//! The layout tests compare against byte images written out by hand from the
//! C declarations of the wrapper's structures, as laid out on 64-bit
//! little-endian Linux.

pub mod sht4x;
pub mod sps30;
pub mod stc3x;

use crate::descriptor::I2cAddress;
use crate::error::{ErrorKind, SensorError};
use crate::error::status::NO_ERROR;

/// Plain-old-data mirror of a native structure.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` and consist only of fixed-width integers,
/// floats and arrays of those, so that every bit pattern of `SIZE` bytes is a
/// valid value.
pub unsafe trait RawStruct: Copy + Default {
    /// Size of the native structure in bytes, padding included.
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Native byte image with padding zeroed.
    fn to_bytes(&self) -> Vec<u8>;

    /// Reinterpret a native byte image the way the driver's memory would be read.
    fn from_native_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        // SAFETY: length checked above, the trait contract guarantees every bit
        // pattern is valid and read_unaligned has no alignment requirement.
        Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<Self>()) })
    }
}

pub(crate) fn encoding_error(operation: &'static str, message: impl Into<String>) -> SensorError {
    SensorError::new(ErrorKind::EncodingError, "", operation, message)
}

pub(crate) fn decoding_error(operation: &'static str, message: impl Into<String>) -> SensorError {
    SensorError::new(ErrorKind::DecodingError, "", operation, message)
}

/// Reject results of calls that did not succeed.
pub(crate) fn check_status(operation: &'static str, status: i16) -> Result<(), SensorError> {
    if status == NO_ERROR {
        Ok(())
    } else {
        Err(decoding_error(operation, "result buffer of a failed call").with_code(status))
    }
}

/// Check a float field lies in `min..=max`. NaN and infinities never do.
pub(crate) fn check_range(
    operation: &'static str,
    field: &str,
    value: f32,
    min: f32,
    max: f32,
) -> Result<f32, SensorError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(decoding_error(
            operation,
            format!("{field} = {value} outside valid range {min}..={max}"),
        ))
    }
}

/// Validate an I²C target before it is handed to the native layer.
pub fn encode_i2c_address(i2c: &I2cAddress) -> Result<(u8, u8), SensorError> {
    if i2c.address > 0x7F {
        return Err(encoding_error(
            "encode_i2c_address",
            format!("0x{:02X} is not a 7-bit I2C address", i2c.address),
        ));
    }
    Ok((i2c.bus, i2c.address))
}

/// Copy one field's little-endian bytes into a byte image at `offset`.
pub(crate) fn put(bytes: &mut [u8], offset: usize, field: &[u8]) {
    bytes[offset..offset + field.len()].copy_from_slice(field);
}
