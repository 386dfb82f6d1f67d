//! Native status code table.
//!
//! The driver library returns `int16_t` status codes, `0` meaning success.
//! Codes shared by the I²C drivers are small positive numbers, the SPS30 SHDLC
//! driver adds negative codes and a range of device state errors.

use super::{ErrorKind, Phase};

pub const NO_ERROR: i16 = 0;
pub const CRC_ERROR: i16 = 1;
pub const BUS_ERROR: i16 = 2;
pub const NACK_ERROR: i16 = 3;
pub const BYTE_NUM_ERROR: i16 = 4;
pub const TIMEOUT_ERROR: i16 = 5;
pub const INVALID_HANDLE: i16 = 6;

pub const SPS30_ERR_NOT_ENOUGH_DATA: i16 = -1;
pub const SPS30_ERR_SHDLC_TIMEOUT: i16 = -2;
pub const UART_OPEN_FAILED: i16 = -10;

/// SPS30 device state errors are reported as `0x100 | state`.
pub const SPS30_ERR_STATE_MASK: i16 = 0x100;

/// Look up a status code in the fixed table.
///
/// Returns `None` for success and for codes the table does not know.
pub fn translate(code: i16) -> Option<ErrorKind> {
    match code {
        CRC_ERROR | BYTE_NUM_ERROR => Some(ErrorKind::DecodingError),
        BUS_ERROR | UART_OPEN_FAILED => Some(ErrorKind::TransportUnavailable),
        NACK_ERROR => Some(ErrorKind::ProbeFailed),
        TIMEOUT_ERROR | SPS30_ERR_SHDLC_TIMEOUT => Some(ErrorKind::Timeout),
        INVALID_HANDLE => Some(ErrorKind::AlreadyStopped),
        SPS30_ERR_NOT_ENOUGH_DATA => Some(ErrorKind::ReadError),
        0x100..=0x1FF => Some(ErrorKind::ReadError),
        _ => None,
    }
}

/// Error kind surfaced for a failed call made in `phase`.
pub fn classify(phase: Phase, code: i16) -> ErrorKind {
    let mapped = translate(code);
    match phase {
        Phase::Initialize => ErrorKind::InitializationError,
        Phase::Probe => match mapped {
            Some(ErrorKind::TransportUnavailable) => ErrorKind::TransportUnavailable,
            _ => ErrorKind::ProbeFailed,
        },
        // a NACK mid-session means the device went away, not that probing failed
        Phase::Read | Phase::Command | Phase::Stop => match mapped {
            None | Some(ErrorKind::ProbeFailed) => ErrorKind::ReadError,
            Some(kind) => kind,
        },
    }
}

pub fn describe(code: i16) -> &'static str {
    match code {
        NO_ERROR => "no error",
        CRC_ERROR => "checksum mismatch in sensor response",
        BUS_ERROR => "I2C bus error",
        NACK_ERROR => "no acknowledge from device",
        BYTE_NUM_ERROR => "unexpected number of bytes",
        TIMEOUT_ERROR => "transport timeout",
        INVALID_HANDLE => "session handle is not open",
        SPS30_ERR_NOT_ENOUGH_DATA => "not enough data available (the sensor needs more time)",
        SPS30_ERR_SHDLC_TIMEOUT => "SHDLC response timeout",
        UART_OPEN_FAILED => "UART device could not be opened",
        0x100..=0x1FF => "sensor reported a device state error",
        _ => "unknown native error",
    }
}
