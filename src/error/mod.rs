//! Error types for the sensor bridge.
//!
//! Every failure that crosses the native boundary ends up as a [`SensorError`]
//! tagged with a closed [`ErrorKind`]. Callers branch on the kind, the message
//! is for humans only.

pub mod status;

use strum::{AsRefStr, Display, EnumIter};
use thiserror::Error as ThisError;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
pub enum ErrorKind {
    /// The device did not answer on its transport.
    ProbeFailed,
    /// A step of the initialization sequence failed, or the sensor is not
    /// set up well enough to be read.
    InitializationError,
    /// A measurement could not be taken.
    ReadError,
    /// A host value does not fit the native field it is encoded into.
    EncodingError,
    /// The native layer returned data that is corrupt or physically impossible.
    DecodingError,
    /// The driver library, bus or device file is not available.
    TransportUnavailable,
    /// The native call reported a transport timeout.
    Timeout,
    /// The sensor session has already been released.
    AlreadyStopped,
    /// A sensor with this name is already registered.
    DuplicateSensorName,
    /// Another registered sensor already uses this bus address or device file.
    DuplicateTransport,
    /// No usable sensor answers to this name.
    UnknownSensor,
}

/// Phase of the lifecycle a native call was made in.
///
/// Determines the fallback kind for status codes without a table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Probe,
    Initialize,
    Read,
    Command,
    Stop,
}

/// A failure of one sensor operation.
#[derive(ThisError, Debug, Clone, PartialEq)]
#[error("[{sensor}] {operation}: {message}{}", code_suffix(.code))]
pub struct SensorError {
    pub kind: ErrorKind,
    pub sensor: String,
    /// Raw native status code, when the failure came from a native call.
    pub code: Option<i16>,
    /// Native function or host operation that failed.
    pub operation: &'static str,
    pub message: String,
}

fn code_suffix(code: &Option<i16>) -> String {
    match code {
        Some(code) => format!(" (error code: {code})"),
        None => String::new(),
    }
}

impl SensorError {
    pub fn new(
        kind: ErrorKind,
        sensor: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            sensor: sensor.into(),
            code: None,
            operation,
            message: message.into(),
        }
    }

    /// Build the error for a native call that returned a non-zero status.
    pub fn native(sensor: impl Into<String>, phase: Phase, operation: &'static str, code: i16) -> Self {
        Self {
            kind: status::classify(phase, code),
            sensor: sensor.into(),
            code: Some(code),
            operation,
            message: status::describe(code).to_string(),
        }
    }

    pub fn with_code(mut self, code: i16) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the sensor name to an error raised below the sensor layer.
    pub fn for_sensor(mut self, sensor: &str) -> Self {
        self.sensor = sensor.to_string();
        self
    }

    /// Re-tag an error as part of a failed initialization, keeping the code.
    pub(crate) fn into_init_failure(mut self) -> Self {
        self.kind = ErrorKind::InitializationError;
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Whether the driver or the device reported the failure. Host-side
    /// checks, such as a CO₂ read before any compensation was applied, are
    /// not device failures.
    pub fn is_device_failure(&self) -> bool {
        self.code.is_some() || self.kind == ErrorKind::DecodingError
    }
}

/// Application level errors (configuration, files, startup).
#[derive(ThisError, Debug)]
pub enum BridgeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = SensorError::native("sps30", Phase::Read, "sps30_read_measurement", -2);
        let text = err.to_string();
        assert!(text.starts_with("[sps30] sps30_read_measurement:"));
        assert!(text.ends_with("(error code: -2)"));
    }

    #[test]
    fn test_display_without_code() {
        let err = SensorError::new(ErrorKind::UnknownSensor, "co2", "get", "not registered");
        assert_eq!(err.to_string(), "[co2] get: not registered");
    }

    #[test]
    fn test_init_failure_keeps_code() {
        let err = SensorError::native("shtc3", Phase::Command, "sht4x_soft_reset", 1).into_init_failure();
        assert_eq!(err.kind, ErrorKind::InitializationError);
        assert_eq!(err.code, Some(1));
    }

    #[test]
    fn test_device_failures() {
        assert!(SensorError::native("co2", Phase::Read, "stc3x_measure", 2).is_device_failure());
        let precondition = SensorError::new(
            ErrorKind::InitializationError,
            "co2",
            "stc3x_measure",
            "compensation has not been set",
        );
        assert!(!precondition.is_device_failure());
        let corrupt = SensorError::new(ErrorKind::DecodingError, "pm", "sps30_read_measurement", "NaN");
        assert!(corrupt.is_device_failure());
    }

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(ErrorKind::DuplicateSensorName.as_ref(), "DuplicateSensorName");
        assert_eq!(ErrorKind::DuplicateTransport.as_ref(), "DuplicateTransport");
        assert_eq!(ErrorKind::Timeout.to_string(), "Timeout");
    }
}
