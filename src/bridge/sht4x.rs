//! SHT4x driver structures (used for the SHTC3).

use std::mem::offset_of;

use super::{RawStruct, check_range, check_status, encoding_error, put};
use crate::descriptor::{MeasurementMode, Precision};
use crate::error::SensorError;

/// `struct sht4x_mode`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sht4xMode {
    pub precision: u8,
    pub periodic: u8,
    pub interval_ms: u16,
}

/// `struct sht4x_measurement`, values in milli-degrees and milli-percent.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sht4xMeasurement {
    pub temperature_milli_c: i32,
    pub humidity_milli_rh: i32,
}

// SAFETY: repr(C), integer fields only.
unsafe impl RawStruct for Sht4xMode {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; Self::SIZE];
        put(&mut bytes, offset_of!(Self, precision), &[self.precision]);
        put(&mut bytes, offset_of!(Self, periodic), &[self.periodic]);
        put(&mut bytes, offset_of!(Self, interval_ms), &self.interval_ms.to_le_bytes());
        bytes
    }
}

unsafe impl RawStruct for Sht4xMeasurement {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; Self::SIZE];
        put(
            &mut bytes,
            offset_of!(Self, temperature_milli_c),
            &self.temperature_milli_c.to_le_bytes(),
        );
        put(
            &mut bytes,
            offset_of!(Self, humidity_milli_rh),
            &self.humidity_milli_rh.to_le_bytes(),
        );
        bytes
    }
}

// Output domain of the conversion formulas in the datasheet:
// T = -45 + 175 * ticks / 65535, RH = -6 + 125 * ticks / 65535.
const TEMPERATURE_DOMAIN: (f32, f32) = (-45.0, 130.0);
const HUMIDITY_DOMAIN: (f32, f32) = (-6.0, 119.0);

pub fn encode_mode(mode: MeasurementMode, precision: Precision) -> Result<Sht4xMode, SensorError> {
    let precision = precision as u8;
    match mode {
        MeasurementMode::SingleShot => Ok(Sht4xMode {
            precision,
            periodic: 0,
            interval_ms: 0,
        }),
        MeasurementMode::Periodic { interval_ms } => {
            let interval_ms = u16::try_from(interval_ms)
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| {
                    encoding_error(
                        "encode_mode",
                        format!("periodic interval {interval_ms} ms outside 1..=65535"),
                    )
                })?;
            Ok(Sht4xMode {
                precision,
                periodic: 1,
                interval_ms,
            })
        }
    }
}

/// Decode a measurement into `(relative_humidity, temperature_c)`.
///
/// Humidity is cropped to 0..=100 %RH after the range check, as the
/// datasheet recommends.
pub fn decode_measurement(status: i16, raw: &Sht4xMeasurement) -> Result<(f32, f32), SensorError> {
    const OP: &str = "sht4x_measure";
    check_status(OP, status)?;
    let temperature = check_range(
        OP,
        "temperature",
        raw.temperature_milli_c as f32 / 1000.0,
        TEMPERATURE_DOMAIN.0,
        TEMPERATURE_DOMAIN.1,
    )?;
    let humidity = check_range(
        OP,
        "relative_humidity",
        raw.humidity_milli_rh as f32 / 1000.0,
        HUMIDITY_DOMAIN.0,
        HUMIDITY_DOMAIN.1,
    )?;
    Ok((humidity.clamp(0.0, 100.0), temperature))
}

pub fn decode_serial(status: i16, serial: u32) -> Result<String, SensorError> {
    check_status("sht4x_probe", status)?;
    Ok(format!("{serial:08X}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::mem::size_of;

    // 23.5 °C, 48.25 %RH
    const MEASUREMENT_FIXTURE: [u8; 8] = [0xCC, 0x5B, 0x00, 0x00, 0x7A, 0xBC, 0x00, 0x00];

    #[test]
    fn test_layouts() {
        assert_eq!(size_of::<Sht4xMode>(), 4);
        assert_eq!(offset_of!(Sht4xMode, interval_ms), 2);
        assert_eq!(size_of::<Sht4xMeasurement>(), 8);
        assert_eq!(offset_of!(Sht4xMeasurement, humidity_milli_rh), 4);
    }

    #[test]
    fn test_measurement_fixture() {
        let raw = Sht4xMeasurement::from_native_bytes(&MEASUREMENT_FIXTURE).unwrap();
        assert_eq!(raw.temperature_milli_c, 23_500);
        assert_eq!(raw.humidity_milli_rh, 48_250);
        assert_eq!(raw.to_bytes(), MEASUREMENT_FIXTURE);
        assert_eq!(decode_measurement(0, &raw).unwrap(), (48.25, 23.5));
    }

    #[test]
    fn test_mode_fixture() {
        let raw = encode_mode(MeasurementMode::Periodic { interval_ms: 1000 }, Precision::Medium).unwrap();
        assert_eq!(raw.to_bytes(), [0x01, 0x01, 0xE8, 0x03]);
        let single = encode_mode(MeasurementMode::SingleShot, Precision::High).unwrap();
        assert_eq!(single.to_bytes(), [0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_every_mode_round_trips() {
        let modes = [
            MeasurementMode::SingleShot,
            MeasurementMode::Periodic { interval_ms: 1 },
            MeasurementMode::Periodic { interval_ms: 2000 },
            MeasurementMode::Periodic { interval_ms: 65_535 },
        ];
        for precision in [Precision::High, Precision::Medium, Precision::Low] {
            for mode in modes {
                let raw = encode_mode(mode, precision).unwrap();
                let bytes = raw.to_bytes();
                assert_eq!(bytes[0], precision as u8, "{mode:?} {precision:?}");
                let (periodic, interval) = match mode {
                    MeasurementMode::SingleShot => (0, 0),
                    MeasurementMode::Periodic { interval_ms } => (1, interval_ms as u16),
                };
                assert_eq!(bytes[1], periodic, "{mode:?} {precision:?}");
                assert_eq!(&bytes[2..], &interval.to_le_bytes(), "{mode:?} {precision:?}");
                assert_eq!(Sht4xMode::from_native_bytes(&bytes), Some(raw), "{mode:?} {precision:?}");
            }
        }
    }

    #[test]
    fn test_mode_interval_range() {
        for interval_ms in [0, 65_536, u32::MAX] {
            let err = encode_mode(MeasurementMode::Periodic { interval_ms }, Precision::Low).unwrap_err();
            assert_eq!(err.kind, ErrorKind::EncodingError);
        }
    }

    #[test]
    fn test_humidity_is_cropped() {
        let raw = Sht4xMeasurement {
            temperature_milli_c: 20_000,
            humidity_milli_rh: 104_000,
        };
        assert_eq!(decode_measurement(0, &raw).unwrap().0, 100.0);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let raw = Sht4xMeasurement {
            temperature_milli_c: i32::MIN,
            humidity_milli_rh: 50_000,
        };
        assert_eq!(decode_measurement(0, &raw).unwrap_err().kind, ErrorKind::DecodingError);
        let raw = Sht4xMeasurement {
            temperature_milli_c: 20_000,
            humidity_milli_rh: 250_000,
        };
        assert!(decode_measurement(0, &raw).is_err());
    }

    #[test]
    fn test_serial_format() {
        assert_eq!(decode_serial(0, 0x00AB_12CD).unwrap(), "00AB12CD");
        assert!(decode_serial(1, 0).is_err());
    }
}
