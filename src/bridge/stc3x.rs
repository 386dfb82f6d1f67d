//! STC3x (STC31-C) structures.
//!
//! Compensation values use the sensor's fixed-point encodings:
//! relative humidity `ticks = %RH * 65535 / 100`, temperature
//! `ticks = °C * 200` (signed), pressure in whole mbar. Gas concentration is
//! reported in vol% (`1 vol% = 10 000 ppm`).

use std::mem::offset_of;

use super::{RawStruct, check_range, check_status, encoding_error, put};
use crate::descriptor::Compensation;
use crate::error::SensorError;

/// `struct stc3x_product_info`, 4 bytes of padding after `product_id`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stc3xProductInfo {
    pub product_id: u32,
    pub serial_number: u64,
}

/// `struct stc3x_config`, 1 byte of tail padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stc3xConfig {
    pub binary_gas: u16,
    pub self_calibration: u8,
}

/// `struct stc3x_compensation`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stc3xCompensation {
    pub relative_humidity_ticks: u16,
    pub temperature_ticks: i16,
    pub pressure_mbar: u16,
}

/// `struct stc3x_measurement`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stc3xMeasurement {
    pub gas_concentration_vol: f32,
    pub temperature: f32,
}

// SAFETY: all four are repr(C) and made of plain integers/floats.
unsafe impl RawStruct for Stc3xProductInfo {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; Self::SIZE];
        put(&mut bytes, offset_of!(Self, product_id), &self.product_id.to_le_bytes());
        put(&mut bytes, offset_of!(Self, serial_number), &self.serial_number.to_le_bytes());
        bytes
    }
}

unsafe impl RawStruct for Stc3xConfig {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; Self::SIZE];
        put(&mut bytes, offset_of!(Self, binary_gas), &self.binary_gas.to_le_bytes());
        put(&mut bytes, offset_of!(Self, self_calibration), &[self.self_calibration]);
        bytes
    }
}

unsafe impl RawStruct for Stc3xCompensation {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; Self::SIZE];
        put(
            &mut bytes,
            offset_of!(Self, relative_humidity_ticks),
            &self.relative_humidity_ticks.to_le_bytes(),
        );
        put(&mut bytes, offset_of!(Self, temperature_ticks), &self.temperature_ticks.to_le_bytes());
        put(&mut bytes, offset_of!(Self, pressure_mbar), &self.pressure_mbar.to_le_bytes());
        bytes
    }
}

unsafe impl RawStruct for Stc3xMeasurement {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; Self::SIZE];
        put(
            &mut bytes,
            offset_of!(Self, gas_concentration_vol),
            &self.gas_concentration_vol.to_le_bytes(),
        );
        put(&mut bytes, offset_of!(Self, temperature), &self.temperature.to_le_bytes());
        bytes
    }
}

/// Operating range of the STC31-C temperature output.
pub const TEMPERATURE_RANGE: (f32, f32) = (-40.0, 125.0);

pub fn encode_config(binary_gas: u16, self_calibration: bool) -> Stc3xConfig {
    Stc3xConfig {
        binary_gas,
        self_calibration: u8::from(self_calibration),
    }
}

pub fn encode_compensation(compensation: &Compensation) -> Result<Stc3xCompensation, SensorError> {
    const OP: &str = "encode_compensation";
    let Compensation {
        relative_humidity,
        temperature_c,
        pressure_mbar,
    } = *compensation;

    if !relative_humidity.is_finite() || !(0.0..=100.0).contains(&relative_humidity) {
        return Err(encoding_error(
            OP,
            format!("relative humidity {relative_humidity} %RH outside 0..=100"),
        ));
    }
    let temperature_ticks = (f64::from(temperature_c) * 200.0).round();
    if !temperature_ticks.is_finite()
        || temperature_ticks < f64::from(i16::MIN)
        || temperature_ticks > f64::from(i16::MAX)
    {
        return Err(encoding_error(
            OP,
            format!("temperature {temperature_c} °C does not fit the signed tick range"),
        ));
    }
    let pressure = f64::from(pressure_mbar).round();
    if !pressure.is_finite() || pressure < 0.0 || pressure > f64::from(u16::MAX) {
        return Err(encoding_error(
            OP,
            format!("pressure {pressure_mbar} mbar outside 0..=65535"),
        ));
    }

    Ok(Stc3xCompensation {
        relative_humidity_ticks: (f64::from(relative_humidity) * 65535.0 / 100.0).round() as u16,
        temperature_ticks: temperature_ticks as i16,
        pressure_mbar: pressure as u16,
    })
}

/// Encode a forced recalibration reference: `ticks = vol% * 32768 / 100 + 16384`.
pub fn encode_recalibration_reference(vol_percent: f32) -> Result<u16, SensorError> {
    if !vol_percent.is_finite() || !(0.0..=100.0).contains(&vol_percent) {
        return Err(encoding_error(
            "encode_recalibration_reference",
            format!("reference {vol_percent} vol% outside 0..=100"),
        ));
    }
    Ok((f64::from(vol_percent) * 32768.0 / 100.0 + 16384.0).round() as u16)
}

/// Decode a measurement into `(co2_ppm, temperature_c)`.
pub fn decode_measurement(status: i16, raw: &Stc3xMeasurement) -> Result<(u32, f32), SensorError> {
    const OP: &str = "stc3x_measure";
    check_status(OP, status)?;
    let vol = check_range(OP, "gas_concentration_vol", raw.gas_concentration_vol, 0.0, 100.0)?;
    let temperature = check_range(
        OP,
        "temperature",
        raw.temperature,
        TEMPERATURE_RANGE.0,
        TEMPERATURE_RANGE.1,
    )?;
    let ppm = (f64::from(vol) * 10_000.0).round() as u32;
    Ok((ppm, temperature))
}

pub fn decode_product_info(status: i16, raw: &Stc3xProductInfo) -> Result<(u32, String), SensorError> {
    check_status("stc3x_probe", status)?;
    if raw.product_id == 0 {
        return Err(super::decoding_error("stc3x_probe", "product id is zero"));
    }
    Ok((raw.product_id, format!("{:X}", raw.serial_number)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::mem::{align_of, size_of};

    const PRODUCT_INFO_FIXTURE: [u8; 16] = [
        0x01, 0x03, 0x01, 0x08, // product_id 0x08010301
        0x00, 0x00, 0x00, 0x00, // padding
        0xEF, 0xCD, 0xAB, 0x89, 0x67, 0x45, 0x23, 0x01, // serial 0x0123456789ABCDEF
    ];

    // 50 %RH, 25 °C, 1013 mbar
    const COMPENSATION_FIXTURE: [u8; 6] = [0x00, 0x80, 0x88, 0x13, 0xF5, 0x03];

    #[test]
    fn test_layouts() {
        assert_eq!(size_of::<Stc3xProductInfo>(), 16);
        assert_eq!(align_of::<Stc3xProductInfo>(), 8);
        assert_eq!(offset_of!(Stc3xProductInfo, serial_number), 8);

        assert_eq!(size_of::<Stc3xConfig>(), 4);
        assert_eq!(offset_of!(Stc3xConfig, self_calibration), 2);

        assert_eq!(size_of::<Stc3xCompensation>(), 6);
        assert_eq!(align_of::<Stc3xCompensation>(), 2);
        assert_eq!(offset_of!(Stc3xCompensation, pressure_mbar), 4);

        assert_eq!(size_of::<Stc3xMeasurement>(), 8);
        assert_eq!(offset_of!(Stc3xMeasurement, temperature), 4);
    }

    #[test]
    fn test_product_info_fixture() {
        let raw = Stc3xProductInfo::from_native_bytes(&PRODUCT_INFO_FIXTURE).unwrap();
        assert_eq!(raw.product_id, 0x0801_0301);
        assert_eq!(raw.serial_number, 0x0123_4567_89AB_CDEF);
        assert_eq!(raw.to_bytes(), PRODUCT_INFO_FIXTURE);

        let (id, serial) = decode_product_info(0, &raw).unwrap();
        assert_eq!(id, 0x0801_0301);
        assert_eq!(serial, "123456789ABCDEF");
    }

    #[test]
    fn test_compensation_fixture() {
        let raw = encode_compensation(&Compensation {
            relative_humidity: 50.0,
            temperature_c: 25.0,
            pressure_mbar: 1013.0,
        })
        .unwrap();
        assert_eq!(raw.relative_humidity_ticks, 32768);
        assert_eq!(raw.temperature_ticks, 5000);
        assert_eq!(raw.pressure_mbar, 1013);
        assert_eq!(raw.to_bytes(), COMPENSATION_FIXTURE);
        assert_eq!(
            Stc3xCompensation::from_native_bytes(&COMPENSATION_FIXTURE).unwrap(),
            raw
        );
    }

    #[test]
    fn test_config_fixture() {
        let raw = encode_config(19, true);
        assert_eq!(raw.to_bytes(), [0x13, 0x00, 0x01, 0x00]);
        assert_eq!(Stc3xConfig::from_native_bytes(&[0x13, 0x00, 0x01, 0xAA]).unwrap(), raw);
    }

    #[test]
    fn test_compensation_range() {
        let base = Compensation::default();
        for bad in [
            Compensation { relative_humidity: 100.5, ..base },
            Compensation { relative_humidity: -1.0, ..base },
            Compensation { relative_humidity: f32::NAN, ..base },
            Compensation { temperature_c: 170.0, ..base },
            Compensation { pressure_mbar: 70_000.0, ..base },
            Compensation { pressure_mbar: -3.0, ..base },
        ] {
            let err = encode_compensation(&bad).unwrap_err();
            assert_eq!(err.kind, ErrorKind::EncodingError, "{bad:?}");
        }
    }

    #[test]
    fn test_compensation_negative_temperature() {
        let raw = encode_compensation(&Compensation {
            temperature_c: -10.5,
            ..Compensation::default()
        })
        .unwrap();
        assert_eq!(raw.temperature_ticks, -2100);
    }

    #[test]
    fn test_decode_measurement_fixture() {
        // 0.0625 vol% (0x3D800000), 23.5 °C (0x41BC0000)
        let bytes = [0x00, 0x00, 0x80, 0x3D, 0x00, 0x00, 0xBC, 0x41];
        let raw = Stc3xMeasurement::from_native_bytes(&bytes).unwrap();
        assert_eq!(raw.gas_concentration_vol, 0.0625);
        assert_eq!(raw.temperature, 23.5);
        assert_eq!(decode_measurement(0, &raw).unwrap(), (625, 23.5));
        assert_eq!(Stc3xMeasurement::from_native_bytes(&bytes[..7]), None);
    }

    #[test]
    fn test_compensation_over_full_range() {
        let mut previous = None;
        for rh in 0..=100u16 {
            let raw = encode_compensation(&Compensation {
                relative_humidity: f32::from(rh),
                ..Compensation::default()
            })
            .unwrap();
            // rounded half up in integer arithmetic
            let expected = ((u32::from(rh) * 65535 + 50) / 100) as u16;
            assert_eq!(raw.relative_humidity_ticks, expected, "{rh} %RH");
            assert_eq!(&raw.to_bytes()[..2], &expected.to_le_bytes(), "{rh} %RH");
            assert_eq!(Stc3xCompensation::from_native_bytes(&raw.to_bytes()), Some(raw));
            assert!(previous < Some(expected));
            previous = Some(expected);
        }
        assert_eq!(previous, Some(u16::MAX));

        for celsius in -40..=125i16 {
            let raw = encode_compensation(&Compensation {
                temperature_c: f32::from(celsius),
                ..Compensation::default()
            })
            .unwrap();
            assert_eq!(raw.temperature_ticks, celsius * 200, "{celsius} °C");
            assert_eq!(&raw.to_bytes()[2..4], &(celsius * 200).to_le_bytes(), "{celsius} °C");
            assert_eq!(Stc3xCompensation::from_native_bytes(&raw.to_bytes()), Some(raw));
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let garbage = Stc3xMeasurement {
            gas_concentration_vol: 3.4e38,
            temperature: 23.5,
        };
        assert_eq!(
            decode_measurement(0, &garbage).unwrap_err().kind,
            ErrorKind::DecodingError
        );
        let hot = Stc3xMeasurement {
            gas_concentration_vol: 1.0,
            temperature: 400.0,
        };
        assert!(decode_measurement(0, &hot).is_err());
        assert!(decode_measurement(5, &Stc3xMeasurement::default()).is_err());
    }

    #[test]
    fn test_recalibration_reference() {
        assert_eq!(encode_recalibration_reference(0.0).unwrap(), 16384);
        assert_eq!(encode_recalibration_reference(100.0).unwrap(), 49152);
        assert!(encode_recalibration_reference(101.0).is_err());
    }
}
