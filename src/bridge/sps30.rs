//! SPS30 structures.
//!
//! Units:
//!   - mass concentrations (`mc_*`) in µg/m³
//!   - number concentrations (`nc_*`) in #/cm³
//!   - typical particle size in µm

use std::ffi::CString;

use super::{RawStruct, check_range, check_status, decoding_error, encoding_error, put};
use crate::error::SensorError;
use crate::measurement::{FirmwareVersion, ParticulateMatter};

pub const SPS30_MAX_SERIAL_LEN: usize = 32;

/// `struct sps30_measurement`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sps30Measurement {
    pub mc_1p0: f32,
    pub mc_2p5: f32,
    pub mc_4p0: f32,
    pub mc_10p0: f32,
    pub nc_0p5: f32,
    pub nc_1p0: f32,
    pub nc_2p5: f32,
    pub nc_4p0: f32,
    pub nc_10p0: f32,
    pub typical_particle_size: f32,
}

/// `struct sps30_version_information`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sps30VersionInformation {
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub hardware_revision: u8,
    pub shdlc_major: u8,
    pub shdlc_minor: u8,
}

/// `char serial[SPS30_MAX_SERIAL_LEN]`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sps30Serial {
    pub bytes: [u8; SPS30_MAX_SERIAL_LEN],
}

impl Sps30Measurement {
    fn fields(&self) -> [f32; 10] {
        [
            self.mc_1p0,
            self.mc_2p5,
            self.mc_4p0,
            self.mc_10p0,
            self.nc_0p5,
            self.nc_1p0,
            self.nc_2p5,
            self.nc_4p0,
            self.nc_10p0,
            self.typical_particle_size,
        ]
    }
}

// SAFETY: repr(C), only f32, u8 and u8 arrays.
unsafe impl RawStruct for Sps30Measurement {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; Self::SIZE];
        // ten consecutive f32 fields, no padding
        for (i, value) in self.fields().iter().enumerate() {
            put(&mut bytes, i * std::mem::size_of::<f32>(), &value.to_le_bytes());
        }
        bytes
    }
}

unsafe impl RawStruct for Sps30VersionInformation {
    fn to_bytes(&self) -> Vec<u8> {
        vec![
            self.firmware_major,
            self.firmware_minor,
            self.hardware_revision,
            self.shdlc_major,
            self.shdlc_minor,
        ]
    }
}

unsafe impl RawStruct for Sps30Serial {
    fn to_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

const MASS_RANGE: (f32, f32) = (0.0, 1000.0);
const NUMBER_RANGE: (f32, f32) = (0.0, 3000.0);
const PARTICLE_SIZE_RANGE: (f32, f32) = (0.0, 10.0);

/// Default SHDLC baud rate of the SPS30.
pub const DEFAULT_BAUD: u32 = 115_200;

/// UART device paths are passed to the driver as C strings.
pub fn encode_device_path(device: &str) -> Result<CString, SensorError> {
    CString::new(device).map_err(|_| {
        encoding_error(
            "encode_device_path",
            format!("device path {device:?} contains a NUL byte"),
        )
    })
}

pub fn encode_auto_clean_days(days: u32) -> Result<u8, SensorError> {
    u8::try_from(days).map_err(|_| {
        encoding_error(
            "encode_auto_clean_days",
            format!("auto-clean interval of {days} days does not fit in 0..=255"),
        )
    })
}

pub fn decode_measurement(status: i16, raw: &Sps30Measurement) -> Result<ParticulateMatter, SensorError> {
    const OP: &str = "sps30_read_measurement";
    check_status(OP, status)?;
    let mass = |field, value| check_range(OP, field, value, MASS_RANGE.0, MASS_RANGE.1);
    let number = |field, value| check_range(OP, field, value, NUMBER_RANGE.0, NUMBER_RANGE.1);
    Ok(ParticulateMatter {
        mc_1p0: mass("mc_1p0", raw.mc_1p0)?,
        mc_2p5: mass("mc_2p5", raw.mc_2p5)?,
        mc_4p0: mass("mc_4p0", raw.mc_4p0)?,
        mc_10p0: mass("mc_10p0", raw.mc_10p0)?,
        nc_0p5: number("nc_0p5", raw.nc_0p5)?,
        nc_1p0: number("nc_1p0", raw.nc_1p0)?,
        nc_2p5: number("nc_2p5", raw.nc_2p5)?,
        nc_4p0: number("nc_4p0", raw.nc_4p0)?,
        nc_10p0: number("nc_10p0", raw.nc_10p0)?,
        typical_particle_size: check_range(
            OP,
            "typical_particle_size",
            raw.typical_particle_size,
            PARTICLE_SIZE_RANGE.0,
            PARTICLE_SIZE_RANGE.1,
        )?,
    })
}

pub fn decode_serial(status: i16, raw: &Sps30Serial) -> Result<String, SensorError> {
    const OP: &str = "sps30_get_serial";
    check_status(OP, status)?;
    let end = raw
        .bytes
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| decoding_error(OP, "serial number is not NUL terminated"))?;
    let serial = &raw.bytes[..end];
    if !serial.iter().all(|b| b.is_ascii_graphic()) {
        return Err(decoding_error(OP, "serial number is not printable ASCII"));
    }
    Ok(String::from_utf8_lossy(serial).into_owned())
}

pub fn decode_version(status: i16, raw: &Sps30VersionInformation) -> Result<FirmwareVersion, SensorError> {
    check_status("sps30_read_version", status)?;
    Ok(FirmwareVersion {
        firmware_major: raw.firmware_major,
        firmware_minor: raw.firmware_minor,
        hardware_revision: raw.hardware_revision,
        shdlc_major: raw.shdlc_major,
        shdlc_minor: raw.shdlc_minor,
    })
}
