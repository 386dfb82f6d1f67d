//! Ordered registry of named sensors with bulk operations.
//!
//! Bulk operations never stop at the first failure: each returns one outcome
//! per registered sensor, in registration order.

use std::sync::Arc;

use crate::descriptor::{Compensation, SensorDescriptor};
use crate::error::{ErrorKind, SensorError};
use crate::ffi::NativeDriver;
use crate::measurement::{Measurement, MeasurementRecord, SensorInfo};
use crate::sensors::{Lifecycle, Sensor, SensorState};

/// Consecutive read failures after which a sensor is stopped.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Upper bound, in [`SensorManager::recover_failed`] calls, on the wait
/// between two recovery attempts of the same sensor.
pub const MAX_RECOVERY_BACKOFF: u32 = 32;

/// Per-sensor results of a bulk operation, in registration order.
#[derive(Debug)]
pub struct Outcomes<T> {
    items: Vec<(String, Result<T, SensorError>)>,
}

impl<T> Outcomes<T> {
    fn new() -> Self {
        Self { items: Vec::new() }
    }

    fn push(&mut self, name: &str, result: Result<T, SensorError>) {
        self.items.push((name.to_string(), result));
    }

    pub fn get(&self, name: &str) -> Option<&Result<T, SensorError>> {
        self.items.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Result<T, SensorError>)> {
        self.items.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.items
            .iter()
            .filter_map(|(n, r)| r.as_ref().ok().map(|v| (n.as_str(), v)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &SensorError)> {
        self.items
            .iter()
            .filter_map(|(n, r)| r.as_ref().err().map(|e| (n.as_str(), e)))
    }

    pub fn is_all_ok(&self) -> bool {
        self.items.iter().all(|(_, r)| r.is_ok())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> IntoIterator for Outcomes<T> {
    type Item = (String, Result<T, SensorError>);
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

struct Entry {
    name: String,
    descriptor: SensorDescriptor,
    sensor: Option<Sensor>,
    last_error: Option<SensorError>,
    consecutive_failures: u32,
    /// Failed recovery attempts since the sensor was last healthy.
    recovery_attempts: u32,
    /// Recovery passes to skip before the next attempt.
    recovery_wait: u32,
}

impl Entry {
    fn healthy(&mut self) {
        self.last_error = None;
        self.consecutive_failures = 0;
        self.recovery_attempts = 0;
        self.recovery_wait = 0;
    }

    fn state(&self) -> SensorState {
        self.sensor
            .as_ref()
            .map_or(SensorState::Uninitialized, |s| s.state())
    }

    fn unknown(&self, operation: &'static str) -> SensorError {
        unavailable(&self.name, self.state(), operation)
    }
}

fn recovery_backoff(attempts: u32) -> u32 {
    1u32.checked_shl(attempts.saturating_sub(1))
        .unwrap_or(MAX_RECOVERY_BACKOFF)
        .min(MAX_RECOVERY_BACKOFF)
}

fn unavailable(name: &str, state: SensorState, operation: &'static str) -> SensorError {
    SensorError::new(
        ErrorKind::UnknownSensor,
        name,
        operation,
        format!("sensor is not available ({state})"),
    )
}

pub struct SensorManager {
    driver: Arc<dyn NativeDriver>,
    entries: Vec<Entry>,
    max_consecutive_failures: u32,
}

impl SensorManager {
    pub fn new(driver: Arc<dyn NativeDriver>) -> Self {
        Self {
            driver,
            entries: Vec::new(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }

    /// Stop a sensor after `max` consecutive failed reads. `0` never stops.
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Add a sensor. Names and transports are unique; the sensor is built by
    /// [`Self::initialize_all`].
    pub fn register(&mut self, name: impl Into<String>, descriptor: SensorDescriptor) -> Result<(), SensorError> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(SensorError::new(
                ErrorKind::DuplicateSensorName,
                name,
                "register",
                "a sensor with this name is already registered",
            ));
        }
        if let Some(other) = self
            .entries
            .iter()
            .find(|e| e.descriptor.transport().same_device(&descriptor.transport()))
        {
            return Err(SensorError::new(
                ErrorKind::DuplicateTransport,
                name,
                "register",
                format!("{} is already used by '{}'", descriptor.transport(), other.name),
            ));
        }
        log::debug!("Registered {} sensor '{}' on {}", descriptor.kind(), name, descriptor.transport());
        self.entries.push(Entry {
            name,
            descriptor,
            sensor: None,
            last_error: None,
            consecutive_failures: 0,
            recovery_attempts: 0,
            recovery_wait: 0,
        });
        Ok(())
    }

    /// Probe and initialize every sensor that does not have a live session.
    pub fn initialize_all(&mut self) -> Outcomes<()> {
        let mut outcomes = Outcomes::new();
        for entry in &mut self.entries {
            let sensor = entry.sensor.get_or_insert_with(|| {
                Sensor::from_descriptor(entry.name.as_str(), &entry.descriptor, Arc::clone(&self.driver))
            });
            let result = match sensor.state() {
                SensorState::Ready | SensorState::Sleeping => Ok(()),
                _ => sensor.initialize(),
            };
            match &result {
                Ok(()) => entry.healthy(),
                Err(e) => {
                    log::warn!("Initialization of '{}' failed: {e}", entry.name);
                    entry.last_error = Some(e.clone());
                }
            }
            outcomes.push(&entry.name, result);
        }
        outcomes
    }

    /// Read every Ready sensor.
    ///
    /// Humidity sensors named as a `compensation_source` are read before the
    /// CO₂ sensors that depend on them, and their reading is applied as the
    /// CO₂ compensation for this pass.
    pub fn read_all(&mut self) -> Outcomes<MeasurementRecord> {
        let sources: Vec<&str> = self
            .entries
            .iter()
            .filter_map(|e| e.descriptor.compensation_source())
            .collect();
        let (mut order, rest): (Vec<usize>, Vec<usize>) =
            (0..self.entries.len()).partition(|i| sources.contains(&self.entries[*i].name.as_str()));
        order.extend(rest);

        let mut results: Vec<Option<Result<MeasurementRecord, SensorError>>> =
            (0..self.entries.len()).map(|_| None).collect();
        for index in order {
            let result = self.read_entry(index, &results);
            results[index] = Some(result);
        }

        let mut outcomes = Outcomes::new();
        for (entry, result) in self.entries.iter().zip(results) {
            if let Some(result) = result {
                outcomes.push(&entry.name, result);
            }
        }
        outcomes
    }

    fn read_entry(
        &mut self,
        index: usize,
        earlier: &[Option<Result<MeasurementRecord, SensorError>>],
    ) -> Result<MeasurementRecord, SensorError> {
        let compensation = self.entries[index]
            .descriptor
            .compensation_source()
            .and_then(|source| self.entries.iter().position(|e| e.name == source))
            .and_then(|i| earlier[i].as_ref())
            .and_then(|r| r.as_ref().ok())
            .map(|record| record.values);

        let max_failures = self.max_consecutive_failures;
        let entry = &mut self.entries[index];
        let Some(sensor) = entry.sensor.as_mut() else {
            return Err(entry.unknown("read"));
        };

        match sensor.state() {
            SensorState::Ready => {}
            SensorState::Failed => {
                return Err(entry.last_error.clone().unwrap_or_else(|| {
                    SensorError::new(ErrorKind::ReadError, entry.name.as_str(), "read", "sensor has failed")
                }));
            }
            _ => return Err(entry.unknown("read")),
        }

        if let Some(Measurement::HumidityTemp {
            relative_humidity,
            temp_c,
        }) = compensation
            && let Some(co2) = sensor.as_co2_mut()
        {
            let pressure_mbar = co2
                .compensation()
                .map_or(Compensation::default().pressure_mbar, |c| c.pressure_mbar);
            let applied = co2.set_compensation(Compensation {
                relative_humidity,
                temperature_c: temp_c,
                pressure_mbar,
            });
            if let Err(e) = applied {
                log::warn!("Could not update compensation of '{}': {e}", entry.name);
            }
        }

        let result = sensor.read();
        match &result {
            Ok(_) => entry.consecutive_failures = 0,
            Err(e) if !e.is_device_failure() => {
                log::debug!("Read of '{}' skipped: {e}", entry.name);
            }
            Err(e) => {
                entry.consecutive_failures += 1;
                entry.last_error = Some(e.clone());
                log::warn!(
                    "Read of '{}' failed ({} in a row): {e}",
                    entry.name,
                    entry.consecutive_failures
                );
                if max_failures > 0
                    && entry.consecutive_failures >= max_failures
                    && sensor.state() != SensorState::Failed
                {
                    log::error!(
                        "Stopping '{}' after {} consecutive failed reads",
                        entry.name,
                        entry.consecutive_failures
                    );
                    sensor.abandon();
                }
            }
        }
        result
    }

    /// Try to bring Failed sensors back with a fresh initialization.
    ///
    /// Meant to be called once per polling pass. After `n` failed attempts a
    /// sensor sits out `2^(n-1)` passes, at most [`MAX_RECOVERY_BACKOFF`].
    /// Outcomes are only reported for the sensors attempted in this pass.
    pub fn recover_failed(&mut self) -> Outcomes<()> {
        let mut outcomes = Outcomes::new();
        for entry in &mut self.entries {
            if entry.state() != SensorState::Failed {
                continue;
            }
            if entry.recovery_wait > 0 {
                entry.recovery_wait -= 1;
                continue;
            }
            let Some(sensor) = entry.sensor.as_mut() else {
                continue;
            };

            let result = sensor.initialize();
            match &result {
                Ok(()) => {
                    log::info!(
                        "Recovered '{}' after {} failed attempts",
                        entry.name,
                        entry.recovery_attempts
                    );
                    entry.healthy();
                }
                Err(e) => {
                    entry.recovery_attempts += 1;
                    entry.recovery_wait = recovery_backoff(entry.recovery_attempts);
                    log::warn!(
                        "Recovery of '{}' failed, next attempt in {} passes: {e}",
                        entry.name,
                        entry.recovery_wait
                    );
                    entry.last_error = Some(e.clone());
                }
            }
            outcomes.push(&entry.name, result);
        }
        outcomes
    }

    /// Stop every sensor. Failures are logged, every handle is released once.
    pub fn stop_all(&mut self) {
        for entry in &mut self.entries {
            if let Some(sensor) = entry.sensor.as_mut()
                && let Err(e) = sensor.stop()
            {
                log::warn!("Stopping '{}' failed: {e}", entry.name);
            }
        }
    }

    pub fn info_all(&self) -> Outcomes<SensorInfo> {
        let mut outcomes = Outcomes::new();
        for entry in &self.entries {
            let result = match &entry.sensor {
                Some(sensor) => Ok(sensor.info()),
                None => Err(entry.unknown("info")),
            };
            outcomes.push(&entry.name, result);
        }
        outcomes
    }

    pub fn sleep_all(&mut self) -> Outcomes<()> {
        self.for_each_awake("sleep", |sensor| sensor.sleep())
    }

    pub fn wake_up_all(&mut self) -> Outcomes<()> {
        self.for_each_awake("wake_up", |sensor| sensor.wake_up())
    }

    fn for_each_awake(
        &mut self,
        operation: &'static str,
        mut op: impl FnMut(&mut Sensor) -> Result<(), SensorError>,
    ) -> Outcomes<()> {
        let mut outcomes = Outcomes::new();
        for entry in &mut self.entries {
            let awake = matches!(entry.state(), SensorState::Ready | SensorState::Sleeping);
            let result = if awake && let Some(sensor) = entry.sensor.as_mut() {
                op(sensor)
            } else {
                Err(entry.unknown(operation))
            };
            if let Err(e) = &result {
                log::warn!("{operation} of '{}' failed: {e}", entry.name);
            }
            outcomes.push(&entry.name, result);
        }
        outcomes
    }

    fn entry(&self, name: &str) -> Result<&Entry, SensorError> {
        self.entries.iter().find(|e| e.name == name).ok_or_else(|| {
            SensorError::new(ErrorKind::UnknownSensor, name, "lookup", "no sensor with this name")
        })
    }

    pub fn get(&self, name: &str) -> Result<&Sensor, SensorError> {
        let entry = self.entry(name)?;
        entry.sensor.as_ref().ok_or_else(|| entry.unknown("get"))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Sensor, SensorError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| SensorError::new(ErrorKind::UnknownSensor, name, "lookup", "no sensor with this name"))?;
        // a sensor that was never built is Uninitialized
        let Entry {
            name: registered, sensor, ..
        } = entry;
        sensor
            .as_mut()
            .ok_or_else(|| unavailable(registered, SensorState::Uninitialized, "get_mut"))
    }

    pub fn status(&self, name: &str) -> Result<SensorState, SensorError> {
        self.entry(name).map(Entry::state)
    }

    /// Last error recorded for `name` by a bulk operation.
    pub fn last_error(&self, name: &str) -> Result<Option<&SensorError>, SensorError> {
        self.entry(name).map(|e| e.last_error.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for SensorManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
