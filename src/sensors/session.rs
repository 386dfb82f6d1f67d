//! Session bookkeeping shared by all sensor kinds.
//!
//! [`SensorCore`] owns the state, the native session handle and the cached
//! identification data of one sensor. The kind-specific sensors supply the
//! native call sequences, the core enforces the state rules around them.

use std::sync::Arc;

use super::SensorState;
use crate::error::status::NO_ERROR;
use crate::error::{ErrorKind, Phase, SensorError};
use crate::ffi::{NativeDriver, SessionHandle, Status};
use crate::measurement::SensorInfo;

/// Owning reference to an open native session.
///
/// Not `Clone`: releasing consumes it, so a session can be closed only once.
#[derive(Debug, PartialEq, Eq)]
pub struct SensorHandle {
    id: SessionHandle,
}

impl SensorHandle {
    pub(crate) fn new(id: SessionHandle) -> Self {
        Self { id }
    }

    pub fn id(&self) -> SessionHandle {
        self.id
    }

    /// Hand the session id to `close` and give up ownership.
    pub(crate) fn release<T>(self, close: impl FnOnce(SessionHandle) -> T) -> T {
        close(self.id)
    }
}

/// Turn a native status into a result, tagged for `phase`.
pub(crate) fn check(phase: Phase, operation: &'static str, status: Status) -> Result<(), SensorError> {
    if status == NO_ERROR {
        Ok(())
    } else {
        Err(SensorError::native("", phase, operation, status))
    }
}

pub(crate) type CloseFn = fn(&dyn NativeDriver, SessionHandle) -> Status;

pub(crate) struct SensorCore {
    name: String,
    driver: Arc<dyn NativeDriver>,
    state: SensorState,
    handle: Option<SensorHandle>,
    probed: bool,
    info: SensorInfo,
}

impl SensorCore {
    pub fn new(name: impl Into<String>, driver: Arc<dyn NativeDriver>, model: &'static str) -> Self {
        Self {
            name: name.into(),
            driver,
            state: SensorState::Uninitialized,
            handle: None,
            probed: false,
            info: SensorInfo::new(model),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn info(&self) -> &SensorInfo {
        &self.info
    }

    pub fn probed(&self) -> bool {
        self.probed
    }

    pub fn driver(&self) -> &dyn NativeDriver {
        self.driver.as_ref()
    }

    pub fn set_state(&mut self, next: SensorState) {
        if self.state != next {
            log::debug!("[{}] {} -> {}", self.name, self.state, next);
            self.state = next;
        }
    }

    pub fn error(&self, kind: ErrorKind, operation: &'static str, message: impl Into<String>) -> SensorError {
        SensorError::new(kind, self.name.as_str(), operation, message)
    }

    /// Run a probe. The device is not opened.
    pub fn probe_with(
        &mut self,
        probe: impl FnOnce(&dyn NativeDriver, &mut SensorInfo) -> Result<(), SensorError>,
    ) -> Result<(), SensorError> {
        match self.state {
            SensorState::Ready | SensorState::Sleeping => return Ok(()),
            SensorState::Initializing => {
                return Err(self.error(ErrorKind::ProbeFailed, "probe", "initialization in progress"));
            }
            _ => {}
        }

        self.set_state(SensorState::Probing);
        let driver = Arc::clone(&self.driver);
        match probe(driver.as_ref(), &mut self.info) {
            Ok(()) => {
                self.probed = true;
                log::debug!("[{}] probe ok", self.name);
                Ok(())
            }
            Err(e) => {
                self.probed = false;
                self.set_state(SensorState::Failed);
                Err(e.for_sensor(&self.name))
            }
        }
    }

    /// Reject initialization of a sensor that already has a live session.
    pub fn begin_initialize(&self) -> Result<(), SensorError> {
        match self.state {
            SensorState::Ready | SensorState::Sleeping => Err(self.error(
                ErrorKind::InitializationError,
                "initialize",
                format!("already initialized ({})", self.state),
            )),
            _ => Ok(()),
        }
    }

    /// Open a session and run the configuration steps on it.
    ///
    /// The handle is owned by the core as soon as `open` returns, so a failing
    /// `configure` step releases it through `close` before the error is
    /// returned. Every failure leaves the sensor Failed.
    pub fn initialize_with<T>(
        &mut self,
        open: impl FnOnce(&dyn NativeDriver) -> Result<SessionHandle, SensorError>,
        configure: impl FnOnce(&dyn NativeDriver, SessionHandle, &mut SensorInfo) -> Result<T, SensorError>,
        close: CloseFn,
    ) -> Result<T, SensorError> {
        self.set_state(SensorState::Initializing);
        let driver = Arc::clone(&self.driver);

        // a sensor that failed mid-command can still hold its old session
        if let Some(stale) = self.handle.take() {
            let status = stale.release(|id| close(driver.as_ref(), id));
            log::debug!("[{}] released previous session, close returned {}", self.name, status);
        }

        let id = match open(driver.as_ref()) {
            Ok(id) => id,
            Err(e) => return Err(self.fail_initialize(e)),
        };
        self.handle = Some(SensorHandle::new(id));

        match configure(driver.as_ref(), id, &mut self.info) {
            Ok(value) => {
                self.set_state(SensorState::Ready);
                log::info!("[{}] {} initialized", self.name, self.info.model);
                Ok(value)
            }
            Err(e) => {
                if let Some(handle) = self.handle.take() {
                    let status = handle.release(|id| close(driver.as_ref(), id));
                    if status != NO_ERROR {
                        log::error!(
                            "[{}] close after failed initialization returned error code {}",
                            self.name,
                            status
                        );
                    }
                }
                Err(self.fail_initialize(e))
            }
        }
    }

    fn fail_initialize(&mut self, error: SensorError) -> SensorError {
        self.probed = false;
        self.set_state(SensorState::Failed);
        error.into_init_failure().for_sensor(&self.name)
    }

    /// Session id if the sensor is in one of `allowed`.
    ///
    /// A stopped sensor reports `AlreadyStopped`, any other state `ReadError`.
    pub fn session(&self, operation: &'static str, allowed: &[SensorState]) -> Result<SessionHandle, SensorError> {
        if allowed.contains(&self.state)
            && let Some(handle) = &self.handle
        {
            return Ok(handle.id());
        }
        Err(match self.state {
            SensorState::Stopped => self.error(ErrorKind::AlreadyStopped, operation, "sensor is stopped"),
            state => self.error(ErrorKind::ReadError, operation, format!("sensor is not ready ({state})")),
        })
    }

    /// Run native calls against the open session.
    ///
    /// Errors are tagged with the sensor name. A session the driver no longer
    /// knows is dropped without a close call and the sensor becomes Failed.
    pub fn with_session<T>(
        &mut self,
        operation: &'static str,
        allowed: &[SensorState],
        call: impl FnOnce(&dyn NativeDriver, SessionHandle) -> Result<T, SensorError>,
    ) -> Result<T, SensorError> {
        let id = self.session(operation, allowed)?;
        let driver = Arc::clone(&self.driver);
        call(driver.as_ref(), id).map_err(|e| {
            let e = e.for_sensor(&self.name);
            if e.kind == ErrorKind::AlreadyStopped {
                log::warn!("[{}] driver reports the session as closed", self.name);
                self.handle = None;
                self.probed = false;
                self.set_state(SensorState::Failed);
            }
            e
        })
    }

    /// Release the session and move to Stopped.
    ///
    /// The handle counts as released even when `release` reports an error.
    pub fn stop_with(
        &mut self,
        release: impl FnOnce(&dyn NativeDriver, SessionHandle, SensorState) -> Result<(), SensorError>,
    ) -> Result<(), SensorError> {
        if self.state == SensorState::Stopped {
            return Ok(());
        }

        let previous = self.state;
        let driver = Arc::clone(&self.driver);
        let result = match self.handle.take() {
            Some(handle) => handle.release(|id| release(driver.as_ref(), id, previous)),
            None => Ok(()),
        };
        self.probed = false;
        self.set_state(SensorState::Stopped);

        match result {
            Ok(()) => {
                log::info!("[{}] stopped", self.name);
                Ok(())
            }
            Err(e) => {
                let e = e.for_sensor(&self.name);
                log::error!("{e}");
                Err(e)
            }
        }
    }

    /// Move to Failed without touching the session.
    pub fn mark_failed(&mut self) {
        self.set_state(SensorState::Failed);
    }

    #[cfg(test)]
    pub fn handle(&self) -> Option<&SensorHandle> {
        self.handle.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::SimulatedDriver;

    fn core() -> SensorCore {
        SensorCore::new("test", Arc::new(SimulatedDriver::new()), "TEST")
    }

    fn close_ok(_: &dyn NativeDriver, _: SessionHandle) -> Status {
        0
    }

    #[test]
    fn test_handle_release_consumes() {
        let handle = SensorHandle::new(7);
        assert_eq!(handle.release(|id| id * 2), 14);
    }

    #[test]
    fn test_check() {
        assert!(check(Phase::Read, "op", 0).is_ok());
        let err = check(Phase::Initialize, "op", 5).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InitializationError);
        assert_eq!(err.code, Some(5));
    }

    #[test]
    fn test_probe_failure_sets_failed() {
        let mut core = core();
        let err = core
            .probe_with(|_, _| check(Phase::Probe, "probe", 3))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProbeFailed);
        assert_eq!(err.sensor, "test");
        assert_eq!(core.state(), SensorState::Failed);
        assert!(!core.probed());

        // probing again from Failed is allowed
        core.probe_with(|_, _| Ok(())).unwrap();
        assert_eq!(core.state(), SensorState::Probing);
        assert!(core.probed());
    }

    #[test]
    fn test_configure_failure_releases_handle() {
        let mut core = core();
        let err = core
            .initialize_with(|_| Ok(3), |_, _, _| check(Phase::Command, "configure", 1), close_ok)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InitializationError);
        assert_eq!(err.code, Some(1));
        assert_eq!(core.state(), SensorState::Failed);
        assert!(core.handle().is_none());
    }

    #[test]
    fn test_session_only_in_allowed_states() {
        let mut core = core();
        let err = core.session("read", &[SensorState::Ready]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ReadError);

        core.initialize_with(|_| Ok(9), |_, _, _| Ok(()), close_ok).unwrap();
        assert_eq!(core.session("read", &[SensorState::Ready]).unwrap(), 9);
        assert!(core.begin_initialize().is_err());

        core.stop_with(|_, _, _| Ok(())).unwrap();
        let err = core.session("read", &[SensorState::Ready]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyStopped);
    }

    #[test]
    fn test_invalid_handle_drops_session() {
        let mut core = core();
        core.initialize_with(|_| Ok(1), |_, _, _| Ok(()), close_ok).unwrap();
        let err = core
            .with_session("read", &[SensorState::Ready], |_, _| check(Phase::Read, "read", 6))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::AlreadyStopped);
        assert_eq!(core.state(), SensorState::Failed);
        assert!(core.handle().is_none());
    }

    #[test]
    fn test_reinitialize_releases_stale_session() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut core = SensorCore::new("pm", driver.clone(), "SPS30");
        let open = |d: &dyn NativeDriver| -> Result<SessionHandle, SensorError> {
            let mut handle = 0;
            check(Phase::Initialize, "sps30_open", d.sps30_open(c"/dev/ttyAMA0", 115_200, &mut handle))?;
            Ok(handle)
        };
        let close: CloseFn = |d, h| d.sps30_close(h);

        core.initialize_with(open, |_, _, _| Ok(()), close).unwrap();
        core.mark_failed();
        assert!(core.handle().is_some());

        core.initialize_with(open, |_, _, _| Ok(()), close).unwrap();
        assert_eq!(driver.call_count("sps30_close"), 1);
        assert_eq!(driver.open_sessions(), 1);
        assert_eq!(core.state(), SensorState::Ready);
    }

    #[test]
    fn test_stop_while_probing() {
        let driver = Arc::new(SimulatedDriver::new());
        let mut core = SensorCore::new("rh", driver.clone(), "SHTC3");
        core.probe_with(|_, _| Ok(())).unwrap();
        assert_eq!(core.state(), SensorState::Probing);

        core.stop_with(|_, _, _| panic!("no session to release")).unwrap();
        assert_eq!(core.state(), SensorState::Stopped);
        assert!(!core.probed());
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_stop_releases_even_on_error() {
        let mut core = core();
        core.initialize_with(|_| Ok(1), |_, _, _| Ok(()), close_ok).unwrap();
        let err = core
            .stop_with(|_, _, _| check(Phase::Stop, "close", 2))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportUnavailable);
        assert_eq!(core.state(), SensorState::Stopped);
        assert!(core.handle().is_none());
        // second stop is a no-op
        core.stop_with(|_, _, _| panic!("released twice")).unwrap();
    }
}
