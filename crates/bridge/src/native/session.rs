//! Native session handle
//!
//! Owns the SDK instance for the lifetime of one hardware session and
//! enforces the call order:
//!
//! ```text
//! Uncreated → Created → Initialized → Started ⇄ (IMU off ⇄ IMU on) → Stopped → Destroyed
//! ```
//!
//! Out-of-order calls fail with [`Status::INVALID_STATE`] without reaching the
//! SDK. `Destroyed` is terminal: every later call is a no-op that reports
//! [`Status::DESTROYED`] (or `false`), except `destroy` itself which is a
//! silent no-op.

use super::{NativeCallbacks, NativeSdk, UnavailableSdk};
use protocol::{DeviceType, ImuFrequency, ImuMode, Status};
use std::collections::HashSet;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Position in the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uncreated,
    Created,
    Initialized,
    Started,
    Stopped,
    Destroyed,
}

/// One hardware session over a USB file descriptor
pub struct NativeSession {
    sdk: Box<dyn NativeSdk>,
    state: SessionState,
    /// USB connection, kept open until the session is destroyed
    fd: Option<OwnedFd>,
    product_id: Option<u16>,
    open_imu: HashSet<ImuMode>,
    callbacks: Option<Arc<dyn NativeCallbacks>>,
}

impl NativeSession {
    pub fn new(sdk: Box<dyn NativeSdk>) -> Self {
        Self {
            sdk,
            state: SessionState::Uncreated,
            fd: None,
            product_id: None,
            open_imu: HashSet::new(),
            callbacks: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Capability probe of the underlying SDK
    pub fn is_available(&self) -> bool {
        self.sdk.is_available()
    }

    pub fn product_id(&self) -> Option<u16> {
        self.product_id
    }

    pub fn is_imu_open(&self, mode: ImuMode) -> bool {
        self.open_imu.contains(&mode)
    }

    pub fn has_callback(&self) -> bool {
        self.callbacks.is_some()
    }

    pub fn set_log_level(&mut self, level: i32) {
        if self.state != SessionState::Destroyed {
            self.sdk.set_log_level(level);
        }
    }

    /// Allocate the native session from an open USB connection
    ///
    /// Fails if a session is already allocated, the library is unavailable,
    /// or the library rejects the product ID. The descriptor is closed on
    /// failure.
    pub fn create(&mut self, product_id: u16, fd: OwnedFd) -> bool {
        match self.state {
            SessionState::Uncreated => {}
            SessionState::Destroyed => {
                warn!("create() on a destroyed session");
                return false;
            }
            state => {
                warn!("create() with a session already allocated ({:?})", state);
                return false;
            }
        }

        if !self.sdk.is_available() {
            warn!("Native SDK is not available");
            return false;
        }
        if !self.sdk.is_product_id_valid(product_id) {
            warn!("Native SDK rejected product {:04x}", product_id);
            return false;
        }
        if !self.sdk.create(product_id, fd.as_raw_fd()) {
            warn!("Native session allocation failed for product {:04x}", product_id);
            return false;
        }

        debug!("Native session created for product {:04x}", product_id);
        self.fd = Some(fd);
        self.product_id = Some(product_id);
        self.state = SessionState::Created;
        true
    }

    /// Register the single live callback target
    ///
    /// Replacing a target releases the previous registration first.
    pub fn set_callback(&mut self, callbacks: Arc<dyn NativeCallbacks>) -> Status {
        match self.state {
            SessionState::Destroyed => return Status::DESTROYED,
            SessionState::Uncreated => return Status::INVALID_STATE,
            _ => {}
        }

        if self.callbacks.take().is_some() {
            debug!("Replacing native callback registration");
            self.sdk.clear_callbacks();
        }
        self.sdk.register_callbacks(callbacks.clone());
        self.callbacks = Some(callbacks);
        Status::OK
    }

    /// Protocol handshake
    pub fn initialize(&mut self, cache_dir: Option<&Path>) -> Status {
        match self.state {
            SessionState::Created => {}
            SessionState::Destroyed => return Status::DESTROYED,
            state => {
                warn!("initialize() in state {:?}", state);
                return Status::INVALID_STATE;
            }
        }

        if let Some(dir) = cache_dir
            && let Err(e) = std::fs::create_dir_all(dir)
        {
            warn!("Failed to create SDK cache dir {}: {}", dir.display(), e);
        }

        let status = Status(self.sdk.initialize(cache_dir));
        if status.is_ok() {
            self.state = SessionState::Initialized;
        } else {
            warn!("Native initialize returned {}", status);
        }
        status
    }

    /// Begin data acquisition
    ///
    /// A stopped session cannot be restarted; destroy it and create a new one.
    pub fn start(&mut self) -> Status {
        match self.state {
            SessionState::Initialized => {}
            SessionState::Started => return Status::OK,
            SessionState::Destroyed => return Status::DESTROYED,
            state => {
                warn!("start() in state {:?}", state);
                return Status::INVALID_STATE;
            }
        }

        let status = Status(self.sdk.start());
        if status.is_ok() {
            info!("Native session started");
            self.state = SessionState::Started;
        } else {
            warn!("Native start returned {}", status);
        }
        status
    }

    /// End data acquisition
    ///
    /// Succeeds without touching the SDK when the session never started or
    /// is already stopped.
    pub fn stop(&mut self) -> Status {
        match self.state {
            SessionState::Started => {}
            SessionState::Destroyed => return Status::DESTROYED,
            _ => return Status::OK,
        }

        let status = Status(self.sdk.stop());
        if status.is_ok() {
            debug!("Native session stopped");
            self.state = SessionState::Stopped;
            self.open_imu.clear();
        } else {
            warn!("Native stop returned {}", status);
        }
        status
    }

    /// Release every native resource; no-op when already destroyed
    pub fn destroy(&mut self) {
        match self.state {
            SessionState::Destroyed => return,
            SessionState::Uncreated => {
                self.state = SessionState::Destroyed;
                return;
            }
            SessionState::Started => {
                let status = self.stop();
                if status.is_err() {
                    warn!("Ignoring stop failure during destroy: {}", status);
                }
            }
            _ => {}
        }

        if self.callbacks.take().is_some() {
            self.sdk.clear_callbacks();
        }
        self.sdk.shutdown();
        self.sdk.destroy();
        self.open_imu.clear();
        self.fd = None;
        self.state = SessionState::Destroyed;
        info!("Native session destroyed");
    }

    /// Raw device-type classification for the connected glasses
    pub fn device_type(&self) -> DeviceType {
        match self.state {
            SessionState::Initialized | SessionState::Started | SessionState::Stopped => {
                DeviceType::from_native(self.sdk.device_type())
            }
            _ => DeviceType::Unknown,
        }
    }

    /// Enable an IMU stream; requires a started session
    pub fn open_imu(&mut self, mode: ImuMode, frequency: ImuFrequency) -> Status {
        match self.state {
            SessionState::Started => {}
            SessionState::Destroyed => return Status::DESTROYED,
            state => {
                warn!("open_imu() in state {:?}", state);
                return Status::INVALID_STATE;
            }
        }

        let status = Status(
            self.sdk
                .open_imu(mode.native_code(), frequency.native_code()),
        );
        if status.is_ok() {
            debug!("IMU {:?} opened at {} Hz", mode, frequency.hertz());
            self.open_imu.insert(mode);
        } else {
            warn!("Native open_imu returned {}", status);
        }
        status
    }

    /// Disable an IMU stream; succeeds when the stream was never opened
    pub fn close_imu(&mut self, mode: ImuMode) -> Status {
        if self.state == SessionState::Destroyed {
            return Status::DESTROYED;
        }
        if !self.open_imu.contains(&mode) {
            return Status::OK;
        }

        let status = Status(self.sdk.close_imu(mode.native_code()));
        if status.is_ok() {
            debug!("IMU {:?} closed", mode);
            self.open_imu.remove(&mode);
        } else {
            warn!("Native close_imu returned {}", status);
        }
        status
    }

    /// Switch 3D display mode
    ///
    /// Returns `None` when the SDK has no display-mode call.
    pub fn set_3d(&mut self, enabled: bool) -> Option<Status> {
        match self.state {
            SessionState::Started => {}
            SessionState::Destroyed => return Some(Status::DESTROYED),
            _ => return Some(Status::INVALID_STATE),
        }
        self.sdk.set_3d(enabled).map(Status)
    }

    /// Destroy the session and hand the SDK back for the next one
    pub fn into_sdk(mut self) -> Box<dyn NativeSdk> {
        self.destroy();
        std::mem::replace(&mut self.sdk, Box::new(UnavailableSdk))
    }
}

impl Drop for NativeSession {
    fn drop(&mut self) {
        self.destroy();
    }
}
