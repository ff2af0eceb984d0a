//! Bridge facade
//!
//! [`BridgeHandle`] is the application's only dependency. It forwards each
//! operation to a single actor task that owns the USB host, the permission
//! broker and the one native session, so every state transition happens in
//! one place:
//!
//! ```text
//! Idle → Discovering → AwaitingPermission → Connecting → Connected → Releasing → Idle
//! ```
//!
//! `initialize()` never blocks on the user: when a permission prompt is
//! needed it returns [`Connection::Pending`] and the outcome follows as a
//! [`LifecycleEvent`].

mod actor;
mod command;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::native::NativeSdk;
use crate::subscribers::{Subscribers, Subscription};
use crate::usb::{HostEvent, UsbHost};
use actor::BridgeActor;
use async_channel::{Receiver, Sender, bounded};
use command::BridgeCommand;
use protocol::{DeviceType, LifecycleEvent, OrientationOffset, OrientationSample, Status};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Capacity of the command queue between handles and the actor
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Connection state as seen by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Idle,
    Discovering,
    AwaitingPermission,
    Connecting,
    Connected,
    Releasing,
}

/// Device information for an established session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub device_name: String,
    pub device_type: DeviceType,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// Successful outcome of `initialize()`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    Connected(SessionInfo),
    /// A permission prompt is open; watch the lifecycle stream for the result
    Pending,
}

/// Snapshot of the facade's flags
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeStatus {
    pub state: BridgeState,
    pub imu_enabled: bool,
    pub three_d_enabled: bool,
    pub device: Option<SessionInfo>,
    pub offset: OrientationOffset,
}

/// Flat view of an `initialize()` outcome for pass-through consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitResult {
    pub success: bool,
    pub pending: bool,
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
}

impl From<&Result<Connection, BridgeError>> for InitResult {
    fn from(result: &Result<Connection, BridgeError>) -> Self {
        match result {
            Ok(Connection::Connected(info)) => InitResult {
                success: true,
                pending: false,
                code: Status::OK.code(),
                message: format!("Connected to {}", info.device_name),
                device_name: Some(info.device_name.clone()),
                device_type: Some(info.device_type),
            },
            Ok(Connection::Pending) => InitResult {
                success: false,
                pending: true,
                code: Status::PENDING.code(),
                message: "Waiting for USB permission".to_string(),
                device_name: None,
                device_type: None,
            },
            Err(e) => InitResult {
                success: false,
                pending: false,
                code: e.code(),
                message: e.to_string(),
                device_name: None,
                device_type: None,
            },
        }
    }
}

/// Handle to a running bridge; cheap to clone
#[derive(Clone)]
pub struct BridgeHandle {
    commands: Sender<BridgeCommand>,
    state: watch::Receiver<BridgeState>,
    orientation: Subscribers<OrientationSample>,
    lifecycle: Subscribers<LifecycleEvent>,
}

impl BridgeHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> BridgeCommand,
    ) -> Result<T, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| BridgeError::Shutdown)?;
        rx.await.map_err(|_| BridgeError::Shutdown)
    }

    /// Connect to the first supported glasses
    ///
    /// Idempotent while connected; joins an attempt already in progress.
    pub async fn initialize(&self) -> Result<Connection, BridgeError> {
        self.request(|response| BridgeCommand::Initialize { response })
            .await?
    }

    /// `initialize()`, then follow the lifecycle stream for up to `timeout`
    /// while a permission prompt is open
    ///
    /// Returns [`Connection::Pending`] if the prompt is still open when the
    /// time runs out.
    pub async fn initialize_and_wait(&self, timeout: Duration) -> Result<Connection, BridgeError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = self.on_lifecycle_event(move |event| {
            if event.is_terminal() || matches!(event, LifecycleEvent::Connected { .. }) {
                let _ = tx.send(event.clone());
            }
        });

        match self.initialize().await? {
            Connection::Pending => {}
            connected => return Ok(connected),
        }

        match tokio::time::timeout(timeout, rx.recv()).await {
            Err(_) => {
                debug!("Permission still pending after {:?}", timeout);
                Ok(Connection::Pending)
            }
            Ok(None) => Err(BridgeError::Shutdown),
            Ok(Some(LifecycleEvent::Connected { .. })) => self.initialize().await,
            Ok(Some(LifecycleEvent::PermissionDenied)) => Err(BridgeError::PermissionDenied),
            Ok(Some(LifecycleEvent::InitFailed { code, message })) => {
                Err(BridgeError::Native { code, message })
            }
            Ok(Some(_)) => Err(BridgeError::Superseded),
        }
    }

    /// Disconnect and return to idle; teardown problems are only logged
    pub async fn release(&self) {
        if let Err(e) = self
            .request(|response| BridgeCommand::Release { response })
            .await
        {
            debug!("release() on a stopped bridge: {}", e);
        }
    }

    pub async fn set_imu_enabled(&self, enabled: bool) -> Result<(), BridgeError> {
        self.request(|response| BridgeCommand::SetImuEnabled { enabled, response })
            .await?
    }

    pub async fn set_3d_enabled(&self, enabled: bool) -> Result<(), BridgeError> {
        self.request(|response| BridgeCommand::Set3dEnabled { enabled, response })
            .await?
    }

    /// Most recent sample with the current offset applied
    pub async fn last_imu_data(&self) -> Option<OrientationSample> {
        self.request(|response| BridgeCommand::LastImuData { response })
            .await
            .ok()
            .flatten()
    }

    /// Recenter on the most recent sample and return the new offset
    pub async fn reset_orientation(&self) -> Result<OrientationOffset, BridgeError> {
        self.request(|response| BridgeCommand::ResetOrientation { response })
            .await?
    }

    pub async fn status(&self) -> Result<BridgeStatus, BridgeError> {
        self.request(|response| BridgeCommand::Status { response })
            .await
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == BridgeState::Connected
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Receiver that observes every published state change
    pub fn watch_state(&self) -> watch::Receiver<BridgeState> {
        self.state.clone()
    }

    /// Subscribe to orientation samples (offset applied)
    pub fn on_orientation(
        &self,
        handler: impl Fn(&OrientationSample) + Send + Sync + 'static,
    ) -> Subscription {
        self.orientation.subscribe(handler)
    }

    /// Subscribe to lifecycle events
    pub fn on_lifecycle_event(
        &self,
        handler: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.lifecycle.subscribe(handler)
    }

    /// Release and stop the actor
    pub async fn shutdown(&self) {
        if let Err(e) = self
            .request(|response| BridgeCommand::Shutdown { response })
            .await
        {
            debug!("shutdown() on a stopped bridge: {}", e);
        }
    }
}

/// Start the bridge actor on the current Tokio runtime
///
/// `host_events` must be the receiving end of the channel `host` reports to.
/// `sdk` is the process's single SDK instance; the actor owns it from here on.
pub fn spawn_bridge(
    config: BridgeConfig,
    host: Arc<dyn UsbHost>,
    host_events: Receiver<HostEvent>,
    sdk: Box<dyn NativeSdk>,
) -> (BridgeHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = bounded(COMMAND_QUEUE_CAPACITY);
    let (state_tx, state_rx) = watch::channel(BridgeState::Idle);
    let orientation = Subscribers::new();
    let lifecycle = Subscribers::new();

    let actor = BridgeActor::new(
        config,
        host,
        sdk,
        cmd_rx,
        host_events,
        state_tx,
        orientation.clone(),
        lifecycle.clone(),
    );
    let task = tokio::spawn(actor.run());

    (
        BridgeHandle {
            commands: cmd_tx,
            state: state_rx,
            orientation,
            lifecycle,
        },
        task,
    )
}
