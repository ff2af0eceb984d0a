//! Bridge actor: the connection state machine
//!
//! Runs on one Tokio task and is the only owner of the native SDK. Blocking
//! native calls for session setup run on the blocking pool; everything else
//! (teardown, IMU and 3D toggles) runs inline because those calls return
//! promptly.
//!
//! Release, detach and failed connect attempts bump `generation`. Results
//! from permission prompts and connect attempts, and relayed native events,
//! carry the generation they started under and are discarded (with the
//! session destroyed) when it no longer matches.

use super::command::{Attempt, BridgeCommand, Internal, Responder};
use super::{BridgeState, BridgeStatus, Connection, SessionInfo};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::native::{NativeSdk, NativeSession, UnavailableSdk};
use crate::permission::{AccessDecision, PermissionBroker};
use crate::relay::EventRelay;
use crate::subscribers::Subscribers;
use crate::usb::{DeviceEnumerator, HostEvent, UsbHost};
use async_channel::Receiver;
use common::{RelayReceiver, RelaySender, RelayedSample, RelayedState, create_relay_channel};
use protocol::{
    DeviceDescriptor, DeviceType, LifecycleEvent, OrientationOffset, OrientationSample, Status,
    VITURE_VENDOR_ID,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Native state id reporting the glasses connection
const STATE_GLASSES_CONNECTION: i32 = 0;

enum Phase {
    Idle,
    AwaitingPermission {
        descriptor: DeviceDescriptor,
    },
    Connecting {
        descriptor: DeviceDescriptor,
        waiters: Vec<Responder<Result<Connection, BridgeError>>>,
    },
    Connected {
        session: NativeSession,
        info: SessionInfo,
        /// Shared with the session's relay; gates sample forwarding
        imu_active: Arc<AtomicBool>,
    },
}

pub(super) struct BridgeActor {
    config: BridgeConfig,
    host: Arc<dyn UsbHost>,
    enumerator: DeviceEnumerator,
    broker: Arc<PermissionBroker>,

    commands: Receiver<BridgeCommand>,
    host_events: Receiver<HostEvent>,
    relay_tx: RelaySender,
    relay_rx: RelayReceiver,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    state_tx: watch::Sender<BridgeState>,
    orientation: Subscribers<OrientationSample>,
    lifecycle: Subscribers<LifecycleEvent>,

    phase: Phase,
    /// The SDK while no session holds it
    sdk: Option<Box<dyn NativeSdk>>,
    generation: u64,
    imu_enabled: bool,
    three_d: bool,
    offset: OrientationOffset,
    /// Last relayed sample, before the offset
    last_sample: Option<OrientationSample>,
}

impl BridgeActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: BridgeConfig,
        host: Arc<dyn UsbHost>,
        sdk: Box<dyn NativeSdk>,
        commands: Receiver<BridgeCommand>,
        host_events: Receiver<HostEvent>,
        state_tx: watch::Sender<BridgeState>,
        orientation: Subscribers<OrientationSample>,
        lifecycle: Subscribers<LifecycleEvent>,
    ) -> Self {
        let (relay_tx, relay_rx) = create_relay_channel(config.orientation_buffer);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        Self {
            enumerator: DeviceEnumerator::new(host.clone()),
            broker: Arc::new(PermissionBroker::new(host.clone())),
            config,
            host,
            commands,
            host_events,
            relay_tx,
            relay_rx,
            internal_tx,
            internal_rx,
            state_tx,
            orientation,
            lifecycle,
            phase: Phase::Idle,
            sdk: Some(sdk),
            generation: 0,
            imu_enabled: false,
            three_d: false,
            offset: OrientationOffset::ZERO,
            last_sample: None,
        }
    }

    pub(super) async fn run(mut self) {
        info!("Bridge started");
        let mut host_open = true;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Ok(BridgeCommand::Shutdown { response }) => {
                        info!("Bridge shutting down");
                        self.teardown("shutdown");
                        let _ = response.send(());
                        break;
                    }
                    Ok(cmd) => self.handle_command(cmd),
                    Err(_) => {
                        debug!("All bridge handles dropped");
                        self.teardown("bridge dropped");
                        break;
                    }
                },

                event = self.host_events.recv(), if host_open => match event {
                    Ok(event) => self.handle_host_event(event),
                    Err(_) => {
                        warn!("USB host event channel closed; detach events will not be seen");
                        host_open = false;
                    }
                },

                Ok(sample) = self.relay_rx.recv_sample() => self.handle_sample(sample),

                Ok(state) = self.relay_rx.recv_state() => self.handle_native_state(state),

                Some(msg) = self.internal_rx.recv() => self.handle_internal(msg),
            }
        }

        self.relay_rx.close();
        info!("Bridge stopped");
    }

    fn handle_command(&mut self, cmd: BridgeCommand) {
        match cmd {
            BridgeCommand::Initialize { response } => self.initialize(response),
            BridgeCommand::Release { response } => {
                self.teardown("release");
                let _ = response.send(());
            }
            BridgeCommand::SetImuEnabled { enabled, response } => {
                let _ = response.send(self.set_imu_enabled(enabled));
            }
            BridgeCommand::Set3dEnabled { enabled, response } => {
                let _ = response.send(self.set_3d_enabled(enabled));
            }
            BridgeCommand::LastImuData { response } => {
                let _ = response.send(self.last_sample.map(|s| s.with_offset(&self.offset)));
            }
            BridgeCommand::ResetOrientation { response } => {
                let _ = response.send(self.reset_orientation());
            }
            BridgeCommand::Status { response } => {
                let _ = response.send(self.status());
            }
            BridgeCommand::Shutdown { response } => {
                // Handled by the run loop
                let _ = response.send(());
            }
        }
    }

    fn set_state(&self, state: BridgeState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                debug!("Bridge state {:?} -> {:?}", current, state);
                *current = state;
                true
            }
        });
    }

    fn emit(&self, event: LifecycleEvent) {
        debug!("Lifecycle event: {:?}", event);
        self.lifecycle.notify(&event);
    }

    // ===== initialize =====

    fn initialize(&mut self, response: Responder<Result<Connection, BridgeError>>) {
        if matches!(self.phase, Phase::Idle) {
            self.discover(response);
            return;
        }

        match &mut self.phase {
            Phase::Connected { info, .. } => {
                debug!("initialize() while connected to {}", info.device_name);
                let _ = response.send(Ok(Connection::Connected(info.clone())));
            }
            Phase::Connecting { waiters, .. } => {
                debug!("initialize() joined the connect in progress");
                waiters.push(response);
            }
            Phase::AwaitingPermission { .. } | Phase::Idle => {
                let _ = response.send(Ok(Connection::Pending));
            }
        }
    }

    fn discover(&mut self, response: Responder<Result<Connection, BridgeError>>) {
        self.set_state(BridgeState::Discovering);

        let descriptor = match self.enumerator.find() {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                self.set_state(BridgeState::Idle);
                let _ = response.send(Err(BridgeError::NotFound));
                return;
            }
            Err(e) => {
                warn!("Device scan failed: {}", e);
                self.set_state(BridgeState::Idle);
                let _ = response.send(Err(e));
                return;
            }
        };

        if descriptor.has_permission() {
            self.begin_connect(descriptor, vec![response]);
            return;
        }

        match self.broker.request_access(&descriptor) {
            Ok(decision) => {
                let generation = self.generation;
                let internal = self.internal_tx.clone();
                let pending = descriptor.clone();
                tokio::spawn(async move {
                    let decision = decision.await;
                    let _ = internal.send(Internal::PermissionResolved {
                        generation,
                        descriptor: pending,
                        decision,
                    });
                });

                info!("Waiting for USB permission for {}", descriptor.product_name);
                self.phase = Phase::AwaitingPermission { descriptor };
                self.set_state(BridgeState::AwaitingPermission);
                let _ = response.send(Ok(Connection::Pending));
            }
            Err(e) => {
                self.set_state(BridgeState::Idle);
                let _ = response.send(Err(e));
            }
        }
    }

    fn begin_connect(
        &mut self,
        descriptor: DeviceDescriptor,
        waiters: Vec<Responder<Result<Connection, BridgeError>>>,
    ) {
        info!("Connecting to {}", descriptor.product_name);
        self.phase = Phase::Connecting {
            descriptor,
            waiters,
        };
        self.set_state(BridgeState::Connecting);
        self.spawn_connect();
    }

    /// Run session setup on the blocking pool
    ///
    /// If a superseded attempt still holds the SDK, the new attempt starts
    /// when that one reports back.
    fn spawn_connect(&mut self) {
        let Phase::Connecting { descriptor, .. } = &self.phase else {
            return;
        };
        let Some(sdk) = self.sdk.take() else {
            debug!("Previous connect attempt still running; queued");
            return;
        };

        let generation = self.generation;
        let descriptor = descriptor.clone();
        let host = self.host.clone();
        let config = self.config.clone();
        let imu_active = Arc::new(AtomicBool::new(false));
        let relay = Arc::new(EventRelay::new(
            generation,
            self.relay_tx.clone(),
            imu_active.clone(),
        ));
        let internal = self.internal_tx.clone();

        tokio::spawn(async move {
            let attempt = tokio::task::spawn_blocking(move || {
                connect_session(host.as_ref(), sdk, &descriptor, &config, relay)
            })
            .await
            .unwrap_or_else(|e| {
                error!("Connect task failed: {}", e);
                Attempt::Failed(
                    Box::new(UnavailableSdk),
                    BridgeError::Native {
                        code: Status::NATIVE_FAILURE.code(),
                        message: "Native connect aborted".to_string(),
                    },
                )
            });

            let _ = internal.send(Internal::ConnectFinished {
                generation,
                attempt,
                imu_active,
            });
        });
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::PermissionResolved {
                generation,
                descriptor,
                decision,
            } => self.permission_resolved(generation, descriptor, decision),
            Internal::ConnectFinished {
                generation,
                attempt,
                imu_active,
            } => self.connect_finished(generation, attempt, imu_active),
        }
    }

    fn permission_resolved(
        &mut self,
        generation: u64,
        descriptor: DeviceDescriptor,
        decision: AccessDecision,
    ) {
        if generation != self.generation || !matches!(self.phase, Phase::AwaitingPermission { .. })
        {
            debug!(
                "Ignoring superseded permission answer ({:?}) for {}",
                decision, descriptor.product_name
            );
            return;
        }

        match decision {
            AccessDecision::Granted => self.begin_connect(descriptor, Vec::new()),
            AccessDecision::Denied => {
                info!("USB permission denied for {}", descriptor.product_name);
                self.phase = Phase::Idle;
                self.set_state(BridgeState::Idle);
                self.emit(LifecycleEvent::PermissionDenied);
            }
        }
    }

    fn connect_finished(&mut self, generation: u64, attempt: Attempt, imu_active: Arc<AtomicBool>) {
        if generation != self.generation {
            debug!("Discarding connect attempt {} (superseded)", generation);
            self.sdk = Some(match attempt {
                Attempt::Connected(session, _) => session.into_sdk(),
                Attempt::Failed(sdk, _) => sdk,
            });
            self.spawn_connect();
            return;
        }

        let Phase::Connecting { waiters, .. } = std::mem::replace(&mut self.phase, Phase::Idle)
        else {
            // Generation unchanged implies we are still connecting
            error!("Connect finished outside the connecting phase");
            self.sdk = Some(match attempt {
                Attempt::Connected(session, _) => session.into_sdk(),
                Attempt::Failed(sdk, _) => sdk,
            });
            self.set_state(BridgeState::Idle);
            return;
        };

        match attempt {
            Attempt::Connected(session, info) => {
                info!(
                    "Connected to {} ({}, {:04x}:{:04x})",
                    info.device_name, info.device_type, info.vendor_id, info.product_id
                );
                self.phase = Phase::Connected {
                    session,
                    info: info.clone(),
                    imu_active,
                };
                self.set_state(BridgeState::Connected);
                self.emit(LifecycleEvent::Connected {
                    device_name: info.device_name.clone(),
                    device_type: info.device_type,
                });
                for waiter in waiters {
                    let _ = waiter.send(Ok(Connection::Connected(info.clone())));
                }
            }
            Attempt::Failed(sdk, e) => {
                warn!("Connect failed: {}", e);
                // Late callbacks from the dead session must not reach a retry
                self.generation += 1;
                self.sdk = Some(sdk);
                self.set_state(BridgeState::Idle);
                self.emit(LifecycleEvent::InitFailed {
                    code: e.code(),
                    message: e.to_string(),
                });
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
            }
        }
    }

    // ===== teardown =====

    /// Return to idle from any phase
    ///
    /// Emits `Disconnected` only when a session was actually up.
    fn teardown(&mut self, reason: &str) {
        self.generation += 1;
        let mut disconnected = false;

        match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => {}
            Phase::AwaitingPermission { descriptor } => {
                debug!(
                    "Abandoning permission wait for {} ({})",
                    descriptor.product_name, reason
                );
                self.broker.cancel(&descriptor.key());
            }
            Phase::Connecting { waiters, .. } => {
                debug!("Superseding connect in progress ({})", reason);
                for waiter in waiters {
                    let _ = waiter.send(Err(BridgeError::Superseded));
                }
            }
            Phase::Connected {
                mut session,
                info,
                imu_active,
            } => {
                self.set_state(BridgeState::Releasing);
                imu_active.store(false, Ordering::Release);

                let status = session.close_imu(self.config.imu_mode);
                if !status.is_ok() {
                    warn!("Ignoring close_imu failure during teardown: {}", status);
                }
                let status = session.stop();
                if !status.is_ok() {
                    warn!("Ignoring stop failure during teardown: {}", status);
                }
                self.sdk = Some(session.into_sdk());

                info!("Disconnected from {} ({})", info.device_name, reason);
                disconnected = true;
            }
        }

        self.imu_enabled = false;
        self.three_d = false;
        self.offset = OrientationOffset::ZERO;
        self.last_sample = None;
        self.set_state(BridgeState::Idle);

        if disconnected {
            self.emit(LifecycleEvent::Disconnected);
        }
    }

    // ===== connected-state operations =====

    fn set_imu_enabled(&mut self, enabled: bool) -> Result<(), BridgeError> {
        let Phase::Connected {
            session,
            imu_active,
            ..
        } = &mut self.phase
        else {
            return Err(BridgeError::NotInitialized);
        };
        if enabled == self.imu_enabled {
            return Ok(());
        }

        if enabled {
            imu_active.store(true, Ordering::Release);
            let status = session.open_imu(self.config.imu_mode, self.config.imu_frequency);
            if !status.is_ok() {
                imu_active.store(false, Ordering::Release);
                return Err(BridgeError::native("open_imu", status));
            }
        } else {
            imu_active.store(false, Ordering::Release);
            let status = session.close_imu(self.config.imu_mode);
            if !status.is_ok() {
                imu_active.store(true, Ordering::Release);
                return Err(BridgeError::native("close_imu", status));
            }
        }

        info!("IMU {}", if enabled { "enabled" } else { "disabled" });
        self.imu_enabled = enabled;
        Ok(())
    }

    fn set_3d_enabled(&mut self, enabled: bool) -> Result<(), BridgeError> {
        let Phase::Connected { session, .. } = &mut self.phase else {
            return Err(BridgeError::NotInitialized);
        };
        if enabled == self.three_d {
            return Ok(());
        }

        match session.set_3d(enabled) {
            Some(status) if status.is_ok() => {}
            Some(status) => return Err(BridgeError::native("set_3d", status)),
            None if self.config.strict_3d => {
                return Err(BridgeError::Unsupported("3D display mode".to_string()));
            }
            None => warn!("SDK has no 3D display call; keeping the 3D flag locally"),
        }

        self.three_d = enabled;
        Ok(())
    }

    fn reset_orientation(&mut self) -> Result<OrientationOffset, BridgeError> {
        if !matches!(self.phase, Phase::Connected { .. }) {
            return Err(BridgeError::NotInitialized);
        }
        match self.last_sample {
            Some(raw) => {
                let current = raw.with_offset(&self.offset);
                self.offset.recenter(&current);
                info!(
                    "Orientation recentered (roll={:.2}, pitch={:.2}, yaw={:.2})",
                    self.offset.roll, self.offset.pitch, self.offset.yaw
                );
            }
            None => debug!("No sample yet; orientation offset unchanged"),
        }
        Ok(self.offset)
    }

    fn status(&self) -> BridgeStatus {
        let device = match &self.phase {
            Phase::Connected { info, .. } => Some(info.clone()),
            _ => None,
        };
        BridgeStatus {
            state: *self.state_tx.borrow(),
            imu_enabled: self.imu_enabled,
            three_d_enabled: self.three_d,
            device,
            offset: self.offset,
        }
    }

    // ===== events =====

    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Attached(device) => {
                debug!(
                    "USB attached: {} ({:04x}:{:04x})",
                    device.product_name, device.vendor_id, device.product_id
                );
            }
            HostEvent::Detached(key) => {
                // Release any prompt still open for the departed device
                self.broker.resolve(&key, false);

                if key.vendor_id == VITURE_VENDOR_ID && !matches!(self.phase, Phase::Idle) {
                    info!(
                        "Glasses detached (bus {} addr {})",
                        key.bus_number, key.device_address
                    );
                    self.teardown("USB detached");
                }
            }
            HostEvent::PermissionResult { device, granted } => {
                self.broker.resolve(&device, granted);
            }
        }
    }

    fn handle_sample(&mut self, relayed: RelayedSample) {
        if relayed.session != self.generation {
            trace!("Dropping sample from session {}", relayed.session);
            return;
        }
        if !self.imu_enabled || !matches!(self.phase, Phase::Connected { .. }) {
            return;
        }

        self.last_sample = Some(relayed.sample);
        let sample = relayed.sample.with_offset(&self.offset);
        self.orientation.notify(&sample);
    }

    fn handle_native_state(&mut self, relayed: RelayedState) {
        if relayed.session != self.generation {
            debug!(
                "Dropping state change {}={} from session {}",
                relayed.state_id, relayed.value, relayed.session
            );
            return;
        }

        self.emit(LifecycleEvent::DeviceState {
            state_id: relayed.state_id,
            value: relayed.value,
        });

        if relayed.state_id == STATE_GLASSES_CONNECTION && relayed.value == 0 {
            info!("Glasses reported disconnect");
            self.teardown("glasses disconnected");
        }
    }
}

/// Bring up a native session; runs on the blocking pool
///
/// Any failure destroys the partial session and hands the SDK back.
fn connect_session(
    host: &dyn UsbHost,
    sdk: Box<dyn NativeSdk>,
    descriptor: &DeviceDescriptor,
    config: &BridgeConfig,
    relay: Arc<EventRelay>,
) -> Attempt {
    let mut session = NativeSession::new(sdk);

    let result = catch_unwind(AssertUnwindSafe(|| {
        setup_session(&mut session, host, descriptor, config, relay)
    }))
    .unwrap_or_else(|_| {
        error!("Panic during native session setup");
        Err(BridgeError::Native {
            code: Status::NATIVE_FAILURE.code(),
            message: "Native session setup panicked".to_string(),
        })
    });

    match result {
        Ok(info) => Attempt::Connected(session, info),
        Err(e) => Attempt::Failed(session.into_sdk(), e),
    }
}

fn setup_session(
    session: &mut NativeSession,
    host: &dyn UsbHost,
    descriptor: &DeviceDescriptor,
    config: &BridgeConfig,
    relay: Arc<EventRelay>,
) -> Result<SessionInfo, BridgeError> {
    if !session.is_available() {
        return Err(BridgeError::Native {
            code: Status::SDK_UNAVAILABLE.code(),
            message: "Vendor SDK not available".to_string(),
        });
    }

    let fd = host.open(descriptor)?;
    if let Some(level) = config.native_log_level {
        session.set_log_level(level);
    }
    if !session.create(descriptor.product_id, fd) {
        return Err(BridgeError::native("create", Status::CREATE_FAILED));
    }

    let status = session.set_callback(relay);
    if !status.is_ok() {
        return Err(BridgeError::native("callback registration", status));
    }
    let status = session.initialize(Some(&config.cache_dir));
    if !status.is_ok() {
        return Err(BridgeError::native("initialize", status));
    }
    let status = session.start();
    if !status.is_ok() {
        return Err(BridgeError::native("start", status));
    }

    let device_type = session.device_type();
    let known = descriptor.device_type();
    if known != DeviceType::Unknown && known != device_type {
        warn!(
            "SDK reports {} for {} (match table says {})",
            device_type, descriptor.product_name, known
        );
    }

    Ok(SessionInfo {
        device_name: descriptor.product_name.clone(),
        device_type,
        vendor_id: descriptor.vendor_id,
        product_id: descriptor.product_id,
    })
}
