//! In-process USB host and SDK for tests and hardware-free runs
//!
//! [`MockHost`] keeps a list of attached devices and a set of granted ones;
//! permission prompts are answered explicitly with
//! [`MockHost::answer_permission`]. [`MockSdk`] records every call and lets a
//! test fire IMU and state callbacks, from the calling thread or from a
//! separate one to mimic the SDK's own thread.

use crate::error::BridgeError;
use crate::native::{NativeCallbacks, NativeSdk, STATUS_FAILURE};
use crate::usb::{HostEvent, UsbHost};
use async_channel::{Receiver, Sender, unbounded};
use protocol::{DeviceDescriptor, DeviceKey, PermissionState, VITURE_VENDOR_ID, lookup_product};
use std::collections::HashSet;
use std::fs::File;
use std::os::fd::{OwnedFd, RawFd};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

/// File descriptor standing in for a USB connection
pub fn null_fd() -> std::io::Result<OwnedFd> {
    Ok(OwnedFd::from(File::open("/dev/null")?))
}

#[derive(Default)]
struct HostState {
    devices: Vec<DeviceDescriptor>,
    granted: HashSet<DeviceKey>,
    prompts: usize,
    opened: usize,
    fail_enumeration: bool,
    fail_open: Option<BridgeError>,
}

/// Scriptable USB host
pub struct MockHost {
    state: Mutex<HostState>,
    events: Sender<HostEvent>,
}

impl MockHost {
    /// Create a host with nothing attached
    ///
    /// Returns the host and the receiving end of its event channel.
    pub fn new() -> (Arc<Self>, Receiver<HostEvent>) {
        let (tx, rx) = unbounded();
        (
            Arc::new(Self {
                state: Mutex::new(HostState::default()),
                events: tx,
            }),
            rx,
        )
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, event: HostEvent) {
        if self.events.try_send(event).is_err() {
            debug!("Mock host event dropped, receiver gone");
        }
    }

    /// Plug in a device
    pub fn attach(&self, device: DeviceDescriptor) {
        {
            let mut state = self.lock();
            if device.permission == PermissionState::Granted {
                state.granted.insert(device.key());
            }
            state.devices.retain(|d| d.key() != device.key());
            state.devices.push(device.clone());
        }
        self.send(HostEvent::Attached(device));
    }

    /// Unplug a device
    pub fn detach(&self, key: DeviceKey) {
        {
            let mut state = self.lock();
            state.devices.retain(|d| d.key() != key);
            state.granted.remove(&key);
        }
        self.send(HostEvent::Detached(key));
    }

    /// Answer an open permission prompt as the user would
    pub fn answer_permission(&self, key: DeviceKey, granted: bool) {
        if granted {
            self.lock().granted.insert(key);
        }
        self.send(HostEvent::PermissionResult {
            device: key,
            granted,
        });
    }

    /// Number of permission prompts shown
    pub fn prompts(&self) -> usize {
        self.lock().prompts
    }

    /// Number of successful `open` calls
    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    /// Make `open` fail with `error` until cleared with `None`
    pub fn fail_open(&self, error: Option<BridgeError>) {
        self.lock().fail_open = error;
    }
}

impl UsbHost for MockHost {
    fn attached_devices(&self) -> Result<Vec<DeviceDescriptor>, BridgeError> {
        let state = self.lock();
        if state.fail_enumeration {
            return Err(BridgeError::Host("mock enumeration failure".to_string()));
        }
        Ok(state
            .devices
            .iter()
            .map(|d| DeviceDescriptor {
                permission: if state.granted.contains(&d.key()) {
                    PermissionState::Granted
                } else {
                    PermissionState::NotGranted
                },
                ..d.clone()
            })
            .collect())
    }

    fn has_permission(&self, device: &DeviceKey) -> bool {
        self.lock().granted.contains(device)
    }

    fn request_permission(&self, _device: &DeviceDescriptor) -> Result<(), BridgeError> {
        self.lock().prompts += 1;
        Ok(())
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<OwnedFd, BridgeError> {
        let mut state = self.lock();
        if let Some(error) = state.fail_open.clone() {
            return Err(error);
        }
        if !state.devices.iter().any(|d| d.key() == device.key()) {
            return Err(BridgeError::NotFound);
        }
        if !state.granted.contains(&device.key()) {
            return Err(BridgeError::PermissionDenied);
        }
        let fd = null_fd()?;
        state.opened += 1;
        Ok(fd)
    }
}

struct SdkState {
    available: bool,
    three_d_supported: bool,
    initialize_status: i32,
    start_status: i32,
    open_imu_status: i32,
    device_type: Option<i32>,
    create_delay: Option<Duration>,
    /// State change fired from a separate thread after a failed initialize
    late_state: Option<(Duration, i32, i32)>,
    calls: Vec<String>,
    creates: usize,
    destroys: usize,
    registrations: usize,
    handle: Option<u16>,
    callbacks: Option<Arc<dyn NativeCallbacks>>,
}

impl Default for SdkState {
    fn default() -> Self {
        Self {
            available: true,
            three_d_supported: false,
            initialize_status: 0,
            start_status: 0,
            open_imu_status: 0,
            device_type: None,
            create_delay: None,
            late_state: None,
            calls: Vec::new(),
            creates: 0,
            destroys: 0,
            registrations: 0,
            handle: None,
            callbacks: None,
        }
    }
}

fn lock_sdk(state: &Mutex<SdkState>) -> MutexGuard<'_, SdkState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Recording SDK; move it into the bridge and keep the [`MockSdkProbe`]
pub struct MockSdk {
    state: Arc<Mutex<SdkState>>,
}

/// Test-side view of a [`MockSdk`]
#[derive(Clone)]
pub struct MockSdkProbe {
    state: Arc<Mutex<SdkState>>,
}

impl MockSdk {
    pub fn new() -> (Self, MockSdkProbe) {
        let state = Arc::new(Mutex::new(SdkState::default()));
        (
            Self {
                state: state.clone(),
            },
            MockSdkProbe { state },
        )
    }

    fn record(&self, call: String) -> MutexGuard<'_, SdkState> {
        let mut state = lock_sdk(&self.state);
        state.calls.push(call);
        state
    }

    /// Status for a call that needs an allocated handle
    fn with_handle(&self, call: &str, status: impl FnOnce(&SdkState) -> i32) -> i32 {
        let state = self.record(call.to_string());
        if state.handle.is_none() {
            return STATUS_FAILURE;
        }
        status(&state)
    }
}

impl NativeSdk for MockSdk {
    fn is_available(&self) -> bool {
        lock_sdk(&self.state).available
    }

    fn is_product_id_valid(&self, product_id: u16) -> bool {
        lookup_product(VITURE_VENDOR_ID, product_id).is_some()
    }

    fn set_log_level(&mut self, level: i32) {
        drop(self.record(format!("set_log_level({})", level)));
    }

    fn create(&mut self, product_id: u16, _fd: RawFd) -> bool {
        let delay = {
            let mut state = self.record(format!("create({:04x})", product_id));
            if state.handle.is_some() || !state.available {
                return false;
            }
            state.creates += 1;
            state.handle = Some(product_id);
            state.create_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        true
    }

    fn initialize(&mut self, _cache_dir: Option<&Path>) -> i32 {
        let status = self.with_handle("initialize", |s| s.initialize_status);
        if status != 0 {
            let mut state = lock_sdk(&self.state);
            if let (Some((delay, state_id, value)), Some(callbacks)) =
                (state.late_state.take(), state.callbacks.clone())
            {
                std::thread::spawn(move || {
                    std::thread::sleep(delay);
                    callbacks.on_state(state_id, value);
                });
            }
        }
        status
    }

    fn start(&mut self) -> i32 {
        self.with_handle("start", |s| s.start_status)
    }

    fn stop(&mut self) -> i32 {
        self.with_handle("stop", |_| 0)
    }

    fn shutdown(&mut self) {
        drop(self.record("shutdown".to_string()));
    }

    fn destroy(&mut self) {
        let mut state = self.record("destroy".to_string());
        if state.handle.take().is_some() {
            state.destroys += 1;
        }
        state.callbacks = None;
    }

    fn device_type(&self) -> i32 {
        let state = lock_sdk(&self.state);
        match (state.device_type, state.handle) {
            (Some(code), Some(_)) => code,
            (None, Some(product_id)) => lookup_product(VITURE_VENDOR_ID, product_id)
                .and_then(|p| p.device_type.native_code())
                .unwrap_or(STATUS_FAILURE),
            (_, None) => STATUS_FAILURE,
        }
    }

    fn register_callbacks(&mut self, callbacks: Arc<dyn NativeCallbacks>) {
        let mut state = self.record("register_callbacks".to_string());
        state.registrations += 1;
        state.callbacks = Some(callbacks);
    }

    fn clear_callbacks(&mut self) {
        self.record("clear_callbacks".to_string()).callbacks = None;
    }

    fn open_imu(&mut self, mode: u8, frequency: u8) -> i32 {
        self.with_handle(&format!("open_imu({},{})", mode, frequency), |s| {
            s.open_imu_status
        })
    }

    fn close_imu(&mut self, mode: u8) -> i32 {
        self.with_handle(&format!("close_imu({})", mode), |_| 0)
    }

    fn set_3d(&mut self, enabled: bool) -> Option<i32> {
        let state = self.record(format!("set_3d({})", enabled));
        state.three_d_supported.then_some(0)
    }
}

impl MockSdkProbe {
    fn lock(&self) -> MutexGuard<'_, SdkState> {
        lock_sdk(&self.state)
    }

    /// Every SDK call so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn creates(&self) -> usize {
        self.lock().creates
    }

    pub fn destroys(&self) -> usize {
        self.lock().destroys
    }

    /// Allocated native sessions (0 or 1)
    pub fn live_handles(&self) -> usize {
        usize::from(self.lock().handle.is_some())
    }

    pub fn has_callbacks(&self) -> bool {
        self.lock().callbacks.is_some()
    }

    pub fn registrations(&self) -> usize {
        self.lock().registrations
    }

    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    pub fn set_3d_supported(&self, supported: bool) {
        self.lock().three_d_supported = supported;
    }

    pub fn set_initialize_status(&self, status: i32) {
        self.lock().initialize_status = status;
    }

    pub fn set_start_status(&self, status: i32) {
        self.lock().start_status = status;
    }

    pub fn set_open_imu_status(&self, status: i32) {
        self.lock().open_imu_status = status;
    }

    /// Override the raw device-type code reported for the live session
    pub fn set_device_type(&self, code: i32) {
        self.lock().device_type = Some(code);
    }

    /// Hold `create` for `delay`, keeping the bridge in its connecting phase
    pub fn set_create_delay(&self, delay: Duration) {
        self.lock().create_delay = Some(delay);
    }

    /// After the next failed `initialize`, fire `state_id`=`value` from a
    /// separate thread once `delay` has passed, through the callbacks that
    /// were registered when it failed
    pub fn set_state_after_failed_initialize(&self, delay: Duration, state_id: i32, value: i32) {
        self.lock().late_state = Some((delay, state_id, value));
    }

    fn callbacks(&self) -> Option<Arc<dyn NativeCallbacks>> {
        self.lock().callbacks.clone()
    }

    /// Fire an IMU callback on the calling thread
    ///
    /// Returns false when no callback target is registered.
    pub fn emit_imu(&self, block: &[u8], timestamp: u64) -> bool {
        match self.callbacks() {
            Some(callbacks) => {
                callbacks.on_imu(block, timestamp);
                true
            }
            None => false,
        }
    }

    /// Fire a state callback on the calling thread
    pub fn emit_state(&self, state_id: i32, value: i32) -> bool {
        match self.callbacks() {
            Some(callbacks) => {
                callbacks.on_state(state_id, value);
                true
            }
            None => false,
        }
    }

    /// Fire a burst of IMU callbacks from a dedicated thread
    pub fn emit_imu_from_thread(&self, blocks: Vec<(Vec<u8>, u64)>) -> JoinHandle<usize> {
        let probe = self.clone();
        std::thread::spawn(move || {
            blocks
                .iter()
                .filter(|(block, timestamp)| probe.emit_imu(block, *timestamp))
                .count()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::create_mock_descriptor;

    #[test]
    fn test_permission_answer_updates_grants() {
        let (host, events) = MockHost::new();
        let device = create_mock_descriptor(0x1011, false);
        host.attach(device.clone());
        assert!(!host.has_permission(&device.key()));

        host.answer_permission(device.key(), true);
        assert!(host.has_permission(&device.key()));
        assert!(host.attached_devices().unwrap()[0].has_permission());

        assert!(matches!(events.try_recv(), Ok(HostEvent::Attached(_))));
        assert!(matches!(
            events.try_recv(),
            Ok(HostEvent::PermissionResult { granted: true, .. })
        ));
    }

    #[test]
    fn test_open_requires_permission() {
        let (host, _events) = MockHost::new();
        let device = create_mock_descriptor(0x1012, false);
        host.attach(device.clone());

        assert_eq!(host.open(&device).err(), Some(BridgeError::PermissionDenied));
        host.answer_permission(device.key(), true);
        assert!(host.open(&device).is_ok());
        assert_eq!(host.opened(), 1);
    }

    #[test]
    fn test_sdk_records_handle_free_calls() {
        let (mut sdk, probe) = MockSdk::new();
        sdk.set_log_level(3);
        sdk.shutdown();
        // Recorder lock was released by both calls
        assert!(sdk.create(0x1011, 3));
        sdk.destroy();

        assert_eq!(
            probe.calls(),
            vec!["set_log_level(3)", "shutdown", "create(1011)", "destroy"]
        );
    }

    #[test]
    fn test_sdk_allows_one_handle() {
        let (mut sdk, probe) = MockSdk::new();
        assert!(sdk.create(0x1014, 3));
        assert!(!sdk.create(0x1014, 3));
        assert_eq!(sdk.device_type(), 1);

        sdk.destroy();
        assert_eq!(probe.live_handles(), 0);
        assert_eq!(sdk.device_type(), STATUS_FAILURE);
    }
}
