//! Application adapter
//!
//! Keeps a UI-facing [`HudState`] in sync with the bridge by following its
//! orientation and lifecycle streams. Failure messages are passed through
//! verbatim from results and events.

use crate::error::BridgeError;
use crate::facade::{BridgeHandle, InitResult};
use crate::subscribers::Subscription;
use protocol::{DeviceType, LifecycleEvent, OrientationSample};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// What the HUD shows about the glasses
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HudState {
    pub connected: bool,
    /// A permission prompt is open
    pub pending: bool,
    pub device_name: Option<String>,
    pub device_type: Option<DeviceType>,
    pub imu_on: bool,
    pub three_d: bool,
    pub last_sample: Option<OrientationSample>,
    pub last_error: Option<String>,
}

impl HudState {
    fn apply(&mut self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::Connected {
                device_name,
                device_type,
            } => {
                self.connected = true;
                self.pending = false;
                self.device_name = Some(device_name.clone());
                self.device_type = Some(*device_type);
                self.last_error = None;
            }
            LifecycleEvent::Disconnected => self.clear_session(),
            LifecycleEvent::PermissionDenied => {
                self.pending = false;
                self.last_error = Some(BridgeError::PermissionDenied.to_string());
            }
            LifecycleEvent::InitFailed { message, .. } => {
                self.pending = false;
                self.last_error = Some(message.clone());
            }
            LifecycleEvent::DeviceState { .. } => {}
        }
    }

    fn clear_session(&mut self) {
        self.connected = false;
        self.pending = false;
        self.imu_on = false;
        self.three_d = false;
        self.last_sample = None;
    }
}

/// Bridge consumer that maintains [`HudState`]
pub struct HudAdapter {
    bridge: BridgeHandle,
    state: Arc<Mutex<HudState>>,
    _subscriptions: Vec<Subscription>,
}

impl HudAdapter {
    /// Start following `bridge`
    pub fn attach(bridge: BridgeHandle) -> Self {
        let state = Arc::new(Mutex::new(HudState::default()));

        let samples = state.clone();
        let orientation = bridge.on_orientation(move |sample| {
            lock(&samples).last_sample = Some(*sample);
        });

        let events = state.clone();
        let lifecycle = bridge.on_lifecycle_event(move |event| {
            lock(&events).apply(event);
        });

        Self {
            bridge,
            state,
            _subscriptions: vec![orientation, lifecycle],
        }
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    pub fn snapshot(&self) -> HudState {
        lock(&self.state).clone()
    }

    /// Ask the bridge to connect and report the outcome as-is
    pub async fn connect(&self) -> InitResult {
        let result = self.bridge.initialize().await;
        let flat = InitResult::from(&result);

        let mut state = lock(&self.state);
        state.pending = flat.pending;
        if flat.success {
            state.connected = true;
            state.device_name = flat.device_name.clone();
            state.device_type = flat.device_type;
            state.last_error = None;
        } else if !flat.pending {
            state.last_error = Some(flat.message.clone());
        }
        flat
    }

    pub async fn set_imu_enabled(&self, enabled: bool) -> Result<(), BridgeError> {
        let result = self.bridge.set_imu_enabled(enabled).await;
        self.record(&result, |state| state.imu_on = enabled);
        result
    }

    pub async fn set_3d_enabled(&self, enabled: bool) -> Result<(), BridgeError> {
        let result = self.bridge.set_3d_enabled(enabled).await;
        self.record(&result, |state| state.three_d = enabled);
        result
    }

    pub async fn disconnect(&self) {
        self.bridge.release().await;
        // No event follows when nothing was connected
        lock(&self.state).clear_session();
        debug!("HUD disconnected");
    }

    fn record(&self, result: &Result<(), BridgeError>, on_ok: impl FnOnce(&mut HudState)) {
        let mut state = lock(&self.state);
        match result {
            Ok(()) => on_ok(&mut state),
            Err(e) => state.last_error = Some(e.to_string()),
        }
    }
}

fn lock(state: &Mutex<HudState>) -> MutexGuard<'_, HudState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::facade::spawn_bridge;
    use crate::mock::{MockHost, MockSdk};
    use common::test_utils::{create_imu_block, create_mock_descriptor};
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_state_follows_events() {
        let mut state = HudState::default();
        state.apply(&LifecycleEvent::Connected {
            device_name: "Viture Pro".to_string(),
            device_type: DeviceType::Gen1,
        });
        assert!(state.connected);
        assert_eq!(state.device_type, Some(DeviceType::Gen1));

        state.imu_on = true;
        state.apply(&LifecycleEvent::Disconnected);
        assert!(!state.connected);
        assert!(!state.imu_on);

        state.apply(&LifecycleEvent::InitFailed {
            code: -5,
            message: "Native start failed (status -5)".to_string(),
        });
        assert_eq!(
            state.last_error.as_deref(),
            Some("Native start failed (status -5)")
        );
    }

    #[tokio::test]
    async fn test_adapter_tracks_session() {
        let (host, events) = MockHost::new();
        host.attach(create_mock_descriptor(0x1014, true));
        let (sdk, probe) = MockSdk::new();
        let (bridge, _task) = spawn_bridge(BridgeConfig::default(), host, events, Box::new(sdk));

        let adapter = HudAdapter::attach(bridge);
        let result = adapter.connect().await;
        assert!(result.success);

        adapter.set_imu_enabled(true).await.unwrap();
        probe.emit_imu(&create_imu_block(4.0, 5.0, 6.0, None), 1);
        settle().await;

        let state = adapter.snapshot();
        assert!(state.connected);
        assert!(state.imu_on);
        assert_eq!(state.device_name.as_deref(), Some("Viture Luma"));
        assert_eq!(state.last_sample.map(|s| s.yaw), Some(6.0));

        adapter.disconnect().await;
        let state = adapter.snapshot();
        assert!(!state.connected);
        assert_eq!(state.last_sample, None);
    }

    #[tokio::test]
    async fn test_adapter_passes_errors_through() {
        let (host, events) = MockHost::new();
        let (sdk, _probe) = MockSdk::new();
        let (bridge, _task) = spawn_bridge(BridgeConfig::default(), host, events, Box::new(sdk));

        let adapter = HudAdapter::attach(bridge);
        let result = adapter.connect().await;
        assert!(!result.success);
        assert_eq!(result.code, -1001);

        assert!(adapter.set_imu_enabled(true).await.is_err());
        assert_eq!(
            adapter.snapshot().last_error.as_deref(),
            Some("Glasses not initialized")
        );
    }
}
