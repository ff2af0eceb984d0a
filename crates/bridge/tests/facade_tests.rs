//! Bridge facade integration tests
//!
//! Drives the full stack (enumerator, permission broker, native session,
//! event relay, actor) against the mock USB host and mock SDK.
//!
//! Run with: `cargo test -p bridge --test facade_tests`

use bridge::mock::{MockHost, MockSdk, MockSdkProbe};
use bridge::{
    BridgeConfig, BridgeError, BridgeHandle, BridgeState, Connection, InitResult, Subscription,
    spawn_bridge,
};
use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, create_imu_block, create_mock_descriptor, with_timeout,
};
use proptest::prelude::*;
use protocol::{
    DeviceDescriptor, DeviceType, LifecycleEvent, OrientationOffset, OrientationSample,
    Quaternion,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

struct Harness {
    host: Arc<MockHost>,
    probe: MockSdkProbe,
    bridge: BridgeHandle,
    task: JoinHandle<()>,
    events: Arc<Mutex<Vec<LifecycleEvent>>>,
    _recorder: Subscription,
}

impl Harness {
    fn new(config: BridgeConfig) -> Self {
        let (host, host_events) = MockHost::new();
        let (sdk, probe) = MockSdk::new();
        let (bridge, task) = spawn_bridge(config, host.clone(), host_events, Box::new(sdk));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let recorder = bridge.on_lifecycle_event(move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        Self {
            host,
            probe,
            bridge,
            task,
            events,
            _recorder: recorder,
        }
    }

    /// Harness with one pre-granted Luma attached
    fn with_glasses() -> (Self, DeviceDescriptor) {
        let harness = Self::new(BridgeConfig::default());
        let device = create_mock_descriptor(0x1014, true);
        harness.host.attach(device.clone());
        (harness, device)
    }

    fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }

    fn has_event(&self, wanted: &LifecycleEvent) -> bool {
        self.events().iter().any(|e| e == wanted)
    }

    async fn connect(&self) {
        match self.bridge.initialize().await {
            Ok(Connection::Connected(_)) => {}
            other => panic!("expected connection, got {:?}", other),
        }
    }

    async fn stream_sample(&self, roll: f32, pitch: f32, yaw: f32, timestamp: u64) {
        assert!(
            self.probe
                .emit_imu(&create_imu_block(roll, pitch, yaw, None), timestamp)
        );
        let bridge = self.bridge.clone();
        wait_until(|| {
            let bridge = bridge.clone();
            async move {
                bridge
                    .last_imu_data()
                    .await
                    .is_some_and(|s| s.timestamp == timestamp)
            }
        })
        .await;
    }
}

/// Poll `check` until it returns true
async fn wait_until<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    with_timeout(DEFAULT_TEST_TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn wait_for_state(bridge: &BridgeHandle, state: BridgeState) {
    let mut rx = bridge.watch_state();
    with_timeout(DEFAULT_TEST_TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .expect("bridge stopped");
}

fn connection_events(events: &[LifecycleEvent]) -> Vec<&LifecycleEvent> {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                LifecycleEvent::Connected { .. } | LifecycleEvent::Disconnected
            )
        })
        .collect()
}

// ============================================================================
// Connect
// ============================================================================

#[tokio::test]
async fn test_pre_granted_gen2_connects() {
    let (h, _device) = Harness::with_glasses();

    let result = h.bridge.initialize().await;
    let flat = InitResult::from(&result);
    assert!(flat.success);
    assert_eq!(flat.device_type, Some(DeviceType::Gen2));
    assert_eq!(flat.device_name.as_deref(), Some("Viture Luma"));

    assert!(h.bridge.is_connected());
    assert_eq!(h.host.prompts(), 0);
    assert!(h.has_event(&LifecycleEvent::Connected {
        device_name: "Viture Luma".to_string(),
        device_type: DeviceType::Gen2,
    }));
}

#[tokio::test]
async fn test_no_device_reports_not_found() {
    let h = Harness::new(BridgeConfig::default());

    let result = h.bridge.initialize().await;
    assert_eq!(result, Err(BridgeError::NotFound));
    assert_eq!(InitResult::from(&result).code, -1001);

    assert_eq!(h.bridge.state(), BridgeState::Idle);
    assert!(h.probe.calls().is_empty());
    assert!(h.events().is_empty());
}

#[tokio::test]
async fn test_initialize_is_idempotent_while_connected() {
    let (h, _device) = Harness::with_glasses();

    for _ in 0..5 {
        h.connect().await;
        assert_eq!(h.bridge.state(), BridgeState::Connected);
    }

    assert_eq!(h.probe.creates(), 1);
    assert_eq!(h.host.opened(), 1);
    assert_eq!(connection_events(&h.events()).len(), 1);
}

#[tokio::test]
async fn test_concurrent_initialize_coalesces() {
    let (h, _device) = Harness::with_glasses();
    h.probe.set_create_delay(Duration::from_millis(100));

    let (a, b) = tokio::join!(h.bridge.initialize(), h.bridge.initialize());
    assert_eq!(a, b);
    assert!(matches!(a, Ok(Connection::Connected(_))));
    assert_eq!(h.probe.creates(), 1);
}

#[tokio::test]
async fn test_native_failure_tears_down_and_allows_retry() {
    let (h, _device) = Harness::with_glasses();
    h.probe.set_initialize_status(-23);

    let result = h.bridge.initialize().await;
    match &result {
        Err(BridgeError::Native { code, .. }) => assert_eq!(*code, -23),
        other => panic!("expected native failure, got {:?}", other),
    }
    assert_eq!(h.bridge.state(), BridgeState::Idle);
    assert_eq!(h.probe.live_handles(), 0);
    assert!(
        h.events()
            .iter()
            .any(|e| matches!(e, LifecycleEvent::InitFailed { code: -23, .. }))
    );

    h.probe.set_initialize_status(0);
    h.connect().await;
    assert_eq!(h.probe.creates(), 2);
}

#[tokio::test]
async fn test_late_disconnect_from_failed_attempt_spares_retry() {
    let (h, _device) = Harness::with_glasses();
    h.probe.set_initialize_status(-5);
    h.probe
        .set_state_after_failed_initialize(Duration::from_millis(40), 0, 0);

    assert_eq!(h.bridge.initialize().await.map_err(|e| e.code()), Err(-5));

    // The dead session reports a disconnect while the retry is still creating
    h.probe.set_initialize_status(0);
    h.probe.set_create_delay(Duration::from_millis(150));
    h.connect().await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.bridge.is_connected());
    assert_eq!(h.probe.creates(), 2);
    assert_eq!(h.probe.live_handles(), 1);
    assert!(!h.has_event(&LifecycleEvent::DeviceState {
        state_id: 0,
        value: 0
    }));
}

#[tokio::test]
async fn test_start_failure_destroys_partial_session() {
    let (h, _device) = Harness::with_glasses();
    h.probe.set_start_status(-4);

    let result = h.bridge.initialize().await;
    assert_eq!(result.map_err(|e| e.code()), Err(-4));
    assert_eq!(h.probe.live_handles(), 0);
    assert!(!h.probe.has_callbacks());
    assert!(h.probe.calls().contains(&"shutdown".to_string()));
}

#[tokio::test]
async fn test_unavailable_sdk_fails_without_opening() {
    let (h, _device) = Harness::with_glasses();
    h.probe.set_available(false);

    let result = h.bridge.initialize().await;
    assert_eq!(result.map_err(|e| e.code()), Err(-1006));
    assert_eq!(h.host.opened(), 0);
}

#[tokio::test]
async fn test_open_failure_is_reported() {
    let (h, _device) = Harness::with_glasses();
    h.host
        .fail_open(Some(BridgeError::Host("device busy".to_string())));

    let result = h.bridge.initialize().await;
    assert_eq!(result, Err(BridgeError::Host("device busy".to_string())));
    assert_eq!(h.bridge.state(), BridgeState::Idle);
    assert_eq!(h.probe.creates(), 0);
}

// ============================================================================
// Permission
// ============================================================================

#[tokio::test]
async fn test_permission_pending_then_granted() {
    let h = Harness::new(BridgeConfig::default());
    let device = create_mock_descriptor(0x1011, false);
    h.host.attach(device.clone());

    let result = h.bridge.initialize().await;
    assert_eq!(result, Ok(Connection::Pending));
    let flat = InitResult::from(&result);
    assert!(flat.pending);
    assert!(!flat.success);
    assert_eq!(h.bridge.state(), BridgeState::AwaitingPermission);

    // A second call neither re-prompts nor connects
    assert_eq!(h.bridge.initialize().await, Ok(Connection::Pending));
    assert_eq!(h.host.prompts(), 1);

    h.host.answer_permission(device.key(), true);
    wait_for_state(&h.bridge, BridgeState::Connected).await;

    assert!(h.has_event(&LifecycleEvent::Connected {
        device_name: "Viture One".to_string(),
        device_type: DeviceType::Gen1,
    }));
    assert_eq!(h.probe.creates(), 1);
}

#[tokio::test]
async fn test_permission_denied() {
    let h = Harness::new(BridgeConfig::default());
    let device = create_mock_descriptor(0x1012, false);
    h.host.attach(device.clone());

    assert_eq!(h.bridge.initialize().await, Ok(Connection::Pending));
    h.host.answer_permission(device.key(), false);

    let events = h.events.clone();
    wait_until(|| {
        let events = events.clone();
        async move {
            events
                .lock()
                .unwrap()
                .contains(&LifecycleEvent::PermissionDenied)
        }
    })
    .await;

    assert_eq!(h.bridge.state(), BridgeState::Idle);
    assert_eq!(h.probe.creates(), 0);
}

#[tokio::test]
async fn test_release_while_awaiting_permission_stays_idle() {
    let h = Harness::new(BridgeConfig::default());
    let device = create_mock_descriptor(0x1013, false);
    h.host.attach(device.clone());

    assert_eq!(h.bridge.initialize().await, Ok(Connection::Pending));
    h.bridge.release().await;
    assert_eq!(h.bridge.state(), BridgeState::Idle);

    // The late grant must not bring a session up
    h.host.answer_permission(device.key(), true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(h.bridge.state(), BridgeState::Idle);
    assert_eq!(h.probe.creates(), 0);
    assert!(connection_events(&h.events()).is_empty());
}

#[tokio::test]
async fn test_repeated_release_while_awaiting_permission_reuses_prompt() {
    let h = Harness::new(BridgeConfig::default());
    let device = create_mock_descriptor(0x1016, false);
    h.host.attach(device.clone());

    for _ in 0..5 {
        assert_eq!(h.bridge.initialize().await, Ok(Connection::Pending));
        h.bridge.release().await;
        assert_eq!(h.bridge.state(), BridgeState::Idle);
    }
    assert_eq!(h.host.prompts(), 1);

    // Abandoned waiters are gone; only the live one acts on the answer
    assert_eq!(h.bridge.initialize().await, Ok(Connection::Pending));
    h.host.answer_permission(device.key(), true);
    wait_for_state(&h.bridge, BridgeState::Connected).await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.host.prompts(), 1);
    assert_eq!(h.probe.creates(), 1);
    assert!(!h.has_event(&LifecycleEvent::PermissionDenied));
}

#[tokio::test]
async fn test_initialize_and_wait_follows_grant() {
    let h = Harness::new(BridgeConfig::default());
    let device = create_mock_descriptor(0x1015, false);
    h.host.attach(device.clone());

    let host = h.host.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        host.answer_permission(device.key(), true);
    });

    let result = h.bridge.initialize_and_wait(Duration::from_secs(2)).await;
    match result {
        Ok(Connection::Connected(info)) => assert_eq!(info.product_id, 0x1015),
        other => panic!("expected connection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_initialize_and_wait_times_out_pending() {
    let h = Harness::new(BridgeConfig::default());
    h.host.attach(create_mock_descriptor(0x1015, false));

    let result = h
        .bridge
        .initialize_and_wait(Duration::from_millis(50))
        .await;
    assert_eq!(result, Ok(Connection::Pending));
    assert_eq!(h.bridge.state(), BridgeState::AwaitingPermission);
}

// ============================================================================
// Release
// ============================================================================

async fn assert_released(h: &Harness) {
    let status = h.bridge.status().await.unwrap();
    assert_eq!(status.state, BridgeState::Idle);
    assert!(!status.imu_enabled);
    assert!(!status.three_d_enabled);
    assert_eq!(status.offset, OrientationOffset::ZERO);
    assert_eq!(status.device, None);
    assert!(!h.bridge.is_connected());
}

#[tokio::test]
async fn test_release_from_idle() {
    let h = Harness::new(BridgeConfig::default());
    h.bridge.release().await;
    h.bridge.release().await;
    assert_released(&h).await;
    assert!(h.events().is_empty());
}

#[tokio::test]
async fn test_release_from_connected_clears_everything() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;
    h.bridge.set_imu_enabled(true).await.unwrap();
    h.bridge.set_3d_enabled(true).await.unwrap();
    h.stream_sample(10.0, 20.0, 30.0, 1).await;
    h.bridge.reset_orientation().await.unwrap();

    h.bridge.release().await;

    assert_released(&h).await;
    assert_eq!(h.bridge.last_imu_data().await, None);
    assert_eq!(h.probe.live_handles(), 0);
    assert!(!h.probe.has_callbacks());
    assert!(h.has_event(&LifecycleEvent::Disconnected));

    let calls = h.probe.calls();
    let pos = |name: &str| calls.iter().position(|c| c == name).unwrap();
    assert!(pos("close_imu(0)") < pos("stop"));
    assert!(pos("stop") < pos("shutdown"));
    assert!(pos("shutdown") < pos("destroy"));
}

#[tokio::test]
async fn test_release_while_connecting_supersedes_caller() {
    let (h, _device) = Harness::with_glasses();
    h.probe.set_create_delay(Duration::from_millis(150));

    let bridge = h.bridge.clone();
    let pending = tokio::spawn(async move { bridge.initialize().await });
    wait_for_state(&h.bridge, BridgeState::Connecting).await;

    h.bridge.release().await;
    assert_eq!(pending.await.unwrap(), Err(BridgeError::Superseded));
    assert_released(&h).await;

    // The in-flight attempt finishes later and is destroyed, not adopted
    let probe = h.probe.clone();
    wait_until(|| {
        let probe = probe.clone();
        async move { probe.creates() == 1 && probe.live_handles() == 0 }
    })
    .await;
    assert_eq!(h.bridge.state(), BridgeState::Idle);
    assert!(connection_events(&h.events()).is_empty());
}

#[tokio::test]
async fn test_reconnect_after_superseded_attempt() {
    let (h, _device) = Harness::with_glasses();
    h.probe.set_create_delay(Duration::from_millis(100));

    let bridge = h.bridge.clone();
    let first = tokio::spawn(async move { bridge.initialize().await });
    wait_for_state(&h.bridge, BridgeState::Connecting).await;
    h.bridge.release().await;

    // Queued behind the superseded attempt, then connects normally
    h.connect().await;
    assert_eq!(first.await.unwrap(), Err(BridgeError::Superseded));
    assert_eq!(h.probe.creates(), 2);
    assert_eq!(h.probe.live_handles(), 1);
}

// ============================================================================
// IMU and display
// ============================================================================

#[tokio::test]
async fn test_set_imu_enabled_requires_connection() {
    let h = Harness::new(BridgeConfig::default());

    assert_eq!(
        h.bridge.set_imu_enabled(true).await,
        Err(BridgeError::NotInitialized)
    );
    assert_eq!(
        h.bridge.set_3d_enabled(true).await,
        Err(BridgeError::NotInitialized)
    );
    assert_eq!(
        h.bridge.reset_orientation().await,
        Err(BridgeError::NotInitialized)
    );
    assert!(h.probe.calls().is_empty());
}

#[tokio::test]
async fn test_twenty_byte_block_reaches_application() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;
    h.bridge.set_imu_enabled(true).await.unwrap();

    let received = Arc::new(Mutex::new(Vec::<OrientationSample>::new()));
    let sink = received.clone();
    let _sub = h.bridge.on_orientation(move |s| sink.lock().unwrap().push(*s));

    h.stream_sample(1.5, -2.0, 90.0, 7).await;

    let sample = h.bridge.last_imu_data().await.unwrap();
    assert_eq!(sample.roll, 1.5);
    assert_eq!(sample.pitch, -2.0);
    assert_eq!(sample.yaw, 90.0);
    assert_eq!(sample.quaternion, Quaternion::IDENTITY);
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_imu_disabled_stops_samples_keeps_last() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;

    // Not enabled yet: nothing is relayed
    h.probe.emit_imu(&create_imu_block(9.0, 9.0, 9.0, None), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.bridge.last_imu_data().await, None);

    h.bridge.set_imu_enabled(true).await.unwrap();
    assert!(h.probe.calls().contains(&"open_imu(0,0)".to_string()));
    h.stream_sample(1.0, 2.0, 3.0, 2).await;

    h.bridge.set_imu_enabled(false).await.unwrap();
    h.probe.emit_imu(&create_imu_block(4.0, 5.0, 6.0, None), 3);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let last = h.bridge.last_imu_data().await.unwrap();
    assert_eq!(last.timestamp, 2);
    assert_eq!(last.roll, 1.0);
}

#[tokio::test]
async fn test_imu_open_failure_keeps_flag_off() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;
    h.probe.set_open_imu_status(-9);

    let result = h.bridge.set_imu_enabled(true).await;
    assert_eq!(result.map_err(|e| e.code()), Err(-9));
    assert!(!h.bridge.status().await.unwrap().imu_enabled);
}

#[tokio::test]
async fn test_imu_frequency_from_config() {
    let h = Harness::new(BridgeConfig {
        imu_frequency: protocol::ImuFrequency::Hz240,
        ..Default::default()
    });
    h.host.attach(create_mock_descriptor(0x1016, true));
    h.connect().await;

    h.bridge.set_imu_enabled(true).await.unwrap();
    assert!(h.probe.calls().contains(&"open_imu(0,2)".to_string()));
}

#[tokio::test]
async fn test_3d_without_hardware_call_is_local_flag() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;

    h.bridge.set_3d_enabled(true).await.unwrap();
    assert!(h.bridge.status().await.unwrap().three_d_enabled);
}

#[tokio::test]
async fn test_3d_strict_reports_unsupported() {
    let h = Harness::new(BridgeConfig {
        strict_3d: true,
        ..Default::default()
    });
    h.host.attach(create_mock_descriptor(0x1014, true));
    h.connect().await;

    let result = h.bridge.set_3d_enabled(true).await;
    assert!(matches!(result, Err(BridgeError::Unsupported(_))));
    assert!(!h.bridge.status().await.unwrap().three_d_enabled);

    h.probe.set_3d_supported(true);
    h.bridge.set_3d_enabled(true).await.unwrap();
    assert!(h.bridge.status().await.unwrap().three_d_enabled);
}

#[tokio::test]
async fn test_samples_from_native_thread_stay_ordered() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;
    h.bridge.set_imu_enabled(true).await.unwrap();

    let received = Arc::new(Mutex::new(Vec::<u64>::new()));
    let sink = received.clone();
    let _sub = h
        .bridge
        .on_orientation(move |s| sink.lock().unwrap().push(s.timestamp));

    let blocks = (1..=200)
        .map(|ts| (create_imu_block(ts as f32, 0.0, 0.0, None), ts))
        .collect();
    let delivered = tokio::task::spawn_blocking({
        let probe = h.probe.clone();
        move || probe.emit_imu_from_thread(blocks).join().unwrap()
    })
    .await
    .unwrap();
    assert_eq!(delivered, 200);

    let bridge = h.bridge.clone();
    wait_until(|| {
        let bridge = bridge.clone();
        async move {
            bridge
                .last_imu_data()
                .await
                .is_some_and(|s| s.timestamp == 200)
        }
    })
    .await;

    let received = received.lock().unwrap().clone();
    assert!(!received.is_empty());
    assert!(received.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(received.last(), Some(&200));
}

// ============================================================================
// Orientation offset
// ============================================================================

#[tokio::test]
async fn test_reset_orientation_zeroes_next_sample() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;
    h.bridge.set_imu_enabled(true).await.unwrap();

    h.stream_sample(10.0, -5.0, 45.0, 1).await;
    let offset = h.bridge.reset_orientation().await.unwrap();
    assert_eq!(
        offset,
        OrientationOffset {
            roll: 10.0,
            pitch: -5.0,
            yaw: 45.0
        }
    );

    h.stream_sample(10.0, -5.0, 45.0, 2).await;
    let sample = h.bridge.last_imu_data().await.unwrap();
    assert_eq!((sample.roll, sample.pitch, sample.yaw), (0.0, 0.0, 0.0));
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-2
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_offset_is_cumulative_sum_of_resets(
        resets in prop::collection::vec((-180.0f32..180.0, -90.0f32..90.0, -180.0f32..180.0), 1..5),
        last in (-180.0f32..180.0, -90.0f32..90.0, -180.0f32..180.0),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (reported, expected) = runtime.block_on(async {
            let (h, _device) = Harness::with_glasses();
            h.connect().await;
            h.bridge.set_imu_enabled(true).await.unwrap();

            let mut captured = (0.0f32, 0.0f32, 0.0f32);
            let mut ts = 0;
            for (roll, pitch, yaw) in &resets {
                ts += 1;
                h.stream_sample(*roll, *pitch, *yaw, ts).await;
                let seen = h.bridge.last_imu_data().await.unwrap();
                h.bridge.reset_orientation().await.unwrap();
                captured.0 += seen.roll;
                captured.1 += seen.pitch;
                captured.2 += seen.yaw;
            }

            h.stream_sample(last.0, last.1, last.2, ts + 1).await;
            let reported = h.bridge.last_imu_data().await.unwrap();
            h.bridge.shutdown().await;
            (
                reported,
                (last.0 - captured.0, last.1 - captured.1, last.2 - captured.2),
            )
        });

        prop_assert!(close(reported.roll, expected.0));
        prop_assert!(close(reported.pitch, expected.1));
        prop_assert!(close(reported.yaw, expected.2));
    }
}

// ============================================================================
// Disconnects
// ============================================================================

#[tokio::test]
async fn test_usb_detach_while_streaming() {
    let (h, device) = Harness::with_glasses();
    h.connect().await;
    h.bridge.set_imu_enabled(true).await.unwrap();
    h.stream_sample(1.0, 2.0, 3.0, 1).await;

    h.host.detach(device.key());
    wait_for_state(&h.bridge, BridgeState::Idle).await;

    assert!(h.has_event(&LifecycleEvent::Disconnected));
    assert_eq!(h.bridge.last_imu_data().await, None);
    assert_eq!(h.probe.live_handles(), 0);
    assert_released(&h).await;
}

#[tokio::test]
async fn test_usb_detach_while_connecting() {
    let (h, device) = Harness::with_glasses();
    h.probe.set_create_delay(Duration::from_millis(150));

    let bridge = h.bridge.clone();
    let pending = tokio::spawn(async move { bridge.initialize().await });
    wait_for_state(&h.bridge, BridgeState::Connecting).await;

    h.host.detach(device.key());
    assert_eq!(pending.await.unwrap(), Err(BridgeError::Superseded));
    assert_eq!(h.bridge.state(), BridgeState::Idle);

    let probe = h.probe.clone();
    wait_until(|| {
        let probe = probe.clone();
        async move { probe.creates() == 1 && probe.live_handles() == 0 }
    })
    .await;
    assert_eq!(h.bridge.state(), BridgeState::Idle);
    assert!(connection_events(&h.events()).is_empty());
}

#[tokio::test]
async fn test_foreign_detach_is_ignored() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;

    let mouse = common::test_utils::create_foreign_descriptor(0x046d, 0xc52b);
    h.host.attach(mouse.clone());
    h.host.detach(mouse.key());
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(h.bridge.is_connected());
}

#[tokio::test]
async fn test_glasses_state_disconnect_tears_down() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;

    assert!(h.probe.emit_state(0, 0));
    wait_for_state(&h.bridge, BridgeState::Idle).await;

    let events = h.events();
    let state_at = events
        .iter()
        .position(|e| *e == LifecycleEvent::DeviceState { state_id: 0, value: 0 })
        .unwrap();
    let disconnect_at = events
        .iter()
        .position(|e| *e == LifecycleEvent::Disconnected)
        .unwrap();
    assert!(state_at < disconnect_at);
    assert_eq!(h.probe.live_handles(), 0);
}

#[tokio::test]
async fn test_other_state_changes_are_forwarded() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;

    assert!(h.probe.emit_state(3, 1));
    let events = h.events.clone();
    wait_until(|| {
        let events = events.clone();
        async move {
            events
                .lock()
                .unwrap()
                .contains(&LifecycleEvent::DeviceState { state_id: 3, value: 1 })
        }
    })
    .await;
    assert!(h.bridge.is_connected());
}

#[tokio::test]
async fn test_lifecycle_order_across_sessions() {
    let (h, device) = Harness::with_glasses();

    for _ in 0..3 {
        h.connect().await;
        h.host.detach(device.key());
        wait_for_state(&h.bridge, BridgeState::Idle).await;
        h.host.attach(device.clone());
    }
    h.connect().await;
    h.bridge.release().await;

    let events = h.events();
    let sequence = connection_events(&events);
    assert_eq!(sequence.len(), 8);
    for (i, event) in sequence.iter().enumerate() {
        if i % 2 == 0 {
            assert!(matches!(event, LifecycleEvent::Connected { .. }));
        } else {
            assert_eq!(**event, LifecycleEvent::Disconnected);
        }
    }
}

// ============================================================================
// Subscriptions and shutdown
// ============================================================================

#[tokio::test]
async fn test_unsubscribe_leaves_other_subscribers() {
    let (h, _device) = Harness::with_glasses();

    let first = Arc::new(Mutex::new(0));
    let second = Arc::new(Mutex::new(0));
    let f = first.clone();
    let s = second.clone();
    let sub_a = h.bridge.on_lifecycle_event(move |_| *f.lock().unwrap() += 1);
    let _sub_b = h.bridge.on_lifecycle_event(move |_| *s.lock().unwrap() += 1);

    h.connect().await;
    sub_a.unsubscribe();
    h.bridge.release().await;

    assert_eq!(*first.lock().unwrap(), 1);
    assert_eq!(*second.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_shutdown_stops_actor() {
    let (h, _device) = Harness::with_glasses();
    h.connect().await;

    h.bridge.shutdown().await;
    with_timeout(DEFAULT_TEST_TIMEOUT, h.task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.probe.live_handles(), 0);
    assert_eq!(h.bridge.initialize().await, Err(BridgeError::Shutdown));
    assert!(!h.bridge.is_connected());
}
