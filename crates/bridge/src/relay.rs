//! Event relay
//!
//! Receives callbacks on the native SDK's thread and forwards them to the
//! bridge actor through the relay channel. Nothing here blocks or touches
//! application state: orientation samples are decoded and queued
//! most-recent-wins, state changes are queued unconditionally.

use crate::native::NativeCallbacks;
use common::{RelaySender, RelayedSample, RelayedState};
use protocol::decode_imu_block;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, trace};

/// Callback target for one native session
pub struct EventRelay {
    /// Generation of the session this relay was registered for
    session: u64,
    sender: RelaySender,
    /// Set while the application has the IMU stream enabled
    imu_active: Arc<AtomicBool>,
    last_timestamp: AtomicU64,
    dropped: AtomicU64,
}

impl EventRelay {
    pub fn new(session: u64, sender: RelaySender, imu_active: Arc<AtomicBool>) -> Self {
        Self {
            session,
            sender,
            imu_active,
            last_timestamp: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    /// Samples discarded so far (malformed, out of order or displaced)
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Handle one raw IMU block
    ///
    /// Ignored while the IMU is disabled. Malformed blocks and samples older
    /// than the last one forwarded are dropped, never surfaced as errors.
    pub fn on_orientation(&self, raw: &[u8], timestamp: u64) {
        if !self.imu_active.load(Ordering::Acquire) {
            return;
        }

        let sample = match decode_imu_block(raw, timestamp) {
            Ok(sample) => sample,
            Err(e) => {
                debug!("Dropping IMU block: {}", e);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let previous = self.last_timestamp.fetch_max(timestamp, Ordering::AcqRel);
        if timestamp < previous {
            trace!("Dropping out-of-order sample {} < {}", timestamp, previous);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        match self.sender.send_sample(RelayedSample {
            session: self.session,
            sample,
        }) {
            Ok(true) => {
                trace!("Consumer behind, oldest sample displaced");
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {}
            Err(_) => trace!("Relay closed, sample dropped"),
        }
    }

    /// Handle a glasses state change; never dropped while the relay is open
    pub fn on_state_change(&self, state_id: i32, value: i32) {
        debug!("Native state change: id={} value={}", state_id, value);
        if let Err(e) = self.sender.send_state(RelayedState {
            session: self.session,
            state_id,
            value,
        }) {
            debug!("Relay closed, state change dropped: {}", e);
        }
    }
}

impl NativeCallbacks for EventRelay {
    fn on_imu(&self, block: &[u8], timestamp: u64) {
        if catch_unwind(AssertUnwindSafe(|| self.on_orientation(block, timestamp))).is_err() {
            error!("Panic while relaying IMU sample");
        }
    }

    fn on_state(&self, state_id: i32, value: i32) {
        if catch_unwind(AssertUnwindSafe(|| self.on_state_change(state_id, value))).is_err() {
            error!("Panic while relaying state change");
        }
    }
}
