//! Relay channel between the native callback thread and the async runtime
//!
//! The SDK invokes callbacks on a thread the application does not own. The
//! sending half is safe to use from that thread and never blocks:
//!
//! - orientation samples go through a bounded queue where the newest sample
//!   displaces the oldest when the consumer falls behind (lossy, in order)
//! - state changes go through an unbounded queue and are never dropped
//!
//! Every message carries the session generation that produced it so the
//! consumer can discard late callbacks from a session it already tore down.

use async_channel::{Receiver, Sender, bounded, unbounded};
use protocol::OrientationSample;

/// Default number of orientation samples buffered before the oldest is dropped
pub const DEFAULT_ORIENTATION_CAPACITY: usize = 8;

/// Orientation sample tagged with its session generation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayedSample {
    pub session: u64,
    pub sample: OrientationSample,
}

/// Native state change tagged with its session generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayedState {
    pub session: u64,
    pub state_id: i32,
    pub value: i32,
}

/// Handle for the native callback thread (non-blocking)
#[derive(Clone)]
pub struct RelaySender {
    sample_tx: Sender<RelayedSample>,
    state_tx: Sender<RelayedState>,
}

impl RelaySender {
    /// Enqueue a sample without blocking
    ///
    /// Returns `Ok(true)` when an older sample was displaced to make room.
    pub fn send_sample(&self, sample: RelayedSample) -> crate::Result<bool> {
        self.sample_tx
            .force_send(sample)
            .map(|displaced| displaced.is_some())
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Enqueue a state change; fails only once the receiver is gone
    pub fn send_state(&self, state: RelayedState) -> crate::Result<()> {
        self.state_tx
            .try_send(state)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.sample_tx.is_closed() || self.state_tx.is_closed()
    }
}

/// Handle for the async consumer
pub struct RelayReceiver {
    sample_rx: Receiver<RelayedSample>,
    state_rx: Receiver<RelayedState>,
}

impl RelayReceiver {
    /// Receive the next orientation sample
    pub async fn recv_sample(&self) -> crate::Result<RelayedSample> {
        self.sample_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive the next state change
    pub async fn recv_state(&self) -> crate::Result<RelayedState> {
        self.state_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take a queued sample without waiting
    pub fn try_recv_sample(&self) -> Option<RelayedSample> {
        self.sample_rx.try_recv().ok()
    }

    /// Take a queued state change without waiting
    pub fn try_recv_state(&self) -> Option<RelayedState> {
        self.state_rx.try_recv().ok()
    }

    /// Number of samples currently buffered
    pub fn pending_samples(&self) -> usize {
        self.sample_rx.len()
    }

    /// Close both queues; further sends from the native side fail
    pub fn close(&self) {
        self.sample_rx.close();
        self.state_rx.close();
    }
}

/// Create the relay channel
///
/// Returns (RelaySender for the native thread, RelayReceiver for the runtime).
/// A capacity of zero is treated as one.
pub fn create_relay_channel(orientation_capacity: usize) -> (RelaySender, RelayReceiver) {
    let (sample_tx, sample_rx) = bounded(orientation_capacity.max(1));
    let (state_tx, state_rx) = unbounded();

    (
        RelaySender {
            sample_tx,
            state_tx,
        },
        RelayReceiver {
            sample_rx,
            state_rx,
        },
    )
}
