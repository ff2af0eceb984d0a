//! Messages handled by the bridge actor

use super::{BridgeStatus, Connection, SessionInfo};
use crate::error::BridgeError;
use crate::native::{NativeSdk, NativeSession};
use crate::permission::AccessDecision;
use protocol::{DeviceDescriptor, OrientationOffset, OrientationSample};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::oneshot;

pub(crate) type Responder<T> = oneshot::Sender<T>;

/// Commands from [`BridgeHandle`](super::BridgeHandle) to the actor
#[derive(Debug)]
pub(crate) enum BridgeCommand {
    /// Discover, obtain access and connect
    Initialize {
        response: Responder<Result<Connection, BridgeError>>,
    },

    /// Tear down whatever is in progress and return to idle
    Release { response: Responder<()> },

    SetImuEnabled {
        enabled: bool,
        response: Responder<Result<(), BridgeError>>,
    },

    Set3dEnabled {
        enabled: bool,
        response: Responder<Result<(), BridgeError>>,
    },

    /// Most recent sample with the offset applied
    LastImuData {
        response: Responder<Option<OrientationSample>>,
    },

    /// Recenter on the most recent sample
    ResetOrientation {
        response: Responder<Result<OrientationOffset, BridgeError>>,
    },

    Status { response: Responder<BridgeStatus> },

    /// Release and stop the actor
    Shutdown { response: Responder<()> },
}

/// Result of one blocking connect attempt
pub(crate) enum Attempt {
    Connected(NativeSession, SessionInfo),
    /// The SDK comes back so the next attempt can use it
    Failed(Box<dyn NativeSdk>, BridgeError),
}

/// Completions posted back to the actor by tasks it spawned
pub(crate) enum Internal {
    PermissionResolved {
        generation: u64,
        descriptor: DeviceDescriptor,
        decision: AccessDecision,
    },
    ConnectFinished {
        generation: u64,
        attempt: Attempt,
        imu_active: Arc<AtomicBool>,
    },
}
