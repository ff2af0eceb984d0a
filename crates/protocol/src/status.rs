//! Signed status codes
//!
//! The native SDK reports `0` for success and a negative value for a specific
//! hardware or driver failure. Those values are opaque here and are surfaced
//! verbatim. The bridge reserves the `-1000` range for its own failures.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);

    /// `initialize()` is waiting for the user to answer a permission prompt
    pub const PENDING: Status = Status(1);

    /// Generic failure from a native call that carries no code of its own
    pub const NATIVE_FAILURE: Status = Status(-1);

    /// No matching USB device is attached
    pub const NOT_FOUND: Status = Status(-1001);
    /// The user declined USB access
    pub const PERMISSION_DENIED: Status = Status(-1002);
    /// Operation requires a connected session
    pub const NOT_INITIALIZED: Status = Status(-1003);
    /// Call made out of order for the session state machine
    pub const INVALID_STATE: Status = Status(-1004);
    /// Session handle was already destroyed
    pub const DESTROYED: Status = Status(-1005);
    /// Native library is not available in this process
    pub const SDK_UNAVAILABLE: Status = Status(-1006);
    /// Native session could not be allocated
    pub const CREATE_FAILED: Status = Status(-1007);
    /// Hardware does not support the requested feature
    pub const UNSUPPORTED: Status = Status(-1008);
    /// A release or detach overtook the request
    pub const SUPERSEDED: Status = Status(-1009);
    /// The USB host layer failed (open, enumerate)
    pub const HOST_FAILURE: Status = Status(-1010);
    /// The bridge is shutting down
    pub const SHUTDOWN: Status = Status(-1011);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn is_err(self) -> bool {
        self.0 < 0
    }

    pub fn code(self) -> i32 {
        self.0
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
