//! Common utilities for the XR HUD bridge
//!
//! This crate provides the pieces shared by the bridge library and the CLI:
//! error handling, logging setup, and the relay channel that carries native
//! callbacks from the SDK's own thread into the async runtime.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    DEFAULT_ORIENTATION_CAPACITY, RelayReceiver, RelaySender, RelayedSample, RelayedState,
    create_relay_channel,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
