//! Device bridge for USB-attached XR glasses
//!
//! The bridge discovers supported glasses on the USB bus, obtains OS access,
//! drives a native SDK session over the device's file descriptor, and relays
//! orientation samples and state changes from the SDK's own thread into the
//! async runtime.
//!
//! The application depends on [`BridgeHandle`] only. Everything behind it runs
//! in a single actor task that owns the one native session:
//!
//! ```text
//! UsbHost ──► DeviceEnumerator ──► PermissionBroker ──► NativeSession
//!                                                           │ (SDK thread)
//!                                                      EventRelay
//!                                                           │ relay channel
//! BridgeHandle ◄── commands / subscriptions ──► BridgeActor ◄┘
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod facade;
pub mod mock;
pub mod native;
pub mod permission;
pub mod relay;
pub mod subscribers;
pub mod usb;

pub use adapter::{HudAdapter, HudState};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use facade::{
    BridgeHandle, BridgeState, BridgeStatus, Connection, InitResult, SessionInfo, spawn_bridge,
};
pub use native::{
    NativeCallbacks, NativeSdk, NativeSession, SessionState, default_sdk, hardware_bridge_available,
};
pub use permission::{AccessDecision, PermissionBroker};
pub use relay::EventRelay;
pub use subscribers::{Subscribers, Subscription};
pub use usb::{DeviceEnumerator, HostEvent, RusbHost, UsbHost};
