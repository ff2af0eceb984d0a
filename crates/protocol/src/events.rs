//! Lifecycle events published by the bridge

use crate::types::DeviceType;
use serde::{Deserialize, Serialize};

/// Asynchronous notification of a connection state change
///
/// Events for one session are delivered in the order they occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A session is up and streaming is possible
    Connected {
        device_name: String,
        device_type: DeviceType,
    },

    /// The session ended (release, USB detach or hardware disconnect)
    Disconnected,

    /// The user declined the USB access prompt
    PermissionDenied,

    /// Session setup failed after permission was granted
    InitFailed { code: i32, message: String },

    /// Raw state change reported by the glasses
    DeviceState { state_id: i32, value: i32 },
}

impl LifecycleEvent {
    /// True for events that end (or prevent) a session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Disconnected
                | LifecycleEvent::PermissionDenied
                | LifecycleEvent::InitFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let event = LifecycleEvent::Connected {
            device_name: "Viture Luma".to_string(),
            device_type: DeviceType::Gen2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event":"connected","device_name":"Viture Luma","device_type":"GEN2"}"#
        );

        let json = serde_json::to_string(&LifecycleEvent::Disconnected).unwrap();
        assert_eq!(json, r#"{"event":"disconnected"}"#);
    }

    #[test]
    fn test_terminal_events() {
        assert!(LifecycleEvent::Disconnected.is_terminal());
        assert!(LifecycleEvent::PermissionDenied.is_terminal());
        assert!(
            LifecycleEvent::InitFailed {
                code: -3,
                message: "bad firmware".to_string()
            }
            .is_terminal()
        );
        assert!(
            !LifecycleEvent::DeviceState {
                state_id: 4,
                value: 1
            }
            .is_terminal()
        );
    }
}
