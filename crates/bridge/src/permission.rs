//! USB permission broker
//!
//! Turns the platform's prompt-and-broadcast permission flow into a future.
//! Each device has at most one outstanding prompt: concurrent requests for the
//! same device join the existing one, and the registration is removed the
//! moment the answer arrives so every waiter resolves exactly once.

use crate::error::BridgeError;
use crate::usb::UsbHost;
use protocol::{DeviceDescriptor, DeviceKey};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Outcome of a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied,
}

/// Requests OS-level USB access and resolves when the user answers
///
/// The broker never times out on its own; callers bound the wait.
pub struct PermissionBroker {
    host: Arc<dyn UsbHost>,
    /// Outstanding prompts: device -> waiters
    pending: Mutex<HashMap<DeviceKey, Vec<oneshot::Sender<AccessDecision>>>>,
}

impl PermissionBroker {
    pub fn new(host: Arc<dyn UsbHost>) -> Self {
        Self {
            host,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Request access to `device`
    ///
    /// Resolves immediately when access was already granted. Otherwise a
    /// prompt is shown, unless one is already open for this device. If the
    /// broker is dropped before an answer arrives the request resolves as
    /// denied.
    pub fn request_access(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<impl Future<Output = AccessDecision> + Send + use<>, BridgeError> {
        let key = device.key();
        let (tx, rx) = oneshot::channel();

        if self.host.has_permission(&key) {
            debug!("Permission already granted for {}", device.product_name);
            let _ = tx.send(AccessDecision::Granted);
        } else {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.entry(key) {
                Entry::Occupied(mut entry) => {
                    debug!(
                        "Permission prompt already open for {}, joining it",
                        device.product_name
                    );
                    entry.get_mut().push(tx);
                }
                Entry::Vacant(entry) => {
                    entry.insert(vec![tx]);
                    if let Err(e) = self.host.request_permission(device) {
                        warn!("Failed to show permission prompt: {}", e);
                        pending.remove(&key);
                        return Err(e);
                    }
                    info!("Requested USB permission for {}", device.product_name);
                }
            }
        }

        Ok(async move { rx.await.unwrap_or(AccessDecision::Denied) })
    }

    /// Deliver the user's answer for `device`
    ///
    /// Returns the number of waiters resolved. Answers with no outstanding
    /// request are ignored.
    pub fn resolve(&self, device: &DeviceKey, granted: bool) -> usize {
        let waiters = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(device);

        let Some(waiters) = waiters else {
            debug!(
                "Ignoring permission answer for {:04x}:{:04x} with no pending request",
                device.vendor_id, device.product_id
            );
            return 0;
        };

        let decision = if granted {
            AccessDecision::Granted
        } else {
            AccessDecision::Denied
        };
        info!(
            "USB permission {:?} for {:04x}:{:04x} ({} waiter(s))",
            decision,
            device.vendor_id,
            device.product_id,
            waiters.len()
        );

        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(decision);
        }
        count
    }

    /// Drop every waiter for `device`, resolving them as denied
    ///
    /// The prompt itself stays registered: a later request joins it instead
    /// of showing a second one, and the user's answer still clears it.
    pub fn cancel(&self, device: &DeviceKey) -> usize {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match pending.get_mut(device) {
            Some(waiters) => {
                let count = waiters.len();
                waiters.clear();
                debug!(
                    "Cancelled {} permission waiter(s) for {:04x}:{:04x}",
                    count, device.vendor_id, device.product_id
                );
                count
            }
            None => 0,
        }
    }

    /// Number of devices with an open prompt
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of callers waiting on the prompt for `device`
    pub fn waiters(&self, device: &DeviceKey) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(device)
            .map_or(0, Vec::len)
    }
}
