//! libusb-backed USB host
//!
//! Desktop Linux bring-up host built on rusb. There is no permission prompt
//! on Linux: access is decided by the usbfs node's file mode, so permission
//! requests are answered immediately with the result of an access check.
//!
//! Hot-plug notifications are filtered to the glasses vendor ID and pumped
//! by a dedicated thread running `libusb_handle_events`.

use crate::error::BridgeError;
use crate::usb::{HostEvent, UsbHost};
use async_channel::Sender;
use nix::unistd::{AccessFlags, access};
use protocol::{DeviceDescriptor, DeviceKey, PermissionState, VITURE_VENDOR_ID, lookup_product};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::fs::OpenOptions;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default usbfs mount point
const USBFS_ROOT: &str = "/dev/bus/usb";

/// Timeout for one `handle_events` pass on the hot-plug thread
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// USB host backed by libusb
pub struct RusbHost {
    /// USB context for device operations
    context: Context,
    /// Where usbfs device nodes live
    usbfs_root: PathBuf,
    /// Sender for hot-plug and permission notifications
    events: Sender<HostEvent>,
    /// Hot-plug registration, kept alive while the host runs
    hotplug: Mutex<Option<Registration<Context>>>,
    /// Cleared to stop the hot-plug thread
    running: Arc<AtomicBool>,
}

impl RusbHost {
    /// Create a new host
    pub fn new(events: Sender<HostEvent>) -> Result<Self, rusb::Error> {
        Self::with_usbfs_root(events, PathBuf::from(USBFS_ROOT))
    }

    /// Create a host that looks for device nodes under `usbfs_root`
    pub fn with_usbfs_root(
        events: Sender<HostEvent>,
        usbfs_root: PathBuf,
    ) -> Result<Self, rusb::Error> {
        let context = Context::new()?;

        Ok(Self {
            context,
            usbfs_root,
            events,
            hotplug: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Register hot-plug callbacks and start the event thread
    ///
    /// Returns `Ok(None)` when libusb was built without hot-plug support.
    pub fn start_hotplug(&self) -> Result<Option<JoinHandle<()>>, rusb::Error> {
        if !rusb::has_hotplug() {
            warn!("libusb has no hot-plug support; detach events will not be reported");
            return Ok(None);
        }

        let callback = HotplugCallback {
            events: self.events.clone(),
        };
        let registration = HotplugBuilder::new()
            .vendor_id(VITURE_VENDOR_ID)
            .enumerate(false)
            .register(&self.context, Box::new(callback))?;

        *self.hotplug.lock().unwrap_or_else(|e| e.into_inner()) = Some(registration);
        self.running.store(true, Ordering::SeqCst);

        let context = self.context.clone();
        let running = self.running.clone();
        let handle = std::thread::Builder::new()
            .name("usb-hotplug".to_string())
            .spawn(move || run_event_loop(context, running))
            .map_err(|e| {
                error!("Failed to spawn hot-plug thread: {}", e);
                rusb::Error::Other
            })?;

        debug!("Hot-plug callbacks registered for vendor {:04x}", VITURE_VENDOR_ID);
        Ok(Some(handle))
    }

    /// Stop the hot-plug thread and drop the registration
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.hotplug
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    /// usbfs node for a bus location, e.g. `/dev/bus/usb/001/004`
    fn node_path(&self, bus: u8, address: u8) -> PathBuf {
        usbfs_node(&self.usbfs_root, bus, address)
    }

    fn describe(&self, device: &Device<Context>) -> Result<DeviceDescriptor, rusb::Error> {
        let desc = device.device_descriptor()?;
        let key = DeviceKey {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            bus_number: device.bus_number(),
            device_address: device.address(),
        };
        let permission = if self.has_permission(&key) {
            PermissionState::Granted
        } else {
            PermissionState::NotGranted
        };

        // Reading the product string needs the device open; only bother for glasses
        let table_name = lookup_product(key.vendor_id, key.product_id).map(|p| p.name);
        let product_string = if table_name.is_some() && permission == PermissionState::Granted {
            device.open().ok().and_then(|handle| {
                desc.product_string_index()
                    .and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
            })
        } else {
            None
        };

        let product_name = product_string
            .or_else(|| table_name.map(str::to_string))
            .unwrap_or_else(|| format!("USB device {:04x}:{:04x}", key.vendor_id, key.product_id));

        Ok(DeviceDescriptor {
            vendor_id: key.vendor_id,
            product_id: key.product_id,
            product_name,
            bus_number: key.bus_number,
            device_address: key.device_address,
            permission,
        })
    }

    fn send_event(&self, event: HostEvent) {
        if let Err(e) = self.events.try_send(event) {
            error!("Failed to send host event: {}", e);
        }
    }
}

impl UsbHost for RusbHost {
    fn attached_devices(&self) -> Result<Vec<DeviceDescriptor>, BridgeError> {
        let devices = self.context.devices()?;
        let mut found = Vec::with_capacity(devices.len());

        for device in devices.iter() {
            match self.describe(&device) {
                Ok(descriptor) => found.push(descriptor),
                Err(e) => warn!(
                    "Failed to read descriptor (bus={}, addr={}): {}",
                    device.bus_number(),
                    device.address(),
                    e
                ),
            }
        }

        Ok(found)
    }

    fn has_permission(&self, device: &DeviceKey) -> bool {
        let path = self.node_path(device.bus_number, device.device_address);
        access(&path, AccessFlags::R_OK | AccessFlags::W_OK).is_ok()
    }

    fn request_permission(&self, device: &DeviceDescriptor) -> Result<(), BridgeError> {
        let key = device.key();
        let granted = self.has_permission(&key);
        if !granted {
            info!(
                "No access to {} (check udev rules for {:04x}:{:04x})",
                self.node_path(key.bus_number, key.device_address).display(),
                key.vendor_id,
                key.product_id
            );
        }
        self.send_event(HostEvent::PermissionResult {
            device: key,
            granted,
        });
        Ok(())
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<OwnedFd, BridgeError> {
        let path = self.node_path(device.bus_number, device.device_address);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!("Opened {} for {}", path.display(), device.product_name);
        Ok(OwnedFd::from(file))
    }
}

impl Drop for RusbHost {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Path of the usbfs node for a bus location
pub fn usbfs_node(root: &Path, bus: u8, address: u8) -> PathBuf {
    root.join(format!("{:03}", bus)).join(format!("{:03}", address))
}

/// Pump libusb events until `running` is cleared
fn run_event_loop(context: Context, running: Arc<AtomicBool>) {
    info!("USB hot-plug thread started");

    while running.load(Ordering::SeqCst) {
        match context.handle_events(Some(EVENT_POLL_INTERVAL)) {
            Ok(()) => {}
            Err(rusb::Error::Interrupted) => {
                debug!("USB event handling interrupted");
            }
            Err(e) => {
                warn!("Error handling USB events: {}", e);
                std::thread::sleep(EVENT_POLL_INTERVAL);
            }
        }
    }

    info!("USB hot-plug thread stopped");
}

/// Hot-plug callback handler
///
/// Runs on the hot-plug thread; forwards arrivals and removals as host events.
struct HotplugCallback {
    events: Sender<HostEvent>,
}

impl HotplugCallback {
    fn key<T: UsbContext>(device: &Device<T>) -> Option<DeviceKey> {
        // libusb caches descriptors, so this also works for departed devices
        let desc = device.device_descriptor().ok()?;
        Some(DeviceKey {
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            bus_number: device.bus_number(),
            device_address: device.address(),
        })
    }

    fn send(&self, event: HostEvent) {
        if let Err(e) = self.events.try_send(event) {
            error!("Failed to send hot-plug event: {}", e);
        }
    }
}

impl<T: UsbContext> Hotplug<T> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<T>) {
        let Some(key) = Self::key(&device) else {
            debug!(
                "Hot-plug: unreadable device arrived (bus={}, addr={})",
                device.bus_number(),
                device.address()
            );
            return;
        };

        debug!(
            "Hot-plug: device arrived {:04x}:{:04x} (bus={}, addr={})",
            key.vendor_id, key.product_id, key.bus_number, key.device_address
        );

        let product_name = lookup_product(key.vendor_id, key.product_id)
            .map(|p| p.name.to_string())
            .unwrap_or_else(|| format!("USB device {:04x}:{:04x}", key.vendor_id, key.product_id));

        // Permission is re-checked by the enumerator on the next scan
        self.send(HostEvent::Attached(DeviceDescriptor {
            vendor_id: key.vendor_id,
            product_id: key.product_id,
            product_name,
            bus_number: key.bus_number,
            device_address: key.device_address,
            permission: PermissionState::NotGranted,
        }));
    }

    fn device_left(&mut self, device: Device<T>) {
        match Self::key(&device) {
            Some(key) => {
                debug!(
                    "Hot-plug: device left {:04x}:{:04x} (bus={}, addr={})",
                    key.vendor_id, key.product_id, key.bus_number, key.device_address
                );
                self.send(HostEvent::Detached(key));
            }
            None => {
                // Registration is vendor-filtered, so assume it was ours
                self.send(HostEvent::Detached(DeviceKey {
                    vendor_id: VITURE_VENDOR_ID,
                    product_id: 0,
                    bus_number: device.bus_number(),
                    device_address: device.address(),
                }));
            }
        }
    }
}
