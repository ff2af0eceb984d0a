//! xr-bridge CLI
//!
//! Desktop bring-up tool for USB-attached XR glasses. Lists matching devices,
//! reports whether the vendor SDK is usable, and connects to stream orientation
//! and lifecycle events to stdout as JSON lines.

mod config;

use anyhow::{Context, Result, anyhow};
use bridge::{
    BridgeHandle, Connection, DeviceEnumerator, HostEvent, InitResult, RusbHost,
    default_sdk, hardware_bridge_available, spawn_bridge,
};
use clap::Parser;
use common::setup_logging;
use config::CliConfig;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "xr-bridge")]
#[command(
    author,
    version,
    about = "XR glasses bridge - connect to USB glasses and stream head orientation"
)]
#[command(long_about = "
Connects to supported XR glasses over USB through the vendor SDK and
prints orientation samples and connection events as JSON lines.

EXAMPLES:
    # Connect and print lifecycle events until Ctrl-C
    xr-bridge

    # Stream IMU samples for 10 seconds
    xr-bridge --imu --duration 10

    # List attached glasses without connecting
    xr-bridge --list-devices

    # Check whether this build can drive real hardware
    xr-bridge --probe

    # Run with debug logging
    xr-bridge --log-level debug

CONFIGURATION:
    The CLI looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/xr-bridge/config.toml
    3. /etc/xr-bridge/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List supported glasses and exit
    #[arg(long)]
    list_devices: bool,

    /// Report SDK availability and exit
    #[arg(long)]
    probe: bool,

    /// Enable the IMU stream after connecting
    #[arg(long)]
    imu: bool,

    /// Switch the display to 3D after connecting
    #[arg(long = "3d")]
    three_d: bool,

    /// Disconnect after this many seconds
    #[arg(short, long, value_name = "SECS")]
    duration: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = CliConfig::default();
        let path = CliConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        CliConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        CliConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("xr-bridge v{}", env!("CARGO_PKG_VERSION"));

    if args.probe {
        return probe_mode();
    }

    let (event_tx, event_rx) = async_channel::unbounded::<HostEvent>();
    let host = Arc::new(
        RusbHost::with_usbfs_root(event_tx, config.usb.usbfs_root())
            .context("Failed to initialize libusb")?,
    );

    if args.list_devices {
        return list_devices_mode(host);
    }

    let hotplug = host
        .start_hotplug()
        .context("Failed to register hot-plug callbacks")?;

    let (bridge, task) = spawn_bridge(config.bridge.clone(), host.clone(), event_rx, default_sdk());
    let result = run_session(&bridge, &args, &config).await;

    info!("Shutting down bridge...");
    bridge.shutdown().await;
    if let Err(e) = task.await {
        error!("Bridge task failed: {}", e);
    }

    host.stop();
    if let Some(handle) = hotplug
        && let Err(e) = handle.join()
    {
        error!("Hot-plug thread panicked: {:?}", e);
    }

    result
}

/// Print the capability probe and exit
fn probe_mode() -> Result<()> {
    let sdk = default_sdk();
    print_json(&json!({
        "hardware_bridge_available": hardware_bridge_available(),
        "sdk_available": sdk.is_available(),
    }));
    Ok(())
}

/// List supported glasses and exit
fn list_devices_mode(host: Arc<RusbHost>) -> Result<()> {
    let enumerator = DeviceEnumerator::new(host);
    let devices = enumerator
        .find_all()
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No supported glasses found.");
        return Ok(());
    }

    println!("Found {} device(s):\n", devices.len());
    for device in devices {
        println!(
            "  {:04x}:{:04x} - {} ({:?})",
            device.vendor_id,
            device.product_id,
            device.product_name,
            device.device_type()
        );
        println!(
            "      Bus {:03} Device {:03} Access: {:?}",
            device.bus_number, device.device_address, device.permission
        );
        println!();
    }
    Ok(())
}

/// Connect, apply the requested toggles, and stream until stopped
async fn run_session(bridge: &BridgeHandle, args: &Args, config: &CliConfig) -> Result<()> {
    let _lifecycle = bridge.on_lifecycle_event(|event| {
        print_json(&json!({ "lifecycle": event }));
    });
    let _orientation = bridge.on_orientation(|sample| {
        print_json(&json!({ "orientation": sample }));
    });

    let result = bridge
        .initialize_and_wait(config.bridge.permission_wait())
        .await;
    let flat = InitResult::from(&result);
    print_json(&json!({ "init": flat }));

    match result {
        Ok(Connection::Connected(info)) => {
            info!("Connected to {} ({:?})", info.device_name, info.device_type)
        }
        Ok(Connection::Pending) => {
            return Err(anyhow!(
                "USB permission still pending after {}s",
                config.bridge.permission_wait_secs
            ));
        }
        Err(e) => return Err(e).context("Failed to connect to glasses"),
    }

    if args.imu {
        bridge
            .set_imu_enabled(true)
            .await
            .context("Failed to enable IMU")?;
    }
    if args.three_d
        && let Err(e) = bridge.set_3d_enabled(true).await
    {
        warn!("3D mode unavailable: {}", e);
    }

    wait_for_exit(bridge, args.duration.map(Duration::from_secs)).await;

    if let Ok(status) = bridge.status().await {
        print_json(&json!({ "status": status }));
    }
    bridge.release().await;
    Ok(())
}

/// Return on Ctrl-C, when `limit` elapses, or when the glasses go away
async fn wait_for_exit(bridge: &BridgeHandle, limit: Option<Duration>) {
    let mut state = bridge.watch_state();
    let disconnected = async {
        while state.changed().await.is_ok() {
            if !bridge.is_connected() {
                break;
            }
        }
    };
    let deadline = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => info!("Interrupted"),
        _ = deadline => info!("Duration elapsed"),
        _ = disconnected => info!("Glasses disconnected"),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}
