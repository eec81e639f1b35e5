//! Device picker example: List nearby named devices, strongest first
//!
//! Run with: cargo run --example scan_devices
//!
//! Scan for a different duration (seconds):
//!   cargo run --example scan_devices -- --seconds 20

use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use std::sync::Arc;
use std::time::Duration;
use thermo_gatt::{
    BtleplugCentral, DeviceRegistry, Error, RegistryConfig, Result, ScanListenerSlot,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,thermo_gatt=info")
        .init();

    let args: Vec<String> = std::env::args().collect();
    let seconds = args
        .iter()
        .position(|arg| arg == "--seconds")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(Error::AdapterOff)?;

    let slot = ScanListenerSlot::new();
    let (central, _events) = BtleplugCentral::new(adapter, slot.clone()).await?;
    let registry = DeviceRegistry::new(Arc::new(central), slot, RegistryConfig::default());

    let _handle = registry.on_devices_changed(|devices| {
        println!("\n{} devices:", devices.len());
        for device in devices {
            println!(
                "  {:>4} dBm  {}  ({})",
                device.signal_strength,
                device.label(),
                device.device_id
            );
        }
    });

    println!("Scanning for {} seconds...", seconds);
    registry.start_scan().await;

    tokio::time::sleep(Duration::from_secs(seconds)).await;

    registry.stop_scan().await;

    let bonded = registry.bonded_devices();
    if !bonded.is_empty() {
        println!("\nBonded devices:");
        for device in bonded {
            let link = if device.is_connected { "connected" } else { "idle" };
            println!("  {}  [{}]", device.label(), link);
        }
    }

    println!("\nFound {} devices.", registry.discovered_devices().len());

    Ok(())
}
