//! Basic example: Read the temperature from the nearest thermo peripheral
//!
//! Run with: cargo run --example temperature_client
//!
//! To keep receiving notifications after the first read:
//!   cargo run --example temperature_client -- --follow

use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use std::sync::Arc;
use std::time::Duration;
use thermo_gatt::{
    celsius_to_fahrenheit, BtleplugCentral, CentralSession, Error, Result, ScanListenerSlot,
    SessionConfig, SessionState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("thermo_gatt=debug".parse().unwrap()),
        )
        .init();

    let follow = std::env::args().any(|arg| arg == "--follow");

    println!("Looking for a temperature service...");
    println!("Make sure the peripheral is advertising!\n");

    let manager = Manager::new().await?;
    let adapter = manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or(Error::AdapterOff)?;

    let slot = ScanListenerSlot::new();
    let (central, events) = BtleplugCentral::new(adapter, slot.clone()).await?;

    let config = SessionConfig::default()
        .scan_timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .subscribe_on_connect(follow);
    let session = CentralSession::new(Arc::new(central), slot, config);
    let _pump = session.spawn_event_pump(events);

    let _state_handle = session.on_state_change(|state| {
        println!("State: {}", state);
    });

    let mut temperatures = session.subscribe_temperature();
    let mut states = session.subscribe_state();

    session.connect().await;

    loop {
        tokio::select! {
            Some(reading) = temperatures.recv() => {
                if let Some(celsius) = reading {
                    println!(
                        "Temperature: {:.1}°C ({:.1}°F)",
                        celsius,
                        celsius_to_fahrenheit(celsius)
                    );
                    if !follow {
                        break;
                    }
                }
            }
            Some(state) = states.recv() => {
                match state {
                    SessionState::Error(reason) => {
                        println!("Failed: {}", reason);
                        break;
                    }
                    SessionState::Disconnected => {
                        println!("Peripheral went away");
                        break;
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted");
                break;
            }
        }
    }

    session.disconnect().await;
    println!("Done.");

    Ok(())
}
