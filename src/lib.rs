// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # thermo-gatt
//!
//! Both ends of a minimal Bluetooth Low Energy temperature service.
//!
//! The **central** side scans for the service, connects to the first match,
//! discovers its characteristics and reads the current temperature. The
//! **peripheral** side hosts the service, advertises it and answers inbound
//! read and write requests. A **device registry** aggregates nearby and
//! bonded devices for a picker UI.
//!
//! ## Features
//!
//! - **Central session**: `Disconnected -> Scanning -> Connecting -> Connected`
//!   state machine with scan and connect timeouts
//! - **Peripheral handler**: service registration, advertising, per-connection
//!   notification subscriptions
//! - **Device registry**: signal-sorted device list with RSSI churn suppression
//! - **Platform seam**: the core talks to the radio only through
//!   [`CentralPlatform`] and [`PeripheralPlatform`]; [`BtleplugCentral`] is the
//!   bundled central implementation
//!
//! ## Service Layout
//!
//! | Attribute | UUID | Access | Value |
//! |-----------|------|--------|-------|
//! | Service | `12345678-1234-1000-8000-00805F9B34FB` | | |
//! | Temperature | `87654321-1234-1000-8000-00805F9B34FB` | Read, Notify | `f32` little-endian |
//! | Unit | `87654322-1234-1000-8000-00805F9B34FB` | Read, Write | 1 byte |
//! | CCCD | `0x2902` | Read, Write | `u16` little-endian |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use btleplug::api::Manager as _;
//! use btleplug::platform::Manager;
//! use std::sync::Arc;
//! use thermo_gatt::{BtleplugCentral, CentralSession, ScanListenerSlot, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> thermo_gatt::Result<()> {
//!     let manager = Manager::new().await?;
//!     let adapter = manager
//!         .adapters()
//!         .await?
//!         .into_iter()
//!         .next()
//!         .ok_or(thermo_gatt::Error::AdapterOff)?;
//!
//!     let slot = ScanListenerSlot::new();
//!     let (central, events) = BtleplugCentral::new(adapter, slot.clone()).await?;
//!
//!     let session = CentralSession::new(Arc::new(central), slot, SessionConfig::default());
//!     session.spawn_event_pump(events);
//!
//!     let mut temperatures = session.subscribe_temperature();
//!     session.connect().await;
//!
//!     while let Some(reading) = temperatures.recv().await {
//!         if let Some(celsius) = reading {
//!             println!("Temperature: {:.1}°C", celsius);
//!             break;
//!         }
//!     }
//!
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! btleplug only supports the central role. A peripheral platform has to be
//! provided by the host application.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod central;
pub mod config;
pub mod error;
pub mod gatt;
pub mod peripheral;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod utils;

// Re-exports for convenience
pub use ble::{BtleplugCentral, ScanListenerSlot};
pub use central::{CentralSession, SessionState};
pub use config::{PeripheralConfig, RegistryConfig, SessionConfig};
pub use error::{Error, FailureReason, Result};
pub use peripheral::{AdvertisementData, PeripheralHandler};
pub use platform::{
    CentralEvent, CentralPlatform, DeviceId, PeripheralEvent, PeripheralPlatform, ScanResult,
};
pub use registry::{DeviceRecord, DeviceRegistry};
pub use utils::{celsius_to_fahrenheit, fahrenheit_to_celsius, CallbackHandle, TemperatureUnit};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<CentralSession>();
        let _ = std::any::TypeId::of::<PeripheralHandler>();
        let _ = std::any::TypeId::of::<DeviceRegistry>();
        let _ = std::any::TypeId::of::<BtleplugCentral>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<SessionState>();
    }

    #[test]
    fn test_temperature_conversion() {
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 0.001);
    }
}
