//! Configuration for the central session, peripheral handler and registry.
//!
//! Every config has a `Default` matching the reference behaviour and chained
//! setters for overrides.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::TEMPERATURE_SERVICE_UUID;

/// Default scan deadline for a central session.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// Default peripheral display name.
pub const DEFAULT_DEVICE_NAME: &str = "Thermo";

/// Default temperature reported by the peripheral before any update.
pub const DEFAULT_PERIPHERAL_TEMPERATURE: f32 = 25.0;

/// Default minimum RSSI change (dBm) that counts as a new sighting.
pub const DEFAULT_RSSI_CHANGE_THRESHOLD: i16 = 3;

/// Central session configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Service the hardware scan filter is keyed on.
    pub target_service: Uuid,
    /// How long to scan before giving up.
    pub scan_timeout: Duration,
    /// Optional bound on the connecting phase. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Enable temperature notifications after the initial read.
    pub subscribe_on_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_service: TEMPERATURE_SERVICE_UUID,
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: None,
            subscribe_on_connect: false,
        }
    }
}

impl SessionConfig {
    /// Override the scan deadline.
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Bound the connecting phase.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Subscribe to temperature notifications once connected.
    pub fn subscribe_on_connect(mut self, enable: bool) -> Self {
        self.subscribe_on_connect = enable;
        self
    }

    /// Scan for a different service.
    pub fn target_service(mut self, uuid: Uuid) -> Self {
        self.target_service = uuid;
        self
    }
}

/// Peripheral handler configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralConfig {
    /// Name placed in the scan response.
    pub device_name: String,
    /// Optional manufacturer block for the primary advertising payload.
    pub manufacturer_data: Option<(u16, Vec<u8>)>,
    /// Temperature returned to reads until [`set_temperature`] is called.
    ///
    /// [`set_temperature`]: crate::peripheral::PeripheralHandler::set_temperature
    pub initial_temperature: f32,
    /// Unit code exposed before any write.
    pub initial_unit: u8,
    /// Advertise as connectable.
    pub connectable: bool,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            manufacturer_data: None,
            initial_temperature: DEFAULT_PERIPHERAL_TEMPERATURE,
            initial_unit: 0,
            connectable: true,
        }
    }
}

impl PeripheralConfig {
    /// Set the advertised display name.
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Attach a manufacturer data block.
    pub fn manufacturer_data(mut self, company_id: u16, payload: Vec<u8>) -> Self {
        self.manufacturer_data = Some((company_id, payload));
        self
    }

    /// Set the initial temperature.
    pub fn initial_temperature(mut self, value: f32) -> Self {
        self.initial_temperature = value;
        self
    }

    /// Set the initial unit code.
    pub fn initial_unit(mut self, code: u8) -> Self {
        self.initial_unit = code;
        self
    }
}

/// Device registry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegistryConfig {
    /// RSSI deltas smaller than this are treated as noise.
    pub rssi_change_threshold: i16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            rssi_change_threshold: DEFAULT_RSSI_CHANGE_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.scan_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, None);
        assert!(!config.subscribe_on_connect);
        assert_eq!(config.target_service, TEMPERATURE_SERVICE_UUID);
    }

    #[test]
    fn test_session_builder() {
        let config = SessionConfig::default()
            .scan_timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(10))
            .subscribe_on_connect(true);
        assert_eq!(config.scan_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert!(config.subscribe_on_connect);
    }

    #[test]
    fn test_peripheral_defaults() {
        let config = PeripheralConfig::default().manufacturer_data(0x0059, vec![1, 2, 3, 4]);
        assert_eq!(config.device_name, "Thermo");
        assert_eq!(config.initial_temperature, 25.0);
        assert_eq!(config.manufacturer_data, Some((0x0059, vec![1, 2, 3, 4])));
    }

    #[test]
    fn test_registry_defaults() {
        assert_eq!(RegistryConfig::default().rssi_change_threshold, 3);
    }
}
