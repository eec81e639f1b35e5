//! Platform BLE stack abstraction.
//!
//! The core never talks to a radio directly. Central-role components issue
//! requests through [`CentralPlatform`] and receive results as
//! [`CentralEvent`]s; the peripheral handler registers its service through
//! [`PeripheralPlatform`] and answers inbound [`PeripheralEvent`]s.
//!
//! Requests return as soon as the platform has accepted them. Their outcome
//! arrives later, out of band, as an event.

use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::gatt::{CharacteristicProperty, ServiceDescriptor};
use crate::peripheral::advertising::AdvertisementData;

/// Status code reported by the platform for a successful operation.
pub const GATT_SUCCESS: i32 = 0;

/// Opaque hardware identifier of a remote device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a new device identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Link-level connection state reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Link is up.
    Connected,
    /// Link is down.
    Disconnected,
}

/// Hardware scan filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanFilter {
    /// Only surface advertisements carrying one of these service UUIDs.
    /// Empty means unfiltered.
    pub services: Vec<Uuid>,
}

impl ScanFilter {
    /// Unfiltered scan.
    pub fn any() -> Self {
        Self::default()
    }

    /// Scan keyed on a single service UUID.
    pub fn for_service(uuid: Uuid) -> Self {
        Self {
            services: vec![uuid],
        }
    }

    /// Check whether an advertisement with `advertised` services passes.
    pub fn matches(&self, advertised: &[Uuid]) -> bool {
        self.services.is_empty() || self.services.iter().any(|s| advertised.contains(s))
    }
}

/// One advertisement surfaced by a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Advertiser identifier.
    pub device_id: DeviceId,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: i16,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Manufacturer-specific data keyed by company id.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

/// A device from the platform's bond list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondedDevice {
    /// Device identifier.
    pub device_id: DeviceId,
    /// Cached name, if the platform has one.
    pub name: Option<String>,
}

/// A characteristic found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Properties reported by the remote.
    pub properties: Vec<CharacteristicProperty>,
}

/// A service found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics of the service.
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// Asynchronous events delivered by the platform to the central role.
#[derive(Debug, Clone, PartialEq)]
pub enum CentralEvent {
    /// A batch of advertisements (delivered through the scan listener slot).
    ScanResults(Vec<ScanResult>),
    /// The running scan failed.
    ScanFailed {
        /// Platform status code.
        code: i32,
    },
    /// The radio was switched on or off.
    AdapterStateChanged {
        /// Whether the adapter is powered.
        powered: bool,
    },
    /// A link came up or went down.
    ConnectionStateChanged {
        /// Remote device.
        device_id: DeviceId,
        /// Platform status code.
        status: i32,
        /// New link state.
        state: LinkState,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// Remote device.
        device_id: DeviceId,
        /// Platform status code.
        status: i32,
        /// Discovered service tree.
        services: Vec<DiscoveredService>,
    },
    /// A characteristic read completed.
    CharacteristicRead {
        /// Remote device.
        device_id: DeviceId,
        /// Characteristic that was read.
        characteristic: Uuid,
        /// Platform status code.
        status: i32,
        /// Value returned by the remote.
        value: Vec<u8>,
    },
    /// The remote pushed a notification or indication.
    CharacteristicChanged {
        /// Remote device.
        device_id: DeviceId,
        /// Characteristic that changed.
        characteristic: Uuid,
        /// New value.
        value: Vec<u8>,
    },
}

/// Central-role requests into the platform BLE stack.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CentralPlatform: Send + Sync {
    /// Whether the radio adapter is powered on.
    async fn adapter_powered(&self) -> bool;

    /// Begin scanning; results are delivered through the listener slot.
    async fn start_scan(&self, filter: ScanFilter) -> Result<()>;

    /// Stop scanning. Stopping an idle scanner is not an error.
    async fn stop_scan(&self) -> Result<()>;

    /// Request a link to `device_id`.
    async fn connect(&self, device_id: DeviceId) -> Result<()>;

    /// Tear down the link to `device_id`.
    async fn disconnect(&self, device_id: DeviceId) -> Result<()>;

    /// Start service discovery on a connected device.
    async fn discover_services(&self, device_id: DeviceId) -> Result<()>;

    /// Issue a read of `characteristic`.
    async fn read_characteristic(&self, device_id: DeviceId, characteristic: Uuid) -> Result<()>;

    /// Enable or disable notifications by writing the remote CCCD.
    async fn set_notifications(
        &self,
        device_id: DeviceId,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<()>;

    /// Devices in the platform bond list.
    async fn bonded_devices(&self) -> Result<Vec<BondedDevice>>;

    /// Devices with an active link.
    async fn connected_devices(&self) -> Result<Vec<DeviceId>>;
}

/// ATT status codes sent in request responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GattStatus {
    /// Request succeeded.
    Success = 0x00,
    /// Attribute cannot be read.
    ReadNotPermitted = 0x02,
    /// Attribute cannot be written.
    WriteNotPermitted = 0x03,
    /// Request is not supported by the server.
    RequestNotSupported = 0x06,
    /// Offset is past the end of the value.
    InvalidOffset = 0x07,
    /// No such attribute.
    AttributeNotFound = 0x0A,
    /// Written value has the wrong length.
    InvalidAttributeValueLength = 0x0D,
}

impl GattStatus {
    /// Raw ATT status byte.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Inbound events delivered by the platform to the peripheral role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// A central read a characteristic.
    CharacteristicReadRequest {
        /// Requesting central.
        device_id: DeviceId,
        /// Request id to echo in the response.
        request_id: u32,
        /// Read offset.
        offset: usize,
        /// Target characteristic.
        characteristic: Uuid,
    },
    /// A central wrote a characteristic.
    CharacteristicWriteRequest {
        /// Requesting central.
        device_id: DeviceId,
        /// Request id to echo in the response.
        request_id: u32,
        /// Target characteristic.
        characteristic: Uuid,
        /// Part of a queued (prepared) write.
        prepared_write: bool,
        /// Write-with-response; an acknowledgement is required.
        response_needed: bool,
        /// Write offset.
        offset: usize,
        /// Written bytes.
        value: Vec<u8>,
    },
    /// A central read a descriptor.
    DescriptorReadRequest {
        /// Requesting central.
        device_id: DeviceId,
        /// Request id to echo in the response.
        request_id: u32,
        /// Read offset.
        offset: usize,
        /// Owning characteristic.
        characteristic: Uuid,
        /// Target descriptor.
        descriptor: Uuid,
    },
    /// A central wrote a descriptor.
    DescriptorWriteRequest {
        /// Requesting central.
        device_id: DeviceId,
        /// Request id to echo in the response.
        request_id: u32,
        /// Owning characteristic.
        characteristic: Uuid,
        /// Target descriptor.
        descriptor: Uuid,
        /// Part of a queued (prepared) write.
        prepared_write: bool,
        /// Write-with-response; an acknowledgement is required.
        response_needed: bool,
        /// Write offset.
        offset: usize,
        /// Written bytes.
        value: Vec<u8>,
    },
    /// A central connected or disconnected.
    ConnectionStateChanged {
        /// Remote central.
        device_id: DeviceId,
        /// Platform status code.
        status: i32,
        /// New link state.
        state: LinkState,
    },
    /// The ATT MTU for a link was renegotiated.
    MtuChanged {
        /// Remote central.
        device_id: DeviceId,
        /// New MTU.
        mtu: u16,
    },
}

/// Peripheral-role requests into the platform BLE stack.
///
/// Lifecycle calls are async; responses and notifications are synchronous so a
/// request can be answered before control returns to the stack's event loop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeripheralPlatform: Send + Sync {
    /// Register a service with the local GATT server.
    async fn add_service(&self, service: ServiceDescriptor) -> Result<()>;

    /// Remove a previously registered service.
    async fn remove_service(&self, service_uuid: Uuid) -> Result<()>;

    /// Start a connectable advertisement.
    async fn start_advertising(&self, advertisement: AdvertisementData) -> Result<()>;

    /// Stop the current advertisement.
    async fn stop_advertising(&self) -> Result<()>;

    /// Answer a read or write request.
    fn send_response(
        &self,
        device_id: DeviceId,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: Vec<u8>,
    ) -> Result<()>;

    /// Push a characteristic value to one central.
    fn notify_characteristic_changed(
        &self,
        device_id: DeviceId,
        characteristic: Uuid,
        value: Vec<u8>,
        confirm: bool,
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_filter_matches() {
        let service = Uuid::from_u128(1);
        let other = Uuid::from_u128(2);

        assert!(ScanFilter::any().matches(&[]));
        assert!(ScanFilter::for_service(service).matches(&[other, service]));
        assert!(!ScanFilter::for_service(service).matches(&[other]));
        assert!(!ScanFilter::for_service(service).matches(&[]));
    }

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::from("AA:BB:CC:DD:EE:FF");
        assert_eq!(id.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(id.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_gatt_status_codes() {
        assert_eq!(GattStatus::Success.code(), 0x00);
        assert_eq!(GattStatus::InvalidOffset.code(), 0x07);
        assert_eq!(GattStatus::InvalidAttributeValueLength.code(), 0x0D);
    }
}
