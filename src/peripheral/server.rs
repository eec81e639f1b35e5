//! Peripheral (GATT server) session handler.
//!
//! Hosts the temperature service: registers it, advertises it and answers
//! inbound read/write requests. Every read request gets exactly one response
//! before [`PeripheralHandler::handle_event`] returns; writes are acknowledged
//! only when the central asked for a response.
//!
//! Platform failures are logged and leave the previous state in place. Nothing
//! here returns an error to the caller.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ble::uuids::{CCCD_UUID, TEMPERATURE_CHARACTERISTIC_UUID, UNIT_CHARACTERISTIC_UUID};
use crate::config::PeripheralConfig;
use crate::gatt::{build_temperature_service, ServiceDescriptor, CCCD_DISABLED, CCCD_INDICATE, CCCD_NOTIFY};
use crate::peripheral::advertising::AdvertisementData;
use crate::platform::{DeviceId, GattStatus, LinkState, PeripheralEvent, PeripheralPlatform};
use crate::protocol::codec::{decode_cccd, encode_cccd, encode_temperature, CCCD_LEN, UNIT_LEN};
use crate::utils::TemperatureUnit;

/// ATT MTU before any exchange.
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Per-connection state. Created on connect, dropped on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectionInfo {
    cccd: u16,
    mtu: u16,
}

impl Default for ConnectionInfo {
    fn default() -> Self {
        Self {
            cccd: CCCD_DISABLED,
            mtu: DEFAULT_ATT_MTU,
        }
    }
}

#[derive(Debug)]
struct ServerState {
    service: Option<ServiceDescriptor>,
    advertising: bool,
    temperature: f32,
    unit: u8,
    connections: HashMap<DeviceId, ConnectionInfo>,
}

/// GATT server side of the temperature service.
pub struct PeripheralHandler {
    platform: Arc<dyn PeripheralPlatform>,
    config: PeripheralConfig,
    state: RwLock<ServerState>,
    /// Serializes service registration and advertising changes.
    lifecycle: Mutex<()>,
}

impl PeripheralHandler {
    /// Create a handler over `platform`.
    pub fn new(platform: Arc<dyn PeripheralPlatform>, config: PeripheralConfig) -> Self {
        let state = ServerState {
            service: None,
            advertising: false,
            temperature: config.initial_temperature,
            unit: config.initial_unit,
            connections: HashMap::new(),
        };

        Self {
            platform,
            config,
            state: RwLock::new(state),
            lifecycle: Mutex::new(()),
        }
    }

    /// Build the temperature service and register it with the platform.
    ///
    /// A second call replaces the earlier registration.
    pub async fn prepare_service(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let previous = self.state.write().service.take();
        if let Some(previous) = previous {
            debug!("Replacing service {}", previous.service_uuid);
            if let Err(e) = self.platform.remove_service(previous.service_uuid).await {
                warn!("Failed to remove service {}: {}", previous.service_uuid, e);
            }
        }

        let service = build_temperature_service();
        let uuid = service.service_uuid;

        match self.platform.add_service(service.clone()).await {
            Ok(()) => {
                info!("Registered service {}", uuid);
                self.state.write().service = Some(service);
            }
            Err(e) => error!("Failed to register service {}: {}", uuid, e),
        }
    }

    /// Start a connectable advertisement, replacing any running one.
    pub async fn start_advertising(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        if self.state.read().advertising {
            debug!("Restarting advertisement");
            self.stop_advertising_locked().await;
        }

        let advertisement = AdvertisementData::for_temperature_service(&self.config);
        if let Err(e) = advertisement.primary_payload() {
            error!("Refusing to advertise: {}", e);
            return;
        }

        match self.platform.start_advertising(advertisement).await {
            Ok(()) => {
                info!("Advertising as {:?}", self.config.device_name);
                self.state.write().advertising = true;
            }
            Err(e) => error!("Failed to start advertising: {}", e),
        }
    }

    /// Stop advertising. No-op if not advertising.
    pub async fn stop_advertising(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        if !self.state.read().advertising {
            debug!("Not advertising, ignoring stop request");
            return;
        }

        self.stop_advertising_locked().await;
    }

    async fn stop_advertising_locked(&self) {
        if let Err(e) = self.platform.stop_advertising().await {
            warn!("Failed to stop advertising: {}", e);
        }
        self.state.write().advertising = false;
        info!("Advertising stopped");
    }

    /// Whether an advertisement is running.
    pub fn is_advertising(&self) -> bool {
        self.state.read().advertising
    }

    /// Whether the service is registered.
    pub fn is_service_registered(&self) -> bool {
        self.state.read().service.is_some()
    }

    /// Current temperature served to reads.
    pub fn temperature(&self) -> f32 {
        self.state.read().temperature
    }

    /// Current unit.
    pub fn unit(&self) -> TemperatureUnit {
        TemperatureUnit::from_code(self.state.read().unit)
    }

    /// Connected centrals.
    pub fn connected_devices(&self) -> Vec<DeviceId> {
        let mut devices: Vec<_> = self.state.read().connections.keys().cloned().collect();
        devices.sort();
        devices
    }

    /// CCCD value for a connected central.
    pub fn cccd(&self, device_id: &DeviceId) -> Option<u16> {
        self.state.read().connections.get(device_id).map(|c| c.cccd)
    }

    /// Negotiated MTU for a connected central.
    pub fn mtu(&self, device_id: &DeviceId) -> Option<u16> {
        self.state.read().connections.get(device_id).map(|c| c.mtu)
    }

    /// Update the served temperature and push it to subscribed centrals.
    ///
    /// Returns the number of centrals the value was pushed to.
    pub fn set_temperature(&self, value: f32) -> usize {
        let subscribers: Vec<(DeviceId, u16)> = {
            let mut state = self.state.write();
            state.temperature = value;
            state
                .connections
                .iter()
                .filter(|(_, c)| c.cccd & (CCCD_NOTIFY | CCCD_INDICATE) != 0)
                .map(|(id, c)| (id.clone(), c.cccd))
                .collect()
        };

        let payload = encode_temperature(value).to_vec();
        let mut pushed = 0;

        for (device_id, cccd) in subscribers {
            let confirm = cccd & CCCD_NOTIFY == 0;
            match self.platform.notify_characteristic_changed(
                device_id.clone(),
                TEMPERATURE_CHARACTERISTIC_UUID,
                payload.clone(),
                confirm,
            ) {
                Ok(()) => pushed += 1,
                Err(e) => warn!("Failed to notify {}: {}", device_id, e),
            }
        }

        debug!("Temperature {} pushed to {} centrals", value, pushed);
        pushed
    }

    /// Answer one inbound platform event.
    pub fn handle_event(&self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::CharacteristicReadRequest {
                device_id,
                request_id,
                offset,
                characteristic,
            } => {
                debug!("Read {} from {} (offset {})", characteristic, device_id, offset);
                let (status, value) = match self.characteristic_value(&characteristic) {
                    Some(value) => slice_from(value, offset),
                    None => (GattStatus::AttributeNotFound, Vec::new()),
                };
                self.respond(device_id, request_id, status, offset, value);
            }
            PeripheralEvent::CharacteristicWriteRequest {
                device_id,
                request_id,
                characteristic,
                prepared_write,
                response_needed,
                offset,
                value,
            } => {
                debug!(
                    "Write {:02X?} to {} from {} (response needed: {})",
                    value, characteristic, device_id, response_needed
                );
                let status =
                    self.write_characteristic(&characteristic, prepared_write, offset, &value);
                if response_needed {
                    self.respond(device_id, request_id, status, offset, ack_value(status, value));
                }
            }
            PeripheralEvent::DescriptorReadRequest {
                device_id,
                request_id,
                offset,
                characteristic,
                descriptor,
            } => {
                debug!("Read descriptor {} from {}", descriptor, device_id);
                let (status, value) = if characteristic == TEMPERATURE_CHARACTERISTIC_UUID
                    && descriptor == CCCD_UUID
                {
                    let cccd = self.cccd(&device_id).unwrap_or(CCCD_DISABLED);
                    slice_from(encode_cccd(cccd).to_vec(), offset)
                } else {
                    (GattStatus::AttributeNotFound, Vec::new())
                };
                self.respond(device_id, request_id, status, offset, value);
            }
            PeripheralEvent::DescriptorWriteRequest {
                device_id,
                request_id,
                characteristic,
                descriptor,
                prepared_write,
                response_needed,
                offset,
                value,
            } => {
                debug!(
                    "Write descriptor {} = {:02X?} from {}",
                    descriptor, value, device_id
                );
                let status = self.write_descriptor(
                    &device_id,
                    &characteristic,
                    &descriptor,
                    prepared_write,
                    offset,
                    &value,
                );
                if response_needed {
                    self.respond(device_id, request_id, status, offset, ack_value(status, value));
                }
            }
            PeripheralEvent::ConnectionStateChanged {
                device_id,
                status,
                state,
            } => match state {
                LinkState::Connected => {
                    info!("Central {} connected (status {})", device_id, status);
                    // Subscriptions never survive a reconnect.
                    self.state
                        .write()
                        .connections
                        .insert(device_id, ConnectionInfo::default());
                }
                LinkState::Disconnected => {
                    info!("Central {} disconnected (status {})", device_id, status);
                    self.state.write().connections.remove(&device_id);
                }
            },
            PeripheralEvent::MtuChanged { device_id, mtu } => {
                debug!("MTU for {} is now {}", device_id, mtu);
                if let Some(connection) = self.state.write().connections.get_mut(&device_id) {
                    connection.mtu = mtu;
                }
            }
        }
    }

    fn characteristic_value(&self, characteristic: &Uuid) -> Option<Vec<u8>> {
        let state = self.state.read();
        if *characteristic == TEMPERATURE_CHARACTERISTIC_UUID {
            Some(encode_temperature(state.temperature).to_vec())
        } else if *characteristic == UNIT_CHARACTERISTIC_UUID {
            Some(vec![state.unit])
        } else {
            None
        }
    }

    fn write_characteristic(
        &self,
        characteristic: &Uuid,
        prepared_write: bool,
        offset: usize,
        value: &[u8],
    ) -> GattStatus {
        if *characteristic == UNIT_CHARACTERISTIC_UUID {
            if prepared_write {
                return GattStatus::RequestNotSupported;
            }
            if offset != 0 {
                return GattStatus::InvalidOffset;
            }
            if value.len() != UNIT_LEN {
                return GattStatus::InvalidAttributeValueLength;
            }

            // Reserved codes are stored as-is.
            let unit = value[0];
            self.state.write().unit = unit;
            info!("Unit set to {}", TemperatureUnit::from_code(unit));
            GattStatus::Success
        } else if *characteristic == TEMPERATURE_CHARACTERISTIC_UUID {
            GattStatus::WriteNotPermitted
        } else {
            GattStatus::AttributeNotFound
        }
    }

    fn write_descriptor(
        &self,
        device_id: &DeviceId,
        characteristic: &Uuid,
        descriptor: &Uuid,
        prepared_write: bool,
        offset: usize,
        value: &[u8],
    ) -> GattStatus {
        if *characteristic != TEMPERATURE_CHARACTERISTIC_UUID || *descriptor != CCCD_UUID {
            return GattStatus::AttributeNotFound;
        }
        if prepared_write {
            return GattStatus::RequestNotSupported;
        }
        if offset != 0 {
            return GattStatus::InvalidOffset;
        }
        if value.len() != CCCD_LEN {
            return GattStatus::InvalidAttributeValueLength;
        }

        let cccd = match decode_cccd(value) {
            Ok(cccd) => cccd,
            Err(_) => return GattStatus::InvalidAttributeValueLength,
        };

        match self.state.write().connections.get_mut(device_id) {
            Some(connection) => connection.cccd = cccd,
            None => {
                warn!("CCCD write from {} without a connection", device_id);
                return GattStatus::AttributeNotFound;
            }
        }

        info!(
            "{} set temperature notifications to {:#06x}",
            device_id, cccd
        );
        GattStatus::Success
    }

    fn respond(
        &self,
        device_id: DeviceId,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: Vec<u8>,
    ) {
        if let Err(e) =
            self.platform
                .send_response(device_id.clone(), request_id, status, offset, value)
        {
            error!(
                "Failed to answer request {} from {}: {}",
                request_id, device_id, e
            );
        }
    }
}

impl std::fmt::Debug for PeripheralHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralHandler")
            .field("config", &self.config)
            .field("state", &*self.state.read())
            .finish()
    }
}

fn slice_from(value: Vec<u8>, offset: usize) -> (GattStatus, Vec<u8>) {
    if offset > value.len() {
        (GattStatus::InvalidOffset, Vec::new())
    } else {
        (GattStatus::Success, value[offset..].to_vec())
    }
}

fn ack_value(status: GattStatus, value: Vec<u8>) -> Vec<u8> {
    if status == GattStatus::Success {
        value
    } else {
        Vec::new()
    }
}
