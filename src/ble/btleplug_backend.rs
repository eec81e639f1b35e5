//! [`CentralPlatform`] backed by a btleplug adapter.
//!
//! btleplug calls are awaited in spawned tasks and their outcomes are reported
//! as [`CentralEvent`]s on the channel returned by [`BtleplugCentral::new`].
//! Scan batches go through the [`ScanListenerSlot`] instead.
//!
//! A failed connect is reported as a `Connected` transition carrying a
//! non-zero status.

use async_trait::async_trait;
use btleplug::api::{
    CentralEvent as BtleEvent, CentralState, CharPropFlags, Characteristic, Central,
    Peripheral as _, PeripheralProperties, ScanFilter as BtleScanFilter,
};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::listener::ScanListenerSlot;
use crate::error::{Error, Result, UNKNOWN_STATUS_CODE};
use crate::gatt::CharacteristicProperty;
use crate::platform::{
    BondedDevice, CentralEvent, CentralPlatform, DeviceId, DiscoveredCharacteristic,
    DiscoveredService, LinkState, ScanFilter, ScanResult, GATT_SUCCESS,
};

/// RSSI reported when the adapter has no reading.
pub const UNKNOWN_RSSI: i16 = -127;

type EventSender = mpsc::UnboundedSender<CentralEvent>;

/// Central role over a btleplug [`Adapter`].
pub struct BtleplugCentral {
    adapter: Adapter,
    listener_slot: ScanListenerSlot,
    events_tx: EventSender,
    /// Set while a scan is running.
    scan_filter: Arc<RwLock<Option<ScanFilter>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
    notification_tasks: Arc<Mutex<HashMap<DeviceId, JoinHandle<()>>>>,
}

impl BtleplugCentral {
    /// Wrap `adapter`.
    ///
    /// Scan results are delivered into `listener_slot`; every other event
    /// arrives on the returned receiver.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter event stream cannot be opened.
    pub async fn new(
        adapter: Adapter,
        listener_slot: ScanListenerSlot,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CentralEvent>)> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        let mut events = adapter.events().await?;

        let scan_filter = Arc::new(RwLock::new(None));
        let notification_tasks: Arc<Mutex<HashMap<DeviceId, JoinHandle<()>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let task = {
            let adapter = adapter.clone();
            let listener_slot = listener_slot.clone();
            let events_tx = events_tx.clone();
            let scan_filter = scan_filter.clone();
            let notification_tasks = notification_tasks.clone();

            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    match event {
                        BtleEvent::DeviceDiscovered(id) | BtleEvent::DeviceUpdated(id) => {
                            let filter = scan_filter.read().clone();
                            if let Some(filter) = filter {
                                report_sighting(&adapter, &id, &filter, &listener_slot).await;
                            }
                        }
                        BtleEvent::DeviceDisconnected(id) => {
                            debug!("Device disconnected: {:?}", id);
                            let device_id = DeviceId::new(id.to_string());
                            if let Some(task) = notification_tasks.lock().remove(&device_id) {
                                task.abort();
                            }
                            let _ = events_tx.send(CentralEvent::ConnectionStateChanged {
                                device_id,
                                status: GATT_SUCCESS,
                                state: LinkState::Disconnected,
                            });
                        }
                        BtleEvent::StateUpdate(state) => {
                            debug!("Adapter state: {:?}", state);
                            let _ = events_tx.send(CentralEvent::AdapterStateChanged {
                                powered: state == CentralState::PoweredOn,
                            });
                        }
                        // Connects are reported by the task that issued them.
                        _ => {}
                    }
                }
                debug!("Adapter event loop ended");
            })
        };

        let central = Self {
            adapter,
            listener_slot,
            events_tx,
            scan_filter,
            event_task: Mutex::new(Some(task)),
            notification_tasks,
        };

        Ok((central, events_rx))
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Slot scan results are delivered into.
    pub fn listener_slot(&self) -> &ScanListenerSlot {
        &self.listener_slot
    }

    async fn peripheral(&self, device_id: &DeviceId) -> Result<Peripheral> {
        let peripherals = self.adapter.peripherals().await?;

        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == device_id.as_str())
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: device_id.to_string(),
            })
    }
}

#[async_trait]
impl CentralPlatform for BtleplugCentral {
    async fn adapter_powered(&self) -> bool {
        match self.adapter.adapter_state().await {
            Ok(state) => state == CentralState::PoweredOn,
            Err(e) => {
                warn!("Failed to query adapter state: {}", e);
                false
            }
        }
    }

    async fn start_scan(&self, filter: ScanFilter) -> Result<()> {
        debug!("Starting scan with filter {:?}", filter.services);

        *self.scan_filter.write() = Some(filter.clone());

        let result = self
            .adapter
            .start_scan(BtleScanFilter {
                services: filter.services,
            })
            .await;

        if let Err(e) = result {
            *self.scan_filter.write() = None;
            return Err(Error::Bluetooth(e));
        }

        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        if self.scan_filter.write().take().is_none() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        debug!("Stopping scan");
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, device_id: DeviceId) -> Result<()> {
        let peripheral = self.peripheral(&device_id).await?;
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let status = match peripheral.connect().await {
                Ok(()) => GATT_SUCCESS,
                Err(e) => {
                    error!("Failed to connect to {}: {}", device_id, e);
                    UNKNOWN_STATUS_CODE
                }
            };

            let _ = events_tx.send(CentralEvent::ConnectionStateChanged {
                device_id,
                status,
                state: LinkState::Connected,
            });
        });

        Ok(())
    }

    async fn disconnect(&self, device_id: DeviceId) -> Result<()> {
        if let Some(task) = self.notification_tasks.lock().remove(&device_id) {
            task.abort();
        }

        let peripheral = self.peripheral(&device_id).await?;
        peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover_services(&self, device_id: DeviceId) -> Result<()> {
        let peripheral = self.peripheral(&device_id).await?;
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let (status, services) = match peripheral.discover_services().await {
                Ok(()) => {
                    let services = peripheral
                        .services()
                        .into_iter()
                        .map(|service| DiscoveredService {
                            uuid: service.uuid,
                            characteristics: service
                                .characteristics
                                .iter()
                                .map(|c| DiscoveredCharacteristic {
                                    uuid: c.uuid,
                                    properties: properties_from_flags(c.properties),
                                })
                                .collect(),
                        })
                        .collect();
                    (GATT_SUCCESS, services)
                }
                Err(e) => {
                    error!("Service discovery on {} failed: {}", device_id, e);
                    (UNKNOWN_STATUS_CODE, Vec::new())
                }
            };

            let _ = events_tx.send(CentralEvent::ServicesDiscovered {
                device_id,
                status,
                services,
            });
        });

        Ok(())
    }

    async fn read_characteristic(&self, device_id: DeviceId, characteristic: Uuid) -> Result<()> {
        let peripheral = self.peripheral(&device_id).await?;
        let target = find_characteristic(&peripheral, &characteristic)?;
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let (status, value) = match peripheral.read(&target).await {
                Ok(value) => {
                    trace!("Read {} bytes from characteristic {}", value.len(), target.uuid);
                    (GATT_SUCCESS, value)
                }
                Err(e) => {
                    error!("Read of {} failed: {}", target.uuid, e);
                    (UNKNOWN_STATUS_CODE, Vec::new())
                }
            };

            let _ = events_tx.send(CentralEvent::CharacteristicRead {
                device_id,
                characteristic: target.uuid,
                status,
                value,
            });
        });

        Ok(())
    }

    async fn set_notifications(
        &self,
        device_id: DeviceId,
        characteristic: Uuid,
        enable: bool,
    ) -> Result<()> {
        let peripheral = self.peripheral(&device_id).await?;
        let target = find_characteristic(&peripheral, &characteristic)?;

        if !enable {
            if let Some(task) = self.notification_tasks.lock().remove(&device_id) {
                task.abort();
            }
            peripheral.unsubscribe(&target).await?;
            debug!("Unsubscribed from notifications from {}", characteristic);
            return Ok(());
        }

        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(&target).await?;
        debug!("Subscribed to notifications from {}", characteristic);

        let events_tx = self.events_tx.clone();
        let task_device = device_id.clone();
        let task = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );
                let event = CentralEvent::CharacteristicChanged {
                    device_id: task_device.clone(),
                    characteristic: notification.uuid,
                    value: notification.value,
                };
                if events_tx.send(event).is_err() {
                    break;
                }
            }
            debug!("Notification listener for {} ended", task_device);
        });

        if let Some(previous) = self.notification_tasks.lock().insert(device_id, task) {
            previous.abort();
        }

        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<BondedDevice>> {
        Err(Error::NotSupported {
            operation: "bonded device list".to_string(),
        })
    }

    async fn connected_devices(&self) -> Result<Vec<DeviceId>> {
        let mut connected = Vec::new();

        for peripheral in self.adapter.peripherals().await? {
            if peripheral.is_connected().await.unwrap_or(false) {
                connected.push(DeviceId::new(peripheral.id().to_string()));
            }
        }

        Ok(connected)
    }
}

impl Drop for BtleplugCentral {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
        for (_, task) in self.notification_tasks.lock().drain() {
            task.abort();
        }
    }
}

async fn report_sighting(
    adapter: &Adapter,
    id: &PeripheralId,
    filter: &ScanFilter,
    listener_slot: &ScanListenerSlot,
) {
    let peripheral = match adapter.peripheral(id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return;
        }
    };

    let properties = match peripheral.properties().await {
        Ok(Some(p)) => p,
        _ => return,
    };

    if !filter.matches(&properties.services) {
        return;
    }

    let result = scan_result_from_properties(DeviceId::new(id.to_string()), properties);
    listener_slot.deliver(vec![result]);
}

fn scan_result_from_properties(device_id: DeviceId, properties: PeripheralProperties) -> ScanResult {
    ScanResult {
        device_id,
        name: properties.local_name,
        rssi: properties.rssi.unwrap_or(UNKNOWN_RSSI),
        service_uuids: properties.services,
        manufacturer_data: properties.manufacturer_data,
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: &Uuid) -> Result<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == *uuid)
        .ok_or_else(|| Error::CharacteristicNotFound {
            uuid: uuid.to_string(),
        })
}

fn properties_from_flags(flags: CharPropFlags) -> Vec<CharacteristicProperty> {
    let mut properties = Vec::new();

    if flags.contains(CharPropFlags::READ) {
        properties.push(CharacteristicProperty::Read);
    }
    if flags.intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        properties.push(CharacteristicProperty::Write);
    }
    if flags.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE) {
        properties.push(CharacteristicProperty::Notify);
    }

    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::TEMPERATURE_SERVICE_UUID;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_properties_from_flags() {
        assert_eq!(
            properties_from_flags(CharPropFlags::READ | CharPropFlags::NOTIFY),
            vec![CharacteristicProperty::Read, CharacteristicProperty::Notify]
        );
        assert_eq!(
            properties_from_flags(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            vec![CharacteristicProperty::Write]
        );
        assert!(properties_from_flags(CharPropFlags::BROADCAST).is_empty());
    }

    #[test]
    fn test_scan_result_from_properties() {
        let mut manufacturer_data = HashMap::new();
        manufacturer_data.insert(0x0059, vec![1, 2]);

        let properties = PeripheralProperties {
            local_name: Some("Thermo".to_string()),
            rssi: None,
            services: vec![TEMPERATURE_SERVICE_UUID],
            manufacturer_data,
            ..Default::default()
        };

        let result = scan_result_from_properties(DeviceId::from("hci0/dev_01"), properties);
        assert_eq!(result.name.as_deref(), Some("Thermo"));
        assert_eq!(result.rssi, UNKNOWN_RSSI);
        assert_eq!(result.service_uuids, vec![TEMPERATURE_SERVICE_UUID]);
        assert_eq!(result.manufacturer_data.get(&0x0059), Some(&vec![1, 2]));
    }
}
