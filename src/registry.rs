//! Device registry and scan aggregator.
//!
//! Tracks bonded and discovered devices for a device picker. Discovered
//! devices are deduplicated by identifier and kept sorted by descending signal
//! strength; observers get a full snapshot every time the list actually
//! changes.
//!
//! All operations are best effort: platform failures are logged and the
//! previous state is kept.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::ble::listener::{ScanListenerGuard, ScanListenerSlot};
use crate::config::RegistryConfig;
use crate::platform::{CentralPlatform, DeviceId, ScanFilter, ScanResult};
use crate::utils::{CallbackHandle, ObserverList};

const LISTENER_NAME: &str = "device-registry";

/// A device known to the registry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceRecord {
    /// Hardware identifier.
    pub device_id: DeviceId,
    /// Advertised or cached name.
    pub display_name: Option<String>,
    /// Last significant RSSI reading in dBm.
    pub signal_strength: i16,
    /// In the platform bond list.
    pub is_bonded: bool,
    /// Link currently up.
    pub is_connected: bool,
    /// When the device was last seen.
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    fn from_scan(result: &ScanResult, name: String, is_bonded: bool) -> Self {
        Self {
            device_id: result.device_id.clone(),
            display_name: Some(name),
            signal_strength: result.rssi,
            is_bonded,
            is_connected: false,
            last_seen: Utc::now(),
        }
    }

    /// Name to show, falling back to the identifier.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| self.device_id.as_str())
    }
}

#[derive(Default)]
struct RegistryState {
    bonded: Vec<DeviceRecord>,
    discovered: Vec<DeviceRecord>,
    scan_listener: Option<ScanListenerGuard>,
}

struct Shared {
    platform: Arc<dyn CentralPlatform>,
    listener_slot: ScanListenerSlot,
    config: RegistryConfig,
    state: Mutex<RegistryState>,
    observers: Arc<ObserverList<Vec<DeviceRecord>>>,
}

/// Aggregates bonded and discovered devices.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct DeviceRegistry {
    shared: Arc<Shared>,
}

impl DeviceRegistry {
    /// Create a registry over `platform`.
    pub fn new(
        platform: Arc<dyn CentralPlatform>,
        listener_slot: ScanListenerSlot,
        config: RegistryConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                platform,
                listener_slot,
                config,
                state: Mutex::new(RegistryState::default()),
                observers: Arc::new(ObserverList::new()),
            }),
        }
    }

    /// Subscribe to discovered-device snapshots.
    pub fn subscribe_devices(&self) -> mpsc::UnboundedReceiver<Vec<DeviceRecord>> {
        self.shared.observers.subscribe().1
    }

    /// Register a callback invoked with every discovered-device snapshot.
    pub fn on_devices_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(Vec<DeviceRecord>) + Send + Sync + 'static,
    {
        self.shared.observers.watch(callback)
    }

    /// Discovered devices, strongest signal first.
    pub fn discovered_devices(&self) -> Vec<DeviceRecord> {
        self.shared.state.lock().discovered.clone()
    }

    /// Bonded devices from the last refresh.
    pub fn bonded_devices(&self) -> Vec<DeviceRecord> {
        self.shared.state.lock().bonded.clone()
    }

    /// Whether the registry holds the scan listener.
    pub fn is_scanning(&self) -> bool {
        self.shared
            .state
            .lock()
            .scan_listener
            .as_ref()
            .map_or(false, |guard| guard.is_active())
    }

    /// Re-read the platform bond list.
    ///
    /// Returns an empty list if the adapter is off or the platform fails.
    pub async fn refresh_bonded_devices(&self) -> Vec<DeviceRecord> {
        let platform = &self.shared.platform;

        if !platform.adapter_powered().await {
            warn!("Adapter is off, no bonded devices");
            self.shared.state.lock().bonded.clear();
            return Vec::new();
        }

        let bonded = match platform.bonded_devices().await {
            Ok(bonded) => bonded,
            Err(e) => {
                warn!("Failed to query bonded devices: {}", e);
                return Vec::new();
            }
        };

        let connected = match platform.connected_devices().await {
            Ok(connected) => connected,
            Err(e) => {
                warn!("Failed to query connected devices: {}", e);
                return Vec::new();
            }
        };

        let now = Utc::now();
        let records: Vec<DeviceRecord> = bonded
            .into_iter()
            .map(|device| DeviceRecord {
                is_connected: connected.contains(&device.device_id),
                device_id: device.device_id,
                display_name: device.name,
                signal_strength: 0,
                is_bonded: true,
                last_seen: now,
            })
            .collect();

        debug!("{} bonded devices", records.len());
        self.shared.state.lock().bonded = records.clone();
        records
    }

    /// Start an unfiltered scan.
    ///
    /// Refreshes the bond list, clears discovered devices and takes over the
    /// scan listener slot.
    pub async fn start_scan(&self) {
        self.refresh_bonded_devices().await;

        let batches = {
            let mut state = self.shared.state.lock();
            if !state.discovered.is_empty() {
                state.discovered.clear();
                self.shared.observers.publish(Vec::new());
            }
            // Always deregister before registering again.
            state.scan_listener = None;
            let (guard, batches) = self.shared.listener_slot.register(LISTENER_NAME);
            state.scan_listener = Some(guard);
            batches
        };

        self.spawn_scan_pump(batches);

        if let Err(e) = self.shared.platform.start_scan(ScanFilter::any()).await {
            error!("Failed to start scan: {}", e);
            self.shared.state.lock().scan_listener = None;
            return;
        }

        info!("Device scan started");
    }

    /// Stop scanning and release the listener.
    pub async fn stop_scan(&self) {
        let was_scanning = self.shared.state.lock().scan_listener.take().is_some();
        if !was_scanning {
            trace!("Stop scan ignored, not scanning");
            return;
        }

        if let Err(e) = self.shared.platform.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        info!("Device scan stopped");
    }

    /// Ingest one batch of scan results.
    ///
    /// Nameless advertisements are dropped. Known devices only update when the
    /// signal moves by at least the configured threshold.
    pub fn handle_scan_results(&self, batch: Vec<ScanResult>) {
        let threshold = self.shared.config.rssi_change_threshold;

        let mut state = self.shared.state.lock();
        let mut changed = false;

        for result in &batch {
            let name = match result.name.as_deref() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => {
                    trace!("Dropping nameless device {}", result.device_id);
                    continue;
                }
            };

            let is_bonded = state
                .bonded
                .iter()
                .any(|d| d.device_id == result.device_id);

            match state
                .discovered
                .iter_mut()
                .find(|d| d.device_id == result.device_id)
            {
                Some(record) => {
                    record.last_seen = Utc::now();
                    if record.display_name.as_deref() != Some(name.as_str()) {
                        debug!("{} renamed to {}", record.device_id, name);
                        record.display_name = Some(name);
                        changed = true;
                    }
                    let delta = (i32::from(result.rssi) - i32::from(record.signal_strength)).abs();
                    if delta >= i32::from(threshold) {
                        trace!(
                            "{} moved {} -> {} dBm",
                            record.device_id,
                            record.signal_strength,
                            result.rssi
                        );
                        record.signal_strength = result.rssi;
                        changed = true;
                    }
                }
                None => {
                    debug!("Discovered {} ({}, {} dBm)", result.device_id, name, result.rssi);
                    state
                        .discovered
                        .push(DeviceRecord::from_scan(result, name, is_bonded));
                    changed = true;
                }
            }
        }

        if !changed {
            return;
        }

        state
            .discovered
            .sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
        // Published under the lock so snapshots arrive in mutation order.
        self.shared.observers.publish(state.discovered.clone());
    }

    /// Open a link to `device_id`.
    ///
    /// Returns the updated record, or `None` if the platform refused.
    pub async fn connect(&self, device_id: &DeviceId) -> Option<DeviceRecord> {
        if let Err(e) = self.shared.platform.connect(device_id.clone()).await {
            error!("Failed to connect to {}: {}", device_id, e);
            return None;
        }

        info!("Connected to {}", device_id);
        self.set_connected(device_id, true)
    }

    /// Close the link to `device_id`. Returns whether the platform accepted.
    pub async fn disconnect(&self, device_id: &DeviceId) -> bool {
        if let Err(e) = self.shared.platform.disconnect(device_id.clone()).await {
            error!("Failed to disconnect from {}: {}", device_id, e);
            return false;
        }

        info!("Disconnected from {}", device_id);
        self.set_connected(device_id, false);
        true
    }

    /// Disconnect a connected device, connect a disconnected one.
    pub async fn toggle_connect(&self, device_id: &DeviceId) -> Option<DeviceRecord> {
        let connected = self
            .record(device_id)
            .map_or(false, |record| record.is_connected);

        if connected {
            self.disconnect(device_id).await;
            self.record(device_id)
        } else {
            self.connect(device_id).await
        }
    }

    fn record(&self, device_id: &DeviceId) -> Option<DeviceRecord> {
        let state = self.shared.state.lock();
        state
            .discovered
            .iter()
            .chain(state.bonded.iter())
            .find(|d| d.device_id == *device_id)
            .cloned()
    }

    fn set_connected(&self, device_id: &DeviceId, connected: bool) -> Option<DeviceRecord> {
        let mut state = self.shared.state.lock();
        let state = &mut *state;
        let mut record = None;

        for d in state
            .discovered
            .iter_mut()
            .chain(state.bonded.iter_mut())
            .filter(|d| d.device_id == *device_id)
        {
            d.is_connected = connected;
            record.get_or_insert_with(|| d.clone());
        }

        if state.discovered.iter().any(|d| d.device_id == *device_id) {
            self.shared.observers.publish(state.discovered.clone());
        }

        record
    }

    fn spawn_scan_pump(&self, mut batches: mpsc::UnboundedReceiver<Vec<ScanResult>>) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                let Some(shared) = weak.upgrade() else { break };
                DeviceRegistry { shared }.handle_scan_results(batch);
            }
            debug!("Registry scan pump ended");
        });
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DeviceRegistry")
            .field("bonded", &state.bonded.len())
            .field("discovered", &state.discovered.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::platform::{BondedDevice, MockCentralPlatform};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn sighting(id: &str, name: Option<&str>, rssi: i16) -> ScanResult {
        ScanResult {
            device_id: DeviceId::from(id),
            name: name.map(str::to_string),
            rssi,
            ..Default::default()
        }
    }

    fn registry_with(platform: MockCentralPlatform) -> (DeviceRegistry, ScanListenerSlot) {
        let slot = ScanListenerSlot::new();
        let registry =
            DeviceRegistry::new(Arc::new(platform), slot.clone(), RegistryConfig::default());
        (registry, slot)
    }

    fn ids(records: &[DeviceRecord]) -> Vec<&str> {
        records.iter().map(|r| r.device_id.as_str()).collect()
    }

    #[test]
    fn test_rssi_churn_suppressed() {
        let (registry, _slot) = registry_with(MockCentralPlatform::new());
        let mut rx = registry.subscribe_devices();

        registry.handle_scan_results(vec![sighting("a", Some("Thermo"), -60)]);
        assert_eq!(rx.try_recv().unwrap()[0].signal_strength, -60);

        registry.handle_scan_results(vec![sighting("a", Some("Thermo"), -61)]);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.discovered_devices()[0].signal_strength, -60);

        registry.handle_scan_results(vec![sighting("a", Some("Thermo"), -63)]);
        assert_eq!(rx.try_recv().unwrap()[0].signal_strength, -63);
    }

    #[test]
    fn test_nameless_devices_dropped() {
        let (registry, _slot) = registry_with(MockCentralPlatform::new());
        let mut rx = registry.subscribe_devices();

        registry.handle_scan_results(vec![
            sighting("a", None, -40),
            sighting("b", Some(""), -45),
        ]);
        assert!(rx.try_recv().is_err());
        assert!(registry.discovered_devices().is_empty());
    }

    #[test]
    fn test_sorted_by_signal() {
        let (registry, _slot) = registry_with(MockCentralPlatform::new());

        registry.handle_scan_results(vec![
            sighting("weak", Some("Weak"), -90),
            sighting("strong", Some("Strong"), -40),
        ]);
        registry.handle_scan_results(vec![sighting("mid", Some("Mid"), -70)]);
        assert_eq!(
            ids(&registry.discovered_devices()),
            vec!["strong", "mid", "weak"]
        );

        registry.handle_scan_results(vec![sighting("weak", Some("Weak"), -30)]);
        assert_eq!(
            ids(&registry.discovered_devices()),
            vec!["weak", "strong", "mid"]
        );
    }

    #[tokio::test]
    async fn test_refresh_bonded_marks_connected() {
        let mut platform = MockCentralPlatform::new();
        platform.expect_adapter_powered().returning(|| true);
        platform.expect_bonded_devices().returning(|| {
            Ok(vec![
                BondedDevice {
                    device_id: DeviceId::from("a"),
                    name: Some("Kitchen".to_string()),
                },
                BondedDevice {
                    device_id: DeviceId::from("b"),
                    name: None,
                },
            ])
        });
        platform
            .expect_connected_devices()
            .returning(|| Ok(vec![DeviceId::from("b")]));

        let (registry, _slot) = registry_with(platform);
        let bonded = registry.refresh_bonded_devices().await;

        assert_eq!(ids(&bonded), vec!["a", "b"]);
        assert!(!bonded[0].is_connected);
        assert!(bonded[1].is_connected);
        assert!(bonded.iter().all(|d| d.is_bonded));
        assert_eq!(bonded[1].label(), "b");
    }

    #[tokio::test]
    async fn test_refresh_bonded_fails_soft() {
        let mut platform = MockCentralPlatform::new();
        platform.expect_adapter_powered().returning(|| true);
        platform.expect_bonded_devices().returning(|| {
            Err(Error::NotSupported {
                operation: "bond list".to_string(),
            })
        });

        let (registry, _slot) = registry_with(platform);
        assert!(registry.refresh_bonded_devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_bonded_adapter_off() {
        let mut platform = MockCentralPlatform::new();
        platform.expect_adapter_powered().returning(|| false);
        platform.expect_bonded_devices().never();

        let (registry, _slot) = registry_with(platform);
        assert!(registry.refresh_bonded_devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_scan_delivers_through_slot() {
        let mut platform = MockCentralPlatform::new();
        platform.expect_adapter_powered().returning(|| false);
        platform
            .expect_start_scan()
            .withf(|filter| filter.services.is_empty())
            .times(1)
            .returning(|_| Ok(()));
        platform.expect_stop_scan().times(1).returning(|| Ok(()));

        let (registry, slot) = registry_with(platform);
        let mut rx = registry.subscribe_devices();

        registry.start_scan().await;
        assert!(registry.is_scanning());
        assert_eq!(slot.owner(), Some(LISTENER_NAME));

        assert!(slot.deliver(vec![sighting("a", Some("Thermo"), -50)]));
        let snapshot = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&snapshot), vec!["a"]);

        registry.stop_scan().await;
        assert!(!registry.is_scanning());
        assert!(!slot.is_registered());
    }

    #[tokio::test]
    async fn test_start_scan_clears_discovered() {
        let mut platform = MockCentralPlatform::new();
        platform.expect_adapter_powered().returning(|| false);
        platform.expect_start_scan().returning(|_| Ok(()));

        let (registry, _slot) = registry_with(platform);
        registry.handle_scan_results(vec![sighting("a", Some("Thermo"), -50)]);
        let mut rx = registry.subscribe_devices();

        registry.start_scan().await;
        assert!(registry.discovered_devices().is_empty());
        // Observers see the list go empty.
        assert_eq!(rx.try_recv().unwrap(), Vec::new());
        assert!(rx.try_recv().is_err());

        // Restarting with nothing discovered sends nothing.
        registry.start_scan().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_scan_failure_releases_slot() {
        let mut platform = MockCentralPlatform::new();
        platform.expect_adapter_powered().returning(|| false);
        platform
            .expect_start_scan()
            .returning(|_| Err(Error::ScanFailed { code: 2 }));

        let (registry, slot) = registry_with(platform);
        registry.start_scan().await;
        assert!(!slot.is_registered());
    }

    #[tokio::test]
    async fn test_stop_scan_tolerates_errors() {
        let mut platform = MockCentralPlatform::new();
        platform.expect_adapter_powered().returning(|| false);
        platform.expect_start_scan().returning(|_| Ok(()));
        platform
            .expect_stop_scan()
            .times(1)
            .returning(|| Err(Error::Internal("stack gone".to_string())));

        let (registry, slot) = registry_with(platform);
        registry.start_scan().await;
        registry.stop_scan().await;
        assert!(!registry.is_scanning());
        assert!(!slot.is_registered());
    }

    #[tokio::test]
    async fn test_stop_scan_while_idle_skips_platform() {
        let mut platform = MockCentralPlatform::new();
        platform.expect_stop_scan().never();

        let (registry, _slot) = registry_with(platform);
        registry.stop_scan().await;
        registry.stop_scan().await;
        assert!(!registry.is_scanning());
    }

    #[test]
    fn test_rename_published_despite_small_rssi_change() {
        let (registry, _slot) = registry_with(MockCentralPlatform::new());
        let mut rx = registry.subscribe_devices();

        registry.handle_scan_results(vec![sighting("a", Some("Thermo"), -60)]);
        assert_eq!(rx.try_recv().unwrap()[0].label(), "Thermo");

        registry.handle_scan_results(vec![sighting("a", Some("Kitchen"), -61)]);
        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot[0].label(), "Kitchen");
        // The RSSI stays at the last significant reading.
        assert_eq!(snapshot[0].signal_strength, -60);

        // Same name, same signal: nothing new.
        registry.handle_scan_results(vec![sighting("a", Some("Kitchen"), -61)]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_every_snapshot_reaches_every_observer() {
        let (registry, _slot) = registry_with(MockCentralPlatform::new());
        let mut first = registry.subscribe_devices();
        let mut second = registry.subscribe_devices();

        let expected: Vec<i16> = (0..100).map(|i| if i % 2 == 0 { -60 } else { -70 }).collect();
        for rssi in &expected {
            registry.handle_scan_results(vec![sighting("a", Some("Thermo"), *rssi)]);
        }

        for rx in [&mut first, &mut second] {
            let mut strengths = Vec::new();
            while let Ok(snapshot) = rx.try_recv() {
                strengths.push(snapshot[0].signal_strength);
            }
            assert_eq!(strengths, expected);
        }
    }

    #[tokio::test]
    async fn test_toggle_connect() {
        let mut platform = MockCentralPlatform::new();
        platform.expect_connect().times(1).returning(|_| Ok(()));
        platform.expect_disconnect().times(1).returning(|_| Ok(()));

        let (registry, _slot) = registry_with(platform);
        let device = DeviceId::from("a");
        registry.handle_scan_results(vec![sighting("a", Some("Thermo"), -50)]);

        let record = registry.toggle_connect(&device).await.unwrap();
        assert!(record.is_connected);

        let record = registry.toggle_connect(&device).await.unwrap();
        assert!(!record.is_connected);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_none() {
        let mut platform = MockCentralPlatform::new();
        platform
            .expect_connect()
            .returning(|_| Err(Error::ConnectFailed { code: 133 }));

        let (registry, _slot) = registry_with(platform);
        registry.handle_scan_results(vec![sighting("a", Some("Thermo"), -50)]);

        assert_eq!(registry.connect(&DeviceId::from("a")).await, None);
        assert!(!registry.discovered_devices()[0].is_connected);
    }
}
