//! Central session state machine.
//!
//! Drives one connect attempt at a time:
//! `Disconnected -> Scanning -> Connecting -> Connected -> Disconnected`, with
//! `Error(reason)` reachable from every state.
//!
//! Every transition, whether triggered by a caller, a platform event or a
//! timer, runs under one async mutex, so transitions never interleave. State
//! and temperature changes reach every observer in the order they happen.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::listener::{ScanListenerGuard, ScanListenerSlot};
use crate::ble::uuids::TEMPERATURE_CHARACTERISTIC_UUID;
use crate::central::state::SessionState;
use crate::config::SessionConfig;
use crate::error::{Error, FailureReason, UNKNOWN_STATUS_CODE};
use crate::platform::{
    CentralEvent, CentralPlatform, DeviceId, DiscoveredService, LinkState, ScanFilter,
    ScanResult, GATT_SUCCESS,
};
use crate::protocol::codec::decode_temperature;
use crate::utils::{CallbackHandle, ObserverList};

/// Name the session registers under in the scan listener slot.
const LISTENER_NAME: &str = "central-session";

/// Mutable session state. Only touched with the session mutex held.
#[derive(Default)]
struct SessionInner {
    state: SessionState,
    /// Bumped on every `connect()`; timers from older attempts are ignored.
    attempt: u64,
    /// Device selected from the scan.
    target: Option<DeviceId>,
    /// Device with an outstanding link handle.
    link: Option<DeviceId>,
    scan_active: bool,
    scan_listener: Option<ScanListenerGuard>,
    scan_timer: Option<JoinHandle<()>>,
    connect_timer: Option<JoinHandle<()>>,
    temperature: Option<f32>,
}

struct Shared {
    platform: Arc<dyn CentralPlatform>,
    listener_slot: ScanListenerSlot,
    config: SessionConfig,
    inner: Mutex<SessionInner>,
    state_snapshot: RwLock<SessionState>,
    temperature_snapshot: RwLock<Option<f32>>,
    state_observers: Arc<ObserverList<SessionState>>,
    temperature_observers: Arc<ObserverList<Option<f32>>>,
}

/// A central-role session looking for one temperature peripheral.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct CentralSession {
    shared: Arc<Shared>,
}

impl CentralSession {
    /// Create a session over `platform`.
    ///
    /// `listener_slot` must be the slot the platform backend delivers scan
    /// batches into.
    pub fn new(
        platform: Arc<dyn CentralPlatform>,
        listener_slot: ScanListenerSlot,
        config: SessionConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                platform,
                listener_slot,
                config,
                inner: Mutex::new(SessionInner::default()),
                state_snapshot: RwLock::new(SessionState::Disconnected),
                temperature_snapshot: RwLock::new(None),
                state_observers: Arc::new(ObserverList::new()),
                temperature_observers: Arc::new(ObserverList::new()),
            }),
        }
    }

    /// Get the current state.
    pub fn state(&self) -> SessionState {
        self.shared.state_snapshot.read().clone()
    }

    /// Most recent temperature, or `None` if there is no data.
    pub fn temperature(&self) -> Option<f32> {
        *self.shared.temperature_snapshot.read()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Subscribe to state transitions.
    ///
    /// The receiver sees every transition after this call, in order.
    pub fn subscribe_state(&self) -> mpsc::UnboundedReceiver<SessionState> {
        self.shared.state_observers.subscribe().1
    }

    /// Subscribe to temperature changes (`None` means cleared).
    pub fn subscribe_temperature(&self) -> mpsc::UnboundedReceiver<Option<f32>> {
        self.shared.temperature_observers.subscribe().1
    }

    /// Register a callback for state transitions.
    pub fn on_state_change<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        self.shared.state_observers.watch(callback)
    }

    /// Register a callback for temperature changes.
    pub fn on_temperature_change<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(Option<f32>) + Send + Sync + 'static,
    {
        self.shared.temperature_observers.watch(callback)
    }

    /// Start a connect attempt.
    ///
    /// Valid from `Disconnected` or `Error` (which is reset first). Checks the
    /// adapter, starts a scan filtered on the target service and arms the scan
    /// timeout. Failures surface as an `Error` state, never as a return value.
    pub async fn connect(&self) {
        let mut inner = self.shared.inner.lock().await;

        if !inner.state.can_connect() {
            debug!("Connect ignored in state {}", inner.state);
            return;
        }

        if inner.state.failure().is_some() {
            debug!("Resetting failed session");
            self.release(&mut inner).await;
            self.transition(&mut inner, SessionState::Disconnected);
        }

        inner.attempt += 1;

        if !self.shared.platform.adapter_powered().await {
            self.fail(&mut inner, FailureReason::AdapterOff);
            return;
        }

        let target_service = self.shared.config.target_service;
        info!("Scanning for service {}", target_service);

        let (guard, batches) = self.shared.listener_slot.register(LISTENER_NAME);
        inner.scan_listener = Some(guard);
        self.spawn_scan_pump(batches);

        self.transition(&mut inner, SessionState::Scanning);

        if let Err(e) = self
            .shared
            .platform
            .start_scan(ScanFilter::for_service(target_service))
            .await
        {
            error!("Failed to start scan: {}", e);
            inner.scan_listener = None;
            let reason = match e {
                Error::ScanFailed { .. } | Error::AdapterOff => FailureReason::from(&e),
                _ => FailureReason::ScanFailed(UNKNOWN_STATUS_CODE),
            };
            self.fail(&mut inner, reason);
            return;
        }

        inner.scan_active = true;
        let attempt = inner.attempt;
        inner.scan_timer = Some(self.arm_scan_timer(attempt));
    }

    /// Tear everything down and return to `Disconnected`.
    ///
    /// Safe from any state and idempotent. Platform failures during teardown
    /// are logged, never returned.
    pub async fn disconnect(&self) {
        let mut inner = self.shared.inner.lock().await;

        if inner.state != SessionState::Disconnected {
            info!("Disconnecting (state {})", inner.state);
        }

        self.release(&mut inner).await;
        self.transition(&mut inner, SessionState::Disconnected);
    }

    /// Feed one platform event into the state machine.
    pub async fn handle_event(&self, event: CentralEvent) {
        let mut inner = self.shared.inner.lock().await;

        match event {
            CentralEvent::ScanResults(batch) => self.on_scan_results(&mut inner, batch).await,
            CentralEvent::ScanFailed { code } => {
                if inner.state == SessionState::Scanning {
                    error!("Scan failed with code {}", code);
                    // The platform already stopped scanning.
                    inner.scan_active = false;
                    self.cancel_scan(&mut inner).await;
                    self.fail(&mut inner, FailureReason::ScanFailed(code));
                }
            }
            CentralEvent::AdapterStateChanged { powered } => {
                debug!("Adapter powered: {}", powered);
                if !powered && !inner.state.can_connect() {
                    self.release(&mut inner).await;
                    self.fail(&mut inner, FailureReason::AdapterOff);
                }
            }
            CentralEvent::ConnectionStateChanged {
                device_id,
                status,
                state,
            } => {
                self.on_connection_state(&mut inner, device_id, status, state)
                    .await
            }
            CentralEvent::ServicesDiscovered {
                device_id,
                status,
                services,
            } => {
                self.on_services_discovered(&mut inner, device_id, status, &services)
                    .await
            }
            CentralEvent::CharacteristicRead {
                device_id,
                characteristic,
                status,
                value,
            } => {
                self.on_characteristic_read(&mut inner, device_id, characteristic, status, &value)
                    .await
            }
            CentralEvent::CharacteristicChanged {
                device_id,
                characteristic,
                value,
            } => {
                if inner.state == SessionState::Connected
                    && inner.link.as_ref() == Some(&device_id)
                    && characteristic == TEMPERATURE_CHARACTERISTIC_UUID
                {
                    match decode_temperature(&value) {
                        Ok(temperature) => {
                            trace!("Temperature notification: {}", temperature);
                            self.publish_temperature(&mut inner, Some(temperature));
                        }
                        Err(e) => warn!("Dropping temperature notification: {}", e),
                    }
                }
            }
        }
    }

    /// Forward platform events into the session until the channel closes.
    pub fn spawn_event_pump(
        &self,
        mut events: mpsc::UnboundedReceiver<CentralEvent>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(shared) = weak.upgrade() else { break };
                CentralSession { shared }.handle_event(event).await;
            }
            debug!("Central event pump ended");
        })
    }

    async fn on_scan_results(&self, inner: &mut SessionInner, batch: Vec<ScanResult>) {
        if inner.state != SessionState::Scanning {
            trace!("Ignoring {} scan results in state {}", batch.len(), inner.state);
            return;
        }

        // First entry of the batch wins; no ranking.
        let Some(first) = batch.into_iter().next() else {
            return;
        };

        info!(
            "Found {} ({:?}, {} dBm)",
            first.device_id, first.name, first.rssi
        );
        let device_id = first.device_id;

        self.cancel_scan(inner).await;
        inner.target = Some(device_id.clone());
        self.transition(inner, SessionState::Connecting);

        if let Some(timeout) = self.shared.config.connect_timeout {
            inner.connect_timer = Some(self.arm_connect_timer(inner.attempt, timeout));
        }

        match self.shared.platform.connect(device_id.clone()).await {
            Ok(()) => inner.link = Some(device_id),
            Err(e) => {
                error!("Failed to connect to {}: {}", device_id, e);
                if let Some(timer) = inner.connect_timer.take() {
                    timer.abort();
                }
                inner.target = None;
                let reason = match e {
                    Error::ConnectFailed { .. } | Error::AdapterOff => FailureReason::from(&e),
                    _ => FailureReason::ConnectFailed(UNKNOWN_STATUS_CODE),
                };
                self.fail(inner, reason);
            }
        }
    }

    async fn on_connection_state(
        &self,
        inner: &mut SessionInner,
        device_id: DeviceId,
        status: i32,
        state: LinkState,
    ) {
        if inner.target.as_ref() != Some(&device_id) && inner.link.as_ref() != Some(&device_id) {
            trace!("Ignoring link event for {}", device_id);
            return;
        }

        match state {
            LinkState::Connected => {
                if inner.state != SessionState::Connecting {
                    debug!("Unexpected connect of {} in state {}", device_id, inner.state);
                    return;
                }

                if let Some(timer) = inner.connect_timer.take() {
                    timer.abort();
                }

                if status != GATT_SUCCESS {
                    error!("Connect to {} failed with status {}", device_id, status);
                    self.release(inner).await;
                    self.fail(inner, FailureReason::ConnectFailed(status));
                    return;
                }

                info!("Connected to {}", device_id);
                inner.link = Some(device_id.clone());
                self.transition(inner, SessionState::Connected);

                if let Err(e) = self.shared.platform.discover_services(device_id).await {
                    error!("Failed to start service discovery: {}", e);
                    self.fail(inner, FailureReason::from(&e));
                }
            }
            LinkState::Disconnected => match inner.state {
                SessionState::Connecting | SessionState::Connected => {
                    info!("Link to {} closed (status {})", device_id, status);
                    self.release(inner).await;
                    self.transition(inner, SessionState::Disconnected);
                }
                _ => {
                    // Error is terminal; just forget the dead link.
                    debug!("Link to {} closed in state {}", device_id, inner.state);
                    inner.link = None;
                    inner.target = None;
                }
            },
        }
    }

    async fn on_services_discovered(
        &self,
        inner: &mut SessionInner,
        device_id: DeviceId,
        status: i32,
        services: &[DiscoveredService],
    ) {
        if inner.state != SessionState::Connected || inner.link.as_ref() != Some(&device_id) {
            trace!("Ignoring discovery result for {}", device_id);
            return;
        }

        if status != GATT_SUCCESS {
            error!("Service discovery failed with status {}", status);
            self.fail(inner, FailureReason::PlatformRequestFailed(status));
            return;
        }

        debug!("Discovered {} services on {}", services.len(), device_id);

        if !has_characteristic(services, &TEMPERATURE_CHARACTERISTIC_UUID) {
            // The link stays up; disconnect() is the caller's job.
            warn!(
                "{} has no characteristic {}",
                device_id, TEMPERATURE_CHARACTERISTIC_UUID
            );
            self.fail(inner, FailureReason::CharacteristicNotFound);
            return;
        }

        if let Err(e) = self
            .shared
            .platform
            .read_characteristic(device_id, TEMPERATURE_CHARACTERISTIC_UUID)
            .await
        {
            error!("Failed to read temperature: {}", e);
            self.fail(inner, FailureReason::from(&e));
        }
    }

    async fn on_characteristic_read(
        &self,
        inner: &mut SessionInner,
        device_id: DeviceId,
        characteristic: Uuid,
        status: i32,
        value: &[u8],
    ) {
        if inner.state != SessionState::Connected
            || inner.link.as_ref() != Some(&device_id)
            || characteristic != TEMPERATURE_CHARACTERISTIC_UUID
        {
            trace!("Ignoring read of {} from {}", characteristic, device_id);
            return;
        }

        if status != GATT_SUCCESS {
            error!("Temperature read failed with status {}", status);
            self.fail(inner, FailureReason::PlatformRequestFailed(status));
            return;
        }

        let temperature = match decode_temperature(value) {
            Ok(temperature) => temperature,
            Err(e) => {
                warn!("Undecodable temperature from {}: {}", device_id, e);
                self.fail(inner, FailureReason::MalformedPayload);
                return;
            }
        };

        debug!("Temperature read from {}: {}", device_id, temperature);
        self.publish_temperature(inner, Some(temperature));

        if self.shared.config.subscribe_on_connect {
            if let Err(e) = self
                .shared
                .platform
                .set_notifications(device_id, TEMPERATURE_CHARACTERISTIC_UUID, true)
                .await
            {
                warn!("Failed to enable temperature notifications: {}", e);
            }
        }
    }

    /// Release scan, timers and link without changing state.
    async fn release(&self, inner: &mut SessionInner) {
        self.cancel_scan(inner).await;

        if let Some(timer) = inner.connect_timer.take() {
            timer.abort();
        }

        inner.target = None;

        if let Some(link) = inner.link.take() {
            debug!("Closing link to {}", link);
            if let Err(e) = self.shared.platform.disconnect(link.clone()).await {
                warn!("Failed to disconnect from {}: {}", link, e);
            }
        }

        self.publish_temperature(inner, None);
    }

    /// Stop the scan, disarm its timeout and give up the listener slot.
    async fn cancel_scan(&self, inner: &mut SessionInner) {
        if let Some(timer) = inner.scan_timer.take() {
            timer.abort();
        }

        // Dropping the guard closes the scan pump's channel.
        inner.scan_listener = None;

        if inner.scan_active {
            inner.scan_active = false;
            if let Err(e) = self.shared.platform.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }
    }

    fn spawn_scan_pump(&self, mut batches: mpsc::UnboundedReceiver<Vec<ScanResult>>) {
        let weak = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                let Some(shared) = weak.upgrade() else { break };
                CentralSession { shared }
                    .handle_event(CentralEvent::ScanResults(batch))
                    .await;
            }
            trace!("Scan pump ended");
        });
    }

    fn arm_scan_timer(&self, attempt: u64) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        let timeout = self.shared.config.scan_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                CentralSession { shared }.on_scan_timeout(attempt).await;
            }
        })
    }

    async fn on_scan_timeout(&self, attempt: u64) {
        let mut inner = self.shared.inner.lock().await;

        if inner.attempt != attempt || inner.state != SessionState::Scanning {
            trace!("Stale scan timeout ignored");
            return;
        }

        // Running inside the timer task: detach the handle rather than abort it.
        drop(inner.scan_timer.take());

        warn!(
            "No device advertising {} within {:?}",
            self.shared.config.target_service, self.shared.config.scan_timeout
        );
        self.cancel_scan(&mut inner).await;
        self.fail(&mut inner, FailureReason::ScanTimeout);
    }

    fn arm_connect_timer(&self, attempt: u64, timeout: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                CentralSession { shared }.on_connect_timeout(attempt).await;
            }
        })
    }

    async fn on_connect_timeout(&self, attempt: u64) {
        let mut inner = self.shared.inner.lock().await;

        if inner.attempt != attempt || inner.state != SessionState::Connecting {
            trace!("Stale connect timeout ignored");
            return;
        }

        drop(inner.connect_timer.take());

        warn!("Connect did not complete in time");
        self.release(&mut inner).await;
        self.fail(&mut inner, FailureReason::ConnectTimeout);
    }

    fn fail(&self, inner: &mut SessionInner, reason: FailureReason) {
        warn!("Session failed: {}", reason);
        self.transition(inner, SessionState::Error(reason));
    }

    /// Apply a transition and notify observers.
    fn transition(&self, inner: &mut SessionInner, new_state: SessionState) {
        if inner.state == new_state {
            return;
        }

        let old_state = std::mem::replace(&mut inner.state, new_state.clone());
        debug!("Session state changed: {} -> {}", old_state, new_state);

        *self.shared.state_snapshot.write() = new_state.clone();
        self.shared.state_observers.publish(new_state);
    }

    fn publish_temperature(&self, inner: &mut SessionInner, value: Option<f32>) {
        if value.is_none() && inner.temperature.is_none() {
            return;
        }

        inner.temperature = value;
        *self.shared.temperature_snapshot.write() = value;
        self.shared.temperature_observers.publish(value);
    }
}

impl std::fmt::Debug for CentralSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralSession")
            .field("state", &self.state())
            .field("temperature", &self.temperature())
            .finish()
    }
}

fn has_characteristic(services: &[DiscoveredService], uuid: &Uuid) -> bool {
    services
        .iter()
        .flat_map(|s| s.characteristics.iter())
        .any(|c| c.uuid == *uuid)
}
