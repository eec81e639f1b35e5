//! Process-wide scan listener slot.
//!
//! Platform scan APIs expose a single callback registration. The slot holds at
//! most one listener; registering a new one evicts the previous holder, whose
//! receiver then closes. Registrations are released when their
//! [`ScanListenerGuard`] drops, on every exit path.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::platform::ScanResult;

struct Registration {
    id: u64,
    owner: &'static str,
    tx: mpsc::UnboundedSender<Vec<ScanResult>>,
}

/// The single scan-result registration point shared by a platform backend and
/// the components that scan.
#[derive(Clone, Default)]
pub struct ScanListenerSlot {
    current: Arc<Mutex<Option<Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl ScanListenerSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, evicting any previous listener.
    ///
    /// Returns the guard that owns the registration and the receiving end for
    /// delivered scan batches.
    pub fn register(
        &self,
        owner: &'static str,
    ) -> (ScanListenerGuard, mpsc::UnboundedReceiver<Vec<ScanResult>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let previous = self.current.lock().replace(Registration { id, owner, tx });
        if let Some(previous) = previous {
            debug!(
                "Scan listener held by {} replaced by {}",
                previous.owner, owner
            );
        }

        let guard = ScanListenerGuard {
            id,
            slot: self.current.clone(),
        };

        (guard, rx)
    }

    /// Hand a batch of scan results to the current listener.
    ///
    /// Returns `false` if nobody is listening.
    pub fn deliver(&self, batch: Vec<ScanResult>) -> bool {
        let current = self.current.lock();
        match current.as_ref() {
            Some(registration) => {
                trace!(
                    "Delivering {} scan results to {}",
                    batch.len(),
                    registration.owner
                );
                registration.tx.send(batch).is_ok()
            }
            None => false,
        }
    }

    /// Name of the current listener, if any.
    pub fn owner(&self) -> Option<&'static str> {
        self.current.lock().as_ref().map(|r| r.owner)
    }

    /// Whether a listener is registered.
    pub fn is_registered(&self) -> bool {
        self.current.lock().is_some()
    }
}

impl std::fmt::Debug for ScanListenerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanListenerSlot")
            .field("owner", &self.owner())
            .finish()
    }
}

/// Owns one registration in a [`ScanListenerSlot`].
pub struct ScanListenerGuard {
    id: u64,
    slot: Arc<Mutex<Option<Registration>>>,
}

impl ScanListenerGuard {
    /// Whether this registration still holds the slot.
    pub fn is_active(&self) -> bool {
        self.slot.lock().as_ref().map(|r| r.id) == Some(self.id)
    }
}

impl Drop for ScanListenerGuard {
    fn drop(&mut self) {
        let mut current = self.slot.lock();
        // An evicted guard must not clear its successor.
        if current.as_ref().map(|r| r.id) == Some(self.id) {
            if let Some(registration) = current.take() {
                debug!("Scan listener {} released", registration.owner);
            }
        }
    }
}

impl std::fmt::Debug for ScanListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanListenerGuard")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
