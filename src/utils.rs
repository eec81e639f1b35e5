//! Utility types and functions for the thermo-gatt crate.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use thermo_gatt::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f32) -> f32 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Convert Fahrenheit to Celsius.
///
/// # Example
///
/// ```
/// use thermo_gatt::fahrenheit_to_celsius;
///
/// let celsius = fahrenheit_to_celsius(212.0);
/// assert!((celsius - 100.0).abs() < 0.001);
/// ```
#[inline]
pub fn fahrenheit_to_celsius(fahrenheit: f32) -> f32 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Display unit carried by the unit characteristic.
///
/// Codes other than 0 and 1 are reserved; they are kept as
/// [`TemperatureUnit::Reserved`] so newer peers round-trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TemperatureUnit {
    /// Degrees Celsius (code 0).
    #[default]
    Celsius,
    /// Degrees Fahrenheit (code 1).
    Fahrenheit,
    /// Reserved code.
    Reserved(u8),
}

impl TemperatureUnit {
    /// Create from the raw unit code.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Celsius,
            1 => Self::Fahrenheit,
            other => Self::Reserved(other),
        }
    }

    /// Convert to the raw unit code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Celsius => 0,
            Self::Fahrenheit => 1,
            Self::Reserved(code) => *code,
        }
    }

    /// Express a Celsius reading in this unit.
    ///
    /// Reserved units return the value unchanged.
    pub fn from_celsius(&self, celsius: f32) -> f32 {
        match self {
            Self::Fahrenheit => celsius_to_fahrenheit(celsius),
            Self::Celsius | Self::Reserved(_) => celsius,
        }
    }
}

impl std::fmt::Display for TemperatureUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Celsius => write!(f, "°C"),
            Self::Fahrenheit => write!(f, "°F"),
            Self::Reserved(code) => write!(f, "unit#{}", code),
        }
    }
}

/// Callback handle for unregistering callbacks.
///
/// Dropping the handle unregisters the callback.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

impl std::fmt::Debug for CallbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandle").field("id", &self.id).finish()
    }
}

/// Fan-out of values to any number of observers.
///
/// Each observer owns an unbounded queue, so none of them ever misses a value
/// and each sees values in the order they were published.
pub(crate) struct ObserverList<T> {
    next_id: AtomicU64,
    senders: Mutex<Vec<(u64, mpsc::UnboundedSender<T>)>>,
}

impl<T: Clone + Send + 'static> ObserverList<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Add an observer and return its id and queue.
    pub(crate) fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.senders.lock().push((id, tx));
        (id, rx)
    }

    /// Drop the observer with `id`.
    pub(crate) fn unsubscribe(&self, id: u64) {
        self.senders.lock().retain(|(observer, _)| *observer != id);
    }

    /// Queue `value` for every observer. Observers whose receiver is gone are
    /// dropped.
    pub(crate) fn publish(&self, value: T) {
        self.senders
            .lock()
            .retain(|(_, tx)| tx.send(value.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.lock().len()
    }

    /// Run `callback` on a task for every published value.
    pub(crate) fn watch<F>(self: &Arc<Self>, callback: F) -> CallbackHandle
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (id, mut rx) = self.subscribe();

        let handle = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                callback(value);
            }
        });

        let observers = Arc::clone(self);
        CallbackHandle::new(id, move || {
            observers.unsubscribe(id);
            handle.abort();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
    }

    #[test]
    fn test_fahrenheit_to_celsius() {
        assert!((fahrenheit_to_celsius(32.0) - 0.0).abs() < 0.001);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 0.001);
    }

    #[test]
    fn test_unit_codes() {
        assert_eq!(TemperatureUnit::from_code(0), TemperatureUnit::Celsius);
        assert_eq!(TemperatureUnit::from_code(1), TemperatureUnit::Fahrenheit);
        assert_eq!(TemperatureUnit::from_code(9), TemperatureUnit::Reserved(9));
        assert_eq!(TemperatureUnit::Reserved(9).code(), 9);
        assert_eq!(TemperatureUnit::Fahrenheit.to_string(), "°F");
    }

    #[test]
    fn test_unit_from_celsius() {
        assert!((TemperatureUnit::Fahrenheit.from_celsius(25.0) - 77.0).abs() < 0.001);
        assert_eq!(TemperatureUnit::Reserved(4).from_celsius(25.0), 25.0);
    }

    #[test]
    fn test_callback_handle_unregisters_on_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let f = flag.clone();
        let handle = CallbackHandle::new(7, move || f.store(true, Ordering::SeqCst));
        assert_eq!(handle.id(), 7);
        drop(handle);
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_observer_list_keeps_every_value() {
        let observers = ObserverList::new();
        let (_, mut first) = observers.subscribe();
        let (_, mut second) = observers.subscribe();

        for i in 0..500 {
            observers.publish(i);
        }

        for rx in [&mut first, &mut second] {
            let mut received = Vec::new();
            while let Ok(value) = rx.try_recv() {
                received.push(value);
            }
            assert_eq!(received, (0..500).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_observer_list_drops_closed_receivers() {
        let observers = ObserverList::new();
        let (id, rx) = observers.subscribe();
        let (_, _kept) = observers.subscribe();

        drop(rx);
        observers.publish(1);
        assert_eq!(observers.len(), 1);

        observers.unsubscribe(id);
        assert_eq!(observers.len(), 1);
    }

    #[tokio::test]
    async fn test_observer_watch_unregisters() {
        let observers = Arc::new(ObserverList::<u8>::new());
        let handle = observers.watch(|_| {});
        assert_eq!(observers.len(), 1);

        handle.unregister();
        assert_eq!(observers.len(), 0);
    }
}
