//! BLE plumbing.
//!
//! UUID constants, the process-wide scan listener slot and the btleplug
//! implementation of the central platform.

pub mod btleplug_backend;
pub mod listener;
pub mod uuids;

pub use btleplug_backend::BtleplugCentral;
pub use listener::{ScanListenerGuard, ScanListenerSlot};
pub use uuids::*;
