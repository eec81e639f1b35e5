//! Peripheral (GATT server) role.

pub mod advertising;
pub mod server;

pub use advertising::AdvertisementData;
pub use server::{PeripheralHandler, DEFAULT_ATT_MTU};
