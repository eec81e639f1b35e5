//! GATT profile module.
//!
//! Describes the temperature service hosted by the peripheral and looked up
//! by the central.

pub mod profile;

pub use profile::{
    build_temperature_service, CharacteristicDescriptor, CharacteristicProperty,
    DescriptorDescriptor, ServiceDescriptor, CCCD_DISABLED, CCCD_INDICATE, CCCD_NOTIFY,
};
