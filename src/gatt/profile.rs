//! Static description of the temperature service.
//!
//! The profile is a fixed template: UUIDs, properties and initial values are
//! constants. [`build_temperature_service`] can be called any number of times;
//! every call yields a fresh, equal descriptor.

use uuid::Uuid;

use crate::ble::uuids::{
    CCCD_UUID, TEMPERATURE_CHARACTERISTIC_UUID, TEMPERATURE_SERVICE_UUID,
    UNIT_CHARACTERISTIC_UUID,
};
use crate::protocol::codec::{encode_cccd, encode_temperature, encode_unit};

/// CCCD value: notifications and indications disabled.
pub const CCCD_DISABLED: u16 = 0x0000;
/// CCCD bit enabling notifications.
pub const CCCD_NOTIFY: u16 = 0x0001;
/// CCCD bit enabling indications.
pub const CCCD_INDICATE: u16 = 0x0002;

/// Access property of a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CharacteristicProperty {
    /// Value can be read.
    Read,
    /// Value can be written.
    Write,
    /// Value changes can be pushed as notifications.
    Notify,
}

/// A descriptor attached to a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorDescriptor {
    /// Descriptor UUID.
    pub descriptor_uuid: Uuid,
    /// Initial value.
    pub value: Vec<u8>,
}

/// A characteristic within a service.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicDescriptor {
    /// Characteristic UUID.
    pub characteristic_uuid: Uuid,
    /// Declared access properties.
    pub properties: Vec<CharacteristicProperty>,
    /// Value exposed before anything else sets it.
    pub initial_value: Vec<u8>,
    /// Attached descriptors.
    pub descriptors: Vec<DescriptorDescriptor>,
}

impl CharacteristicDescriptor {
    /// Check whether the characteristic declares `property`.
    pub fn has_property(&self, property: CharacteristicProperty) -> bool {
        self.properties.contains(&property)
    }

    /// Find an attached descriptor by UUID.
    pub fn descriptor(&self, uuid: &Uuid) -> Option<&DescriptorDescriptor> {
        self.descriptors.iter().find(|d| d.descriptor_uuid == *uuid)
    }
}

/// A GATT service definition.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceDescriptor {
    /// Service UUID.
    pub service_uuid: Uuid,
    /// Whether this is a primary service.
    pub is_primary: bool,
    /// Characteristics in declaration order.
    pub characteristics: Vec<CharacteristicDescriptor>,
    /// UUIDs of included services.
    pub included_services: Vec<Uuid>,
}

impl ServiceDescriptor {
    /// Find a characteristic by UUID.
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics
            .iter()
            .find(|c| c.characteristic_uuid == *uuid)
    }
}

/// Build the temperature service definition.
///
/// - Temperature: Read + Notify, `00 00 00 00`, one CCCD set to `0x0000`.
/// - Unit: Read + Write, one byte (Celsius).
pub fn build_temperature_service() -> ServiceDescriptor {
    let temperature = CharacteristicDescriptor {
        characteristic_uuid: TEMPERATURE_CHARACTERISTIC_UUID,
        properties: vec![CharacteristicProperty::Read, CharacteristicProperty::Notify],
        initial_value: encode_temperature(0.0).to_vec(),
        descriptors: vec![DescriptorDescriptor {
            descriptor_uuid: CCCD_UUID,
            value: encode_cccd(CCCD_DISABLED).to_vec(),
        }],
    };

    let unit = CharacteristicDescriptor {
        characteristic_uuid: UNIT_CHARACTERISTIC_UUID,
        properties: vec![CharacteristicProperty::Read, CharacteristicProperty::Write],
        initial_value: encode_unit(0).to_vec(),
        descriptors: Vec::new(),
    };

    ServiceDescriptor {
        service_uuid: TEMPERATURE_SERVICE_UUID,
        is_primary: true,
        characteristics: vec![temperature, unit],
        included_services: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_service_layout() {
        let service = build_temperature_service();
        assert_eq!(service.service_uuid, TEMPERATURE_SERVICE_UUID);
        assert!(service.is_primary);
        assert_eq!(service.characteristics.len(), 2);
        assert!(service.included_services.is_empty());

        let temperature = &service.characteristics[0];
        assert_eq!(
            temperature.characteristic_uuid,
            TEMPERATURE_CHARACTERISTIC_UUID
        );
        assert!(temperature.has_property(CharacteristicProperty::Read));
        assert!(temperature.has_property(CharacteristicProperty::Notify));
        assert!(!temperature.has_property(CharacteristicProperty::Write));
        assert_eq!(temperature.initial_value, vec![0, 0, 0, 0]);

        let cccd = temperature.descriptor(&CCCD_UUID).unwrap();
        assert_eq!(cccd.value, vec![0x00, 0x00]);

        let unit = service.characteristic(&UNIT_CHARACTERISTIC_UUID).unwrap();
        assert!(unit.has_property(CharacteristicProperty::Write));
        assert!(!unit.has_property(CharacteristicProperty::Notify));
        assert_eq!(unit.initial_value.len(), 1);
    }

    #[test]
    fn test_build_is_idempotent() {
        let first = build_temperature_service();
        let mut second = build_temperature_service();
        assert_eq!(first, second);

        // Mutating one copy never leaks into the next build.
        second.characteristics.clear();
        assert_eq!(build_temperature_service(), first);
    }
}
