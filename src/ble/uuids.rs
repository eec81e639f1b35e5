//! BLE Service, Characteristic and Descriptor UUIDs.
//!
//! Contains all UUID constants used by the temperature service.

use uuid::Uuid;

// Temperature Service (custom, Bluetooth base UUID layout)
/// Temperature Service UUID.
pub const TEMPERATURE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x1234_5678_1234_1000_8000_00805f9b34fb);
/// Temperature characteristic UUID (Read, Notify; f32 little-endian).
pub const TEMPERATURE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x8765_4321_1234_1000_8000_00805f9b34fb);
/// Unit characteristic UUID (Read, Write; one byte).
pub const UNIT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x8765_4322_1234_1000_8000_00805f9b34fb);

// Standard descriptors
/// Client Characteristic Configuration Descriptor UUID.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Example manufacturer id used in the advertising payload.
pub const EXAMPLE_MANUFACTURER_ID: u16 = 0x0059;

/// Check if a service UUID is the temperature service.
pub fn is_temperature_service(uuid: &Uuid) -> bool {
    *uuid == TEMPERATURE_SERVICE_UUID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            TEMPERATURE_SERVICE_UUID.to_string(),
            "12345678-1234-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            TEMPERATURE_CHARACTERISTIC_UUID.to_string(),
            "87654321-1234-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            UNIT_CHARACTERISTIC_UUID.to_string(),
            "87654322-1234-1000-8000-00805f9b34fb"
        );
        assert_eq!(CCCD_UUID.to_string(), "00002902-0000-1000-8000-00805f9b34fb");
    }

    #[test]
    fn test_is_temperature_service() {
        assert!(is_temperature_service(&TEMPERATURE_SERVICE_UUID));
        assert!(!is_temperature_service(&TEMPERATURE_CHARACTERISTIC_UUID));
    }
}
