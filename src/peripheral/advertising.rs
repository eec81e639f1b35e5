//! Advertising payload construction.
//!
//! The primary payload carries flags, the service UUID and an optional
//! manufacturer block so scanners can filter on the service. The display name
//! goes in the scan response only, keeping the primary payload small.
//!
//! Both payloads are sequences of AD structures: `[len][type][data...]`, with
//! `len` counting the type byte and data.

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use crate::ble::uuids::TEMPERATURE_SERVICE_UUID;
use crate::config::PeripheralConfig;
use crate::error::{Error, Result};

/// Maximum size of a legacy advertising or scan response payload.
pub const MAX_LEGACY_PAYLOAD: usize = 31;

/// AD type: flags.
pub const AD_TYPE_FLAGS: u8 = 0x01;
/// AD type: complete list of 128-bit service UUIDs.
pub const AD_TYPE_COMPLETE_128_BIT_UUIDS: u8 = 0x07;
/// AD type: shortened local name.
pub const AD_TYPE_SHORTENED_LOCAL_NAME: u8 = 0x08;
/// AD type: complete local name.
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
/// AD type: manufacturer specific data.
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// LE General Discoverable, BR/EDR not supported.
const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

/// What the peripheral asks the platform to advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdvertisementData {
    /// Accept connections.
    pub connectable: bool,
    /// Service UUIDs in the primary payload.
    pub service_uuids: Vec<Uuid>,
    /// Manufacturer block (company id, payload) in the primary payload.
    pub manufacturer_data: Option<(u16, Vec<u8>)>,
    /// Name placed in the scan response.
    pub scan_response_name: Option<String>,
}

impl AdvertisementData {
    /// Advertisement for the temperature service described by `config`.
    pub fn for_temperature_service(config: &PeripheralConfig) -> Self {
        let name = if config.device_name.is_empty() {
            None
        } else {
            Some(config.device_name.clone())
        };

        Self {
            connectable: config.connectable,
            service_uuids: vec![TEMPERATURE_SERVICE_UUID],
            manufacturer_data: config.manufacturer_data.clone(),
            scan_response_name: name,
        }
    }

    /// Encode the primary advertising payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdvertisementTooLarge`] if the payload exceeds 31 bytes.
    pub fn primary_payload(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(MAX_LEGACY_PAYLOAD);

        put_ad(&mut buf, AD_TYPE_FLAGS, &[FLAGS_GENERAL_DISCOVERABLE]);

        if !self.service_uuids.is_empty() {
            let mut uuids = Vec::with_capacity(self.service_uuids.len() * 16);
            for uuid in &self.service_uuids {
                // 128-bit UUIDs go over the air little-endian.
                let mut bytes = *uuid.as_bytes();
                bytes.reverse();
                uuids.extend_from_slice(&bytes);
            }
            put_ad(&mut buf, AD_TYPE_COMPLETE_128_BIT_UUIDS, &uuids);
        }

        if let Some((company_id, payload)) = &self.manufacturer_data {
            let mut data = Vec::with_capacity(2 + payload.len());
            data.extend_from_slice(&company_id.to_le_bytes());
            data.extend_from_slice(payload);
            put_ad(&mut buf, AD_TYPE_MANUFACTURER_DATA, &data);
        }

        if buf.len() > MAX_LEGACY_PAYLOAD {
            return Err(Error::AdvertisementTooLarge {
                size: buf.len(),
                max: MAX_LEGACY_PAYLOAD,
            });
        }

        Ok(buf.to_vec())
    }

    /// Encode the scan response payload.
    ///
    /// Names that do not fit are truncated on a character boundary and sent
    /// as a shortened local name.
    pub fn scan_response_payload(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(MAX_LEGACY_PAYLOAD);

        if let Some(name) = &self.scan_response_name {
            let room = MAX_LEGACY_PAYLOAD - 2;
            if name.len() <= room {
                put_ad(&mut buf, AD_TYPE_COMPLETE_LOCAL_NAME, name.as_bytes());
            } else {
                let mut end = room;
                while !name.is_char_boundary(end) {
                    end -= 1;
                }
                put_ad(
                    &mut buf,
                    AD_TYPE_SHORTENED_LOCAL_NAME,
                    &name.as_bytes()[..end],
                );
            }
        }

        buf.to_vec()
    }
}

fn put_ad(buf: &mut BytesMut, ad_type: u8, data: &[u8]) {
    buf.put_u8((data.len() + 1) as u8);
    buf.put_u8(ad_type);
    buf.put_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::EXAMPLE_MANUFACTURER_ID;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_for_temperature_service() {
        let data = AdvertisementData::for_temperature_service(&PeripheralConfig::default());
        assert!(data.connectable);
        assert_eq!(data.service_uuids, vec![TEMPERATURE_SERVICE_UUID]);
        assert_eq!(data.scan_response_name.as_deref(), Some("Thermo"));
        assert_eq!(data.manufacturer_data, None);
    }

    #[test]
    fn test_primary_payload_layout() {
        let config = PeripheralConfig::default()
            .manufacturer_data(EXAMPLE_MANUFACTURER_ID, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let payload = AdvertisementData::for_temperature_service(&config)
            .primary_payload()
            .unwrap();

        // flags (3) + uuid list (18) + manufacturer (8)
        assert_eq!(payload.len(), 29);
        assert_eq!(&payload[..3], &[0x02, AD_TYPE_FLAGS, 0x06]);
        assert_eq!(payload[3], 17);
        assert_eq!(payload[4], AD_TYPE_COMPLETE_128_BIT_UUIDS);
        // Little-endian: last byte of the UUID string first.
        assert_eq!(payload[5], 0xFB);
        assert_eq!(payload[20], 0x12);
        assert_eq!(
            &payload[21..],
            &[0x07, AD_TYPE_MANUFACTURER_DATA, 0x59, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn test_primary_payload_never_carries_name() {
        let config = PeripheralConfig::default().device_name("Kitchen");
        let payload = AdvertisementData::for_temperature_service(&config)
            .primary_payload()
            .unwrap();
        assert!(!payload
            .windows(b"Kitchen".len())
            .any(|w| w == b"Kitchen"));
    }

    #[test]
    fn test_primary_payload_too_large() {
        let config = PeripheralConfig::default().manufacturer_data(0x0059, vec![0; 12]);
        let result = AdvertisementData::for_temperature_service(&config).primary_payload();
        assert!(matches!(
            result,
            Err(Error::AdvertisementTooLarge { size: 37, max: 31 })
        ));
    }

    #[test]
    fn test_scan_response_name() {
        let data = AdvertisementData::for_temperature_service(&PeripheralConfig::default());
        let payload = data.scan_response_payload();
        let mut expected = vec![7, AD_TYPE_COMPLETE_LOCAL_NAME];
        expected.extend_from_slice(b"Thermo");
        assert_eq!(payload, expected);
    }

    #[test]
    fn test_scan_response_long_name_is_shortened() {
        let config = PeripheralConfig::default().device_name("A".repeat(40));
        let payload = AdvertisementData::for_temperature_service(&config).scan_response_payload();
        assert_eq!(payload.len(), MAX_LEGACY_PAYLOAD);
        assert_eq!(payload[1], AD_TYPE_SHORTENED_LOCAL_NAME);
    }
}
