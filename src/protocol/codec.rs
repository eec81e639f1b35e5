//! Binary encoding of the temperature service characteristic values.
//!
//! - Temperature: IEEE-754 single precision, little-endian, 4 bytes.
//! - Unit: one unsigned byte (0 = Celsius, 1 = Fahrenheit, others reserved).
//! - CCCD: 2-byte little-endian bitmask.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Size of an encoded temperature value.
pub const TEMPERATURE_LEN: usize = 4;

/// Size of an encoded unit value.
pub const UNIT_LEN: usize = 1;

/// Size of an encoded client characteristic configuration value.
pub const CCCD_LEN: usize = 2;

/// Encode a temperature as 4 little-endian IEEE-754 bytes.
///
/// # Example
///
/// ```
/// use thermo_gatt::protocol::encode_temperature;
///
/// assert_eq!(encode_temperature(25.0), [0x00, 0x00, 0xC8, 0x41]);
/// ```
pub fn encode_temperature(value: f32) -> [u8; TEMPERATURE_LEN] {
    let mut buf = BytesMut::with_capacity(TEMPERATURE_LEN);
    buf.put_f32_le(value);

    let mut out = [0u8; TEMPERATURE_LEN];
    out.copy_from_slice(&buf);
    out
}

/// Decode a temperature from the first 4 bytes of `data`.
///
/// Trailing bytes are ignored.
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`] if fewer than 4 bytes are supplied.
pub fn decode_temperature(data: &[u8]) -> Result<f32> {
    if data.len() < TEMPERATURE_LEN {
        return Err(Error::MalformedPayload {
            expected: TEMPERATURE_LEN,
            actual: data.len(),
        });
    }

    let mut buf = &data[..TEMPERATURE_LEN];
    Ok(buf.get_f32_le())
}

/// Encode a unit code. Reserved codes pass through unchanged.
pub fn encode_unit(code: u8) -> [u8; UNIT_LEN] {
    [code]
}

/// Decode a unit code from the first byte of `data`.
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`] if `data` is empty.
pub fn decode_unit(data: &[u8]) -> Result<u8> {
    data.first().copied().ok_or(Error::MalformedPayload {
        expected: UNIT_LEN,
        actual: 0,
    })
}

/// Encode a client characteristic configuration bitmask.
pub fn encode_cccd(value: u16) -> [u8; CCCD_LEN] {
    value.to_le_bytes()
}

/// Decode a client characteristic configuration bitmask.
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`] if fewer than 2 bytes are supplied.
pub fn decode_cccd(data: &[u8]) -> Result<u16> {
    if data.len() < CCCD_LEN {
        return Err(Error::MalformedPayload {
            expected: CCCD_LEN,
            actual: data.len(),
        });
    }

    let mut buf = &data[..CCCD_LEN];
    Ok(buf.get_u16_le())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_temperature_known_value() {
        assert_eq!(encode_temperature(25.0), [0x00, 0x00, 0xC8, 0x41]);
        assert_eq!(encode_temperature(0.0), [0x00; 4]);
    }

    #[test]
    fn test_decode_temperature_known_value() {
        let value = decode_temperature(&[0x00, 0x00, 0xC8, 0x41]).unwrap();
        assert_eq!(value, 25.0);
    }

    #[test]
    fn test_decode_temperature_ignores_trailing_bytes() {
        let value = decode_temperature(&[0x00, 0x00, 0xC8, 0x41, 0xFF, 0xEE]).unwrap();
        assert_eq!(value, 25.0);
    }

    #[test]
    fn test_decode_temperature_too_short() {
        for len in 0..TEMPERATURE_LEN {
            let data = vec![0u8; len];
            match decode_temperature(&data) {
                Err(Error::MalformedPayload { expected, actual }) => {
                    assert_eq!(expected, 4);
                    assert_eq!(actual, len);
                }
                other => panic!("expected MalformedPayload, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unit_reserved_codes_pass_through() {
        assert_eq!(encode_unit(0), [0]);
        assert_eq!(encode_unit(1), [1]);
        assert_eq!(encode_unit(7), [7]);
        assert_eq!(decode_unit(&[0xFE]).unwrap(), 0xFE);
        assert!(decode_unit(&[]).is_err());
    }

    #[test]
    fn test_cccd() {
        assert_eq!(encode_cccd(0x0001), [0x01, 0x00]);
        assert_eq!(decode_cccd(&[0x02, 0x00]).unwrap(), 0x0002);
        assert!(decode_cccd(&[0x01]).is_err());
    }

    proptest! {
        #[test]
        fn prop_temperature_decode_is_stable(bytes in proptest::array::uniform4(any::<u8>())) {
            let first = decode_temperature(&bytes).unwrap();
            let second = decode_temperature(&encode_temperature(first)).unwrap();
            // NaN payloads compare unequal to themselves, so compare bit patterns.
            prop_assert_eq!(first.to_bits(), second.to_bits());
        }
    }
}
