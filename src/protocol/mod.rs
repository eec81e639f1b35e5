//! Wire encoding of characteristic and descriptor values.

pub mod codec;

pub use codec::{
    decode_cccd, decode_temperature, decode_unit, encode_cccd, encode_temperature, encode_unit,
};
