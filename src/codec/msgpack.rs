//! MsgPack codec using `rmp-serde`.
//!
//! Always uses `to_vec_named` so structs serialize as maps (with field names)
//! rather than positional arrays. Clients written against the map-format wire
//! shape would otherwise fail to decode responses.
//!
//! Dynamic payloads (handler arguments, handler results, envelope bodies)
//! are [`rmpv::Value`], for which [`MsgPackCodec::encode_value`] and
//! [`MsgPackCodec::decode_value`] are the named entry points.

use rmpv::Value;

use crate::error::Result;

/// MessagePack codec for structured and dynamic data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        // to_vec_named, NOT to_vec: structs must be maps on the wire.
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode a dynamic [`Value`] to MsgPack bytes.
    #[inline]
    pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a dynamic [`Value`].
    #[inline]
    pub fn decode_value(bytes: &[u8]) -> Result<Value> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
