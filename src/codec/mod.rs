//! Codec module - serialization/deserialization for wire payloads.
//!
//! Both request and response bodies travel as MessagePack. [`MsgPackCodec`]
//! is a marker struct with static methods rather than a trait object, which
//! allows compile-time codec selection.
//!
//! # Example
//!
//! ```
//! use canopy_rpc::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
