//! Pluggable payload serialization for remote invocations.
//!
//! Argument and result payloads travel as opaque bytes. The [`MessageCodec`]
//! trait decides how they are produced, so any transport can be combined with
//! any serializer. [`JsonCodec`] is the default.
//!
//! # Example
//!
//! ```rust
//! use switchyard_core::{JsonCodec, MessageCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct LunchRestaurant {
//!     name: String,
//!     food_type: String,
//! }
//!
//! let codec = JsonCodec;
//! let restaurant = LunchRestaurant {
//!     name: "Pizza Place".to_string(),
//!     food_type: "pizza".to_string(),
//! };
//!
//! let bytes = codec.encode(&restaurant).expect("encode");
//! let decoded: LunchRestaurant = codec.decode(&bytes).expect("decode");
//! assert_eq!(decoded, restaurant);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error type for codec operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A value could not be turned into a payload.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A payload could not be turned back into a value.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable payload serialization format.
///
/// Codec instances are shared between caller threads and stored inside
/// clients, hence the `Clone + Send + Sync + 'static` bound.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Encode a serializable value to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes to a deserializable value.
    ///
    /// # Errors
    ///
    /// Returns `CodecError::Decode` if deserialization fails.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec using serde_json.
///
/// Human-readable, which makes remote payloads easy to inspect in logs.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
