//! Pluggable payload serialization.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure raised by an [`EventCodec`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CodecError(String);

impl CodecError {
    /// Creates a codec error from any displayable cause.
    pub fn new(cause: impl std::fmt::Display) -> Self {
        Self(cause.to_string())
    }
}

/// Serializes and deserializes event payloads and aggregates.
///
/// Implementations must be stateless or internally synchronized: a single
/// codec instance is shared by every reader and writer of a registry.
pub trait EventCodec: Send + Sync + 'static {
    /// Serializes `value` to bytes.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the value cannot be represented.
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserializes bytes into a `T`.
    ///
    /// # Errors
    ///
    /// Returns `CodecError` if the bytes are not a valid `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl EventCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::new)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::new)
    }
}
