//! Encoding helpers: JSON text for hub frames, postcard bytes for local
//! snapshots.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::hub::{ClientFrame, ServerFrame};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Binary serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a value as compact JSON text.
///
/// # Errors
///
/// Returns `CodecError::Json` if the value cannot be serialized.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

/// Decodes a value from JSON text.
///
/// # Errors
///
/// Returns `CodecError::Json` if the text is not a valid encoding of `T`.
pub fn from_json<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encodes a value with postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a postcard-encoded value.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// # Errors
///
/// Returns `CodecError::Json` if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<String, CodecError> {
    to_json(frame)
}

/// # Errors
///
/// Returns `CodecError::Json` if the text is not a client frame.
pub fn decode_client(text: &str) -> Result<ClientFrame, CodecError> {
    from_json(text)
}

/// # Errors
///
/// Returns `CodecError::Json` if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<String, CodecError> {
    to_json(frame)
}

/// # Errors
///
/// Returns `CodecError::Json` if the text is not a server frame.
pub fn decode_server(text: &str) -> Result<ServerFrame, CodecError> {
    from_json(text)
}
