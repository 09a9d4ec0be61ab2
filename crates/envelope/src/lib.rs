use std::str;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub use serde_json::Value;

#[derive(Debug, Error)]
pub enum Error {
    #[error("JSON serialization error")]
    Json(#[from] serde_json::Error),
    #[error("UTF-8 encoding error")]
    Utf8(#[from] str::Utf8Error),
}

/// Serialize any JSON-representable value into UTF-8 envelope bytes.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Bytes, Error> {
    Ok(serde_json::to_vec(value)?.into())
}

/// Deserialize UTF-8 envelope bytes into any deserializable type.
///
/// Rejects invalid UTF-8, invalid JSON, and trailing garbage.
///
/// # Errors
/// Returns an error if the bytes do not decode to a value of `T`.
pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    let text = str::from_utf8(bytes)?;
    Ok(serde_json::from_str(text)?)
}

/// Reinterpret an already-decoded envelope as a concrete type.
///
/// # Errors
/// Returns an error if the value does not match the shape of `T`.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    Ok(serde_json::from_value(value)?)
}
