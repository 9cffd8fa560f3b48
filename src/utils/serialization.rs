// JSON is both the hashing encoding and the wire encoding.
// serde_json keeps struct fields in declaration order and `Value` maps sorted,
// so the same value always produces the same bytes.
use crate::error::{LedgerError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Canonical bytes used as hash input
pub fn canonical_bytes<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(data)
        .map_err(|e| LedgerError::Serialization(format!("Serialization failed: {e}")))
}

/// Encode one frame for the newline-delimited peer stream
pub fn encode_line<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    let mut bytes = canonical_bytes(data)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one frame (with or without its trailing newline)
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| LedgerError::Serialization(format!("Deserialization failed: {e}")))
}
