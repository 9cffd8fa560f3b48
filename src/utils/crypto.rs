use ring::digest::{Context, SHA256};

use crate::error::{LedgerError, Result};
use data_encoding::HEXLOWER;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
pub fn current_timestamp() -> Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| LedgerError::Io(format!("System time error: {e}")))?
        .as_millis();

    // Ensure the timestamp fits in i64
    if duration > i64::MAX as u128 {
        return Err(LedgerError::Io("Timestamp overflow".to_string()));
    }

    Ok(duration as i64)
}

pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    digest.as_ref().to_vec()
}

/// Lowercase hex SHA-256, the identifier format used for every hash on the chain
pub fn sha256_hex(data: &[u8]) -> String {
    HEXLOWER.encode(&sha256_digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_timestamp_is_positive() {
        assert!(current_timestamp().unwrap() > 0);
    }
}
