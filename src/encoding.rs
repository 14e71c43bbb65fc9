//! Base64 encoding helpers.
//!
//! All public-facing binary values (keys, nonces, ciphertexts, tokens) are
//! serialized as standard Base64 on the wire and in persisted state.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ZaxError;

/// Encode bytes to standard Base64 (RFC 4648, with padding).
pub fn to_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a standard Base64 string to bytes.
pub fn from_base64(encoded: &str) -> Result<Vec<u8>, ZaxError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ZaxError::protocol("", None, format!("invalid base64: {e}")))
}

/// Decode a standard Base64 string to a fixed-size array.
pub fn from_base64_fixed<const N: usize>(encoded: &str) -> Result<[u8; N], ZaxError> {
    let bytes = from_base64(encoded)?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| ZaxError::protocol("", None, format!("expected {N} bytes, got {}", v.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = b"Hello, Zax!";
        let encoded = to_base64(data);
        assert_eq!(from_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn fixed_length_round_trip() {
        let data = [7u8; 32];
        let encoded = to_base64(&data);
        let decoded: [u8; 32] = from_base64_fixed(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn fixed_length_rejects_wrong_size() {
        let encoded = to_base64(&[1, 2, 3]);
        let result: Result<[u8; 32], _> = from_base64_fixed(&encoded);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(from_base64("not base64!!").is_err());
    }
}
