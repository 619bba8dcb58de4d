//! Shared cryptographic utilities for `ISOHub`
//!
//! This crate provides the field-level encryption primitives used by the
//! backend: the authenticated-encryption codec for PII at rest, the
//! serialized blob format it produces, validated per-category PII wrappers,
//! and HMAC-SHA256 payload signing for one-time state tokens.
//!
//! Everything here is pure CPU work; no I/O, no async.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

mod blob;
pub use blob::{is_encrypted, BlobFormatError, EncryptedBlob};

mod codec;
pub use codec::{DecryptionError, EncryptionError, FieldCipher, FIELD_KEY_LEN};

mod pii;
pub use pii::{Exposure, PiiCodec, PiiError, PiiKind, PiiValidationError};

mod signing;
pub use signing::{sign_payload, verify_payload, SIGNATURE_LEN};

/// Error type for base64url decoding failures
#[derive(Debug, thiserror::Error)]
#[error("invalid base64url encoding: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Encode bytes as base64url (RFC 4648) without padding.
#[must_use]
pub fn encode_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a base64url-encoded string (RFC 4648) to bytes.
///
/// # Errors
/// Returns `DecodeError` if the input is not valid base64url
pub fn decode_base64url(encoded: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded).map_err(DecodeError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_base64url() {
        let bytes = b"Hello";
        let encoded = encode_base64url(bytes);
        assert_eq!(encoded, "SGVsbG8");
    }

    #[test]
    fn test_decode_base64url() {
        let encoded = "SGVsbG8";
        let decoded = decode_base64url(encoded).expect("decode should succeed");
        assert_eq!(decoded, b"Hello");
    }

    #[test]
    fn test_roundtrip() {
        let original = b"test data for roundtrip";
        let encoded = encode_base64url(original);
        let decoded = decode_base64url(&encoded).expect("decode should succeed");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_invalid_base64url() {
        let invalid = "not valid base64!!!";
        let result = decode_base64url(invalid);
        assert!(result.is_err());
    }
}
