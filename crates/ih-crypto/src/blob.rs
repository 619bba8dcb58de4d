//! Serialized format for encrypted field values
//!
//! An encrypted field is stored as three colon-separated hex segments:
//! `iv (16 bytes) : auth tag (16 bytes) : ciphertext (variable)`. The format
//! is self-describing enough that stored columns can be tested for "already
//! encrypted" without attempting decryption.

use std::fmt;

/// Byte length of the initialization vector segment.
pub const IV_LEN: usize = 16;

/// Byte length of the GCM authentication tag segment.
pub const TAG_LEN: usize = 16;

/// Errors from parsing a serialized encrypted value.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum BlobFormatError {
    #[error("expected 3 colon-separated segments, found {0}")]
    SegmentCount(usize),
    #[error("segment is not valid hex")]
    InvalidHex,
    #[error("iv must be exactly {IV_LEN} bytes, found {0}")]
    IvLength(usize),
    #[error("auth tag must be exactly {TAG_LEN} bytes, found {0}")]
    TagLength(usize),
    #[error("ciphertext segment is empty")]
    EmptyCiphertext,
}

/// A parsed encrypted field value.
///
/// Only [`EncryptedBlob::parse`] constructs this from stored data, so any
/// instance is guaranteed to satisfy the segment-length invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub(crate) iv: [u8; IV_LEN],
    pub(crate) tag: [u8; TAG_LEN],
    pub(crate) ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    pub(crate) fn new(iv: [u8; IV_LEN], tag: [u8; TAG_LEN], ciphertext: Vec<u8>) -> Self {
        Self {
            iv,
            tag,
            ciphertext,
        }
    }

    /// Parse a stored string into its three segments, enforcing lengths.
    ///
    /// # Errors
    ///
    /// Returns a [`BlobFormatError`] if the segment count is wrong, any
    /// segment is not hex, the IV or tag length is off, or the ciphertext is
    /// empty.
    pub fn parse(value: &str) -> Result<Self, BlobFormatError> {
        let segments: Vec<&str> = value.split(':').collect();
        if segments.len() != 3 {
            return Err(BlobFormatError::SegmentCount(segments.len()));
        }

        let iv_bytes = hex::decode(segments[0]).map_err(|_| BlobFormatError::InvalidHex)?;
        let tag_bytes = hex::decode(segments[1]).map_err(|_| BlobFormatError::InvalidHex)?;
        let ciphertext = hex::decode(segments[2]).map_err(|_| BlobFormatError::InvalidHex)?;

        let iv: [u8; IV_LEN] = iv_bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| BlobFormatError::IvLength(bytes.len()))?;
        let tag: [u8; TAG_LEN] = tag_bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| BlobFormatError::TagLength(bytes.len()))?;

        if ciphertext.is_empty() {
            return Err(BlobFormatError::EmptyCiphertext);
        }

        Ok(Self {
            iv,
            tag,
            ciphertext,
        })
    }

    /// The initialization vector segment.
    #[must_use]
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// The authentication tag segment.
    #[must_use]
    pub fn tag(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }

    /// The ciphertext segment.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }
}

impl fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            hex::encode(self.iv),
            hex::encode(self.tag),
            hex::encode(&self.ciphertext)
        )
    }
}

/// Structural check: does a stored value look like an encrypted blob?
///
/// Used to decide whether a legacy plaintext column value still needs
/// encryption on read. Plaintext that merely contains colons does not pass
/// because the segment lengths and hex alphabet are also enforced.
#[must_use]
pub fn is_encrypted(value: &str) -> bool {
    EncryptedBlob::parse(value).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_blob_string() -> String {
        EncryptedBlob::new([0xab; IV_LEN], [0xcd; TAG_LEN], vec![1, 2, 3]).to_string()
    }

    #[test]
    fn parse_round_trips_display() {
        let original = EncryptedBlob::new([7; IV_LEN], [9; TAG_LEN], vec![4, 5, 6, 7]);
        let parsed = EncryptedBlob::parse(&original.to_string()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert_eq!(
            EncryptedBlob::parse("aabb:ccdd"),
            Err(BlobFormatError::SegmentCount(2))
        );
        let four = format!("{}:ffff", valid_blob_string());
        assert_eq!(
            EncryptedBlob::parse(&four),
            Err(BlobFormatError::SegmentCount(4))
        );
    }

    #[test]
    fn rejects_short_iv() {
        let value = format!("{}:{}:{}", "ab".repeat(8), "cd".repeat(16), "0102");
        assert_eq!(
            EncryptedBlob::parse(&value),
            Err(BlobFormatError::IvLength(8))
        );
    }

    #[test]
    fn rejects_short_tag() {
        let value = format!("{}:{}:{}", "ab".repeat(16), "cd".repeat(4), "0102");
        assert_eq!(
            EncryptedBlob::parse(&value),
            Err(BlobFormatError::TagLength(4))
        );
    }

    #[test]
    fn rejects_non_hex_segments() {
        let value = format!("{}:{}:{}", "zz".repeat(16), "cd".repeat(16), "0102");
        assert_eq!(
            EncryptedBlob::parse(&value),
            Err(BlobFormatError::InvalidHex)
        );
    }

    #[test]
    fn rejects_empty_ciphertext() {
        let value = format!("{}:{}:", "ab".repeat(16), "cd".repeat(16));
        assert_eq!(
            EncryptedBlob::parse(&value),
            Err(BlobFormatError::EmptyCiphertext)
        );
    }

    #[test]
    fn is_encrypted_accepts_valid_blob() {
        assert!(is_encrypted(&valid_blob_string()));
    }

    #[test]
    fn is_encrypted_rejects_plaintext_with_colons() {
        // Plaintext values with colons must not be mistaken for blobs.
        assert!(!is_encrypted("routing:account:1234"));
        assert!(!is_encrypted("12:34:56"));
        assert!(!is_encrypted(""));
        assert!(!is_encrypted("123-45-6789"));
    }
}
