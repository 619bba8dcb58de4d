//! Authenticated encryption for field values
//!
//! AES-256-GCM with a 16-byte random IV per call and a fixed additional
//! authenticated data constant, so ciphertexts produced here cannot be
//! silently reinterpreted by another system sharing the key.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::blob::{BlobFormatError, EncryptedBlob, IV_LEN, TAG_LEN};

/// AES-256-GCM parameterized with a 16-byte nonce to match the stored format.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Required key length for the field cipher.
pub const FIELD_KEY_LEN: usize = 32;

/// Domain separator bound as AAD to every field ciphertext.
const FIELD_AAD: &[u8] = b"isohub-field-encryption:v1";

/// Errors from encrypting a field value.
#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("plaintext must not be empty")]
    EmptyPlaintext,
    #[error("cipher failure")]
    Cipher,
}

/// Errors from decrypting a field value.
///
/// Tag verification failure and AAD mismatch are indistinguishable by
/// construction; both surface as [`DecryptionError::Verification`]. No
/// partial plaintext is ever returned.
#[derive(Debug, thiserror::Error)]
pub enum DecryptionError {
    #[error("malformed encrypted value: {0}")]
    Malformed(#[from] BlobFormatError),
    #[error("authentication failed")]
    Verification,
    #[error("decrypted value is not valid utf-8")]
    Utf8,
}

/// Symmetric codec for encrypting opaque field strings.
///
/// Holds the expanded key; cloning is cheap enough to share across request
/// handlers. All operations are synchronous CPU work.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm16,
}

impl FieldCipher {
    /// Build a cipher from a 32-byte key.
    #[must_use]
    pub fn new(key: &[u8; FIELD_KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key)),
        }
    }

    /// Encrypt a plaintext field value.
    ///
    /// A fresh random IV is drawn per call; encrypting the same plaintext
    /// twice never yields the same blob.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError::EmptyPlaintext`] for empty input (an empty
    /// ciphertext segment would not round-trip through the stored format),
    /// or [`EncryptionError::Cipher`] if the underlying AEAD fails.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedBlob, EncryptionError> {
        if plaintext.is_empty() {
            return Err(EncryptionError::EmptyPlaintext);
        }

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let payload = Payload {
            msg: plaintext.as_bytes(),
            aad: FIELD_AAD,
        };

        let mut sealed = self
            .cipher
            .encrypt(Nonce::<U16>::from_slice(&iv), payload)
            .map_err(|_| EncryptionError::Cipher)?;

        // aes-gcm appends the tag to the ciphertext; split it back out so
        // the stored format keeps its three distinct segments.
        let split_at = sealed.len() - TAG_LEN;
        let tag_bytes = sealed.split_off(split_at);
        let tag: [u8; TAG_LEN] = tag_bytes
            .try_into()
            .map_err(|_| EncryptionError::Cipher)?;

        Ok(EncryptedBlob::new(iv, tag, sealed))
    }

    /// Decrypt a parsed blob back to the plaintext field value.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptionError::Verification`] when the tag does not
    /// authenticate (tampered ciphertext, wrong key, or wrong AAD), or
    /// [`DecryptionError::Utf8`] when the recovered bytes are not a string.
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<String, DecryptionError> {
        let mut sealed = blob.ciphertext().to_vec();
        sealed.extend_from_slice(blob.tag());

        let payload = Payload {
            msg: &sealed,
            aad: FIELD_AAD,
        };

        let plaintext = self
            .cipher
            .decrypt(Nonce::<U16>::from_slice(blob.iv()), payload)
            .map_err(|_| DecryptionError::Verification)?;

        String::from_utf8(plaintext).map_err(|_| DecryptionError::Utf8)
    }

    /// Parse and decrypt a stored string in one step.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptionError::Malformed`] if the stored value does not
    /// parse, otherwise the same failures as [`FieldCipher::decrypt`].
    pub fn decrypt_str(&self, stored: &str) -> Result<String, DecryptionError> {
        let blob = EncryptedBlob::parse(stored)?;
        self.decrypt(&blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: [u8; FIELD_KEY_LEN] = [42u8; FIELD_KEY_LEN];

    fn test_cipher() -> FieldCipher {
        FieldCipher::new(&TEST_KEY)
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = test_cipher();
        let blob = cipher.encrypt("123-45-6789").unwrap();
        let plaintext = cipher.decrypt(&blob).unwrap();
        assert_eq!(plaintext, "123-45-6789");
    }

    #[test]
    fn round_trip_through_stored_string() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("041000124").unwrap().to_string();
        assert_eq!(cipher.decrypt_str(&stored).unwrap(), "041000124");
    }

    #[test]
    fn fresh_iv_per_call() {
        let cipher = test_cipher();
        let first = cipher.encrypt("same input").unwrap();
        let second = cipher.encrypt("same input").unwrap();
        assert_ne!(first.iv(), second.iv());
        assert_ne!(first.to_string(), second.to_string());
    }

    #[test]
    fn tampered_ciphertext_fails_closed() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("123456789").unwrap().to_string();

        // Flip one hex character in the ciphertext segment.
        let mut chars: Vec<char> = stored.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();

        let result = cipher.decrypt_str(&tampered);
        assert!(matches!(result, Err(DecryptionError::Verification)));
    }

    #[test]
    fn tampered_tag_fails_closed() {
        let cipher = test_cipher();
        let blob = cipher.encrypt("123456789").unwrap();
        let mut tag = *blob.tag();
        tag[0] ^= 0x01;
        let tampered = EncryptedBlob::new(*blob.iv(), tag, blob.ciphertext().to_vec());

        let result = cipher.decrypt(&tampered);
        assert!(matches!(result, Err(DecryptionError::Verification)));
    }

    #[test]
    fn wrong_key_fails_closed() {
        let blob = test_cipher().encrypt("secret").unwrap();
        let other = FieldCipher::new(&[7u8; FIELD_KEY_LEN]);
        assert!(matches!(
            other.decrypt(&blob),
            Err(DecryptionError::Verification)
        ));
    }

    #[test]
    fn empty_plaintext_is_rejected() {
        let result = test_cipher().encrypt("");
        assert!(matches!(result, Err(EncryptionError::EmptyPlaintext)));
    }

    #[test]
    fn malformed_stored_value_is_distinguished() {
        let cipher = test_cipher();
        let result = cipher.decrypt_str("not:a:blob");
        assert!(matches!(result, Err(DecryptionError::Malformed(_))));
    }
}
