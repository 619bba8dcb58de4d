//! Startup resolution of security secrets
//!
//! All secret material is resolved here exactly once, so a missing or
//! malformed secret fails the process before it accepts traffic instead of
//! surfacing as a runtime error on some later request.

use ih_crypto::{FieldCipher, PiiCodec, FIELD_KEY_LEN};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::SecretsConfig;

/// Errors resolving secrets from configuration.
#[derive(Debug, thiserror::Error)]
pub enum KeyResolutionError {
    #[error("encryption key must be hex-encoded")]
    FieldKeyNotHex,
    #[error("encryption key must decode to exactly {FIELD_KEY_LEN} bytes, got {0}")]
    FieldKeyLength(usize),
    #[error("state secret must not be empty")]
    MissingStateSecret,
    #[error("reauth secret must not be empty")]
    MissingReauthSecret,
}

/// Resolved secret material for the security subsystem.
pub struct SecurityKeys {
    field_key: [u8; FIELD_KEY_LEN],
    ephemeral_field_key: bool,
    state_secret: Vec<u8>,
    reauth_secret: Vec<u8>,
}

impl SecurityKeys {
    /// Resolve all secrets from configuration.
    ///
    /// A missing encryption key falls back to a random per-process key: the
    /// service stays usable, but anything encrypted under it is unreadable
    /// after a restart, so the fallback warns loudly rather than silently.
    /// The signing secrets have no fallback at all.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyResolutionError`] if the encryption key is present but
    /// malformed, or either signing secret is empty.
    pub fn from_config(secrets: &SecretsConfig) -> Result<Self, KeyResolutionError> {
        if secrets.state_secret.is_empty() {
            return Err(KeyResolutionError::MissingStateSecret);
        }
        if secrets.reauth_secret.is_empty() {
            return Err(KeyResolutionError::MissingReauthSecret);
        }

        let (field_key, ephemeral_field_key) = match &secrets.encryption_key {
            Some(encoded) => {
                let bytes =
                    hex::decode(encoded).map_err(|_| KeyResolutionError::FieldKeyNotHex)?;
                let key: [u8; FIELD_KEY_LEN] = bytes
                    .try_into()
                    .map_err(|b: Vec<u8>| KeyResolutionError::FieldKeyLength(b.len()))?;
                (key, false)
            }
            None => {
                tracing::warn!(
                    "no encryption key configured; generated an ephemeral key — \
                     encrypted fields will NOT be readable after a restart"
                );
                let mut key = [0u8; FIELD_KEY_LEN];
                OsRng.fill_bytes(&mut key);
                (key, true)
            }
        };

        Ok(Self {
            field_key,
            ephemeral_field_key,
            state_secret: secrets.state_secret.clone().into_bytes(),
            reauth_secret: secrets.reauth_secret.clone().into_bytes(),
        })
    }

    /// Whether the field key was generated at startup rather than configured.
    #[must_use]
    pub fn is_field_key_ephemeral(&self) -> bool {
        self.ephemeral_field_key
    }

    /// Build the field cipher for this process's key.
    #[must_use]
    pub fn field_cipher(&self) -> FieldCipher {
        FieldCipher::new(&self.field_key)
    }

    /// Build the validated PII codec for this process's key.
    #[must_use]
    pub fn pii_codec(&self) -> PiiCodec {
        PiiCodec::new(self.field_cipher())
    }

    /// HMAC secret for one-time OAuth state tokens.
    #[must_use]
    pub fn state_secret(&self) -> &[u8] {
        &self.state_secret
    }

    /// Signing secret for step-up re-authentication grants.
    #[must_use]
    pub fn reauth_secret(&self) -> &[u8] {
        &self.reauth_secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(encryption_key: Option<&str>) -> SecretsConfig {
        SecretsConfig {
            encryption_key: encryption_key.map(String::from),
            state_secret: "state-secret".into(),
            reauth_secret: "reauth-secret".into(),
        }
    }

    #[test]
    fn configured_key_is_used_verbatim() {
        let keys = SecurityKeys::from_config(&secrets(Some(&"ab".repeat(32)))).unwrap();
        assert!(!keys.is_field_key_ephemeral());
        assert_eq!(keys.field_key, [0xab; FIELD_KEY_LEN]);
    }

    #[test]
    fn absent_key_falls_back_to_ephemeral() {
        let keys = SecurityKeys::from_config(&secrets(None)).unwrap();
        assert!(keys.is_field_key_ephemeral());
        // Two processes must never agree on an ephemeral key.
        let other = SecurityKeys::from_config(&secrets(None)).unwrap();
        assert_ne!(keys.field_key, other.field_key);
    }

    #[test]
    fn malformed_key_is_rejected() {
        let result = SecurityKeys::from_config(&secrets(Some("zz")));
        assert!(matches!(result, Err(KeyResolutionError::FieldKeyNotHex)));

        let result = SecurityKeys::from_config(&secrets(Some("aabb")));
        assert!(matches!(
            result,
            Err(KeyResolutionError::FieldKeyLength(2))
        ));
    }

    #[test]
    fn missing_signing_secrets_are_hard_errors() {
        let mut config = secrets(None);
        config.state_secret = String::new();
        assert!(matches!(
            SecurityKeys::from_config(&config),
            Err(KeyResolutionError::MissingStateSecret)
        ));

        let mut config = secrets(None);
        config.reauth_secret = String::new();
        assert!(matches!(
            SecurityKeys::from_config(&config),
            Err(KeyResolutionError::MissingReauthSecret)
        ));
    }

    #[test]
    fn ciphers_round_trip_under_resolved_key() {
        let keys = SecurityKeys::from_config(&secrets(Some(&"cd".repeat(32)))).unwrap();
        let cipher = keys.field_cipher();
        let blob = cipher.encrypt("123456789").unwrap();
        assert_eq!(cipher.decrypt(&blob).unwrap(), "123456789");
    }
}
