//! Validated encryption wrappers for PII field categories
//!
//! Each category validates its canonical digit form before the codec is ever
//! touched, so malformed input can never become an opaque blob that passes
//! later format checks vacuously. Decryption exposes either a masked display
//! string or the canonical formatted value; callers never decrypt-then-mask
//! themselves, keeping full-value exposure auditable to one code path.

use std::fmt;

use crate::blob::EncryptedBlob;
use crate::codec::{DecryptionError, EncryptionError, FieldCipher};

/// Mask character used for hidden digits.
const MASK: char = 'X';

/// PII field categories with their canonical digit counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiKind {
    /// Social security number, 9 digits, formatted `AAA-GG-SSSS`.
    Ssn,
    /// Employer identification number, 9 digits, formatted `NN-NNNNNNN`.
    Ein,
    /// ABA routing number, 9 digits.
    RoutingNumber,
    /// Bank account number, 4 to 17 digits.
    BankAccount,
}

impl PiiKind {
    /// Inclusive digit-count bounds for this category.
    #[must_use]
    pub const fn digit_bounds(self) -> (usize, usize) {
        match self {
            Self::Ssn | Self::Ein | Self::RoutingNumber => (9, 9),
            Self::BankAccount => (4, 17),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Ssn => "SSN",
            Self::Ein => "EIN",
            Self::RoutingNumber => "routing number",
            Self::BankAccount => "bank account number",
        }
    }

    /// Canonical formatted form of a valid digit string.
    fn format_full(self, digits: &str) -> String {
        match self {
            Self::Ssn => format!("{}-{}-{}", &digits[..3], &digits[3..5], &digits[5..]),
            Self::Ein => format!("{}-{}", &digits[..2], &digits[2..]),
            Self::RoutingNumber | Self::BankAccount => digits.to_string(),
        }
    }

    /// Masked display form: last 4 digits visible, the rest replaced.
    fn format_masked(self, digits: &str) -> String {
        let last4 = &digits[digits.len() - 4..];
        match self {
            Self::Ssn => format!("{m}{m}{m}-{m}{m}-{last4}", m = MASK),
            Self::Ein => format!("{m}{m}-{m}{m}{m}{last4}", m = MASK),
            Self::RoutingNumber | Self::BankAccount => {
                let hidden: String = std::iter::repeat(MASK)
                    .take(digits.len() - 4)
                    .collect();
                format!("{hidden}{last4}")
            }
        }
    }
}

impl fmt::Display for PiiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How much of a decrypted value the caller gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exposure {
    /// Last 4 digits only, the rest replaced by a fixed mask character.
    Masked,
    /// The canonical formatted value.
    Full,
}

/// Rejected before encryption: the input does not match the category shape.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind} must be {} digits, found {found}", bounds_text(.kind))]
pub struct PiiValidationError {
    pub kind: PiiKind,
    pub found: usize,
}

fn bounds_text(kind: &PiiKind) -> String {
    let kind = *kind;
    let (min, max) = kind.digit_bounds();
    if min == max {
        format!("exactly {min}")
    } else {
        format!("{min} to {max}")
    }
}

/// Errors from PII encryption and reveal operations.
#[derive(Debug, thiserror::Error)]
pub enum PiiError {
    #[error(transparent)]
    Validation(#[from] PiiValidationError),
    #[error(transparent)]
    Encryption(#[from] EncryptionError),
    #[error(transparent)]
    Decryption(#[from] DecryptionError),
}

/// Validated encrypt/reveal wrapper over [`FieldCipher`] for PII categories.
#[derive(Clone)]
pub struct PiiCodec {
    cipher: FieldCipher,
}

impl PiiCodec {
    #[must_use]
    pub fn new(cipher: FieldCipher) -> Self {
        Self { cipher }
    }

    /// Strip separators and enforce the category's digit count.
    ///
    /// # Errors
    ///
    /// Returns [`PiiValidationError`] when the digit count is out of bounds.
    pub fn canonicalize(kind: PiiKind, raw: &str) -> Result<String, PiiValidationError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        let (min, max) = kind.digit_bounds();
        if digits.len() < min || digits.len() > max {
            return Err(PiiValidationError {
                kind,
                found: digits.len(),
            });
        }
        Ok(digits)
    }

    /// Validate and encrypt a PII value.
    ///
    /// Validation happens strictly before the codec is invoked.
    ///
    /// # Errors
    ///
    /// Returns [`PiiError::Validation`] for inputs with the wrong digit
    /// count, or [`PiiError::Encryption`] if the cipher fails.
    pub fn encrypt(&self, kind: PiiKind, raw: &str) -> Result<EncryptedBlob, PiiError> {
        let digits = Self::canonicalize(kind, raw)?;
        Ok(self.cipher.encrypt(&digits)?)
    }

    /// Decrypt a stored value into its masked or full display form.
    ///
    /// # Errors
    ///
    /// Returns [`PiiError::Decryption`] when the stored value is malformed
    /// or fails authentication, and [`PiiError::Validation`] when the
    /// decrypted digits no longer match the category shape (a stored value
    /// written under a different category).
    pub fn reveal(&self, kind: PiiKind, stored: &str, exposure: Exposure) -> Result<String, PiiError> {
        let digits = self.cipher.decrypt_str(stored)?;
        // Re-check the shape so slicing below cannot go out of bounds on a
        // value that was encrypted under a different category.
        let digits = Self::canonicalize(kind, &digits)?;
        Ok(match exposure {
            Exposure::Masked => kind.format_masked(&digits),
            Exposure::Full => kind.format_full(&digits),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FIELD_KEY_LEN;

    fn codec() -> PiiCodec {
        PiiCodec::new(FieldCipher::new(&[11u8; FIELD_KEY_LEN]))
    }

    #[test]
    fn ssn_round_trip_full_and_masked() {
        let codec = codec();
        let stored = codec.encrypt(PiiKind::Ssn, "123-45-6789").unwrap().to_string();

        let full = codec.reveal(PiiKind::Ssn, &stored, Exposure::Full).unwrap();
        assert_eq!(full, "123-45-6789");

        let masked = codec.reveal(PiiKind::Ssn, &stored, Exposure::Masked).unwrap();
        assert_eq!(masked, "XXX-XX-6789");
    }

    #[test]
    fn ein_round_trip_full_and_masked() {
        let codec = codec();
        let stored = codec.encrypt(PiiKind::Ein, "12-3456789").unwrap().to_string();

        assert_eq!(
            codec.reveal(PiiKind::Ein, &stored, Exposure::Full).unwrap(),
            "12-3456789"
        );
        assert_eq!(
            codec.reveal(PiiKind::Ein, &stored, Exposure::Masked).unwrap(),
            "XX-XXX6789"
        );
    }

    #[test]
    fn routing_number_masked() {
        let codec = codec();
        let stored = codec
            .encrypt(PiiKind::RoutingNumber, "041000124")
            .unwrap()
            .to_string();
        assert_eq!(
            codec
                .reveal(PiiKind::RoutingNumber, &stored, Exposure::Masked)
                .unwrap(),
            "XXXXX0124"
        );
    }

    #[test]
    fn bank_account_variable_length() {
        let codec = codec();
        let stored = codec
            .encrypt(PiiKind::BankAccount, "000123456789")
            .unwrap()
            .to_string();
        assert_eq!(
            codec
                .reveal(PiiKind::BankAccount, &stored, Exposure::Masked)
                .unwrap(),
            "XXXXXXXX6789"
        );
        assert_eq!(
            codec
                .reveal(PiiKind::BankAccount, &stored, Exposure::Full)
                .unwrap(),
            "000123456789"
        );
    }

    #[test]
    fn short_ssn_rejected_before_encryption() {
        let result = codec().encrypt(PiiKind::Ssn, "12345");
        match result {
            Err(PiiError::Validation(e)) => {
                assert_eq!(e.kind, PiiKind::Ssn);
                assert_eq!(e.found, 5);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn separators_are_stripped_before_validation() {
        // Same digits, different separators, both valid.
        let codec = codec();
        assert!(codec.encrypt(PiiKind::Ssn, "123 45 6789").is_ok());
        assert!(codec.encrypt(PiiKind::Ssn, "123456789").is_ok());
    }

    #[test]
    fn bank_account_bounds() {
        let codec = codec();
        assert!(codec.encrypt(PiiKind::BankAccount, "123").is_err());
        assert!(codec.encrypt(PiiKind::BankAccount, "1234").is_ok());
        assert!(codec.encrypt(PiiKind::BankAccount, &"9".repeat(17)).is_ok());
        assert!(codec.encrypt(PiiKind::BankAccount, &"9".repeat(18)).is_err());
    }

    #[test]
    fn reveal_rejects_cross_category_value() {
        // A 12-digit bank account cannot be revealed as an SSN.
        let codec = codec();
        let stored = codec
            .encrypt(PiiKind::BankAccount, "000123456789")
            .unwrap()
            .to_string();
        let result = codec.reveal(PiiKind::Ssn, &stored, Exposure::Full);
        assert!(matches!(result, Err(PiiError::Validation(_))));
    }

    #[test]
    fn reveal_rejects_tampered_blob() {
        let codec = codec();
        let stored = codec.encrypt(PiiKind::Ssn, "123456789").unwrap().to_string();
        let mut tampered = stored.clone();
        let replacement = if tampered.ends_with('0') { '1' } else { '0' };
        tampered.pop();
        tampered.push(replacement);
        assert!(matches!(
            codec.reveal(PiiKind::Ssn, &tampered, Exposure::Full),
            Err(PiiError::Decryption(_))
        ));
    }
}
