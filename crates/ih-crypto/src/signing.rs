//! HMAC-SHA256 payload signing for one-time state tokens
//!
//! Signature comparison goes through the MAC's own verifier so it is
//! constant-time; callers must never compare signature bytes with `==`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Byte length of a payload signature.
pub const SIGNATURE_LEN: usize = 32;

/// Sign a payload with HMAC-SHA256 under the given secret.
///
/// # Panics
///
/// Never panics; `Hmac` accepts keys of any length.
#[must_use]
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> [u8; SIGNATURE_LEN] {
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(payload);
    mac.finalize().into_bytes().into()
}

/// Verify a payload signature in constant time.
#[must_use]
pub fn verify_payload(secret: &[u8], payload: &[u8], signature: &[u8]) -> bool {
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(secret).expect("hmac accepts any key length");
    mac.update(payload);
    mac.verify_slice(signature).is_ok()
}
