//! One-time OAuth state tokens for CSRF and replay prevention
//!
//! A state token binds an authorization-code flow to a specific agency and
//! user. It is double-bound: the opaque token carries an HMAC-SHA256
//! signature over its payload, and a matching row must exist server-side and
//! be consumed atomically. Forging the signature without database access
//! yields nothing, and a planted row without the signature is equally
//! useless.
//!
//! Per-nonce state machine: `issued → consumed` (terminal) or
//! `issued → expired` (terminal, via the periodic sweep). The consuming
//! `UPDATE … WHERE consumed = FALSE` is the sole source of truth for replay
//! detection; the database's row locking serializes concurrent validation
//! attempts, so this must never be reimplemented as an application-level
//! lock — multiple process instances may race.

use chrono::{DateTime, Duration, Utc};
use ih_crypto::{decode_base64url, encode_base64url, sign_payload, verify_payload};
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::PgPool;
use uuid::Uuid;

/// Byte length of the random nonce (hex-encoded in the payload).
const NONCE_LEN: usize = 32;

/// Errors from state-token operations.
///
/// The first five variants are deliberately distinct: each indicates a
/// different attack shape (CSRF, replay, cross-tenant injection) and is
/// logged separately, even though callers collapse them into one generic
/// "invalid or expired link" response.
#[derive(Debug, thiserror::Error)]
pub enum StateTokenError {
    #[error("state token is structurally malformed")]
    MalformedState,
    #[error("state token signature mismatch")]
    InvalidSignature,
    #[error("state token expired")]
    ExpiredState,
    #[error("state token already consumed")]
    ReplayDetected,
    #[error("state token tenant binding mismatch")]
    TamperedState,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StateTokenError {
    /// Caller-facing message. Every security-relevant rejection collapses to
    /// the same text so responses reveal nothing about whether a signature,
    /// a replay or a tenant mismatch tripped the check; the distinction
    /// lives in the server-side logs only.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Database(_) => "Something went wrong. Please try again.",
            _ => "This link is invalid or has expired.",
        }
    }
}

/// The identity a successfully validated state token was bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedState {
    pub nonce: String,
    pub agency_id: Uuid,
    pub user_id: Uuid,
}

/// Payload fields recovered from a structurally valid, signed, unexpired
/// token.
#[derive(Debug, PartialEq, Eq)]
struct ParsedState {
    nonce: String,
    agency_id: Uuid,
    user_id: Uuid,
}

/// Issues and validates one-time OAuth state tokens.
#[derive(Clone)]
pub struct OAuthStateService {
    pool: PgPool,
    secret: Vec<u8>,
    ttl: Duration,
}

impl OAuthStateService {
    #[must_use]
    pub fn new(pool: PgPool, secret: impl Into<Vec<u8>>, ttl_secs: u32) -> Self {
        Self {
            pool,
            secret: secret.into(),
            ttl: Duration::seconds(i64::from(ttl_secs)),
        }
    }

    /// Issue a state token bound to an agency and user.
    ///
    /// Persists the nonce row first; the signed token is only returned once
    /// the row exists, so a token the server hands out is always redeemable
    /// exactly once within its lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`StateTokenError::Database`] if the row cannot be persisted.
    pub async fn generate_state(
        &self,
        agency_id: Uuid,
        user_id: Uuid,
    ) -> Result<String, StateTokenError> {
        let expires_at = Utc::now() + self.ttl;
        self.generate_state_expiring_at(agency_id, user_id, expires_at)
            .await
    }

    /// Issue a state token with an explicit expiry. Exposed so expiry
    /// behavior is testable; production callers use [`Self::generate_state`].
    ///
    /// # Errors
    ///
    /// Returns [`StateTokenError::Database`] if the row cannot be persisted.
    pub async fn generate_state_expiring_at(
        &self,
        agency_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<String, StateTokenError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = hex::encode(nonce_bytes);

        sqlx::query(
            r"
            INSERT INTO oauth_states (nonce, agency_id, user_id, expires_at, consumed)
            VALUES ($1, $2, $3, $4, FALSE)
            ",
        )
        .bind(&nonce)
        .bind(agency_id)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(encode_token(
            &self.secret,
            &nonce,
            agency_id,
            user_id,
            expires_at.timestamp(),
        ))
    }

    /// Validate a state token and consume its nonce.
    ///
    /// Checks run in a fixed order, each with its own failure mode:
    /// structure, signature, expiry, single-use consumption, tenant binding.
    /// All five log distinctly; see [`StateTokenError`].
    ///
    /// # Errors
    ///
    /// Returns the specific [`StateTokenError`] for the first failed check.
    pub async fn validate_state(&self, token: &str) -> Result<ValidatedState, StateTokenError> {
        let result = self.validate_inner(token).await;
        if let Err(err) = &result {
            match err {
                StateTokenError::MalformedState => {
                    tracing::warn!("rejected malformed state token");
                }
                StateTokenError::InvalidSignature => {
                    tracing::warn!("rejected state token with bad signature (possible CSRF)");
                }
                StateTokenError::ExpiredState => {
                    tracing::info!("rejected expired state token");
                }
                StateTokenError::ReplayDetected => {
                    tracing::warn!("rejected replayed state token");
                }
                StateTokenError::TamperedState => {
                    tracing::warn!("rejected state token with mismatched tenant binding");
                }
                StateTokenError::Database(db_err) => {
                    tracing::error!(error = %db_err, "state validation failed on database error");
                }
            }
        }
        result
    }

    async fn validate_inner(&self, token: &str) -> Result<ValidatedState, StateTokenError> {
        let parsed = parse_and_verify(&self.secret, token, Utc::now())?;

        // Atomic single-use consumption: the affected-row count is the sole
        // source of truth for replay. Zero rows means the nonce was already
        // consumed, was never issued, or was swept.
        let row: Option<(Uuid, Uuid)> = sqlx::query_as(
            r"
            UPDATE oauth_states
            SET consumed = TRUE
            WHERE nonce = $1 AND consumed = FALSE
            RETURNING agency_id, user_id
            ",
        )
        .bind(&parsed.nonce)
        .fetch_optional(&self.pool)
        .await?;

        let Some((row_agency, row_user)) = row else {
            return Err(StateTokenError::ReplayDetected);
        };

        // The stored binding must agree with the signed payload. A mismatch
        // means a token and a row were stitched together across tenants.
        if row_agency != parsed.agency_id || row_user != parsed.user_id {
            tracing::warn!(
                nonce = %parsed.nonce,
                payload_agency = %parsed.agency_id,
                stored_agency = %row_agency,
                "state token payload does not match stored binding"
            );
            return Err(StateTokenError::TamperedState);
        }

        Ok(ValidatedState {
            nonce: parsed.nonce,
            agency_id: parsed.agency_id,
            user_id: parsed.user_id,
        })
    }

    /// Delete state rows past their expiry. Returns the count removed.
    ///
    /// Idempotent and safe to run concurrently with active validations: it
    /// only ever removes rows that validation would reject as expired.
    ///
    /// # Errors
    ///
    /// Returns [`StateTokenError::Database`] on query failure.
    pub async fn cleanup_expired_states(&self) -> Result<u64, StateTokenError> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Build the signed opaque token: `base64url(payload ":" hex(hmac))` where
/// payload is `nonce:agency:user:expiry_unix`.
fn encode_token(
    secret: &[u8],
    nonce: &str,
    agency_id: Uuid,
    user_id: Uuid,
    expires_at: i64,
) -> String {
    let payload = format!("{nonce}:{agency_id}:{user_id}:{expires_at}");
    let signature = hex::encode(sign_payload(secret, payload.as_bytes()));
    encode_base64url(format!("{payload}:{signature}").as_bytes())
}

/// Structural, signature and expiry checks — everything that needs no
/// database round trip.
fn parse_and_verify(
    secret: &[u8],
    token: &str,
    now: DateTime<Utc>,
) -> Result<ParsedState, StateTokenError> {
    let decoded = decode_base64url(token).map_err(|_| StateTokenError::MalformedState)?;
    let decoded = String::from_utf8(decoded).map_err(|_| StateTokenError::MalformedState)?;

    let fields: Vec<&str> = decoded.split(':').collect();
    if fields.len() != 5 {
        return Err(StateTokenError::MalformedState);
    }

    // Signature covers the first four fields exactly as transmitted.
    let payload = decoded
        .rsplit_once(':')
        .map(|(payload, _)| payload)
        .ok_or(StateTokenError::MalformedState)?;
    let signature = hex::decode(fields[4]).map_err(|_| StateTokenError::InvalidSignature)?;
    if !verify_payload(secret, payload.as_bytes(), &signature) {
        return Err(StateTokenError::InvalidSignature);
    }

    // Past this point the payload is authenticated; parse failures can only
    // come from an issuer bug, but still fail closed.
    let nonce = fields[0].to_string();
    let agency_id = Uuid::parse_str(fields[1]).map_err(|_| StateTokenError::MalformedState)?;
    let user_id = Uuid::parse_str(fields[2]).map_err(|_| StateTokenError::MalformedState)?;
    let expires_at: i64 = fields[3]
        .parse()
        .map_err(|_| StateTokenError::MalformedState)?;

    if expires_at < now.timestamp() {
        return Err(StateTokenError::ExpiredState);
    }

    Ok(ParsedState {
        nonce,
        agency_id,
        user_id,
    })
}
