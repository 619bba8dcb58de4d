//! Step-up re-authentication for sensitive mutations
//!
//! A step-up grant is a short-lived, single-use proof that the user just
//! re-verified their primary credential (password or TOTP). Routes that
//! mutate PII, manage users, or export financials require one, validate it,
//! and consume it before performing the mutation's side effects — so a grant
//! authorizes at most one sensitive action.
//!
//! Grants are signed tokens backed by a process-local registry: a
//! syntactically valid, unexpired token whose id is no longer registered
//! (consumed or revoked) is rejected. The registry lives behind
//! [`ReauthRegistry`] so a multi-instance deployment can swap the in-memory
//! implementation for a shared store (the database, or a cache) without
//! touching callers. Until then, running more than one instance is a known
//! scaling boundary: a grant minted on one instance will not validate on
//! another.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use totp_rs::{Secret, TOTP};
use uuid::Uuid;

/// How the user re-proved their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReauthMethod {
    Password,
    Totp,
}

/// Errors from step-up operations.
///
/// `CredentialsRejected` and `InvalidToken` are expected-path outcomes
/// (wrong password, stale grant), not system faults; only `Database` and
/// `Signing` indicate infrastructure problems.
#[derive(Debug, thiserror::Error)]
pub enum ReauthError {
    #[error("credentials rejected")]
    CredentialsRejected,
    #[error("re-authentication grant is invalid")]
    InvalidToken,
    #[error("grant signing failed")]
    Signing,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A freshly minted grant, returned to the client.
#[derive(Debug, Clone)]
pub struct IssuedReauthToken {
    pub token: String,
    pub expires_in_secs: u64,
}

/// The outcome of validating a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReauthGrant {
    pub user_id: Uuid,
    pub method: ReauthMethod,
}

/// Registry entry for an outstanding grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Server-side record of outstanding grants.
///
/// Presence is necessary for validity: removing an entry (consume, revoke,
/// sweep) invalidates the corresponding signed token immediately.
#[async_trait]
pub trait ReauthRegistry: Send + Sync {
    async fn insert(&self, token_id: Uuid, entry: RegistryEntry);
    async fn get(&self, token_id: Uuid) -> Option<RegistryEntry>;
    /// Remove an entry. Returns false when it was already gone.
    async fn remove(&self, token_id: Uuid) -> bool;
    /// Remove every entry for a user. Returns the count removed.
    async fn revoke_user(&self, user_id: Uuid) -> usize;
    /// Remove entries expired as of `now`. Returns the count removed.
    async fn sweep(&self, now: DateTime<Utc>) -> usize;
}

/// Process-local registry. Single-instance deployments only.
#[derive(Default)]
pub struct InMemoryReauthRegistry {
    entries: RwLock<HashMap<Uuid, RegistryEntry>>,
}

impl InMemoryReauthRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReauthRegistry for InMemoryReauthRegistry {
    async fn insert(&self, token_id: Uuid, entry: RegistryEntry) {
        self.entries.write().await.insert(token_id, entry);
    }

    async fn get(&self, token_id: Uuid) -> Option<RegistryEntry> {
        self.entries.read().await.get(&token_id).copied()
    }

    async fn remove(&self, token_id: Uuid) -> bool {
        self.entries.write().await.remove(&token_id).is_some()
    }

    async fn revoke_user(&self, user_id: Uuid) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.user_id != user_id);
        before - entries.len()
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ReauthClaims {
    jti: Uuid,
    sub: Uuid,
    iat: i64,
    exp: i64,
    method: ReauthMethod,
}

/// Mints, validates and consumes signed step-up grants.
///
/// Credential verification lives in [`StepUpReauthService`]; this type is
/// the shared issuance routine plus the registry-backed token lifecycle,
/// kept separate so the token mechanics are testable without a database.
#[derive(Clone)]
pub struct ReauthTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    registry: Arc<dyn ReauthRegistry>,
    ttl: Duration,
}

impl ReauthTokenIssuer {
    #[must_use]
    pub fn new(secret: &[u8], registry: Arc<dyn ReauthRegistry>, ttl_secs: u32) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            registry,
            ttl: Duration::seconds(i64::from(ttl_secs)),
        }
    }

    /// Mint a grant for a user whose credentials were just re-verified.
    ///
    /// This performs no credential check itself; callers are the `verify_*`
    /// entry points.
    ///
    /// # Errors
    ///
    /// Returns [`ReauthError::Signing`] if token encoding fails.
    pub async fn issue(
        &self,
        user_id: Uuid,
        method: ReauthMethod,
    ) -> Result<IssuedReauthToken, ReauthError> {
        let now = Utc::now();
        self.issue_expiring_at(user_id, method, now, now + self.ttl)
            .await
    }

    async fn issue_expiring_at(
        &self,
        user_id: Uuid,
        method: ReauthMethod,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedReauthToken, ReauthError> {
        let token_id = Uuid::new_v4();
        let claims = ReauthClaims {
            jti: token_id,
            sub: user_id,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            method,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| {
                tracing::error!(error = %err, "failed to sign step-up grant");
                ReauthError::Signing
            })?;

        self.registry
            .insert(
                token_id,
                RegistryEntry {
                    user_id,
                    expires_at,
                },
            )
            .await;

        tracing::info!(%user_id, %token_id, ?method, "issued step-up grant");

        let expires_in_secs = u64::try_from((expires_at - issued_at).num_seconds()).unwrap_or(0);
        Ok(IssuedReauthToken {
            token,
            expires_in_secs,
        })
    }

    /// Validate a grant without consuming it.
    ///
    /// The signature and expiry checks come from the token itself; registry
    /// presence is additionally required, so consumed and revoked grants
    /// fail here no matter how fresh they look.
    ///
    /// # Errors
    ///
    /// Returns [`ReauthError::InvalidToken`] for every rejection; callers
    /// get no distinction between expired, consumed and revoked.
    pub async fn validate(
        &self,
        token: &str,
        expected_user: Option<Uuid>,
    ) -> Result<ReauthGrant, ReauthError> {
        let Some(claims) = self.decode(token) else {
            return Err(ReauthError::InvalidToken);
        };

        let Some(entry) = self.registry.get(claims.jti).await else {
            tracing::warn!(token_id = %claims.jti, user_id = %claims.sub,
                "step-up grant not in registry (consumed or revoked)");
            return Err(ReauthError::InvalidToken);
        };

        if entry.user_id != claims.sub {
            tracing::warn!(token_id = %claims.jti, "step-up grant registry entry user mismatch");
            return Err(ReauthError::InvalidToken);
        }

        if let Some(expected) = expected_user {
            if expected != claims.sub {
                tracing::warn!(token_id = %claims.jti, expected = %expected, actual = %claims.sub,
                    "step-up grant presented for a different user");
                return Err(ReauthError::InvalidToken);
            }
        }

        Ok(ReauthGrant {
            user_id: claims.sub,
            method: claims.method,
        })
    }

    /// Consume a grant. Returns false when it was already consumed, revoked
    /// or never valid — calling twice returns false the second time.
    pub async fn consume(&self, token: &str) -> bool {
        match self.decode(token) {
            Some(claims) => {
                let removed = self.registry.remove(claims.jti).await;
                if removed {
                    tracing::info!(token_id = %claims.jti, user_id = %claims.sub,
                        "consumed step-up grant");
                }
                removed
            }
            None => false,
        }
    }

    /// Invalidate every outstanding grant for a user, e.g. after a
    /// credential change. Returns the count revoked.
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> usize {
        let revoked = self.registry.revoke_user(user_id).await;
        if revoked > 0 {
            tracing::info!(%user_id, revoked, "revoked outstanding step-up grants");
        }
        revoked
    }

    /// Drop expired registry entries. Returns the count removed.
    pub async fn sweep_expired(&self) -> usize {
        self.registry.sweep(Utc::now()).await
    }

    fn decode(&self, token: &str) -> Option<ReauthClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // A five-minute grant with the default 60s leeway would stretch the
        // window by 20%; expiry is exact here.
        validation.leeway = 0;
        jsonwebtoken::decode::<ReauthClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .ok()
    }
}

/// Re-verifies primary credentials and mints step-up grants.
#[derive(Clone)]
pub struct StepUpReauthService {
    pool: PgPool,
    tokens: ReauthTokenIssuer,
}

impl StepUpReauthService {
    #[must_use]
    pub fn new(pool: PgPool, tokens: ReauthTokenIssuer) -> Self {
        Self { pool, tokens }
    }

    /// The token lifecycle half, for callers that only validate or consume.
    #[must_use]
    pub fn tokens(&self) -> &ReauthTokenIssuer {
        &self.tokens
    }

    /// Re-verify the user's password and mint a grant.
    ///
    /// Failures here are logged as their own event: the caller already holds
    /// a valid session, so repeated step-up failures are a stronger
    /// account-takeover signal than ordinary login failures.
    ///
    /// # Errors
    ///
    /// Returns [`ReauthError::CredentialsRejected`] for a wrong password or
    /// unknown user, [`ReauthError::Database`] on infrastructure failure.
    pub async fn verify_password(
        &self,
        user_id: Uuid,
        password: &str,
    ) -> Result<IssuedReauthToken, ReauthError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT password_hash FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((stored_hash,)) = row else {
            tracing::warn!(%user_id, "step-up password check for unknown user");
            return Err(ReauthError::CredentialsRejected);
        };

        let parsed = PasswordHash::new(&stored_hash).map_err(|_| {
            tracing::error!(%user_id, "stored password hash is not a valid PHC string");
            ReauthError::CredentialsRejected
        })?;

        if Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_err()
        {
            tracing::warn!(%user_id, "step-up password verification failed");
            return Err(ReauthError::CredentialsRejected);
        }

        self.tokens.issue(user_id, ReauthMethod::Password).await
    }

    /// Re-verify a TOTP code against the user's enrolled secret and mint a
    /// grant.
    ///
    /// # Errors
    ///
    /// Returns [`ReauthError::CredentialsRejected`] for a wrong code, an
    /// unenrolled user, or a corrupt stored secret;
    /// [`ReauthError::Database`] on infrastructure failure.
    pub async fn verify_totp(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<IssuedReauthToken, ReauthError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT totp_secret FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((Some(encoded_secret),)) = row else {
            tracing::warn!(%user_id, "step-up TOTP check without an enrolled secret");
            return Err(ReauthError::CredentialsRejected);
        };

        let secret_bytes = Secret::Encoded(encoded_secret).to_bytes().map_err(|_| {
            tracing::error!(%user_id, "stored TOTP secret is not valid base32");
            ReauthError::CredentialsRejected
        })?;

        let totp = TOTP::new(totp_rs::Algorithm::SHA1, 6, 1, 30, secret_bytes).map_err(|_| {
            tracing::error!(%user_id, "stored TOTP secret rejected by generator");
            ReauthError::CredentialsRejected
        })?;

        let matches = totp.check_current(code).map_err(|err| {
            tracing::error!(%user_id, error = %err, "system clock unavailable for TOTP check");
            ReauthError::CredentialsRejected
        })?;

        if !matches {
            tracing::warn!(%user_id, "step-up TOTP verification failed");
            return Err(ReauthError::CredentialsRejected);
        }

        self.tokens.issue(user_id, ReauthMethod::Totp).await
    }

    /// Validate a grant, optionally pinning it to an expected user.
    ///
    /// # Errors
    ///
    /// Returns [`ReauthError::InvalidToken`] for any rejection.
    pub async fn validate_reauth_token(
        &self,
        token: &str,
        expected_user: Option<Uuid>,
    ) -> Result<ReauthGrant, ReauthError> {
        self.tokens.validate(token, expected_user).await
    }

    /// Consume a grant; see [`ReauthTokenIssuer::consume`].
    pub async fn consume_reauth_token(&self, token: &str) -> bool {
        self.tokens.consume(token).await
    }

    /// Revoke all outstanding grants for a user.
    pub async fn revoke_all_tokens_for_user(&self, user_id: Uuid) -> usize {
        self.tokens.revoke_all_for_user(user_id).await
    }
}
