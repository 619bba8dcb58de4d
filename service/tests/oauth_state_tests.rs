//! Database integration tests for one-time OAuth state tokens.
//!
//! These exercise the double-binding between the signed token and the
//! persisted row: replay via atomic consumption, expiry, tenant tampering,
//! and the periodic cleanup sweep.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use chrono::{Duration, Utc};
use common::test_db::get_test_db;
use ih_crypto::{decode_base64url, encode_base64url, sign_payload};
use ih_test_macros::shared_runtime_test;
use isohub_api::security::{OAuthStateService, StateTokenError};
use sqlx::PgPool;
use uuid::Uuid;

const SECRET: &[u8] = b"integration-state-secret";

fn service(pool: &PgPool) -> OAuthStateService {
    OAuthStateService::new(pool.clone(), SECRET.to_vec(), 600)
}

/// Split a generated token back into its five payload fields.
fn token_fields(token: &str) -> Vec<String> {
    let decoded = String::from_utf8(decode_base64url(token).unwrap()).unwrap();
    decoded.split(':').map(String::from).collect()
}

/// Re-sign an altered payload under the same server secret.
fn sign_token(nonce: &str, agency_id: Uuid, user_id: Uuid, expiry: i64) -> String {
    let payload = format!("{nonce}:{agency_id}:{user_id}:{expiry}");
    let signature = hex::encode(sign_payload(SECRET, payload.as_bytes()));
    encode_base64url(format!("{payload}:{signature}").as_bytes())
}

#[shared_runtime_test]
async fn state_validates_once_then_replays() {
    let db = get_test_db().await;
    let service = service(db.pool());
    let agency = Uuid::new_v4();
    let user = Uuid::new_v4();

    let token = service.generate_state(agency, user).await.unwrap();

    let validated = service.validate_state(&token).await.unwrap();
    assert_eq!(validated.agency_id, agency);
    assert_eq!(validated.user_id, user);

    // Presenting the same token again is a replay.
    let result = service.validate_state(&token).await;
    assert!(matches!(result, Err(StateTokenError::ReplayDetected)));
}

#[shared_runtime_test]
async fn expired_state_is_rejected_even_if_never_consumed() {
    let db = get_test_db().await;
    let service = service(db.pool());

    let token = service
        .generate_state_expiring_at(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Utc::now() - Duration::minutes(1),
        )
        .await
        .unwrap();

    let result = service.validate_state(&token).await;
    assert!(matches!(result, Err(StateTokenError::ExpiredState)));
}

#[shared_runtime_test]
async fn tampering_with_the_payload_breaks_the_signature() {
    let db = get_test_db().await;
    let service = service(db.pool());

    let token = service
        .generate_state(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap();

    // Alter the embedded agency id without re-signing.
    let fields = token_fields(&token);
    let forged_payload = format!(
        "{}:{}:{}:{}",
        fields[0],
        Uuid::new_v4(),
        fields[2],
        fields[3]
    );
    let forged = encode_base64url(format!("{forged_payload}:{}", fields[4]).as_bytes());

    let result = service.validate_state(&forged).await;
    assert!(matches!(result, Err(StateTokenError::InvalidSignature)));
}

#[shared_runtime_test]
async fn cross_tenant_rebinding_is_detected_after_consumption() {
    // A correctly signed token whose payload names a different agency than
    // the stored row: signature passes, the tenant-binding check must not.
    let db = get_test_db().await;
    let service = service(db.pool());
    let agency_a = Uuid::new_v4();
    let user = Uuid::new_v4();

    let token = service.generate_state(agency_a, user).await.unwrap();
    let fields = token_fields(&token);

    let agency_b = Uuid::new_v4();
    let rebound = sign_token(&fields[0], agency_b, user, fields[3].parse().unwrap());

    let result = service.validate_state(&rebound).await;
    assert!(matches!(result, Err(StateTokenError::TamperedState)));
}

#[shared_runtime_test]
async fn signed_token_without_a_row_is_useless() {
    // Signature alone is not enough: without a matching unconsumed row the
    // validation reads as replay.
    let db = get_test_db().await;
    let service = service(db.pool());

    let expiry = (Utc::now() + Duration::minutes(10)).timestamp();
    let orphan = sign_token(
        &"ef".repeat(32),
        Uuid::new_v4(),
        Uuid::new_v4(),
        expiry,
    );

    let result = service.validate_state(&orphan).await;
    assert!(matches!(result, Err(StateTokenError::ReplayDetected)));
}

#[shared_runtime_test]
async fn cleanup_removes_only_expired_rows() {
    let db = get_test_db().await;
    let service = service(db.pool());
    let user = Uuid::new_v4();

    let expired = service
        .generate_state_expiring_at(Uuid::new_v4(), user, Utc::now() - Duration::hours(2))
        .await
        .unwrap();
    let live = service.generate_state(Uuid::new_v4(), user).await.unwrap();

    let removed = service.cleanup_expired_states().await.unwrap();
    assert!(removed >= 1);

    // The live token still validates; the expired row is gone entirely.
    assert!(service.validate_state(&live).await.is_ok());
    let expired_nonce = token_fields(&expired)[0].clone();
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM oauth_states WHERE nonce = $1")
            .bind(&expired_nonce)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(count, 0);

    // Running the sweep again is a no-op for the rows we touched.
    assert!(service.cleanup_expired_states().await.is_ok());
}
