//! Row factories for integration tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHasher};
use sqlx::PgPool;
use uuid::Uuid;

/// Insert an agency and return its id.
pub async fn create_agency(pool: &PgPool, name: &str) -> Uuid {
    sqlx::query_scalar("INSERT INTO agencies (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("insert agency")
}

/// Hash a password the way production stores it.
pub fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("hash password")
        .to_string()
}

/// Insert a user with an Argon2 password hash and optional TOTP secret.
pub async fn create_user(
    pool: &PgPool,
    agency_id: Uuid,
    email: &str,
    password: &str,
    totp_secret: Option<&str>,
) -> Uuid {
    sqlx::query_scalar(
        r"
        INSERT INTO users (agency_id, email, password_hash, totp_secret)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        ",
    )
    .bind(agency_id)
    .bind(email)
    .bind(hash_password(password))
    .bind(totp_secret)
    .fetch_one(pool)
    .await
    .expect("insert user")
}

/// Insert a merchant row with pre-encrypted PII column values.
pub async fn create_merchant(
    pool: &PgPool,
    agency_id: Uuid,
    business_name: &str,
    ssn_encrypted: Option<&str>,
) -> Uuid {
    sqlx::query_scalar(
        r"
        INSERT INTO merchants (agency_id, business_name, ssn_encrypted)
        VALUES ($1, $2, $3)
        RETURNING id
        ",
    )
    .bind(agency_id)
    .bind(business_name)
    .bind(ssn_encrypted)
    .fetch_one(pool)
    .await
    .expect("insert merchant")
}
