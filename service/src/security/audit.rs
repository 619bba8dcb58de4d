//! Point-in-time security assessment for the compliance dashboard
//!
//! Every check here is a read-only introspection of configuration or stored
//! data: password-hash shapes, PII encryption coverage, RLS policy presence,
//! header configuration. A failing query degrades that category to an
//! `Error` status with a zero score — one broken check never aborts the
//! whole report. This service observes the rest of the security subsystem;
//! it enforces nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ih_crypto::is_encrypted;
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

use crate::config::Config;
use crate::security::keys::SecurityKeys;

/// Upper bound on rows sampled per data check.
const SAMPLE_LIMIT: i64 = 100;

/// Independently scored assessment categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Authentication,
    DataProtection,
    ApiSecurity,
    AccessControl,
    Encryption,
    AuditLogging,
    InputValidation,
    SessionManagement,
    ErrorHandling,
    SecurityHeaders,
}

/// Outcome band for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Pass,
    Warn,
    Fail,
    /// The check itself could not run; score is zero, report continues.
    Error,
}

/// One scored category with its findings.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CategoryReport {
    pub category: AuditCategory,
    /// 0–100.
    pub score: u8,
    pub status: CategoryStatus,
    pub critical_issues: Vec<String>,
    pub recommendations: Vec<String>,
}

impl CategoryReport {
    fn scored(
        category: AuditCategory,
        score: u8,
        critical_issues: Vec<String>,
        recommendations: Vec<String>,
    ) -> Self {
        Self {
            category,
            score,
            status: status_for(score),
            critical_issues,
            recommendations,
        }
    }

    fn errored(category: AuditCategory, err: &sqlx::Error) -> Self {
        tracing::error!(?category, error = %err, "assessment check failed");
        Self {
            category,
            score: 0,
            status: CategoryStatus::Error,
            critical_issues: vec!["check could not be completed".to_string()],
            recommendations: vec![],
        }
    }
}

/// The aggregated assessment.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AssessmentReport {
    pub generated_at: DateTime<Utc>,
    /// Unweighted mean of the category scores, 0–100.
    pub overall_score: u8,
    pub grade: String,
    pub categories: Vec<CategoryReport>,
}

/// Read-only scoring of the security subsystem's configuration state.
#[derive(Clone)]
pub struct SecurityAuditService {
    pool: PgPool,
    keys: Arc<SecurityKeys>,
    config: Arc<Config>,
}

impl SecurityAuditService {
    #[must_use]
    pub fn new(pool: PgPool, keys: Arc<SecurityKeys>, config: Arc<Config>) -> Self {
        Self { pool, keys, config }
    }

    /// Run every category check and aggregate the report.
    pub async fn run_assessment(&self) -> AssessmentReport {
        let categories = vec![
            self.check_authentication().await,
            self.check_data_protection().await,
            self.check_api_security().await,
            self.check_access_control().await,
            check_encryption(&self.keys),
            check_audit_logging(&self.config),
            self.check_input_validation().await,
            check_session_management(&self.config),
            check_error_handling(&self.config),
            check_security_headers(&self.config),
        ];

        let overall_score = mean_score(&categories);
        AssessmentReport {
            generated_at: Utc::now(),
            overall_score,
            grade: grade_for(overall_score).to_string(),
            categories,
        }
    }

    /// Fraction of sampled accounts with Argon2 PHC password hashes and an
    /// enrolled second factor.
    async fn check_authentication(&self) -> CategoryReport {
        let result: Result<(i64, i64, i64), sqlx::Error> = sqlx::query_as(
            r"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE password_hash LIKE '$argon2%'),
                   COUNT(totp_secret)
            FROM (SELECT password_hash, totp_secret FROM users LIMIT $1) AS sample
            ",
        )
        .bind(SAMPLE_LIMIT)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok((0, _, _)) => CategoryReport::scored(
                AuditCategory::Authentication,
                100,
                vec![],
                vec!["no user accounts to sample yet".to_string()],
            ),
            Ok((total, hashed, enrolled)) => {
                let mut issues = Vec::new();
                let mut recommendations = Vec::new();
                if hashed < total {
                    issues.push(format!(
                        "{} of {total} sampled accounts have non-Argon2 password hashes",
                        total - hashed
                    ));
                }
                if enrolled * 2 < total {
                    recommendations.push(
                        "fewer than half of sampled accounts have TOTP enrolled".to_string(),
                    );
                }
                let score = u8::try_from((hashed * 100) / total).unwrap_or(0);
                CategoryReport::scored(AuditCategory::Authentication, score, issues, recommendations)
            }
            Err(err) => CategoryReport::errored(AuditCategory::Authentication, &err),
        }
    }

    /// Fraction of stored PII column values that are encrypted blobs.
    async fn check_data_protection(&self) -> CategoryReport {
        type PiiRow = (
            Option<String>,
            Option<String>,
            Option<String>,
            Option<String>,
        );
        let result: Result<Vec<PiiRow>, sqlx::Error> = sqlx::query_as(
            r"
            SELECT ssn_encrypted, ein_encrypted, bank_account_encrypted, routing_number_encrypted
            FROM merchants
            LIMIT $1
            ",
        )
        .bind(SAMPLE_LIMIT)
        .fetch_all(&self.pool)
        .await;

        match result {
            Ok(rows) => {
                let mut total = 0usize;
                let mut encrypted = 0usize;
                for (ssn, ein, bank, routing) in &rows {
                    for value in [ssn, ein, bank, routing].into_iter().flatten() {
                        total += 1;
                        if is_encrypted(value) {
                            encrypted += 1;
                        }
                    }
                }

                if total == 0 {
                    return CategoryReport::scored(
                        AuditCategory::DataProtection,
                        100,
                        vec![],
                        vec!["no stored PII to sample yet".to_string()],
                    );
                }

                let mut issues = Vec::new();
                if encrypted < total {
                    issues.push(format!(
                        "{} of {total} sampled PII values are not encrypted at rest",
                        total - encrypted
                    ));
                }
                let score = u8::try_from((encrypted * 100) / total).unwrap_or(0);
                CategoryReport::scored(AuditCategory::DataProtection, score, issues, vec![])
            }
            Err(err) => CategoryReport::errored(AuditCategory::DataProtection, &err),
        }
    }

    /// CORS posture plus the state-token hygiene the sweeper maintains.
    async fn check_api_security(&self) -> CategoryReport {
        let result: Result<(i64,), sqlx::Error> =
            sqlx::query_as("SELECT COUNT(*) FROM oauth_states WHERE expires_at < now()")
                .fetch_one(&self.pool)
                .await;

        match result {
            Ok((stale,)) => {
                let mut score: i64 = 100;
                let mut issues = Vec::new();
                let mut recommendations = Vec::new();

                if self.config.cors.allowed_origins.iter().any(|o| o == "*") {
                    score -= 40;
                    issues.push("CORS allows any origin".to_string());
                }
                if stale > 100 {
                    score -= 30;
                    recommendations.push(format!(
                        "{stale} expired state tokens awaiting cleanup; verify the sweep task is running"
                    ));
                } else if stale > 0 {
                    score -= 10;
                }

                let score = u8::try_from(score.clamp(0, 100)).unwrap_or(0);
                CategoryReport::scored(AuditCategory::ApiSecurity, score, issues, recommendations)
            }
            Err(err) => CategoryReport::errored(AuditCategory::ApiSecurity, &err),
        }
    }

    /// Row-level security must be enabled with at least one policy on the
    /// tenant-scoped PII table.
    async fn check_access_control(&self) -> CategoryReport {
        let result: Result<(bool, i64), sqlx::Error> = sqlx::query_as(
            r"
            SELECT COALESCE(
                     (SELECT relrowsecurity FROM pg_class
                      WHERE relname = 'merchants' AND relkind = 'r'),
                     FALSE),
                   (SELECT COUNT(*) FROM pg_policies WHERE tablename = 'merchants')
            ",
        )
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok((rls_enabled, policies)) => {
                let (score, issues) = match (rls_enabled, policies) {
                    (true, n) if n > 0 => (100, vec![]),
                    (true, _) => (
                        50,
                        vec!["row-level security enabled but no policies defined".to_string()],
                    ),
                    (false, _) => (
                        0,
                        vec!["row-level security disabled on tenant PII table".to_string()],
                    ),
                };
                CategoryReport::scored(AuditCategory::AccessControl, score, issues, vec![])
            }
            Err(err) => CategoryReport::errored(AuditCategory::AccessControl, &err),
        }
    }

    /// Schema-level input constraints backing the application validators.
    async fn check_input_validation(&self) -> CategoryReport {
        let result: Result<(i64, i64, i64), sqlx::Error> = sqlx::query_as(
            r"
            SELECT
              (SELECT COUNT(*) FROM information_schema.table_constraints
               WHERE table_name = 'oauth_states' AND constraint_type = 'PRIMARY KEY'),
              (SELECT COUNT(*) FROM information_schema.table_constraints
               WHERE table_name = 'users' AND constraint_type = 'UNIQUE'),
              (SELECT COUNT(*) FROM information_schema.columns
               WHERE table_name = 'users' AND column_name = 'password_hash'
                 AND is_nullable = 'NO')
            ",
        )
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok((state_pk, user_unique, pw_not_null)) => {
                let satisfied = [state_pk, user_unique, pw_not_null]
                    .iter()
                    .filter(|&&n| n > 0)
                    .count();
                let mut issues = Vec::new();
                if state_pk == 0 {
                    issues.push("state nonces are not uniquely constrained".to_string());
                }
                if user_unique == 0 {
                    issues.push("user identities are not uniquely constrained".to_string());
                }
                if pw_not_null == 0 {
                    issues.push("password hashes may be null".to_string());
                }
                let score = u8::try_from((satisfied * 100) / 3).unwrap_or(0);
                CategoryReport::scored(AuditCategory::InputValidation, score, issues, vec![])
            }
            Err(err) => CategoryReport::errored(AuditCategory::InputValidation, &err),
        }
    }
}

/// A configured key scores full marks; the ephemeral fallback is flagged.
fn check_encryption(keys: &SecurityKeys) -> CategoryReport {
    if keys.is_field_key_ephemeral() {
        CategoryReport::scored(
            AuditCategory::Encryption,
            40,
            vec![
                "field encryption is using an ephemeral key; encrypted data will not survive a restart"
                    .to_string(),
            ],
            vec!["configure secrets.encryption_key".to_string()],
        )
    } else {
        CategoryReport::scored(AuditCategory::Encryption, 100, vec![], vec![])
    }
}

fn check_audit_logging(config: &Config) -> CategoryReport {
    let level = config.logging.level.to_lowercase();
    if level.starts_with("error") {
        CategoryReport::scored(
            AuditCategory::AuditLogging,
            60,
            vec![],
            vec![
                "log level 'error' suppresses security events (replays, step-up failures); use 'info' or lower"
                    .to_string(),
            ],
        )
    } else {
        CategoryReport::scored(AuditCategory::AuditLogging, 100, vec![], vec![])
    }
}

fn check_session_management(config: &Config) -> CategoryReport {
    let mut score: i64 = 100;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if config.reauth.ttl_secs > 900 {
        score -= 40;
        issues.push(format!(
            "step-up grant lifetime of {}s is too long for a re-authentication window",
            config.reauth.ttl_secs
        ));
    }
    if config.oauth_state.ttl_secs > 1800 {
        score -= 20;
        recommendations.push(format!(
            "state token lifetime of {}s is generous; 600s covers a normal redirect round trip",
            config.oauth_state.ttl_secs
        ));
    }
    if config.reauth.sweep_interval_secs == 0 || config.reauth.sweep_interval_secs > 3600 {
        score -= 20;
        recommendations.push("registry sweep interval should be between 1s and 1h".to_string());
    }

    let score = u8::try_from(score.clamp(0, 100)).unwrap_or(0);
    CategoryReport::scored(AuditCategory::SessionManagement, score, issues, recommendations)
}

fn check_error_handling(config: &Config) -> CategoryReport {
    if config.server.expose_internal_errors {
        CategoryReport::scored(
            AuditCategory::ErrorHandling,
            30,
            vec!["internal error details are exposed in responses".to_string()],
            vec!["disable server.expose_internal_errors outside development".to_string()],
        )
    } else {
        CategoryReport::scored(AuditCategory::ErrorHandling, 100, vec![], vec![])
    }
}

fn check_security_headers(config: &Config) -> CategoryReport {
    let headers = &config.security_headers;
    let mut score: i64 = 0;
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if headers.enabled {
        score += 40;
    } else {
        issues.push("security headers are disabled".to_string());
    }
    let frame = headers.frame_options.to_uppercase();
    if frame == "DENY" || frame == "SAMEORIGIN" {
        score += 20;
    } else {
        issues.push("X-Frame-Options is not DENY or SAMEORIGIN".to_string());
    }
    if headers.content_security_policy.is_empty() {
        issues.push("Content-Security-Policy is empty".to_string());
    } else {
        score += 20;
    }
    if headers.hsts_enabled {
        score += 20;
    } else {
        recommendations.push("enable HSTS once the service terminates TLS".to_string());
    }

    let score = u8::try_from(score.clamp(0, 100)).unwrap_or(0);
    CategoryReport::scored(AuditCategory::SecurityHeaders, score, issues, recommendations)
}

fn status_for(score: u8) -> CategoryStatus {
    match score {
        90..=100 => CategoryStatus::Pass,
        60..=89 => CategoryStatus::Warn,
        _ => CategoryStatus::Fail,
    }
}

fn mean_score(categories: &[CategoryReport]) -> u8 {
    if categories.is_empty() {
        return 0;
    }
    let sum: u32 = categories.iter().map(|c| u32::from(c.score)).sum();
    let count = u32::try_from(categories.len()).unwrap_or(1);
    u8::try_from(sum / count).unwrap_or(100)
}

/// Letter grade for an overall score.
fn grade_for(score: u8) -> &'static str {
    match score {
        95..=100 => "A+",
        90..=94 => "A",
        80..=89 => "B",
        70..=79 => "C",
        60..=69 => "D",
        50..=59 => "E",
        _ => "F",
    }
}
