//! Security subsystem for multi-tenant isolation and PII protection
//!
//! The pieces here carry the platform's real security invariants:
//!
//! - [`keys`] resolves every secret once at startup, before the first request
//! - [`oauth_state`] issues and validates one-time, HMAC-signed OAuth state
//!   tokens with server-side consumption tracking
//! - [`reauth`] gates sensitive mutations behind short-lived, single-use
//!   step-up grants minted by re-verifying the primary credential
//! - [`tenant`] scopes database work to a tenant via the session variables
//!   the row-level-security policies read
//! - [`audit`] scores the configuration state of the rest for the compliance
//!   dashboard; it observes, it never enforces

pub mod audit;
pub mod keys;
pub mod oauth_state;
pub mod reauth;
pub mod tenant;

pub use audit::{AssessmentReport, SecurityAuditService};
pub use keys::{KeyResolutionError, SecurityKeys};
pub use oauth_state::{OAuthStateService, StateTokenError, ValidatedState};
pub use reauth::{
    InMemoryReauthRegistry, IssuedReauthToken, ReauthError, ReauthGrant, ReauthMethod,
    ReauthRegistry, ReauthTokenIssuer, StepUpReauthService,
};
pub use tenant::{with_super_admin_context, with_tenant_context, TenantContext};
