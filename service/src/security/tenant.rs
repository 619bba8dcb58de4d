//! Tenant context propagation for row-level security
//!
//! The row-level-security policies read four session variables on every
//! query: `app.current_agency_id`, `app.current_subaccount_id`,
//! `app.is_super_admin` and `app.is_agency_admin`. This module is the only
//! permitted mutation path for them: a unit of work is pinned to a single
//! pooled connection, the variables are set, the work runs, and the
//! variables are unconditionally reset afterwards — on success, on error and
//! on early return alike. A context leaked into a differently-tenanted unit
//! of work on a pooled connection would be a tenant-isolation breach.
//!
//! Nesting is not supported: each call is one fresh set/clear pair on one
//! pinned connection.

use std::future::Future;
use std::pin::Pin;

use sqlx::postgres::PgConnection;
use sqlx::PgPool;
use uuid::Uuid;

/// The tenant a unit of database work runs as.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenantContext {
    pub agency_id: Option<Uuid>,
    pub subaccount_id: Option<Uuid>,
    pub is_super_admin: bool,
    pub is_agency_admin: bool,
}

impl TenantContext {
    /// Context for an agency-scoped request. Identifiers must come from the
    /// authenticated user's claims, never from request parameters.
    #[must_use]
    pub fn for_agency(agency_id: Uuid, subaccount_id: Option<Uuid>, is_agency_admin: bool) -> Self {
        Self {
            agency_id: Some(agency_id),
            subaccount_id,
            is_super_admin: false,
            is_agency_admin,
        }
    }

    /// Context that bypasses per-agency filtering. Setting it performs no
    /// authorization; callers must have verified the privilege already.
    #[must_use]
    pub fn super_admin() -> Self {
        Self {
            agency_id: None,
            subaccount_id: None,
            is_super_admin: true,
            is_agency_admin: false,
        }
    }
}

/// The future a unit of work returns, borrowing the pinned connection.
pub type UnitOfWork<'c, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>;

/// Run a unit of database work inside a tenant context.
///
/// One connection is pinned for the whole unit of work — pulling a second
/// connection from the pool mid-context would run those queries without the
/// session variables. The reset runs whether the work succeeded or failed;
/// if the reset itself fails, the connection is detached from the pool and
/// dropped rather than returned carrying tenant state.
///
/// # Errors
///
/// Propagates the unit of work's error, or the connection/setup error
/// converted via `From<sqlx::Error>`.
pub async fn with_tenant_context<T, E, F>(
    pool: &PgPool,
    context: TenantContext,
    work: F,
) -> Result<T, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut PgConnection) -> UnitOfWork<'c, T, E>,
{
    let mut conn = pool.acquire().await.map_err(E::from)?;

    if let Err(err) = set_context(&mut conn, context).await {
        // Defensive: a partially applied context must not reach the pool.
        discard_if_unclearable(conn).await;
        return Err(E::from(err));
    }

    let result = work(&mut *conn).await;

    if let Err(err) = clear_context(&mut conn).await {
        tracing::error!(error = %err, "failed to clear tenant context; discarding connection");
        drop(conn.detach());
        // A successful unit of work on a connection we could not clean is
        // still surfaced as a failure; the caller must not trust it half-way.
        return match result {
            Ok(_) => Err(E::from(err)),
            Err(work_err) => Err(work_err),
        };
    }

    result
}

/// Run a unit of work with per-agency filtering bypassed.
///
/// # Errors
///
/// Same as [`with_tenant_context`].
pub async fn with_super_admin_context<T, E, F>(pool: &PgPool, work: F) -> Result<T, E>
where
    E: From<sqlx::Error>,
    F: for<'c> FnOnce(&'c mut PgConnection) -> UnitOfWork<'c, T, E>,
{
    with_tenant_context(pool, TenantContext::super_admin(), work).await
}

/// Set all four session variables in one round trip.
async fn set_context(
    conn: &mut PgConnection,
    context: TenantContext,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        SELECT set_config('app.current_agency_id', $1, FALSE),
               set_config('app.current_subaccount_id', $2, FALSE),
               set_config('app.is_super_admin', $3, FALSE),
               set_config('app.is_agency_admin', $4, FALSE)
        ",
    )
    .bind(context.agency_id.map(|id| id.to_string()).unwrap_or_default())
    .bind(
        context
            .subaccount_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
    )
    .bind(if context.is_super_admin { "true" } else { "false" })
    .bind(if context.is_agency_admin { "true" } else { "false" })
    .execute(conn)
    .await
    .map(|_| ())
}

/// Reset the session variables to their empty/false defaults.
async fn clear_context(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    set_context(conn, TenantContext::default()).await
}

/// Best-effort clear for the partial-setup path; discard on failure.
async fn discard_if_unclearable(mut conn: sqlx::pool::PoolConnection<sqlx::Postgres>) {
    if clear_context(&mut conn).await.is_err() {
        tracing::error!("failed to clear partially set tenant context; discarding connection");
        drop(conn.detach());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_agency_builds_scoped_context() {
        let agency = Uuid::new_v4();
        let sub = Uuid::new_v4();
        let context = TenantContext::for_agency(agency, Some(sub), true);
        assert_eq!(context.agency_id, Some(agency));
        assert_eq!(context.subaccount_id, Some(sub));
        assert!(!context.is_super_admin);
        assert!(context.is_agency_admin);
    }

    #[test]
    fn super_admin_bypasses_agency_scope() {
        let context = TenantContext::super_admin();
        assert!(context.is_super_admin);
        assert!(context.agency_id.is_none());
        assert!(context.subaccount_id.is_none());
        assert!(!context.is_agency_admin);
    }

    #[test]
    fn default_context_is_fully_cleared() {
        // The clear path resets to this value; it must scope to nothing.
        let context = TenantContext::default();
        assert!(context.agency_id.is_none());
        assert!(context.subaccount_id.is_none());
        assert!(!context.is_super_admin);
        assert!(!context.is_agency_admin);
    }
}
