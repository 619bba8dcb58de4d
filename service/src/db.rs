use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// Connect to the database and run migrations
///
/// Retries with exponential backoff so the service survives starting before
/// Postgres is ready (container orchestration races).
///
/// # Errors
///
/// Returns an error once the retry budget is exhausted or migrations fail.
pub async fn setup_database(config: &DatabaseConfig) -> Result<PgPool, anyhow::Error> {
    let retry_deadline = Duration::from_secs(60); // overall retry budget
    let max_interval = Duration::from_secs(30); // cap single waits
    let mut delay = Duration::from_millis(500);
    let start = Instant::now();
    let database_url = config.connection_url();

    let pool = loop {
        info!("Attempting to connect to Postgres...");

        match PgPoolOptions::new()
            .max_connections(config.max_connections)
            // Allow extra time to acquire a connection during startup bursts
            .acquire_timeout(Duration::from_secs(30))
            .connect(&database_url)
            .await
        {
            Ok(pool) => break pool,
            Err(err) => {
                if start.elapsed() >= retry_deadline {
                    warn!(error = %err, "Postgres not ready; retries exhausted");
                    return Err(err.into());
                }

                warn!(error = %err, "Postgres not ready yet; retrying");
                sleep(delay).await;
                delay = (delay.saturating_mul(2)).min(max_interval);
            }
        }
    };

    run_migrations(&pool, config.migrations_dir.as_deref()).await?;
    Ok(pool)
}

/// Apply migrations from the configured directory (or the crate default).
///
/// # Errors
///
/// Returns an error if the migrations directory cannot be read or a
/// migration fails to apply.
pub async fn run_migrations(
    pool: &PgPool,
    migrations_dir: Option<&str>,
) -> Result<(), anyhow::Error> {
    let default_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/migrations");
    let path = migrations_dir.unwrap_or(default_dir);
    let migrator = Migrator::new(Path::new(path)).await?;
    migrator.run(pool).await?;
    info!("Migrations applied");
    Ok(())
}
