#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderValue, Method},
    middleware, Extension,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use isohub_api::{
    config::Config,
    db::setup_database,
    http::{build_security_headers, security_headers_middleware},
    rest,
    security::{
        InMemoryReauthRegistry, OAuthStateService, ReauthTokenIssuer, SecurityAuditService,
        SecurityKeys, StepUpReauthService,
    },
};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Load and validate configuration first (fail-fast)
    let config = Config::load().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up logging from config
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Init banner so container logs clearly show startup
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "isohub-api starting up");

    // Resolve every secret before the first request; a missing signing
    // secret is fatal here, not at the first token operation.
    let keys = Arc::new(SecurityKeys::from_config(&config.secrets)?);

    // Database connection
    tracing::info!("Connecting to database...");
    let pool = setup_database(&config.database).await?;

    // Wire the security services
    let state_service = OAuthStateService::new(
        pool.clone(),
        keys.state_secret().to_vec(),
        config.oauth_state.ttl_secs,
    );
    let registry = Arc::new(InMemoryReauthRegistry::new());
    let reauth_service = StepUpReauthService::new(
        pool.clone(),
        ReauthTokenIssuer::new(keys.reauth_secret(), registry, config.reauth.ttl_secs),
    );
    let config = Arc::new(config);
    let audit_service = SecurityAuditService::new(pool, Arc::clone(&keys), Arc::clone(&config));

    spawn_sweepers(state_service, reauth_service.clone(), &config);

    // Build CORS layer from config
    let cors_origins = &config.cors.allowed_origins;
    let allow_origin: AllowOrigin = if cors_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow any origin - not recommended for production");
        AllowOrigin::any()
    } else if cors_origins.is_empty() {
        tracing::info!(
            "CORS allowed origins not configured - cross-origin requests will be blocked"
        );
        AllowOrigin::list(Vec::<HeaderValue>::new())
    } else {
        let origins: Vec<HeaderValue> = cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        tracing::info!(origins = ?cors_origins, "CORS allowed origins configured");
        AllowOrigin::list(origins)
    };

    // Build the API
    let mut app = rest::router(audit_service)
        .layer(Extension(reauth_service))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .allow_origin(allow_origin),
        );

    // Add security headers middleware if enabled
    if config.security_headers.enabled {
        tracing::info!("Security headers enabled");
        let headers = build_security_headers(&config.security_headers);
        app = app
            .layer(middleware::from_fn(security_headers_middleware))
            .layer(Extension(headers));
    } else {
        tracing::info!("Security headers disabled");
    }

    // Start the server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Starting server at http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn the periodic cleanup tasks.
///
/// Both sweeps are fire-and-forget and idempotent; a failed run is logged
/// and the next tick tries again. Nothing here can take the process down.
fn spawn_sweepers(
    state_service: OAuthStateService,
    reauth_service: StepUpReauthService,
    config: &Config,
) {
    let cleanup_interval =
        Duration::from_secs(u64::from(config.oauth_state.cleanup_interval_secs.max(1)));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        // The first tick completes immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state_service.cleanup_expired_states().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "cleaned up expired state tokens"),
                Err(err) => tracing::warn!(error = %err, "state cleanup sweep failed"),
            }
        }
    });

    let sweep_interval = Duration::from_secs(u64::from(config.reauth.sweep_interval_secs.max(1)));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = reauth_service.tokens().sweep_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "swept expired step-up grants");
            }
        }
    });
}
