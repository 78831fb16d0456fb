//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST API server on its own.
//!
//! ## Intended use
//! This binary is useful for development and debugging when you only want the REST server (with
//! OpenAPI/Swagger UI). The workspace's main `quote-run` binary runs both gRPC and REST
//! concurrently.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::{router, AppState};
use quote_core::{config::core_config_from_env_values, QuotationService};

/// Starts the REST API server on `QUOTE_REST_ADDR` (default: 0.0.0.0:3000).
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the database configuration is invalid or the schema cannot be applied,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quote_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("QUOTE_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let cfg = Arc::new(core_config_from_env_values(
        std::env::var("QUOTE_DATABASE_PATH").ok(),
        std::env::var("QUOTE_BUSY_TIMEOUT_MS").ok(),
        std::env::var("QUOTE_ALLOCATION_ATTEMPTS").ok(),
    )?);
    let service = QuotationService::with_sqlite_collaborators(cfg);
    service.store().initialise()?;

    tracing::info!("-- Starting quotation REST API on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router(AppState::new(service))).await?;

    Ok(())
}
