// SPDX-License-Identifier: MIT

//! Authhub API Server
//!
//! Authenticates inbound requests with a two-layer bearer token and
//! reconciles identity-provider logins into local user records.

use authhub::{config::Config, db::PgIdentityStore, AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Authhub API");

    // Connect storage and run migrations
    let store = PgIdentityStore::connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    if config.reconcile_atomic {
        tracing::info!("Atomic reconciliation enabled");
    }

    // Build shared state
    let port = config.port;
    let state = Arc::new(AppState::new(config, Arc::new(store)));

    // Build router
    let app = authhub::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("authhub=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
