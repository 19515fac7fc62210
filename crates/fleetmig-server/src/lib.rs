//! Fleetmig server - HTTP operator API for branch fleet migrations.
//!
//! Exposes the orchestrator over REST: per-branch status, apply, rollback
//! and force-retry, plus fleet-wide bulk operations. Consumed by an
//! operator UI or CLI.

pub mod config;
pub mod error;
pub mod fleet;
pub mod migrations;
pub mod routes;
pub mod state;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .merge(routes::health::routes())
        // Operator REST API
        .merge(routes::api::routes())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
