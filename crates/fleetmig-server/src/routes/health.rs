use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "fleetmig-server",
        "version": env!("CARGO_PKG_VERSION"),
        "fleet": {
            "branches": state.orchestrator.branches().len(),
            "catalog_migrations": state.orchestrator.catalog().len(),
        }
    }))
}
