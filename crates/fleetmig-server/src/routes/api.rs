use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use fleetmig_core::{BranchMigrationState, BranchReport, RollbackReport};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{error_code, Result, ServerError};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        // Fleet overview
        .route("/branches", get(list_branches))
        // Bulk operations
        .route("/branches/apply-all", post(apply_all))
        .route(
            "/branches/rollback-all-to-previous",
            post(rollback_all_to_previous),
        )
        // Single-branch operations
        .route("/branches/:code/migration-status", get(migration_status))
        .route("/branches/:code/migrations/apply", post(apply_branch))
        .route(
            "/branches/:code/migrations/rollback-last",
            post(rollback_last),
        )
        .route("/branches/:code/migrations/force-retry", post(force_retry))
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Serialize)]
struct StateResponse {
    success: bool,
    state: BranchStateDto,
}

#[derive(Serialize)]
struct BranchStateDto {
    code: String,
    status: String,
    applied: Vec<AppliedDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_retry_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_token: Option<String>,
}

#[derive(Serialize)]
struct AppliedDto {
    id: String,
    applied_at: String,
}

#[derive(Serialize)]
struct RollbackResponse {
    success: bool,
    rolled_back: String,
    data_loss_warning: bool,
    state: BranchStateDto,
}

#[derive(Serialize)]
struct ErrorDto {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ApplyReportDto {
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<BranchStateDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDto>,
}

#[derive(Serialize)]
struct RollbackReportDto {
    code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rolled_back: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_loss_warning: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<BranchStateDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDto>,
}

fn format_micros(micros: u64) -> String {
    chrono::DateTime::from_timestamp_micros(micros as i64)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| micros.to_string())
}

fn state_dto(state: &BranchMigrationState) -> BranchStateDto {
    BranchStateDto {
        code: state.code.clone(),
        status: state.status.to_string(),
        applied: state
            .applied
            .iter()
            .map(|entry| AppliedDto {
                id: entry.id.to_string(),
                applied_at: format_micros(entry.applied_at),
            })
            .collect(),
        last_error: state.last_error.clone(),
        retry_count: state.retry_count,
        next_retry_at: state.next_retry_at.map(format_micros),
        lock_token: state.lock_token.clone(),
    }
}

fn error_dto(err: &fleetmig_core::Error) -> ErrorDto {
    ErrorDto {
        code: error_code(err),
        message: err.to_string(),
    }
}

fn apply_report_dto(report: BranchReport) -> ApplyReportDto {
    match report.outcome {
        Ok(state) => ApplyReportDto {
            code: report.code,
            state: Some(state_dto(&state)),
            error: None,
        },
        Err(err) => ApplyReportDto {
            code: report.code,
            state: None,
            error: Some(error_dto(&err)),
        },
    }
}

fn rollback_report_dto(report: RollbackReport) -> RollbackReportDto {
    match report.outcome {
        Ok(outcome) => RollbackReportDto {
            code: report.code,
            rolled_back: Some(outcome.rolled_back.to_string()),
            data_loss_warning: Some(outcome.data_loss_warning),
            state: Some(state_dto(&outcome.state)),
            error: None,
        },
        Err(err) => RollbackReportDto {
            code: report.code,
            rolled_back: None,
            data_loss_warning: None,
            state: None,
            error: Some(error_dto(&err)),
        },
    }
}

/// The orchestrator core is synchronous; every handler hops onto the
/// blocking pool.
async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> fleetmig_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?
        .map_err(ServerError::from)
}

// ============================================================================
// Fleet overview
// ============================================================================

#[derive(Serialize)]
struct BranchSummaryDto {
    code: String,
    provider: String,
    status: String,
    applied_count: usize,
    retry_count: u32,
}

async fn list_branches(State(state): State<AppState>) -> Result<Json<Value>> {
    let orchestrator = state.orchestrator.clone();
    let summaries = tokio::task::spawn_blocking(move || {
        orchestrator
            .branches()
            .into_iter()
            .map(|branch| match orchestrator.status(&branch.code) {
                Ok(branch_state) => BranchSummaryDto {
                    code: branch.code,
                    provider: branch.provider.to_string(),
                    status: branch_state.status.to_string(),
                    applied_count: branch_state.applied.len(),
                    retry_count: branch_state.retry_count,
                },
                Err(_) => BranchSummaryDto {
                    code: branch.code,
                    provider: branch.provider.to_string(),
                    status: "unregistered".to_string(),
                    applied_count: 0,
                    retry_count: 0,
                },
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))?;

    Ok(Json(json!({
        "success": true,
        "count": summaries.len(),
        "branches": summaries,
    })))
}

// ============================================================================
// Single-branch operations
// ============================================================================

async fn migration_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<StateResponse>> {
    let orchestrator = state.orchestrator.clone();
    let branch_state = run_blocking(move || orchestrator.status(&code)).await?;
    Ok(Json(StateResponse {
        success: true,
        state: state_dto(&branch_state),
    }))
}

async fn apply_branch(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<StateResponse>> {
    let orchestrator = state.orchestrator.clone();
    let branch_state = run_blocking(move || orchestrator.apply_branch(&code)).await?;
    Ok(Json(StateResponse {
        success: true,
        state: state_dto(&branch_state),
    }))
}

async fn rollback_last(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RollbackResponse>> {
    let orchestrator = state.orchestrator.clone();
    let outcome = run_blocking(move || orchestrator.rollback_last(&code)).await?;
    Ok(Json(RollbackResponse {
        success: true,
        rolled_back: outcome.rolled_back.to_string(),
        data_loss_warning: outcome.data_loss_warning,
        state: state_dto(&outcome.state),
    }))
}

async fn force_retry(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<StateResponse>> {
    let orchestrator = state.orchestrator.clone();
    let branch_state = run_blocking(move || orchestrator.force_retry(&code)).await?;
    Ok(Json(StateResponse {
        success: true,
        state: state_dto(&branch_state),
    }))
}

// ============================================================================
// Bulk operations
// ============================================================================

async fn apply_all(State(state): State<AppState>) -> Result<Json<Value>> {
    let orchestrator = state.orchestrator.clone();
    let reports = tokio::task::spawn_blocking(move || orchestrator.apply_all())
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    let reports: Vec<ApplyReportDto> = reports.into_iter().map(apply_report_dto).collect();
    Ok(Json(json!({
        "success": true,
        "reports": reports,
    })))
}

async fn rollback_all_to_previous(State(state): State<AppState>) -> Result<Json<Value>> {
    let orchestrator = state.orchestrator.clone();
    let reports = tokio::task::spawn_blocking(move || orchestrator.rollback_all_to_previous())
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    let reports: Vec<RollbackReportDto> =
        reports.into_iter().map(rollback_report_dto).collect();
    Ok(Json(json!({
        "success": true,
        "reports": reports,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_router;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use fleetmig_core::{
        Branch, BranchStateStore, ConnectionDescriptor, InMemoryDirectory, Orchestrator,
        OrchestratorConfig, Provider, SqliteConnector,
    };
    use std::sync::Arc;

    fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("state")).unwrap();
        let store = Arc::new(BranchStateStore::open(&db).unwrap());
        let directory = Arc::new(InMemoryDirectory::new());
        for code in ["acme", "globex"] {
            directory.insert(
                Branch::new(
                    code,
                    Provider::Sqlite,
                    ConnectionDescriptor::new(
                        dir.path().join(format!("{code}.db")).to_str().unwrap(),
                    ),
                )
                .unwrap(),
            );
        }
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(crate::migrations::catalog().unwrap()),
            store,
            Arc::new(SqliteConnector),
            directory as Arc<dyn fleetmig_core::BranchDirectory>,
            OrchestratorConfig::default(),
        ));
        for code in ["acme", "globex"] {
            orchestrator.register_branch(code).unwrap();
        }
        (AppState::new(orchestrator), dir)
    }

    #[tokio::test]
    async fn test_health_and_fleet_overview() {
        let (state, _guard) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.get("/health").await;
        response.assert_status_ok();

        let response = server.get("/branches").await;
        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["count"], 2);
        assert_eq!(body["branches"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn test_apply_and_status_flow() {
        let (state, _guard) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.get("/branches/acme/migration-status").await;
        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["state"]["status"], "pending");
        assert_eq!(body["state"]["applied"].as_array().unwrap().len(), 0);

        let response = server.post("/branches/acme/migrations/apply").await;
        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["success"], true);
        assert_eq!(body["state"]["status"], "completed");
        assert_eq!(body["state"]["applied"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_branch_is_404() {
        let (state, _guard) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.get("/branches/ghost/migration-status").await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "UNKNOWN_BRANCH");
    }

    #[tokio::test]
    async fn test_rollback_on_fresh_branch_is_rejected() {
        let (state, _guard) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.post("/branches/acme/migrations/rollback-last").await;
        response.assert_status(StatusCode::CONFLICT);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["error"]["code"], "INVALID_ROLLBACK_TARGET");
    }

    #[tokio::test]
    async fn test_rollback_of_lossy_head_carries_warning() {
        let (state, _guard) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        server
            .post("/branches/acme/migrations/apply")
            .await
            .assert_status_ok();

        let response = server.post("/branches/acme/migrations/rollback-last").await;
        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["data_loss_warning"], true);
        assert_eq!(
            body["rolled_back"],
            "20240217093000_consolidate_plan_tiers"
        );
        assert_eq!(body["state"]["applied"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_apply_all_reports_every_branch() {
        let (state, _guard) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.post("/branches/apply-all").await;
        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        let reports = body["reports"].as_array().unwrap();
        assert_eq!(reports.len(), 2);
        for report in reports {
            assert_eq!(report["state"]["status"], "completed");
        }
    }

    #[tokio::test]
    async fn test_force_retry_on_healthy_branch_is_noop() {
        let (state, _guard) = test_state();
        let server = TestServer::new(create_router(state)).unwrap();

        let response = server.post("/branches/acme/migrations/force-retry").await;
        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["state"]["status"], "pending");
    }
}
