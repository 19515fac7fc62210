use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleetmig_core::Error as CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error code for a core error, shared by HTTP responses and bulk
/// report entries.
pub fn error_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::UnknownBranch(_) => "UNKNOWN_BRANCH",
        CoreError::UnknownMigration(_) => "UNKNOWN_MIGRATION",
        CoreError::BranchBusy { .. } => "BRANCH_BUSY",
        CoreError::LockLost { .. } => "LOCK_LOST",
        CoreError::InvalidRollbackTarget { .. } => "INVALID_ROLLBACK_TARGET",
        CoreError::ManualInterventionRequired { .. } => "MANUAL_INTERVENTION_REQUIRED",
        CoreError::InvalidBranchCode(_) => "INVALID_BRANCH_CODE",
        CoreError::CatalogCorruption { .. } => "CATALOG_CORRUPTION",
        CoreError::CatalogDefinition(_) => "CATALOG_DEFINITION",
        CoreError::Statement { .. } => "STATEMENT_FAILURE",
        CoreError::AttemptTimeout { .. } => "ATTEMPT_TIMEOUT",
        CoreError::Unsupported { .. } => "UNSUPPORTED_OPERATION",
        CoreError::Connection(_) => "CONNECTION_ERROR",
        CoreError::Store(_) => "STORE_ERROR",
        CoreError::Serialization(_) | CoreError::Deserialization(_) => "SERIALIZATION_ERROR",
    }
}

fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::UnknownBranch(_) | CoreError::UnknownMigration(_) => StatusCode::NOT_FOUND,
        CoreError::BranchBusy { .. }
        | CoreError::LockLost { .. }
        | CoreError::InvalidRollbackTarget { .. } => StatusCode::CONFLICT,
        CoreError::ManualInterventionRequired { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::InvalidBranchCode(_) => StatusCode::BAD_REQUEST,
        CoreError::Statement { .. }
        | CoreError::AttemptTimeout { .. }
        | CoreError::Connection(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ServerError::Core(err) => (status_for(err), error_code(err), err.to_string()),
            ServerError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "success": false,
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
