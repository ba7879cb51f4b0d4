//! Error types for the alert engine.
//!
//! [`CoreError`] is the single error taxonomy for the crate. The important
//! propagation rules:
//!
//! - Classification and cooldown logic never raise on bad input; unknown
//!   event types normalize to `unknown` and are simply non-dangerous.
//! - State-machine violations are returned as typed errors to the caller,
//!   never silently ignored.
//! - Channel delivery failures are always recovered locally: they are logged
//!   into the notification ledger and must never surface from alert creation
//!   or acknowledgement.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::model::AlertStatus;

/// Errors that can occur in the alert lifecycle engine.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed event, contact, or alert fields. Rejected before any state change.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown alert, contact, or subject.
    #[error("not found: {0}")]
    NotFound(String),

    /// Illegal state-machine move (e.g., acknowledging a resolved alert).
    #[error("invalid transition: cannot {action} an alert in status '{from}'")]
    InvalidTransition {
        /// Status the alert was in when the move was attempted.
        from: AlertStatus,
        /// The attempted operation.
        action: &'static str,
    },

    /// Resolve called on an alert that is already resolved.
    #[error("alert is already resolved")]
    AlreadyResolved,

    /// No reachable contacts or no channel configured for a dispatch.
    ///
    /// Normally surfaced as a `failed` ledger entry rather than an error;
    /// this variant exists for the few paths where there is no ledger to
    /// write to.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A database operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CoreError {
    /// Short machine-readable code for the error object in HTTP responses.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::AlreadyResolved => "already_resolved",
            CoreError::Configuration(_) => "configuration_error",
            CoreError::Storage(_) => "storage_error",
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::InvalidTransition { .. } | CoreError::AlreadyResolved => {
                StatusCode::CONFLICT
            }
            CoreError::Configuration(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
