use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

use crate::ledger::LedgerError;

/// HTTP-facing error type.
///
/// Only failures the caller can act on reach this type. Notification and
/// telemetry failures are absorbed where they happen.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Validation Errors =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Ledger Errors =====
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Json(_) | AppError::Ledger(LedgerError::Encoding { .. }) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Ledger(LedgerError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Ledger(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// User-friendly message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Json(e) => format!("Malformed request body: {}", e),
            AppError::Ledger(e @ LedgerError::Encoding { .. }) => {
                format!("Validation error: {}", e)
            }
            AppError::Ledger(_) => "Ledger unavailable".to_string(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Json(_) | AppError::Ledger(LedgerError::Encoding { .. }) => "VALIDATION_ERROR",
            AppError::Ledger(_) => "LEDGER_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let error_code = self.error_code();

        // For server errors, don't expose internal details to client
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.user_message()
        };

        let body = json!({
            "error": message,
            "error_code": error_code,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
