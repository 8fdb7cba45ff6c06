use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Top-level application error. All variants carry a human-readable
/// message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Database errors ──────────────────────────────────────────────────────
    #[error("Database query failed: {message}")]
    DatabaseQueryFailed {
        message: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Session '{id}' not found")]
    SessionNotFound { id: String },

    #[error("Report '{id}' not found")]
    ReportNotFound { id: String },

    #[error("Pipeline task '{id}' not found")]
    TaskNotFound { id: String },

    // ── Upstream collaborator errors ─────────────────────────────────────────
    #[error("AI turn service unavailable at {host}")]
    AgentUnavailable { host: String },

    #[error("Inference error: {message}")]
    InferenceError { message: String },

    #[error("Transcription failed: {message}")]
    TranscriptionFailed { message: String },

    #[error("Speech synthesis failed: {message}")]
    SynthesisFailed { message: String },

    // ── Concurrency ──────────────────────────────────────────────────────────
    #[error("A stream is already active for session '{session_id}'")]
    StreamAlreadyActive { session_id: String },

    // ── Preconditions ────────────────────────────────────────────────────────
    #[error("Cannot finalize report '{report_id}': missing {modality} verdict")]
    MissingModality { report_id: String, modality: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Field '{field_name}' exceeds max length of {max_length} (actual: {actual_length})")]
    FieldTooLong { field_name: String, max_length: usize, actual_length: usize },

    #[error("Field '{field_name}' is invalid: {message}")]
    InvalidField { field_name: String, message: String },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn db_query(message: impl Into<String>, source: sqlx::Error) -> Self {
        AppError::DatabaseQueryFailed { message: message.into(), source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::SessionNotFound { .. }
                | AppError::ReportNotFound { .. }
                | AppError::TaskNotFound { .. }
        )
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::FieldTooLong { .. }
                | AppError::InvalidField { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::StreamAlreadyActive { .. })
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, AppError::MissingModality { .. })
    }

    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            AppError::AgentUnavailable { .. }
                | AppError::InferenceError { .. }
                | AppError::TranscriptionFailed { .. }
                | AppError::SynthesisFailed { .. }
        )
    }

    pub fn status(&self) -> StatusCode {
        if self.is_validation() {
            StatusCode::BAD_REQUEST
        } else if self.is_not_found() {
            StatusCode::NOT_FOUND
        } else if self.is_conflict() {
            StatusCode::CONFLICT
        } else if self.is_precondition() {
            StatusCode::UNPROCESSABLE_ENTITY
        } else if self.is_upstream() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
