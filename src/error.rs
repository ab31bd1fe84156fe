//! Core error taxonomy
//!
//! Typed error kinds for the orchestration core (queue, resolver, cache,
//! driver, scheduler). Replaces ad-hoc `anyhow` errors with a closed
//! enumeration whose HTTP mapping lives in one place instead of being
//! re-derived at every call site.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Closed error kinds, per the error-handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    Conflict,
    QuotaExceeded,
    ExtractionError,
    DownloadError,
    InternalError,
}

/// A core error: a kind plus a human-readable message and an optional
/// raw-output detail (never itself surfaced as the kind).
#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl CoreError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), detail: None }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExtractionError, message)
    }

    pub fn download(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DownloadError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ExtractionError | ErrorKind::DownloadError => StatusCode::BAD_GATEWAY,
            ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        match self.kind {
            ErrorKind::InternalError => {
                tracing::error!(message = %self.message, detail = ?self.detail, "internal error")
            }
            ErrorKind::ExtractionError | ErrorKind::DownloadError => {
                tracing::warn!(kind = ?self.kind, message = %self.message, "terminal item error")
            }
            _ => tracing::debug!(kind = ?self.kind, message = %self.message, "request rejected"),
        }
        let status = self.status();
        let body = ErrorBody { error: self.kind, message: self.message, detail: self.detail };
        (status, Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::internal(format!("persistence store error: {e}"))
    }
}

impl From<r2d2::Error> for CoreError {
    fn from(e: r2d2::Error) -> Self {
        CoreError::internal(format!("connection pool error: {e}"))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::not_found(format!("path not found: {e}")),
            _ => CoreError::internal(format!("I/O error: {e}")),
        }
    }
}

impl From<uuid::Error> for CoreError {
    fn from(e: uuid::Error) -> Self {
        CoreError::validation(format!("invalid id: {e}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_non_ok_status() {
        for kind in [
            ErrorKind::ValidationError,
            ErrorKind::NotFound,
            ErrorKind::Conflict,
            ErrorKind::QuotaExceeded,
            ErrorKind::ExtractionError,
            ErrorKind::DownloadError,
            ErrorKind::InternalError,
        ] {
            assert_ne!(CoreError::new(kind, "x").status(), StatusCode::OK);
        }
    }

    #[test]
    fn io_not_found_maps_to_not_found_kind() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CoreError = io.into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn detail_is_carried_separately_from_message() {
        let err = CoreError::download("exit code 1").with_detail("raw stderr tail");
        assert_eq!(err.kind, ErrorKind::DownloadError);
        assert_eq!(err.detail.as_deref(), Some("raw stderr tail"));
    }
}
