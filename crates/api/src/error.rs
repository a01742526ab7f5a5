//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use workflow::{ErrorKind, WorkflowError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input from the client.
    #[error("{0}")]
    BadRequest(String),
    /// Missing or unreadable actor headers.
    #[error("{0}")]
    Unauthenticated(String),
    /// Failure reported by the workflow engine.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl ApiError {
    /// The `kind` reported in the response body.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Unauthenticated(_) => "Unauthenticated",
            ApiError::Workflow(err) => err.kind().as_str(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Workflow(err) => status_for(err.kind()),
        }
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::InvalidBook => StatusCode::BAD_REQUEST,
        ErrorKind::DuplicateRequest
        | ErrorKind::OutOfStock
        | ErrorKind::InvalidTransition
        | ErrorKind::NotApproved
        | ErrorKind::AlreadyIssued
        | ErrorKind::AlreadyReturned
        | ErrorKind::InsufficientCopies
        | ErrorKind::CopiesOnLoan
        | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::OverCapacity | ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "internal server error");
        }

        let body = serde_json::json!({ "error": self.to_string(), "kind": self.kind() });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::BookId;

    #[test]
    fn workflow_errors_map_to_status_and_kind() {
        let err = ApiError::from(WorkflowError::OutOfStock {
            book_id: BookId::new(),
        });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.kind(), "OutOfStock");
    }

    #[test]
    fn client_errors_keep_their_own_kind() {
        let err = ApiError::Unauthenticated("missing x-user-id header".to_string());
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.kind(), "Unauthenticated");
        assert_eq!(err.to_string(), "missing x-user-id header");
    }

    #[test]
    fn every_kind_has_a_status() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::PermissionDenied), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::AlreadyReturned), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::Storage),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
