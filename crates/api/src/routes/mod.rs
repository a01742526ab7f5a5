//! HTTP route handlers.

pub mod books;
pub mod dashboard;
pub mod health;
pub mod loans;
pub mod metrics;
pub mod requests;

use std::str::FromStr;

use store::LibraryStore;
use workflow::WorkflowEngine;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: LibraryStore> {
    pub engine: WorkflowEngine<S>,
}

/// Parses a path segment into a typed identifier.
fn parse_id<T>(id: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = uuid::Error>,
{
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
