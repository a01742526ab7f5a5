//! Dashboard endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use store::LibraryStore;
use workflow::{LibrarianDashboard, StudentDashboard};

use super::AppState;
use crate::actor::CurrentActor;
use crate::error::ApiError;

/// GET /dashboard/librarian
#[tracing::instrument(skip(state))]
pub async fn librarian<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<LibrarianDashboard>, ApiError> {
    Ok(Json(state.engine.librarian_dashboard(actor).await?))
}

/// GET /dashboard/student
#[tracing::instrument(skip(state))]
pub async fn student<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<StudentDashboard>, ApiError> {
    Ok(Json(state.engine.student_dashboard(actor).await?))
}
