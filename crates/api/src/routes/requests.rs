//! Request ledger endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::RequestId;
use domain::BookRequest;
use store::LibraryStore;

use super::loans::LoanResponse;
use super::{AppState, parse_id};
use crate::actor::CurrentActor;
use crate::error::ApiError;

/// GET /requests/mine: the student's own requests, newest first.
#[tracing::instrument(skip(state))]
pub async fn mine<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<BookRequest>>, ApiError> {
    Ok(Json(state.engine.list_my_requests(actor).await?))
}

/// GET /requests: every request, newest first (librarian).
#[tracing::instrument(skip(state))]
pub async fn list<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<BookRequest>>, ApiError> {
    Ok(Json(state.engine.list_all_requests(actor).await?))
}

/// GET /requests/pending: pending and approved requests, oldest first (librarian).
#[tracing::instrument(skip(state))]
pub async fn pending<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<BookRequest>>, ApiError> {
    Ok(Json(state.engine.list_pending(actor).await?))
}

/// POST /requests/{id}/approve
#[tracing::instrument(skip(state))]
pub async fn approve<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<BookRequest>, ApiError> {
    let request_id: RequestId = parse_id(&id)?;
    Ok(Json(state.engine.approve_request(actor, request_id).await?))
}

/// POST /requests/{id}/reject
#[tracing::instrument(skip(state))]
pub async fn reject<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<BookRequest>, ApiError> {
    let request_id: RequestId = parse_id(&id)?;
    Ok(Json(state.engine.reject_request(actor, request_id).await?))
}

/// POST /requests/{id}/issue: hand out a copy against an approved request.
#[tracing::instrument(skip(state))]
pub async fn issue<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<LoanResponse>), ApiError> {
    let request_id: RequestId = parse_id(&id)?;
    let loan = state.engine.issue_book(actor, request_id).await?;
    Ok((StatusCode::CREATED, Json(LoanResponse::from(loan))))
}
