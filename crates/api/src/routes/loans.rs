//! Issuance ledger endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use chrono::Utc;
use common::LoanId;
use domain::IssuedBook;
use serde::Serialize;
use store::LibraryStore;

use super::{AppState, parse_id};
use crate::actor::CurrentActor;
use crate::error::ApiError;

/// A loan as returned over HTTP, with its overdue flag computed at read time.
#[derive(Serialize)]
pub struct LoanResponse {
    #[serde(flatten)]
    pub loan: IssuedBook,
    pub overdue: bool,
}

impl From<IssuedBook> for LoanResponse {
    fn from(loan: IssuedBook) -> Self {
        let overdue = loan.is_overdue(Utc::now());
        Self { loan, overdue }
    }
}

fn responses(loans: Vec<IssuedBook>) -> Vec<LoanResponse> {
    loans.into_iter().map(LoanResponse::from).collect()
}

/// GET /loans/mine: the student's own loans, newest first.
#[tracing::instrument(skip(state))]
pub async fn mine<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<LoanResponse>>, ApiError> {
    Ok(Json(responses(state.engine.list_my_loans(actor).await?)))
}

/// GET /loans: every loan, active and returned (librarian).
#[tracing::instrument(skip(state))]
pub async fn list<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<LoanResponse>>, ApiError> {
    Ok(Json(responses(state.engine.list_issued(actor).await?)))
}

/// POST /loans/{id}/return: close a loan (librarian).
#[tracing::instrument(skip(state))]
pub async fn return_book<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<LoanResponse>, ApiError> {
    let loan_id: LoanId = parse_id(&id)?;
    let loan = state.engine.return_book(actor, loan_id).await?;
    Ok(Json(LoanResponse::from(loan)))
}
