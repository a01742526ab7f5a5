//! Inventory endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::BookId;
use domain::{Book, BookRequest, BookUpdate, NewBook};
use store::LibraryStore;

use super::{AppState, parse_id};
use crate::actor::CurrentActor;
use crate::error::ApiError;

/// GET /books: list the inventory.
#[tracing::instrument(skip(state))]
pub async fn list<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
) -> Result<Json<Vec<Book>>, ApiError> {
    Ok(Json(state.engine.list_books(actor).await?))
}

/// POST /books: add a title (librarian).
#[tracing::instrument(skip(state, req))]
pub async fn create<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Json(req): Json<NewBook>,
) -> Result<(StatusCode, Json<Book>), ApiError> {
    let book = state.engine.add_book(actor, req).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

/// GET /books/{id}: load one book.
#[tracing::instrument(skip(state))]
pub async fn get<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<Json<Book>, ApiError> {
    let book_id: BookId = parse_id(&id)?;
    Ok(Json(state.engine.get_book(actor, book_id).await?))
}

/// PUT /books/{id}: edit title, author or total copies (librarian).
#[tracing::instrument(skip(state, req))]
pub async fn update<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
    Json(req): Json<BookUpdate>,
) -> Result<Json<Book>, ApiError> {
    let book_id: BookId = parse_id(&id)?;
    Ok(Json(state.engine.update_book(actor, book_id, req).await?))
}

/// DELETE /books/{id}: remove a book with its requests and loans (librarian).
#[tracing::instrument(skip(state))]
pub async fn delete<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let book_id: BookId = parse_id(&id)?;
    state.engine.delete_book(actor, book_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /books/{id}/requests: ask for a copy (student).
#[tracing::instrument(skip(state))]
pub async fn request<S: LibraryStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    CurrentActor(actor): CurrentActor,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<BookRequest>), ApiError> {
    let book_id: BookId = parse_id(&id)?;
    let request = state.engine.request_book(actor, book_id).await?;
    Ok((StatusCode::CREATED, Json(request)))
}
