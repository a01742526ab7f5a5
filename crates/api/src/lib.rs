//! HTTP adapter for the library lending workflow.
//!
//! Exposes the workflow engine's entry points as JSON endpoints, reads the
//! acting user from identity headers, and serves Prometheus metrics.

pub mod actor;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use store::LibraryStore;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use workflow::WorkflowEngine;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: LibraryStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/books",
            get(routes::books::list::<S>).post(routes::books::create::<S>),
        )
        .route(
            "/books/{id}",
            get(routes::books::get::<S>)
                .put(routes::books::update::<S>)
                .delete(routes::books::delete::<S>),
        )
        .route("/books/{id}/requests", post(routes::books::request::<S>))
        .route("/requests", get(routes::requests::list::<S>))
        .route("/requests/mine", get(routes::requests::mine::<S>))
        .route("/requests/pending", get(routes::requests::pending::<S>))
        .route("/requests/{id}/approve", post(routes::requests::approve::<S>))
        .route("/requests/{id}/reject", post(routes::requests::reject::<S>))
        .route("/requests/{id}/issue", post(routes::requests::issue::<S>))
        .route("/loans", get(routes::loans::list::<S>))
        .route("/loans/mine", get(routes::loans::mine::<S>))
        .route("/loans/{id}/return", post(routes::loans::return_book::<S>))
        .route("/dashboard/librarian", get(routes::dashboard::librarian::<S>))
        .route("/dashboard/student", get(routes::dashboard::student::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
}

/// Wraps a store in a workflow engine and the shared handler state.
pub fn create_state<S: LibraryStore + 'static>(store: S) -> Arc<AppState<S>> {
    Arc::new(AppState {
        engine: WorkflowEngine::new(store),
    })
}
