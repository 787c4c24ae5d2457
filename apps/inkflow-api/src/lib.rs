//! Inkflow API - signing workflow service
//!
//! REST endpoints for:
//! - Single-recipient signature sessions (create, view, autosave, sign)
//! - Access-code verification with rate-limited lockout
//! - Multi-recipient envelopes with optional sequential signing
//! - Bulk sends with per-recipient failure tracking and retry
//!
//! The router is built here so integration tests can drive it over an
//! in-memory database without binding a socket.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod store;

use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Single-recipient sessions
        .route("/api/signature", post(handlers::create_signature))
        .route("/api/signature/:id", get(handlers::get_session))
        .route(
            "/api/signature/:id/access-code",
            get(handlers::access_code_state).post(handlers::verify_access_code),
        )
        .route("/api/signature/:id/autosave", post(handlers::autosave))
        .route("/api/signature/:id/sign", post(handlers::sign))
        .route("/api/signature/:id/cancel", post(handlers::cancel))
        .route("/api/signature/:id/archive", post(handlers::archive))
        // Envelopes
        .route("/api/envelope", post(handlers::create_envelope))
        .route("/api/envelope/:id", get(handlers::get_envelope))
        // Bulk send
        .route("/api/bulk-send", post(handlers::create_batch))
        .route("/api/bulk-send/:id", get(handlers::get_batch))
        .route("/api/bulk-send/:id/retry", post(handlers::retry_batch))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
