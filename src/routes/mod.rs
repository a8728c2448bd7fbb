// ============================================================================
// Axum Routes Module
// ============================================================================
//
// Structure:
// - mod.rs: Main router assembly and middleware
// - health.rs: Health check and metrics endpoints
// - transfers.rs: Transfer submission endpoints
//
// ============================================================================

mod health;
mod transfers;

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

/// Create the main application router with all routes
pub fn create_router(app_context: Arc<AppContext>) -> Router {
    Router::new()
        // Health and monitoring
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Transfers
        .route("/transfers", post(transfers::create_transfer))
        .route("/transfers/:id", put(transfers::fulfil_transfer))
        .route("/transfers/:id/fulfil", put(transfers::fulfil_transfer))
        .route("/transfers/:id/error", put(transfers::transfer_error))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(app_context)
}
