//! Router creation and configuration

use super::handlers::*;
use super::types::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create REST API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/transactions/process", post(process_transaction))
        .route("/v1/transactions/batch", post(process_batch))
        .route("/v1/transactions/:transaction_id", get(get_transaction))
        .route("/v1/users/:user_id/risk-score", get(get_user_risk))
        .route(
            "/v1/users/:user_id/recent-transactions",
            get(get_recent_transactions),
        )
        .route("/v1/alerts", get(list_alerts))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
