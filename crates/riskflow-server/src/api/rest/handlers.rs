//! API endpoint handlers

use super::extractors::{JsonExtractor, QueryExtractor};
use super::types::*;
use crate::error::ServerError;
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use riskflow_core::{
    AlertStatus, BatchTransactionRequest, BatchTransactionResponse, TransactionRecord,
    TransactionRequest,
};
use riskflow_runtime::MetricsSnapshot;
use tracing::debug;

/// Marks a response served from the idempotency cache
pub const REPLAY_HEADER: &str = "x-idempotent-replay";

fn up_down(up: bool) -> String {
    let status = if up { "up" } else { "down" };
    status.to_string()
}

/// Health check endpoint
pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.intake.health().await;
    let status = if report.is_healthy() {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: ServiceStatus {
            postgres: up_down(report.store),
            redis: up_down(report.cache),
        },
    })
}

pub(super) async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Submit one transaction.
///
/// The body is written as stored so a replay returns the cached bytes.
#[axum::debug_handler]
pub(super) async fn process_transaction(
    State(state): State<AppState>,
    JsonExtractor(request): JsonExtractor<TransactionRequest>,
) -> Result<Response, ServerError> {
    let decision = state.intake.process_transaction(request).await?;

    let mut response = (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        decision.body,
    )
        .into_response();
    if decision.replayed {
        response
            .headers_mut()
            .insert(REPLAY_HEADER, HeaderValue::from_static("true"));
    }
    Ok(response)
}

#[axum::debug_handler]
pub(super) async fn process_batch(
    State(state): State<AppState>,
    JsonExtractor(payload): JsonExtractor<BatchTransactionRequest>,
) -> Result<Json<BatchTransactionResponse>, ServerError> {
    debug!(items = payload.transactions.len(), "Received batch");
    let response = state.intake.process_batch(payload.transactions).await?;
    Ok(Json(response))
}

pub(super) async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionRecord>, ServerError> {
    let record = state.intake.get_transaction(&transaction_id).await?;
    Ok(Json(record))
}

pub(super) async fn get_user_risk(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<UserRiskResponse>, ServerError> {
    let user = state.intake.get_user_risk(&user_id).await?;
    Ok(Json(user.into()))
}

pub(super) async fn get_recent_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<RecentTransactionsResponse>, ServerError> {
    let transaction_ids = state.intake.recent_transactions(&user_id).await?;
    Ok(Json(RecentTransactionsResponse {
        user_id,
        transaction_ids,
    }))
}

pub(super) async fn list_alerts(
    State(state): State<AppState>,
    QueryExtractor(query): QueryExtractor<AlertsQuery>,
) -> Result<Json<AlertsResponse>, ServerError> {
    let status = match query.status.as_deref() {
        Some(raw) => raw
            .parse::<AlertStatus>()
            .map_err(|e| ServerError::InvalidRequest(e.to_string()))?,
        None => AlertStatus::Open,
    };

    let alerts = state
        .intake
        .list_alerts(status, query.effective_limit())
        .await?;
    Ok(Json(AlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}
