//! REST API type definitions

use chrono::{DateTime, Utc};
use riskflow_core::{Alert, User};
use riskflow_runtime::{IntakeService, MetricsCollector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub intake: Arc<IntakeService>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    pub fn new(intake: Arc<IntakeService>) -> Self {
        let metrics = intake.metrics().clone();
        Self { intake, metrics }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub version: String,
    pub services: ServiceStatus,
}

/// Per-collaborator liveness, "up" or "down"
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub postgres: String,
    pub redis: String,
}

/// Query parameters of `GET /v1/alerts`
#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub const DEFAULT_ALERT_LIMIT: i64 = 100;
pub const MAX_ALERT_LIMIT: i64 = 1000;

impl AlertsQuery {
    /// Requested limit clamped into [1, MAX_ALERT_LIMIT]
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_ALERT_LIMIT)
            .clamp(1, MAX_ALERT_LIMIT) as usize
    }
}

/// Alerts listing
#[derive(Debug, Serialize, Deserialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
    pub count: usize,
}

/// User risk lookup
#[derive(Debug, Serialize, Deserialize)]
pub struct UserRiskResponse {
    pub user_id: String,
    pub risk_score: f64,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for UserRiskResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            risk_score: user.risk_score,
            updated_at: user.updated_at,
        }
    }
}

/// Most recent transaction ids of a user, newest first
#[derive(Debug, Serialize, Deserialize)]
pub struct RecentTransactionsResponse {
    pub user_id: String,
    pub transaction_ids: Vec<String>,
}
