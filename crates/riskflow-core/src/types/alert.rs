//! Fraud alerts

use crate::error::CoreError;
use crate::risk::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alert type raised for fraud-flagged transactions
pub const ALERT_TYPE_FRAUD_DETECTED: &str = "FRAUD_DETECTED";

/// Alert workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Open,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Open => "OPEN",
            AlertStatus::Resolved => "RESOLVED",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(AlertStatus::Open),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            other => Err(CoreError::InvalidValue(format!(
                "unknown alert status '{}'",
                other
            ))),
        }
    }
}

/// A fraud alert row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub transaction_id: String,
    pub alert_type: String,
    pub severity: Severity,
    pub description: String,
    pub confidence_score: f64,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Build a new OPEN fraud alert for a flagged transaction
    pub fn fraud_detected(transaction_id: &str, fraud_score: f64) -> Self {
        Self {
            alert_id: format!("alert_{}", uuid::Uuid::new_v4().simple()),
            transaction_id: transaction_id.to_string(),
            alert_type: ALERT_TYPE_FRAUD_DETECTED.to_string(),
            severity: Severity::from_score(fraud_score),
            description: format!("Fraud detected for transaction {}", transaction_id),
            confidence_score: fraud_score,
            status: AlertStatus::Open,
            created_at: Utc::now(),
        }
    }
}
