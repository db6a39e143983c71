//! Events carried over the event channel

use crate::risk::Severity;
use crate::types::{Alert, TransactionRecord};
use serde::{Deserialize, Serialize};

/// Topic carrying scored transaction decisions, keyed by user id
pub const DECISION_TOPIC: &str = "transaction-decisions";

/// Topic carrying fraud alerts
pub const ALERT_TOPIC: &str = "fraud-alerts";

/// Topic receiving decision events that could not be processed
pub const DEAD_LETTER_TOPIC: &str = "transaction-decisions-dlq";

/// Emitted by the intake service after a transaction is persisted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
    pub fraud_score: f64,
    pub is_fraud: bool,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl DecisionEvent {
    pub fn from_record(record: &TransactionRecord) -> Self {
        Self {
            transaction_id: record.transaction_id.clone(),
            user_id: record.user_id.clone(),
            amount: record.amount,
            fraud_score: record.fraud_score,
            is_fraud: record.is_fraud,
            timestamp: record.timestamp.timestamp(),
            device_id: record.device_id.clone(),
            ip_address: record.ip_address.clone(),
        }
    }

    /// Partition key: all events of one user land on the same partition
    pub fn partition_key(&self) -> &str {
        &self.user_id
    }
}

/// Emitted by the feedback processor for every newly created alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: String,
    pub transaction_id: String,
    pub user_id: String,
    pub alert_type: String,
    pub severity: Severity,
    pub description: String,
    pub fraud_score: f64,
    /// Unix seconds
    pub timestamp: i64,
}

impl AlertEvent {
    pub fn from_alert(alert: &Alert, user_id: &str, fraud_score: f64) -> Self {
        Self {
            alert_id: alert.alert_id.clone(),
            transaction_id: alert.transaction_id.clone(),
            user_id: user_id.to_string(),
            alert_type: alert.alert_type.clone(),
            severity: alert.severity,
            description: alert.description.clone(),
            fraud_score,
            timestamp: alert.created_at.timestamp(),
        }
    }
}
