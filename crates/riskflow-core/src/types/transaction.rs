//! Transaction request, stored row and decision response types

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for client-supplied transaction identifiers
pub const MAX_TRANSACTION_ID_LEN: usize = 128;

/// Incoming transaction submitted for scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Client retry key. When present it is used as the transaction identifier
    /// and a cached response for it is replayed unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,

    pub user_id: String,

    pub amount: f64,

    #[serde(default)]
    pub merchant_id: String,

    /// Merchant risk in [0, 1]
    #[serde(default)]
    pub merchant_risk: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_lat: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_lon: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl TransactionRequest {
    pub fn new(
        user_id: impl Into<String>,
        amount: f64,
        merchant_id: impl Into<String>,
        merchant_risk: f64,
    ) -> Self {
        Self {
            transaction_id: None,
            user_id: user_id.into(),
            amount,
            merchant_id: merchant_id.into(),
            merchant_risk,
            location_lat: None,
            location_lon: None,
            device_id: None,
            ip_address: None,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    /// Check the request before anything is read or written
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(CoreError::invalid("user_id", "must not be empty"));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(CoreError::invalid(
                "amount",
                format!("must be a non-negative number, got {}", self.amount),
            ));
        }
        if !self.merchant_risk.is_finite() || !(0.0..=1.0).contains(&self.merchant_risk) {
            return Err(CoreError::invalid(
                "merchant_risk",
                format!("must be within [0, 1], got {}", self.merchant_risk),
            ));
        }
        if let Some(id) = &self.transaction_id {
            if id.trim().is_empty() {
                return Err(CoreError::invalid("transaction_id", "must not be empty"));
            }
            if id.len() > MAX_TRANSACTION_ID_LEN {
                return Err(CoreError::invalid(
                    "transaction_id",
                    format!("must be at most {} characters", MAX_TRANSACTION_ID_LEN),
                ));
            }
        }
        if let Some(lat) = self.location_lat {
            if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
                return Err(CoreError::invalid("location_lat", "must be within [-90, 90]"));
            }
        }
        if let Some(lon) = self.location_lon {
            if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
                return Err(CoreError::invalid("location_lon", "must be within [-180, 180]"));
            }
        }
        Ok(())
    }
}

/// Persisted transaction row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub user_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub merchant_id: String,
    pub merchant_risk: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub is_fraud: bool,
    pub fraud_score: f64,
}

/// Decision returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub transaction_id: String,
    pub is_fraud: bool,
    pub fraud_score: f64,
    pub confidence: f64,
    pub risk_factors: Vec<String>,
    pub processing_time_ms: u64,
}

/// Batch submission payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchTransactionRequest {
    pub transactions: Vec<TransactionRequest>,
}

/// Outcome of one batch item. Items succeed or fail independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchItemResult {
    Ok(TransactionResponse),
    Error { error: String, code: u16 },
}

impl BatchItemResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, BatchItemResult::Ok(_))
    }
}

/// Batch response, results in submission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTransactionResponse {
    pub results: Vec<BatchItemResult>,
    pub total_processing_time_ms: u64,
}
