//! Feature store observations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feature name for the raw transaction amount
pub const FEATURE_TRANSACTION_AMOUNT: &str = "transaction_amount";

/// Feature name for the transaction fraud score
pub const FEATURE_FRAUD_SCORE: &str = "fraud_score";

/// One append-only row of the per-user feature time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub user_id: String,
    pub feature_name: String,
    pub feature_value: f64,
    pub feature_timestamp: DateTime<Utc>,
}

impl FeatureRecord {
    pub fn new(
        user_id: impl Into<String>,
        feature_name: impl Into<String>,
        feature_value: f64,
        feature_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            feature_name: feature_name.into(),
            feature_value,
            feature_timestamp,
        }
    }
}
