//! Domain records for RiskFlow
//!
//! This module contains the data model shared by every component:
//! - Transaction requests, stored rows and decision responses
//! - Users and their rolling risk score
//! - Fraud alerts
//! - Feature store observations

pub mod alert;
pub mod feature;
pub mod transaction;
pub mod user;

pub use alert::{Alert, AlertStatus, ALERT_TYPE_FRAUD_DETECTED};
pub use feature::{FeatureRecord, FEATURE_FRAUD_SCORE, FEATURE_TRANSACTION_AMOUNT};
pub use transaction::{
    BatchItemResult, BatchTransactionRequest, BatchTransactionResponse, TransactionRecord,
    TransactionRequest, TransactionResponse, MAX_TRANSACTION_ID_LEN,
};
pub use user::User;
