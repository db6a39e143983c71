//! RiskFlow Core - Domain types and scoring rules for the RiskFlow fraud pipeline
//!
//! This crate provides the fundamental types shared by the intake service and
//! the feedback processor:
//! - Transaction, user, alert and feature records
//! - Decision and alert events carried over the event channel
//! - Cache key layout and expiry constants
//! - The local scoring heuristic and the user risk accumulation rules
//! - Request validation

pub mod error;
pub mod event;
pub mod keys;
pub mod risk;
pub mod scoring;
pub mod types;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{AlertEvent, DecisionEvent, ALERT_TOPIC, DEAD_LETTER_TOPIC, DECISION_TOPIC};
pub use risk::{clamp_risk, risk_adjustment, Severity, DEFAULT_USER_RISK};
pub use scoring::{
    heuristic_score, is_fraud, RiskFactor, ScoringInput, ScoringOutput, FRAUD_THRESHOLD,
};
pub use types::{
    Alert, AlertStatus, BatchItemResult, BatchTransactionRequest, BatchTransactionResponse,
    FeatureRecord, TransactionRecord, TransactionRequest, TransactionResponse, User,
};
