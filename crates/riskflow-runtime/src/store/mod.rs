//! Persistent store
//!
//! The system of record for users, transactions, alerts, feature history and
//! the feedback ledger. Backends must provide their own atomicity; the
//! pipeline adds no locking on top.

mod memory;
#[cfg(feature = "sqlx")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlx")]
pub use postgres::PostgresStore;

use crate::error::StoreResult;
use riskflow_core::{Alert, AlertStatus, FeatureRecord, TransactionRecord, User};

/// Result of applying a risk adjustment for one decision event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskUpdate {
    /// User risk after the call
    pub risk_score: f64,
    /// False when the event had already been applied and nothing changed
    pub applied: bool,
}

/// Result of creating an alert for a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum AlertInsert {
    Created,
    /// An alert already exists for the transaction; carries its id
    Exists(String),
}

/// Trait for persistent store backends
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Liveness probe
    async fn ping(&self) -> StoreResult<()>;

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Average amount over the user's stored transactions, `None` without history
    async fn average_amount(&self, user_id: &str) -> StoreResult<Option<f64>>;

    /// Insert the user with `default_risk` unless it already exists
    async fn ensure_user(&self, user_id: &str, default_risk: f64) -> StoreResult<()>;

    /// Insert a new transaction. Fails with `Duplicate` on an existing id and
    /// with `ForeignKey` when the user row is missing.
    async fn insert_transaction(&self, record: &TransactionRecord) -> StoreResult<()>;

    async fn get_transaction(&self, transaction_id: &str) -> StoreResult<Option<TransactionRecord>>;

    /// Fill device/IP columns that are still empty. Existing values are kept.
    async fn enrich_transaction(
        &self,
        transaction_id: &str,
        device_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> StoreResult<()>;

    /// Atomically apply `clamp(current + adjustment)` to the user's risk and
    /// record `event_id` in the feedback ledger. A second call with the same
    /// `event_id` changes nothing and reports `applied == false`.
    async fn apply_risk_feedback(
        &self,
        event_id: &str,
        user_id: &str,
        adjustment: f64,
    ) -> StoreResult<RiskUpdate>;

    async fn append_features(&self, records: &[FeatureRecord]) -> StoreResult<()>;

    /// Create the alert unless one exists for the same transaction. Fails
    /// with `ForeignKey` when the transaction row is missing.
    async fn create_alert(&self, alert: &Alert) -> StoreResult<AlertInsert>;

    /// Alerts with `status`, newest first
    async fn list_alerts(&self, status: AlertStatus, limit: usize) -> StoreResult<Vec<Alert>>;
}
