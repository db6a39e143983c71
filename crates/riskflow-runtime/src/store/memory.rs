//! In-memory store
//!
//! Memory-based store for tests and single-process development deployments.
//! All state is lost when the process exits.

use super::{AlertInsert, RiskUpdate, Store};
use crate::error::{StoreError, StoreResult};
use chrono::Utc;
use riskflow_core::{clamp_risk, Alert, AlertStatus, FeatureRecord, TransactionRecord, User};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    transactions: HashMap<String, TransactionRecord>,
    alerts: Vec<Alert>,
    /// transaction_id -> alert_id
    alert_index: HashMap<String, String>,
    features: Vec<FeatureRecord>,
    /// transaction_id -> risk after the adjustment was applied
    ledger: HashMap<String, f64>,
}

/// In-memory store backend
///
/// A single lock guards all tables, so every trait method is atomic.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user row
    pub async fn insert_user(&self, user: User) {
        self.state
            .write()
            .await
            .users
            .insert(user.user_id.clone(), user);
    }

    /// Feature rows recorded for a user, in insertion order
    pub async fn features_for(&self, user_id: &str) -> Vec<FeatureRecord> {
        self.state
            .read()
            .await
            .features
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Alerts recorded for a transaction
    pub async fn alerts_for(&self, transaction_id: &str) -> Vec<Alert> {
        self.state
            .read()
            .await
            .alerts
            .iter()
            .filter(|a| a.transaction_id == transaction_id)
            .cloned()
            .collect()
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn average_amount(&self, user_id: &str) -> StoreResult<Option<f64>> {
        let state = self.state.read().await;
        let (sum, count) = state
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .fold((0.0, 0usize), |(sum, count), t| (sum + t.amount, count + 1));

        if count == 0 {
            Ok(None)
        } else {
            Ok(Some(sum / count as f64))
        }
    }

    async fn ensure_user(&self, user_id: &str, default_risk: f64) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| User::new(user_id, default_risk));
        Ok(())
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> StoreResult<()> {
        let mut state = self.state.write().await;

        if !state.users.contains_key(&record.user_id) {
            return Err(StoreError::ForeignKey(format!(
                "transaction {} references unknown user {}",
                record.transaction_id, record.user_id
            )));
        }
        if state.transactions.contains_key(&record.transaction_id) {
            return Err(StoreError::Duplicate(format!(
                "transaction {}",
                record.transaction_id
            )));
        }

        state
            .transactions
            .insert(record.transaction_id.clone(), record.clone());
        Ok(())
    }

    async fn get_transaction(&self, transaction_id: &str) -> StoreResult<Option<TransactionRecord>> {
        Ok(self.state.read().await.transactions.get(transaction_id).cloned())
    }

    async fn enrich_transaction(
        &self,
        transaction_id: &str,
        device_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if let Some(tx) = state.transactions.get_mut(transaction_id) {
            if tx.device_id.is_none() {
                tx.device_id = device_id.map(str::to_string);
            }
            if tx.ip_address.is_none() {
                tx.ip_address = ip_address.map(str::to_string);
            }
        }
        Ok(())
    }

    async fn apply_risk_feedback(
        &self,
        event_id: &str,
        user_id: &str,
        adjustment: f64,
    ) -> StoreResult<RiskUpdate> {
        let mut state = self.state.write().await;

        let current = state
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| User::new(user_id, riskflow_core::DEFAULT_USER_RISK))
            .risk_score;

        if state.ledger.contains_key(event_id) {
            return Ok(RiskUpdate {
                risk_score: current,
                applied: false,
            });
        }

        let risk_score = clamp_risk(current + adjustment);
        if let Some(user) = state.users.get_mut(user_id) {
            user.risk_score = risk_score;
            user.updated_at = Utc::now();
        }
        state.ledger.insert(event_id.to_string(), risk_score);

        Ok(RiskUpdate {
            risk_score,
            applied: true,
        })
    }

    async fn append_features(&self, records: &[FeatureRecord]) -> StoreResult<()> {
        self.state
            .write()
            .await
            .features
            .extend(records.iter().cloned());
        Ok(())
    }

    async fn create_alert(&self, alert: &Alert) -> StoreResult<AlertInsert> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.alert_index.get(&alert.transaction_id) {
            return Ok(AlertInsert::Exists(existing.clone()));
        }
        if !state.transactions.contains_key(&alert.transaction_id) {
            return Err(StoreError::ForeignKey(format!(
                "alert {} references unknown transaction {}",
                alert.alert_id, alert.transaction_id
            )));
        }
        state
            .alert_index
            .insert(alert.transaction_id.clone(), alert.alert_id.clone());
        state.alerts.push(alert.clone());
        Ok(AlertInsert::Created)
    }

    async fn list_alerts(&self, status: AlertStatus, limit: usize) -> StoreResult<Vec<Alert>> {
        let state = self.state.read().await;
        let mut alerts: Vec<Alert> = state
            .alerts
            .iter()
            .filter(|a| a.status == status)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        alerts.truncate(limit);
        Ok(alerts)
    }
}
