//! PostgreSQL store backend
//!
//! Uses runtime-checked `sqlx::query` calls so the crate builds without a
//! live database. The reference schema lives in `migrations/0001_init.sql`.

use super::{AlertInsert, RiskUpdate, Store};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use riskflow_core::{
    clamp_risk, Alert, AlertStatus, FeatureRecord, Severity, TransactionRecord, User,
    DEFAULT_USER_RISK,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Store backed by a PostgreSQL connection pool
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect a new pool
    ///
    /// Pool acquisition is bounded so a dead database surfaces as a
    /// `StoreError` instead of stalling requests.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(db_error)?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the reference schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

fn db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Duplicate(db.message().to_string());
        }
        if db.is_foreign_key_violation() {
            return StoreError::ForeignKey(db.message().to_string());
        }
    }
    StoreError::Database(err.to_string())
}

fn decode_error(err: impl std::fmt::Display) -> StoreError {
    StoreError::Database(format!("Failed to decode row: {}", err))
}

fn row_to_transaction(row: &PgRow) -> StoreResult<TransactionRecord> {
    Ok(TransactionRecord {
        transaction_id: row.try_get("transaction_id").map_err(decode_error)?,
        user_id: row.try_get("user_id").map_err(decode_error)?,
        amount: row.try_get("amount").map_err(decode_error)?,
        timestamp: row.try_get("timestamp").map_err(decode_error)?,
        merchant_id: row.try_get("merchant_id").map_err(decode_error)?,
        merchant_risk: row.try_get("merchant_risk").map_err(decode_error)?,
        device_id: row.try_get("device_id").map_err(decode_error)?,
        ip_address: row.try_get("ip_address").map_err(decode_error)?,
        is_fraud: row.try_get("is_fraud").map_err(decode_error)?,
        fraud_score: row.try_get("fraud_score").map_err(decode_error)?,
    })
}

fn row_to_alert(row: &PgRow) -> StoreResult<Alert> {
    let severity: String = row.try_get("severity").map_err(decode_error)?;
    let status: String = row.try_get("status").map_err(decode_error)?;

    Ok(Alert {
        alert_id: row.try_get("alert_id").map_err(decode_error)?,
        transaction_id: row.try_get("transaction_id").map_err(decode_error)?,
        alert_type: row.try_get("alert_type").map_err(decode_error)?,
        severity: severity.parse::<Severity>().map_err(decode_error)?,
        description: row.try_get("description").map_err(decode_error)?,
        confidence_score: row.try_get("confidence_score").map_err(decode_error)?,
        status: status.parse::<AlertStatus>().map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT user_id, risk_score, updated_at FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|row| -> StoreResult<User> {
            Ok(User {
                user_id: row.try_get("user_id").map_err(decode_error)?,
                risk_score: row.try_get("risk_score").map_err(decode_error)?,
                updated_at: row.try_get("updated_at").map_err(decode_error)?,
            })
        })
        .transpose()
    }

    async fn average_amount(&self, user_id: &str) -> StoreResult<Option<f64>> {
        let row = sqlx::query("SELECT AVG(amount) AS avg_amount FROM transactions WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        row.try_get::<Option<f64>, _>("avg_amount")
            .map_err(decode_error)
    }

    async fn ensure_user(&self, user_id: &str, default_risk: f64) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (user_id, risk_score, updated_at) VALUES ($1, $2, NOW())
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(clamp_risk(default_risk))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO transactions
                (transaction_id, user_id, amount, timestamp, merchant_id, merchant_risk,
                 device_id, ip_address, is_fraud, fraud_score)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&record.transaction_id)
        .bind(&record.user_id)
        .bind(record.amount)
        .bind(record.timestamp)
        .bind(&record.merchant_id)
        .bind(record.merchant_risk)
        .bind(record.device_id.as_deref())
        .bind(record.ip_address.as_deref())
        .bind(record.is_fraud)
        .bind(record.fraud_score)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_transaction(&self, transaction_id: &str) -> StoreResult<Option<TransactionRecord>> {
        let row = sqlx::query(
            "SELECT transaction_id, user_id, amount, timestamp, merchant_id, merchant_risk,
                    device_id, ip_address, is_fraud, fraud_score
             FROM transactions WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn enrich_transaction(
        &self,
        transaction_id: &str,
        device_id: Option<&str>,
        ip_address: Option<&str>,
    ) -> StoreResult<()> {
        if device_id.is_none() && ip_address.is_none() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE transactions
             SET device_id = COALESCE(device_id, $2),
                 ip_address = COALESCE(ip_address, $3)
             WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .bind(device_id)
        .bind(ip_address)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn apply_risk_feedback(
        &self,
        event_id: &str,
        user_id: &str,
        adjustment: f64,
    ) -> StoreResult<RiskUpdate> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            "INSERT INTO users (user_id, risk_score, updated_at) VALUES ($1, $2, NOW())
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(DEFAULT_USER_RISK)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        // Row lock serializes concurrent adjustments for the same user
        let current: f64 = sqlx::query("SELECT risk_score FROM users WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?
            .try_get("risk_score")
            .map_err(decode_error)?;

        let already_applied = sqlx::query("SELECT 1 FROM risk_feedback_ledger WHERE transaction_id = $1")
            .bind(event_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .is_some();

        if already_applied {
            tx.rollback().await.map_err(db_error)?;
            return Ok(RiskUpdate {
                risk_score: current,
                applied: false,
            });
        }

        let risk_score = clamp_risk(current + adjustment);
        let now: DateTime<Utc> = Utc::now();

        sqlx::query("UPDATE users SET risk_score = $2, updated_at = $3 WHERE user_id = $1")
            .bind(user_id)
            .bind(risk_score)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        sqlx::query(
            "INSERT INTO risk_feedback_ledger
                (transaction_id, user_id, adjustment, risk_score, processed_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event_id)
        .bind(user_id)
        .bind(adjustment)
        .bind(risk_score)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        Ok(RiskUpdate {
            risk_score,
            applied: true,
        })
    }

    async fn append_features(&self, records: &[FeatureRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut builder = sqlx::QueryBuilder::<sqlx::Postgres>::new(
            "INSERT INTO feature_store (user_id, feature_name, feature_value, feature_timestamp) ",
        );
        builder.push_values(records, |mut b, record| {
            b.push_bind(&record.user_id)
                .push_bind(&record.feature_name)
                .push_bind(record.feature_value)
                .push_bind(record.feature_timestamp);
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn create_alert(&self, alert: &Alert) -> StoreResult<AlertInsert> {
        let result = sqlx::query(
            "INSERT INTO fraud_alerts
                (alert_id, transaction_id, alert_type, severity, description,
                 confidence_score, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(&alert.alert_id)
        .bind(&alert.transaction_id)
        .bind(&alert.alert_type)
        .bind(alert.severity.as_str())
        .bind(&alert.description)
        .bind(alert.confidence_score)
        .bind(alert.status.as_str())
        .bind(alert.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(AlertInsert::Created);
        }

        let existing: String =
            sqlx::query("SELECT alert_id FROM fraud_alerts WHERE transaction_id = $1")
                .bind(&alert.transaction_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_error)?
                .try_get("alert_id")
                .map_err(decode_error)?;

        Ok(AlertInsert::Exists(existing))
    }

    async fn list_alerts(&self, status: AlertStatus, limit: usize) -> StoreResult<Vec<Alert>> {
        let rows = sqlx::query(
            "SELECT alert_id, transaction_id, alert_type, severity, description,
                    confidence_score, status, created_at
             FROM fraud_alerts
             WHERE status = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(status.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_alert).collect()
    }
}
