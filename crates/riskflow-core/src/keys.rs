//! Cache key layout and expiry windows

use std::time::Duration;

/// Expiry of a cached decision response
pub const RESPONSE_TTL: Duration = Duration::from_secs(5 * 60);

/// Expiry of a cached user risk score
pub const USER_RISK_TTL: Duration = Duration::from_secs(60 * 60);

/// Expiry of a user's recency list, refreshed on every update
pub const RECENT_TRANSACTIONS_TTL: Duration = Duration::from_secs(60 * 60);

/// Expiry of the cached copy of a processed decision event
pub const RECENT_EVENT_TTL: Duration = Duration::from_secs(30 * 60);

/// Maximum number of transaction ids kept per recency list
pub const RECENT_TRANSACTIONS_LIMIT: usize = 10;

pub fn transaction_key(transaction_id: &str) -> String {
    format!("transaction:{}", transaction_id)
}

pub fn user_risk_key(user_id: &str) -> String {
    format!("user_risk:{}", user_id)
}

pub fn recent_event_key(transaction_id: &str) -> String {
    format!("recent_transaction:{}", transaction_id)
}

pub fn recent_transactions_key(user_id: &str) -> String {
    format!("user_recent_transactions:{}", user_id)
}
