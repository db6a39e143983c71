//! User risk state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user as seen by the risk pipeline.
///
/// Rows are created on first reference with the default risk and afterwards
/// only mutated by the feedback processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    /// Rolling risk score, always within [0, 1]
    pub risk_score: f64,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_id: impl Into<String>, risk_score: f64) -> Self {
        Self {
            user_id: user_id.into(),
            risk_score: crate::risk::clamp_risk(risk_score),
            updated_at: Utc::now(),
        }
    }
}
