//! Transaction scoring contract and the local heuristic model
//!
//! Every scoring backend consumes a [`ScoringInput`] and produces a
//! [`ScoringOutput`]. The heuristic here is deterministic and pure; remote
//! models must honour the same shapes so they can be swapped freely.

use serde::{Deserialize, Serialize};

/// A transaction is fraudulent iff its score is strictly above this value
pub const FRAUD_THRESHOLD: f64 = 0.7;

/// Confidence reported by the heuristic model
pub const HEURISTIC_CONFIDENCE: f64 = 0.8;

/// Lower bound for the historical average used in the amount ratio
pub const HISTORY_AMOUNT_FLOOR: f64 = 100.0;

/// Named contributors to a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskFactor {
    HighAmount,
    HighMerchantRisk,
    HighUserRisk,
    UnusualAmountPattern,
}

impl RiskFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::HighAmount => "high_amount",
            RiskFactor::HighMerchantRisk => "high_merchant_risk",
            RiskFactor::HighUserRisk => "high_user_risk",
            RiskFactor::UnusualAmountPattern => "unusual_amount_pattern",
        }
    }
}

/// Transaction attributes plus contextual risk features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub user_id: String,
    pub amount: f64,
    /// Unix seconds
    pub timestamp: i64,
    pub merchant_id: String,
    pub merchant_risk: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub user_risk_score: f64,
    pub amount_to_history_ratio: f64,
}

/// Score, confidence and the named factors behind them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringOutput {
    pub fraud_score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

impl ScoringOutput {
    /// Force score and confidence into [0, 1]. Non-finite values become 0.
    pub fn clamped(mut self) -> Self {
        self.fraud_score = unit_interval(self.fraud_score);
        self.confidence = unit_interval(self.confidence);
        self
    }
}

fn unit_interval(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// `amount / max(average, 100)`; an unknown history counts as the floor
pub fn amount_to_history_ratio(amount: f64, historical_average: Option<f64>) -> f64 {
    let base = historical_average.unwrap_or(0.0).max(HISTORY_AMOUNT_FLOOR);
    amount / base
}

pub fn is_fraud(fraud_score: f64) -> bool {
    fraud_score > FRAUD_THRESHOLD
}

/// Local heuristic model
pub fn heuristic_score(input: &ScoringInput) -> ScoringOutput {
    let mut score = 0.3;
    let mut factors = Vec::new();

    if input.amount > 5000.0 {
        score += 0.3;
        factors.push(RiskFactor::HighAmount);
    }
    score += 0.2 * input.merchant_risk;
    if input.merchant_risk > 0.8 {
        factors.push(RiskFactor::HighMerchantRisk);
    }
    score += 0.1 * input.user_risk_score;
    if input.user_risk_score > 0.7 {
        factors.push(RiskFactor::HighUserRisk);
    }
    if input.amount_to_history_ratio > 5.0 {
        score += 0.2;
        factors.push(RiskFactor::UnusualAmountPattern);
    }

    ScoringOutput {
        fraud_score: unit_interval(score),
        confidence: HEURISTIC_CONFIDENCE,
        risk_factors: factors.iter().map(|f| f.as_str().to_string()).collect(),
    }
}
