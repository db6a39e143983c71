//! User risk accumulation and alert severity rules

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Risk assigned to a user the first time they are seen
pub const DEFAULT_USER_RISK: f64 = 0.5;

/// Clamp a risk value into [0, 1]. NaN collapses to the default risk.
pub fn clamp_risk(value: f64) -> f64 {
    if value.is_nan() {
        return DEFAULT_USER_RISK;
    }
    value.clamp(0.0, 1.0)
}

/// Additive adjustment applied to a user's risk after a scored transaction.
///
/// The caller applies `clamp_risk(current + adjustment)`.
pub fn risk_adjustment(is_fraud: bool, fraud_score: f64, amount: f64) -> f64 {
    let mut adjustment = 0.0;
    if is_fraud {
        adjustment += 0.1;
    }
    if fraud_score > 0.8 {
        adjustment += 0.05;
    }
    if amount > 5000.0 {
        adjustment += 0.03;
    }
    if !is_fraud && fraud_score < 0.3 {
        adjustment -= 0.02;
    }
    adjustment
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_score(fraud_score: f64) -> Self {
        if fraud_score > 0.9 {
            Severity::Critical
        } else if fraud_score > 0.8 {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(CoreError::InvalidValue(format!("unknown severity '{}'", other))),
        }
    }
}
