//! Scoring models
//!
//! A [`ScoringModel`] turns a [`ScoringInput`] into a [`ScoringOutput`]. The
//! [`Scorer`] wraps an optional primary model with a strict timeout and falls
//! back to the local heuristic whenever the primary is missing, slow or
//! failing, so scoring never fails a request.

mod remote;

pub use remote::RemoteModel;

use crate::error::ScoringError;
use riskflow_core::{heuristic_score, ScoringInput, ScoringOutput};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default bound on a primary model call
pub const DEFAULT_SCORING_TIMEOUT: Duration = Duration::from_secs(2);

/// Trait for scoring backends
#[async_trait::async_trait]
pub trait ScoringModel: Send + Sync {
    /// Model name used in logs
    fn name(&self) -> &str;

    async fn score(&self, input: &ScoringInput) -> Result<ScoringOutput, ScoringError>;
}

/// The deterministic local heuristic as a model
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicModel;

#[async_trait::async_trait]
impl ScoringModel for HeuristicModel {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn score(&self, input: &ScoringInput) -> Result<ScoringOutput, ScoringError> {
        Ok(heuristic_score(input))
    }
}

/// Which model produced a score
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSource {
    Primary,
    Fallback,
}

/// A scoring result with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub output: ScoringOutput,
    pub source: ScoreSource,
}

/// Primary model with timeout and heuristic fallback
#[derive(Clone)]
pub struct Scorer {
    primary: Option<Arc<dyn ScoringModel>>,
    timeout: Duration,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::heuristic()
    }
}

impl Scorer {
    /// Heuristic only
    pub fn heuristic() -> Self {
        Self {
            primary: None,
            timeout: DEFAULT_SCORING_TIMEOUT,
        }
    }

    /// Try `primary` first, bounded by `timeout`
    pub fn with_primary(primary: Arc<dyn ScoringModel>, timeout: Duration) -> Self {
        Self {
            primary: Some(primary),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    /// Score `input`. Never fails; output is always clamped into [0, 1].
    pub async fn score(&self, input: &ScoringInput) -> Scored {
        if let Some(primary) = &self.primary {
            let result = match tokio::time::timeout(self.timeout, primary.score(input)).await {
                Ok(result) => result,
                Err(_) => Err(ScoringError::Timeout(self.timeout.as_millis() as u64)),
            };

            match result {
                Ok(output) => {
                    return Scored {
                        output: output.clamped(),
                        source: ScoreSource::Primary,
                    }
                }
                Err(e) => warn!(
                    model = primary.name(),
                    user_id = %input.user_id,
                    error = %e,
                    "Scoring model failed, using heuristic"
                ),
            }
        }

        Scored {
            output: heuristic_score(input),
            source: ScoreSource::Fallback,
        }
    }
}
