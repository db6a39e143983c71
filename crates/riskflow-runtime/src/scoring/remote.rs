//! HTTP scoring model
//!
//! Posts the scoring input as JSON and expects
//! `{"fraud_score", "confidence", "risk_factors"}` back.

use super::ScoringModel;
use crate::error::ScoringError;
use reqwest::Client;
use riskflow_core::{ScoringInput, ScoringOutput};

/// Remote model served over HTTP
pub struct RemoteModel {
    endpoint: String,
    client: Client,
}

impl RemoteModel {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: Client::new(),
        }
    }

    /// Use a preconfigured client (proxies, TLS, connection pool)
    pub fn with_client(endpoint: impl Into<String>, client: Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl ScoringModel for RemoteModel {
    fn name(&self) -> &str {
        "remote"
    }

    async fn score(&self, input: &ScoringInput) -> Result<ScoringOutput, ScoringError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(input)
            .send()
            .await
            .map_err(|e| ScoringError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScoringError::Request(format!(
                "model endpoint returned {}",
                status
            )));
        }

        resp.json::<ScoringOutput>()
            .await
            .map_err(|e| ScoringError::InvalidResponse(e.to_string()))
    }
}
