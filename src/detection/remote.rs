//! HTTP client for the remote threat scorer.

use super::{ScoreResponse, ThreatScorer};
use crate::error::{GatewayError, Result};
use crate::ScorerConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    prompt: &'a str,
}

/// Production scorer backend: `POST {api-url}/detect` with the prompt,
/// optionally authenticated via the `X-API-Key` header. The whole call is
/// bounded by the configured client timeout.
pub struct RemoteScorer {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl RemoteScorer {
    pub fn new(config: &ScorerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl ThreatScorer for RemoteScorer {
    async fn score(&self, text: &str) -> Result<ScoreResponse> {
        let url = format!("{}/detect", self.api_url);
        let mut request = self
            .client
            .post(&url)
            .json(&ScoreRequest { prompt: text });
        if let Some(ref api_key) = self.api_key {
            request = request.header("X-API-Key", api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::Scorer(format!(
                "scorer returned status {}",
                response.status()
            )));
        }

        Ok(response.json::<ScoreResponse>().await?)
    }
}
