//! Threat detection: remote scoring with a local heuristic fallback.

pub mod heuristic;
pub mod remote;

pub use heuristic::{HeuristicRules, DEFAULT_FALLBACK_PHRASES, SCORE_PER_MATCH};
pub use remote::RemoteScorer;

use crate::error::Result;
use crate::types::Threat;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tag attached to threats produced by the heuristic fallback.
pub const FALLBACK_TAG: &str = "fallback-detection";

/// Opaque scoring backend. The production impl is [`RemoteScorer`]; tests
/// substitute canned or failing scorers.
#[async_trait]
pub trait ThreatScorer: Send + Sync {
    async fn score(&self, text: &str) -> Result<ScoreResponse>;
}

/// Wire response from a scoring backend. Both fields are optional; a missing
/// score reads as 0.0 and missing tags as empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub score: Option<f64>,
    pub tags: Option<Vec<String>>,
}

/// Scores sanitized text against the configured threshold.
///
/// Detection never fails: any scorer error is absorbed into a heuristic
/// fallback score, so the pipeline always gets a usable [`Threat`].
pub struct Detector {
    scorer: std::sync::Arc<dyn ThreatScorer>,
    threshold: f64,
    fallback: HeuristicRules,
}

impl Detector {
    pub fn new(
        scorer: std::sync::Arc<dyn ThreatScorer>,
        threshold: f64,
        fallback_phrases: &[String],
    ) -> Self {
        Self {
            scorer,
            threshold,
            fallback: HeuristicRules::new(fallback_phrases),
        }
    }

    /// Score a text. Primary path is one scorer call; on any scorer error the
    /// heuristic fallback scores instead and tags the threat with
    /// [`FALLBACK_TAG`].
    pub async fn detect(&self, text: &str) -> Threat {
        match self.scorer.score(text).await {
            Ok(response) => {
                let score = response.score.unwrap_or(0.0);
                let tags = response.tags.unwrap_or_default();
                Threat::from_score(score, self.threshold, tags)
            }
            Err(err) => {
                warn!(error = %err, "threat scorer unavailable, using heuristic fallback");
                let score = self.fallback.score(text);
                Threat::from_score(score, self.threshold, vec![FALLBACK_TAG.to_string()])
            }
        }
    }
}
