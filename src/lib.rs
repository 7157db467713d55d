//! Request security pipeline for generative model gateways.
//!
//! Inspects untrusted prompts before they reach a model:
//! - Length validation and pattern sanitization
//! - Remote threat scoring with a local heuristic fallback
//! - Policy-based enforcement with per-policy block thresholds
//! - Optional model-backed deep analysis for suspicious prompts
//! - Fixed-window rate limiting per caller
//! - Append-only security event auditing

pub mod detection;
pub mod error;
pub mod events;
pub mod guardian;
pub mod policy;
pub mod ratelimit;
pub mod sanitize;
pub mod types;

pub use detection::{Detector, RemoteScorer, ScoreResponse, ThreatScorer, FALLBACK_TAG};
pub use error::{GatewayError, Result};
pub use events::{EventFilter, EventSink, JsonlEventSink, MemoryEventSink, TracingEventSink};
pub use guardian::{ChatCompletionClient, CompletionClient, GuardianAnalyzer};
pub use policy::{default_policy, PolicyEngine, PolicyStore, DEFAULT_POLICY_ID};
pub use ratelimit::{RateDecision, RateLimitConfig, RateLimiter};
pub use sanitize::{Sanitizer, DEFAULT_BLOCKED_PATTERNS};
pub use types::{
    DeepAnalysisResult, GuardianAnalysis, Policy, PolicyDecision, Rule, RuleAction, RuleKind,
    RuleValue, SecurityEvent, SecurityResult, Severity, Threat,
};

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tag attached to threats produced by input validation failures.
pub const VALIDATION_TAG: &str = "validation-error";

/// Per-policy input limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolicyLimits {
    /// Maximum prompt length in characters
    #[serde(default = "default_max_prompt_length")]
    pub max_prompt_length: usize,
    /// Patterns stripped during sanitization (case-insensitive regexes)
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            max_prompt_length: default_max_prompt_length(),
            blocked_patterns: default_blocked_patterns(),
        }
    }
}

/// Remote threat scorer endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScorerConfig {
    #[serde(default = "default_scorer_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Client timeout for one scoring call, in milliseconds
    #[serde(default = "default_scorer_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            api_url: default_scorer_url(),
            api_key: None,
            timeout_ms: default_scorer_timeout_ms(),
        }
    }
}

/// Guardian analyzer endpoint. No defaults for the url and model; deep
/// analysis is off unless explicitly configured.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnalyzerConfig {
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    /// Hard bound on one analysis call, in milliseconds
    #[serde(default = "default_analyzer_timeout_ms")]
    pub timeout_ms: u64,
}

/// Rate limiter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitSettings {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

/// JSON-facing configuration for the security pipeline.
///
/// Field names use kebab-case to match typical JSON config style; every
/// field has a usable default so `{}` is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityConfigJson {
    /// Score above which the detector marks a threat blocked
    #[serde(default = "default_threat_threshold")]
    pub threat_threshold: f64,
    /// When false the pipeline runs detect-only: verdicts are logged and
    /// recorded but requests are never refused
    #[serde(default = "default_true")]
    pub block_enabled: bool,
    /// Per-policy input limits, keyed by policy id
    #[serde(default)]
    pub policies: HashMap<String, PolicyLimits>,
    /// Phrase catalog for the heuristic fallback scorer
    #[serde(default = "default_fallback_phrases")]
    pub fallback_phrases: Vec<String>,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub analyzer: Option<AnalyzerConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

fn default_true() -> bool {
    true
}

fn default_threat_threshold() -> f64 {
    0.7
}

fn default_max_prompt_length() -> usize {
    10000
}

fn default_blocked_patterns() -> Vec<String> {
    DEFAULT_BLOCKED_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_fallback_phrases() -> Vec<String> {
    detection::DEFAULT_FALLBACK_PHRASES
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_scorer_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_scorer_timeout_ms() -> u64 {
    5000
}

fn default_analyzer_timeout_ms() -> u64 {
    10000
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

impl Default for SecurityConfigJson {
    fn default() -> Self {
        Self {
            threat_threshold: default_threat_threshold(),
            block_enabled: true,
            policies: HashMap::new(),
            fallback_phrases: default_fallback_phrases(),
            scorer: ScorerConfig::default(),
            analyzer: None,
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl From<SecurityConfigJson> for SecurityConfig {
    fn from(json: SecurityConfigJson) -> Self {
        let mut policies = json.policies;
        policies
            .entry(DEFAULT_POLICY_ID.to_string())
            .or_insert_with(PolicyLimits::default);
        Self {
            threat_threshold: json.threat_threshold,
            block_enabled: json.block_enabled,
            policies,
            fallback_phrases: json.fallback_phrases,
            scorer: json.scorer,
            analyzer: json.analyzer,
            rate_limit: json.rate_limit,
        }
    }
}

/// Configuration for the security pipeline.
///
/// The `policies` map always contains a `"default"` entry once built through
/// [`SecurityConfig::load`] or the JSON layer.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub threat_threshold: f64,
    pub block_enabled: bool,
    pub policies: HashMap<String, PolicyLimits>,
    pub fallback_phrases: Vec<String>,
    pub scorer: ScorerConfig,
    pub analyzer: Option<AnalyzerConfig>,
    pub rate_limit: RateLimitSettings,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfigJson::default().into()
    }
}

impl SecurityConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let json: SecurityConfigJson = serde_json::from_str(&raw)?;
        Ok(json.into())
    }
}

/// The security pipeline orchestrator.
///
/// Owns one instance of every stage and runs them in a fixed order:
/// validate, sanitize, detect, enforce, audit. Collaborators with external
/// effects (the scorer and the event sink) are injected; everything else is
/// built from configuration.
pub struct SecurityGateway {
    config: SecurityConfig,
    default_sanitizer: Sanitizer,
    sanitizers: HashMap<String, Sanitizer>,
    detector: Detector,
    policies: PolicyStore,
    engine: PolicyEngine,
    sink: Arc<dyn EventSink>,
    guardian: Option<GuardianAnalyzer>,
}

impl SecurityGateway {
    /// Build a gateway around an injected scorer and sink.
    ///
    /// Fails if any configured blocked pattern does not compile.
    pub fn new(
        config: SecurityConfig,
        scorer: Arc<dyn ThreatScorer>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let default_limits = config
            .policies
            .get(DEFAULT_POLICY_ID)
            .cloned()
            .unwrap_or_default();
        let default_sanitizer = Sanitizer::new(
            default_limits.max_prompt_length,
            &default_limits.blocked_patterns,
        )?;

        let mut sanitizers = HashMap::new();
        for (id, limits) in &config.policies {
            if id == DEFAULT_POLICY_ID {
                continue;
            }
            sanitizers.insert(
                id.clone(),
                Sanitizer::new(limits.max_prompt_length, &limits.blocked_patterns)?,
            );
        }

        let detector = Detector::new(scorer, config.threat_threshold, &config.fallback_phrases);

        Ok(Self {
            default_sanitizer,
            sanitizers,
            detector,
            policies: PolicyStore::new(),
            engine: PolicyEngine::new(),
            sink,
            guardian: None,
            config,
        })
    }

    /// Build the production gateway: a [`RemoteScorer`] from the scorer
    /// config, plus a guardian analyzer when one is configured.
    pub fn from_config(config: SecurityConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        let scorer = Arc::new(RemoteScorer::new(&config.scorer)?);
        let guardian = match &config.analyzer {
            Some(analyzer) => Some(GuardianAnalyzer::from_config(analyzer)?),
            None => None,
        };
        let mut gateway = Self::new(config, scorer, sink)?;
        gateway.guardian = guardian;
        Ok(gateway)
    }

    /// Attach a guardian analyzer for deep analysis.
    pub fn with_guardian(mut self, guardian: GuardianAnalyzer) -> Self {
        self.guardian = Some(guardian);
        self
    }

    /// The policy catalog, for registration and the admin read surface.
    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    fn sanitizer_for(&self, policy_id: &str) -> &Sanitizer {
        self.sanitizers
            .get(policy_id)
            .unwrap_or(&self.default_sanitizer)
    }

    /// Run the full pipeline on one prompt.
    ///
    /// Validation failures come back as blocked results, not errors; the only
    /// error a well-configured caller sees is an unknown policy id. Exactly
    /// one event is recorded per decision, none for validation failures.
    pub async fn secure_prompt(
        &self,
        input: &str,
        policy_id: &str,
        user_id: Option<&str>,
    ) -> Result<SecurityResult> {
        let sanitizer = self.sanitizer_for(policy_id);

        if let Err(reason) = sanitizer.validate(input) {
            debug!(policy_id, "input failed validation");
            return Ok(SecurityResult {
                allowed: false,
                reason: Some(reason),
                sanitized: input.to_string(),
                threat: Threat {
                    score: 0.0,
                    severity: Severity::Low,
                    blocked: true,
                    tags: vec![VALIDATION_TAG.to_string()],
                },
            });
        }

        let sanitized = sanitizer.sanitize(input);
        let threat = self.detector.detect(&sanitized).await;

        let policy = self
            .policies
            .get(policy_id)
            .ok_or_else(|| GatewayError::PolicyNotFound(policy_id.to_string()))?;

        let decision = self.engine.enforce(&threat, &policy);
        let allowed = decision.allowed || !self.config.block_enabled;
        if allowed && !decision.allowed {
            info!(
                policy_id,
                score = threat.score,
                "verdict was block, passing through with blocking disabled"
            );
        }

        let event = SecurityEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            input_text: input.to_string(),
            sanitized_text: sanitized.clone(),
            threat_score: threat.score,
            severity: threat.severity,
            blocked: !decision.allowed,
            policy_id: policy.id.clone(),
            user_id: user_id.map(|u| u.to_string()),
            tags: threat.tags.clone(),
        };
        if let Err(err) = self.sink.record(&event).await {
            warn!(error = %err, "failed to record security event");
        }

        Ok(SecurityResult {
            allowed,
            reason: decision.reason,
            sanitized,
            threat,
        })
    }

    /// Run the pipeline and escalate suspicious prompts to the guardian.
    ///
    /// Escalation happens when the detector score lands strictly above 0.5:
    /// the guardian sees the raw input, its confidence is blended into the
    /// score (60% detector, 40% guardian) and its patterns are appended to
    /// the threat tags. Severity and the blocked flag keep their detector
    /// values. Below the bar the guardian is never called.
    pub async fn deep_analysis(&self, input: &str, policy_id: &str) -> Result<DeepAnalysisResult> {
        let guardian = self
            .guardian
            .as_ref()
            .ok_or(GatewayError::AnalyzerUnavailable)?;

        let mut result = self.secure_prompt(input, policy_id, None).await?;

        if result.threat.score > 0.5 {
            let analysis = guardian.analyze(input).await;
            result.threat.score = result.threat.score * 0.6 + analysis.confidence * 0.4;
            result.threat.tags.extend(analysis.patterns.iter().cloned());
            return Ok(DeepAnalysisResult { result, analysis });
        }

        Ok(DeepAnalysisResult {
            result,
            analysis: GuardianAnalysis {
                threat_level: Severity::Low,
                confidence: 0.0,
                reasoning: "No deep analysis needed".to_string(),
                patterns: Vec::new(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SecurityConfig::default();
        assert_eq!(config.threat_threshold, 0.7);
        assert!(config.block_enabled);
        assert!(config.analyzer.is_none());
        assert_eq!(config.scorer.api_url, "http://localhost:8080");
        assert_eq!(config.scorer.timeout_ms, 5000);
        assert_eq!(config.rate_limit.max_requests, 60);
        assert_eq!(config.rate_limit.window_secs, 60);

        let default_limits = &config.policies[DEFAULT_POLICY_ID];
        assert_eq!(default_limits.max_prompt_length, 10000);
        assert_eq!(
            default_limits.blocked_patterns,
            vec!["ignore previous", "system prompt", "disregard instructions"]
        );
    }

    #[test]
    fn test_empty_json_is_a_valid_config() {
        let json: SecurityConfigJson = serde_json::from_str("{}").unwrap();
        let config: SecurityConfig = json.into();
        assert_eq!(config.threat_threshold, 0.7);
        assert!(config.policies.contains_key(DEFAULT_POLICY_ID));
    }

    #[test]
    fn test_config_json_uses_kebab_case() {
        let raw = r#"{
            "threat-threshold": 0.5,
            "block-enabled": false,
            "policies": {
                "strict": {
                    "max-prompt-length": 500,
                    "blocked-patterns": ["foo"]
                }
            },
            "scorer": {
                "api-url": "http://scorer.internal:9000",
                "api-key": "k-123",
                "timeout-ms": 2500
            },
            "analyzer": {
                "api-url": "http://models.internal",
                "model": "guardian-1"
            },
            "rate-limit": {
                "max-requests": 5,
                "window-secs": 10
            }
        }"#;
        let json: SecurityConfigJson = serde_json::from_str(raw).unwrap();
        let config: SecurityConfig = json.into();

        assert_eq!(config.threat_threshold, 0.5);
        assert!(!config.block_enabled);
        assert_eq!(config.scorer.api_url, "http://scorer.internal:9000");
        assert_eq!(config.scorer.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.scorer.timeout_ms, 2500);
        assert_eq!(config.rate_limit.max_requests, 5);

        let analyzer = config.analyzer.unwrap();
        assert_eq!(analyzer.model, "guardian-1");
        assert_eq!(analyzer.timeout_ms, 10000);

        // A custom policies map still gets the default entry injected.
        assert_eq!(config.policies["strict"].max_prompt_length, 500);
        assert!(config.policies.contains_key(DEFAULT_POLICY_ID));
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"threat-threshold": 0.9, "scorer": {{"api-url": "http://scorer:8080"}}}}"#
        )
        .unwrap();

        let config = SecurityConfig::load(file.path()).unwrap();
        assert_eq!(config.threat_threshold, 0.9);
        assert_eq!(config.scorer.api_url, "http://scorer:8080");
        assert!(config.policies.contains_key(DEFAULT_POLICY_ID));
    }

    #[test]
    fn test_load_rejects_malformed_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            SecurityConfig::load(file.path()),
            Err(GatewayError::Serialization(_))
        ));
    }

    #[test]
    fn test_gateway_rejects_invalid_blocked_pattern() {
        struct NoopScorer;

        #[async_trait::async_trait]
        impl ThreatScorer for NoopScorer {
            async fn score(&self, _text: &str) -> Result<ScoreResponse> {
                Ok(ScoreResponse::default())
            }
        }

        let mut config = SecurityConfig::default();
        config
            .policies
            .get_mut(DEFAULT_POLICY_ID)
            .unwrap()
            .blocked_patterns = vec!["[unclosed".to_string()];

        let result = SecurityGateway::new(
            config,
            Arc::new(NoopScorer),
            Arc::new(MemoryEventSink::new()),
        );
        assert!(matches!(result, Err(GatewayError::InvalidPattern { .. })));
    }
}
