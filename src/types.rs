//! Core data model for the security pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity band for a threat score.
///
/// Bands partition `[0, 1]` with inclusive lower bounds: `>= 0.9` critical,
/// `>= 0.7` high, `>= 0.4` medium, everything else low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Classify a numeric score into its severity band.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Severity::Critical
        } else if score >= 0.7 {
            Severity::High
        } else if score >= 0.4 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Get the band name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored assessment of a prompt's maliciousness.
///
/// Always derived from a score, never stored as truth: `severity` is the step
/// function of `score`, and `blocked` reflects the threshold that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threat {
    pub score: f64,
    pub severity: Severity,
    pub blocked: bool,
    pub tags: Vec<String>,
}

impl Threat {
    /// Build a threat from a score and the threshold in force.
    pub fn from_score(score: f64, threshold: f64, tags: Vec<String>) -> Self {
        Self {
            score,
            severity: Severity::from_score(score),
            blocked: score > threshold,
            tags,
        }
    }
}

/// Kind of check a policy rule performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Pattern,
    Length,
    Semantic,
}

/// Action a rule requests when it fires.
///
/// Recorded on the rule for audit purposes; rule evaluation is descriptive and
/// does not enforce actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Block,
    Warn,
    Log,
}

/// Rule operand: a string for pattern/semantic rules, a number for length
/// rules. A kind/value type mismatch makes the rule a no-op, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Number(f64),
    Text(String),
}

impl RuleValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            RuleValue::Number(n) => Some(*n),
            RuleValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RuleValue::Text(s) => Some(s.as_str()),
            RuleValue::Number(_) => None,
        }
    }
}

/// A single policy rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub value: RuleValue,
    pub action: RuleAction,
}

/// Named rule set plus a numeric block threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub rules: Vec<Rule>,
    #[serde(rename = "blockThreshold")]
    pub block_threshold: f64,
}

/// Outcome of enforcing a policy against a threat. Derived per evaluation,
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub actions: Vec<String>,
}

/// Per-request output of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityResult {
    pub allowed: bool,
    pub reason: Option<String>,
    pub sanitized: String,
    pub threat: Threat,
}

/// Result of the escalated flow: the standard decision plus the guardian
/// model's analysis.
#[derive(Debug, Clone, Serialize)]
pub struct DeepAnalysisResult {
    pub result: SecurityResult,
    pub analysis: GuardianAnalysis,
}

/// Guardian model's coarse assessment, parsed from free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardianAnalysis {
    pub threat_level: Severity,
    pub confidence: f64,
    pub reasoning: String,
    pub patterns: Vec<String>,
}

/// Audit record for one pipeline decision. Append-only; never mutated after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub input_text: String,
    pub sanitized_text: String,
    pub threat_score: f64,
    pub severity: Severity,
    pub blocked: bool,
    pub policy_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub tags: Vec<String>,
}
