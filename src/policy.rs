//! Policy catalog and rule evaluation.

use crate::types::{
    Policy, PolicyDecision, Rule, RuleAction, RuleKind, RuleValue, Severity, Threat,
};
use dashmap::DashMap;
use regex::RegexBuilder;
use tracing::warn;

/// Id of the policy seeded into every store.
pub const DEFAULT_POLICY_ID: &str = "default";

/// The built-in policy every store starts with. Immutable by convention, not
/// by mechanism; `add` can overwrite it.
pub fn default_policy() -> Policy {
    Policy {
        id: DEFAULT_POLICY_ID.to_string(),
        name: "Default Security Policy".to_string(),
        rules: vec![Rule {
            id: "threshold-check".to_string(),
            kind: RuleKind::Semantic,
            value: RuleValue::Number(0.7),
            action: RuleAction::Block,
        }],
        block_threshold: 0.7,
    }
}

/// In-memory policy catalog, keyed by policy id.
///
/// Backed by a sharded map so lookups for different ids never contend; this is
/// the seam a persistent store would slot into.
pub struct PolicyStore {
    policies: DashMap<String, Policy>,
}

impl PolicyStore {
    /// Create a store holding the default policy.
    pub fn new() -> Self {
        let policies = DashMap::new();
        let default = default_policy();
        policies.insert(default.id.clone(), default);
        Self { policies }
    }

    /// Insert or replace a policy under its id. Whole-record overwrite; there
    /// is no partial update.
    pub fn add(&self, policy: Policy) {
        self.policies.insert(policy.id.clone(), policy);
    }

    pub fn get(&self, id: &str) -> Option<Policy> {
        self.policies.get(id).map(|entry| entry.clone())
    }

    /// All policies, sorted by id for a stable read surface.
    pub fn list(&self) -> Vec<Policy> {
        let mut all: Vec<Policy> = self
            .policies
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluates policy rules against text and enforces thresholds against
/// threats. Stateless.
#[derive(Debug, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Collect rule violations for a text, in rule order.
    ///
    /// `length` rules fire when the char count exceeds the numeric value,
    /// `pattern` rules on a case-insensitive regex match. `semantic` rules and
    /// kind/value mismatches are no-ops; an uncompilable pattern is logged and
    /// skipped. Rule actions are recorded on the rule, not enforced here.
    pub fn evaluate_rules(&self, text: &str, policy: &Policy) -> Vec<String> {
        let mut violations = Vec::new();
        for rule in &policy.rules {
            match (rule.kind, &rule.value) {
                (RuleKind::Length, RuleValue::Number(max)) => {
                    if text.chars().count() as f64 > *max {
                        violations.push(format!("Input exceeds maximum length: {}", max));
                    }
                }
                (RuleKind::Pattern, RuleValue::Text(pattern)) => {
                    match RegexBuilder::new(pattern).case_insensitive(true).build() {
                        Ok(re) => {
                            if re.is_match(text) {
                                violations.push(format!("Blocked pattern detected: {}", pattern));
                            }
                        }
                        Err(err) => {
                            warn!(rule = %rule.id, error = %err, "skipping rule with invalid pattern");
                        }
                    }
                }
                // Semantic rules are enforced via the threshold, and a
                // kind/value mismatch makes the rule inert.
                _ => {}
            }
        }
        violations
    }

    /// Decide whether a threat passes a policy.
    ///
    /// Allowed iff `score < block_threshold`; a score exactly at the threshold
    /// is blocked. Allowed medium-severity threats get a `log` action, other
    /// allowed threats none.
    pub fn enforce(&self, threat: &Threat, policy: &Policy) -> PolicyDecision {
        if threat.score < policy.block_threshold {
            let actions = if threat.severity == Severity::Medium {
                vec!["log".to_string()]
            } else {
                Vec::new()
            };
            PolicyDecision {
                allowed: true,
                reason: None,
                actions,
            }
        } else {
            PolicyDecision {
                allowed: false,
                reason: Some(format!(
                    "Threat score {:.2} exceeds threshold {}",
                    threat.score, policy.block_threshold
                )),
                actions: vec![
                    "block".to_string(),
                    "log".to_string(),
                    "alert".to_string(),
                ],
            }
        }
    }
}
