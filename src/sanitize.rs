//! Input validation and sanitization.
//!
//! The sanitizer runs before detection: it bounds prompt length and strips
//! configured patterns so the detector and policy engine only ever see
//! normalized text.

use crate::error::{GatewayError, Result};
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

/// Patterns stripped from every prompt when no per-policy list is configured.
pub const DEFAULT_BLOCKED_PATTERNS: &[&str] =
    &["ignore previous", "system prompt", "disregard instructions"];

static WHITESPACE_RUN: OnceLock<Regex> = OnceLock::new();

fn whitespace_run() -> &'static Regex {
    WHITESPACE_RUN.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Validates prompt length and strips blocked patterns.
#[derive(Debug)]
pub struct Sanitizer {
    max_prompt_length: usize,
    patterns: Vec<Regex>,
}

impl Sanitizer {
    /// Compile the blocked patterns. Patterns are regexes, matched
    /// case-insensitively; an uncompilable pattern is a configuration error.
    pub fn new(max_prompt_length: usize, blocked_patterns: &[String]) -> Result<Self> {
        let mut patterns = Vec::with_capacity(blocked_patterns.len());
        for pattern in blocked_patterns {
            let compiled = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| GatewayError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
            patterns.push(compiled);
        }
        Ok(Self {
            max_prompt_length,
            patterns,
        })
    }

    /// Check the raw prompt against the length limit. Length is counted in
    /// characters, not bytes; exactly at the limit is valid.
    pub fn validate(&self, input: &str) -> std::result::Result<(), String> {
        if input.chars().count() > self.max_prompt_length {
            return Err(format!(
                "Input exceeds maximum length of {} characters",
                self.max_prompt_length
            ));
        }
        Ok(())
    }

    /// Normalize a prompt: trim, strip every occurrence of every blocked
    /// pattern, then collapse whitespace runs to a single space. The steps run
    /// in exactly that order.
    pub fn sanitize(&self, input: &str) -> String {
        let mut text = input.trim().to_string();
        for pattern in &self.patterns {
            text = pattern.replace_all(&text, "").into_owned();
        }
        whitespace_run().replace_all(&text, " ").into_owned()
    }
}
