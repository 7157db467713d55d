//! Prompt security gateway CLI.

use anyhow::{bail, Context, Result};
use clap::Parser;
use promptgate::{
    AnalyzerConfig, EventSink, JsonlEventSink, RateLimitConfig, RateLimiter, SecurityConfig,
    SecurityGateway, TracingEventSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Prompt security gateway
///
/// Inspects prompts before they reach a generative model: sanitization,
/// remote threat scoring with heuristic fallback, policy enforcement and
/// audit events. With a prompt argument it makes one decision and exits;
/// without one it reads prompts line by line from stdin.
#[derive(Parser, Debug)]
#[command(name = "promptgate")]
#[command(version, about, long_about = None)]
struct Args {
    /// Prompt to check; omit to read prompts from stdin
    prompt: Option<String>,

    /// Path to a JSON configuration file
    #[arg(long, env = "PROMPTGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Policy id to enforce
    #[arg(long, env = "PROMPTGATE_POLICY", default_value = "default")]
    policy: String,

    /// User id recorded on audit events and used as the rate-limit key
    #[arg(long, env = "PROMPTGATE_USER")]
    user: Option<String>,

    /// Escalate suspicious prompts to the guardian analyzer
    #[arg(long, env = "PROMPTGATE_DEEP", default_value = "false")]
    deep: bool,

    /// Threat scorer base URL
    #[arg(long, env = "SCORER_URL")]
    scorer_url: Option<String>,

    /// Threat scorer API key
    #[arg(long, env = "SCORER_API_KEY")]
    scorer_api_key: Option<String>,

    /// Score above which threats are blocked
    #[arg(long, env = "THREAT_THRESHOLD")]
    threat_threshold: Option<f64>,

    /// Maximum prompt length in characters (default policy)
    #[arg(long, env = "MAX_PROMPT_LENGTH")]
    max_prompt_length: Option<usize>,

    /// Comma-separated patterns stripped during sanitization (default policy)
    #[arg(long, env = "BLOCKED_PATTERNS")]
    blocked_patterns: Option<String>,

    /// Guardian analyzer base URL
    #[arg(long, env = "ANALYZER_URL")]
    analyzer_url: Option<String>,

    /// Guardian analyzer API key
    #[arg(long, env = "ANALYZER_API_KEY")]
    analyzer_api_key: Option<String>,

    /// Guardian analyzer model name
    #[arg(long, env = "ANALYZER_MODEL")]
    analyzer_model: Option<String>,

    /// Requests admitted per rate-limit window
    #[arg(long, env = "RATE_LIMIT")]
    rate_limit: Option<u32>,

    /// Rate-limit window in seconds
    #[arg(long, env = "RATE_WINDOW_SECS")]
    rate_window_secs: Option<u64>,

    /// Append audit events to this file as JSON lines
    #[arg(long, env = "AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(long, short, env = "VERBOSE", default_value = "false")]
    verbose: bool,
}

/// Layer CLI flags over the file/default configuration.
fn build_config(args: &Args) -> Result<SecurityConfig> {
    let mut config = match &args.config {
        Some(path) => SecurityConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SecurityConfig::default(),
    };

    if let Some(url) = &args.scorer_url {
        config.scorer.api_url = url.clone();
    }
    if let Some(key) = &args.scorer_api_key {
        config.scorer.api_key = Some(key.clone());
    }
    if let Some(threshold) = args.threat_threshold {
        config.threat_threshold = threshold;
    }
    if let Some(limit) = args.rate_limit {
        config.rate_limit.max_requests = limit;
    }
    if let Some(secs) = args.rate_window_secs {
        config.rate_limit.window_secs = secs;
    }

    if args.max_prompt_length.is_some() || args.blocked_patterns.is_some() {
        let limits = config
            .policies
            .entry(promptgate::DEFAULT_POLICY_ID.to_string())
            .or_default();
        if let Some(max) = args.max_prompt_length {
            limits.max_prompt_length = max;
        }
        if let Some(patterns) = &args.blocked_patterns {
            limits.blocked_patterns = patterns
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
    }

    match (&args.analyzer_url, &args.analyzer_model) {
        (Some(url), Some(model)) => {
            config.analyzer = Some(AnalyzerConfig {
                api_url: url.clone(),
                api_key: args.analyzer_api_key.clone(),
                model: model.clone(),
                timeout_ms: config
                    .analyzer
                    .as_ref()
                    .map(|a| a.timeout_ms)
                    .unwrap_or(10000),
            });
        }
        (None, None) => {}
        _ => bail!("--analyzer-url and --analyzer-model must be given together"),
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let config = build_config(&args)?;

    info!("Starting promptgate");
    info!("  Policy: {}", args.policy);
    info!("  Threat threshold: {}", config.threat_threshold);
    info!("  Blocking enabled: {}", config.block_enabled);
    info!("  Scorer: {}", config.scorer.api_url);
    match &config.analyzer {
        Some(analyzer) => info!("  Analyzer: {} ({})", analyzer.api_url, analyzer.model),
        None => info!("  Analyzer: disabled"),
    }
    info!(
        "  Rate limit: {} requests / {}s",
        config.rate_limit.max_requests, config.rate_limit.window_secs
    );

    let sink: Arc<dyn EventSink> = match &args.audit_log {
        Some(path) => {
            info!("  Audit log: {}", path.display());
            Arc::new(JsonlEventSink::new(path))
        }
        None => Arc::new(TracingEventSink),
    };

    let rate_limit = config.rate_limit.clone();
    let gateway = SecurityGateway::from_config(config, sink)?;

    if let Some(prompt) = &args.prompt {
        let blocked = check_one(&gateway, &args, prompt).await?;
        if blocked {
            std::process::exit(2);
        }
        return Ok(());
    }

    // Stdin mode: one prompt per line, one compact JSON decision per line,
    // gated by the rate limiter.
    let limiter = RateLimiter::new(RateLimitConfig {
        max_requests: rate_limit.max_requests,
        window: Duration::from_secs(rate_limit.window_secs),
    });
    let rate_key = args.user.clone().unwrap_or_else(|| "anonymous".to_string());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }

        let decision = limiter.check(&rate_key);
        if !decision.allowed {
            let error = serde_json::json!({
                "error": "rate limit exceeded",
                "retry_after_secs": decision.retry_after().as_secs(),
            });
            println!("{}", error);
            continue;
        }

        if args.deep {
            let analysis = gateway.deep_analysis(prompt, &args.policy).await?;
            println!("{}", serde_json::to_string(&analysis)?);
        } else {
            let result = gateway
                .secure_prompt(prompt, &args.policy, args.user.as_deref())
                .await?;
            println!("{}", serde_json::to_string(&result)?);
        }
    }

    Ok(())
}

/// Run one decision and print it as pretty JSON. Returns whether the prompt
/// was blocked.
async fn check_one(gateway: &SecurityGateway, args: &Args, prompt: &str) -> Result<bool> {
    if args.deep {
        let analysis = gateway.deep_analysis(prompt, &args.policy).await?;
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        Ok(!analysis.result.allowed)
    } else {
        let result = gateway
            .secure_prompt(prompt, &args.policy, args.user.as_deref())
            .await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        Ok(!result.allowed)
    }
}
