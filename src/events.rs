//! Security event sinks.
//!
//! Every pipeline decision produces one [`SecurityEvent`]. Sinks receive them
//! through the [`EventSink`] trait; a persistent store would implement the
//! same trait. Sink failures never change a decision.

use crate::error::Result;
use crate::types::{SecurityEvent, Severity};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Receives audit events. Implementations must tolerate concurrent calls.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: &SecurityEvent) -> Result<()>;
}

/// Emits each event as a structured log line. The default sink.
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn record(&self, event: &SecurityEvent) -> Result<()> {
        info!(
            event_id = %event.id,
            policy_id = %event.policy_id,
            user_id = ?event.user_id,
            threat_score = event.threat_score,
            severity = %event.severity,
            blocked = event.blocked,
            tags = ?event.tags,
            "security event"
        );
        Ok(())
    }
}

/// Appends each event as one JSON line to a file.
pub struct JsonlEventSink {
    path: PathBuf,
}

impl JsonlEventSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn record(&self, event: &SecurityEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        // tokio's File buffers writes and completes them in a background task;
        // without a flush the data may not be in the file when record returns.
        file.flush().await?;
        Ok(())
    }
}

/// Filter for querying recorded events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub blocked: Option<bool>,
    pub severity: Option<Severity>,
    /// Cap on returned events, applied after filtering.
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, event: &SecurityEvent) -> bool {
        if let Some(blocked) = self.blocked {
            if event.blocked != blocked {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if event.severity != severity {
                return false;
            }
        }
        true
    }
}

/// Keeps events in memory. Used by tests and the admin read surface.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event, oldest first.
    pub async fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().await.clone()
    }

    /// Matching events, most recent first.
    pub async fn query(&self, filter: &EventFilter) -> Vec<SecurityEvent> {
        let events = self.events.lock().await;
        let mut matching: Vec<SecurityEvent> = events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        matching.reverse();
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record(&self, event: &SecurityEvent) -> Result<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event(score: f64, blocked: bool) -> SecurityEvent {
        SecurityEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            input_text: "input".to_string(),
            sanitized_text: "input".to_string(),
            threat_score: score,
            severity: Severity::from_score(score),
            blocked,
            policy_id: "default".to_string(),
            user_id: None,
            tags: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemoryEventSink::new();
        let first = sample_event(0.2, false);
        let second = sample_event(0.8, true);
        sink.record(&first).await.unwrap();
        sink.record(&second).await.unwrap();

        let events = sink.events().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, first.id);
        assert_eq!(events[1].id, second.id);
    }

    #[tokio::test]
    async fn test_query_filters_by_blocked_and_severity() {
        let sink = MemoryEventSink::new();
        sink.record(&sample_event(0.2, false)).await.unwrap();
        sink.record(&sample_event(0.8, true)).await.unwrap();
        sink.record(&sample_event(0.95, true)).await.unwrap();

        let blocked = sink
            .query(&EventFilter {
                blocked: Some(true),
                ..Default::default()
            })
            .await;
        assert_eq!(blocked.len(), 2);

        let critical = sink
            .query(&EventFilter {
                severity: Some(Severity::Critical),
                ..Default::default()
            })
            .await;
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].threat_score, 0.95);
    }

    #[tokio::test]
    async fn test_query_returns_most_recent_first_and_respects_limit() {
        let sink = MemoryEventSink::new();
        for score in [0.1, 0.2, 0.3] {
            sink.record(&sample_event(score, false)).await.unwrap();
        }

        let recent = sink
            .query(&EventFilter {
                limit: Some(2),
                ..Default::default()
            })
            .await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].threat_score, 0.3);
        assert_eq!(recent[1].threat_score, 0.2);
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink = JsonlEventSink::new(&path);

        let first = sample_event(0.3, false);
        let second = sample_event(0.9, true);
        sink.record(&first).await.unwrap();
        sink.record(&second).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: SecurityEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.id, second.id);
        assert!(parsed.blocked);
    }

    #[tokio::test]
    async fn test_tracing_sink_never_fails() {
        let sink = TracingEventSink;
        assert!(sink.record(&sample_event(0.5, false)).await.is_ok());
    }
}
