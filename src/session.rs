//! Session audit sink (spec §4.1 `session` option, §6 `SessionSink`).
//!
//! An external collaborator the agent loop reports to, not one it drives:
//! `append` must be non-blocking from the loop's perspective and preserve
//! call order. `FileSessionSink` adapts the teacher's `logger::SimpleLogger`
//! ring buffer from single-line text entries to structured JSON records.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// One audit record. `kind` is one of `llm.request`, `llm.response`,
/// `tool.output`, or future record kinds a sink should pass through
/// unrecognized (spec §6: "record ∈ {llm.request, llm.response,
/// tool.output, …}").
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub run_id: String,
    pub seq: u64,
    pub timestamp_ms: u64,
    pub kind: String,
    pub payload: Value,
}

impl SessionRecord {
    pub fn new(run_id: impl Into<String>, seq: u64, kind: impl Into<String>, payload: Value) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            run_id: run_id.into(),
            seq,
            timestamp_ms,
            kind: kind.into(),
            payload,
        }
    }
}

/// Record sink passed as `run_stream`'s `session` option. Implementations
/// must preserve call order; `append` failures must not interrupt the
/// agent loop (mirrors the tool-output store's "save failures are
/// swallowed" rule in spec §6).
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn append(&self, record: SessionRecord);
}

/// A sink backed by the teacher's file ring-buffer logger, generalized to
/// serialize each record as a JSON line instead of a free-text message.
pub struct FileSessionSink {
    inner: crate::logger::RingBufferLog,
}

impl FileSessionSink {
    pub fn new(path: impl Into<std::path::PathBuf>, max_entries: usize) -> Self {
        Self {
            inner: crate::logger::RingBufferLog::new(path.into(), max_entries),
        }
    }
}

#[async_trait]
impl SessionSink for FileSessionSink {
    async fn append(&self, record: SessionRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => self.inner.append(&line),
            Err(err) => log::warn!("session sink: failed to serialize record: {err}"),
        }
    }
}

/// A sink that drops every record. Useful as the default when no audit
/// trail is requested.
pub struct NullSessionSink;

#[async_trait]
impl SessionSink for NullSessionSink {
    async fn append(&self, _record: SessionRecord) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_sink_accepts_without_panicking() {
        let sink = NullSessionSink;
        sink.append(SessionRecord::new("run1", 0, "llm.request", serde_json::json!({}))).await;
    }

    #[tokio::test]
    async fn file_sink_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.log");
        let sink = FileSessionSink::new(path.clone(), 100);
        sink.append(SessionRecord::new("run1", 0, "llm.request", serde_json::json!({"a": 1})))
            .await;
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("llm.request"));
        assert!(contents.contains("\"seq\":0"));
    }
}
