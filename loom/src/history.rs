//! History recorder: appends run events as NDJSON, redacting secrets and
//! absolute user paths before they ever touch disk, flushing in batches,
//! and enforcing a retention policy over the set of run files it manages.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{AgentError, Result};
use crate::guard::builtins::SecretRedaction;

/// A single recorded event in a run's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Monotonically increasing sequence number within the run.
    pub sequence: u64,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Iteration index the event occurred within.
    pub iteration: usize,
    /// Event kind, e.g. `"iteration:detail"`, `"llm:call"`, `"tool:execution"`.
    pub kind: String,
    /// Event payload, redacted before being written.
    pub payload: Value,
}

/// Summary written once a recorder is finalized: total event count,
/// distinct iterations covered, and the run's wall-clock duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderIndex {
    /// Total number of events recorded.
    pub total_events: u64,
    /// Number of distinct iterations events were recorded for.
    pub iterations: usize,
    /// Wall-clock duration between the first and last event, in
    /// milliseconds. `0` if fewer than two events were recorded.
    pub duration_ms: i64,
}

/// Appends events to a run's NDJSON history file, redacting secrets and
/// absolute home-directory paths from every payload, and buffering writes
/// until `flush_threshold` events accumulate or [`Self::finalize`] is called.
pub struct HistoryRecorder {
    path: PathBuf,
    redactor: SecretRedaction,
    home: Option<String>,
    next_sequence: u64,
    buffer: Vec<HistoryEvent>,
    flush_threshold: usize,
    max_iteration: usize,
    first_timestamp: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl HistoryRecorder {
    /// Flush the buffer once it accumulates this many events.
    pub const DEFAULT_FLUSH_THRESHOLD: usize = 10;

    /// Open a recorder writing to `path`, appending if it already exists.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            redactor: SecretRedaction::new(),
            home: std::env::var("HOME").ok().filter(|h| !h.is_empty()),
            next_sequence: 0,
            buffer: Vec::new(),
            flush_threshold: Self::DEFAULT_FLUSH_THRESHOLD,
            max_iteration: 0,
            first_timestamp: None,
            last_timestamp: None,
        }
    }

    /// Record `kind` at `iteration` with `payload`, redacting secrets and
    /// absolute paths and buffering the event. Flushes to disk once the
    /// buffer reaches `flush_threshold`.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush is triggered and the file can't be
    /// opened or written.
    pub async fn record(
        &mut self,
        kind: impl Into<String>,
        iteration: usize,
        payload: Value,
    ) -> Result<()> {
        let redacted = self.redact(payload);
        let now = Utc::now();
        let event = HistoryEvent {
            sequence: self.next_sequence,
            timestamp: now,
            iteration,
            kind: kind.into(),
            payload: redacted,
        };
        self.next_sequence += 1;
        self.max_iteration = self.max_iteration.max(iteration);
        self.first_timestamp.get_or_insert(now);
        self.last_timestamp = Some(now);
        self.buffer.push(event);

        if self.buffer.len() >= self.flush_threshold {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write every buffered event as an NDJSON line and clear the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be opened or written.
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AgentError::internal(format!("opening history file: {e}")))?;
        for event in self.buffer.drain(..) {
            let line = serde_json::to_string(&event)?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| AgentError::internal(format!("writing history event: {e}")))?;
            file.write_all(b"\n")
                .await
                .map_err(|e| AgentError::internal(format!("writing history event: {e}")))?;
        }
        Ok(())
    }

    /// Flush any buffered events, then write an index summary to
    /// `<path>.index.json` and return it.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or index write fails.
    pub async fn finalize(&mut self) -> Result<RecorderIndex> {
        self.flush().await?;
        let duration_ms = match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => (last - first).num_milliseconds(),
            _ => 0,
        };
        let index = RecorderIndex {
            total_events: self.next_sequence,
            iterations: if self.next_sequence == 0 {
                0
            } else {
                self.max_iteration + 1
            },
            duration_ms,
        };
        let index_path = Self::index_path(&self.path);
        let json = serde_json::to_string_pretty(&index)?;
        fs::write(&index_path, json)
            .await
            .map_err(|e| AgentError::internal(format!("writing history index: {e}")))?;
        Ok(index)
    }

    fn index_path(path: &Path) -> PathBuf {
        let mut os_string = path.as_os_str().to_owned();
        os_string.push(".index.json");
        PathBuf::from(os_string)
    }

    fn redact(&self, value: Value) -> Value {
        let value = self.redactor.redact_value(value);
        match &self.home {
            Some(home) => redact_home_path(value, home),
            None => value,
        }
    }
}

/// Replace every occurrence of `home` as a path prefix within string values
/// with `~`, recursively.
fn redact_home_path(value: Value, home: &str) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace(home, "~")),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| redact_home_path(v, home))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, redact_home_path(v, home)))
                .collect(),
        ),
        other => other,
    }
}

/// Enforces a retention policy across a directory of run history files:
/// keeps the newest `keep` files (by filename, which callers should make
/// sortable, e.g. a timestamp or ULID prefix) and deletes the rest.
pub struct RetentionPolicy {
    /// Number of most-recent run files to keep. Default 30.
    pub keep: usize,
}

impl RetentionPolicy {
    /// Default retention: keep the newest 30 run files.
    pub const DEFAULT_KEEP: usize = 30;

    /// Create a policy keeping the newest `keep` files.
    #[must_use]
    pub const fn new(keep: usize) -> Self {
        Self { keep }
    }

    /// Apply the policy to `dir`, deleting the oldest files beyond the
    /// retention window.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory can't be read or a file can't be
    /// removed.
    pub async fn enforce(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| AgentError::internal(format!("reading history directory: {e}")))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AgentError::internal(format!("reading history directory: {e}")))?
        {
            if entry
                .file_type()
                .await
                .map_err(|e| AgentError::internal(e.to_string()))?
                .is_file()
            {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut deque: VecDeque<PathBuf> = files.into();
        let mut removed = Vec::new();
        while deque.len() > self.keep {
            if let Some(oldest) = deque.pop_front() {
                fs::remove_file(&oldest)
                    .await
                    .map_err(|e| AgentError::internal(format!("removing stale history file: {e}")))?;
                removed.push(oldest);
            }
        }
        Ok(removed)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KEEP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;

    #[tokio::test]
    async fn record_buffers_until_threshold_then_flushes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.ndjson");
        let mut recorder = HistoryRecorder::new(&path);
        recorder.flush_threshold = 2;

        recorder
            .record("iteration:start", 0, serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert!(tokio::fs::metadata(&path).await.is_err(), "no flush yet");

        recorder
            .record("iteration:end", 0, serde_json::json!({"n": 1}))
            .await
            .unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn finalize_flushes_and_writes_index_summary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.ndjson");
        let mut recorder = HistoryRecorder::new(&path);

        recorder
            .record("iteration:detail", 0, serde_json::json!({"n": 1}))
            .await
            .unwrap();
        recorder
            .record("iteration:detail", 1, serde_json::json!({"n": 2}))
            .await
            .unwrap();

        let index = recorder.finalize().await.unwrap();
        assert_eq!(index.total_events, 2);
        assert_eq!(index.iterations, 2);

        let index_contents = tokio::fs::read_to_string(format!("{}.index.json", path.display()))
            .await
            .unwrap();
        let parsed: RecorderIndex = serde_json::from_str(&index_contents).unwrap();
        assert_eq!(parsed.total_events, 2);
    }

    #[tokio::test]
    async fn record_redacts_secrets_in_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.ndjson");
        let mut recorder = HistoryRecorder::new(&path);
        recorder
            .record(
                "tool:execution",
                0,
                serde_json::json!({"output": "token sk-abcdefghijklmnopqrstuvwx"}),
            )
            .await
            .unwrap();
        recorder.finalize().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!contents.contains("sk-abcdefghijklmnopqrstuvwx"));
        assert!(contents.contains("[REDACTED:openai-key]"));
    }

    #[tokio::test]
    async fn record_redacts_home_directory_prefix() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.ndjson");
        let mut recorder = HistoryRecorder::new(&path);
        let home = recorder.home.clone();
        let Some(home) = home else {
            // No HOME in this environment; nothing to assert.
            return;
        };

        recorder
            .record(
                "tool:execution",
                0,
                serde_json::json!({"output": format!("{home}/secrets/notes.txt")}),
            )
            .await
            .unwrap();
        recorder.finalize().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(!contents.contains(&home));
        assert!(contents.contains("~/secrets/notes.txt"));
    }

    #[tokio::test]
    async fn retention_policy_keeps_only_newest_files() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            tokio::fs::write(dir.path().join(format!("run-{i:03}.ndjson")), b"{}")
                .await
                .unwrap();
        }
        let policy = RetentionPolicy::new(2);
        let removed = policy.enforce(dir.path()).await.unwrap();
        assert_eq!(removed.len(), 3);

        let mut remaining = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = remaining.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(names, vec!["run-003.ndjson", "run-004.ndjson"]);
    }
}
