//! Search analytics.
//!
//! Every search produces one [`SearchAnalytics`] record, handed to the
//! store's [`AnalyticsSink`]. The JSONL sink writes daily-rotating files and
//! prunes files older than the retention window when it is created.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::metadata::Metadata;
use crate::types::{MemoryId, format_timestamp};

/// How many leading scores an analytics record keeps.
pub const TOP_SCORES: usize = 5;

const FILE_PREFIX: &str = "search-";
const FILE_SUFFIX: &str = ".jsonl";

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// A single search, its parameters and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchAnalytics {
    pub id: String,
    /// RFC 3339 UTC time the search completed, in the store's timestamp format.
    pub timestamp: String,

    // ── Query ────────────────────────────────────────────────────────────
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub limit: usize,
    pub threshold: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_filter: Option<Metadata>,
    /// Index backend that served the query.
    pub index: String,

    // ── Outcome ──────────────────────────────────────────────────────────
    pub result_count: usize,
    pub result_ids: Vec<MemoryId>,
    /// Up to [`TOP_SCORES`] best similarities, descending.
    pub top_scores: Vec<f32>,
    pub duration_ms: u64,
}

impl SearchAnalytics {
    /// Start a record for a query; outcome fields are filled by
    /// [`with_results`](Self::with_results).
    pub fn new(owner: Option<String>, limit: usize, threshold: f32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: format_timestamp(&Utc::now()),
            owner,
            limit,
            threshold,
            metadata_filter: None,
            index: String::new(),
            result_count: 0,
            result_ids: Vec::new(),
            top_scores: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn with_metadata_filter(mut self, filter: Option<Metadata>) -> Self {
        self.metadata_filter = filter;
        self
    }

    pub fn with_index(mut self, index: &str) -> Self {
        self.index = index.to_string();
        self
    }

    /// Record the ranked results and elapsed time.
    pub fn with_results(mut self, results: &[(MemoryId, f32)], duration_ms: u64) -> Self {
        self.result_count = results.len();
        self.result_ids = results.iter().map(|(id, _)| *id).collect();
        self.top_scores = results.iter().take(TOP_SCORES).map(|(_, s)| *s).collect();
        self.duration_ms = duration_ms;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sinks
// ─────────────────────────────────────────────────────────────────────────────

/// Destination for search analytics. Failures are reported to the caller,
/// which logs them; they never fail a search.
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, entry: &SearchAnalytics) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn record(&self, _entry: &SearchAnalytics) -> Result<()> {
        Ok(())
    }
}

/// Keeps records in memory. Useful for tests and embedding hosts that ship
/// analytics elsewhere.
#[derive(Debug, Default)]
pub struct InMemoryAnalytics {
    entries: Mutex<Vec<SearchAnalytics>>,
}

impl InMemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn entries(&self) -> Vec<SearchAnalytics> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AnalyticsSink for InMemoryAnalytics {
    fn record(&self, entry: &SearchAnalytics) -> Result<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// Thread-safe JSONL writer with daily file rotation.
pub struct JsonlAnalytics {
    dir: PathBuf,
    state: Mutex<WriterState>,
}

struct WriterState {
    current_date: Option<NaiveDate>,
    writer: Option<BufWriter<File>>,
}

impl std::fmt::Debug for JsonlAnalytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlAnalytics")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl JsonlAnalytics {
    /// Create the sink, creating `dir` and pruning expired files.
    pub fn new(dir: impl Into<PathBuf>, retention_days: u32) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        cleanup_old_files(&dir, retention_days)?;

        Ok(Self {
            dir,
            state: Mutex::new(WriterState {
                current_date: None,
                writer: None,
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}{date}{FILE_SUFFIX}"))
    }
}

impl AnalyticsSink for JsonlAnalytics {
    fn record(&self, entry: &SearchAnalytics) -> Result<()> {
        let line = serde_json::to_string(entry)?;

        let today = Utc::now().date_naive();
        let mut state = self.state.lock();

        if state.current_date != Some(today) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.file_for(today))?;
            state.writer = Some(BufWriter::new(file));
            state.current_date = Some(today);
        }

        if let Some(ref mut w) = state.writer {
            writeln!(w, "{}", line)?;
            w.flush()?;
        }

        tracing::debug!(
            search_id = %entry.id,
            results = entry.result_count,
            duration_ms = entry.duration_ms,
            "search analytics logged"
        );
        Ok(())
    }
}

/// Delete JSONL files older than `retention_days`.
fn cleanup_old_files(dir: &Path, retention_days: u32) -> Result<()> {
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(retention_days as i64);

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();

        // search-YYYY-MM-DD.jsonl
        if let Some(date_str) = name
            .strip_prefix(FILE_PREFIX)
            .and_then(|s| s.strip_suffix(FILE_SUFFIX))
            && let Ok(file_date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            && file_date < cutoff
        {
            fs::remove_file(entry.path())?;
            tracing::info!(file = %name, "removed expired search analytics file");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SearchAnalytics {
        let a = MemoryId::new();
        let b = MemoryId::new();
        SearchAnalytics::new(Some("alice".into()), 10, 0.1)
            .with_index("exact")
            .with_results(&[(a, 0.9), (b, 0.4)], 3)
    }

    #[test]
    fn test_with_results() {
        let ids: Vec<_> = (0..7).map(|_| MemoryId::new()).collect();
        let results: Vec<_> = ids.iter().enumerate().map(|(i, id)| (*id, 1.0 - i as f32 / 10.0)).collect();

        let entry = SearchAnalytics::new(None, 10, 0.1).with_results(&results, 12);
        assert_eq!(entry.result_count, 7);
        assert_eq!(entry.result_ids, ids);
        assert_eq!(entry.top_scores.len(), TOP_SCORES);
        assert_eq!(entry.top_scores[0], 1.0);
        assert_eq!(entry.duration_ms, 12);
    }

    #[test]
    fn test_timestamp_matches_record_format() {
        let entry = sample();
        assert!(entry.timestamp.ends_with('Z'));
        let parsed = crate::types::parse_timestamp(&entry.timestamp).unwrap();
        assert_eq!(format_timestamp(&parsed), entry.timestamp);
    }

    #[test]
    fn test_in_memory_sink() {
        let sink = InMemoryAnalytics::new();
        assert!(sink.is_empty());
        sink.record(&sample()).unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.entries()[0].owner.as_deref(), Some("alice"));
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlAnalytics::new(dir.path(), 90).unwrap();

        sink.record(&sample()).unwrap();
        sink.record(&sample()).unwrap();

        let files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(files.len(), 1);

        let content = fs::read_to_string(files[0].path()).unwrap();
        let lines: Vec<&str> = content.trim().lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: SearchAnalytics = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.result_count, 2);
        assert_eq!(parsed.index, "exact");
    }

    #[test]
    fn test_cleanup_removes_expired_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("search-2000-01-01.jsonl");
        let unrelated = dir.path().join("notes.txt");
        fs::write(&old, "{}\n").unwrap();
        fs::write(&unrelated, "keep").unwrap();

        let _sink = JsonlAnalytics::new(dir.path(), 30).unwrap();
        assert!(!old.exists());
        assert!(unrelated.exists());
    }
}
