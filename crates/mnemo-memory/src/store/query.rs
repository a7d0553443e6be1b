//! Request and response types for store operations.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dedup::DedupDecision;
use crate::metadata::Metadata;
use crate::types::{HistoryEntry, MemoryId, MemoryRecord};

// ─────────────────────────────────────────────────────────────────────────────
// Ingest
// ─────────────────────────────────────────────────────────────────────────────

/// A write that goes through duplicate detection.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub text: String,
    pub owner: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Metadata,
    /// Caller-computed content hash, used instead of SHA-256(owner, text).
    pub explicit_hash: Option<String>,
    /// Overrides the configured semantic threshold.
    pub semantic_threshold: Option<f32>,
}

impl IngestRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_explicit_hash(mut self, hash: impl Into<String>) -> Self {
        self.explicit_hash = Some(hash.into());
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.semantic_threshold = Some(threshold);
        self
    }
}

/// Result of an ingest: the affected record and how it was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub id: MemoryId,
    pub decision: DedupDecision,
}

impl IngestOutcome {
    /// Whether a new record was created.
    pub fn inserted(&self) -> bool {
        !self.decision.is_match()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Update
// ─────────────────────────────────────────────────────────────────────────────

/// An explicit update of a known record.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub id: MemoryId,
    pub text: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata_patch: Option<Metadata>,
    /// Shallow-merge the patch (default) or replace metadata wholesale.
    pub merge_metadata: bool,
}

impl UpdateRequest {
    pub fn new(id: MemoryId) -> Self {
        Self {
            id,
            text: None,
            embedding: None,
            metadata_patch: None,
            merge_metadata: true,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn merge_metadata(mut self, patch: Metadata) -> Self {
        self.metadata_patch = Some(patch);
        self.merge_metadata = true;
        self
    }

    pub fn replace_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata_patch = Some(metadata);
        self.merge_metadata = false;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search / List
// ─────────────────────────────────────────────────────────────────────────────

/// Similarity search parameters. Unset limit and threshold fall back to the
/// store configuration.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub embedding: Vec<f32>,
    pub owner: Option<String>,
    pub limit: Option<usize>,
    pub metadata_filter: Option<Metadata>,
    pub threshold: Option<f32>,
}

impl SearchQuery {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_metadata_filter(mut self, filter: Metadata) -> Self {
        self.metadata_filter = Some(filter);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// A search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub record: MemoryRecord,
    pub similarity: f32,
}

/// Listing parameters.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub owner: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub metadata_filter: Option<Metadata>,
    pub include_deleted: bool,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_metadata_filter(mut self, filter: Metadata) -> Self {
        self.metadata_filter = Some(filter);
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delete / Get
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Set the tombstone; the row stays addressable by id.
    #[default]
    Soft,
    /// Remove the row and its vector. History is kept, flagged tombstoned.
    Hard,
}

impl DeleteMode {
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Hard)
    }
}

/// A record with its audit trail, newest entry first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryWithHistory {
    pub record: MemoryRecord,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats / Reindex
// ─────────────────────────────────────────────────────────────────────────────

/// Store statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Rows in scope, soft-deleted included.
    pub total: usize,
    pub active: usize,
    /// Soft-deleted rows.
    pub tombstoned: usize,
    pub with_embedding: usize,
    pub history_count: usize,
    /// Configured embedding dimensionality.
    pub dimensions: usize,
    /// Provider recorded by the last reindex.
    pub embedding_provider: Option<String>,
    pub vectors_stale: bool,
    pub schema_version: i32,
    pub index_backend: String,
}

/// Result of a dry-run reindex (counts only, no work done).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexDryRun {
    pub memory_count: usize,
    /// Rough token estimate (characters / 4).
    pub estimated_tokens: usize,
}

/// Report from a completed reindex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReindexReport {
    pub total: usize,
    pub embedded: usize,
    /// Blank texts and records removed while the reindex ran.
    pub skipped: usize,
    pub elapsed: Duration,
}
