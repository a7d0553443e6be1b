//! Two-stage duplicate detection for ingest.
//!
//! Stage one looks for the most similar embedded record in scope; a match at
//! or above the threshold wins. Stage two looks for an exact content-hash
//! match under the same owner. Otherwise the write is new.
//!
//! [`decide`] holds no storage logic of its own: it asks a [`DedupProbe`],
//! which the store implements over an open transaction.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::types::MemoryId;

/// Outcome of duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DedupDecision {
    /// An existing record is semantically equivalent.
    SemanticMatch { id: MemoryId, similarity: f32 },
    /// An existing record carries the same content hash.
    HashMatch { id: MemoryId },
    /// Nothing matched; insert a new record.
    NoMatch,
}

impl DedupDecision {
    /// Id of the matched record, if any.
    pub fn matched_id(&self) -> Option<MemoryId> {
        match self {
            Self::SemanticMatch { id, .. } | Self::HashMatch { id } => Some(*id),
            Self::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        !matches!(self, Self::NoMatch)
    }
}

/// Lookups the dedup stages need from storage.
pub trait DedupProbe {
    /// Most similar live, embedded record in the write's owner scope.
    fn nearest(&self, embedding: &[f32]) -> Result<Option<(MemoryId, f32)>>;

    /// Live record with exactly this owner and content hash.
    fn by_hash(&self, hash: &str) -> Result<Option<MemoryId>>;
}

/// Pick the dedup stage for a write.
///
/// `embedding` is `None` when the caller had no vector or vectors are
/// stale; the semantic stage is then skipped.
pub fn decide<P: DedupProbe + ?Sized>(
    probe: &P,
    embedding: Option<&[f32]>,
    hash: &str,
    threshold: f32,
) -> Result<DedupDecision> {
    if let Some(embedding) = embedding
        && let Some((id, similarity)) = probe.nearest(embedding)?
    {
        if similarity >= threshold {
            return Ok(DedupDecision::SemanticMatch { id, similarity });
        }
        debug!(
            memory_id = %id,
            similarity,
            threshold,
            "Nearest record below semantic threshold"
        );
    }

    if let Some(id) = probe.by_hash(hash)? {
        return Ok(DedupDecision::HashMatch { id });
    }

    Ok(DedupDecision::NoMatch)
}
