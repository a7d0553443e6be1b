//! Vector similarity index.
//!
//! The index answers "k nearest records by cosine similarity" restricted to
//! an owner scope and an optional metadata filter. Implementations operate on
//! the store's connection, so index writes join the caller's transaction.
//!
//! Two backends are provided:
//!
//! - [`ExactIndex`]: scans candidate rows of `memories` and scores them in
//!   process. Exact, no extra tables.
//! - [`SqliteVecIndex`]: mirrors unit vectors into a sqlite-vec `vec0` table
//!   and post-filters an oversampled KNN result. Approximate under
//!   restrictive filters: matching records beyond the largest KNN window
//!   are not returned, and recall is not guaranteed.

mod exact;
mod sqlite_vec;

use std::fmt::Debug;

use rusqlite::Connection;

use crate::config::{IndexBackend, IndexConfig};
use crate::error::Result;
use crate::metadata::Metadata;
use crate::types::{MemoryId, OwnerScope};

pub use exact::ExactIndex;
pub use sqlite_vec::SqliteVecIndex;

/// Restrictions applied to KNN candidates. Soft-deleted records and records
/// without an embedding are never candidates.
#[derive(Debug, Clone)]
pub struct KnnFilter {
    pub scope: OwnerScope,
    /// Shallow containment filter on record metadata.
    pub metadata: Option<Metadata>,
    /// Drop neighbours scoring below this cosine similarity.
    pub min_similarity: Option<f32>,
}

impl KnnFilter {
    pub fn new(scope: OwnerScope) -> Self {
        Self {
            scope,
            metadata: None,
            min_similarity: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Option<Metadata>) -> Self {
        self.metadata = metadata.filter(|m| !m.is_empty());
        self
    }

    pub fn with_min_similarity(mut self, min: f32) -> Self {
        self.min_similarity = Some(min);
        self
    }

    /// Whether a candidate's owner, metadata and score pass the filter.
    pub(crate) fn admits(&self, owner: Option<&str>, metadata: &Metadata, similarity: f32) -> bool {
        if !self.scope.matches(owner) {
            return false;
        }
        if let Some(min) = self.min_similarity
            && similarity < min
        {
            return false;
        }
        match &self.metadata {
            Some(filter) => metadata.contains(filter),
            None => true,
        }
    }
}

/// A scored KNN result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: MemoryId,
    pub similarity: f32,
}

/// Pluggable nearest-neighbour index over memory embeddings.
pub trait VectorIndex: Send + Sync + Debug {
    /// Backend name, reported in stats.
    fn name(&self) -> &'static str;

    /// Whether `knn` returns every matching record (no approximation).
    fn is_exact(&self) -> bool;

    /// Create any backing structures. Idempotent.
    fn prepare(&self, conn: &Connection, dims: usize) -> Result<()>;

    /// Rebuild backing structures from the `memories` table.
    fn rebuild(&self, conn: &Connection, dims: usize) -> Result<()>;

    /// Insert or replace the vector for a record.
    fn upsert(&self, conn: &Connection, id: MemoryId, embedding: &[f32]) -> Result<()>;

    /// Remove the vector for a record, if any.
    fn remove(&self, conn: &Connection, id: MemoryId) -> Result<()>;

    /// Up to `k` neighbours ordered by descending similarity, ties by id.
    fn knn(
        &self,
        conn: &Connection,
        query: &[f32],
        k: usize,
        filter: &KnnFilter,
    ) -> Result<Vec<Neighbor>>;
}

/// Build the index selected by configuration.
pub fn from_config(config: &IndexConfig) -> Box<dyn VectorIndex> {
    match config.backend {
        IndexBackend::Exact => Box::new(ExactIndex::new()),
        IndexBackend::SqliteVec => Box::new(SqliteVecIndex::new(config.oversample)),
    }
}

/// Order by descending similarity (ties: ascending id) and keep `k`.
pub(crate) fn rank(mut neighbors: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    neighbors.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.id.cmp(&b.id))
    });
    neighbors.truncate(k);
    neighbors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_orders_and_breaks_ties_by_id() {
        let mut ids = [MemoryId::new(), MemoryId::new(), MemoryId::new()];
        ids.sort();
        let neighbors = vec![
            Neighbor { id: ids[2], similarity: 0.5 },
            Neighbor { id: ids[1], similarity: 0.9 },
            Neighbor { id: ids[0], similarity: 0.5 },
        ];

        let ranked = rank(neighbors, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, ids[1]);
        assert_eq!(ranked[1].id, ids[0]);
    }

    #[test]
    fn test_filter_admits() {
        let meta = Metadata::new().with("category", "fact");
        let filter = KnnFilter::new(OwnerScope::OwnerOrGlobal("a".into()))
            .with_metadata(Some(Metadata::new().with("category", "fact")))
            .with_min_similarity(0.5);

        assert!(filter.admits(Some("a"), &meta, 0.6));
        assert!(filter.admits(None, &meta, 0.6));
        assert!(!filter.admits(Some("b"), &meta, 0.6));
        assert!(!filter.admits(Some("a"), &meta, 0.4));
        assert!(!filter.admits(Some("a"), &Metadata::new(), 0.6));
    }

    #[test]
    fn test_empty_metadata_filter_is_dropped() {
        let filter = KnnFilter::new(OwnerScope::Any).with_metadata(Some(Metadata::new()));
        assert!(filter.metadata.is_none());
    }
}
