//! Exact scan over the `memories` table.

use rusqlite::{Connection, params_from_iter};

use crate::error::Result;
use crate::metadata::Metadata;
use crate::types::MemoryId;
use crate::vector::{cosine_similarity, embedding_from_bytes};

use super::{KnnFilter, Neighbor, VectorIndex, rank};

/// Brute-force cosine scan. Embeddings are read straight from the record
/// rows, so there is nothing to maintain on write.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExactIndex;

impl ExactIndex {
    pub fn new() -> Self {
        Self
    }
}

impl VectorIndex for ExactIndex {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn is_exact(&self) -> bool {
        true
    }

    fn prepare(&self, _conn: &Connection, _dims: usize) -> Result<()> {
        Ok(())
    }

    fn rebuild(&self, _conn: &Connection, _dims: usize) -> Result<()> {
        Ok(())
    }

    fn upsert(&self, _conn: &Connection, _id: MemoryId, _embedding: &[f32]) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _conn: &Connection, _id: MemoryId) -> Result<()> {
        Ok(())
    }

    fn knn(
        &self,
        conn: &Connection,
        query: &[f32],
        k: usize,
        filter: &KnnFilter,
    ) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let (scope_sql, scope_params) = filter.scope.sql_clause("owner");
        let sql = format!(
            "SELECT id, owner, embedding, metadata FROM memories \
             WHERE embedding IS NOT NULL AND deleted_at IS NULL AND {scope_sql}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(scope_params.iter()))?;

        let mut neighbors = Vec::new();
        while let Some(row) = rows.next()? {
            let blob: Vec<u8> = row.get(2)?;
            let embedding = embedding_from_bytes(&blob)?;
            // Rows of another dimensionality (stale) score as undefined.
            let Some(similarity) = cosine_similarity(query, &embedding) else {
                continue;
            };

            let owner: Option<String> = row.get(1)?;
            let metadata = if filter.metadata.is_some() {
                let json: String = row.get(3)?;
                Metadata::from_json(&json)?
            } else {
                Metadata::default()
            };
            if !filter.admits(owner.as_deref(), &metadata, similarity) {
                continue;
            }

            let id_str: String = row.get(0)?;
            neighbors.push(Neighbor {
                id: MemoryId::parse(&id_str)?,
                similarity,
            });
        }

        Ok(rank(neighbors, k))
    }
}
