//! sqlite-vec backed index.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::metadata::Metadata;
use crate::types::MemoryId;
use crate::vector::{self, embedding_from_bytes, l2_to_cosine};

use super::{KnnFilter, Neighbor, VectorIndex, rank};

/// Largest `k` a vec0 KNN query accepts.
const MAX_KNN_WINDOW: usize = 4096;

/// KNN through a `vec0` virtual table.
///
/// The table holds no owner or tombstone columns; candidates are fetched
/// `k * oversample` at a time and filtered against `memories` afterwards,
/// doubling the window while too few survive.
#[derive(Debug, Clone, Copy)]
pub struct SqliteVecIndex {
    oversample: usize,
}

impl SqliteVecIndex {
    pub fn new(oversample: usize) -> Self {
        Self {
            oversample: oversample.max(1),
        }
    }
}

impl Default for SqliteVecIndex {
    fn default() -> Self {
        Self::new(4)
    }
}

impl VectorIndex for SqliteVecIndex {
    fn name(&self) -> &'static str {
        "sqlite-vec"
    }

    fn is_exact(&self) -> bool {
        false
    }

    /// Create the vec0 table, backfilling it when it is missing or its ids
    /// differ from the records that carry a vector of the right width.
    fn prepare(&self, conn: &Connection, dims: usize) -> Result<()> {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE name = 'memory_embeddings')",
            [],
            |row| row.get(0),
        )?;
        if !exists {
            return self.rebuild(conn, dims);
        }

        let width = (dims * 4) as i64;
        let missing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories \
             WHERE embedding IS NOT NULL AND LENGTH(embedding) = ?1 \
             AND id NOT IN (SELECT memory_id FROM memory_embeddings)",
            params![width],
            |row| row.get(0),
        )?;
        let orphaned: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_embeddings \
             WHERE memory_id NOT IN ( \
                 SELECT id FROM memories \
                 WHERE embedding IS NOT NULL AND LENGTH(embedding) = ?1)",
            params![width],
            |row| row.get(0),
        )?;
        if missing > 0 || orphaned > 0 {
            warn!(missing, orphaned, "sqlite-vec index out of sync with memories, rebuilding");
            return self.rebuild(conn, dims);
        }
        Ok(())
    }

    fn rebuild(&self, conn: &Connection, dims: usize) -> Result<()> {
        vector::drop_vector_table(conn)?;
        vector::create_vector_table(conn, dims)?;

        let mut stmt = conn.prepare("SELECT id, embedding FROM memories WHERE embedding IS NOT NULL")?;
        let mut rows = stmt.query([])?;
        let mut indexed = 0usize;
        while let Some(row) = rows.next()? {
            let id_str: String = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            let embedding = embedding_from_bytes(&blob)?;
            if embedding.len() != dims {
                continue;
            }
            vector::store_vec_embedding(conn, MemoryId::parse(&id_str)?, &embedding)?;
            indexed += 1;
        }

        info!(indexed, dims, "Rebuilt sqlite-vec index");
        Ok(())
    }

    fn upsert(&self, conn: &Connection, id: MemoryId, embedding: &[f32]) -> Result<()> {
        vector::store_vec_embedding(conn, id, embedding)
    }

    fn remove(&self, conn: &Connection, id: MemoryId) -> Result<()> {
        vector::delete_vec_embedding(conn, id)?;
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

        let mut stmt = conn.prepare_cached(
            "SELECT owner, metadata FROM memories \
             WHERE id = ?1 AND deleted_at IS NULL AND embedding IS NOT NULL",
        )?;

        // Widen the candidate window until enough survive the post-filter,
        // the table is exhausted, or the tail falls below the threshold.
        let mut window = k.saturating_mul(self.oversample).min(MAX_KNN_WINDOW);
        loop {
            let candidates = vector::search_vec_nearest(conn, query, window)?;
            let fetched = candidates.len();
            let tail = candidates.last().map(|(_, distance)| l2_to_cosine(*distance));

            let mut neighbors = Vec::with_capacity(fetched);
            for (id, distance) in candidates {
                let row = stmt
                    .query_row(params![id.to_string()], |row| {
                        Ok((row.get::<_, Option<String>>(0)?, row.get::<_, String>(1)?))
                    })
                    .optional()?;
                let Some((owner, metadata_json)) = row else {
                    continue;
                };

                let similarity = l2_to_cosine(distance);
                let metadata = Metadata::from_json(&metadata_json)?;
                if filter.admits(owner.as_deref(), &metadata, similarity) {
                    neighbors.push(Neighbor { id, similarity });
                }
            }

            debug!(window, fetched, kept = neighbors.len(), "sqlite-vec knn post-filter");

            let exhausted = fetched < window || window >= MAX_KNN_WINDOW;
            let below_threshold = matches!(
                (tail, filter.min_similarity),
                (Some(t), Some(min)) if t < min
            );
            if neighbors.len() >= k || exhausted || below_threshold {
                return Ok(rank(neighbors, k));
            }
            window = window.saturating_mul(2).min(MAX_KNN_WINDOW);
        }
    }
}
