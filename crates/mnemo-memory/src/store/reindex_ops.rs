//! Re-embedding after a provider or dimensionality change.

use std::time::Instant;

use rusqlite::params;
use tracing::info;

use crate::embedding::Embedder;
use crate::error::{MemoryError, Result};
use crate::vector::embedding_to_bytes;

use super::{
    META_DIMENSIONS, META_INDEX_BACKEND, META_PROVIDER, MemoryStore, ReindexDryRun,
    ReindexReport, write_meta,
};

/// Texts sent to the embedder per call.
const REINDEX_BATCH_SIZE: usize = 32;

impl MemoryStore {
    /// Dry-run reindex: returns counts without doing any work.
    pub fn reindex_dry_run(&self) -> Result<ReindexDryRun> {
        self.with_read(|conn| {
            let (memory_count, total_chars): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(text)), 0) FROM memories",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(ReindexDryRun {
                memory_count: memory_count as usize,
                estimated_tokens: (total_chars as usize) / 4,
            })
        })
    }

    /// Re-embed every record with `embedder` and rebuild the vector index.
    ///
    /// The embedder must produce the configured dimensionality. Records
    /// with blank text are skipped and lose their stale vector. The
    /// embedder is called without holding the store lock; each batch is
    /// written in its own transaction.
    pub async fn reindex(&self, embedder: &dyn Embedder) -> Result<ReindexReport> {
        let dims = self.config.dimensions;
        if embedder.dimensions() != dims {
            return Err(MemoryError::InvalidArgument(format!(
                "embedder '{}' produces {} dimensions, store is configured for {}",
                embedder.name(),
                embedder.dimensions(),
                dims
            )));
        }

        let start = Instant::now();

        // 1. Read all memories
        let memories: Vec<(String, String)> = self.with_read(|conn| {
            let mut stmt = conn.prepare("SELECT id, text FROM memories ORDER BY rowid")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })?;

        let total = memories.len();
        let mut embedded = 0usize;
        let mut skipped = 0usize;

        info!(total, provider = embedder.name(), dims, "Reindex started");

        // 2. Batch embed in chunks
        for chunk in memories.chunks(REINDEX_BATCH_SIZE) {
            let (non_empty, blank): (Vec<_>, Vec<_>) = chunk
                .iter()
                .partition(|(_, text)| !text.trim().is_empty());

            if !blank.is_empty() {
                skipped += blank.len();
                self.with_transaction(|conn| {
                    for (id, _) in &blank {
                        conn.execute(
                            "UPDATE memories SET embedding = NULL WHERE id = ?1",
                            params![id],
                        )?;
                    }
                    Ok(())
                })?;
            }

            if non_empty.is_empty() {
                continue;
            }

            let texts: Vec<&str> = non_empty.iter().map(|(_, text)| text.as_str()).collect();
            let embeddings = embedder.embed_batch(&texts).await?;
            if embeddings.len() != texts.len() {
                return Err(MemoryError::InvalidData(format!(
                    "embedder returned {} vectors for {} texts",
                    embeddings.len(),
                    texts.len()
                )));
            }

            let written = self.with_transaction(|conn| {
                let mut written = 0usize;
                for ((id, _), embedding) in non_empty.iter().zip(&embeddings) {
                    if embedding.len() != dims {
                        return Err(MemoryError::InvalidData(format!(
                            "embedder returned {} dimensions, expected {dims}",
                            embedding.len()
                        )));
                    }
                    written += conn.execute(
                        "UPDATE memories SET embedding = ?2 WHERE id = ?1",
                        params![id, embedding_to_bytes(embedding)],
                    )?;
                }
                Ok(written)
            })?;
            embedded += written;
            // rows hard-deleted while we were embedding
            skipped += non_empty.len() - written;
        }

        // 3. Rebuild the index and record what the vectors now are
        self.with_transaction(|conn| {
            self.index.rebuild(conn, dims)?;
            write_meta(conn, META_DIMENSIONS, &dims.to_string())?;
            write_meta(conn, META_PROVIDER, embedder.name())?;
            write_meta(conn, META_INDEX_BACKEND, self.index.name())?;
            Ok(())
        })?;

        // 4. Clear stale flag
        self.set_vectors_stale(false);

        let report = ReindexReport {
            total,
            embedded,
            skipped,
            elapsed: start.elapsed(),
        };
        info!(
            total = report.total,
            embedded = report.embedded,
            skipped = report.skipped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Reindex complete"
        );
        Ok(report)
    }
}
