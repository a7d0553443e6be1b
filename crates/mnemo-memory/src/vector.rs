//! Vector math, blob encoding and sqlite-vec table management.
//!
//! Embeddings live in the `memories.embedding` column as raw `f32` blobs.
//! When the sqlite-vec backend is selected, unit-normalized copies are
//! mirrored into the `memory_embeddings` vec0 virtual table.

use rusqlite::{Connection, params};
use tracing::{debug, info};
use zerocopy::IntoBytes;

use crate::error::{MemoryError, Result};
use crate::types::MemoryId;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default embedding dimensions (OpenAI text-embedding-3-small).
pub const DEFAULT_EMBEDDING_DIMS: usize = 1536;

// ─────────────────────────────────────────────────────────────────────────────
// Math
// ─────────────────────────────────────────────────────────────────────────────

/// Cosine similarity of two vectors.
///
/// Returns `None` when the lengths differ or either vector has zero
/// magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        None
    } else {
        Some((dot / denom).clamp(-1.0, 1.0))
    }
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Convert an L2 distance between unit vectors into cosine similarity.
///
/// For unit vectors `|a - b|² = 2 (1 - cos)`.
pub fn l2_to_cosine(distance: f32) -> f32 {
    (1.0 - distance * distance / 2.0).clamp(-1.0, 1.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Blob encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Raw byte view of an embedding, as stored in SQLite.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    embedding.as_bytes()
}

/// Decode an embedding blob written by [`embedding_to_bytes`].
pub fn embedding_from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(MemoryError::InvalidData(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// sqlite-vec
// ─────────────────────────────────────────────────────────────────────────────

/// Register the sqlite-vec extension for every connection opened afterwards.
///
/// `sqlite3_auto_extension` applies process-wide; call it before opening the
/// connection that needs `vec0`.
pub fn init_vector_extension() {
    use rusqlite::ffi::sqlite3_auto_extension;
    use sqlite_vec::sqlite3_vec_init;

    unsafe {
        #[allow(clippy::missing_transmute_annotations)]
        sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
    }
}

/// Check if sqlite-vec extension is loaded.
pub fn check_vector_extension(conn: &Connection) -> Result<String> {
    let version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
    Ok(version)
}

/// Create the vec0 table mirroring memory embeddings.
pub fn create_vector_table(conn: &Connection, dims: usize) -> Result<()> {
    let sql = format!(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS memory_embeddings USING vec0(
            memory_id TEXT PRIMARY KEY,
            embedding float[{dims}]
        )
        "#
    );
    conn.execute_batch(&sql)?;

    info!("Created memory_embeddings table with {} dimensions", dims);
    Ok(())
}

/// Drop the vec0 table. Used by reindex to recreate it with new dimensions.
pub fn drop_vector_table(conn: &Connection) -> Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS memory_embeddings")?;
    info!("Dropped memory_embeddings table");
    Ok(())
}

/// Store a unit-normalized copy of an embedding in the vec0 table.
pub fn store_vec_embedding(conn: &Connection, memory_id: MemoryId, embedding: &[f32]) -> Result<()> {
    // vec0 doesn't support INSERT OR REPLACE, so delete first if exists
    conn.execute(
        "DELETE FROM memory_embeddings WHERE memory_id = ?1",
        params![memory_id.to_string()],
    )?;

    let unit = normalize(embedding);
    conn.execute(
        "INSERT INTO memory_embeddings (memory_id, embedding) VALUES (?1, ?2)",
        params![memory_id.to_string(), unit.as_bytes()],
    )?;

    debug!("Stored vec0 embedding for memory {}", memory_id);
    Ok(())
}

/// Remove an embedding from the vec0 table.
pub fn delete_vec_embedding(conn: &Connection, memory_id: MemoryId) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM memory_embeddings WHERE memory_id = ?1",
        params![memory_id.to_string()],
    )?;
    Ok(rows > 0)
}

/// Nearest neighbours in the vec0 table, ordered by ascending L2 distance.
pub fn search_vec_nearest(
    conn: &Connection,
    query: &[f32],
    limit: usize,
) -> Result<Vec<(MemoryId, f32)>> {
    let unit = normalize(query);
    let mut stmt = conn.prepare(
        r#"
        SELECT memory_id, distance
        FROM memory_embeddings
        WHERE embedding MATCH ?1
        ORDER BY distance
        LIMIT ?2
        "#,
    )?;

    let mut rows = stmt.query(params![unit.as_bytes(), limit as i64])?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let memory_id_str: String = row.get(0)?;
        let distance: f32 = row.get(1)?;
        results.push((MemoryId::parse(&memory_id_str)?, distance));
    }
    Ok(results)
}

/// Number of vectors in the vec0 table.
pub fn count_vec_embeddings(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_embeddings", [], |row| {
        row.get(0)
    })?;
    Ok(count as usize)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
