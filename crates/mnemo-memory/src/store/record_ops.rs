//! Row-level primitives over the `memories` table.
//!
//! These take a `&Connection` so callers can compose them inside one
//! transaction.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::Result;
use crate::metadata::Metadata;
use crate::types::{MemoryId, MemoryRecord, format_timestamp, parse_timestamp};
use crate::vector::{embedding_from_bytes, embedding_to_bytes};

use super::MemoryStore;

pub(crate) const RECORD_COLUMNS: &str =
    "id, owner, text, embedding, metadata, content_hash, created_at, updated_at, deleted_at";

/// Insert a new row.
pub(crate) fn insert_record(conn: &Connection, record: &MemoryRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO memories
            (id, owner, text, embedding, metadata, content_hash, created_at, updated_at, deleted_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            record.id.to_string(),
            record.owner,
            record.text,
            record.embedding.as_deref().map(embedding_to_bytes),
            record.metadata.to_json()?,
            record.content_hash,
            format_timestamp(&record.created_at),
            format_timestamp(&record.updated_at),
            record.deleted_at.as_ref().map(format_timestamp),
        ],
    )?;
    Ok(())
}

/// Overwrite every mutable column of an existing row.
///
/// Returns `false` if the row no longer exists.
pub(crate) fn update_record(conn: &Connection, record: &MemoryRecord) -> Result<bool> {
    let rows = conn.execute(
        r#"
        UPDATE memories SET
            text = ?2,
            embedding = ?3,
            metadata = ?4,
            content_hash = ?5,
            updated_at = ?6,
            deleted_at = ?7
        WHERE id = ?1
        "#,
        params![
            record.id.to_string(),
            record.text,
            record.embedding.as_deref().map(embedding_to_bytes),
            record.metadata.to_json()?,
            record.content_hash,
            format_timestamp(&record.updated_at),
            record.deleted_at.as_ref().map(format_timestamp),
        ],
    )?;
    Ok(rows > 0)
}

/// Fetch a row by id, soft-deleted or not.
pub(crate) fn get_record(conn: &Connection, id: MemoryId) -> Result<Option<MemoryRecord>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM memories WHERE id = ?1");
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut rows = stmt.query(params![id.to_string()])?;

    match rows.next()? {
        Some(row) => Ok(Some(row_to_record(row)?)),
        None => Ok(None),
    }
}

/// Physically remove a row.
pub(crate) fn delete_record(conn: &Connection, id: MemoryId) -> Result<bool> {
    let rows = conn.execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])?;
    Ok(rows > 0)
}

/// Live row with exactly this owner and content hash; the oldest wins.
pub(crate) fn find_by_hash(
    conn: &Connection,
    owner: Option<&str>,
    hash: &str,
) -> Result<Option<MemoryId>> {
    let id: Option<String> = conn
        .query_row(
            r#"
            SELECT id FROM memories
            WHERE content_hash = ?1 AND owner IS ?2 AND deleted_at IS NULL
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
            params![hash, owner],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|s| MemoryId::parse(&s)).transpose()
}

/// Convert a database row to a record.
pub(crate) fn row_to_record(row: &Row<'_>) -> Result<MemoryRecord> {
    let id_str: String = row.get(0)?;
    let embedding_blob: Option<Vec<u8>> = row.get(3)?;
    let metadata_json: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let deleted_at: Option<String> = row.get(8)?;

    Ok(MemoryRecord {
        id: MemoryId::parse(&id_str)?,
        owner: row.get(1)?,
        text: row.get(2)?,
        embedding: embedding_blob
            .as_deref()
            .map(embedding_from_bytes)
            .transpose()?,
        metadata: Metadata::from_json(&metadata_json)?,
        content_hash: row.get(5)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

impl MemoryStore {
    /// Visit every live (not soft-deleted) record.
    pub(crate) fn for_each_active<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&MemoryRecord),
    {
        self.with_read(|conn| {
            let sql = format!("SELECT {RECORD_COLUMNS} FROM memories WHERE deleted_at IS NULL");
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                f(&row_to_record(row)?);
            }
            Ok(())
        })
    }
}
