//! Append-only audit log of memory mutations.
//!
//! Rows are written in the same transaction as the mutation they describe.
//! They are never deleted; a hard delete of the subject only sets their
//! `tombstoned` flag.

use rusqlite::{Connection, Row, params, params_from_iter};

use crate::error::{MemoryError, Result};
use crate::metadata::Metadata;
use crate::types::{
    HistoryAction, HistoryEntry, HistoryId, MemoryId, OwnerScope, format_timestamp,
    parse_timestamp,
};

const SELECT_COLUMNS: &str = "id, memory_id, owner, action, previous_value, new_value, \
                              metadata, created_at, tombstoned";

/// Append an entry.
pub fn append(conn: &Connection, entry: &HistoryEntry) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO memory_history
            (id, memory_id, owner, action, previous_value, new_value, metadata, created_at, tombstoned)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            entry.id.to_string(),
            entry.memory_id.to_string(),
            entry.owner,
            entry.action.as_str(),
            entry.previous_value,
            entry.new_value,
            entry.metadata.to_json()?,
            format_timestamp(&entry.created_at),
            entry.tombstoned,
        ],
    )?;
    Ok(())
}

/// All entries for a record, newest first.
pub fn for_memory(conn: &Connection, memory_id: MemoryId) -> Result<Vec<HistoryEntry>> {
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM memory_history WHERE memory_id = ?1 \
         ORDER BY created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![memory_id.to_string()])?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(row_to_entry(row)?);
    }
    Ok(entries)
}

/// Flag every entry of a record as belonging to a hard-deleted subject.
pub fn tombstone_all(conn: &Connection, memory_id: MemoryId) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE memory_history SET tombstoned = 1 WHERE memory_id = ?1",
        params![memory_id.to_string()],
    )?;
    Ok(rows)
}

/// Number of entries, optionally restricted to an owner scope.
pub fn count(conn: &Connection, scope: &OwnerScope) -> Result<usize> {
    let (clause, params) = scope.sql_clause("owner");
    let sql = format!("SELECT COUNT(*) FROM memory_history WHERE {clause}");
    let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
    Ok(count as usize)
}

fn row_to_entry(row: &Row<'_>) -> Result<HistoryEntry> {
    let id: String = row.get(0)?;
    let memory_id: String = row.get(1)?;
    let action: String = row.get(3)?;
    let metadata: String = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(HistoryEntry {
        id: HistoryId::parse(&id)?,
        memory_id: MemoryId::parse(&memory_id)?,
        owner: row.get(2)?,
        action: HistoryAction::parse(&action)
            .ok_or_else(|| MemoryError::InvalidData(format!("Unknown history action: {action}")))?,
        previous_value: row.get(4)?,
        new_value: row.get(5)?,
        metadata: Metadata::from_json(&metadata)?,
        created_at: parse_timestamp(&created_at)?,
        tombstoned: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE memory_history (
                id TEXT PRIMARY KEY,
                memory_id TEXT NOT NULL,
                owner TEXT,
                action TEXT NOT NULL,
                previous_value TEXT,
                new_value TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                tombstoned INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_append_and_list_newest_first() {
        let conn = create_test_connection();
        let id = MemoryId::new();

        let add = HistoryEntry::new(id, Some("alice".into()), HistoryAction::Add).with_new("v1");
        let mut update = HistoryEntry::new(id, Some("alice".into()), HistoryAction::UpdateSemantic)
            .with_previous("v1")
            .with_new("v2")
            .with_metadata(Metadata::new().with("similarity", 0.97));
        // identical timestamps fall back to insertion order
        update.created_at = add.created_at;

        append(&conn, &add).unwrap();
        append(&conn, &update).unwrap();
        append(&conn, &HistoryEntry::new(MemoryId::new(), None, HistoryAction::Add)).unwrap();

        let entries = for_memory(&conn, id).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, HistoryAction::UpdateSemantic);
        assert_eq!(entries[0].previous_value.as_deref(), Some("v1"));
        assert_eq!(
            entries[0].metadata.get("similarity").and_then(|v| v.as_f64()),
            Some(0.97)
        );
        assert_eq!(entries[1], add);
    }

    #[test]
    fn test_tombstone_all() {
        let conn = create_test_connection();
        let id = MemoryId::new();
        append(&conn, &HistoryEntry::new(id, None, HistoryAction::Add)).unwrap();
        append(&conn, &HistoryEntry::new(id, None, HistoryAction::Delete)).unwrap();

        assert_eq!(tombstone_all(&conn, id).unwrap(), 2);
        assert!(for_memory(&conn, id).unwrap().iter().all(|e| e.tombstoned));
    }

    #[test]
    fn test_count_by_scope() {
        let conn = create_test_connection();
        append(&conn, &HistoryEntry::new(MemoryId::new(), None, HistoryAction::Add)).unwrap();
        append(&conn, &HistoryEntry::new(MemoryId::new(), Some("a".into()), HistoryAction::Add)).unwrap();
        append(&conn, &HistoryEntry::new(MemoryId::new(), Some("b".into()), HistoryAction::Add)).unwrap();

        assert_eq!(count(&conn, &OwnerScope::Any).unwrap(), 3);
        assert_eq!(count(&conn, &OwnerScope::Owner("a".into())).unwrap(), 1);
        assert_eq!(count(&conn, &OwnerScope::Global).unwrap(), 1);
    }
}
