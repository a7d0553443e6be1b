//! Point reads, audit history and store statistics.

use rusqlite::params_from_iter;

use crate::error::{MemoryError, Result};
use crate::history;
use crate::types::{HistoryEntry, MemoryId, OwnerScope};

use super::record_ops::get_record;
use super::{META_PROVIDER, MemoryStore, MemoryWithHistory, SCHEMA_VERSION, StoreStats, read_meta};

impl MemoryStore {
    /// Fetch a record by id, soft-deleted or not.
    ///
    /// `NotFound` once the record has been hard-deleted.
    pub fn get(&self, id: MemoryId, include_history: bool) -> Result<MemoryWithHistory> {
        self.with_read(|conn| {
            let record = get_record(conn, id)?.ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
            let history = if include_history {
                history::for_memory(conn, id)?
            } else {
                Vec::new()
            };
            Ok(MemoryWithHistory { record, history })
        })
    }

    /// Audit trail of a record, newest first. Still available after a hard
    /// delete.
    pub fn history(&self, id: MemoryId) -> Result<Vec<HistoryEntry>> {
        self.with_read(|conn| history::for_memory(conn, id))
    }

    /// Store statistics.
    ///
    /// `Some(owner)` counts exactly that owner's records and history;
    /// `None` counts the whole store.
    pub fn stats(&self, owner: Option<&str>) -> Result<StoreStats> {
        let scope = match owner {
            Some(o) => OwnerScope::Owner(o.to_string()),
            None => OwnerScope::Any,
        };
        let (clause, params) = scope.sql_clause("owner");

        self.with_read(|conn| {
            let sql = format!(
                r#"
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN deleted_at IS NULL THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN embedding IS NOT NULL THEN 1 ELSE 0 END), 0)
                FROM memories WHERE {clause}
                "#
            );
            let (total, active, with_embedding): (i64, i64, i64) =
                conn.query_row(&sql, params_from_iter(params.iter()), |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })?;

            Ok(StoreStats {
                total: total as usize,
                active: active as usize,
                tombstoned: (total - active) as usize,
                with_embedding: with_embedding as usize,
                history_count: history::count(conn, &scope)?,
                dimensions: self.config.dimensions,
                embedding_provider: read_meta(conn, META_PROVIDER)?,
                vectors_stale: self.vectors_stale(),
                schema_version: SCHEMA_VERSION,
                index_backend: self.index.name().to_string(),
            })
        })
    }
}
