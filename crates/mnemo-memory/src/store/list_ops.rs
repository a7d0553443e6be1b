//! Listing records.

use rusqlite::params_from_iter;
use rusqlite::types::Value;

use crate::error::Result;
use crate::types::{MemoryRecord, OwnerScope};

use super::record_ops::{RECORD_COLUMNS, row_to_record};
use super::{ListQuery, MemoryStore};

impl MemoryStore {
    /// Records in the owner scope, newest first, with offset pagination.
    ///
    /// Soft-deleted records are included only on request. Without a
    /// metadata filter pagination happens in SQL; with one, rows are
    /// filtered in order and then paged.
    pub fn list(&self, query: ListQuery) -> Result<Vec<MemoryRecord>> {
        let limit = query.limit.unwrap_or(self.config.list.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let scope = OwnerScope::resolve(query.owner.as_deref(), self.config.null_owner_universal);
        let (scope_sql, scope_params) = scope.sql_clause("owner");
        let mut params: Vec<Value> = scope_params.into_iter().map(Value::Text).collect();

        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM memories WHERE {scope_sql}");
        if !query.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");

        let filter = query.metadata_filter.filter(|f| !f.is_empty());
        if filter.is_none() {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Value::Integer(limit as i64));
            params.push(Value::Integer(query.offset as i64));
        }

        self.with_read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;

            let mut records = Vec::new();
            let mut skipped = 0usize;
            while let Some(row) = rows.next()? {
                let record = row_to_record(row)?;
                if let Some(filter) = &filter {
                    if !record.metadata.contains(filter) {
                        continue;
                    }
                    if skipped < query.offset {
                        skipped += 1;
                        continue;
                    }
                }
                records.push(record);
                if records.len() >= limit {
                    break;
                }
            }
            Ok(records)
        })
    }
}
