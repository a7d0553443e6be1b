//! Soft and hard deletion.

use tracing::debug;

use crate::error::Result;
use crate::events::StoreEvent;
use crate::history;
use crate::metadata::Metadata;
use crate::types::{HistoryAction, HistoryEntry, MemoryId, now};

use super::record_ops::{delete_record, get_record, update_record};
use super::{DeleteMode, MemoryStore};

impl MemoryStore {
    /// Delete a record.
    ///
    /// Returns `false` when the id does not resolve, or when a soft delete
    /// hits an already soft-deleted record.
    ///
    /// A hard delete removes the row and its vector and flags all of the
    /// record's history entries as tombstoned; the entries themselves stay.
    pub fn delete(&self, id: MemoryId, mode: DeleteMode) -> Result<bool> {
        let deleted = self.with_write(|conn| {
            let Some(before) = get_record(conn, id)? else {
                return Ok((false, Vec::new()));
            };

            let entry = HistoryEntry::new(id, before.owner.clone(), HistoryAction::Delete)
                .with_previous(before.text.clone())
                .with_metadata(Metadata::new().with("hard", mode.is_hard()));

            match mode {
                DeleteMode::Soft => {
                    if before.is_deleted() {
                        return Ok((false, Vec::new()));
                    }
                    let mut after = before;
                    let ts = now();
                    after.deleted_at = Some(ts);
                    after.updated_at = ts;
                    update_record(conn, &after)?;
                    history::append(conn, &entry)?;
                    Ok((true, vec![StoreEvent::SoftDeleted { record: after }]))
                }
                DeleteMode::Hard => {
                    history::append(conn, &entry)?;
                    delete_record(conn, id)?;
                    if !self.vectors_stale() {
                        self.index.remove(conn, id)?;
                    }
                    let tombstoned = history::tombstone_all(conn, id)?;
                    debug!(memory_id = %id, tombstoned, "Hard-deleted memory");
                    Ok((true, vec![StoreEvent::HardDeleted { record: before }]))
                }
            }
        })?;

        if deleted {
            debug!(memory_id = %id, hard = mode.is_hard(), "Deleted memory");
        }
        Ok(deleted)
    }
}
