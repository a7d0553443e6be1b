//! Explicit updates.

use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::events::StoreEvent;
use crate::history;
use crate::types::{HistoryAction, HistoryEntry, MemoryRecord, content_hash, now};
use crate::validation::{validate_embedding, validate_text};

use super::record_ops::{get_record, update_record};
use super::{MemoryStore, UpdateRequest};

impl MemoryStore {
    /// Update text, embedding and/or metadata of a live record.
    ///
    /// Fails with `NotFound` if the record is absent or soft-deleted. A new
    /// text recomputes the content hash; `updated_at` is always bumped.
    pub fn update(&self, request: UpdateRequest) -> Result<MemoryRecord> {
        if let Some(text) = &request.text {
            validate_text(text)?;
        }
        if let Some(embedding) = &request.embedding {
            validate_embedding(embedding, self.config.dimensions)?;
        }

        let after = self.with_write(|conn| {
            let before = match get_record(conn, request.id)? {
                Some(record) if !record.is_deleted() => record,
                _ => return Err(MemoryError::NotFound(request.id.to_string())),
            };

            let mut after = before.clone();
            if let Some(text) = &request.text {
                after.text = text.clone();
                after.content_hash = content_hash(after.owner.as_deref(), text);
            }
            if let Some(embedding) = &request.embedding {
                after.embedding = Some(embedding.clone());
            }
            if let Some(patch) = &request.metadata_patch {
                if request.merge_metadata {
                    after.metadata.merge(patch);
                } else {
                    after.metadata = patch.clone();
                }
            }
            after.updated_at = now();

            update_record(conn, &after)?;
            if request.embedding.is_some() {
                self.index_vector(conn, &after)?;
            }

            let entry = HistoryEntry::new(after.id, after.owner.clone(), HistoryAction::Update)
                .with_previous(before.text.clone())
                .with_new(after.text.clone());
            history::append(conn, &entry)?;

            let event = StoreEvent::Updated {
                before,
                after: after.clone(),
                action: HistoryAction::Update,
            };
            Ok((after, vec![event]))
        })?;

        debug!(memory_id = %after.id, "Updated memory");
        Ok(after)
    }
}
