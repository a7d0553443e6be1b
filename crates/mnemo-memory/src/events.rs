//! Domain events emitted by the store after each committed mutation.
//!
//! Listeners run synchronously on the calling thread once the transaction
//! has committed, so they never observe rolled-back writes. Delivery happens
//! while the store's connection is still held, so listeners see events in
//! commit order. They must not call back into the store.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use crate::config::EventsConfig;
use crate::error::Result;
use crate::store::MemoryStore;
use crate::types::{HistoryAction, MemoryRecord};

/// Default metadata key read by [`CategoryCounter`].
pub const DEFAULT_CATEGORY_KEY: &str = "category";

/// A committed mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A new record was inserted by ingest.
    Inserted { record: MemoryRecord },
    /// An existing record was overwritten by ingest or explicit update.
    Updated {
        before: MemoryRecord,
        after: MemoryRecord,
        action: HistoryAction,
    },
    /// A record received a soft-delete tombstone. `record` is the new state.
    SoftDeleted { record: MemoryRecord },
    /// A record was physically removed. `record` is its last stored state.
    HardDeleted { record: MemoryRecord },
}

impl StoreEvent {
    /// The record the event is about, in its latest state.
    pub fn record(&self) -> &MemoryRecord {
        match self {
            Self::Inserted { record }
            | Self::SoftDeleted { record }
            | Self::HardDeleted { record } => record,
            Self::Updated { after, .. } => after,
        }
    }
}

/// Receives [`StoreEvent`]s.
pub trait StoreListener: Send + Sync {
    fn on_event(&self, event: &StoreEvent);
}

// ─────────────────────────────────────────────────────────────────────────────
// Category Counter
// ─────────────────────────────────────────────────────────────────────────────

type CategoryKey = (Option<String>, String);

/// Live-record counts per `(owner, category)`.
///
/// The category is the string value of a configurable metadata key. Records
/// without that key, or with a non-string value, are not counted.
#[derive(Debug)]
pub struct CategoryCounter {
    key: String,
    counts: Mutex<HashMap<CategoryKey, usize>>,
}

impl Default for CategoryCounter {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORY_KEY)
    }
}

impl CategoryCounter {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Counter over the configured category key.
    pub fn from_config(config: &EventsConfig) -> Self {
        Self::new(config.category_key.clone())
    }

    /// Metadata key this counter reads.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Recount from the store's live records, replacing current counts.
    ///
    /// Call before concurrent writers start; writes committed during the
    /// scan may be counted twice or not at all.
    pub fn seed(&self, store: &MemoryStore) -> Result<()> {
        let mut fresh: HashMap<CategoryKey, usize> = HashMap::new();
        store.for_each_active(|record| {
            if let Some(key) = self.category_of(record) {
                *fresh.entry(key).or_default() += 1;
            }
        })?;

        let categories = fresh.len();
        *self.counts.lock() = fresh;
        debug!(categories, key = %self.key, "Category counter seeded");
        Ok(())
    }

    /// Count for one owner and category.
    pub fn count(&self, owner: Option<&str>, category: &str) -> usize {
        self.counts
            .lock()
            .get(&(owner.map(str::to_string), category.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Per-category counts for one owner, ordered by category.
    pub fn for_owner(&self, owner: Option<&str>) -> BTreeMap<String, usize> {
        self.counts
            .lock()
            .iter()
            .filter(|((o, _), _)| o.as_deref() == owner)
            .map(|((_, category), n)| (category.clone(), *n))
            .collect()
    }

    fn category_of(&self, record: &MemoryRecord) -> Option<CategoryKey> {
        if record.is_deleted() {
            return None;
        }
        record
            .metadata
            .get_str(&self.key)
            .map(|category| (record.owner.clone(), category.to_string()))
    }

    fn increment(counts: &mut HashMap<CategoryKey, usize>, key: CategoryKey) {
        *counts.entry(key).or_default() += 1;
    }

    fn decrement(counts: &mut HashMap<CategoryKey, usize>, key: CategoryKey) {
        if let Some(n) = counts.get_mut(&key) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                counts.remove(&key);
            }
        }
    }
}

impl StoreListener for CategoryCounter {
    fn on_event(&self, event: &StoreEvent) {
        let mut counts = self.counts.lock();
        match event {
            StoreEvent::Inserted { record } => {
                if let Some(key) = self.category_of(record) {
                    Self::increment(&mut counts, key);
                }
            }
            StoreEvent::Updated { before, after, .. } => {
                let old = self.category_of(before);
                let new = self.category_of(after);
                if old != new {
                    if let Some(key) = old {
                        Self::decrement(&mut counts, key);
                    }
                    if let Some(key) = new {
                        Self::increment(&mut counts, key);
                    }
                }
            }
            StoreEvent::SoftDeleted { record } => {
                // `record` carries the tombstone; count what it was.
                if let Some(category) = record.metadata.get_str(&self.key) {
                    Self::decrement(&mut counts, (record.owner.clone(), category.to_string()));
                }
            }
            StoreEvent::HardDeleted { record } => {
                if let Some(key) = self.category_of(record) {
                    Self::decrement(&mut counts, key);
                }
            }
        }
    }
}
