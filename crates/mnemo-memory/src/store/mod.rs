//! Memory store implementation using SQLite.
//!
//! The store owns the record table, the audit log and the vector index, and
//! exposes the write path (`ingest`, `remember`, `update`, `delete`) and the
//! read path (`search`, `list`, `get`, `history`, `stats`).
//!
//! # Concurrency
//!
//! All access goes through one connection behind a mutex, and every
//! mutating operation runs in a `BEGIN IMMEDIATE` transaction. The dedup
//! probe and the write it decides on therefore happen under SQLite's write
//! lock: concurrent ingests of the same fact, from threads of this process or
//! from other processes sharing the file, serialize and collapse into one
//! record.

mod delete_ops;
mod ingest_ops;
mod list_ops;
pub mod query;
mod record_ops;
mod reindex_ops;
mod search_ops;
mod stats_ops;
mod update_ops;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OpenFlags, TransactionBehavior, params};
use tracing::{debug, info, warn};

use crate::analytics::{AnalyticsSink, JsonlAnalytics, NoopAnalytics};
use crate::config::{IndexBackend, MemoryConfig};
use crate::error::{MemoryError, Result};
use crate::events::{StoreEvent, StoreListener};
use crate::index::{self, VectorIndex};
use crate::vector;

pub use query::{
    DeleteMode, IngestOutcome, IngestRequest, ListQuery, MemoryWithHistory, ReindexDryRun,
    ReindexReport, SearchHit, SearchQuery, StoreStats, UpdateRequest,
};

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version for migrations.
pub const SCHEMA_VERSION: i32 = 1;

pub(crate) const META_DIMENSIONS: &str = "embedding.dimensions";
pub(crate) const META_PROVIDER: &str = "embedding.provider";
/// Backend that last brought the vector index in line with `memories`.
pub(crate) const META_INDEX_BACKEND: &str = "index.backend";

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// Memory store backed by SQLite.
pub struct MemoryStore {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) config: MemoryConfig,
    pub(crate) index: Box<dyn VectorIndex>,
    pub(crate) analytics: Arc<dyn AnalyticsSink>,
    listeners: RwLock<Vec<Arc<dyn StoreListener>>>,
    /// Stored embeddings have a different dimensionality than configured.
    vectors_stale: AtomicBool,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("dimensions", &self.config.dimensions)
            .field("index", &self.index.name())
            .field("listeners", &self.listeners.read().len())
            .field("vectors_stale", &self.vectors_stale())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Open or create a store at `path` with default configuration.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, MemoryConfig::default())
    }

    /// Create an in-memory store with default configuration.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_config(MemoryConfig::default())
    }

    /// Open or create a store at `path`. `config.database` is ignored.
    pub fn open_with_config(path: impl AsRef<Path>, config: MemoryConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate()?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }

        register_extensions(&config);
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self::with_connection(conn, config)?;
        info!("Memory store opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store.
    pub fn open_in_memory_with_config(config: MemoryConfig) -> Result<Self> {
        config.validate()?;
        register_extensions(&config);
        let conn = Connection::open_in_memory()?;

        let store = Self::with_connection(conn, config)?;
        info!("In-memory store created");
        Ok(store)
    }

    /// Open the store described by `config`: its database file (in-memory
    /// when unset) and, when enabled, a JSONL analytics sink.
    pub fn from_config(config: MemoryConfig) -> Result<Self> {
        let analytics: Option<Arc<dyn AnalyticsSink>> = match &config.analytics {
            a if a.enabled => match &a.path {
                Some(path) => Some(Arc::new(JsonlAnalytics::new(path, a.retention_days)?)),
                None => {
                    return Err(MemoryError::Config(
                        "analytics.path is required when analytics are enabled".into(),
                    ));
                }
            },
            _ => None,
        };

        let store = match config.database.clone() {
            Some(path) => Self::open_with_config(path, config)?,
            None => Self::open_in_memory_with_config(config)?,
        };

        Ok(match analytics {
            Some(sink) => store.with_analytics(sink),
            None => store,
        })
    }

    fn with_connection(conn: Connection, config: MemoryConfig) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            index: index::from_config(&config.index),
            config,
            analytics: Arc::new(NoopAnalytics),
            listeners: RwLock::new(Vec::new()),
            vectors_stale: AtomicBool::new(false),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Route search analytics to `sink`.
    pub fn with_analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = sink;
        self
    }

    /// Register a listener at construction time.
    pub fn with_listener(self, listener: Arc<dyn StoreListener>) -> Self {
        self.listeners.write().push(listener);
        self
    }

    /// Register a listener on a live store.
    pub fn add_listener(&self, listener: Arc<dyn StoreListener>) {
        self.listeners.write().push(listener);
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Name of the active vector index backend.
    pub fn index_backend(&self) -> &'static str {
        self.index.name()
    }

    /// Whether stored embeddings no longer match the configured
    /// dimensionality. Semantic dedup and search are disabled until
    /// [`reindex`](Self::reindex).
    pub fn vectors_stale(&self) -> bool {
        self.vectors_stale.load(Ordering::Acquire)
    }

    pub(crate) fn set_vectors_stale(&self, stale: bool) {
        self.vectors_stale.store(stale, Ordering::Release);
    }

    /// Initialize the database with schema and pragmas.
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        // Enable WAL mode for better concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;

        self.create_schema(&conn)?;
        self.check_dimensions(&conn)?;

        if !self.vectors_stale() {
            let backend = self.index.name();
            if read_meta(&conn, META_INDEX_BACKEND)?.as_deref() == Some(backend) {
                self.index.prepare(&conn, self.config.dimensions)?;
            } else {
                // Writes made under another backend never reached this index
                info!(backend, "Vector backend changed, rebuilding index");
                self.index.rebuild(&conn, self.config.dimensions)?;
                write_meta(&conn, META_INDEX_BACKEND, backend)?;
            }
            debug!(
                backend = self.index.name(),
                exact = self.index.is_exact(),
                dims = self.config.dimensions,
                "Vector index ready"
            );
        }
        Ok(())
    }

    /// Create the database schema.
    fn create_schema(&self, conn: &Connection) -> Result<()> {
        let current_version: i32 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if current_version >= SCHEMA_VERSION {
            debug!("Schema up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating schema from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        conn.execute_batch(
            r#"
            -- Canonical memory records
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                owner TEXT,
                text TEXT NOT NULL,
                embedding BLOB,
                metadata TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );

            -- Hash-stage dedup lookup
            CREATE INDEX IF NOT EXISTS idx_memories_owner_hash
                ON memories(owner, content_hash);

            CREATE INDEX IF NOT EXISTS idx_memories_created_at
                ON memories(created_at);

            CREATE INDEX IF NOT EXISTS idx_memories_deleted_at
                ON memories(deleted_at);

            -- Audit log. No foreign key: rows outlive hard-deleted records.
            CREATE TABLE IF NOT EXISTS memory_history (
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

            CREATE INDEX IF NOT EXISTS idx_memory_history_memory_id
                ON memory_history(memory_id, created_at);

            CREATE INDEX IF NOT EXISTS idx_memory_history_owner
                ON memory_history(owner);

            -- Schema metadata
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        info!("Schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Compare stored embedding dimensions with the configuration.
    ///
    /// A fresh database records the configured value. A mismatch marks the
    /// vectors stale until reindex.
    fn check_dimensions(&self, conn: &Connection) -> Result<()> {
        let configured = self.config.dimensions;
        match read_meta(conn, META_DIMENSIONS)? {
            Some(stored) => {
                let stored_dims = stored.parse::<usize>().map_err(|_| {
                    MemoryError::InvalidData(format!("Invalid stored dimensions: {stored:?}"))
                })?;
                if stored_dims != configured {
                    warn!(
                        stored = stored_dims,
                        configured,
                        "Embedding dimension mismatch. Semantic dedup and search disabled until reindex."
                    );
                    self.set_vectors_stale(true);
                }
            }
            None => write_meta(conn, META_DIMENSIONS, &configured.to_string())?,
        }
        Ok(())
    }
}

/// sqlite-vec registers itself process-wide and must precede the open.
fn register_extensions(config: &MemoryConfig) {
    if config.index.backend == IndexBackend::SqliteVec {
        vector::init_vector_extension();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Execute a function within an immediate (write-locking) transaction.
    ///
    /// If the closure returns an error, all changes are rolled back.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Execute a mutation that produces events, in an immediate transaction.
    ///
    /// Events are delivered after the commit while the connection is still
    /// held, so listeners see them in commit order.
    pub(crate) fn with_write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<(T, Vec<StoreEvent>)>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (result, events) = f(&tx)?;
        tx.commit()?;
        self.emit(&events);
        drop(conn);
        Ok(result)
    }

    /// Execute a function within a read transaction, giving it one
    /// consistent snapshot.
    pub(crate) fn with_read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Deliver committed events to listeners.
    fn emit(&self, events: &[StoreEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read();
        for event in events {
            for listener in listeners.iter() {
                listener.on_event(event);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Utility Operations
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Get a metadata value.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        read_meta(&conn, key)
    }

    /// Set a metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        write_meta(&conn, key, value)
    }
}

pub(crate) fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM meta WHERE key = ?1")?;
    let mut rows = stmt.query(params![key])?;

    if let Some(row) = rows.next()? {
        Ok(Some(row.get(0)?))
    } else {
        Ok(None)
    }
}

pub(crate) fn write_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> MemoryConfig {
        MemoryConfig::default().with_dimensions(4)
    }

    pub(crate) fn create_test_store() -> MemoryStore {
        MemoryStore::open_in_memory_with_config(test_config()).unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let store = create_test_store();
        let stats = store.stats(None).unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.schema_version, SCHEMA_VERSION);
        assert_eq!(stats.index_backend, "exact");
        assert!(!store.vectors_stale());
    }

    #[test]
    fn test_fresh_store_records_dimensions() {
        let store = create_test_store();
        assert_eq!(store.get_meta(META_DIMENSIONS).unwrap(), Some("4".to_string()));
    }

    #[test]
    fn test_meta_operations() {
        let store = create_test_store();

        assert!(store.get_meta("test_key").unwrap().is_none());

        store.set_meta("test_key", "test_value").unwrap();
        assert_eq!(
            store.get_meta("test_key").unwrap(),
            Some("test_value".to_string())
        );

        store.set_meta("test_key", "new_value").unwrap();
        assert_eq!(
            store.get_meta("test_key").unwrap(),
            Some("new_value".to_string())
        );
    }

    #[test]
    fn test_with_transaction_commits_and_rolls_back() {
        let store = create_test_store();

        let result = store.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                params!["tx_key", "tx_value"],
            )?;
            Ok("success")
        });
        assert_eq!(result.unwrap(), "success");
        assert_eq!(
            store.get_meta("tx_key").unwrap(),
            Some("tx_value".to_string())
        );

        let result: Result<()> = store.with_transaction(|conn| {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)",
                params!["rolled_back", "x"],
            )?;
            Err(MemoryError::InvalidArgument("abort".into()))
        });
        assert!(result.is_err());
        assert!(store.get_meta("rolled_back").unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = MemoryStore::open_in_memory_with_config(MemoryConfig::default().with_dimensions(0))
            .unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }

    #[test]
    fn test_stale_dimensions_detected_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");

        {
            let store = MemoryStore::open_with_config(&path, test_config()).unwrap();
            assert!(!store.vectors_stale());
        }

        let store =
            MemoryStore::open_with_config(&path, MemoryConfig::default().with_dimensions(8)).unwrap();
        assert!(store.vectors_stale());
        assert!(store.stats(None).unwrap().vectors_stale);
    }
}
