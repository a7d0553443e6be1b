//! Semantic memory store.
//!
//! Accepts free-text memories with optional embeddings and decides on every
//! write whether it duplicates something already stored (overwrite in place)
//! or is new (insert). On top of that: similarity search, listing,
//! soft/hard deletion, metadata-merge updates and an append-only audit
//! trail of every mutation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  MemoryStore                                                            │
//! │  - Single SQLite file with WAL mode, one immediate tx per write         │
//! │  - memories, memory_history, meta tables                                │
//! │  - VectorIndex: exact scan or sqlite-vec (vec0) KNN                     │
//! │  - AnalyticsSink: one record per search                                 │
//! │  - StoreListener: events after each committed mutation                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use mnemo_memory::{DeleteMode, IngestRequest, MemoryConfig, MemoryStore, SearchQuery};
//!
//! let config = MemoryConfig::default().with_dimensions(4);
//! let store = MemoryStore::open_with_config("memory.db", config)?;
//!
//! let first = store.ingest(
//!     IngestRequest::new("I love TypeScript")
//!         .with_owner("alice")
//!         .with_embedding(vec![1.0, 0.0, 0.0, 0.0]),
//! )?;
//!
//! // Close enough to be the same fact: the first record is overwritten.
//! let second = store.ingest(
//!     IngestRequest::new("I adore TypeScript")
//!         .with_owner("alice")
//!         .with_embedding(vec![0.97, 0.243, 0.0, 0.0]),
//! )?;
//! assert_eq!(first.id, second.id);
//!
//! let hits = store.search(SearchQuery::new(vec![1.0, 0.0, 0.0, 0.0]).with_owner("alice"))?;
//! for hit in &hits {
//!     println!("{:.2} {}", hit.similarity, hit.record.text);
//! }
//!
//! store.delete(first.id, DeleteMode::Soft)?;
//! # Ok::<(), mnemo_memory::MemoryError>(())
//! ```

pub mod analytics;
pub mod config;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod events;
pub mod history;
pub mod index;
pub mod metadata;
pub mod store;
pub mod types;
pub mod validation;
pub mod vector;

// Re-export error types
pub use error::{MemoryError, Result};

// Re-export store
pub use store::{
    DeleteMode, IngestOutcome, IngestRequest, ListQuery, MemoryStore, MemoryWithHistory,
    ReindexDryRun, ReindexReport, SCHEMA_VERSION, SearchHit, SearchQuery, StoreStats,
    UpdateRequest,
};

// Re-export types
pub use metadata::Metadata;
pub use types::{
    HistoryAction, HistoryEntry, HistoryId, MemoryId, MemoryRecord, OwnerScope, content_hash,
};

// Re-export configuration
pub use config::{
    AnalyticsConfig, DedupConfig, EventsConfig, IndexBackend, IndexConfig, ListConfig,
    MemoryConfig, SearchConfig,
};

// Re-export collaborators
pub use analytics::{AnalyticsSink, InMemoryAnalytics, JsonlAnalytics, NoopAnalytics, SearchAnalytics};
pub use dedup::{DedupDecision, DedupProbe};
pub use embedding::{Embedder, MockEmbedder, SharedEmbedder};
pub use events::{CategoryCounter, StoreEvent, StoreListener};
pub use index::{ExactIndex, KnnFilter, Neighbor, SqliteVecIndex, VectorIndex};

// Re-export vector helpers
pub use vector::{DEFAULT_EMBEDDING_DIMS, cosine_similarity, init_vector_extension};

// Re-export validation
pub use validation::ValidationError;
