//! Deduplicating ingest.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::dedup::{self, DedupDecision, DedupProbe};
use crate::embedding::Embedder;
use crate::error::{MemoryError, Result};
use crate::events::StoreEvent;
use crate::history;
use crate::index::{KnnFilter, VectorIndex};
use crate::metadata::Metadata;
use crate::types::{
    HistoryAction, HistoryEntry, MemoryId, MemoryRecord, OwnerScope, content_hash, now,
};
use crate::validation::{validate_embedding, validate_threshold, validate_write};

use super::record_ops::{find_by_hash, get_record, insert_record, update_record};
use super::{IngestOutcome, IngestRequest, MemoryStore};

/// Dedup lookups bound to an open transaction.
struct TxProbe<'a> {
    conn: &'a Connection,
    index: &'a dyn VectorIndex,
    scope: OwnerScope,
    owner: Option<&'a str>,
}

impl DedupProbe for TxProbe<'_> {
    fn nearest(&self, embedding: &[f32]) -> Result<Option<(MemoryId, f32)>> {
        let filter = KnnFilter::new(self.scope.clone());
        let neighbors = self.index.knn(self.conn, embedding, 1, &filter)?;
        Ok(neighbors.first().map(|n| (n.id, n.similarity)))
    }

    fn by_hash(&self, hash: &str) -> Result<Option<MemoryId>> {
        find_by_hash(self.conn, self.owner, hash)
    }
}

impl MemoryStore {
    /// Store a memory, overwriting an existing one when it is a duplicate.
    ///
    /// Stages run in order inside one immediate transaction:
    ///
    /// 1. Semantic: the most similar live record in the owner scope, if its
    ///    cosine similarity reaches the threshold. Skipped without an
    ///    embedding or while vectors are stale.
    /// 2. Hash: a live record of the exact same owner with the same content
    ///    hash.
    /// 3. Insert.
    pub fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let threshold = request
            .semantic_threshold
            .unwrap_or(self.config.dedup.semantic_threshold);
        validate_write(
            &request.text,
            request.owner.as_deref(),
            request.embedding.as_deref(),
            self.config.dimensions,
        )?;
        validate_threshold(threshold)?;
        if let Some(hash) = &request.explicit_hash
            && hash.is_empty()
        {
            return Err(MemoryError::InvalidArgument("explicit hash is empty".into()));
        }

        let hash = request
            .explicit_hash
            .clone()
            .unwrap_or_else(|| content_hash(request.owner.as_deref(), &request.text));
        let stale = self.vectors_stale();
        let scope = OwnerScope::resolve(request.owner.as_deref(), self.config.null_owner_universal);

        self.with_write(|conn| {
            let probe = TxProbe {
                conn,
                index: self.index.as_ref(),
                scope,
                owner: request.owner.as_deref(),
            };
            let semantic_input = if stale { None } else { request.embedding.as_deref() };
            let decision = dedup::decide(&probe, semantic_input, &hash, threshold)?;

            let event = match decision {
                DedupDecision::SemanticMatch { id, similarity } => {
                    self.apply_semantic_match(conn, &request, id, similarity, threshold)?
                }
                DedupDecision::HashMatch { id } => {
                    self.apply_hash_match(conn, &request, id, &hash)?
                }
                DedupDecision::NoMatch => self.apply_insert(conn, &request, &hash)?,
            };

            let id = event.record().id;
            Ok((IngestOutcome { id, decision }, vec![event]))
        })
    }

    /// Ingest, embedding the text with `embedder` when the request carries
    /// no vector.
    ///
    /// Provider failures and unusable vectors are logged and the write
    /// proceeds without an embedding (hash and insert stages only).
    pub async fn remember(
        &self,
        embedder: &dyn Embedder,
        mut request: IngestRequest,
    ) -> Result<IngestOutcome> {
        if request.embedding.is_none() {
            request.embedding = match embedder.embed(&request.text).await {
                Ok(embedding) => match validate_embedding(&embedding, self.config.dimensions) {
                    Ok(()) => Some(embedding),
                    Err(e) => {
                        warn!(provider = embedder.name(), error = %e, "Unusable embedding, storing without vector");
                        None
                    }
                },
                Err(e) => {
                    warn!(provider = embedder.name(), error = %e, "Embedding provider unavailable, storing without vector");
                    None
                }
            };
        }
        self.ingest(request)
    }

    fn apply_semantic_match(
        &self,
        conn: &Connection,
        request: &IngestRequest,
        id: MemoryId,
        similarity: f32,
        threshold: f32,
    ) -> Result<StoreEvent> {
        let before = load_live(conn, id)?;

        let mut after = before.clone();
        after.text = request.text.clone();
        after.embedding = request.embedding.clone();
        after.metadata = request.metadata.clone();
        // The matched record may be global while the write is owned; hash
        // under the record's own owner so the hash stage can find it later.
        after.content_hash = request
            .explicit_hash
            .clone()
            .unwrap_or_else(|| content_hash(before.owner.as_deref(), &request.text));
        after.updated_at = now();

        update_record(conn, &after)?;
        self.index_vector(conn, &after)?;

        let entry = HistoryEntry::new(id, after.owner.clone(), HistoryAction::UpdateSemantic)
            .with_previous(before.text.clone())
            .with_new(after.text.clone())
            .with_metadata(
                Metadata::new()
                    .with("similarity", f64::from(similarity))
                    .with("threshold", f64::from(threshold)),
            );
        history::append(conn, &entry)?;

        info!(memory_id = %id, similarity, threshold, "Semantic duplicate updated");
        Ok(StoreEvent::Updated {
            before,
            after,
            action: HistoryAction::UpdateSemantic,
        })
    }

    fn apply_hash_match(
        &self,
        conn: &Connection,
        request: &IngestRequest,
        id: MemoryId,
        hash: &str,
    ) -> Result<StoreEvent> {
        let before = load_live(conn, id)?;

        let mut after = before.clone();
        after.text = request.text.clone();
        after.metadata = request.metadata.clone();
        after.content_hash = hash.to_string();
        if let Some(embedding) = &request.embedding {
            after.embedding = Some(embedding.clone());
        }
        after.updated_at = now();

        update_record(conn, &after)?;
        if request.embedding.is_some() {
            self.index_vector(conn, &after)?;
        }

        let entry = HistoryEntry::new(id, after.owner.clone(), HistoryAction::UpdateHash)
            .with_previous(before.text.clone())
            .with_new(after.text.clone());
        history::append(conn, &entry)?;

        debug!(memory_id = %id, "Hash duplicate updated");
        Ok(StoreEvent::Updated {
            before,
            after,
            action: HistoryAction::UpdateHash,
        })
    }

    fn apply_insert(
        &self,
        conn: &Connection,
        request: &IngestRequest,
        hash: &str,
    ) -> Result<StoreEvent> {
        let mut record = MemoryRecord::new(request.owner.clone(), request.text.clone())
            .with_metadata(request.metadata.clone())
            .with_content_hash(hash);
        record.embedding = request.embedding.clone();

        insert_record(conn, &record)?;
        self.index_vector(conn, &record)?;

        let entry = HistoryEntry::new(record.id, record.owner.clone(), HistoryAction::Add)
            .with_new(record.text.clone());
        history::append(conn, &entry)?;

        debug!(memory_id = %record.id, "Inserted memory");
        Ok(StoreEvent::Inserted { record })
    }

    /// Mirror a record's vector into the index. Skipped while stale; the
    /// index is rebuilt by reindex.
    pub(crate) fn index_vector(&self, conn: &Connection, record: &MemoryRecord) -> Result<()> {
        if self.vectors_stale() {
            return Ok(());
        }
        if let Some(embedding) = &record.embedding {
            self.index.upsert(conn, record.id, embedding)?;
        }
        Ok(())
    }
}

/// Fetch a record the dedup probe just matched.
fn load_live(conn: &Connection, id: MemoryId) -> Result<MemoryRecord> {
    get_record(conn, id)?.ok_or_else(|| MemoryError::NotFound(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::store::tests::create_test_store;

    /// Unit vector at `cos` similarity to `[1, 0, 0, 0]`.
    fn at_cosine(cos: f32) -> Vec<f32> {
        vec![cos, (1.0 - cos * cos).sqrt(), 0.0, 0.0]
    }

    #[test]
    fn test_insert_then_hash_match() {
        let store = create_test_store();

        let first = store.ingest(IngestRequest::new("I love TypeScript")).unwrap();
        assert!(first.inserted());

        let second = store
            .ingest(IngestRequest::new("I love TypeScript").with_metadata(Metadata::new().with("v", 2)))
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.decision, DedupDecision::HashMatch { id: first.id });

        let record = store.get(first.id, false).unwrap().record;
        assert_eq!(record.metadata.get("v"), Some(&serde_json::json!(2)));
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn test_semantic_match_overwrites() {
        let store = create_test_store();

        let a = store
            .ingest(IngestRequest::new("I love TypeScript").with_embedding(at_cosine(1.0)))
            .unwrap();
        let b = store
            .ingest(IngestRequest::new("I adore TypeScript").with_embedding(at_cosine(0.97)))
            .unwrap();

        assert_eq!(b.id, a.id);
        match b.decision {
            DedupDecision::SemanticMatch { similarity, .. } => {
                assert!((similarity - 0.97).abs() < 1e-4)
            }
            other => panic!("expected semantic match, got {other:?}"),
        }

        let record = store.get(a.id, false).unwrap().record;
        assert_eq!(record.text, "I adore TypeScript");
        assert_eq!(record.content_hash, content_hash(None, "I adore TypeScript"));
    }

    #[test]
    fn test_hash_match_coalesces_embedding() {
        let store = create_test_store();
        let embedding = at_cosine(1.0);

        let a = store
            .ingest(IngestRequest::new("fact").with_embedding(embedding.clone()))
            .unwrap();
        // No vector this time; the stored one is kept.
        let b = store.ingest(IngestRequest::new("fact")).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.get(a.id, false).unwrap().record.embedding, Some(embedding));
    }

    #[test]
    fn test_hash_stage_is_owner_exact() {
        let store = create_test_store();
        let global = store.ingest(IngestRequest::new("shared fact")).unwrap();
        let owned = store
            .ingest(IngestRequest::new("shared fact").with_owner("alice"))
            .unwrap();
        assert_ne!(global.id, owned.id);
    }

    #[test]
    fn test_semantic_stage_sees_global_records_for_owner() {
        let store = create_test_store();
        let global = store
            .ingest(IngestRequest::new("global").with_embedding(at_cosine(1.0)))
            .unwrap();
        let owned = store
            .ingest(
                IngestRequest::new("owned")
                    .with_owner("alice")
                    .with_embedding(at_cosine(0.99)),
            )
            .unwrap();
        assert_eq!(owned.id, global.id);

        // a global write never matches an owned record
        let other = store
            .ingest(
                IngestRequest::new("bob only")
                    .with_owner("bob")
                    .with_embedding(vec![0.0, 0.0, 1.0, 0.0]),
            )
            .unwrap();
        let from_global = store
            .ingest(IngestRequest::new("anon").with_embedding(vec![0.0, 0.0, 1.0, 0.0]))
            .unwrap();
        assert_ne!(from_global.id, other.id);
    }

    #[test]
    fn test_explicit_hash_and_invalid_input() {
        let store = create_test_store();
        let a = store
            .ingest(IngestRequest::new("one").with_explicit_hash("h-1"))
            .unwrap();
        let b = store
            .ingest(IngestRequest::new("two").with_explicit_hash("h-1"))
            .unwrap();
        assert_eq!(a.id, b.id);

        assert!(matches!(
            store.ingest(IngestRequest::new("   ")),
            Err(MemoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.ingest(IngestRequest::new("x").with_embedding(vec![1.0, 0.0])),
            Err(MemoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.ingest(IngestRequest::new("x").with_threshold(2.0)),
            Err(MemoryError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.ingest(IngestRequest::new("x").with_explicit_hash("")),
            Err(MemoryError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_remember_embeds_and_degrades() {
        let store = create_test_store();
        let embedder = MockEmbedder::new(4).with_fixed("pinned", at_cosine(1.0));

        let a = store
            .remember(&embedder, IngestRequest::new("pinned"))
            .await
            .unwrap();
        assert!(store.get(a.id, false).unwrap().record.has_embedding());

        let offline = MockEmbedder::unavailable(4);
        let b = store
            .remember(&offline, IngestRequest::new("no vector"))
            .await
            .unwrap();
        assert!(b.inserted());
        assert!(!store.get(b.id, false).unwrap().record.has_embedding());

        // wrong dimensionality is treated like an outage
        let wide = MockEmbedder::new(8);
        let c = store
            .remember(&wide, IngestRequest::new("no vector"))
            .await
            .unwrap();
        assert_eq!(c.id, b.id);
        assert_eq!(c.decision, DedupDecision::HashMatch { id: b.id });
    }
}
