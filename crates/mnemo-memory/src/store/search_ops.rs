//! Similarity search.

use std::time::Instant;

use tracing::{debug, warn};

use crate::analytics::SearchAnalytics;
use crate::embedding::Embedder;
use crate::error::{MemoryError, Result};
use crate::index::KnnFilter;
use crate::types::OwnerScope;
use crate::validation::{validate_embedding, validate_threshold};

use super::record_ops::get_record;
use super::{MemoryStore, SearchHit, SearchQuery};

impl MemoryStore {
    /// Live records most similar to the query embedding.
    ///
    /// Results have similarity at or above the threshold, are ordered by
    /// descending similarity (ties by id) and truncated to the limit. Each
    /// call writes one analytics record; sink failures are only logged.
    pub fn search(&self, query: SearchQuery) -> Result<Vec<SearchHit>> {
        let limit = query.limit.unwrap_or(self.config.search.default_limit);
        let threshold = query.threshold.unwrap_or(self.config.search.threshold);
        validate_embedding(&query.embedding, self.config.dimensions)?;
        validate_threshold(threshold)?;

        let start = Instant::now();
        let hits = if self.vectors_stale() {
            debug!("Vector search skipped: embeddings are stale (dimension mismatch)");
            Vec::new()
        } else if limit == 0 {
            Vec::new()
        } else {
            let filter = KnnFilter::new(OwnerScope::resolve(
                query.owner.as_deref(),
                self.config.null_owner_universal,
            ))
            .with_metadata(query.metadata_filter.clone())
            .with_min_similarity(threshold);

            self.with_read(|conn| {
                let neighbors = self.index.knn(conn, &query.embedding, limit, &filter)?;
                let mut hits = Vec::with_capacity(neighbors.len());
                for neighbor in neighbors {
                    if let Some(record) = get_record(conn, neighbor.id)? {
                        hits.push(SearchHit {
                            record,
                            similarity: neighbor.similarity,
                        });
                    }
                }
                Ok(hits)
            })?
        };
        let elapsed = start.elapsed();

        debug!(
            results = hits.len(),
            limit,
            threshold,
            elapsed_ms = elapsed.as_millis() as u64,
            "Search complete"
        );

        let scored: Vec<_> = hits.iter().map(|h| (h.record.id, h.similarity)).collect();
        let entry = SearchAnalytics::new(query.owner.clone(), limit, threshold)
            .with_metadata_filter(query.metadata_filter.clone())
            .with_index(self.index.name())
            .with_results(&scored, elapsed.as_millis() as u64);
        if let Err(e) = self.analytics.record(&entry) {
            warn!(error = %e, "Failed to record search analytics");
        }

        Ok(hits)
    }

    /// Embed `text` and search with it, replacing `query.embedding`.
    ///
    /// Unlike ingest, search cannot degrade: provider failures surface as
    /// `ProviderUnavailable`.
    pub async fn search_text(
        &self,
        embedder: &dyn Embedder,
        text: &str,
        mut query: SearchQuery,
    ) -> Result<Vec<SearchHit>> {
        query.embedding = embedder.embed(text).await.map_err(|e| match e {
            MemoryError::ProviderUnavailable(_) => e,
            other => MemoryError::ProviderUnavailable(other.to_string()),
        })?;
        self.search(query)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::analytics::{AnalyticsSink, InMemoryAnalytics};
    use crate::embedding::MockEmbedder;
    use crate::metadata::Metadata;
    use crate::store::tests::{create_test_store, test_config};
    use crate::store::{DeleteMode, IngestRequest};

    fn seed(store: &MemoryStore) -> Vec<crate::types::MemoryId> {
        let rows = [
            ("cats", vec![1.0, 0.0, 0.0, 0.0], None, "pets"),
            ("kittens", vec![0.8, 0.6, 0.0, 0.0], Some("alice"), "pets"),
            ("dogs", vec![0.6, 0.8, 0.0, 0.0], Some("bob"), "pets"),
            ("boston", vec![0.0, 0.0, 1.0, 0.0], None, "places"),
        ];
        rows.into_iter()
            .map(|(text, embedding, owner, category)| {
                let mut request = IngestRequest::new(text)
                    .with_embedding(embedding)
                    .with_metadata(Metadata::new().with("category", category))
                    .with_threshold(1.0);
                request.owner = owner.map(str::to_string);
                store.ingest(request).unwrap().id
            })
            .collect()
    }

    #[test]
    fn test_search_orders_and_thresholds() {
        let store = create_test_store();
        let ids = seed(&store);

        let hits = store
            .search(SearchQuery::new(vec![1.0, 0.0, 0.0, 0.0]).with_threshold(0.5))
            .unwrap();
        // global scope: cats and boston only; boston is below threshold
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, ids[0]);

        let hits = store
            .search(SearchQuery::new(vec![1.0, 0.0, 0.0, 0.0]).with_owner("alice"))
            .unwrap();
        let texts: Vec<_> = hits.iter().map(|h| h.record.text.as_str()).collect();
        assert_eq!(texts, vec!["cats", "kittens"]);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert!(hits.iter().all(|h| h.similarity >= 0.1));
    }

    #[test]
    fn test_search_metadata_filter_and_limit() {
        let store = create_test_store();
        seed(&store);

        let hits = store
            .search(
                SearchQuery::new(vec![0.0, 0.0, 1.0, 0.0])
                    .with_threshold(-1.0)
                    .with_metadata_filter(Metadata::new().with("category", "places")),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text, "boston");

        let hits = store
            .search(
                SearchQuery::new(vec![1.0, 0.0, 0.0, 0.0])
                    .with_owner("bob")
                    .with_limit(1),
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text, "cats");
    }

    #[test]
    fn test_search_excludes_soft_deleted() {
        let store = create_test_store();
        let ids = seed(&store);
        store.delete(ids[0], DeleteMode::Soft).unwrap();

        let hits = store
            .search(SearchQuery::new(vec![1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert!(hits.iter().all(|h| h.record.id != ids[0]));
    }

    #[test]
    fn test_search_records_one_analytics_entry() {
        let sink = Arc::new(InMemoryAnalytics::new());
        let store = create_test_store().with_analytics(sink.clone());
        seed(&store);

        store
            .search(SearchQuery::new(vec![1.0, 0.0, 0.0, 0.0]).with_owner("alice"))
            .unwrap();
        store
            .search(SearchQuery::new(vec![0.0, 0.0, 0.0, 1.0]).with_limit(0))
            .unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].owner.as_deref(), Some("alice"));
        assert_eq!(entries[0].result_count, 2);
        assert_eq!(entries[0].index, "exact");
        assert_eq!(entries[1].result_count, 0);
    }

    struct FailingSink;

    impl AnalyticsSink for FailingSink {
        fn record(&self, _entry: &SearchAnalytics) -> Result<()> {
            Err(MemoryError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_analytics_failure_does_not_fail_search() {
        let store = MemoryStore::open_in_memory_with_config(test_config())
            .unwrap()
            .with_analytics(Arc::new(FailingSink));
        seed(&store);
        let hits = store
            .search(SearchQuery::new(vec![1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn test_search_rejects_wrong_dimensions() {
        let store = create_test_store();
        let err = store.search(SearchQuery::new(vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_search_text() {
        let store = create_test_store();
        seed(&store);
        let embedder = MockEmbedder::new(4).with_fixed("felines", vec![1.0, 0.0, 0.0, 0.0]);

        let hits = store
            .search_text(&embedder, "felines", SearchQuery::default())
            .await
            .unwrap();
        assert_eq!(hits[0].record.text, "cats");

        let err = store
            .search_text(&MockEmbedder::unavailable(4), "felines", SearchQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::ProviderUnavailable(_)));
    }
}
