//! Embedding provider interface.
//!
//! The store never talks to a model directly; callers hand it an
//! [`Embedder`]. Provider failures surface as
//! [`MemoryError::ProviderUnavailable`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::{MemoryError, Result};
use crate::vector::normalize;

// ─────────────────────────────────────────────────────────────────────────────
// Embedder Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Converts text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in a batch.
    ///
    /// Default implementation calls `embed` for each text sequentially.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Dimensionality of produced vectors.
    fn dimensions(&self) -> usize;

    /// Provider name, recorded in store metadata on reindex.
    fn name(&self) -> &str;
}

/// A shared embedder that can be used across threads.
pub type SharedEmbedder = Arc<dyn Embedder>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Embedder
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic offline embedder.
///
/// Produces unit vectors seeded from a SHA-256 of the text, so the same text
/// always maps to the same vector. Specific texts can be pinned to chosen
/// vectors, and the embedder can be switched into an unavailable state.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimensions: usize,
    fixed: HashMap<String, Vec<f32>>,
    available: bool,
}

impl MockEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fixed: HashMap::new(),
            available: true,
        }
    }

    /// An embedder whose every call fails with `ProviderUnavailable`.
    pub fn unavailable(dimensions: usize) -> Self {
        Self {
            available: false,
            ..Self::new(dimensions)
        }
    }

    /// Pin `text` to `embedding`.
    pub fn with_fixed(mut self, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.fixed.insert(text.into(), embedding);
        self
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.available {
            return Err(MemoryError::ProviderUnavailable(
                "mock embedder is offline".to_string(),
            ));
        }
        if let Some(embedding) = self.fixed.get(text) {
            return Ok(embedding.clone());
        }

        let digest = Sha256::digest(text.as_bytes());
        let mut state = digest
            .iter()
            .take(8)
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            embedding.push(((state >> 40) as f32 / (1u64 << 23) as f32) - 1.0);
        }

        Ok(normalize(&embedding))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(16);

        let a = embedder.embed("hello world").await.unwrap();
        let b = embedder.embed("hello world").await.unwrap();
        let c = embedder.embed("goodbye").await.unwrap();

        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_mock_embedder_fixed_and_batch() {
        let embedder = MockEmbedder::new(4).with_fixed("pinned", vec![1.0, 0.0, 0.0, 0.0]);

        let batch = embedder.embed_batch(&["pinned", "other"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], vec![1.0, 0.0, 0.0, 0.0]);
        assert_eq!(batch[1].len(), 4);
    }

    #[tokio::test]
    async fn test_unavailable_embedder() {
        let embedder = MockEmbedder::unavailable(4);
        let err = embedder.embed("anything").await.unwrap_err();
        assert!(matches!(err, MemoryError::ProviderUnavailable(_)));
        assert_eq!(embedder.dimensions(), 4);
    }
}
