//! Validation utilities for caller-supplied memory data.
//!
//! This module provides validation for:
//! - Memory text
//! - Embedding dimensions and values
//! - Similarity thresholds
//! - Owner tokens

use crate::error::{MemoryError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Validation Error
// ─────────────────────────────────────────────────────────────────────────────

/// Specific validation error types for memory data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Memory text is empty or whitespace only.
    #[error("memory text is empty")]
    EmptyText,

    /// Memory text contains NUL bytes (binary data).
    #[error("memory text contains NUL bytes")]
    BinaryText,

    /// Embedding dimension mismatch.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Embedding contains invalid values (NaN or Inf).
    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidEmbeddingValues {
        /// Number of invalid values found.
        count: usize,
    },

    /// Embedding has zero magnitude; cosine similarity is undefined.
    #[error("embedding has zero magnitude")]
    ZeroEmbedding,

    /// Similarity threshold outside [-1.0, 1.0].
    #[error("similarity threshold {0} is out of range [-1.0, 1.0]")]
    InvalidThreshold(f32),

    /// Owner token is present but empty.
    #[error("owner token is empty")]
    EmptyOwner,
}

impl From<ValidationError> for MemoryError {
    fn from(err: ValidationError) -> Self {
        MemoryError::InvalidArgument(err.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Text Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate memory text.
///
/// Checks:
/// 1. Text is not empty (after trimming)
/// 2. Text carries no NUL bytes
pub fn validate_text(text: &str) -> std::result::Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyText);
    }
    if text.contains('\0') {
        return Err(ValidationError::BinaryText);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate an embedding vector.
///
/// Checks:
/// 1. Dimension matches expected size
/// 2. No NaN or Inf values
/// 3. Non-zero magnitude
pub fn validate_embedding(
    embedding: &[f32],
    expected_dim: usize,
) -> std::result::Result<(), ValidationError> {
    if embedding.len() != expected_dim {
        return Err(ValidationError::DimensionMismatch {
            expected: expected_dim,
            actual: embedding.len(),
        });
    }

    let invalid_count = embedding
        .iter()
        .filter(|v| v.is_nan() || v.is_infinite())
        .count();
    if invalid_count > 0 {
        return Err(ValidationError::InvalidEmbeddingValues {
            count: invalid_count,
        });
    }

    if embedding.iter().all(|v| *v == 0.0) {
        return Err(ValidationError::ZeroEmbedding);
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Threshold / Owner Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate a cosine similarity threshold.
pub fn validate_threshold(threshold: f32) -> std::result::Result<(), ValidationError> {
    if threshold.is_nan() || !(-1.0..=1.0).contains(&threshold) {
        return Err(ValidationError::InvalidThreshold(threshold));
    }
    Ok(())
}

/// Validate an optional owner token. `None` is always valid.
pub fn validate_owner(owner: Option<&str>) -> std::result::Result<(), ValidationError> {
    match owner {
        Some(o) if o.is_empty() => Err(ValidationError::EmptyOwner),
        _ => Ok(()),
    }
}

/// Validate the common ingest inputs in one go, returning a [`MemoryError`].
pub fn validate_write(
    text: &str,
    owner: Option<&str>,
    embedding: Option<&[f32]>,
    dimensions: usize,
) -> Result<()> {
    validate_text(text)?;
    validate_owner(owner)?;
    if let Some(embedding) = embedding {
        validate_embedding(embedding, dimensions)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_embedding_valid() {
        let embedding = vec![0.1, 0.2, 0.3, 0.4];
        assert!(validate_embedding(&embedding, 4).is_ok());
    }

    #[test]
    fn test_validate_embedding_wrong_dimension() {
        let embedding = vec![0.1, 0.2, 0.3];
        let result = validate_embedding(&embedding, 4);
        assert_eq!(
            result,
            Err(ValidationError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_validate_embedding_nan_and_infinity() {
        let result = validate_embedding(&[0.1, f32::NAN, 0.3, 0.4], 4);
        assert_eq!(
            result,
            Err(ValidationError::InvalidEmbeddingValues { count: 1 })
        );

        let result = validate_embedding(&[0.1, f32::INFINITY, f32::NEG_INFINITY, 0.4], 4);
        assert_eq!(
            result,
            Err(ValidationError::InvalidEmbeddingValues { count: 2 })
        );
    }

    #[test]
    fn test_validate_embedding_zero_vector() {
        let result = validate_embedding(&[0.0, 0.0, 0.0, 0.0], 4);
        assert_eq!(result, Err(ValidationError::ZeroEmbedding));
    }

    #[test]
    fn test_validate_text() {
        assert!(validate_text("Hello, world!").is_ok());
        assert!(validate_text("日本語テスト").is_ok());
        assert_eq!(validate_text(""), Err(ValidationError::EmptyText));
        assert_eq!(validate_text("   \n"), Err(ValidationError::EmptyText));
        assert_eq!(
            validate_text("Hello\0World"),
            Err(ValidationError::BinaryText)
        );
    }

    #[test]
    fn test_validate_threshold() {
        assert!(validate_threshold(0.95).is_ok());
        assert!(validate_threshold(-1.0).is_ok());
        assert!(validate_threshold(1.0).is_ok());
        assert!(validate_threshold(1.01).is_err());
        assert!(validate_threshold(f32::NAN).is_err());
    }

    #[test]
    fn test_validate_owner() {
        assert!(validate_owner(None).is_ok());
        assert!(validate_owner(Some("user-1")).is_ok());
        assert_eq!(validate_owner(Some("")), Err(ValidationError::EmptyOwner));
    }

    #[test]
    fn test_validation_error_to_memory_error() {
        let err: MemoryError = ValidationError::EmptyText.into();
        assert!(matches!(err, MemoryError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_write() {
        assert!(validate_write("text", Some("o"), Some(&[1.0, 0.0]), 2).is_ok());
        assert!(validate_write("text", None, None, 2).is_ok());

        let err = validate_write("text", None, Some(&[1.0, 0.0, 0.0]), 2).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }
}
