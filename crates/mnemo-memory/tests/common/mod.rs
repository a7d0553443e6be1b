//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::path::Path;

use anyhow::Result;
use mnemo_memory::{IndexBackend, MemoryConfig, MemoryStore};

/// Dimensionality used by every integration test.
pub const DIMS: usize = 4;

pub fn test_config() -> MemoryConfig {
    MemoryConfig::default().with_dimensions(DIMS)
}

/// Fresh in-memory store on the exact backend.
pub fn memory_store() -> Result<MemoryStore> {
    Ok(MemoryStore::open_in_memory_with_config(test_config())?)
}

/// On-disk store at `path` on the exact backend.
pub fn file_store(path: &Path) -> Result<MemoryStore> {
    Ok(MemoryStore::open_with_config(path, test_config())?)
}

/// Fresh in-memory store served by sqlite-vec.
pub fn sqlite_vec_store() -> Result<MemoryStore> {
    let config = test_config().with_index_backend(IndexBackend::SqliteVec);
    Ok(MemoryStore::open_in_memory_with_config(config)?)
}

/// Reference direction every scenario measures against.
pub fn e1() -> Vec<f32> {
    vec![1.0, 0.0, 0.0, 0.0]
}

/// Unit vector at cosine `cos` to [`e1`], tilted along the second axis.
pub fn at_cosine(cos: f32) -> Vec<f32> {
    vec![cos, (1.0 - cos * cos).sqrt(), 0.0, 0.0]
}

/// Unit vector at cosine `cos` to [`e1`], tilted along the third axis.
pub fn at_cosine_z(cos: f32) -> Vec<f32> {
    vec![cos, 0.0, (1.0 - cos * cos).sqrt(), 0.0]
}

pub fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-4
}
