//! Shared fixtures for unit tests: a deterministic embedding provider
//! that needs no model downloads.

use std::path::Path;

use crate::embedder::{EmbeddingProvider, l2_normalize};
use crate::error::EngineResult;

/// Dimension used throughout the unit tests.
pub const DIM: usize = 64;

/// Bag-of-words embedder: each alphanumeric token hashes to one of `DIM`
/// buckets, counts are L2-normalized. Identical texts embed identically
/// and overlapping vocabularies land close together, which is all the
/// pipeline tests need from an embedding model.
pub struct BagProvider;

impl EmbeddingProvider for BagProvider {
    fn embed_batch(&mut self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| bag_embedding(t)).collect())
    }
}

pub fn bag_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h: usize = 5381;
        for b in word.bytes() {
            h = h.wrapping_mul(33) ^ b as usize;
        }
        v[h % DIM] += 1.0;
    }
    l2_normalize(v)
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}
