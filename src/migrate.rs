//! Migration of the legacy v1.2 single-blob state file.
//!
//! Earlier releases persisted the whole index as one JSON document
//! (chunks with inline embeddings, plus an optional per-file hash map).
//! On first open the blob is read once, written through the chunk store,
//! and preserved as a `.bak` sidecar. Legacy `block` chunks keep their
//! kind; re-chunking is available through a forced workspace index
//! afterwards.

use std::collections::HashMap;
use std::collections::HashSet;

use serde::Deserialize;

use crate::chunker::ChunkKind;
use crate::config::EngineConfig;
use crate::embedder::l2_normalize;
use crate::error::{EngineError, EngineResult};
use crate::hashing;
use crate::store::{Chunk, ChunkStore};

#[derive(Debug, Deserialize)]
struct LegacyState {
    #[serde(default)]
    #[allow(dead_code)]
    version: Option<String>,
    #[serde(default)]
    chunks: Vec<LegacyChunk>,
    #[serde(default, alias = "fileHashes")]
    file_hashes: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LegacyChunk {
    content: String,
    embedding: Vec<f32>,
    metadata: LegacyMetadata,
}

#[derive(Debug, Deserialize)]
struct LegacyMetadata {
    path: String,
    #[serde(default, alias = "startLine")]
    start_line: Option<usize>,
    #[serde(default, alias = "endLine")]
    end_line: Option<usize>,
    #[serde(default, alias = "type")]
    kind: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MigrationReport {
    pub files: usize,
    pub chunks: usize,
}

/// Migrate the legacy state file into the store if one exists. Returns
/// `None` when there is nothing to migrate. The original blob survives
/// as `<name>.bak`.
pub fn migrate_legacy_state(
    config: &EngineConfig,
    store: &ChunkStore,
) -> EngineResult<Option<MigrationReport>> {
    let legacy_path = config.legacy_state_path();
    if !legacy_path.exists() {
        return Ok(None);
    }

    tracing::info!(path = %legacy_path.display(), "Migrating legacy state file");
    let raw = std::fs::read_to_string(&legacy_path)?;
    let state: LegacyState = serde_json::from_str(&raw)
        .map_err(|e| EngineError::CorruptState(format!("legacy state file: {e}")))?;

    // Group chunks by path, preserving their order within each file.
    let mut order: Vec<String> = Vec::new();
    let mut by_path: HashMap<String, Vec<LegacyChunk>> = HashMap::new();
    for chunk in state.chunks {
        let path = chunk.metadata.path.replace('\\', "/");
        if !by_path.contains_key(&path) {
            order.push(path.clone());
        }
        by_path.entry(path).or_default().push(chunk);
    }

    let mut report = MigrationReport::default();
    for path in order {
        let legacy_chunks = by_path.remove(&path).unwrap_or_default();
        let mut pairs: Vec<(Chunk, Vec<f32>)> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();

        for legacy in legacy_chunks {
            if legacy.embedding.len() != config.dimension {
                return Err(EngineError::CorruptState(format!(
                    "legacy chunk for {path} has embedding dimension {}, expected {}",
                    legacy.embedding.len(),
                    config.dimension
                )));
            }
            let start = legacy.metadata.start_line.unwrap_or(1).max(1);
            let end = legacy
                .metadata
                .end_line
                .unwrap_or(start + legacy.content.lines().count().saturating_sub(1))
                .max(start);
            let kind = legacy
                .metadata
                .kind
                .as_deref()
                .and_then(ChunkKind::parse)
                .unwrap_or(ChunkKind::Block);
            let chunk = Chunk {
                id: Chunk::id_for(&path, start, end),
                path: path.clone(),
                content_hash: hashing::chunk_fingerprint(&legacy.content),
                content: legacy.content,
                start_line: start,
                end_line: end,
                kind,
                symbol: legacy.metadata.symbol,
            };
            if !seen_ids.insert(chunk.id.clone()) {
                tracing::warn!(chunk_id = %chunk.id, "Duplicate chunk in legacy state, keeping first");
                continue;
            }
            pairs.push((chunk, l2_normalize(legacy.embedding)));
        }

        // Prefer the recorded hash; fall back to hashing the file on disk;
        // files that no longer exist are recorded as unknown so the next
        // workspace index re-processes them.
        let file_hash = match state.file_hashes.get(&path) {
            Some(hash) => hash.clone(),
            None => match std::fs::read(config.workspace_root.join(&path)) {
                Ok(bytes) => hashing::file_fingerprint(&bytes, config.normalize_eol),
                Err(_) => "unknown".to_string(),
            },
        };

        report.chunks += pairs.len();
        report.files += 1;
        store.add_file(&path, &pairs, &file_hash)?;
    }

    let backup = legacy_path.with_extension("json.bak");
    std::fs::rename(&legacy_path, &backup)?;
    tracing::info!(
        files = report.files,
        chunks = report.chunks,
        backup = %backup.display(),
        "Legacy state migrated"
    );
    Ok(Some(report))
}
