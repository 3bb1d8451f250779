//! Indexer coordinator.
//!
//! Orchestrates file-level add/update/remove through the filter, hasher,
//! chunker, embedding pool, chunk store and ANN index. Per-file commits
//! are transactional: the store swap and the ANN slot updates happen
//! together, with the removal of the old chunk set ordered before the
//! insertion of the new one. A failure on one file is counted and
//! skipped; a model-initialization failure aborts the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;

use crate::ann::VectorIndex;
use crate::chunker;
use crate::config::{EngineConfig, relative_path};
use crate::embedder::EmbeddingPool;
use crate::error::{EngineError, EngineResult};
use crate::filter::PathFilter;
use crate::graph::KnowledgeGraph;
use crate::hashing;
use crate::lang::Language;
use crate::store::{Chunk, ChunkStore};
use crate::watcher::{ChangeKind, FileChange};

/// Log cadence during workspace indexing.
const PROGRESS_INTERVAL: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Idle,
    Indexing,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub workspace: String,
    pub state: IndexState,
    pub last_indexed: Option<DateTime<Utc>>,
    pub file_count: usize,
    pub is_stale: bool,
    pub last_error: Option<String>,
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped: usize,
    pub removed: usize,
    pub errors: usize,
    pub cancelled: bool,
}

pub struct Indexer {
    config: Arc<EngineConfig>,
    filter: Arc<PathFilter>,
    store: Arc<ChunkStore>,
    ann: Arc<VectorIndex>,
    pool: Arc<EmbeddingPool>,
    graph: Arc<KnowledgeGraph>,
    is_indexing: AtomicBool,
    cancel_requested: AtomicBool,
    error_state: AtomicBool,
    pending_batches: Arc<AtomicUsize>,
    last_error: Arc<Mutex<Option<String>>>,
}

/// Resets a busy flag when the indexing scope exits, error paths included.
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Indexer {
    pub fn new(
        config: Arc<EngineConfig>,
        filter: Arc<PathFilter>,
        store: Arc<ChunkStore>,
        ann: Arc<VectorIndex>,
        pool: Arc<EmbeddingPool>,
        graph: Arc<KnowledgeGraph>,
    ) -> Self {
        Self {
            config,
            filter,
            store,
            ann,
            pool,
            graph,
            is_indexing: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            error_state: AtomicBool::new(false),
            pending_batches: Arc::new(AtomicUsize::new(0)),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Shared counter of watcher batches not yet drained; feeds
    /// `status().is_stale`.
    pub fn pending_batches_handle(&self) -> Arc<AtomicUsize> {
        self.pending_batches.clone()
    }

    /// Shared sink for user-visible failure strings (also written by the
    /// watcher on event-source errors).
    pub fn last_error_handle(&self) -> Arc<Mutex<Option<String>>> {
        self.last_error.clone()
    }

    /// Request cooperative cancellation of a running workspace index.
    /// Files committed so far stay committed.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    pub fn status(&self) -> IndexStatus {
        let state = if self.error_state.load(Ordering::Acquire) {
            IndexState::Error
        } else if self.is_indexing.load(Ordering::Acquire) {
            IndexState::Indexing
        } else {
            IndexState::Idle
        };
        IndexStatus {
            workspace: self.config.workspace_name(),
            state,
            last_indexed: self.store.last_indexed().ok().flatten(),
            file_count: self.store.file_count().unwrap_or(0),
            is_stale: self.pending_batches.load(Ordering::Acquire) > 0,
            last_error: self.last_error.lock().clone(),
        }
    }

    /// Scan the workspace tree and (re-)index every indexable file whose
    /// fingerprint changed; files that disappeared since the last run are
    /// removed. With `force`, matching fingerprints are re-indexed anyway.
    pub async fn index_workspace(&self, force: bool) -> EngineResult<IndexReport> {
        if self
            .is_indexing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("Indexing already in progress, skipping duplicate request");
            return Ok(IndexReport::default());
        }
        let _busy = FlagGuard(&self.is_indexing);
        self.cancel_requested.store(false, Ordering::Release);

        let start = std::time::Instant::now();
        let mut report = IndexReport::default();

        let scanned = self.scan_workspace();
        let scanned_rels: std::collections::HashSet<String> = scanned
            .iter()
            .map(|p| relative_path(&self.config.workspace_root, p))
            .collect();

        // Fingerprint everything in parallel; unreadable files count as
        // errors and drop out here.
        let normalize = self.config.normalize_eol;
        let hashed: Vec<(PathBuf, String, Option<String>)> = scanned
            .par_iter()
            .map(|abs| {
                let rel = relative_path(&self.config.workspace_root, abs);
                let hash = std::fs::read(abs)
                    .ok()
                    .map(|bytes| hashing::file_fingerprint(&bytes, normalize));
                (abs.clone(), rel, hash)
            })
            .collect();

        let mut to_index: Vec<(PathBuf, String, String)> = Vec::new();
        for (abs, rel, hash) in hashed {
            let Some(hash) = hash else {
                report.errors += 1;
                continue;
            };
            if !force && self.store.get_file_hash(&rel)?.as_deref() == Some(hash.as_str()) {
                report.skipped += 1;
                continue;
            }
            to_index.push((abs, rel, hash));
        }

        // Files the store knows but the scan no longer sees.
        for stale in self
            .store
            .file_paths()?
            .into_iter()
            .filter(|p| !scanned_rels.contains(p))
        {
            self.remove_one(&stale)?;
            report.removed += 1;
        }

        tracing::info!(
            to_index = to_index.len(),
            unchanged = report.skipped,
            removed = report.removed,
            "Workspace scan complete"
        );

        let total = to_index.len();
        for (processed, (abs, rel, hash)) in to_index.into_iter().enumerate() {
            if self.cancel_requested.load(Ordering::Acquire) {
                report.cancelled = true;
                tracing::info!(processed, total, "Indexing cancelled");
                break;
            }
            match self.process_file(&abs, &rel, &hash).await {
                Ok(()) => report.indexed += 1,
                Err(e) if is_fatal(&e) => {
                    *self.last_error.lock() = Some(e.to_string());
                    if matches!(e, EngineError::ModelInit(_)) {
                        self.error_state.store(true, Ordering::Release);
                    }
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "Failed to index file");
                    *self.last_error.lock() = Some(format!("{rel}: {e}"));
                    report.errors += 1;
                }
            }
            if (processed + 1) % PROGRESS_INTERVAL == 0 {
                tracing::info!(processed = processed + 1, total, "Indexing progress");
            }
        }

        self.maybe_rebuild()?;
        self.store.save()?;
        if !report.cancelled {
            self.error_state.store(false, Ordering::Release);
        }

        tracing::info!(
            indexed = report.indexed,
            skipped = report.skipped,
            removed = report.removed,
            errors = report.errors,
            duration_ms = start.elapsed().as_millis() as u64,
            "Indexing complete"
        );
        Ok(report)
    }

    /// Index just the given paths (absolute or workspace-relative). Paths
    /// that stopped existing or stopped being indexable are removed from
    /// the store instead.
    pub async fn index_files(&self, paths: &[PathBuf]) -> EngineResult<IndexReport> {
        if self.is_indexing.load(Ordering::Acquire) {
            tracing::debug!("Full indexing in progress, skipping incremental update");
            return Ok(IndexReport::default());
        }

        let mut report = IndexReport::default();
        for path in paths {
            let (abs, rel) = self.resolve(path);
            let size = match std::fs::metadata(&abs) {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => {
                    // Gone (or not a regular file): drop whatever we had.
                    if self.store.get_file_hash(&rel)?.is_some() {
                        self.remove_one(&rel)?;
                        report.removed += 1;
                    }
                    continue;
                }
            };
            if !self.filter.is_indexable(&abs, size) {
                if self.store.get_file_hash(&rel)?.is_some() {
                    self.remove_one(&rel)?;
                    report.removed += 1;
                }
                continue;
            }

            let bytes = match std::fs::read(&abs) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "Failed to read file");
                    report.errors += 1;
                    continue;
                }
            };
            let hash = hashing::file_fingerprint(&bytes, self.config.normalize_eol);
            if self.store.get_file_hash(&rel)?.as_deref() == Some(hash.as_str()) {
                report.skipped += 1;
                continue;
            }

            match self.process_file(&abs, &rel, &hash).await {
                Ok(()) => report.indexed += 1,
                Err(e) if is_fatal(&e) => {
                    *self.last_error.lock() = Some(e.to_string());
                    if matches!(e, EngineError::ModelInit(_)) {
                        self.error_state.store(true, Ordering::Release);
                    }
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "Failed to index file");
                    *self.last_error.lock() = Some(format!("{rel}: {e}"));
                    report.errors += 1;
                }
            }
        }
        self.maybe_rebuild()?;
        Ok(report)
    }

    /// Remove the given paths from the store and drop their ANN slots.
    pub async fn remove_files(&self, paths: &[PathBuf]) -> EngineResult<usize> {
        let mut removed = 0;
        for path in paths {
            let (_, rel) = self.resolve(path);
            if self.store.get_file_hash(&rel)?.is_some() {
                self.remove_one(&rel)?;
                removed += 1;
            }
        }
        self.maybe_rebuild()?;
        Ok(removed)
    }

    /// Drop all indexed state and start from an empty ANN index.
    pub async fn clear(&self) -> EngineResult<()> {
        self.store.clear()?;
        self.ann.rebuild(Vec::new())?;
        self.graph.clear();
        *self.last_error.lock() = None;
        self.error_state.store(false, Ordering::Release);
        Ok(())
    }

    /// Apply one watcher batch, then mark it drained.
    pub async fn drain_batch(&self, batch: Vec<FileChange>) {
        let result = self.apply_changes(batch).await;
        self.pending_batches.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to apply change batch");
            *self.last_error.lock() = Some(e.to_string());
        }
    }

    async fn apply_changes(&self, batch: Vec<FileChange>) -> EngineResult<()> {
        let (removals, updates): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|change| change.kind == ChangeKind::Removed);

        let removal_paths: Vec<PathBuf> = removals.into_iter().map(|c| c.path).collect();
        if !removal_paths.is_empty() {
            self.remove_files(&removal_paths).await?;
        }
        let update_paths: Vec<PathBuf> = updates.into_iter().map(|c| c.path).collect();
        if !update_paths.is_empty() {
            self.index_files(&update_paths).await?;
        }
        Ok(())
    }

    /// Rebuild the ANN index from the store. Exposed for operator use;
    /// also triggered automatically when the tombstone ratio crosses the
    /// configured threshold.
    pub fn rebuild_index(&self) -> EngineResult<()> {
        let mut entries = Vec::new();
        self.store.scan_embeddings(|chunk_id, vector| {
            entries.push((chunk_id.to_string(), vector));
            Ok(())
        })?;
        let count = entries.len();
        self.ann.rebuild(entries)?;
        tracing::info!(live_chunks = count, "Rebuilt vector index");
        Ok(())
    }

    fn maybe_rebuild(&self) -> EngineResult<()> {
        if self.ann.tombstone_ratio() > self.config.rebuild_tombstone_ratio {
            self.rebuild_index()?;
        }
        Ok(())
    }

    /// Hash → read → chunk → embed → commit for one file. The commit
    /// first tombstones the prior chunk set's slots, then inserts the new
    /// chunks into the store and the ANN index together.
    async fn process_file(&self, abs: &Path, rel: &str, file_hash: &str) -> EngineResult<()> {
        let bytes = std::fs::read(abs)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| EngineError::InvalidArgument(format!("{rel}: not valid UTF-8")))?;

        let language = Language::detect(abs);
        let output = chunker::chunk_file(&text, language);

        let chunks: Vec<Chunk> = output
            .chunks
            .into_iter()
            .map(|raw| Chunk::from_raw(rel, raw))
            .collect();

        // Capacity is checked before anything is written so a failed
        // commit leaves the prior state untouched.
        self.ann.check_capacity(chunks.len())?;

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.pool.embed_batch(texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(EngineError::Embedding(format!(
                "{rel}: embedded {} of {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        let pairs: Vec<(Chunk, Vec<f32>)> = chunks.into_iter().zip(embeddings).collect();
        let removed = self.store.add_file(rel, &pairs, file_hash)?;
        for chunk_id in &removed {
            self.ann.remove(chunk_id);
        }
        for (chunk, embedding) in &pairs {
            self.ann.insert(&chunk.id, embedding)?;
        }

        self.graph.update_file(rel, &text, language, &output.symbols);
        tracing::debug!(
            path = %rel,
            language = language.name(),
            chunks = pairs.len(),
            "Indexed file"
        );
        Ok(())
    }

    fn remove_one(&self, rel: &str) -> EngineResult<()> {
        let removed = self.store.remove_file(rel)?;
        for chunk_id in &removed {
            self.ann.remove(chunk_id);
        }
        self.graph.remove_file(rel);
        tracing::debug!(path = %rel, chunks = removed.len(), "Removed file from index");
        Ok(())
    }

    /// Walk the workspace tree, applying gitignore rules and the path
    /// filter, and return the indexable files.
    fn scan_workspace(&self) -> Vec<PathBuf> {
        WalkBuilder::new(&self.config.workspace_root)
            .hidden(false)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .max_depth(Some(20))
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|entry| {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
                self.filter.is_indexable(entry.path(), size)
            })
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Accepts absolute paths (from the watcher) and workspace-relative
    /// paths (from callers); returns both forms.
    fn resolve(&self, path: &Path) -> (PathBuf, String) {
        let abs = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.workspace_root.join(path)
        };
        let rel = relative_path(&self.config.workspace_root, &abs);
        (abs, rel)
    }
}

fn is_fatal(error: &EngineError) -> bool {
    matches!(
        error,
        EngineError::ModelInit(_) | EngineError::CapacityExceeded(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{EmbeddingProvider, PoolConfig, ProviderFactory};
    use crate::test_support::{BagProvider, DIM, write_file};

    fn test_indexer(root: &Path) -> Indexer {
        let mut config = EngineConfig::new(root);
        config.dimension = DIM;
        config.embed_workers = 2;
        let config = Arc::new(config);
        let factory: ProviderFactory =
            Arc::new(|| Ok(Box::new(BagProvider) as Box<dyn EmbeddingProvider>));
        Indexer::new(
            config.clone(),
            Arc::new(PathFilter::new(&config)),
            Arc::new(ChunkStore::open_in_memory().unwrap()),
            Arc::new(VectorIndex::new(DIM, config.ann_capacity).unwrap()),
            Arc::new(EmbeddingPool::new(PoolConfig::new(2, DIM), factory)),
            Arc::new(KnowledgeGraph::new()),
        )
    }

    #[tokio::test]
    async fn indexes_then_skips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "src/a.ts",
            "const n = 1;\n\nexport function foo(): number {\n    return n;\n}\n",
        );

        let indexer = test_indexer(dir.path());
        let first = indexer.index_workspace(false).await.unwrap();
        assert_eq!(first.indexed, 1);
        assert_eq!(first.errors, 0);
        assert!(indexer.store.chunk_count().unwrap() >= 2);

        // Second pass: every fingerprint matches, nothing is written.
        let second = indexer.index_workspace(false).await.unwrap();
        assert_eq!(second.indexed, 0);
        assert_eq!(second.skipped, 1);
    }

    #[tokio::test]
    async fn force_reindexes_matching_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.ts", "export function one(): number { return 1; }\n");
        let indexer = test_indexer(dir.path());
        indexer.index_workspace(false).await.unwrap();
        let forced = indexer.index_workspace(true).await.unwrap();
        assert_eq!(forced.indexed, 1);
        assert_eq!(forced.skipped, 0);
    }

    #[tokio::test]
    async fn deleted_files_are_purged_on_rescan() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.ts", "export function gone(): void {}\n");
        write_file(dir.path(), "b.ts", "export function kept(): void {}\n");

        let indexer = test_indexer(dir.path());
        indexer.index_workspace(false).await.unwrap();
        assert_eq!(indexer.store.file_count().unwrap(), 2);

        std::fs::remove_file(dir.path().join("a.ts")).unwrap();
        let report = indexer.index_workspace(false).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(indexer.store.file_count().unwrap(), 1);
        assert!(indexer.store.get_file_hash("a.ts").unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_files_drops_ann_slots() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.ts", "export function target(): void {}\n");
        let indexer = test_indexer(dir.path());
        indexer.index_workspace(false).await.unwrap();
        let live_before = indexer.ann.len();
        assert!(live_before > 0);

        let removed = indexer
            .remove_files(&[PathBuf::from("a.ts")])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(indexer.ann.len(), 0);
        assert_eq!(indexer.store.chunk_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn clear_resets_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.ts", "export function x(): void {}\n");
        let indexer = test_indexer(dir.path());
        indexer.index_workspace(false).await.unwrap();
        indexer.clear().await.unwrap();
        assert_eq!(indexer.store.file_count().unwrap(), 0);
        assert_eq!(indexer.ann.allocated(), 0);
        let status = indexer.status();
        assert_eq!(status.file_count, 0);
        assert_eq!(status.state, IndexState::Idle);
    }

    #[tokio::test]
    async fn unreadable_file_is_counted_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "ok.ts", "export function fine(): void {}\n");
        // Invalid UTF-8 passes the filter (extension) but fails the read.
        std::fs::write(dir.path().join("bad.ts"), [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let indexer = test_indexer(dir.path());
        let report = indexer.index_workspace(false).await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.errors, 1);
        assert!(indexer.status().last_error.is_some());
    }

    #[tokio::test]
    async fn capacity_exhaustion_fails_the_commit_and_recovers_after_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        // One chunk per file: single short line, no definitions.
        for i in 0..4 {
            write_file(dir.path(), &format!("f{i}.txt"), &format!("note {i}\n"));
        }

        let mut config = EngineConfig::new(dir.path());
        config.dimension = DIM;
        config.ann_capacity = 4;
        let config = Arc::new(config);
        let factory: ProviderFactory =
            Arc::new(|| Ok(Box::new(BagProvider) as Box<dyn EmbeddingProvider>));
        let indexer = Indexer::new(
            config.clone(),
            Arc::new(PathFilter::new(&config)),
            Arc::new(ChunkStore::open_in_memory().unwrap()),
            Arc::new(VectorIndex::new(DIM, 4).unwrap()),
            Arc::new(EmbeddingPool::new(PoolConfig::new(1, DIM), factory)),
            Arc::new(KnowledgeGraph::new()),
        );
        indexer.index_workspace(false).await.unwrap();
        assert_eq!(indexer.store.file_count().unwrap(), 4);

        // A fifth file exceeds max_elements; its commit fails and the
        // store is left untouched.
        write_file(dir.path(), "f4.txt", "note 4\n");
        let err = indexer
            .index_files(&[PathBuf::from("f4.txt")])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CapacityExceeded(4)));
        assert!(indexer.store.get_file_hash("f4.txt").unwrap().is_none());

        // Operator removes one file and rebuilds; indexing works again.
        indexer.remove_files(&[PathBuf::from("f0.txt")]).await.unwrap();
        indexer.rebuild_index().unwrap();
        let report = indexer.index_files(&[PathBuf::from("f4.txt")]).await.unwrap();
        assert_eq!(report.indexed, 1);
    }

    #[tokio::test]
    async fn tombstone_ratio_triggers_automatic_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..10 {
            write_file(dir.path(), &format!("f{i}.txt"), &format!("body {i}\n"));
        }
        let indexer = test_indexer(dir.path());
        indexer.index_workspace(false).await.unwrap();
        let allocated_before = indexer.ann.allocated();
        assert_eq!(allocated_before, 10);

        // Removing 3 of 10 puts the ratio over the 0.2 threshold; the
        // automatic rebuild compacts the slot space.
        let targets: Vec<PathBuf> = (0..3).map(|i| PathBuf::from(format!("f{i}.txt"))).collect();
        indexer.remove_files(&targets).await.unwrap();
        assert_eq!(indexer.ann.tombstones(), 0);
        assert_eq!(indexer.ann.allocated(), 7);
    }

    #[tokio::test]
    async fn model_init_failure_is_fatal_and_sets_error_state() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.ts", "export function f(): void {}\n");

        let mut config = EngineConfig::new(dir.path());
        config.dimension = DIM;
        let config = Arc::new(config);
        let factory: ProviderFactory =
            Arc::new(|| Err(EngineError::ModelInit("weights missing".into())));
        let pool_config = PoolConfig {
            workers: 1,
            dimension: DIM,
            init_retries: 0,
            init_backoff: std::time::Duration::from_millis(1),
        };
        let indexer = Indexer::new(
            config.clone(),
            Arc::new(PathFilter::new(&config)),
            Arc::new(ChunkStore::open_in_memory().unwrap()),
            Arc::new(VectorIndex::new(DIM, 100).unwrap()),
            Arc::new(EmbeddingPool::new(pool_config, factory)),
            Arc::new(KnowledgeGraph::new()),
        );
        let err = indexer.index_workspace(false).await.unwrap_err();
        assert!(matches!(err, EngineError::ModelInit(_)));
        assert_eq!(indexer.status().state, IndexState::Error);
    }
}
