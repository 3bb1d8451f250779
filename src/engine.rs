//! Engine facade: wiring and lifecycle.
//!
//! `ContextEngine::open` builds the whole pipeline for one workspace:
//! chunk store (running the legacy-state migration when needed), ANN
//! index rebuilt from the store, embedding pool, coordinator, knowledge
//! graph and retrieval engine. The embedding service is owned by the
//! engine value; there are no process-wide singletons.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::ann::VectorIndex;
use crate::config::EngineConfig;
use crate::embedder::{EmbeddingPool, PoolConfig, ProviderFactory};
use crate::error::EngineResult;
use crate::filter::PathFilter;
use crate::graph::KnowledgeGraph;
use crate::indexer::{IndexReport, IndexStatus, Indexer};
use crate::migrate;
use crate::retrieval::{RetrievalEngine, RetrievalResponse, RetrieveOptions};
use crate::store::ChunkStore;
use crate::watcher::WorkspaceWatcher;

pub struct ContextEngine {
    config: Arc<EngineConfig>,
    filter: Arc<PathFilter>,
    store: Arc<ChunkStore>,
    pool: Arc<EmbeddingPool>,
    graph: Arc<KnowledgeGraph>,
    indexer: Arc<Indexer>,
    retrieval: RetrievalEngine,
    watcher: Mutex<Option<WorkspaceWatcher>>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl ContextEngine {
    /// Open the engine with the real embedding model, cached under the
    /// workspace state directory.
    pub fn open(mut config: EngineConfig) -> EngineResult<Self> {
        config.workspace_root = dunce::canonicalize(&config.workspace_root)?;
        let cache_dir = config.model_cache_dir();
        let pool_config = PoolConfig::new(config.embed_workers, config.dimension);
        let dimension = config.dimension;
        let factory: ProviderFactory = Arc::new(move || {
            crate::embedder::FastembedProvider::load(&cache_dir, dimension)
                .map(|p| Box::new(p) as Box<dyn crate::embedder::EmbeddingProvider>)
        });
        Self::open_with_pool_config(config, pool_config, factory)
    }

    /// Open with a custom embedding provider; tests use this to run the
    /// pipeline against a deterministic embedder.
    pub fn open_with_provider(config: EngineConfig, factory: ProviderFactory) -> EngineResult<Self> {
        let pool_config = PoolConfig::new(config.embed_workers, config.dimension);
        Self::open_with_pool_config(config, pool_config, factory)
    }

    fn open_with_pool_config(
        mut config: EngineConfig,
        pool_config: PoolConfig,
        factory: ProviderFactory,
    ) -> EngineResult<Self> {
        config.workspace_root = dunce::canonicalize(&config.workspace_root)?;
        std::fs::create_dir_all(config.state_dir())?;
        let config = Arc::new(config);

        let store = Arc::new(ChunkStore::open(&config.store_path())?);
        if let Some(report) = migrate::migrate_legacy_state(&config, &store)? {
            tracing::info!(
                files = report.files,
                chunks = report.chunks,
                "Migrated legacy index state"
            );
        }
        store.verify()?;

        let ann = Arc::new(VectorIndex::new(config.dimension, config.ann_capacity)?);
        let mut entries = Vec::new();
        store.scan_embeddings(|chunk_id, vector| {
            entries.push((chunk_id.to_string(), vector));
            Ok(())
        })?;
        if !entries.is_empty() {
            tracing::info!(chunks = entries.len(), "Loading vector index from store");
        }
        ann.rebuild(entries)?;

        let filter = Arc::new(PathFilter::new(&config));
        let pool = Arc::new(EmbeddingPool::new(pool_config, factory));
        let graph = Arc::new(KnowledgeGraph::new());
        let indexer = Arc::new(Indexer::new(
            config.clone(),
            filter.clone(),
            store.clone(),
            ann.clone(),
            pool.clone(),
            graph.clone(),
        ));
        let retrieval = RetrievalEngine::new(
            config.clone(),
            store.clone(),
            ann.clone(),
            pool.clone(),
            graph.clone(),
        );

        Ok(Self {
            config,
            filter,
            store,
            pool,
            graph,
            indexer,
            retrieval,
            watcher: Mutex::new(None),
            drain_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> Arc<KnowledgeGraph> {
        self.graph.clone()
    }

    pub async fn index_workspace(&self, force: bool) -> EngineResult<IndexReport> {
        self.indexer.index_workspace(force).await
    }

    pub async fn index_files(&self, paths: &[std::path::PathBuf]) -> EngineResult<IndexReport> {
        self.indexer.index_files(paths).await
    }

    pub async fn remove_files(&self, paths: &[std::path::PathBuf]) -> EngineResult<usize> {
        self.indexer.remove_files(paths).await
    }

    pub async fn clear(&self) -> EngineResult<()> {
        self.indexer.clear().await
    }

    pub fn status(&self) -> IndexStatus {
        self.indexer.status()
    }

    /// Cooperatively cancel a running workspace index.
    pub fn cancel_indexing(&self) {
        self.indexer.cancel();
    }

    /// Operator command: rebuild the ANN index from the store.
    pub fn rebuild_index(&self) -> EngineResult<()> {
        self.indexer.rebuild_index()
    }

    pub async fn retrieve(
        &self,
        query: &str,
        options: RetrieveOptions,
    ) -> EngineResult<RetrievalResponse> {
        self.retrieval.retrieve(query, options).await
    }

    /// Start feeding filesystem changes into the coordinator. Idempotent.
    pub fn watch(&self) -> EngineResult<()> {
        let mut guard = self.watcher.lock();
        if guard.is_some() {
            return Ok(());
        }
        let (watcher, mut rx) = WorkspaceWatcher::start(
            &self.config,
            self.filter.clone(),
            self.indexer.pending_batches_handle(),
            self.indexer.last_error_handle(),
        )?;
        let indexer = self.indexer.clone();
        let task = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                indexer.drain_batch(batch).await;
            }
        });
        *guard = Some(watcher);
        *self.drain_task.lock() = Some(task);
        Ok(())
    }

    /// Stop watching. The in-flight batch (if any) is still applied.
    pub fn unwatch(&self) {
        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
        // The drain loop exits on its own once the watcher's sender is
        // gone; the handle is kept only so close() can await it.
    }

    /// Shut down: stop the watcher, drain the embedding pool, and run the
    /// store durability barrier.
    pub async fn close(&self) -> EngineResult<()> {
        self.unwatch();
        let task = self.drain_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.close())
            .await
            .map_err(|e| crate::error::EngineError::Io(std::io::Error::other(e)))?;
        self.store.save()?;
        Ok(())
    }
}
