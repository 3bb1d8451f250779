//! Embedding worker pool.
//!
//! A fixed number of OS worker threads pull embedding tasks from a FIFO
//! queue. Each worker lazily loads its own model handle on the first task
//! it processes; model weights are cached under the workspace state
//! directory so subsequent loads are offline. Task completion is
//! correlated by id over a oneshot channel, so a failure on one task
//! fails that task only and the worker stays alive.
//!
//! The model is reached through the `EmbeddingProvider` seam; production
//! uses fastembed's all-MiniLM-L6-v2 (384-dim, mean-pooled, L2-normalized)
//! and tests plug in a deterministic provider.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Produces fixed-dimension unit vectors from text. Implementations are
/// constructed per worker thread and are never shared.
pub trait EmbeddingProvider: Send {
    fn embed_batch(&mut self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>>;
}

/// Constructor for per-worker providers. Invoked lazily on each worker's
/// first task.
pub type ProviderFactory = Arc<dyn Fn() -> EngineResult<Box<dyn EmbeddingProvider>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub dimension: usize,
    /// Model-load retries after the initial attempt.
    pub init_retries: u32,
    /// Base backoff, doubled per retry (1s, 2s, 4s, 8s, 16s by default).
    pub init_backoff: Duration,
}

impl PoolConfig {
    pub fn new(workers: usize, dimension: usize) -> Self {
        Self {
            workers: workers.max(1),
            dimension,
            init_retries: 5,
            init_backoff: Duration::from_secs(1),
        }
    }
}

struct Task {
    id: Uuid,
    texts: Vec<String>,
    reply: oneshot::Sender<EngineResult<Vec<Vec<f32>>>>,
}

#[derive(Default)]
struct QueueState {
    tasks: VecDeque<Task>,
    closed: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    available: Condvar,
    /// Set once model initialization has exhausted its retries; later
    /// tasks fail fast with the recorded message instead of retrying.
    init_failed: Mutex<Option<String>>,
    config: PoolConfig,
    factory: ProviderFactory,
}

pub struct EmbeddingPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl EmbeddingPool {
    pub fn new(config: PoolConfig, factory: ProviderFactory) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState::default()),
            available: Condvar::new(),
            init_failed: Mutex::new(None),
            config: config.clone(),
            factory,
        });

        let mut handles = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let shared = shared.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("loupe-embed-{worker_id}"))
                    .spawn(move || worker_loop(worker_id, shared))
                    .expect("spawn embedding worker"),
            );
        }

        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    pub fn dimension(&self) -> usize {
        self.shared.config.dimension
    }

    /// Embed a single text into a unit vector.
    pub async fn embed(&self, text: impl Into<String>) -> EngineResult<Vec<f32>> {
        let mut vectors = self.embed_batch(vec![text.into()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EngineError::Embedding("empty embedding batch result".into()))
    }

    /// Embed a batch of texts, preserving input order.
    pub async fn embed_batch(&self, texts: Vec<String>) -> EngineResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let rx = self.submit(texts)?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Embedding("embedding worker terminated".into())),
        }
    }

    fn submit(&self, texts: Vec<String>) -> EngineResult<oneshot::Receiver<EngineResult<Vec<Vec<f32>>>>> {
        let (reply, rx) = oneshot::channel();
        let task = Task {
            id: Uuid::new_v4(),
            texts,
            reply,
        };
        {
            let mut queue = self.shared.queue.lock();
            if queue.closed {
                return Err(EngineError::Embedding("embedding pool is closed".into()));
            }
            tracing::trace!(task_id = %task.id, "Queued embedding task");
            queue.tasks.push_back(task);
        }
        self.shared.available.notify_one();
        Ok(rx)
    }

    /// Close the pool: no new submissions are accepted, queued tasks are
    /// rejected, in-flight tasks complete, then workers terminate.
    pub fn close(&self) {
        let rejected = {
            let mut queue = self.shared.queue.lock();
            queue.closed = true;
            std::mem::take(&mut queue.tasks)
        };
        for task in rejected {
            let _ = task
                .reply
                .send(Err(EngineError::Embedding("embedding pool is closed".into())));
        }
        self.shared.available.notify_all();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.queue.lock().closed
    }
}

impl Drop for EmbeddingPool {
    fn drop(&mut self) {
        // Wake any parked workers so their threads can exit.
        self.shared.queue.lock().closed = true;
        self.shared.available.notify_all();
    }
}

fn worker_loop(worker_id: usize, shared: Arc<Shared>) {
    let mut provider: Option<Box<dyn EmbeddingProvider>> = None;

    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break task;
                }
                if queue.closed {
                    tracing::debug!(worker_id, "Embedding worker stopped");
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        if provider.is_none() {
            if let Some(msg) = shared.init_failed.lock().clone() {
                let _ = task.reply.send(Err(EngineError::ModelInit(msg)));
                continue;
            }
            match init_with_retry(&shared) {
                Ok(p) => provider = Some(p),
                Err(e) => {
                    let msg = e.to_string();
                    *shared.init_failed.lock() = Some(msg.clone());
                    tracing::error!(worker_id, error = %msg, "Embedding model init failed");
                    let _ = task.reply.send(Err(EngineError::ModelInit(msg)));
                    continue;
                }
            }
        }

        let result = provider
            .as_mut()
            .expect("provider initialized above")
            .embed_batch(&task.texts);
        if let Err(e) = &result {
            tracing::warn!(worker_id, task_id = %task.id, error = %e, "Embedding task failed");
        }
        let _ = task.reply.send(result);
    }
}

fn init_with_retry(shared: &Shared) -> EngineResult<Box<dyn EmbeddingProvider>> {
    let mut last_err = None;
    for attempt in 0..=shared.config.init_retries {
        if attempt > 0 {
            let delay = shared.config.init_backoff * (1u32 << (attempt - 1));
            tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "Retrying embedding model init");
            std::thread::sleep(delay);
        }
        match (shared.factory)() {
            Ok(provider) => return Ok(provider),
            Err(e) => last_err = Some(e),
        }
    }
    Err(EngineError::ModelInit(
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown model init failure".into()),
    ))
}

// ---------------------------------------------------------------------------
// fastembed provider
// ---------------------------------------------------------------------------

pub struct FastembedProvider {
    model: TextEmbedding,
    dimension: usize,
}

impl FastembedProvider {
    /// Load all-MiniLM-L6-v2 with weights cached under `cache_dir` and
    /// verify the configured dimension against a probe embedding.
    pub fn load(cache_dir: &Path, dimension: usize) -> EngineResult<Self> {
        std::fs::create_dir_all(cache_dir)
            .map_err(|e| EngineError::ModelInit(format!("model cache dir: {e}")))?;

        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(false),
        )
        .map_err(|e| EngineError::ModelInit(e.to_string()))?;

        let mut provider = Self { model, dimension };
        let probe = provider.embed_batch(&["dimension probe".to_string()])?;
        let actual = probe.first().map(Vec::len).unwrap_or(0);
        if actual != dimension {
            return Err(EngineError::ModelInit(format!(
                "model dimension mismatch: expected {dimension}, got {actual}"
            )));
        }
        tracing::info!(dimension, "Embedding model initialized");
        Ok(provider)
    }
}

impl EmbeddingProvider for FastembedProvider {
    fn embed_batch(&mut self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let vectors = self
            .model
            .embed(texts.to_vec(), None)
            .map_err(|e| EngineError::Embedding(e.to_string()))?;
        Ok(vectors.into_iter().map(l2_normalize).collect())
    }
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}
