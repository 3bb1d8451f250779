//! Query-side retrieval.
//!
//! A query is embedded once, searched against the ANN index, and the
//! surviving hits are shaped: tombstoned slots are skipped silently,
//! at most one chunk per (path, kind) survives dedup (higher similarity
//! wins), and when the knowledge graph is enabled the result set is
//! topped up with one chunk from each related file. Results come back in
//! descending score with the workspace metadata envelope.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ann::VectorIndex;
use crate::chunker::ChunkKind;
use crate::config::{self, EngineConfig};
use crate::embedder::EmbeddingPool;
use crate::error::{EngineError, EngineResult};
use crate::graph::KnowledgeGraph;
use crate::store::{Chunk, ChunkStore};

#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Number of results to return, in `[1, 50]`.
    pub top_k: usize,
    /// ANN candidates to fetch before shaping; defaults to `top_k`.
    pub per_query_top_k: Option<usize>,
    /// Upper bound on query variants a caller may fan out to. The engine
    /// itself issues a single variant; the bound is validated here so all
    /// entry points agree on it.
    pub max_variants: usize,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            top_k: config::DEFAULT_TOP_K,
            per_query_top_k: None,
            max_variants: 1,
        }
    }
}

/// One shaped retrieval result.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub path: String,
    pub content: String,
    pub score: f32,
    pub lines: String,
    pub reason: String,
}

/// Result set plus the metadata envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResponse {
    pub results: Vec<RetrievedChunk>,
    pub workspace: String,
    #[serde(rename = "lastIndexed")]
    pub last_indexed: Option<DateTime<Utc>>,
    #[serde(rename = "queryTimeMs")]
    pub query_time_ms: u64,
    #[serde(rename = "totalResults")]
    pub total_results: usize,
}

pub struct RetrievalEngine {
    config: Arc<EngineConfig>,
    store: Arc<ChunkStore>,
    ann: Arc<VectorIndex>,
    pool: Arc<EmbeddingPool>,
    graph: Arc<KnowledgeGraph>,
}

impl RetrievalEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<ChunkStore>,
        ann: Arc<VectorIndex>,
        pool: Arc<EmbeddingPool>,
        graph: Arc<KnowledgeGraph>,
    ) -> Self {
        Self {
            config,
            store,
            ann,
            pool,
            graph,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        options: RetrieveOptions,
    ) -> EngineResult<RetrievalResponse> {
        validate_query(query, &options)?;
        let start = std::time::Instant::now();

        if self.ann.is_empty() {
            return Ok(self.respond(Vec::new(), start));
        }

        let query_vector = self.pool.embed(query).await?;

        // Over-fetch by the tombstone count so skipped slots cannot
        // starve the result set.
        let base_k = options.per_query_top_k.unwrap_or(options.top_k);
        let fetch_k = (base_k + self.ann.tombstones() as usize)
            .min(self.ann.allocated().max(1) as usize);

        let hits = self.ann.search(&query_vector, fetch_k)?;

        let mut results: Vec<RetrievedChunk> = Vec::new();
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut seen_path_kind: HashSet<(String, ChunkKind)> = HashSet::new();

        // Ascending distance, so the first chunk seen for a (path, kind)
        // pair is also the best-scoring one.
        for hit in hits {
            if results.len() >= options.top_k {
                break;
            }
            let Some(chunk_id) = hit.chunk_id else {
                continue; // tombstoned slot
            };
            if !seen_ids.insert(chunk_id.clone()) {
                continue;
            }
            let chunk = match self.store.get_chunk(&chunk_id) {
                Ok(chunk) => chunk,
                // A slot that resolves but misses the store is a
                // tombstone caught mid-removal; skip it silently.
                Err(EngineError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !seen_path_kind.insert((chunk.path.clone(), chunk.kind)) {
                continue;
            }
            let score = (1.0 - hit.distance).clamp(0.0, 1.0);
            results.push(shape(chunk, score, "semantic match".to_string()));
        }

        if self.config.graph_expansion && results.len() < options.top_k {
            self.expand_with_related(&query_vector, options.top_k, &mut results, &mut seen_ids)?;
        }

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(self.respond(results, start))
    }

    /// Append up to one chunk from each file related to a top result,
    /// scored against the query vector and marked with a lower-priority
    /// reason.
    fn expand_with_related(
        &self,
        query_vector: &[f32],
        top_k: usize,
        results: &mut Vec<RetrievedChunk>,
        seen_ids: &mut HashSet<String>,
    ) -> EngineResult<()> {
        let seed_paths: Vec<String> = results.iter().map(|r| r.path.clone()).collect();
        let mut used_paths: HashSet<String> = seed_paths.iter().cloned().collect();

        'outer: for seed in &seed_paths {
            let mut related: Vec<String> = self.graph.related(seed, 1).into_iter().collect();
            related.sort();
            for neighbor in related {
                if results.len() >= top_k {
                    break 'outer;
                }
                if !used_paths.insert(neighbor.clone()) {
                    continue;
                }
                let Some(chunk) = self.pick_expansion_chunk(&neighbor)? else {
                    continue;
                };
                if !seen_ids.insert(chunk.id.clone()) {
                    continue;
                }
                let score = match self.store.get_embedding(&chunk.id) {
                    Ok(embedding) => dot(query_vector, &embedding).clamp(0.0, 1.0),
                    Err(EngineError::NotFound(_)) => continue,
                    Err(e) => return Err(e),
                };
                results.push(shape(chunk, score, format!("related to {seed}")));
            }
        }
        Ok(())
    }

    /// Representative chunk for a related file: its first definition,
    /// else its file-level chunk, else whatever comes first.
    fn pick_expansion_chunk(&self, path: &str) -> EngineResult<Option<Chunk>> {
        let chunks = self.store.chunks_for_path(path)?;
        if chunks.is_empty() {
            return Ok(None);
        }
        let chosen = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Definition)
            .or_else(|| chunks.iter().find(|c| c.kind == ChunkKind::File))
            .or(chunks.first())
            .cloned();
        Ok(chosen)
    }

    fn respond(&self, results: Vec<RetrievedChunk>, start: std::time::Instant) -> RetrievalResponse {
        RetrievalResponse {
            workspace: self.config.workspace_name(),
            last_indexed: self.store.last_indexed().ok().flatten(),
            query_time_ms: start.elapsed().as_millis() as u64,
            total_results: results.len(),
            results,
        }
    }
}

fn validate_query(query: &str, options: &RetrieveOptions) -> EngineResult<()> {
    if query.trim().is_empty() {
        return Err(EngineError::InvalidArgument("query is empty".into()));
    }
    if query.chars().count() > config::MAX_QUERY_LENGTH {
        return Err(EngineError::InvalidArgument(format!(
            "query exceeds {} characters",
            config::MAX_QUERY_LENGTH
        )));
    }
    if options.top_k < 1 || options.top_k > config::MAX_TOP_K {
        return Err(EngineError::InvalidArgument(format!(
            "top_k must be in [1, {}]",
            config::MAX_TOP_K
        )));
    }
    if let Some(k) = options.per_query_top_k {
        if k < 1 {
            return Err(EngineError::InvalidArgument(
                "per_query_top_k must be at least 1".into(),
            ));
        }
    }
    if options.max_variants < 1 {
        return Err(EngineError::InvalidArgument(
            "max_variants must be at least 1".into(),
        ));
    }
    Ok(())
}

fn shape(chunk: Chunk, score: f32, reason: String) -> RetrievedChunk {
    RetrievedChunk {
        path: chunk.path,
        lines: format!("{}-{}", chunk.start_line, chunk.end_line),
        content: chunk.content,
        score,
        reason,
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_file;
    use crate::embedder::{PoolConfig, ProviderFactory};
    use crate::hashing;
    use crate::lang::Language;
    use crate::test_support::{BagProvider, DIM};

    struct Fixture {
        store: Arc<ChunkStore>,
        ann: Arc<VectorIndex>,
        pool: Arc<EmbeddingPool>,
        graph: Arc<KnowledgeGraph>,
        retrieval: RetrievalEngine,
    }

    fn fixture() -> Fixture {
        let mut config = EngineConfig::new("/tmp/ws");
        config.dimension = DIM;
        let config = Arc::new(config);
        let store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let ann = Arc::new(VectorIndex::new(DIM, 1000).unwrap());
        let factory: ProviderFactory =
            Arc::new(|| Ok(Box::new(BagProvider) as Box<dyn crate::embedder::EmbeddingProvider>));
        let pool = Arc::new(EmbeddingPool::new(PoolConfig::new(1, DIM), factory));
        let graph = Arc::new(KnowledgeGraph::new());
        let retrieval = RetrievalEngine::new(
            config,
            store.clone(),
            ann.clone(),
            pool.clone(),
            graph.clone(),
        );
        Fixture {
            store,
            ann,
            pool,
            graph,
            retrieval,
        }
    }

    /// Index a file the way the coordinator would, without the filesystem.
    async fn seed(fx: &Fixture, path: &str, text: &str) {
        let language = Language::detect(std::path::Path::new(path));
        let output = chunk_file(text, language);
        let chunks: Vec<Chunk> = output
            .chunks
            .into_iter()
            .map(|raw| Chunk::from_raw(path, raw))
            .collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = fx.pool.embed_batch(texts).await.unwrap();
        let pairs: Vec<(Chunk, Vec<f32>)> = chunks.into_iter().zip(embeddings).collect();
        let hash = hashing::file_fingerprint(text.as_bytes(), true);
        fx.store.add_file(path, &pairs, &hash).unwrap();
        for (chunk, embedding) in &pairs {
            fx.ann.insert(&chunk.id, embedding).unwrap();
        }
        fx.graph.update_file(path, text, language, &output.symbols);
    }

    #[tokio::test]
    async fn empty_index_returns_no_results() {
        let fx = fixture();
        let response = fx
            .retrieval
            .retrieve("anything at all", RetrieveOptions::default())
            .await
            .unwrap();
        assert!(response.results.is_empty());
        assert_eq!(response.total_results, 0);
    }

    #[tokio::test]
    async fn query_validation() {
        let fx = fixture();
        let err = fx
            .retrieval
            .retrieve("   ", RetrieveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        let long = "x".repeat(1001);
        let err = fx
            .retrieval
            .retrieve(&long, RetrieveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        for bad_k in [0usize, 51] {
            let err = fx
                .retrieval
                .retrieve(
                    "fine",
                    RetrieveOptions {
                        top_k: bad_k,
                        ..Default::default()
                    },
                )
                .await
                .unwrap_err();
            assert!(matches!(err, EngineError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn returns_matching_chunks_in_descending_score() {
        let fx = fixture();
        seed(
            &fx,
            "src/math.ts",
            "// math helpers\n\nexport function multiply(a: number, b: number): number {\n    return a * b;\n}\n",
        )
        .await;
        seed(
            &fx,
            "src/io.ts",
            "// disk io\n\nexport function readConfig(): string {\n    return 'config';\n}\n",
        )
        .await;

        let response = fx
            .retrieval
            .retrieve("multiply numbers", RetrieveOptions::default())
            .await
            .unwrap();
        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].path, "src/math.ts");
        for pair in response.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for r in &response.results {
            assert!((0.0..=1.0).contains(&r.score));
            assert!(r.lines.contains('-'));
        }
    }

    #[tokio::test]
    async fn at_most_one_result_per_path_and_kind() {
        let fx = fixture();
        seed(
            &fx,
            "src/dup.ts",
            "export function first(): void {}\n\nexport function second(): void {}\n\nexport function third(): void {}\n",
        )
        .await;

        let response = fx
            .retrieval
            .retrieve(
                "function",
                RetrieveOptions {
                    top_k: 10,
                    per_query_top_k: Some(20),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // The file holds a file-level chunk plus three definition chunks,
        // all matching the query. Shaping keeps the file chunk and the
        // single best definition.
        let dup_hits = response
            .results
            .iter()
            .filter(|r| r.path == "src/dup.ts")
            .count();
        assert!(dup_hits <= 2, "expected at most one chunk per (path, kind)");

        let mut seen_ranges = HashSet::new();
        for r in &response.results {
            assert!(seen_ranges.insert((r.path.clone(), r.lines.clone())));
        }
    }

    #[tokio::test]
    async fn tombstoned_chunks_never_surface() {
        let fx = fixture();
        seed(&fx, "src/alive.ts", "export function keepme(): void {}\n").await;
        seed(&fx, "src/dead.ts", "export function dropme(): void {}\n").await;

        for id in fx.store.remove_file("src/dead.ts").unwrap() {
            fx.ann.remove(&id);
        }

        let response = fx
            .retrieval
            .retrieve(
                "dropme keepme function",
                RetrieveOptions {
                    top_k: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!response.results.is_empty());
        for r in &response.results {
            assert_ne!(r.path, "src/dead.ts");
        }
    }

    #[tokio::test]
    async fn graph_expansion_appends_related_files() {
        let fx = fixture();
        seed(
            &fx,
            "src/util.ts",
            "export function obscureHelper(): number {\n    return 42;\n}\n",
        )
        .await;
        seed(
            &fx,
            "src/app.ts",
            "import { obscureHelper } from './util';\n\nexport function runPipeline(): number {\n    return obscureHelper();\n}\n",
        )
        .await;

        // Fetch a single ANN candidate so the related file can only
        // arrive through graph expansion.
        let response = fx
            .retrieval
            .retrieve(
                "runPipeline",
                RetrieveOptions {
                    top_k: 4,
                    per_query_top_k: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(response.results.iter().filter(|r| r.reason == "semantic match").count(), 1);
        let expanded: Vec<&RetrievedChunk> = response
            .results
            .iter()
            .filter(|r| r.reason.starts_with("related to "))
            .collect();
        assert!(
            expanded.iter().any(|r| r.path == "src/util.ts"),
            "expected util.ts via graph expansion"
        );
    }
}
