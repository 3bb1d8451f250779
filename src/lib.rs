//! loupe — local-first code indexing and semantic retrieval.
//!
//! The engine watches a workspace tree, segments source files into
//! hierarchical chunks (file, definition, block), embeds each chunk into
//! a unit vector with a local model, persists chunks and vectors in a
//! workspace-local SQLite store, and answers cosine k-NN queries over an
//! in-memory HNSW index. Indexing is incremental: content fingerprints
//! decide what gets re-embedded, and a debounced filesystem watcher keeps
//! the index current under churn.
//!
//! Everything durable lives under `.loupe-context/` in the workspace.
//! Construct a [`ContextEngine`] to use the pipeline; transports and tool
//! surfaces are the caller's business.

pub mod ann;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod filter;
pub mod graph;
pub mod hashing;
pub mod indexer;
pub mod lang;
pub mod migrate;
pub mod retrieval;
pub mod store;
pub mod watcher;

#[cfg(test)]
mod test_support;

pub use ann::{SearchHit, VectorIndex};
pub use chunker::{ChunkKind, RawChunk, SymbolInfo};
pub use config::EngineConfig;
pub use embedder::{EmbeddingPool, EmbeddingProvider, PoolConfig, ProviderFactory, l2_normalize};
pub use engine::ContextEngine;
pub use error::{EngineError, EngineResult};
pub use graph::{DependencyEdge, KnowledgeGraph};
pub use indexer::{IndexReport, IndexState, IndexStatus, Indexer};
pub use migrate::MigrationReport;
pub use retrieval::{RetrievalResponse, RetrieveOptions, RetrievedChunk};
pub use store::{Chunk, ChunkStore, FileRecord};
pub use watcher::{ChangeKind, FileChange, WorkspaceWatcher};
