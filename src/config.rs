use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Name of the workspace-local state directory. Everything durable
/// (chunk store, model cache) lives beneath it, and the path filter
/// refuses to index anything inside it.
pub const STATE_DIR_NAME: &str = ".loupe-context";

/// Legacy v1.2 single-blob state file, migrated into the chunk store
/// on first open and preserved as a `.bak` sidecar.
pub const LEGACY_STATE_FILE: &str = ".loupe-context-state.json";

/// Chunk store database file inside the state directory.
pub const STORE_FILE: &str = "vectors.db";

/// Embedding model cache directory inside the state directory.
pub const MODELS_DIR: &str = "models";

/// Maximum allowed length for retrieval queries (characters).
pub const MAX_QUERY_LENGTH: usize = 1000;

/// Bounds for the `top_k` retrieval parameter.
pub const MAX_TOP_K: usize = 50;
pub const DEFAULT_TOP_K: usize = 10;

/// Files larger than this are never chunked or embedded.
pub const MAX_INDEXABLE_FILE_BYTES: u64 = 500_000;

/// Canonical list of file extensions considered indexable and embeddable.
/// The path filter, the chunker and the watcher all use this single list
/// so they never diverge.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // JavaScript / TypeScript
    "ts", "tsx", "js", "jsx", "mjs", "cjs",
    // Systems / compiled
    "rs", "py", "go", "java", "c", "cpp", "h", "hpp",
    "cs", "rb", "php", "swift", "kt", "scala",
    // Web
    "html", "css", "scss", "less", "sass",
    // Data / config
    "json", "yaml", "yml", "toml", "xml",
    // Documentation
    "md", "mdx", "txt", "rst",
    // Query / schema
    "sql", "graphql", "gql",
    // Shell
    "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd",
    // Frontend frameworks
    "vue", "svelte", "astro",
    // Misc languages
    "lua", "zig", "nim", "dart", "ex", "exs",
    "r", "jl", "clj", "cljs", "erl", "hrl",
    // Infra / IPC
    "tf", "hcl", "proto",
    // Config
    "ini", "cfg", "conf",
];

/// Basenames indexed regardless of extension (lowercase comparison).
pub const SPECIAL_FILES: &[&str] = &[
    "dockerfile",
    "makefile",
    "cmakelists.txt",
    "cargo.toml",
    "package.json",
    "tsconfig.json",
    "pyproject.toml",
    "readme",
    "license",
    "changelog",
    "contributing",
    // Config templates: documentation, not credentials.
    "env.example",
    "env.template",
    "env.sample",
    ".env.example",
    ".env.template",
    ".env.sample",
];

/// Directory names that are never descended into or indexed.
pub const EXCLUDED_DIRECTORIES: &[&str] = &[
    ".git",
    "node_modules",
    "dist",
    "build",
    "out",
    "target",
    "vendor",
    "coverage",
    ".next",
    ".nuxt",
    ".output",
    ".vite",
    ".turbo",
    ".svelte-kit",
    "__pycache__",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    ".nyc_output",
    ".cache",
    ".gradle",
    ".terraform",
    ".idea",
    ".vscode",
    STATE_DIR_NAME,
];

/// Check whether a file extension (without leading dot, lowercase) is in the
/// shared supported-extensions list.
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

/// Check whether a directory name is on the shared deny-list.
pub fn is_excluded_directory(name: &str) -> bool {
    EXCLUDED_DIRECTORIES.contains(&name) || name.ends_with(".egg-info")
}

/// Default embedding worker count: one less than the CPU count, clamped
/// to [1, 4]. Embedding is CPU-bound; leaving one core free keeps the
/// coordinator and watcher responsive.
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    cpus.saturating_sub(1).clamp(1, 4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Workspace root; all indexed paths are relative to it.
    pub workspace_root: PathBuf,
    /// Embedding dimension. Must match the configured model.
    pub dimension: usize,
    /// Number of embedding workers.
    pub embed_workers: usize,
    /// Maximum file size accepted by the path filter, in bytes.
    pub max_file_size: u64,
    /// ANN index capacity; inserts beyond this fail with CapacityExceeded.
    pub ann_capacity: usize,
    /// Watcher debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Maximum number of coalesced changes per watcher batch.
    pub max_batch: usize,
    /// Extra ignore patterns (glob syntax) applied by the path filter.
    pub ignored: Vec<String>,
    /// Canonicalize CRLF to LF before hashing file content.
    pub normalize_eol: bool,
    /// Rebuild the ANN index when deleted slots exceed this share of
    /// allocated slots.
    pub rebuild_tombstone_ratio: f64,
    /// Expand retrieval results with one hop of knowledge-graph neighbors
    /// when fewer than `top_k` vector hits survive dedup.
    pub graph_expansion: bool,
}

impl EngineConfig {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            dimension: 384,
            embed_workers: default_worker_count(),
            max_file_size: MAX_INDEXABLE_FILE_BYTES,
            ann_capacity: 100_000,
            debounce_ms: 500,
            max_batch: 100,
            ignored: Vec::new(),
            normalize_eol: true,
            rebuild_tombstone_ratio: 0.2,
            graph_expansion: true,
        }
    }

    /// Build a config for `workspace_root` with `LOUPE_*` environment
    /// overrides applied on top of the defaults.
    pub fn from_env(workspace_root: impl Into<PathBuf>) -> Self {
        let mut cfg = Self::new(workspace_root);
        if let Some(v) = env_parse("LOUPE_MAX_FILE_SIZE") {
            cfg.max_file_size = v;
        }
        if let Some(v) = env_parse("LOUPE_EMBED_WORKERS") {
            cfg.embed_workers = v;
        }
        if let Some(v) = env_parse("LOUPE_ANN_CAPACITY") {
            cfg.ann_capacity = v;
        }
        if let Some(v) = env_parse("LOUPE_DEBOUNCE_MS") {
            cfg.debounce_ms = v;
        }
        if let Some(v) = env_parse("LOUPE_MAX_BATCH") {
            cfg.max_batch = v;
        }
        if let Ok(patterns) = std::env::var("LOUPE_IGNORED") {
            cfg.ignored = patterns
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        cfg
    }

    /// `.loupe-context/` under the workspace root.
    pub fn state_dir(&self) -> PathBuf {
        self.workspace_root.join(STATE_DIR_NAME)
    }

    /// Path of the chunk store database.
    pub fn store_path(&self) -> PathBuf {
        self.state_dir().join(STORE_FILE)
    }

    /// Embedding model cache directory.
    pub fn model_cache_dir(&self) -> PathBuf {
        self.state_dir().join(MODELS_DIR)
    }

    /// Path of the legacy v1.2 state blob, if a previous version left one.
    pub fn legacy_state_path(&self) -> PathBuf {
        self.workspace_root.join(LEGACY_STATE_FILE)
    }

    /// Workspace name reported in retrieval envelopes.
    pub fn workspace_name(&self) -> String {
        self.workspace_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.workspace_root.to_string_lossy().to_string())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Convert an absolute path under `root` to the forward-slashed relative
/// form used for chunk identities and result paths.
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
