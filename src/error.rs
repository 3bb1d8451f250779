use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Corrupt state: {0}")]
    CorruptState(String),

    #[error("Vector index at capacity ({0} elements)")]
    CapacityExceeded(usize),

    #[error("Embedding model initialization failed: {0}")]
    ModelInit(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Store(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
