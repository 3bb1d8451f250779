//! Durable chunk store.
//!
//! One SQLite database (`vectors.db`) per workspace with three relations:
//! `files` (path → content hash + indexing metadata), `chunks`
//! (chunk-id → content + location) and `embeddings` (chunk-id → vector
//! blob). All mutation happens inside transactions on a single connection
//! behind a mutex; WAL mode lets readers proceed during writes, and a
//! crash mid-write leaves either the previous chunk set for a path or the
//! new one, never a mix.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::chunker::{ChunkKind, RawChunk};
use crate::error::{EngineError, EngineResult};
use crate::hashing;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    indexed_at INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    kind TEXT NOT NULL,
    symbol_name TEXT,
    content_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_id TEXT PRIMARY KEY REFERENCES chunks(chunk_id) ON DELETE CASCADE,
    dim INTEGER NOT NULL,
    vector BLOB NOT NULL
);
"#;

/// A stored chunk record. Immutable after creation; any content or range
/// change produces a new chunk identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub path: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub kind: ChunkKind,
    pub symbol: Option<String>,
    pub content_hash: String,
}

impl Chunk {
    /// Chunk identity: `"<relative_path>:<start_line>-<end_line>"`.
    pub fn id_for(path: &str, start_line: usize, end_line: usize) -> String {
        format!("{path}:{start_line}-{end_line}")
    }

    /// Bind a raw chunker output to a workspace-relative path.
    pub fn from_raw(path: &str, raw: RawChunk) -> Chunk {
        Chunk {
            id: Chunk::id_for(path, raw.start_line, raw.end_line),
            path: path.to_string(),
            content_hash: hashing::chunk_fingerprint(&raw.content),
            content: raw.content,
            start_line: raw.start_line,
            end_line: raw.end_line,
            kind: raw.kind,
            symbol: raw.symbol,
        }
    }

    /// `"start-end"` as reported in retrieval results.
    pub fn lines(&self) -> String {
        format!("{}-{}", self.start_line, self.end_line)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    pub indexed_at: DateTime<Utc>,
    pub chunk_count: usize,
}

pub struct ChunkStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl ChunkStore {
    /// Open or create the store, switch it to WAL and install the schema.
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| EngineError::Store(format!("open {}: {e}", path.display())))?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    fn init(conn: &Connection) -> EngineResult<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| EngineError::Store(format!("schema init failed: {e}")))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_file_hash(&self, path: &str) -> EngineResult<Option<String>> {
        let conn = self.conn.lock();
        let hash = conn
            .query_row(
                "SELECT content_hash FROM files WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hash)
    }

    pub fn get_file(&self, path: &str) -> EngineResult<Option<FileRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT path, content_hash, indexed_at, chunk_count FROM files WHERE path = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(record.map(|(path, content_hash, ts, count)| FileRecord {
            path,
            content_hash,
            indexed_at: timestamp_to_datetime(ts),
            chunk_count: count.max(0) as usize,
        }))
    }

    /// Replace a file's chunk set transactionally: the prior chunks and
    /// their embeddings go, the new ones come in, and the `files` row is
    /// upserted. Returns the chunk-ids that were removed so the caller can
    /// drop their ANN slots. Calling twice with identical input leaves the
    /// store in the same state (modulo `indexed_at`).
    pub fn add_file(
        &self,
        path: &str,
        chunks: &[(Chunk, Vec<f32>)],
        file_hash: &str,
    ) -> EngineResult<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let removed = prior_chunk_ids(&tx, path)?;
        tx.execute("DELETE FROM chunks WHERE path = ?1", params![path])?;

        for (chunk, embedding) in chunks {
            tx.execute(
                "INSERT INTO chunks (chunk_id, path, content, start_line, end_line, kind, symbol_name, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    chunk.id,
                    chunk.path,
                    chunk.content,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    chunk.kind.as_str(),
                    chunk.symbol,
                    chunk.content_hash,
                ],
            )?;
            tx.execute(
                "INSERT INTO embeddings (chunk_id, dim, vector) VALUES (?1, ?2, ?3)",
                params![chunk.id, embedding.len() as i64, encode_vector(embedding)],
            )?;
        }

        tx.execute(
            "INSERT INTO files (path, content_hash, indexed_at, chunk_count)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 indexed_at = excluded.indexed_at,
                 chunk_count = excluded.chunk_count",
            params![path, file_hash, Utc::now().timestamp(), chunks.len() as i64],
        )?;

        tx.commit()?;
        Ok(removed)
    }

    /// Delete a file's chunks, embeddings and file row. Returns the
    /// removed chunk-ids.
    pub fn remove_file(&self, path: &str) -> EngineResult<Vec<String>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = prior_chunk_ids(&tx, path)?;
        tx.execute("DELETE FROM chunks WHERE path = ?1", params![path])?;
        tx.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(removed)
    }

    pub fn get_chunk(&self, chunk_id: &str) -> EngineResult<Chunk> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT chunk_id, path, content, start_line, end_line, kind, symbol_name, content_hash
             FROM chunks WHERE chunk_id = ?1",
            params![chunk_id],
            row_to_chunk,
        )
        .optional()?
        .ok_or_else(|| EngineError::NotFound(format!("chunk {chunk_id}")))
    }

    pub fn chunks_for_path(&self, path: &str) -> EngineResult<Vec<Chunk>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chunk_id, path, content, start_line, end_line, kind, symbol_name, content_hash
             FROM chunks WHERE path = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![path], row_to_chunk)?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }

    pub fn get_embedding(&self, chunk_id: &str) -> EngineResult<Vec<f32>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT dim, vector FROM embeddings WHERE chunk_id = ?1",
                params![chunk_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;
        let (dim, blob) = row.ok_or_else(|| EngineError::NotFound(format!("embedding {chunk_id}")))?;
        decode_vector(chunk_id, dim as usize, &blob)
    }

    /// Stream all embeddings in insertion order, for ANN rebuilds.
    pub fn scan_embeddings(
        &self,
        mut f: impl FnMut(&str, Vec<f32>) -> EngineResult<()>,
    ) -> EngineResult<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT e.chunk_id, e.dim, e.vector FROM embeddings e
             JOIN chunks c ON c.chunk_id = e.chunk_id
             ORDER BY c.rowid",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let chunk_id: String = row.get(0)?;
            let dim: i64 = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let vector = decode_vector(&chunk_id, dim as usize, &blob)?;
            f(&chunk_id, vector)?;
        }
        Ok(())
    }

    pub fn file_paths(&self) -> EngineResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path FROM files ORDER BY path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(row?);
        }
        Ok(paths)
    }

    pub fn file_count(&self) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn chunk_count(&self) -> EngineResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Most recent `indexed_at` across all files, if any.
    pub fn last_indexed(&self) -> EngineResult<Option<DateTime<Utc>>> {
        let conn = self.conn.lock();
        let ts: Option<i64> =
            conn.query_row("SELECT MAX(indexed_at) FROM files", [], |row| row.get(0))?;
        Ok(ts.map(timestamp_to_datetime))
    }

    /// Drop every row of every relation.
    pub fn clear(&self) -> EngineResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM chunks", [])?;
        tx.execute("DELETE FROM files", [])?;
        tx.commit()?;
        Ok(())
    }

    /// Cross-relation consistency check: every chunk has exactly one
    /// embedding row, no embedding is orphaned, and all embeddings share
    /// one dimension.
    pub fn verify(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        let missing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks c LEFT JOIN embeddings e ON c.chunk_id = e.chunk_id
             WHERE e.chunk_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        if missing > 0 {
            return Err(EngineError::CorruptState(format!(
                "{missing} chunk(s) without a matching embedding row"
            )));
        }
        let orphaned: i64 = conn.query_row(
            "SELECT COUNT(*) FROM embeddings e LEFT JOIN chunks c ON c.chunk_id = e.chunk_id
             WHERE c.chunk_id IS NULL",
            [],
            |row| row.get(0),
        )?;
        if orphaned > 0 {
            return Err(EngineError::CorruptState(format!(
                "{orphaned} embedding row(s) without a chunk"
            )));
        }
        let dims: i64 =
            conn.query_row("SELECT COUNT(DISTINCT dim) FROM embeddings", [], |row| row.get(0))?;
        if dims > 1 {
            return Err(EngineError::CorruptState(
                "embedding dimension drift across chunks".into(),
            ));
        }
        Ok(())
    }

    /// Durability barrier: checkpoint the WAL and let the optimizer run.
    pub fn save(&self) -> EngineResult<()> {
        let conn = self.conn.lock();
        if self.path != Path::new(":memory:") {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
                .map_err(|e| EngineError::Store(format!("wal checkpoint failed: {e}")))?;
        }
        conn.execute_batch("PRAGMA optimize;")
            .map_err(|e| EngineError::Store(format!("optimize failed: {e}")))?;
        Ok(())
    }
}

fn prior_chunk_ids(conn: &Connection, path: &str) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT chunk_id FROM chunks WHERE path = ?1 ORDER BY rowid")?;
    let rows = stmt.query_map(params![path], |row| row.get(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let kind_str: String = row.get(5)?;
    Ok(Chunk {
        id: row.get(0)?,
        path: row.get(1)?,
        content: row.get(2)?,
        start_line: row.get::<_, i64>(3)? as usize,
        end_line: row.get::<_, i64>(4)? as usize,
        kind: ChunkKind::parse(&kind_str).unwrap_or(ChunkKind::Block),
        symbol: row.get(6)?,
        content_hash: row.get(7)?,
    })
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(v.len() * 4);
    for value in v {
        bytes.extend_from_slice(&value.to_ne_bytes());
    }
    bytes
}

fn decode_vector(chunk_id: &str, dim: usize, blob: &[u8]) -> EngineResult<Vec<f32>> {
    if blob.len() != dim * 4 {
        return Err(EngineError::CorruptState(format!(
            "embedding blob for {chunk_id} has {} bytes, expected {}",
            blob.len(),
            dim * 4
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, start: usize, end: usize, content: &str) -> (Chunk, Vec<f32>) {
        let raw = RawChunk {
            content: content.to_string(),
            start_line: start,
            end_line: end,
            kind: ChunkKind::Block,
            symbol: None,
        };
        (Chunk::from_raw(path, raw), vec![0.5, 0.5, 0.5, 0.5])
    }

    #[test]
    fn add_and_get_roundtrip() {
        let store = ChunkStore::open_in_memory().unwrap();
        let chunks = vec![chunk("src/a.ts", 1, 3, "alpha"), chunk("src/a.ts", 4, 6, "beta")];
        let removed = store.add_file("src/a.ts", &chunks, "hash-1").unwrap();
        assert!(removed.is_empty());

        assert_eq!(store.get_file_hash("src/a.ts").unwrap().as_deref(), Some("hash-1"));
        assert_eq!(store.file_count().unwrap(), 1);
        assert_eq!(store.chunk_count().unwrap(), 2);

        let fetched = store.get_chunk("src/a.ts:1-3").unwrap();
        assert_eq!(fetched.content, "alpha");
        assert_eq!(fetched.kind, ChunkKind::Block);

        let embedding = store.get_embedding("src/a.ts:1-3").unwrap();
        assert_eq!(embedding, vec![0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn replacing_a_file_returns_prior_chunk_ids() {
        let store = ChunkStore::open_in_memory().unwrap();
        store
            .add_file("src/a.ts", &[chunk("src/a.ts", 1, 3, "v1")], "h1")
            .unwrap();
        let removed = store
            .add_file("src/a.ts", &[chunk("src/a.ts", 1, 5, "v2")], "h2")
            .unwrap();
        assert_eq!(removed, vec!["src/a.ts:1-3".to_string()]);
        assert!(store.get_chunk("src/a.ts:1-3").is_err());
        assert!(store.get_chunk("src/a.ts:1-5").is_ok());
        assert_eq!(store.chunk_count().unwrap(), 1);
    }

    #[test]
    fn add_file_is_idempotent_modulo_timestamps() {
        let store = ChunkStore::open_in_memory().unwrap();
        let chunks = vec![chunk("src/a.ts", 1, 3, "alpha")];
        store.add_file("src/a.ts", &chunks, "h").unwrap();
        let first = store.chunks_for_path("src/a.ts").unwrap();
        store.add_file("src/a.ts", &chunks, "h").unwrap();
        let second = store.chunks_for_path("src/a.ts").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.chunk_count().unwrap(), 1);
        assert_eq!(store.get_file_hash("src/a.ts").unwrap().as_deref(), Some("h"));
    }

    #[test]
    fn remove_file_purges_everything() {
        let store = ChunkStore::open_in_memory().unwrap();
        store
            .add_file("src/a.ts", &[chunk("src/a.ts", 1, 3, "x")], "h")
            .unwrap();
        let removed = store.remove_file("src/a.ts").unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.file_count().unwrap(), 0);
        assert_eq!(store.chunk_count().unwrap(), 0);
        assert!(store.get_embedding("src/a.ts:1-3").is_err());
        assert!(store.verify().is_ok());
    }

    #[test]
    fn scan_embeddings_in_insertion_order() {
        let store = ChunkStore::open_in_memory().unwrap();
        store
            .add_file("a.ts", &[chunk("a.ts", 1, 1, "one")], "h1")
            .unwrap();
        store
            .add_file("b.ts", &[chunk("b.ts", 1, 1, "two"), chunk("b.ts", 2, 2, "three")], "h2")
            .unwrap();
        let mut seen = Vec::new();
        store
            .scan_embeddings(|id, v| {
                assert_eq!(v.len(), 4);
                seen.push(id.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec!["a.ts:1-1", "b.ts:1-1", "b.ts:2-2"]);
    }

    #[test]
    fn clear_empties_all_relations() {
        let store = ChunkStore::open_in_memory().unwrap();
        store
            .add_file("a.ts", &[chunk("a.ts", 1, 1, "one")], "h")
            .unwrap();
        store.clear().unwrap();
        assert_eq!(store.file_count().unwrap(), 0);
        assert_eq!(store.chunk_count().unwrap(), 0);
        assert_eq!(store.last_indexed().unwrap(), None);
    }

    #[test]
    fn missing_chunk_is_not_found() {
        let store = ChunkStore::open_in_memory().unwrap();
        assert!(matches!(
            store.get_chunk("nope:1-2"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn vector_codec_roundtrip_and_corruption() {
        let v = vec![0.1f32, -2.5, 3.75];
        let blob = encode_vector(&v);
        assert_eq!(decode_vector("x", 3, &blob).unwrap(), v);
        assert!(matches!(
            decode_vector("x", 4, &blob),
            Err(EngineError::CorruptState(_))
        ));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("vectors.db");
        {
            let store = ChunkStore::open(&db).unwrap();
            store
                .add_file("a.ts", &[chunk("a.ts", 1, 2, "persisted")], "h")
                .unwrap();
            store.save().unwrap();
        }
        let store = ChunkStore::open(&db).unwrap();
        assert_eq!(store.chunk_count().unwrap(), 1);
        assert_eq!(store.get_chunk("a.ts:1-2").unwrap().content, "persisted");
    }
}
