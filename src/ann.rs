//! Approximate nearest-neighbor index over chunk embeddings.
//!
//! A usearch HNSW index (cosine metric) used strictly insert-only,
//! paired with the two-way chunk-id ↔ slot table. Slots are allocated
//! monotonically and never reused; removing a chunk only deletes its
//! slot-table entries, leaving the vector as a tombstone until the next
//! rebuild. Search resolves slots to chunk-ids under the same lock, so a
//! query racing a rebuild sees the old state or the new one, never a mix.

use std::collections::HashMap;

use parking_lot::RwLock;
use usearch::ffi::{IndexOptions, MetricKind, ScalarKind};

use crate::error::{EngineError, EngineResult};

/// A raw search hit. `chunk_id` is `None` for tombstoned slots; the
/// query path skips those.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub slot: u64,
    pub chunk_id: Option<String>,
    pub distance: f32,
}

struct Inner {
    index: usearch::Index,
    by_chunk: HashMap<String, u64>,
    by_slot: HashMap<u64, String>,
    next_slot: u64,
    removed: u64,
    /// Set when an insert hit `max_elements`; cleared by rebuild.
    disabled: bool,
}

pub struct VectorIndex {
    inner: RwLock<Inner>,
    dimensions: usize,
    max_elements: usize,
}

impl VectorIndex {
    pub fn new(dimensions: usize, max_elements: usize) -> EngineResult<Self> {
        let index = make_index(dimensions, max_elements)?;
        Ok(Self {
            inner: RwLock::new(Inner {
                index,
                by_chunk: HashMap::new(),
                by_slot: HashMap::new(),
                next_slot: 0,
                removed: 0,
                disabled: false,
            }),
            dimensions,
            max_elements,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of live (non-tombstoned) slots.
    pub fn len(&self) -> usize {
        self.inner.read().by_chunk.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slots ever allocated, tombstones included.
    pub fn allocated(&self) -> u64 {
        self.inner.read().next_slot
    }

    pub fn tombstones(&self) -> u64 {
        self.inner.read().removed
    }

    /// Deleted slots as a share of allocated slots.
    pub fn tombstone_ratio(&self) -> f64 {
        let inner = self.inner.read();
        if inner.next_slot == 0 {
            0.0
        } else {
            inner.removed as f64 / inner.next_slot as f64
        }
    }

    /// Whether `additional` more inserts would fit. Lets the coordinator
    /// fail a file's commit before touching the store.
    pub fn check_capacity(&self, additional: usize) -> EngineResult<()> {
        let inner = self.inner.read();
        if inner.disabled || inner.next_slot + additional as u64 > self.max_elements as u64 {
            return Err(EngineError::CapacityExceeded(self.max_elements));
        }
        Ok(())
    }

    /// Register `vector` under a freshly allocated slot mapped to
    /// `chunk_id`. The vector must be unit-norm of the configured
    /// dimension.
    pub fn insert(&self, chunk_id: &str, vector: &[f32]) -> EngineResult<u64> {
        if vector.len() != self.dimensions {
            return Err(EngineError::InvalidArgument(format!(
                "embedding dimension {} does not match index dimension {}",
                vector.len(),
                self.dimensions
            )));
        }

        let mut inner = self.inner.write();
        if inner.disabled || inner.next_slot >= self.max_elements as u64 {
            inner.disabled = true;
            return Err(EngineError::CapacityExceeded(self.max_elements));
        }

        // Re-inserting an id tombstones its previous slot first.
        if let Some(old_slot) = inner.by_chunk.remove(chunk_id) {
            inner.by_slot.remove(&old_slot);
            inner.removed += 1;
        }

        let slot = inner.next_slot;
        grow_if_needed(&inner.index, self.max_elements)?;
        inner
            .index
            .add(slot, vector)
            .map_err(|e| EngineError::Index(format!("vector insert failed: {e}")))?;
        inner.next_slot += 1;
        inner.by_chunk.insert(chunk_id.to_string(), slot);
        inner.by_slot.insert(slot, chunk_id.to_string());
        Ok(slot)
    }

    /// Tombstone a chunk's slot. The vector stays in the structure until
    /// the next rebuild. Returns the freed slot if the chunk was live.
    pub fn remove(&self, chunk_id: &str) -> Option<u64> {
        let mut inner = self.inner.write();
        let slot = inner.by_chunk.remove(chunk_id)?;
        inner.by_slot.remove(&slot);
        inner.removed += 1;
        Some(slot)
    }

    pub fn slot_of(&self, chunk_id: &str) -> Option<u64> {
        self.inner.read().by_chunk.get(chunk_id).copied()
    }

    pub fn resolve_slot(&self, slot: u64) -> Option<String> {
        self.inner.read().by_slot.get(&slot).cloned()
    }

    /// Top-k nearest neighbors by ascending cosine distance
    /// (`1 − cosine_similarity`). Returns fewer than `k` hits when fewer
    /// vectors exist. Tombstoned slots come back with `chunk_id: None`.
    pub fn search(&self, query: &[f32], k: usize) -> EngineResult<Vec<SearchHit>> {
        if query.len() != self.dimensions {
            return Err(EngineError::InvalidArgument(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimensions
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let inner = self.inner.read();
        if inner.index.size() == 0 {
            return Ok(Vec::new());
        }

        let matches = inner
            .index
            .search(query, k)
            .map_err(|e| EngineError::Search(format!("vector search failed: {e}")))?;

        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .map(|(&slot, &distance)| SearchHit {
                slot,
                chunk_id: inner.by_slot.get(&slot).cloned(),
                distance,
            })
            .collect())
    }

    /// Rebuild from a sequential scan of live chunks: fresh structure,
    /// fresh slot table, counters reset, inserts re-enabled.
    pub fn rebuild(&self, entries: Vec<(String, Vec<f32>)>) -> EngineResult<()> {
        if entries.len() > self.max_elements {
            return Err(EngineError::CapacityExceeded(self.max_elements));
        }

        let index = make_index(self.dimensions, self.max_elements)?;
        if !entries.is_empty() {
            index
                .reserve(entries.len())
                .map_err(|e| EngineError::Index(format!("reserve failed: {e}")))?;
        }

        let mut by_chunk = HashMap::with_capacity(entries.len());
        let mut by_slot = HashMap::with_capacity(entries.len());
        for (slot, (chunk_id, vector)) in entries.into_iter().enumerate() {
            if vector.len() != self.dimensions {
                return Err(EngineError::CorruptState(format!(
                    "stored embedding for {chunk_id} has dimension {}, index expects {}",
                    vector.len(),
                    self.dimensions
                )));
            }
            let slot = slot as u64;
            index
                .add(slot, &vector)
                .map_err(|e| EngineError::Index(format!("vector insert failed: {e}")))?;
            by_chunk.insert(chunk_id.clone(), slot);
            by_slot.insert(slot, chunk_id);
        }

        let mut inner = self.inner.write();
        inner.next_slot = by_chunk.len() as u64;
        inner.removed = 0;
        inner.disabled = false;
        inner.by_chunk = by_chunk;
        inner.by_slot = by_slot;
        inner.index = index;
        Ok(())
    }
}

fn make_index(dimensions: usize, max_elements: usize) -> EngineResult<usearch::Index> {
    let options = IndexOptions {
        dimensions,
        metric: MetricKind::Cos,
        quantization: ScalarKind::F32,
        connectivity: 16,
        expansion_add: 128,
        expansion_search: 64,
        multi: false,
    };
    let index = usearch::Index::new(&options)
        .map_err(|e| EngineError::Index(format!("failed to create vector index: {e}")))?;
    index
        .reserve(max_elements.min(1024).max(16))
        .map_err(|e| EngineError::Index(format!("reserve failed: {e}")))?;
    Ok(index)
}

fn grow_if_needed(index: &usearch::Index, max_elements: usize) -> EngineResult<()> {
    let size = index.size();
    let capacity = index.capacity();
    if size + 1 > capacity {
        let target = (capacity * 2).clamp(size + 1, max_elements.max(size + 1));
        index
            .reserve(target)
            .map_err(|e| EngineError::Index(format!("reserve failed: {e}")))?;
    }
    Ok(())
}
