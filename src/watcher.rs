//! Debounced, batched filesystem change source.
//!
//! Raw notify events are debounced by notify-debouncer-full, filtered
//! through the path filter, coalesced per path within the window
//! (`add`+`unlink` cancel, `add`+`change` compresses to `add`), and
//! emitted as batches of at most `max_batch` changes over a channel the
//! coordinator drains. Per-path ordering is preserved: a path appears at
//! most once per batch, carrying its net change.
//!
//! Stop is cooperative: an in-flight batch completes, then nothing
//! further is emitted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use notify::RecursiveMode;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify_debouncer_full::{DebounceEventResult, DebouncedEvent, Debouncer, FileIdMap, new_debouncer};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::filter::PathFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One net filesystem change, with the absolute path it happened at.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

pub struct WorkspaceWatcher {
    debouncer: Option<Debouncer<notify::RecommendedWatcher, FileIdMap>>,
    stopped: Arc<AtomicBool>,
}

impl WorkspaceWatcher {
    /// Start watching the workspace root. Batches arrive on the returned
    /// receiver; `pending_batches` is incremented per emitted batch so the
    /// coordinator can report staleness, and watcher failures are recorded
    /// into `last_error`.
    pub fn start(
        config: &EngineConfig,
        filter: Arc<PathFilter>,
        pending_batches: Arc<AtomicUsize>,
        last_error: Arc<Mutex<Option<String>>>,
    ) -> EngineResult<(Self, mpsc::UnboundedReceiver<Vec<FileChange>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));
        let max_batch = config.max_batch.max(1);

        let callback_stopped = stopped.clone();
        let mut debouncer = new_debouncer(
            Duration::from_millis(config.debounce_ms),
            None,
            move |result: DebounceEventResult| {
                if callback_stopped.load(Ordering::Acquire) {
                    return;
                }
                match result {
                    Ok(events) => {
                        let changes = coalesce_events(classify_events(&events), &filter);
                        for batch in split_batches(changes, max_batch) {
                            if callback_stopped.load(Ordering::Acquire) {
                                return;
                            }
                            pending_batches.fetch_add(1, Ordering::AcqRel);
                            if tx.send(batch).is_err() {
                                pending_batches.fetch_sub(1, Ordering::AcqRel);
                                return;
                            }
                        }
                    }
                    Err(errors) => {
                        let message = errors
                            .iter()
                            .map(|e| e.to_string())
                            .collect::<Vec<_>>()
                            .join("; ");
                        tracing::warn!(error = %message, "File watcher error");
                        *last_error.lock() = Some(format!("watcher: {message}"));
                    }
                }
            },
        )
        .map_err(|e| EngineError::Watcher(e.to_string()))?;

        debouncer
            .watch(config.workspace_root.as_path(), RecursiveMode::Recursive)
            .map_err(|e| EngineError::Watcher(e.to_string()))?;

        tracing::info!(
            root = %config.workspace_root.display(),
            debounce_ms = config.debounce_ms,
            "Started watching workspace"
        );

        Ok((
            Self {
                debouncer: Some(debouncer),
                stopped,
            },
            rx,
        ))
    }

    /// Cooperative stop: any in-flight batch completes, then the event
    /// source shuts down.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        if self.debouncer.take().is_some() {
            tracing::info!("Stopped watching workspace");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for WorkspaceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Flatten debounced events into per-path (path, kind) pairs in arrival
/// order. Renames split into a removal of the old path and an addition of
/// the new one.
fn classify_events(events: &[DebouncedEvent]) -> Vec<(PathBuf, ChangeKind)> {
    let mut flat = Vec::new();
    for event in events {
        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    flat.push((path.clone(), ChangeKind::Added));
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    flat.push((path.clone(), ChangeKind::Removed));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                flat.push((event.paths[0].clone(), ChangeKind::Removed));
                flat.push((event.paths[1].clone(), ChangeKind::Added));
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    flat.push((path.clone(), ChangeKind::Modified));
                }
            }
            _ => {}
        }
    }
    flat
}

/// Net change per path, preserving first-seen order. Paths failing the
/// filter are ignored outright; a cancelled pair (`add`+`unlink`) leaves
/// no entry at all.
fn coalesce_events(
    flat: Vec<(PathBuf, ChangeKind)>,
    filter: &PathFilter,
) -> Vec<FileChange> {
    let mut order: Vec<PathBuf> = Vec::new();
    let mut net: HashMap<PathBuf, Option<ChangeKind>> = HashMap::new();

    for (path, kind) in flat {
        if !filter.is_candidate(&path) {
            continue;
        }
        match net.get_mut(&path) {
            None => {
                order.push(path.clone());
                net.insert(path, Some(kind));
            }
            Some(slot) => {
                *slot = match slot.take() {
                    // After a cancelled pair the window starts fresh.
                    None => Some(kind),
                    Some(prev) => merge_kinds(prev, kind),
                };
            }
        }
    }

    order
        .into_iter()
        .filter_map(|path| {
            net.get(&path)
                .copied()
                .flatten()
                .map(|kind| FileChange { path, kind })
        })
        .collect()
}

/// Merge two events for the same path within one debounce window.
/// `None` means the pair cancelled out.
fn merge_kinds(prev: ChangeKind, next: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::*;
    match (prev, next) {
        (Added, Removed) => None,
        (Added, _) => Some(Added),
        (Modified, Removed) => Some(Removed),
        (Modified, _) => Some(Modified),
        (Removed, Added) | (Removed, Modified) => Some(Modified),
        (Removed, Removed) => Some(Removed),
    }
}

fn split_batches(changes: Vec<FileChange>, max_batch: usize) -> Vec<Vec<FileChange>> {
    if changes.is_empty() {
        return Vec::new();
    }
    let mut batches = Vec::new();
    let mut current = Vec::with_capacity(max_batch.min(changes.len()));
    for change in changes {
        current.push(change);
        if current.len() == max_batch {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
