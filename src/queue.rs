// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Per-file processor queues
//!
//! Each tracked path owns a FIFO of pending [`Processor`]s drained by a single
//! task, so at most one processor runs for a path at any time. A failing or
//! panicking processor is logged and the drain moves on to the next one.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, error, trace, warn};

type Task = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A unit of work queued for one file
pub struct Processor {
    label: String,
    task: Task,
}

impl Processor {
    /// Wrap an async closure; `label` names it in logs
    pub fn new<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            label: label.into(),
            task: Box::new(move || f().boxed()),
        }
    }

    /// Log label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor").field("label", &self.label).finish_non_exhaustive()
    }
}

/// Queue bookkeeping for one path
struct FileQueueEntry {
    pending: VecDeque<Processor>,
    is_processing: bool,
    arrived_at: DateTime<Utc>,
    drain: Option<AbortHandle>,
}

impl FileQueueEntry {
    fn state(&self) -> QueueState {
        if self.is_processing {
            QueueState::Processing
        } else if self.pending.is_empty() {
            QueueState::Idle
        } else {
            QueueState::Queued
        }
    }
}

/// Lifecycle of a file's queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Nothing pending (or not tracked)
    Idle,
    /// Has pending processors, not draining
    Queued,
    /// A drain task is running
    Processing,
}

/// Queue behaviour switches
#[derive(Debug, Clone, Copy)]
pub struct QueueOptions {
    /// Start draining a file as soon as processors are enqueued
    pub auto_start: bool,
    /// Drop a drained entry immediately instead of on [`QueueManager::cleanup`]
    pub auto_cleanup: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            auto_start: true,
            auto_cleanup: true,
        }
    }
}

/// One row of a [`QueueSnapshot`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntryStatus {
    /// Tracked path
    pub path: PathBuf,
    /// Current state
    pub state: QueueState,
    /// Processors not yet started
    pub pending: usize,
    /// When the entry was created
    pub arrived_at: DateTime<Utc>,
}

/// Read-only view of the queue map
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    /// Entries sorted by path
    pub entries: Vec<QueueEntryStatus>,
}

impl QueueSnapshot {
    /// Number of tracked paths
    #[must_use]
    pub fn total_queues(&self) -> usize {
        self.entries.len()
    }

    /// Paths currently draining
    #[must_use]
    pub fn processing(&self) -> Vec<&Path> {
        self.entries
            .iter()
            .filter(|e| e.state == QueueState::Processing)
            .map(|e| e.path.as_path())
            .collect()
    }

    /// Pending processor count per path
    #[must_use]
    pub fn pending(&self) -> BTreeMap<&Path, usize> {
        self.entries.iter().map(|e| (e.path.as_path(), e.pending)).collect()
    }

    /// Whether no tracked entry has pending or running processors
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.entries.iter().all(|e| e.state == QueueState::Idle)
    }
}

struct QueueInner {
    entries: Mutex<HashMap<PathBuf, FileQueueEntry>>,
    options: QueueOptions,
    busy: watch::Sender<usize>,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, FileQueueEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of every per-file queue
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<QueueInner>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(QueueOptions::default())
    }
}

impl QueueManager {
    /// Empty manager
    #[must_use]
    pub fn new(options: QueueOptions) -> Self {
        let (busy, _) = watch::channel(0);
        Self {
            inner: Arc::new(QueueInner {
                entries: Mutex::new(HashMap::new()),
                options,
                busy,
            }),
        }
    }

    /// Append processors to `path`'s queue
    ///
    /// Returns false without queueing anything when the file does not exist
    /// or `processors` is empty.
    pub async fn enqueue_file(&self, path: &Path, processors: Vec<Processor>) -> bool {
        if processors.is_empty() {
            return false;
        }
        if tokio::fs::metadata(path).await.is_err() {
            debug!(path = %path.display(), "not enqueueing missing file");
            return false;
        }

        let mut entries = self.inner.lock();
        let entry = entries.entry(path.to_path_buf()).or_insert_with(|| FileQueueEntry {
            pending: VecDeque::new(),
            is_processing: false,
            arrived_at: Utc::now(),
            drain: None,
        });
        trace!(path = %path.display(), added = processors.len(), "enqueued");
        entry.pending.extend(processors);

        if self.inner.options.auto_start && !entry.is_processing {
            self.start_drain(path, entry);
        }
        true
    }

    /// Start draining every queued entry that is not already draining
    ///
    /// Returns how many drains were started.
    pub fn process_all(&self) -> usize {
        let mut entries = self.inner.lock();
        let mut started = 0;
        for (path, entry) in entries.iter_mut() {
            if !entry.is_processing && !entry.pending.is_empty() {
                self.start_drain(path, entry);
                started += 1;
            }
        }
        started
    }

    // Caller holds the map lock.
    fn start_drain(&self, path: &Path, entry: &mut FileQueueEntry) {
        entry.is_processing = true;
        self.inner.busy.send_modify(|n| *n += 1);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(drain(inner, path.to_path_buf()));
        entry.drain = Some(handle.abort_handle());
    }

    /// Remove entries with nothing pending that are not draining
    ///
    /// Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut entries = self.inner.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_processing || !e.pending.is_empty());
        before - entries.len()
    }

    /// State of one path's queue
    #[must_use]
    pub fn state(&self, path: &Path) -> QueueState {
        self.inner.lock().get(path).map_or(QueueState::Idle, FileQueueEntry::state)
    }

    /// Snapshot of every tracked path
    #[must_use]
    pub fn get_status(&self) -> QueueSnapshot {
        let entries = self.inner.lock();
        let mut rows: Vec<QueueEntryStatus> = entries
            .iter()
            .map(|(path, e)| QueueEntryStatus {
                path: path.clone(),
                state: e.state(),
                pending: e.pending.len(),
                arrived_at: e.arrived_at,
            })
            .collect();
        rows.sort_by(|a, b| a.path.cmp(&b.path));
        QueueSnapshot { entries: rows }
    }

    /// Number of paths currently draining
    #[must_use]
    pub fn busy(&self) -> usize {
        *self.inner.busy.borrow()
    }

    /// Wait until no path is draining
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.busy.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Cancel every drain and forget all pending work
    ///
    /// Dropping a drain task drops any linter process it was waiting on.
    pub fn abort_all(&self) -> usize {
        let mut entries = self.inner.lock();
        let mut aborted = 0;
        for (path, entry) in entries.drain() {
            if let Some(handle) = entry.drain {
                if entry.is_processing {
                    warn!(path = %path.display(), pending = entry.pending.len(), "aborting queue");
                    aborted += 1;
                }
                handle.abort();
            }
        }
        self.inner.busy.send_replace(0);
        aborted
    }
}

async fn drain(inner: Arc<QueueInner>, path: PathBuf) {
    loop {
        let next = {
            let mut entries = inner.lock();
            let Some(entry) = entries.get_mut(&path) else {
                // Aborted and removed underneath us.
                return;
            };
            match entry.pending.pop_front() {
                Some(processor) => processor,
                None => {
                    entry.is_processing = false;
                    entry.drain = None;
                    if inner.options.auto_cleanup {
                        entries.remove(&path);
                    }
                    inner.busy.send_modify(|n| *n = n.saturating_sub(1));
                    trace!(path = %path.display(), "drained");
                    return;
                }
            }
        };

        let Processor { label, task } = next;
        let outcome = AssertUnwindSafe(async move { task().await }).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(path = %path.display(), processor = %label, error = %format!("{e:#}"), "processor failed"),
            Err(_) => error!(path = %path.display(), processor = %label, "processor panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "x").unwrap();
        path
    }

    fn record(log: &Arc<Mutex<Vec<String>>>, label: &str) -> Processor {
        let log = Arc::clone(log);
        let label = label.to_string();
        Processor::new(label.clone(), move || async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            log.lock().unwrap().push(label);
            Ok(())
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_overlap_per_file() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.ts");
        let queue = QueueManager::default();
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut enqueues = Vec::new();
        for i in 0..10 {
            let queue = queue.clone();
            let path = path.clone();
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            enqueues.push(tokio::spawn(async move {
                let p = Processor::new(format!("p{i}"), move || async move {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(3)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                });
                queue.enqueue_file(&path, vec![p]).await
            }));
        }
        for e in enqueues {
            assert!(e.await.unwrap());
        }
        queue.wait_idle().await;

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(queue.get_status().total_queues(), 0);
    }

    #[tokio::test]
    async fn test_fifo_and_append_mid_drain() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.py");
        let queue = QueueManager::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        queue
            .enqueue_file(&path, vec![record(&log, "ruff"), record(&log, "mypy")])
            .await;
        assert_eq!(queue.state(&path), QueueState::Processing);
        queue.enqueue_file(&path, vec![record(&log, "again")]).await;
        queue.wait_idle().await;

        assert_eq!(*log.lock().unwrap(), ["ruff", "mypy", "again"]);
        assert_eq!(queue.state(&path), QueueState::Idle);
    }

    #[tokio::test]
    async fn test_failure_and_panic_isolated() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.md");
        let queue = QueueManager::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        let failing = Processor::new("fails", || async { Err::<(), _>(anyhow::anyhow!("linter exploded")) });
        let panicking = Processor::new("panics", || async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        queue
            .enqueue_file(&path, vec![failing, panicking, record(&log, "survivor")])
            .await;
        queue.wait_idle().await;

        assert_eq!(*log.lock().unwrap(), ["survivor"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_noop() {
        let dir = TempDir::new().unwrap();
        let queue = QueueManager::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        let queued = queue
            .enqueue_file(&dir.path().join("gone.ts"), vec![record(&log, "x")])
            .await;
        assert!(!queued);
        assert_eq!(queue.get_status().total_queues(), 0);
    }

    #[tokio::test]
    async fn test_manual_start_and_cleanup() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a.sh");
        let b = touch(&dir, "b.sh");
        let queue = QueueManager::new(QueueOptions {
            auto_start: false,
            auto_cleanup: false,
        });
        let log = Arc::new(Mutex::new(Vec::new()));

        queue.enqueue_file(&a, vec![record(&log, "a")]).await;
        queue.enqueue_file(&b, vec![record(&log, "b1"), record(&log, "b2")]).await;

        let status = queue.get_status();
        assert_eq!(status.total_queues(), 2);
        assert_eq!(status.pending()[b.as_path()], 2);
        assert_eq!(queue.state(&a), QueueState::Queued);
        assert!(!status.is_idle());

        assert_eq!(queue.process_all(), 2);
        queue.wait_idle().await;
        assert_eq!(log.lock().unwrap().len(), 3);

        // Drained entries linger until swept.
        assert_eq!(queue.get_status().total_queues(), 2);
        assert!(queue.get_status().is_idle());
        assert_eq!(queue.cleanup(), 2);
        assert_eq!(queue.get_status().total_queues(), 0);
    }

    #[tokio::test]
    async fn test_abort_all() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "slow.py");
        let queue = QueueManager::default();
        let finished = Arc::new(AtomicUsize::new(0));

        let done = Arc::clone(&finished);
        let slow = Processor::new("slow", move || async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        queue.enqueue_file(&path, vec![slow]).await;
        tokio::task::yield_now().await;

        assert_eq!(queue.abort_all(), 1);
        queue.wait_idle().await;
        assert_eq!(queue.busy(), 0);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
