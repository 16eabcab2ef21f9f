// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Incremental linting service
//!
//! [`LintService`] wires the pipeline together:
//!
//! ```text
//! notify ─► Debouncer ─► handle_event ─► classify ─► QueueManager
//!                                                       │ (one chain per file)
//!                                                       ▼
//!                            cache check ─► Scheduler permit ─► LintRunner
//!                                                       │
//!                                                       ▼
//!                                             ResultCache + subscribers
//! ```
//!
//! Cache lookups and writes happen inside the processor, so they are
//! serialized by the file's queue like everything else that touches it.

use crate::cache::{Fingerprint, ResultCache};
use crate::classifier::FileClassifier;
use crate::config::{Config, LinterConfig};
use crate::debounce::Debouncer;
use crate::error::ConfigError;
use crate::invoker::{LintRunner, LinterInvoker};
use crate::queue::{Processor, QueueManager, QueueOptions, QueueSnapshot};
use crate::scheduler::Scheduler;
use crate::types::{FileEvent, FileEventKind, LintResult, Summary};
use crate::watcher::{self, FsWatcher};
use anyhow::{Context, Result};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const EVENT_CAPACITY: usize = 256;

/// Pushed to subscribers as work completes
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// A linter finished (or was served from the cache) for a file
    FileLinted {
        /// Linted file
        path: PathBuf,
        /// Its result
        result: LintResult,
        /// Whether the result came from the cache
        cached: bool,
    },
    /// A deleted file's results were dropped
    Evicted {
        /// Deleted file
        path: PathBuf,
    },
}

/// Point-in-time view of the service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Counts over every cached result
    #[serde(flatten)]
    pub summary: Summary,
    /// Queue map snapshot
    pub queue: QueueSnapshot,
    /// Linter processes started this session
    pub runs: u64,
    /// Runs skipped because the cached result was fresh
    pub cache_hits: u64,
    /// Linter processes running right now
    pub in_flight: usize,
    /// Whether the event dispatcher is running
    pub running: bool,
    /// Latest results per file
    pub files: BTreeMap<PathBuf, Vec<LintResult>>,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.summary, f)
    }
}

struct ServiceInner {
    config: Config,
    classifier: FileClassifier,
    cache: Mutex<ResultCache>,
    queue: QueueManager,
    scheduler: Scheduler,
    runner: Arc<dyn LintRunner>,
    runs: AtomicU64,
    cache_hits: AtomicU64,
    events: broadcast::Sender<ServiceEvent>,
    debouncer: Debouncer,
    debounced: Mutex<Option<mpsc::UnboundedReceiver<FileEvent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: Notify,
    running: AtomicBool,
}

/// The incremental linting façade
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct LintService {
    inner: Arc<ServiceInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl LintService {
    /// Build a service that lints through `runner`
    ///
    /// The config is validated first; a persisted cache is loaded when
    /// `persistCache` is set.
    pub fn new(config: Config, runner: Arc<dyn LintRunner>) -> Result<Self, ConfigError> {
        config.validate()?;
        let classifier = FileClassifier::new(&config)?;

        let cache = if config.persist_cache {
            ResultCache::load(&config.cache_file(), config.max_cache_age())
        } else {
            ResultCache::new()
        };

        let (debounced_tx, debounced_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            root = %config.root_path.display(),
            linters = config.enabled_linters().count(),
            max_concurrency = config.concurrency(),
            "lint service ready"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                classifier,
                cache: Mutex::new(cache),
                queue: QueueManager::new(QueueOptions {
                    auto_start: true,
                    auto_cleanup: config.auto_cleanup,
                }),
                scheduler: Scheduler::new(config.concurrency()),
                runner,
                runs: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
                events,
                debouncer: Debouncer::new(config.debounce(), debounced_tx),
                debounced: Mutex::new(Some(debounced_rx)),
                dispatcher: Mutex::new(None),
                shutdown: Notify::new(),
                running: AtomicBool::new(false),
                config,
            }),
        })
    }

    /// Build a service that spawns the configured linter commands
    pub fn with_invoker(config: Config) -> Result<Self, ConfigError> {
        let runner = Arc::new(LinterInvoker::new(config.root_path.clone(), config.auto_fix));
        Self::new(config, runner)
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// File classifier built from the configuration
    #[must_use]
    pub fn classifier(&self) -> &FileClassifier {
        &self.inner.classifier
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.inner.config.root_path.join(path)
        }
    }

    // =========================================================================
    // Event path
    // =========================================================================

    /// Start dispatching debounced events
    ///
    /// Returns false if already started or stopped.
    pub fn start(&self) -> bool {
        let Some(rx) = lock(&self.inner.debounced).take() else {
            return false;
        };
        self.inner.running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(self.clone().dispatch(rx));
        *lock(&self.inner.dispatcher) = Some(handle);
        debug!("dispatcher started");
        true
    }

    /// Handle debounced events until shutdown, then queue whatever the
    /// debouncer had already emitted
    async fn dispatch(self, mut rx: mpsc::UnboundedReceiver<FileEvent>) {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        self.handle_event(event).await;
                    }
                    None => break,
                },
                () = self.inner.shutdown.notified() => {
                    rx.close();
                    let mut drained = 0usize;
                    while let Ok(event) = rx.try_recv() {
                        self.handle_event(event).await;
                        drained += 1;
                    }
                    trace!(drained, "dispatcher drained on shutdown");
                    break;
                }
            }
        }
        trace!("dispatcher finished");
    }

    /// Feed a raw filesystem event through the debouncer
    ///
    /// Events the configuration does not lint on, paths outside the global
    /// patterns and directories are dropped. Returns whether it was accepted.
    pub fn notify(&self, path: &Path, kind: FileEventKind) -> bool {
        let config = &self.inner.config;
        let wanted = match kind {
            FileEventKind::Saved => config.lint_on_save,
            FileEventKind::Created | FileEventKind::Modified => config.lint_on_change,
            FileEventKind::Removed => true,
        };
        if !wanted {
            trace!(path = %path.display(), ?kind, "event kind disabled");
            return false;
        }

        let path = self.absolute(path);
        if !self.inner.classifier.is_candidate(&path) || path.is_dir() {
            return false;
        }
        self.inner.debouncer.notify(path, kind)
    }

    /// Act on one debounced event
    ///
    /// Deletions evict the file's cached results; anything else schedules
    /// the file. Returns how many linter processors were queued.
    pub async fn handle_event(&self, event: FileEvent) -> usize {
        let path = self.absolute(&event.path);
        if event.kind == FileEventKind::Removed {
            self.evict(&path);
            return 0;
        }
        self.schedule(&path, false, None).await
    }

    fn evict(&self, path: &Path) {
        if lock(&self.inner.cache).evict(path).is_some() {
            debug!(path = %path.display(), "evicted deleted file");
        }
        let _ = self.inner.events.send(ServiceEvent::Evicted {
            path: path.to_path_buf(),
        });
    }

    async fn schedule(
        &self,
        path: &Path,
        force: bool,
        sink: Option<mpsc::UnboundedSender<LintResult>>,
    ) -> usize {
        let linters = self.inner.classifier.classify(path);
        if linters.is_empty() {
            trace!(path = %path.display(), "no linter applies");
            return 0;
        }

        let relative = self.inner.classifier.relative(path);
        let processors: Vec<Processor> = linters
            .into_iter()
            .map(|linter| {
                let service = self.clone();
                let path = path.to_path_buf();
                let sink = sink.clone();
                Processor::new(format!("{}:{relative}", linter.name), move || async move {
                    service.process(path, linter, force, sink).await
                })
            })
            .collect();

        let count = processors.len();
        if self.inner.queue.enqueue_file(path, processors).await {
            count
        } else {
            0
        }
    }

    /// One (file, linter) unit of work, run inside the file's queue chain
    async fn process(
        &self,
        path: PathBuf,
        linter: Arc<LinterConfig>,
        force: bool,
        sink: Option<mpsc::UnboundedSender<LintResult>>,
    ) -> Result<()> {
        let config = &self.inner.config;
        let fingerprint = match Fingerprint::compute(&path, config.hash_contents).await {
            Ok(fp) => fp,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "file vanished before linting");
                return Ok(());
            }
        };

        if config.incremental && !force {
            let cached = lock(&self.inner.cache)
                .fresh_result(&path, &fingerprint, &linter.name)
                .cloned();
            if let Some(result) = cached {
                self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
                trace!(path = %path.display(), linter = %linter.name, "cache hit");
                self.publish(&path, result, true, sink.as_ref());
                return Ok(());
            }
        }

        let started = Instant::now();
        let Ok(permit) = self.inner.scheduler.admit(&linter).await else {
            warn!(path = %path.display(), linter = %linter.name, "scheduler closed before run");
            let result = LintResult::failure(
                &path,
                &linter.name,
                "linting was shut down before this linter ran",
                started.elapsed(),
            );
            self.publish(&path, result, false, sink.as_ref());
            return Ok(());
        };
        self.inner.runs.fetch_add(1, Ordering::Relaxed);
        let outcome = AssertUnwindSafe(self.inner.runner.run(&path, &linter))
            .catch_unwind()
            .await;
        drop(permit);
        let result = outcome.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            error!(path = %path.display(), linter = %linter.name, %message, "linter runner panicked");
            LintResult::failure(&path, &linter.name, format!("linter crashed: {message}"), started.elapsed())
        });

        debug!(
            path = %path.display(),
            linter = %linter.name,
            issues = result.issues.len(),
            success = result.success,
            duration_ms = result.duration_ms,
            "linted"
        );

        if tokio::fs::metadata(&path).await.is_ok() {
            lock(&self.inner.cache).put(&path, fingerprint, &linter.name, result.clone());
        } else {
            debug!(path = %path.display(), "file deleted during run, not caching");
        }
        self.publish(&path, result, false, sink.as_ref());
        Ok(())
    }

    fn publish(
        &self,
        path: &Path,
        result: LintResult,
        cached: bool,
        sink: Option<&mpsc::UnboundedSender<LintResult>>,
    ) {
        if let Some(sink) = sink {
            let _ = sink.send(result.clone());
        }
        let _ = self.inner.events.send(ServiceEvent::FileLinted {
            path: path.to_path_buf(),
            result,
            cached,
        });
    }

    // =========================================================================
    // Direct entry points
    // =========================================================================

    /// Lint one file and wait for every applicable linter
    pub async fn lint_file(&self, path: &Path) -> Vec<LintResult> {
        let path = path.to_path_buf();
        self.lint_files_with(std::slice::from_ref(&path), false).await
    }

    /// Lint several files and wait for all of them
    pub async fn lint_files(&self, paths: &[PathBuf]) -> Vec<LintResult> {
        self.lint_files_with(paths, false).await
    }

    /// Lint several files; `force` ignores fresh cache entries
    ///
    /// Results are sorted by file, then linter. Files that do not exist or
    /// match no linter contribute nothing.
    pub async fn lint_files_with(&self, paths: &[PathBuf], force: bool) -> Vec<LintResult> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for path in paths {
            let path = self.absolute(path);
            self.schedule(&path, force, Some(tx.clone())).await;
        }
        drop(tx);

        // Closes once every queued processor has run and dropped its sender.
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results.sort_by(|a, b| a.file.cmp(&b.file).then_with(|| a.linter.cmp(&b.linter)));
        results
    }

    /// Lint every file under the root the classifier accepts
    pub async fn lint_project(&self, force: bool) -> Result<Vec<LintResult>> {
        let service = self.clone();
        let files = tokio::task::spawn_blocking(move || service.inner.classifier.discover())
            .await
            .context("project discovery panicked")?;
        info!(files = files.len(), "discovered files");
        Ok(self.lint_files_with(&files, force).await)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Aggregate counts, queue state and per-file results
    #[must_use]
    pub fn get_status(&self) -> ServiceStatus {
        let (summary, files) = {
            let cache = lock(&self.inner.cache);
            let summary = Summary::from_results(cache.results());
            let files = cache
                .iter()
                .map(|(path, entry)| (path.clone(), entry.results.values().cloned().collect()))
                .collect();
            (summary, files)
        };

        ServiceStatus {
            summary,
            queue: self.inner.queue.get_status(),
            runs: self.inner.runs.load(Ordering::Relaxed),
            cache_hits: self.inner.cache_hits.load(Ordering::Relaxed),
            in_flight: self.inner.scheduler.in_flight(),
            running: self.inner.running.load(Ordering::SeqCst),
            files,
        }
    }

    /// Receive [`ServiceEvent`]s from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until no file is being processed
    pub async fn wait_idle(&self) {
        self.inner.queue.wait_idle().await;
    }

    /// Highest number of linter processes that ran at once
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.inner.scheduler.peak()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Watch the root and feed its events through [`notify`](Self::notify)
    ///
    /// Starts the dispatcher if needed. Dropping the returned watcher stops
    /// the event stream.
    pub fn watch(&self) -> Result<FsWatcher> {
        self.start();
        let (fs_watcher, mut rx) = watcher::watch(&self.inner.config.root_path)?;
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                service.notify(&event.path, event.kind);
            }
        });
        info!(root = %fs_watcher.root().display(), "watching for changes");
        Ok(fs_watcher)
    }

    /// Write the cache to the configured cache file
    pub fn persist(&self) -> Result<()> {
        let path = self.inner.config.cache_file();
        lock(&self.inner.cache)
            .save(&path)
            .with_context(|| format!("Failed to persist cache to {}", path.display()))
    }

    /// Stop accepting events and let queued work finish
    ///
    /// Pending debounce timers are dropped; events the debouncer already
    /// emitted are still queued. Work still running after the shutdown
    /// timeout is killed. The cache is
    /// saved afterwards when `persistCache` is set.
    pub async fn stop(&self) -> Result<()> {
        let dropped = self.inner.debouncer.stop();
        self.inner.running.store(false, Ordering::SeqCst);
        lock(&self.inner.debounced).take();
        debug!(dropped_timers = dropped, "stopping");

        let dispatcher = lock(&self.inner.dispatcher).take();
        if let Some(handle) = dispatcher {
            self.inner.shutdown.notify_one();
            if let Err(e) = handle.await {
                warn!(error = %e, "dispatcher ended abnormally");
            }
        }

        let timeout = self.inner.config.shutdown_timeout();
        if tokio::time::timeout(timeout, self.inner.queue.wait_idle()).await.is_err() {
            warn!(timeout_ms = self.inner.config.shutdown_timeout, "shutdown timed out, killing remaining linters");
            self.inner.scheduler.close();
            self.inner.queue.abort_all();
        }

        if self.inner.config.persist_cache {
            self.persist()?;
        }
        info!("lint service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LintRunner for CountingRunner {
        async fn run(&self, path: &Path, linter: &LinterConfig) -> LintResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            LintResult::new(path, &linter.name, Vec::new(), Duration::ZERO)
        }
    }

    fn md_service(dir: &TempDir, runner: &Arc<CountingRunner>) -> LintService {
        let linter = LinterConfig::new("md", "markdownlint").with_include(["**/*.md"]);
        LintService::new(Config::new(dir.path(), vec![linter]), Arc::clone(runner) as Arc<dyn LintRunner>)
            .unwrap()
    }

    #[tokio::test]
    async fn test_dispatcher_queues_emitted_events_on_shutdown() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "# A\n").unwrap();
        std::fs::write(dir.path().join("b.md"), "# B\n").unwrap();
        let runner = Arc::new(CountingRunner::default());
        let service = md_service(&dir, &runner);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(FileEvent::new(dir.path().join("a.md"), FileEventKind::Saved)).unwrap();
        tx.send(FileEvent::new(dir.path().join("b.md"), FileEventKind::Modified)).unwrap();
        service.inner.shutdown.notify_one();

        service.clone().dispatch(rx).await;
        service.wait_idle().await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
        assert!(tx.send(FileEvent::new(dir.path().join("a.md"), FileEventKind::Saved)).is_err());
    }

    #[test]
    fn test_panic_message() {
        let text: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(text.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
