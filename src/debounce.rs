// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Per-path debouncing of filesystem events
//!
//! Every [`Debouncer::notify`] call restarts the path's timer. When a timer
//! survives the full delay the latest event kind for that path is sent once.

use crate::types::{FileEvent, FileEventKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

struct PendingTimer {
    generation: u64,
    kind: FileEventKind,
    handle: JoinHandle<()>,
}

struct DebounceInner {
    delay: Duration,
    out: mpsc::UnboundedSender<FileEvent>,
    timers: Mutex<HashMap<PathBuf, PendingTimer>>,
    generation: AtomicU64,
    stopped: AtomicBool,
}

impl DebounceInner {
    fn timers(&self) -> MutexGuard<'_, HashMap<PathBuf, PendingTimer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Coalesces bursts of events per path
#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<DebounceInner>,
}

impl Debouncer {
    /// Emit coalesced events on `out` after `delay` of quiet per path
    #[must_use]
    pub fn new(delay: Duration, out: mpsc::UnboundedSender<FileEvent>) -> Self {
        Self {
            inner: Arc::new(DebounceInner {
                delay,
                out,
                timers: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Quiet period
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.inner.delay
    }

    /// Record an event for `path`, restarting its timer
    ///
    /// Returns false once the debouncer has been stopped.
    pub fn notify(&self, path: impl Into<PathBuf>, kind: FileEventKind) -> bool {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return false;
        }
        let path = path.into();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst);

        // Held across the spawn so a zero-delay timer cannot fire unregistered.
        let mut timers = self.inner.timers();
        let inner = Arc::clone(&self.inner);
        let key = path.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(inner.delay).await;
            let fired = {
                let mut timers = inner.timers();
                let current = timers.get(&key).is_some_and(|t| t.generation == generation);
                if current {
                    timers.remove(&key)
                } else {
                    None
                }
            };
            if let Some(timer) = fired {
                trace!(path = %key.display(), kind = ?timer.kind, "debounce fired");
                let _ = inner.out.send(FileEvent::new(key, timer.kind));
            }
        });

        let previous = timers.insert(
            path,
            PendingTimer {
                generation,
                kind,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        true
    }

    /// Paths with an armed timer
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.timers().len()
    }

    /// Drop the armed timer for `path`, if any
    pub fn cancel(&self, path: &Path) -> bool {
        match self.inner.timers().remove(path) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every armed timer; returns how many were dropped
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingTimer> = self.inner.timers().drain().map(|(_, t)| t).collect();
        for timer in &drained {
            timer.handle.abort();
        }
        drained.len()
    }

    /// Refuse new events and drop armed timers
    pub fn stop(&self) -> usize {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.cancel_all()
    }

    /// Whether [`stop`](Self::stop) was called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}
