// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Global concurrency cap for linter processes
//!
//! Every linter run holds a [`Permit`] for its whole duration. Linters marked
//! non-parallel additionally hold a per-linter lock, taken before the global
//! slot so a queued exclusive run does not sit on one.

use crate::config::LinterConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{AcquireError, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Admission control for linter runs
#[derive(Clone)]
pub struct Scheduler {
    slots: Arc<Semaphore>,
    max: usize,
    exclusive: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
    counters: Arc<Counters>,
}

/// Held while a linter runs; dropping it frees the slot
pub struct Permit {
    _slot: OwnedSemaphorePermit,
    _exclusive: Option<OwnedMutexGuard<()>>,
    counters: Arc<Counters>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Scheduler {
    /// Allow at most `max` concurrent runs (at least one)
    #[must_use]
    pub fn new(max: usize) -> Self {
        let max = max.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max)),
            max,
            exclusive: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    fn exclusive_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.exclusive.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Wait for a slot to run `linter`
    ///
    /// Fails only once the scheduler has been [closed](Self::close).
    pub async fn admit(&self, linter: &LinterConfig) -> Result<Permit, AcquireError> {
        let exclusive = if linter.parallel {
            None
        } else {
            Some(self.exclusive_lock(&linter.name).lock_owned().await)
        };

        let slot = Arc::clone(&self.slots).acquire_owned().await?;
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(now, Ordering::SeqCst);
        trace!(linter = %linter.name, in_flight = now, "admitted");

        Ok(Permit {
            _slot: slot,
            _exclusive: exclusive,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Runs currently holding a permit
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous permits seen
    #[must_use]
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    /// Configured cap
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max
    }

    /// Reject all waiting and future admissions
    pub fn close(&self) {
        self.slots.close();
    }

    /// Whether [`close`](Self::close) was called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }
}
