// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Result cache keyed by file path and fingerprint
//!
//! The cache does no locking of its own: every read and write for a path
//! happens inside that path's serialized processor chain.

use crate::types::LintResult;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, warn};

/// Version of the persisted document; other versions are discarded
pub const CACHE_VERSION: u32 = 1;

/// Identity of a file's contents at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    /// Modification time in milliseconds since the Unix epoch
    pub modified_ms: u64,
    /// Size in bytes
    pub size: u64,
    /// Hex SHA-256 of the contents, when content hashing is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl Fingerprint {
    /// Fingerprint from known metadata
    #[must_use]
    pub fn new(modified_ms: u64, size: u64) -> Self {
        Self {
            modified_ms,
            size,
            content_hash: None,
        }
    }

    /// Fingerprint of the file as it is on disk now
    pub async fn compute(path: &Path, hash_contents: bool) -> std::io::Result<Self> {
        let meta = tokio::fs::metadata(path).await?;
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));

        let content_hash = if hash_contents {
            let bytes = tokio::fs::read(path).await?;
            Some(hex::encode(Sha256::digest(&bytes)))
        } else {
            None
        };

        Ok(Self {
            modified_ms,
            size: meta.len(),
            content_hash,
        })
    }
}

/// Latest results for one file under one fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Fingerprint the results were produced for
    pub fingerprint: Fingerprint,
    /// Most recent result per linter name
    pub results: BTreeMap<String, LintResult>,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            results: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedCache {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: BTreeMap<PathBuf, CacheEntry>,
}

/// In-memory map of path to [`CacheEntry`]
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<PathBuf, CacheEntry>,
}

impl ResultCache {
    /// Empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for a path
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<&CacheEntry> {
        self.entries.get(path)
    }

    /// Store a linter's result; a different fingerprint replaces the entry
    pub fn put(&mut self, path: &Path, fingerprint: Fingerprint, linter: &str, result: LintResult) {
        let entry = self
            .entries
            .entry(path.to_path_buf())
            .or_insert_with(|| CacheEntry::new(fingerprint.clone()));

        if entry.fingerprint != fingerprint {
            debug!(path = %path.display(), "fingerprint changed, replacing cache entry");
            *entry = CacheEntry::new(fingerprint);
        }

        entry.results.insert(linter.to_string(), result);
        entry.updated_at = Utc::now();
    }

    /// True when there is no entry or it was built for another fingerprint
    #[must_use]
    pub fn is_stale(&self, path: &Path, current: &Fingerprint) -> bool {
        self.entries
            .get(path)
            .map_or(true, |entry| &entry.fingerprint != current)
    }

    /// A reusable result for `linter`: same fingerprint and a successful run
    #[must_use]
    pub fn fresh_result(&self, path: &Path, current: &Fingerprint, linter: &str) -> Option<&LintResult> {
        if self.is_stale(path, current) {
            return None;
        }
        self.entries
            .get(path)
            .and_then(|entry| entry.results.get(linter))
            .filter(|result| result.success)
    }

    /// Drop a path's entry
    pub fn evict(&mut self, path: &Path) -> Option<CacheEntry> {
        self.entries.remove(path)
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached files
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no file is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, unordered
    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &CacheEntry)> {
        self.entries.iter()
    }

    /// Every cached result across all files
    pub fn results(&self) -> impl Iterator<Item = &LintResult> {
        self.entries.values().flat_map(|e| e.results.values())
    }

    /// Load a persisted cache, discarding entries older than `max_age`
    ///
    /// Never fails: a missing, unreadable, corrupt or foreign-version file
    /// yields an empty cache.
    #[must_use]
    pub fn load(path: &Path, max_age: Duration) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no persisted cache");
                return Self::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read cache, starting fresh");
                return Self::new();
            }
        };

        let persisted: PersistedCache = match serde_json::from_str(&content) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache file, starting fresh");
                return Self::new();
            }
        };

        if persisted.version != CACHE_VERSION {
            warn!(
                found = persisted.version,
                expected = CACHE_VERSION,
                "cache version mismatch, starting fresh"
            );
            return Self::new();
        }

        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let total = persisted.entries.len();
        let entries: HashMap<PathBuf, CacheEntry> = persisted
            .entries
            .into_iter()
            .filter(|(_, entry)| cutoff.map_or(true, |c| entry.updated_at >= c))
            .collect();

        debug!(
            path = %path.display(),
            kept = entries.len(),
            expired = total - entries.len(),
            "loaded persisted cache"
        );
        Self { entries }
    }

    /// Write the cache as a versioned JSON document (via a temp file + rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }

        let persisted = PersistedCache {
            version: CACHE_VERSION,
            saved_at: Utc::now(),
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        let json = serde_json::to_string_pretty(&persisted).context("Failed to serialize cache")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move cache into place at {}", path.display()))?;

        debug!(path = %path.display(), entries = self.entries.len(), "saved cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LintIssue, Severity};
    use tempfile::TempDir;

    fn result(file: &str, linter: &str, warnings: usize) -> LintResult {
        let issues = (0..warnings)
            .map(|i| {
                let line = u32::try_from(i).unwrap() + 1;
                LintIssue::new(Path::new(file), linter, Severity::Warning, line, 1, "w")
            })
            .collect();
        LintResult::new(Path::new(file), linter, issues, Duration::from_millis(3))
    }

    #[test]
    fn test_staleness() {
        let mut cache = ResultCache::new();
        let path = Path::new("/p/a.md");
        let fp = Fingerprint::new(100, 10);

        assert!(cache.is_stale(path, &fp));
        cache.put(path, fp.clone(), "md", result("/p/a.md", "md", 1));
        assert!(!cache.is_stale(path, &fp));
        assert!(cache.is_stale(path, &Fingerprint::new(101, 10)));
        assert!(cache.fresh_result(path, &fp, "md").is_some());
        assert!(cache.fresh_result(path, &fp, "other").is_none());
    }

    #[test]
    fn test_fingerprint_change_replaces_entry() {
        let mut cache = ResultCache::new();
        let path = Path::new("/p/a.py");
        cache.put(path, Fingerprint::new(1, 1), "ruff", result("/p/a.py", "ruff", 2));
        cache.put(path, Fingerprint::new(1, 1), "mypy", result("/p/a.py", "mypy", 1));
        assert_eq!(cache.get(path).unwrap().results.len(), 2);

        cache.put(path, Fingerprint::new(2, 1), "ruff", result("/p/a.py", "ruff", 0));
        let entry = cache.get(path).unwrap();
        assert_eq!(entry.results.len(), 1);
        assert!(entry.results["ruff"].issues.is_empty());
    }

    #[test]
    fn test_failed_results_are_not_reused() {
        let mut cache = ResultCache::new();
        let path = Path::new("/p/a.sh");
        let fp = Fingerprint::new(5, 5);
        cache.put(
            path,
            fp.clone(),
            "shellcheck",
            LintResult::failure(path, "shellcheck", "timed out", Duration::ZERO),
        );
        assert!(!cache.is_stale(path, &fp));
        assert!(cache.fresh_result(path, &fp, "shellcheck").is_none());
    }

    #[test]
    fn test_evict() {
        let mut cache = ResultCache::new();
        let path = Path::new("/p/a.md");
        cache.put(path, Fingerprint::new(1, 1), "md", result("/p/a.md", "md", 0));
        assert!(cache.evict(path).is_some());
        assert!(cache.is_empty());
        assert!(cache.evict(path).is_none());
    }

    #[test]
    fn test_persist_round_trip_and_expiry() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("cache/cache.json");

        let mut cache = ResultCache::new();
        cache.put(Path::new("/p/a.md"), Fingerprint::new(1, 2), "md", result("/p/a.md", "md", 2));
        cache.save(&file).unwrap();

        let loaded = ResultCache::load(&file, Duration::from_secs(3600));
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(Path::new("/p/a.md")), cache.get(Path::new("/p/a.md")));

        std::thread::sleep(Duration::from_millis(20));
        let expired = ResultCache::load(&file, Duration::from_millis(1));
        assert!(expired.is_empty());
    }

    #[test]
    fn test_corrupt_or_foreign_cache_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("cache.json");

        fs::write(&file, "not json").unwrap();
        assert!(ResultCache::load(&file, Duration::from_secs(60)).is_empty());

        fs::write(&file, r#"{"version": 99, "savedAt": "2025-01-01T00:00:00Z", "entries": {}}"#).unwrap();
        assert!(ResultCache::load(&file, Duration::from_secs(60)).is_empty());

        assert!(ResultCache::load(&dir.path().join("missing.json"), Duration::from_secs(60)).is_empty());
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_content() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        fs::write(&file, "one").unwrap();
        let a = Fingerprint::compute(&file, true).await.unwrap();

        fs::write(&file, "three").unwrap();
        let b = Fingerprint::compute(&file, true).await.unwrap();

        assert_eq!(a.size, 3);
        assert_ne!(a, b);
        assert!(a.content_hash.is_some());
        assert!(Fingerprint::compute(&file, false).await.unwrap().content_hash.is_none());
    }
}
