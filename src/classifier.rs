// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! File classification - which linters apply to a path
//!
//! Patterns are matched against the path relative to the root with `/`
//! separators. Global patterns gate every linter; a linter's own exclude
//! patterns win over its include patterns.

use crate::config::{Config, LinterConfig};
use crate::error::ConfigError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

struct CompiledLinter {
    config: Arc<LinterConfig>,
    include: GlobSet,
    exclude: GlobSet,
}

/// Maps paths to the linters that apply to them
pub struct FileClassifier {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    linters: Vec<CompiledLinter>,
}

fn build_set(patterns: &[String], owner: &str) -> Result<GlobSet, ConfigError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            ConfigError::Invalid(vec![format!("{owner}: invalid pattern '{pattern}': {e}")])
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ConfigError::Invalid(vec![format!("{owner}: {e}")]))
}

impl FileClassifier {
    /// Compile the global and per-linter patterns of `config`
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let include = build_set(&config.include_patterns, "includePatterns")?;
        let exclude = build_set(&config.exclude_patterns, "excludePatterns")?;

        let mut linters = Vec::new();
        for linter in config.enabled_linters() {
            linters.push(CompiledLinter {
                include: build_set(&linter.include_patterns, &linter.name)?,
                exclude: build_set(&linter.exclude_patterns, &linter.name)?,
                config: Arc::new(linter.clone()),
            });
        }

        Ok(Self {
            root: config.root_path.clone(),
            include,
            exclude,
            linters,
        })
    }

    /// Root the patterns are relative to
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path relative to the root with `/` separators
    #[must_use]
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .filter_map(|c| match c {
                std::path::Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Whether the global include/exclude patterns admit the path
    #[must_use]
    pub fn is_candidate(&self, path: &Path) -> bool {
        let rel = self.relative(path);
        !self.exclude.is_match(&rel) && self.include.is_match(&rel)
    }

    /// Linters that apply to `path`, sorted by ascending priority
    ///
    /// The file's size is read from disk; a file that cannot be stat'ed is
    /// classified by its path alone.
    #[must_use]
    pub fn classify(&self, path: &Path) -> Vec<Arc<LinterConfig>> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let size = std::fs::metadata(&absolute).ok().map(|m| m.len());
        self.classify_with_size(path, size)
    }

    /// Same as [`classify`](Self::classify) with a known size
    #[must_use]
    pub fn classify_with_size(&self, path: &Path, size: Option<u64>) -> Vec<Arc<LinterConfig>> {
        let rel = self.relative(path);
        if self.exclude.is_match(&rel) || !self.include.is_match(&rel) {
            trace!(path = %rel, "outside global patterns");
            return Vec::new();
        }

        let mut matched: Vec<Arc<LinterConfig>> = self
            .linters
            .iter()
            .filter(|l| !l.exclude.is_match(&rel) && l.include.is_match(&rel))
            .filter(|l| {
                let limit = l.config.max_file_size;
                let oversize = limit > 0 && size.is_some_and(|s| s > limit);
                if oversize {
                    debug!(path = %rel, linter = %l.config.name, "skipping oversized file");
                }
                !oversize
            })
            .map(|l| Arc::clone(&l.config))
            .collect();

        matched.sort_by_key(|l| l.priority);
        matched
    }

    /// Every file under the root (respecting `.gitignore`) that classifies
    /// to at least one linter, in path order
    #[must_use]
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkBuilder::new(&self.root)
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
            .map(ignore::DirEntry::into_path)
            .filter(|path| !self.classify(path).is_empty())
            .collect();
        files.sort();
        files
    }
}
