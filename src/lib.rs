// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! lintqueue library - incremental, debounced linting of a file tree
//!
//! Filesystem change events flow through a per-path [`debounce::Debouncer`],
//! are classified against the configured linters, checked against the
//! [`cache::ResultCache`], and queued per file in the [`queue::QueueManager`].
//! Linter subprocesses run under the global cap of the
//! [`scheduler::Scheduler`] and their results are aggregated by the
//! [`service::LintService`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod debounce;
pub mod error;
pub mod invoker;
pub mod output;
pub mod parsers;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod watcher;

/// Core data types shared by every stage of the pipeline
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use sha2::{Digest, Sha256};
    use std::collections::BTreeSet;
    use std::fmt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    /// Rule identifier attached to issues synthesized by lintqueue itself
    pub const INVOCATION_RULE: &str = "lintqueue/invocation";

    // =========================================================================
    // Severity
    // =========================================================================

    /// Diagnostic severity, ordered from most to least severe
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum Severity {
        /// Must be fixed; makes the CLI exit nonzero
        Error,
        /// Should be fixed
        Warning,
        /// Informational
        Info,
        /// Style hint
        Hint,
    }

    impl Severity {
        /// Lowercase name used in every output format
        #[must_use]
        pub fn as_str(&self) -> &'static str {
            match self {
                Self::Error => "error",
                Self::Warning => "warning",
                Self::Info => "info",
                Self::Hint => "hint",
            }
        }

        /// Map the many spellings linters use onto a severity
        #[must_use]
        pub fn parse_loose(s: &str) -> Option<Self> {
            match s.trim().to_ascii_lowercase().as_str() {
                "error" | "err" | "fatal" | "e" => Some(Self::Error),
                "warning" | "warn" | "w" => Some(Self::Warning),
                "info" | "information" | "note" | "i" => Some(Self::Info),
                "hint" | "style" | "h" => Some(Self::Hint),
                _ => None,
            }
        }
    }

    impl fmt::Display for Severity {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    // =========================================================================
    // Issues and results
    // =========================================================================

    /// A fix a linter proposed for an issue
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SuggestedFix {
        /// Human-readable description
        pub description: String,
        /// Replacement text, when the linter provides one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub replacement: Option<String>,
    }

    /// One diagnostic produced by a linter run
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LintIssue {
        /// Content-hash ID: issue:<hash of (file, linter, rule, position, message)>
        pub id: String,
        /// File the issue refers to
        pub file: PathBuf,
        /// Diagnostic text
        pub message: String,
        /// Severity
        pub severity: Severity,
        /// 1-based line
        pub line: u32,
        /// 1-based column
        pub column: u32,
        /// Optional end line
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub end_line: Option<u32>,
        /// Optional end column
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub end_column: Option<u32>,
        /// Name of the linter that reported it
        pub linter: String,
        /// Rule identifier, when the linter reports one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub rule: Option<String>,
        /// Suggested fixes
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub fixes: Vec<SuggestedFix>,
    }

    impl LintIssue {
        /// Create an issue at a position; line and column are clamped to 1
        #[must_use]
        pub fn new(
            file: &Path,
            linter: &str,
            severity: Severity,
            line: u32,
            column: u32,
            message: impl Into<String>,
        ) -> Self {
            let mut issue = Self {
                id: String::new(),
                file: file.to_path_buf(),
                message: message.into(),
                severity,
                line: line.max(1),
                column: column.max(1),
                end_line: None,
                end_column: None,
                linter: linter.to_string(),
                rule: None,
                fixes: Vec::new(),
            };
            issue.id = issue.generate_id();
            issue
        }

        /// Synthetic error describing a failed invocation
        #[must_use]
        pub fn invocation_failure(file: &Path, linter: &str, message: impl Into<String>) -> Self {
            Self::new(file, linter, Severity::Error, 1, 1, message).with_rule(INVOCATION_RULE)
        }

        /// Attach a rule identifier
        #[must_use]
        pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
            let rule = rule.into();
            self.rule = (!rule.is_empty()).then_some(rule);
            self.id = self.generate_id();
            self
        }

        /// Attach an end position
        #[must_use]
        pub fn with_end(mut self, end_line: Option<u32>, end_column: Option<u32>) -> Self {
            self.end_line = end_line;
            self.end_column = end_column;
            self
        }

        /// Attach suggested fixes
        #[must_use]
        pub fn with_fixes(mut self, fixes: Vec<SuggestedFix>) -> Self {
            self.fixes = fixes;
            self
        }

        /// Deterministic ID so the same diagnostic keeps its ID across runs
        #[must_use]
        pub fn generate_id(&self) -> String {
            let mut hasher = Sha256::new();
            hasher.update(self.file.to_string_lossy().as_bytes());
            hasher.update(self.linter.as_bytes());
            if let Some(rule) = &self.rule {
                hasher.update(rule.as_bytes());
            }
            hasher.update(self.line.to_le_bytes());
            hasher.update(self.column.to_le_bytes());
            hasher.update(self.message.as_bytes());
            let hash = hex::encode(hasher.finalize());
            format!("issue:{}", &hash[..12])
        }
    }

    /// Outcome of one linter run against one file
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LintResult {
        /// File that was linted
        pub file: PathBuf,
        /// Linter that ran
        pub linter: String,
        /// Issues in the order the linter reported them
        pub issues: Vec<LintIssue>,
        /// Wall-clock duration of the run
        pub duration_ms: u64,
        /// False when the linter could not be run or its output not understood
        pub success: bool,
        /// When the run finished
        pub timestamp: DateTime<Utc>,
    }

    impl LintResult {
        /// Successful run with the given issues
        #[must_use]
        pub fn new(file: &Path, linter: &str, issues: Vec<LintIssue>, duration: Duration) -> Self {
            Self {
                file: file.to_path_buf(),
                linter: linter.to_string(),
                issues,
                duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                success: true,
                timestamp: Utc::now(),
            }
        }

        /// Failed run carrying a single synthetic error issue
        #[must_use]
        pub fn failure(file: &Path, linter: &str, message: impl Into<String>, duration: Duration) -> Self {
            let issue = LintIssue::invocation_failure(file, linter, message);
            Self {
                success: false,
                ..Self::new(file, linter, vec![issue], duration)
            }
        }

        /// Number of issues with the given severity
        #[must_use]
        pub fn count(&self, severity: Severity) -> usize {
            self.issues.iter().filter(|i| i.severity == severity).count()
        }

        /// Whether any issue is an error
        #[must_use]
        pub fn has_errors(&self) -> bool {
            self.issues.iter().any(|i| i.severity == Severity::Error)
        }
    }

    // =========================================================================
    // Summary
    // =========================================================================

    /// Aggregate counts over a set of results
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Summary {
        /// Distinct files with at least one result
        pub total_files: usize,
        /// Issues across all results
        pub total_issues: usize,
        /// Error-severity issues
        pub errors: usize,
        /// Warning-severity issues
        pub warnings: usize,
        /// Info-severity issues
        pub infos: usize,
        /// Hint-severity issues
        pub hints: usize,
        /// Files with at least one issue
        pub files_with_issues: usize,
        /// Results with `success == false`
        pub invocation_failures: usize,
    }

    impl Summary {
        /// Fold a set of results into counts
        pub fn from_results<'a>(results: impl IntoIterator<Item = &'a LintResult>) -> Self {
            let mut summary = Self::default();
            let mut files = BTreeSet::new();
            let mut with_issues = BTreeSet::new();
            for result in results {
                files.insert(result.file.as_path());
                if !result.issues.is_empty() {
                    with_issues.insert(result.file.as_path());
                }
                if !result.success {
                    summary.invocation_failures += 1;
                }
                for issue in &result.issues {
                    summary.total_issues += 1;
                    match issue.severity {
                        Severity::Error => summary.errors += 1,
                        Severity::Warning => summary.warnings += 1,
                        Severity::Info => summary.infos += 1,
                        Severity::Hint => summary.hints += 1,
                    }
                }
            }
            summary.total_files = files.len();
            summary.files_with_issues = with_issues.len();
            summary
        }
    }

    impl fmt::Display for Summary {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{} files linted, {} with issues, {} invocation failures",
                self.total_files, self.files_with_issues, self.invocation_failures
            )
        }
    }

    // =========================================================================
    // Filesystem events
    // =========================================================================

    /// Kind of filesystem change delivered to the service
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum FileEventKind {
        /// File appeared
        Created,
        /// File contents changed
        Modified,
        /// File was closed after writing (editor save)
        Saved,
        /// File disappeared
        Removed,
    }

    /// A (path, kind) pair from the filesystem notification source
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FileEvent {
        /// Changed path
        pub path: PathBuf,
        /// What happened
        pub kind: FileEventKind,
    }

    impl FileEvent {
        /// Build an event
        #[must_use]
        pub fn new(path: impl Into<PathBuf>, kind: FileEventKind) -> Self {
            Self { path: path.into(), kind }
        }
    }
}

/// Prelude for common imports
pub mod prelude {
    pub use crate::types::*;
    pub use anyhow::{Context, Result};
}
