// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Configuration management
//!
//! A config is loaded from `lintqueue.json` (or a `.toml` file) and must pass
//! [`Config::validate`] before a service is built from it. Validation lists
//! every problem at once instead of stopping at the first.

use crate::error::ConfigError;
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the project root when none is given
pub const DEFAULT_CONFIG_FILE: &str = "lintqueue.json";

/// Cache directory created under the project root when `cacheDir` is unset
pub const DEFAULT_CACHE_DIR: &str = ".lintqueue-cache";

/// File name of the persisted cache inside the cache directory
pub const CACHE_FILE_NAME: &str = "cache.json";

const DEFAULT_DEBOUNCE_MS: i64 = 1000;
const DEFAULT_MAX_CONCURRENCY: i64 = 4;
const DEFAULT_MAX_CACHE_AGE_MS: u64 = 24 * 60 * 60 * 1000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_LINTER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// How a linter's output is turned into issues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputParser {
    /// `eslint --format json`
    Eslint,
    /// `ruff check --output-format json`
    Ruff,
    /// mypy's `file:line:col: severity: message [code]` lines
    Mypy,
    /// `markdownlint --json`
    Markdownlint,
    /// `shellcheck --format json`
    Shellcheck,
    /// Generic `file:line[:col]: [severity:] message` lines
    #[default]
    Line,
    /// Generic JSON array of issue objects
    Json,
}

/// Rendering of aggregated results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Grouped per file with a closing summary line
    #[default]
    Summary,
    /// Machine-readable results and summary
    Json,
    /// Aligned columns, one issue per row
    Table,
    /// `file:line:col: severity: message` problem-matcher lines
    Vscode,
}

/// Static definition of one external linter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinterConfig {
    /// Unique key
    #[serde(default)]
    pub name: String,
    /// Disabled linters never classify
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Executable to spawn
    #[serde(default)]
    pub command: String,
    /// Argument template; `{file}`, `{relative}` and `{root}` are substituted
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra arguments inserted when fixing is enabled; empty means no fix mode
    #[serde(default)]
    pub fix_args: Vec<String>,
    /// Globs (relative to the root) the linter applies to
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// Globs that exclude a file even if an include matches
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Files larger than this many bytes are skipped; 0 disables the limit
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Per-run wall-clock timeout in milliseconds
    #[serde(default = "default_linter_timeout")]
    pub timeout: u64,
    /// When false, runs of this linter are serialized across all files
    #[serde(default = "default_true")]
    pub parallel: bool,
    /// Lower runs first when several linters apply to one file
    #[serde(default)]
    pub priority: i32,
    /// Working directory, relative to the root unless absolute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Output format of the tool
    #[serde(default)]
    pub parser: OutputParser,
}

impl LinterConfig {
    /// Minimal enabled linter; chain the `with_*` helpers to fill it in
    #[must_use]
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            command: command.into(),
            args: Vec::new(),
            fix_args: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            timeout: DEFAULT_LINTER_TIMEOUT_MS,
            parallel: true,
            priority: 0,
            working_directory: None,
            parser: OutputParser::default(),
        }
    }

    /// Set the argument template
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the fix-mode arguments
    #[must_use]
    pub fn with_fix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fix_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the include globs
    #[must_use]
    pub fn with_include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the exclude globs
    #[must_use]
    pub fn with_exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Set the output parser
    #[must_use]
    pub fn with_parser(mut self, parser: OutputParser) -> Self {
        self.parser = parser;
        self
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the timeout in milliseconds
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mark the linter as serialized across files
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Per-run timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Whether the linter has a fix mode
    #[must_use]
    pub fn supports_fix(&self) -> bool {
        !self.fix_args.is_empty()
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Root of the watched tree; relative paths resolve against the config file
    #[serde(default)]
    pub root_path: PathBuf,
    /// Linter definitions
    #[serde(default)]
    pub linters: Vec<LinterConfig>,
    /// Global include globs applied before any linter's own patterns
    #[serde(default = "default_include_patterns")]
    pub include_patterns: Vec<String>,
    /// Global exclude globs applied before any linter's own patterns
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    /// Quiet period in milliseconds before a changed file is scheduled
    #[serde(default = "default_debounce_delay")]
    pub debounce_delay: i64,
    /// Maximum simultaneously running linter processes
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: i64,
    /// Skip linters whose cached result matches the file's fingerprint
    #[serde(default = "default_true")]
    pub incremental: bool,
    /// Save the cache on shutdown and reload it at startup
    #[serde(default)]
    pub persist_cache: bool,
    /// Directory of the persisted cache
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Persisted entries older than this many milliseconds are discarded
    #[serde(default = "default_max_cache_age")]
    pub max_cache_age: u64,
    /// Pass fix-mode arguments to linters that support them
    #[serde(default)]
    pub auto_fix: bool,
    /// Schedule on close-after-write events
    #[serde(default = "default_true")]
    pub lint_on_save: bool,
    /// Schedule on create/modify events
    #[serde(default = "default_true")]
    pub lint_on_change: bool,
    /// Rendering of results
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Debug logging
    #[serde(default)]
    pub verbose: bool,
    /// Include a SHA-256 of the contents in fingerprints
    #[serde(default)]
    pub hash_contents: bool,
    /// Drop drained queue entries immediately instead of on `cleanup()`
    #[serde(default = "default_true")]
    pub auto_cleanup: bool,
    /// How long `stop()` waits for in-flight work before killing it (ms)
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_linter_timeout() -> u64 {
    DEFAULT_LINTER_TIMEOUT_MS
}

fn default_include_patterns() -> Vec<String> {
    vec!["**/*".to_string()]
}

fn default_exclude_patterns() -> Vec<String> {
    [
        "**/node_modules/**",
        "**/.git/**",
        "**/target/**",
        "**/dist/**",
        "**/.venv/**",
        "**/.lintqueue-cache/**",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_debounce_delay() -> i64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_max_concurrency() -> i64 {
    DEFAULT_MAX_CONCURRENCY
}

fn default_max_cache_age() -> u64 {
    DEFAULT_MAX_CACHE_AGE_MS
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}

impl Config {
    /// Config for `root` with the given linters and every other option defaulted
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, linters: Vec<LinterConfig>) -> Self {
        Self {
            root_path: root.into(),
            linters,
            include_patterns: default_include_patterns(),
            exclude_patterns: default_exclude_patterns(),
            debounce_delay: DEFAULT_DEBOUNCE_MS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            incremental: true,
            persist_cache: false,
            cache_dir: None,
            max_cache_age: DEFAULT_MAX_CACHE_AGE_MS,
            auto_fix: false,
            lint_on_save: true,
            lint_on_change: true,
            output_format: OutputFormat::default(),
            verbose: false,
            hash_contents: false,
            auto_cleanup: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }

    /// Config for `root` with the built-in linter table
    #[must_use]
    pub fn with_defaults(root: impl Into<PathBuf>) -> Self {
        Self::new(root, default_linters())
    }

    /// Load from a JSON or TOML file (chosen by extension)
    ///
    /// A relative `rootPath` is resolved against the directory holding the
    /// file. The result is not validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let mut config = if is_toml {
            toml::from_str::<Self>(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            Self::from_json_str(&content).map_err(|e| match e {
                ConfigError::Parse { message, .. } => ConfigError::Parse {
                    path: path.to_path_buf(),
                    message,
                },
                other => other,
            })?
        };

        if !config.root_path.as_os_str().is_empty() && config.root_path.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.root_path = base.join(&config.root_path);
        }

        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// Check every rule and report all violations together
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.root_path.as_os_str().is_empty() {
            problems.push("rootPath must not be empty".to_string());
        }

        if self.linters.is_empty() {
            problems.push("at least one linter must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for (i, linter) in self.linters.iter().enumerate() {
            let label = if linter.name.trim().is_empty() {
                format!("linters[{i}]")
            } else {
                format!("linters[{i}] ({})", linter.name)
            };

            if linter.name.trim().is_empty() {
                problems.push(format!("{label}: missing name"));
            } else if !seen.insert(linter.name.as_str()) {
                problems.push(format!("{label}: duplicate linter name '{}'", linter.name));
            }
            if linter.command.trim().is_empty() {
                problems.push(format!("{label}: missing command"));
            }
            if linter.include_patterns.is_empty() {
                problems.push(format!("{label}: at least one include pattern is required"));
            }
            if linter.timeout == 0 {
                problems.push(format!("{label}: timeout must be greater than 0"));
            }
            for pattern in linter.include_patterns.iter().chain(&linter.exclude_patterns) {
                if let Err(e) = Glob::new(pattern) {
                    problems.push(format!("{label}: invalid pattern '{pattern}': {e}"));
                }
            }
        }

        if self.max_concurrency < 1 {
            problems.push(format!(
                "maxConcurrency must be at least 1 (got {})",
                self.max_concurrency
            ));
        }

        if self.debounce_delay < 0 {
            problems.push(format!(
                "debounceDelay must not be negative (got {})",
                self.debounce_delay
            ));
        }

        if self.include_patterns.is_empty() {
            problems.push("includePatterns must contain at least one pattern".to_string());
        }

        if self.exclude_patterns.is_empty() {
            problems.push("excludePatterns must contain at least one pattern".to_string());
        }

        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            if let Err(e) = Glob::new(pattern) {
                problems.push(format!("invalid global pattern '{pattern}': {e}"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Debounce quiet period
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.debounce_delay).unwrap_or(0))
    }

    /// Concurrency cap, never below 1
    #[must_use]
    pub fn concurrency(&self) -> usize {
        usize::try_from(self.max_concurrency).unwrap_or(1).max(1)
    }

    /// Directory holding the persisted cache
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.root_path.join(dir),
            None => self.root_path.join(DEFAULT_CACHE_DIR),
        }
    }

    /// Path of the persisted cache file
    #[must_use]
    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir().join(CACHE_FILE_NAME)
    }

    /// Maximum age of persisted cache entries
    #[must_use]
    pub fn max_cache_age(&self) -> Duration {
        Duration::from_millis(self.max_cache_age)
    }

    /// Graceful shutdown budget
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout)
    }

    /// Enabled linters only
    pub fn enabled_linters(&self) -> impl Iterator<Item = &LinterConfig> {
        self.linters.iter().filter(|l| l.enabled)
    }
}

/// Where to look for the config file
///
/// An explicit path wins; otherwise `lintqueue.json` (then `lintqueue.toml`)
/// in the project directory.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>, project: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let dir = project.unwrap_or_else(|| Path::new("."));
    let json = dir.join(DEFAULT_CONFIG_FILE);
    let toml = dir.join("lintqueue.toml");
    if !json.exists() && toml.exists() {
        toml
    } else {
        json
    }
}

/// The built-in linter table written by `lintqueue init`
#[must_use]
pub fn default_linters() -> Vec<LinterConfig> {
    vec![
        LinterConfig::new("eslint", "npx")
            .with_args(["eslint", "--format", "json", "{file}"])
            .with_fix_args(["--fix"])
            .with_include(["**/*.ts", "**/*.tsx", "**/*.js", "**/*.jsx"])
            .with_exclude(["**/*.d.ts"])
            .with_parser(OutputParser::Eslint)
            .with_priority(10),
        LinterConfig::new("ruff", "ruff")
            .with_args(["check", "--output-format", "json", "{file}"])
            .with_fix_args(["--fix"])
            .with_include(["**/*.py"])
            .with_parser(OutputParser::Ruff)
            .with_priority(10),
        LinterConfig::new("mypy", "mypy")
            .with_args(["--no-error-summary", "--show-column-numbers", "--no-color-output", "{file}"])
            .with_include(["**/*.py"])
            .with_parser(OutputParser::Mypy)
            .with_priority(20)
            .with_timeout_ms(120_000)
            .exclusive(),
        LinterConfig::new("markdownlint", "npx")
            .with_args(["markdownlint", "--json", "{file}"])
            .with_fix_args(["--fix"])
            .with_include(["**/*.md"])
            .with_exclude(["**/CHANGELOG.md"])
            .with_parser(OutputParser::Markdownlint)
            .with_priority(30),
        LinterConfig::new("shellcheck", "shellcheck")
            .with_args(["--format", "json", "{file}"])
            .with_include(["**/*.sh", "**/*.bash"])
            .with_parser(OutputParser::Shellcheck)
            .with_priority(30),
    ]
}
