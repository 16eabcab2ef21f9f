// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Service-level tests with a scripted linter runner
//!
//! These exercise the full pipeline (classify, cache, queue, scheduler,
//! aggregation) without spawning real linters.

use async_trait::async_trait;
use lintqueue::config::{Config, LinterConfig};
use lintqueue::invoker::LintRunner;
use lintqueue::service::{LintService, ServiceEvent};
use lintqueue::types::{FileEvent, FileEventKind, LintIssue, LintResult, Severity};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Reports two warnings per file; `broken` fails, `panicky` panics
#[derive(Default)]
struct ScriptedRunner {
    calls: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
}

impl ScriptedRunner {
    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn calls(&self, linter: &str) -> usize {
        self.calls.lock().unwrap().get(linter).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl LintRunner for ScriptedRunner {
    async fn run(&self, path: &Path, linter: &LinterConfig) -> LintResult {
        *self.calls.lock().unwrap().entry(linter.name.clone()).or_default() += 1;
        if linter.name == "panicky" {
            panic!("linter crashed");
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match linter.name.as_str() {
            "broken" => LintResult::failure(path, &linter.name, "timed out after 1ms", self.delay),
            _ => {
                let issues = (1..=2)
                    .map(|line| {
                        LintIssue::new(path, &linter.name, Severity::Warning, line, 1, format!("warning {line}"))
                    })
                    .collect();
                LintResult::new(path, &linter.name, issues, self.delay)
            }
        }
    }
}

fn md_linter() -> LinterConfig {
    LinterConfig::new("md", "markdownlint").with_include(["**/*.md"])
}

fn write(dir: &TempDir, rel: &str, content: &str) -> PathBuf {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

/// Wait until `linter` has been invoked `n` times
async fn until_called(runner: &ScriptedRunner, linter: &str, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while runner.calls(linter) < n {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("linter never started");
}

fn service(config: Config, runner: &Arc<ScriptedRunner>) -> LintService {
    LintService::new(config, Arc::clone(runner) as Arc<dyn LintRunner>).unwrap()
}

// =============================================================================
// Aggregation
// =============================================================================

#[tokio::test]
async fn test_two_markdown_files_end_to_end() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "docs/a.md", "# A\n");
    let b = write(&dir, "docs/b.md", "# B\n");
    let runner = ScriptedRunner::with_delay(Duration::ZERO);
    let service = service(Config::new(dir.path(), vec![md_linter()]), &runner);

    let results = service.lint_files(&[a.clone(), b.clone()]).await;
    assert_eq!(results.len(), 2);

    let status = service.get_status();
    assert_eq!(status.summary.total_files, 2);
    assert_eq!(status.summary.total_issues, 4);
    assert_eq!(status.summary.warnings, 4);
    for file in [&a, &b] {
        let file_results = &status.files[file];
        assert_eq!(file_results.len(), 1);
        assert_eq!(file_results[0].count(Severity::Warning), 2);
    }
    assert_eq!(status.to_string(), "2 files linted, 2 with issues, 0 invocation failures");
    assert!(status.queue.is_idle());
}

#[tokio::test]
async fn test_unmatched_and_missing_files_contribute_nothing() {
    let dir = TempDir::new().unwrap();
    let py = write(&dir, "a.py", "x = 1\n");
    let runner = ScriptedRunner::with_delay(Duration::ZERO);
    let service = service(Config::new(dir.path(), vec![md_linter()]), &runner);

    let results = service
        .lint_files(&[py, dir.path().join("docs/missing.md")])
        .await;
    assert!(results.is_empty());
    assert_eq!(runner.total_calls(), 0);
    assert_eq!(service.get_status().queue.total_queues(), 0);
}

#[tokio::test]
async fn test_lint_project_discovers_files() {
    let dir = TempDir::new().unwrap();
    write(&dir, "README.md", "# R\n");
    write(&dir, "docs/guide.md", "# G\n");
    write(&dir, "node_modules/pkg/README.md", "# ignored\n");
    write(&dir, "src/main.rs", "fn main() {}\n");
    let runner = ScriptedRunner::with_delay(Duration::ZERO);
    let service = service(Config::new(dir.path(), vec![md_linter()]), &runner);

    let results = service.lint_project(false).await.unwrap();
    let files: Vec<_> = results.iter().map(|r| r.file.clone()).collect();
    assert_eq!(files, vec![dir.path().join("README.md"), dir.path().join("docs/guide.md")]);
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn test_unchanged_file_is_linted_once() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.md", "# A\n");
    let runner = ScriptedRunner::with_delay(Duration::ZERO);
    let service = service(Config::new(dir.path(), vec![md_linter()]), &runner);

    let first = service.lint_file(&a).await;
    let second = service.lint_file(&a).await;
    assert_eq!(runner.calls("md"), 1);
    assert_eq!(first, second);
    assert_eq!(service.get_status().cache_hits, 1);

    // Different size guarantees a different fingerprint.
    fs::write(&a, "# A changed\n").unwrap();
    service.lint_file(&a).await;
    assert_eq!(runner.calls("md"), 2);

    service.lint_files_with(&[a.clone()], true).await;
    assert_eq!(runner.calls("md"), 3);
    assert_eq!(service.get_status().runs, 3);
}

#[tokio::test]
async fn test_non_incremental_always_runs() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.md", "# A\n");
    let runner = ScriptedRunner::with_delay(Duration::ZERO);
    let mut config = Config::new(dir.path(), vec![md_linter()]);
    config.incremental = false;
    let service = service(config, &runner);

    service.lint_file(&a).await;
    service.lint_file(&a).await;
    assert_eq!(runner.calls("md"), 2);
}

#[tokio::test]
async fn test_failed_results_are_not_reused() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.md", "# A\n");
    let runner = ScriptedRunner::with_delay(Duration::ZERO);
    let broken = LinterConfig::new("broken", "x").with_include(["**/*.md"]);
    let service = service(Config::new(dir.path(), vec![broken]), &runner);

    service.lint_file(&a).await;
    service.lint_file(&a).await;
    assert_eq!(runner.calls("broken"), 2);
}

#[tokio::test]
async fn test_deletion_evicts() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.md", "# A\n");
    let runner = ScriptedRunner::with_delay(Duration::ZERO);
    let service = service(Config::new(dir.path(), vec![md_linter()]), &runner);
    let mut events = service.subscribe();

    service.lint_file(&a).await;
    assert!(service.get_status().files.contains_key(&a));
    assert!(matches!(events.recv().await.unwrap(), ServiceEvent::FileLinted { cached: false, .. }));

    fs::remove_file(&a).unwrap();
    let queued = service
        .handle_event(FileEvent::new(a.clone(), FileEventKind::Removed))
        .await;
    assert_eq!(queued, 0);
    assert!(!service.get_status().files.contains_key(&a));
    match events.recv().await.unwrap() {
        ServiceEvent::Evicted { path } => assert_eq!(path, a),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_persisted_cache_survives_restart() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.md", "# A\n");
    let mut config = Config::new(dir.path(), vec![md_linter()]);
    config.persist_cache = true;

    let first_runner = ScriptedRunner::with_delay(Duration::ZERO);
    let first = service(config.clone(), &first_runner);
    first.lint_file(&a).await;
    first.stop().await.unwrap();
    assert!(config.cache_file().exists());

    let second_runner = ScriptedRunner::with_delay(Duration::ZERO);
    let second = service(config, &second_runner);
    assert_eq!(second.get_status().summary.total_issues, 2);
    second.lint_file(&a).await;
    assert_eq!(second_runner.total_calls(), 0);
}

// =============================================================================
// Isolation and concurrency
// =============================================================================

#[tokio::test]
async fn test_failing_linter_does_not_block_sibling() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "pkg/m.py", "x = 1\n");
    let runner = ScriptedRunner::with_delay(Duration::from_millis(5));
    let config = Config::new(
        dir.path(),
        vec![
            LinterConfig::new("broken", "x").with_include(["**/*.py"]).with_priority(1),
            LinterConfig::new("panicky", "x").with_include(["**/*.py"]).with_priority(2),
            LinterConfig::new("ruff", "ruff").with_include(["**/*.py"]).with_priority(3),
        ],
    );
    let service = service(config, &runner);

    let results = service.lint_file(&a).await;
    assert_eq!(runner.total_calls(), 3);
    assert_eq!(results.len(), 3);

    let by_linter: HashMap<_, _> = results.iter().map(|r| (r.linter.as_str(), r)).collect();
    assert!(!by_linter["broken"].success);
    assert_eq!(by_linter["broken"].issues[0].severity, Severity::Error);
    assert!(!by_linter["panicky"].success);
    assert_eq!(by_linter["panicky"].issues[0].severity, Severity::Error);
    assert!(by_linter["panicky"].issues[0].message.contains("linter crashed"));
    assert!(by_linter["ruff"].success);
    assert_eq!(by_linter["ruff"].issues.len(), 2);
    assert_eq!(lintqueue::output::exit_code(&results), lintqueue::output::EXIT_ISSUES);

    let status = service.get_status();
    assert_eq!(status.summary.invocation_failures, 2);
    assert_eq!(status.in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrency_cap() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..8).map(|i| write(&dir, &format!("f{i}.md"), "x")).collect();
    let runner = ScriptedRunner::with_delay(Duration::from_millis(30));
    let mut config = Config::new(dir.path(), vec![md_linter()]);
    config.max_concurrency = 2;
    let service = service(config, &runner);

    let results = service.lint_files(&files).await;
    assert_eq!(results.len(), 8);
    assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    assert!(service.peak_concurrency() <= 2);
    assert_eq!(service.peak_concurrency(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_linter_runs_one_at_a_time() {
    let dir = TempDir::new().unwrap();
    let files: Vec<PathBuf> = (0..4).map(|i| write(&dir, &format!("m{i}.py"), "x")).collect();
    let runner = ScriptedRunner::with_delay(Duration::from_millis(20));
    let config = Config::new(
        dir.path(),
        vec![LinterConfig::new("mypy", "mypy").with_include(["**/*.py"]).exclusive()],
    );
    let service = service(config, &runner);

    service.lint_files(&files).await;
    assert_eq!(runner.calls("mypy"), 4);
    assert_eq!(runner.peak.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Event path
// =============================================================================

#[tokio::test]
async fn test_burst_of_events_lints_once() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.md", "# A\n");
    let runner = ScriptedRunner::with_delay(Duration::ZERO);
    let mut config = Config::new(dir.path(), vec![md_linter()]);
    config.debounce_delay = 50;
    let service = service(config, &runner);
    let mut events = service.subscribe();
    assert!(service.start());

    for _ in 0..5 {
        assert!(service.notify(&a, FileEventKind::Modified));
    }
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no lint within 5s")
        .unwrap();
    assert!(matches!(event, ServiceEvent::FileLinted { .. }));

    tokio::time::sleep(Duration::from_millis(200)).await;
    service.wait_idle().await;
    assert_eq!(runner.calls("md"), 1);
    assert!(service.get_status().running);

    service.stop().await.unwrap();
    assert!(!service.get_status().running);
    assert!(!service.notify(&a, FileEventKind::Modified));
}

#[tokio::test]
async fn test_stop_lets_running_work_finish() {
    let dir = TempDir::new().unwrap();
    let files = vec![write(&dir, "a.md", "# A\n"), write(&dir, "b.md", "# B\n")];
    let runner = ScriptedRunner::with_delay(Duration::from_millis(100));
    let service = service(Config::new(dir.path(), vec![md_linter()]), &runner);

    let linting = {
        let service = service.clone();
        tokio::spawn(async move { service.lint_files(&files).await })
    };
    until_called(&runner, "md", 2).await;
    service.stop().await.unwrap();

    let results = linting.await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
    assert_eq!(runner.calls("md"), 2);
    assert_eq!(service.get_status().in_flight, 0);
}

#[tokio::test]
async fn test_stop_kills_work_past_shutdown_timeout() {
    let dir = TempDir::new().unwrap();
    let files = vec![write(&dir, "a.md", "# A\n")];
    let runner = ScriptedRunner::with_delay(Duration::from_secs(30));
    let mut config = Config::new(dir.path(), vec![md_linter()]);
    config.shutdown_timeout = 20;
    let service = service(config, &runner);

    let linting = {
        let service = service.clone();
        tokio::spawn(async move { service.lint_files(&files).await })
    };
    until_called(&runner, "md", 1).await;
    assert_eq!(service.get_status().in_flight, 1);

    let started = std::time::Instant::now();
    service.stop().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    let results = tokio::time::timeout(Duration::from_secs(5), linting)
        .await
        .expect("lint_files did not return after stop")
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(service.get_status().in_flight, 0);
}

#[tokio::test]
async fn test_event_kind_switches() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "a.md", "# A\n");
    let runner = ScriptedRunner::with_delay(Duration::ZERO);
    let mut config = Config::new(dir.path(), vec![md_linter()]);
    config.lint_on_change = false;
    let service = service(config, &runner);

    assert!(!service.notify(&a, FileEventKind::Modified));
    assert!(!service.notify(&a, FileEventKind::Created));
    assert!(service.notify(&a, FileEventKind::Saved));
    assert!(service.notify(&a, FileEventKind::Removed));

    // Outside the global patterns and directories are dropped.
    assert!(!service.notify(&dir.path().join("node_modules/x.md"), FileEventKind::Saved));
    assert!(!service.notify(dir.path(), FileEventKind::Saved));
    service.stop().await.unwrap();
}

#[test]
fn test_invalid_config_is_rejected() {
    let runner: Arc<dyn LintRunner> = ScriptedRunner::with_delay(Duration::ZERO);
    let mut config = Config::new("/tmp", vec![md_linter()]);
    config.max_concurrency = 0;
    let err = LintService::new(config, runner).err().unwrap();
    assert!(err.to_string().contains("maxConcurrency"));
}

// =============================================================================
// Real subprocesses
// =============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_shell_linter_end_to_end() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir, "docs/a.md", "# A\n");
    let linter = LinterConfig::new("sh-md", "sh")
        .with_args([
            "-c",
            r#"echo "$1:1:1: warning: first [W1]"; echo "$1:2:4: warning: second [W2]"; exit 1"#,
            "sh",
            "{relative}",
        ])
        .with_include(["**/*.md"]);
    let service = LintService::with_invoker(Config::new(dir.path(), vec![linter])).unwrap();

    let results = service.lint_file(&a).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    let rules: Vec<_> = results[0].issues.iter().filter_map(|i| i.rule.as_deref()).collect();
    assert_eq!(rules, ["W1", "W2"]);
    assert_eq!((results[0].issues[1].line, results[0].issues[1].column), (2, 4));
}
