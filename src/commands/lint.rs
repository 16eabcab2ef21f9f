// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Lint command - one-shot or watch-mode linting

use super::{load_config, report_config_error, GlobalOptions};
use crate::config::OutputFormat;
use crate::output::{self, RenderOptions, EXIT_CONFIG, EXIT_OK};
use crate::service::{LintService, ServiceEvent};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Arguments of `lintqueue lint`
#[derive(Debug, Clone, Default)]
pub struct LintArgs {
    /// Project directory
    pub project: Option<PathBuf>,
    /// Files to lint; the whole project when empty
    pub files: Vec<PathBuf>,
    /// Keep running and lint on change
    pub watch: bool,
    /// Pass fix arguments to linters
    pub fix: bool,
    /// Ignore fresh cache entries
    pub force: bool,
    /// Output format override
    pub format: Option<OutputFormat>,
}

/// Run lint command
pub async fn run(args: LintArgs, global: &GlobalOptions) -> Result<i32> {
    let mut config = match load_config(global, args.project.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            report_config_error(&e, global.color);
            return Ok(EXIT_CONFIG);
        }
    };
    if args.fix {
        config.auto_fix = true;
    }
    let format = args
        .format
        .or(global.json.then_some(OutputFormat::Json))
        .unwrap_or(config.output_format);
    let opts = RenderOptions {
        color: global.color && format != OutputFormat::Json,
        root: Some(config.root_path.clone()),
    };

    let service = match LintService::with_invoker(config) {
        Ok(service) => service,
        Err(e) => {
            report_config_error(&e, global.color);
            return Ok(EXIT_CONFIG);
        }
    };

    let results = if args.files.is_empty() {
        service.lint_project(args.force).await?
    } else {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let files: Vec<PathBuf> = args
            .files
            .iter()
            .map(|f| {
                let f = cwd.join(f);
                std::fs::canonicalize(&f).unwrap_or(f)
            })
            .collect();
        service.lint_files_with(&files, args.force).await
    };

    print!("{}", output::render(format, &results, &opts)?);

    if !args.watch {
        service.stop().await?;
        return Ok(output::exit_code(&results));
    }

    watch(&service, format, &opts).await?;
    Ok(EXIT_OK)
}

async fn watch(service: &LintService, format: OutputFormat, opts: &RenderOptions) -> Result<()> {
    let mut events = service.subscribe();
    let _watcher = service.watch()?;
    info!("press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(ServiceEvent::FileLinted { result, cached: false, .. }) => {
                    print!("{}", output::render(format, std::slice::from_ref(&result), opts)?);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let status = service.get_status();
    service.stop().await?;
    eprintln!("{status}");
    Ok(())
}
