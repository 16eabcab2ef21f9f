// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! lintqueue CLI - incremental, debounced linting for a project tree

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use lintqueue::commands::{self, cache::CacheAction, config::ConfigAction, lint::LintArgs, GlobalOptions};
use lintqueue::config::{resolve_config_path, Config, OutputFormat};
use std::path::{Path, PathBuf};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lintqueue")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, env = "LINTQUEUE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR", global = true)]
    no_color: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint files (or the whole project) once, or keep watching
    Lint {
        /// Files to lint (default: every matching file in the project)
        files: Vec<PathBuf>,

        /// Project directory
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Keep running and lint files as they change
        #[arg(short, long)]
        watch: bool,

        /// Let linters fix what they can
        #[arg(long)]
        fix: bool,

        /// Ignore cached results
        #[arg(long)]
        force: bool,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Write a lintqueue.json with the built-in linters
    Init {
        /// Project directory
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Validate or print the configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,

        /// Project directory
        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// Inspect or clear the persisted result cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,

        /// Project directory
        #[arg(short, long)]
        project: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Clone, Copy)]
enum ConfigCommand {
    /// Validate and list every problem
    Check,
    /// Print the effective configuration
    Show,
}

#[derive(Subcommand, Clone, Copy)]
enum CacheCommand {
    /// Show cached entries
    Show,
    /// Delete the cache file
    Clear,
}

impl Commands {
    fn project(&self) -> Option<&Path> {
        match self {
            Self::Lint { project, .. }
            | Self::Init { project, .. }
            | Self::Config { project, .. }
            | Self::Cache { project, .. } => project.as_deref(),
            Self::Completions { .. } => None,
        }
    }
}

fn config_is_verbose(explicit: Option<&Path>, project: Option<&Path>) -> bool {
    let path = resolve_config_path(explicit, project);
    path.exists() && Config::load(&path).is_ok_and(|c| c.verbose)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 if cli.quiet => LevelFilter::ERROR,
        0 if config_is_verbose(cli.config.as_deref(), cli.command.project()) => LevelFilter::DEBUG,
        0 if cli.json => LevelFilter::WARN,
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .with_target(false)
        .init();

    let global = GlobalOptions {
        config: cli.config,
        json: cli.json,
        color: !cli.no_color,
    };

    // Execute command
    let code = match cli.command {
        Commands::Lint { files, project, watch, fix, force, format } => {
            let args = LintArgs { project, files, watch, fix, force, format };
            commands::lint::run(args, &global).await?
        }
        Commands::Init { project, force } => commands::init::run(project.as_deref(), force)?,
        Commands::Config { action, project } => {
            let action = match action {
                ConfigCommand::Check => ConfigAction::Check,
                ConfigCommand::Show => ConfigAction::Show,
            };
            commands::config::run(action, project.as_deref(), &global)?
        }
        Commands::Cache { action, project } => {
            let action = match action {
                CacheCommand::Show => CacheAction::Show,
                CacheCommand::Clear => CacheAction::Clear,
            };
            commands::cache::run(action, project.as_deref(), &global)?
        }
        Commands::Completions { shell } => commands::completions::run(shell, &mut Cli::command())?,
    };

    std::process::exit(code);
}
