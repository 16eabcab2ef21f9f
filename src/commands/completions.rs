// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell

use crate::output::EXIT_OK;
use anyhow::Result;
use clap_complete::Shell;

/// Write completions for `cmd` to stdout
pub fn run(shell: Shell, cmd: &mut clap::Command) -> Result<i32> {
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, cmd, name, &mut std::io::stdout());
    Ok(EXIT_OK)
}
