// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shell completions command

use anyhow::{Context, Result};
use clap::Command;
use clap_complete::{generate, Shell};
use std::io::Write;

/// Writes the completion script of `command` for `shell` to `out`.
pub fn write(shell: Shell, command: &mut Command, out: &mut impl Write) -> Result<()> {
    let name = command.get_name().to_string();
    generate(shell, command, name, out);
    out.flush().context("Failed to write completion script")
}
