// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transfer Subsystem
//!
//! rsync command rendering and live progress tailing.

pub mod command;
pub mod progress;

use thiserror::Error;

pub use command::{mount_path, retry_script, RsyncCommand, RsyncLocation, DEST_MOUNT, SOURCE_MOUNT};
pub use progress::{BarRenderer, LogRenderer, Progress, ProgressRenderer, ProgressTail};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Binary not found in PATH: {0}")]
    BinaryNotFound(String),
    #[error("Failed to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("rsync cannot use ssh on both source and destination")]
    BothRemote,
    #[error("Transfer exited unsuccessfully: {0}")]
    Failed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
