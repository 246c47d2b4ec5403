// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reverse Tunnel
//!
//! Builds and runs the local `ssh` invocation used by the local relay: log
//! into the source sshd through its port-forward and, inside the same
//! session, open a reverse forward from the source pod back to the
//! destination's port-forward. The remote command then reaches the
//! destination at `localhost:<remote_port>`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::infrastructure::transfer::TransferError;

pub const SSH_BINARY: &str = "ssh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseTunnel {
    /// ssh client to run
    pub binary: PathBuf,
    /// Private key matching the public key installed in both sshd helpers
    pub identity_file: PathBuf,
    /// Local port forwarded to the source sshd
    pub source_port: u16,
    /// Port opened inside the source pod
    pub remote_port: u16,
    /// Local port forwarded to the destination sshd
    pub dest_port: u16,
}

impl ReverseTunnel {
    pub fn new(identity_file: impl AsRef<Path>, source_port: u16, remote_port: u16, dest_port: u16) -> Self {
        Self {
            binary: PathBuf::from(SSH_BINARY),
            identity_file: identity_file.as_ref().to_path_buf(),
            source_port,
            remote_port,
            dest_port,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Argument vector for `ssh`, ending with `remote_command`.
    pub fn args(&self, remote_command: &str) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.identity_file.display().to_string(),
            "-p".to_string(),
            self.source_port.to_string(),
            "-R".to_string(),
            format!("{}:localhost:{}", self.remote_port, self.dest_port),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "root@localhost".to_string(),
            remote_command.to_string(),
        ]
    }

    /// Starts `ssh` with piped output. The child is killed if dropped.
    pub fn spawn(&self, remote_command: &str) -> Result<Child, TransferError> {
        let args = self.args(remote_command);
        debug!("Running {} {}", self.binary.display(), args.join(" "));
        Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransferError::Spawn {
                binary: self.binary.display().to_string(),
                source: e,
            })
    }
}

/// Fails unless `binary` is on `PATH`.
pub fn ensure_binary(binary: &str) -> Result<PathBuf, TransferError> {
    which::which(binary).map_err(|_| TransferError::BinaryNotFound(binary.to_string()))
}
