// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! rsync Command Builder
//!
//! The rendered command is a pure function of its inputs so that it can be
//! logged verbatim and asserted on in tests.

use super::TransferError;

/// Mount point of the source claim inside helper pods
pub const SOURCE_MOUNT: &str = "/source";
/// Mount point of the destination claim inside helper pods
pub const DEST_MOUNT: &str = "/dest";

const SSH_OPTIONS: &str =
    "ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o ConnectTimeout=5";

/// Joins a mount point and a path inside the claim.
///
/// `mount_path("/source", "/data")` is `/source/data`, and the volume root
/// `/` maps to `/source/` so rsync copies the contents, not the directory.
pub fn mount_path(mount: &str, path: &str) -> String {
    format!("{}/{}", mount.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RsyncLocation {
    Local(String),
    /// Reached over ssh as `root@host:path`
    Remote { host: String, path: String },
}

impl RsyncLocation {
    pub fn local(path: impl Into<String>) -> Self {
        RsyncLocation::Local(path.into())
    }

    pub fn remote(host: impl Into<String>, path: impl Into<String>) -> Self {
        RsyncLocation::Remote {
            host: host.into(),
            path: path.into(),
        }
    }

    fn is_remote(&self) -> bool {
        matches!(self, RsyncLocation::Remote { .. })
    }

    fn render(&self) -> String {
        match self {
            RsyncLocation::Local(path) => shell_quote(path),
            RsyncLocation::Remote { host, path } => shell_quote(&format!("root@{}:{}", host, path)),
        }
    }
}

/// Single-quotes `value` for `sh` unless it only holds characters the shell
/// passes through unchanged.
fn shell_quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-:@,+=%".contains(c));
    if plain {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsyncCommand {
    pub source: RsyncLocation,
    pub dest: RsyncLocation,
    /// ssh port when it is not 22
    pub ssh_port: Option<u16>,
    /// `--delete`
    pub delete: bool,
    /// `--no-o --no-g`
    pub no_chown: bool,
}

impl RsyncCommand {
    pub fn new(source: RsyncLocation, dest: RsyncLocation) -> Self {
        Self {
            source,
            dest,
            ssh_port: None,
            delete: false,
            no_chown: false,
        }
    }

    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = Some(port);
        self
    }

    pub fn with_delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    pub fn with_no_chown(mut self, no_chown: bool) -> Self {
        self.no_chown = no_chown;
        self
    }

    pub fn build(&self) -> Result<String, TransferError> {
        if self.source.is_remote() && self.dest.is_remote() {
            return Err(TransferError::BothRemote);
        }

        let ssh = match self.ssh_port {
            Some(port) => format!("{} -p {}", SSH_OPTIONS, port),
            None => SSH_OPTIONS.to_string(),
        };

        let mut args = vec![
            "rsync".to_string(),
            "-azv".to_string(),
            "--info=progress2,misc0,flist0".to_string(),
            "--no-inc-recursive".to_string(),
            "-e".to_string(),
            format!("\"{}\"", ssh),
        ];
        if self.no_chown {
            args.push("--no-o".to_string());
            args.push("--no-g".to_string());
        }
        if self.delete {
            args.push("--delete".to_string());
        }
        args.push(self.source.render());
        args.push(self.dest.render());

        Ok(args.join(" "))
    }
}

/// Wraps `command` in a shell loop retrying it up to `retries` times.
pub fn retry_script(command: &str, retries: u32, delay_seconds: u32) -> String {
    format!(
        r#"n=1
rc=1
retries={retries}
until [ "$n" -gt "$retries" ]
do
  {command} && rc=0 && break
  echo "rsync attempt $n/$retries failed, waiting {delay_seconds} seconds before trying again"
  n=$((n+1))
  sleep {delay_seconds}
done

if [ $rc -ne 0 ]; then
  echo "rsync failed after $retries attempts"
fi
exit $rc
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_path() {
        assert_eq!(mount_path(SOURCE_MOUNT, "/"), "/source/");
        assert_eq!(mount_path(SOURCE_MOUNT, "data/sub"), "/source/data/sub");
        assert_eq!(mount_path(DEST_MOUNT, "/data"), "/dest/data");
    }

    #[test]
    fn test_local_command_is_deterministic() {
        let cmd = RsyncCommand::new(RsyncLocation::local("/a"), RsyncLocation::local("/b"))
            .with_delete(true)
            .with_no_chown(true);
        let first = cmd.build().unwrap();
        assert_eq!(
            first,
            "rsync -azv --info=progress2,misc0,flist0 --no-inc-recursive -e \
             \"ssh -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null -o ConnectTimeout=5\" \
             --no-o --no-g --delete /a /b"
        );
        assert_eq!(first, cmd.clone().build().unwrap());
    }

    #[test]
    fn test_remote_source_with_port() {
        let cmd = RsyncCommand::new(
            RsyncLocation::remote("pv-migrate-abcde-sshd.ns1", "/source/"),
            RsyncLocation::local("/dest/"),
        )
        .with_ssh_port(50000);
        let rendered = cmd.build().unwrap();
        assert!(rendered.contains("ConnectTimeout=5 -p 50000\""));
        assert!(rendered.ends_with("root@pv-migrate-abcde-sshd.ns1:/source/ /dest/"));
        assert!(!rendered.contains("--delete"));
        assert!(!rendered.contains("--no-o"));
    }

    #[test]
    fn test_paths_are_quoted_for_the_shell() {
        let cmd = RsyncCommand::new(
            RsyncLocation::local("/source/my data/"),
            RsyncLocation::local("/dest/it's; rm -rf x"),
        );
        let rendered = cmd.build().unwrap();
        assert!(rendered.ends_with(" '/source/my data/' '/dest/it'\\''s; rm -rf x'"));

        let cmd = RsyncCommand::new(
            RsyncLocation::remote("pv-migrate-abcde-sshd.ns1", "/source/a b/"),
            RsyncLocation::local("/dest/"),
        );
        assert!(cmd
            .build()
            .unwrap()
            .ends_with(" 'root@pv-migrate-abcde-sshd.ns1:/source/a b/' /dest/"));
    }

    #[test]
    fn test_both_remote_rejected() {
        let cmd = RsyncCommand::new(
            RsyncLocation::remote("a", "/x"),
            RsyncLocation::remote("b", "/y"),
        );
        assert!(matches!(cmd.build(), Err(TransferError::BothRemote)));
    }

    #[test]
    fn test_retry_script() {
        let script = retry_script("rsync /a /b", 10, 5);
        assert!(script.contains("retries=10"));
        assert!(script.contains("  rsync /a /b && rc=0 && break"));
        assert!(script.contains("sleep 5"));
        assert!(script.ends_with("exit $rc\n"));
    }
}
