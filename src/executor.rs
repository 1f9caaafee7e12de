// G5K-LAUNCH: Provisioning and Deployment of Peer-to-Peer Experiments on Grid'5000
// Copyright (C) 2024-2025 The G5K-LAUNCH Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//! Local execution of shell and SSH commands.
//!
//! A failing command is never an error here. The caller receives a [`CommandOutcome`] holding
//! the exit status and both captured streams, and decides on its own whether a failure matters.

use std::{fmt, process::Stdio};

use tokio::process::Command;

/// Result of running a command to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit code, or `None` if the process could not be spawned or was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    /// Outcome of a command that terminated with the given status and output.
    pub fn new(status: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Outcome of a command that could not be run at all.
    pub fn not_started(reason: impl fmt::Display) -> Self {
        Self {
            status: None,
            stdout: String::new(),
            stderr: reason.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// First non-empty line of stdout, trimmed.
    pub fn first_line(&self) -> Option<&str> {
        self.stdout.lines().map(str::trim).find(|l| !l.is_empty())
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "exit code {code}")?,
            None => write!(f, "not completed")?,
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            write!(f, ": {stderr}")?;
        }
        Ok(())
    }
}

/// Run `program` with `args` and capture its output. Stdout is logged on success, stderr on
/// failure.
pub async fn execute<I, S>(program: &str, args: I) -> CommandOutcome
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    log::trace!("{command:?}");

    let outcome = match command.output().await {
        Ok(output) => CommandOutcome {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(e) => CommandOutcome::not_started(format!("Cannot execute {program}: {e}")),
    };

    if outcome.success() {
        if !outcome.stdout.trim().is_empty() {
            log::info!("{program}: {}", outcome.stdout.trim_end());
        }
    } else {
        log::warn!("{program} failed with {outcome}");
    }
    outcome
}

/// Run a command string through `sh -c`.
pub async fn execute_shell(command: impl AsRef<str>) -> CommandOutcome {
    execute("sh", ["-c", command.as_ref()]).await
}

/// Arguments for `ssh` reaching `host` through the jump host `jump` (if any) and running
/// `command` there.
pub fn ssh_args(jump: Option<&str>, host: &str, command: &str) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
    ];
    if let Some(jump) = jump {
        args.push("-J".to_string());
        args.push(jump.to_string());
    }
    args.push(host.to_string());
    args.push(command.to_string());
    args
}

/// Run `command` on `host` via SSH.
pub async fn execute_ssh(jump: Option<&str>, host: &str, command: &str) -> CommandOutcome {
    execute("ssh", ssh_args(jump, host, command)).await
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Wrap `command` such that it keeps running on the remote host after the SSH session closed.
pub fn detach(command: &str) -> String {
    format!("nohup sh -c {} >/dev/null 2>&1 &", shell_quote(command))
}
