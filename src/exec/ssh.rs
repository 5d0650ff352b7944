// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Execution on remote hosts over SSH.
//!
//! The transport itself is delegated to the system `ssh` binary, so user SSH
//! configuration, agents, and jump hosts all keep working. Remote shells
//! always receive a fully quoted shell line.

use crate::exec::{local::capture, Activity, Command, Executor, Output, Result};

use tokio::process::Command as Process;

/// Run commands on a remote host through `ssh`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    destination: String,
    options: Vec<String>,
    activity: Activity,
}

impl SshExecutor {
    /// Construct new SSH executor for destination, e.g., `user@host`.
    pub fn new(destination: impl Into<String>, activity: Activity) -> Self {
        Self {
            destination: destination.into(),
            options: Vec::new(),
            activity,
        }
    }

    /// Pass extra options to `ssh` before the destination.
    pub fn with_options(mut self, options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options.extend(options.into_iter().map(Into::into));
        self
    }

    /// Argument vector handed to `ssh` for target command.
    ///
    /// Options end with `--`, so a shell line starting with a dash is never
    /// taken for one.
    pub fn ssh_args(&self, command: &Command) -> Vec<String> {
        let mut args = self.options.clone();
        args.push(self.destination.clone());
        args.push("--".to_string());
        args.push(command.to_shell_line());
        args
    }
}

impl Executor for SshExecutor {
    fn host(&self) -> &str {
        &self.destination
    }

    async fn execute(&self, command: &Command) -> Result<Output> {
        let mut process = Process::new("ssh");
        process.args(self.ssh_args(command));
        capture(self.host(), command, process, &self.activity).await
    }
}
