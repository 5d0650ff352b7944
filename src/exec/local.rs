// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Execution on the operator's machine.

use crate::exec::{Activity, Command, ExecError, Executor, Output, Result};

use std::process::Stdio;
use tokio::{io::AsyncWriteExt, process::Command as Process};
use tracing::debug;

/// Run commands on the local machine.
///
/// Simple commands are launched directly from their argument vector. Commands
/// that need a working directory, pipe, redirection, or privilege escalation
/// go through `sh -c` with a fully quoted shell line.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    activity: Activity,
}

impl LocalExecutor {
    /// Construct new local executor.
    pub fn new(activity: Activity) -> Self {
        Self { activity }
    }
}

impl Executor for LocalExecutor {
    fn host(&self) -> &str {
        "local"
    }

    async fn execute(&self, command: &Command) -> Result<Output> {
        let process = if command.is_simple() && !command.is_sudo() {
            let mut process = Process::new(command.program());
            process.args(command.arguments());
            process.envs(command.environment().iter().cloned());
            process
        } else {
            let mut process = Process::new("sh");
            process.arg("-c").arg(command.to_shell_line());
            process
        };

        capture(self.host(), command, process, &self.activity).await
    }
}

/// Launch process, feed its standard input, and capture its output.
pub(crate) async fn capture(
    host: &str,
    command: &Command,
    mut process: Process,
    activity: &Activity,
) -> Result<Output> {
    let spawn_error = |source| ExecError::Spawn {
        host: host.to_string(),
        command: command.to_redacted_line(),
        source,
    };

    let stdin = match command.stdin_payload() {
        Some(_) => Stdio::piped(),
        None => Stdio::null(),
    };
    process.stdin(stdin).stdout(Stdio::piped()).stderr(Stdio::piped());

    let spinner = activity.start(host, command);
    let mut child = process.spawn().map_err(spawn_error)?;

    // INVARIANT: Feed stdin concurrently so a chatty child cannot deadlock us.
    let feeder = match (child.stdin.take(), command.stdin_payload()) {
        (Some(mut pipe), Some(payload)) => {
            let payload = payload.to_vec();
            Some(tokio::spawn(async move {
                pipe.write_all(&payload).await?;
                pipe.shutdown().await
            }))
        }
        _ => None,
    };

    let output = child.wait_with_output().await.map_err(spawn_error)?;
    spinner.finish_and_clear();

    if let Some(feeder) = feeder {
        match feeder.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => debug!("stdin of {command} closed early: {error}"),
            Err(error) => debug!("stdin feeder of {command} aborted: {error}"),
        }
    }

    let output = Output {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(output.stdout.as_slice()).into_owned(),
        stderr: String::from_utf8_lossy(output.stderr.as_slice()).into_owned(),
    };

    if !output.stdout.trim().is_empty() {
        debug!("[{host}] stdout: {}", output.stdout.trim_end());
    }

    if !output.stderr.trim().is_empty() {
        debug!("[{host}] stderr: {}", output.stderr.trim_end());
    }

    Ok(output)
}
