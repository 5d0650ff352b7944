// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Command execution on local and remote hosts.
//!
//! Every step of a release or sync is a command issued to some host. This
//! module models such a command as an argument vector, never as a hand-built
//! shell string. Commands that need shell features, i.e., a working
//! directory, a pipe, or a redirection, are rendered into a shell line where
//! every word is quoted with POSIX single-quote rules before being handed to
//! `sh` or `ssh`.
//!
//! # Executors
//!
//! An [`Executor`] is the capability to run a [`Command`] somewhere. Callers
//! are generic over their executor, so it is picked statically:
//!
//! - [`LocalExecutor`] runs commands on the operator's machine.
//! - [`SshExecutor`] runs commands on a remote host through the `ssh` binary.
//! - [`HostExecutor`] is the tagged variant selected from an environment.
//!
//! Commands block the calling pipeline until they complete. There is no
//! cancellation and no timeout.

pub mod host;
pub mod local;
pub mod ssh;

#[cfg(test)]
pub(crate) mod fake;

pub use host::{Activity, Connect, Connector, HostExecutor};
pub use local::LocalExecutor;
pub use ssh::SshExecutor;

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
};

/// A single command to execute on some host.
///
/// Built through a small builder API. Arguments are kept as a vector until
/// the executor decides how to launch the command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    secrets: Vec<String>,
    cwd: Option<PathBuf>,
    sudo: bool,
    quiet: bool,
    stdin: Option<Vec<u8>>,
    stdout_file: Option<PathBuf>,
    pipe: Option<Box<Command>>,
}

impl Command {
    /// Construct new command for target program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Append a listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        self
    }

    /// Append a path argument.
    pub fn path_arg(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.arg(path)
    }

    /// Inject an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Inject an environment variable whose value is never displayed.
    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.secrets.push(key.clone());
        self.env(key, value)
    }

    /// Run command inside target working directory.
    pub fn current_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    /// Run command with elevated privileges through `sudo`.
    pub fn sudo(mut self, enabled: bool) -> Self {
        self.sudo = enabled;
        self
    }

    /// Suppress echoing of command and its output at normal log level.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Feed payload into standard input of command.
    pub fn stdin(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Redirect standard output of command (or of its pipeline) into a file.
    pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }

    /// Pipe standard output of this command into another command.
    ///
    /// Piping appends to the end of the existing pipeline.
    pub fn pipe(mut self, next: Command) -> Self {
        let tail = match self.pipe.take() {
            Some(stage) => (*stage).pipe(next),
            None => next,
        };
        self.pipe = Some(Box::new(tail));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn stdin_payload(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    pub(crate) fn is_sudo(&self) -> bool {
        self.sudo
    }

    pub(crate) fn environment(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Command can be launched without a shell.
    pub fn is_simple(&self) -> bool {
        self.cwd.is_none() && self.pipe.is_none() && self.stdout_file.is_none()
    }

    /// Iterate over every stage of pipeline starting with this command.
    pub fn stages(&self) -> impl Iterator<Item = &Command> {
        std::iter::successors(Some(self), |stage| stage.pipe.as_deref())
    }

    /// Render command into a shell line with every word quoted.
    pub fn to_shell_line(&self) -> String {
        self.render(false)
    }

    /// Render command into a shell line with injected secrets redacted.
    pub fn to_redacted_line(&self) -> String {
        self.render(true)
    }

    fn render(&self, redact: bool) -> String {
        let mut line = String::new();
        if let Some(cwd) = &self.cwd {
            line.push_str("cd ");
            line.push_str(&shell_quote(cwd.to_string_lossy().as_ref()));
            line.push_str(" && ");
        }

        let stages = self
            .stages()
            .map(|stage| stage.render_stage(redact))
            .collect::<Vec<_>>();
        line.push_str(&stages.join(" | "));

        if let Some(file) = self.stdout_file.as_ref() {
            line.push_str(" > ");
            line.push_str(&shell_quote(file.to_string_lossy().as_ref()));
        }

        line
    }

    fn render_stage(&self, redact: bool) -> String {
        let mut words = Vec::new();
        if self.sudo {
            words.push("sudo".to_string());
        }

        if !self.envs.is_empty() {
            words.push("env".to_string());
            for (key, value) in &self.envs {
                let value = if redact && self.secrets.contains(key) {
                    "***"
                } else {
                    value.as_str()
                };
                words.push(format!("{key}={}", shell_quote(value)));
            }
        }

        words.push(shell_quote(&self.program));
        words.extend(self.args.iter().map(|arg| shell_quote(arg)));
        words.join(" ")
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.to_redacted_line())
    }
}

/// Quote a word for POSIX shells.
///
/// Words made only of characters without special meaning are left alone to
/// keep logged command lines readable.
pub fn shell_quote(word: &str) -> String {
    let is_plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,@%+".contains(c));

    if is_plain {
        return word.to_string();
    }

    format!("'{}'", word.replace('\'', "'\\''"))
}

/// Captured result of an executed command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Output {
    /// Exit status, or `None` if process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    /// Construct output of a command that exited successfully.
    pub fn success_with(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Construct output of a command that exited with given status.
    pub fn failure_with(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Convert into trimmed standard output, or fail on non-zero exit.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::CommandFailed`] if command exited unsuccessfully.
    pub fn into_checked(self, host: &str, command: &Command) -> Result<String> {
        let output = self.check(host, command)?;

        // INVARIANT: Chomp trailing newlines.
        Ok(output.stdout.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Keep output as is, or fail on non-zero exit.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::CommandFailed`] if command exited unsuccessfully.
    pub fn check(self, host: &str, command: &Command) -> Result<Self> {
        if !self.success() {
            let message = if self.stderr.trim().is_empty() {
                self.stdout.trim().to_string()
            } else {
                self.stderr.trim().to_string()
            };

            return Err(ExecError::CommandFailed {
                host: host.to_string(),
                command: command.to_redacted_line(),
                status: self.status,
                message,
            });
        }

        Ok(self)
    }
}

/// Capability to execute commands on a host.
///
/// Implementors only provide [`Executor::execute`]. The other methods are
/// conveniences built on top of it.
#[allow(async_fn_in_trait)]
pub trait Executor {
    /// Label of host commands run on, used for logging and errors.
    fn host(&self) -> &str;

    /// Execute command and capture its output.
    ///
    /// Non-zero exit status is not an error here. Only failure to launch the
    /// command is.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if command cannot be launched.
    async fn execute(&self, command: &Command) -> Result<Output>;

    /// Execute command, and fail if it exits unsuccessfully.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if command cannot be launched.
    /// - Return [`ExecError::CommandFailed`] on non-zero exit status.
    async fn run(&self, command: &Command) -> Result<String> {
        let output = self.execute(command).await?;
        output.into_checked(self.host(), command)
    }

    /// Execute command as a predicate on its exit status.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if command cannot be launched.
    async fn probe(&self, command: &Command) -> Result<bool> {
        Ok(self.execute(command).await?.success())
    }

    /// Check whether a path exists on host.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if command cannot be launched.
    async fn exists(&self, path: &Path) -> Result<bool> {
        self.probe(&Command::new("test").arg("-e").path_arg(path).quiet())
            .await
    }

    /// Read file on host verbatim.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if command cannot be launched.
    /// - Return [`ExecError::CommandFailed`] if file cannot be read.
    async fn read(&self, path: &Path) -> Result<String> {
        let command = Command::new("cat").path_arg(path).quiet();
        let output = self.execute(&command).await?;
        Ok(output.check(self.host(), &command)?.stdout)
    }

    /// Write file on host, replacing existing content.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError::Spawn`] if command cannot be launched.
    /// - Return [`ExecError::CommandFailed`] if file cannot be written.
    async fn write(&self, path: &Path, contents: &str) -> Result<()> {
        let command = Command::new("cat")
            .stdin(contents)
            .stdout_file(path)
            .quiet();
        self.run(&command).await?;
        Ok(())
    }
}

/// Command execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Command could not be launched at all.
    #[error("failed to launch {command:?} on {host}")]
    Spawn {
        host: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Command ran but exited unsuccessfully.
    #[error("command `{command}` failed on {host} with status {}:\n{message}", display_status(.status))]
    CommandFailed {
        host: String,
        command: String,
        status: Option<i32>,
        message: String,
    },
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "<signal>".to_string(),
    }
}

/// Friendly result alias :3
pub type Result<T, E = ExecError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("plain", "plain"; "plain word")]
    #[test_case("/vol/main/site", "/vol/main/site"; "absolute path")]
    #[test_case("two words", "'two words'"; "whitespace")]
    #[test_case("it's", "'it'\\''s'"; "single quote")]
    #[test_case("$(rm -rf /)", "'$(rm -rf /)'"; "substitution")]
    #[test_case("", "''"; "empty")]
    #[test]
    fn shell_quote_words(word: &str, expect: &str) {
        pretty_assertions::assert_eq!(shell_quote(word), expect);
    }

    #[test]
    fn render_pipeline_with_directory_and_redirect() {
        let command = Command::new("mysqldump")
            .secret_env("MYSQL_PWD", "hunter2")
            .env("TZ", "UTC")
            .args(["-u", "foo_user", "foo"])
            .current_dir("/vol/site")
            .pipe(Command::new("gzip"))
            .stdout_file("/tmp/dump.sql.gz");

        assert_eq!(
            command.to_shell_line(),
            "cd /vol/site && env MYSQL_PWD=hunter2 TZ=UTC mysqldump -u foo_user foo | gzip > /tmp/dump.sql.gz"
        );
        assert_eq!(
            command.to_string(),
            "cd /vol/site && env MYSQL_PWD='***' TZ=UTC mysqldump -u foo_user foo | gzip > /tmp/dump.sql.gz"
        );
        assert!(!command.is_simple());
    }

    #[test]
    fn pipe_appends_to_end_of_pipeline() {
        let command = Command::new("a")
            .pipe(Command::new("b"))
            .pipe(Command::new("c"));
        let programs = command.stages().map(Command::program).collect::<Vec<_>>();
        assert_eq!(programs, vec!["a", "b", "c"]);
    }

    #[test]
    fn sudo_prefix_only_on_its_stage() {
        let command = Command::new("chmod").sudo(true).args(["-R", "2770", "files"]);
        assert_eq!(command.to_shell_line(), "sudo chmod -R 2770 files");
        assert!(command.is_simple());
    }

    #[test]
    fn failed_output_reports_stderr() {
        let command = Command::new("git").args(["fetch"]);
        let result = Output::failure_with(128, "fatal: no remote\n").into_checked("qa", &command);
        match result {
            Err(ExecError::CommandFailed {
                host,
                command,
                status,
                message,
            }) => {
                assert_eq!(host, "qa");
                assert_eq!(command, "git fetch");
                assert_eq!(status, Some(128));
                assert_eq!(message, "fatal: no remote");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn successful_output_chomps_newlines() -> anyhow::Result<()> {
        let stdout = Output::success_with("abc123\n").into_checked("qa", &Command::new("x"))?;
        assert_eq!(stdout, "abc123");
        Ok(())
    }
}
