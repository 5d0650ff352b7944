// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment log.
//!
//! Every successful release appends one line to `DEPLOYMENTS` at the root of
//! the site:
//!
//! ```text
//! 2025.03.14 at 09:26:53UTC by jason: 3f786850e387550fdab836ed7e6dc881de23001b
//! ```
//!
//! The file stays read-only between appends. Its write bit is raised only
//! for the duration of a single append. This is not a lock, so concurrent
//! appends from two operators may still interleave.

use crate::exec::{Command, ExecError, Executor};

use chrono::{DateTime, NaiveDateTime, Utc};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{info, instrument, warn};

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d at %H:%M:%SUTC";

/// Single line of the deployment log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub reference: String,
}

impl DeploymentLogEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        actor: impl Into<String>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            actor: actor.into(),
            reference: reference.into(),
        }
    }
}

impl Display for DeploymentLogEntry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} by {}: {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.actor,
            self.reference
        )
    }
}

impl FromStr for DeploymentLogEntry {
    type Err = HistoryError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || HistoryError::MalformedEntry(line.to_string());

        let (stamp, rest) = line.split_once(" by ").ok_or_else(malformed)?;
        let (actor, reference) = rest.split_once(": ").ok_or_else(malformed)?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|_| malformed())?
            .and_utc();

        Ok(Self::new(timestamp, actor, reference.trim_end()))
    }
}

/// Deployment log file of a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentLog {
    path: PathBuf,
}

impl DeploymentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append entry to log, creating the log first if absent.
    ///
    /// The log is set read-only again even when the append itself fails.
    ///
    /// # Errors
    ///
    /// - Return [`HistoryError::Exec`] if any command fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn append<E: Executor>(&self, executor: &E, entry: &DeploymentLogEntry) -> Result<()> {
        info!("log deployment of {}", entry.reference);

        if !executor.exists(&self.path).await? {
            info!("no deployment log found, creating one");
            executor
                .run(&Command::new("touch").path_arg(&self.path).quiet())
                .await?;
        }

        executor
            .run(&Command::new("chmod").arg("u+w").path_arg(&self.path).quiet())
            .await?;

        let appended = executor
            .run(
                &Command::new("tee")
                    .arg("-a")
                    .path_arg(&self.path)
                    .stdin(format!("{entry}\n"))
                    .stdout_file("/dev/null")
                    .quiet(),
            )
            .await;

        executor
            .run(&Command::new("chmod").arg("u-w").path_arg(&self.path).quiet())
            .await?;

        appended?;
        Ok(())
    }

    /// Read every entry of log.
    ///
    /// A missing log reads as empty. Lines that do not parse are skipped with
    /// a warning, so one hand-edited line does not hide the others.
    ///
    /// # Errors
    ///
    /// - Return [`HistoryError::Exec`] if log exists but cannot be read.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn read<E: Executor>(&self, executor: &E) -> Result<Vec<DeploymentLogEntry>> {
        if !executor.exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let content = executor.read(&self.path).await?;
        let entries = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match line.parse::<DeploymentLogEntry>() {
                Ok(entry) => Some(entry),
                Err(error) => {
                    warn!("{error}");
                    None
                }
            })
            .collect();

        Ok(entries)
    }
}

/// Name of the operator running the current process.
///
/// Taken from `USER`, then `LOGNAME`, falling back to "unknown".
pub fn current_actor() -> String {
    ["USER", "LOGNAME"]
        .into_iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".into())
}

/// Deployment log error types.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Line is not a deployment log entry.
    #[error("malformed deployment log entry {0:?}")]
    MalformedEntry(String),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Friendly result alias :3
type Result<T, E = HistoryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{fake::FakeExecutor, Output};
    use chrono::TimeZone;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn entry() -> DeploymentLogEntry {
        let timestamp = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        DeploymentLogEntry::new(timestamp, "jason", "abc123")
    }

    #[test]
    fn entry_display_format() {
        assert_eq!(
            entry().to_string(),
            "2025.03.14 at 09:26:53UTC by jason: abc123"
        );
    }

    #[test]
    fn entry_parses_back() -> anyhow::Result<()> {
        let line = "2025.03.14 at 09:26:53UTC by jason: abc123";
        assert_eq!(line.parse::<DeploymentLogEntry>()?, entry());
        Ok(())
    }

    #[test]
    fn garbage_is_not_an_entry() {
        let result = "deployed something yesterday".parse::<DeploymentLogEntry>();
        assert!(matches!(result, Err(HistoryError::MalformedEntry(_))));
    }

    #[tokio::test]
    async fn append_creates_log_and_toggles_write_bit() -> anyhow::Result<()> {
        let executor = FakeExecutor::new("qa.example.com");
        executor.respond("test -e", Output::failure_with(1, ""));

        let log = DeploymentLog::new("/srv/site/DEPLOYMENTS");
        log.append(&executor, &entry()).await?;

        let expect = vec![
            "test -e /srv/site/DEPLOYMENTS".to_string(),
            "touch /srv/site/DEPLOYMENTS".to_string(),
            "chmod u+w /srv/site/DEPLOYMENTS".to_string(),
            "tee -a /srv/site/DEPLOYMENTS > /dev/null".to_string(),
            "chmod u-w /srv/site/DEPLOYMENTS".to_string(),
        ];
        assert_eq!(executor.lines(), expect);

        let appended = executor.records()[3].stdin.clone();
        assert_eq!(
            appended.as_deref(),
            Some("2025.03.14 at 09:26:53UTC by jason: abc123\n")
        );

        Ok(())
    }

    #[tokio::test]
    async fn failed_append_still_relocks_log() {
        let executor = FakeExecutor::new("qa.example.com");
        executor.respond("tee -a", Output::failure_with(1, "disk full"));

        let log = DeploymentLog::new("/srv/site/DEPLOYMENTS");
        let result = log.append(&executor, &entry()).await;

        assert!(matches!(result, Err(HistoryError::Exec(_))));
        assert!(!executor.ran("touch"));
        assert_eq!(
            executor.lines().last().map(String::as_str),
            Some("chmod u-w /srv/site/DEPLOYMENTS")
        );
    }

    #[tokio::test]
    async fn read_skips_malformed_lines() -> anyhow::Result<()> {
        let executor = FakeExecutor::new("qa.example.com");
        executor.respond(
            "cat /srv/site/DEPLOYMENTS",
            Output::success_with(indoc! {"
                2025.03.14 at 09:26:53UTC by jason: abc123
                hand written note

                2025.03.15 at 10:00:00UTC by ana: def456
            "}),
        );

        let entries = DeploymentLog::new("/srv/site/DEPLOYMENTS")
            .read(&executor)
            .await?;

        let refs = entries
            .iter()
            .map(|entry| entry.reference.as_str())
            .collect::<Vec<_>>();
        assert_eq!(refs, vec!["abc123", "def456"]);

        Ok(())
    }

    #[sealed_test(env = [("USER", "ana"), ("LOGNAME", "ignored")])]
    fn actor_comes_from_user() {
        assert_eq!(current_actor(), "ana");
    }
}
