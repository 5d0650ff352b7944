// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Blob store relay through the AWS command line client.
//!
//! Files and database dumps travel between environments through an S3
//! bucket. Every operation is an `aws s3` invocation issued on whichever
//! host holds the data, so credentials stay on the hosts that already have
//! them.
//!
//! Keys of a source environment live under `<namespace>.<environment>/`:
//!
//! ```text
//! s3://<bucket>/<namespace>.<environment>/files/...
//! s3://<bucket>/<namespace>.<environment>/db/<namespace>.<environment>.<YYYY-MM-DD>.sql.gz
//! ```

use crate::{
    config::{ConfigError, Environment},
    exec::{Command, Executor, Result},
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::path::Path;
use tracing::{debug, instrument};

/// Object listed under a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Name relative to listed prefix.
    pub name: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// Bucket reached through `aws s3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobStore {
    bucket: String,
    region: String,
}

impl BlobStore {
    /// Construct blob store from bucket name, with or without `s3://`.
    pub fn new(bucket: impl AsRef<str>, region: impl Into<String>) -> Self {
        let bucket = bucket.as_ref();
        let bucket = bucket.strip_prefix("s3://").unwrap_or(bucket);
        Self {
            bucket: bucket.trim_end_matches('/').to_string(),
            region: region.into(),
        }
    }

    /// Blob store holding the keys of environment.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingKey`] if `s3_bucket` is missing.
    pub fn for_environment(environment: &Environment) -> Result<Self, ConfigError> {
        Ok(Self::new(environment.s3_bucket()?, environment.s3_region()))
    }

    /// Full URL of key.
    pub fn url(&self, key: &str) -> String {
        format!("s3://{}/{key}", self.bucket)
    }

    fn aws(&self) -> Command {
        Command::new("aws")
            .arg(format!("--region={}", self.region))
            .arg("s3")
    }

    /// Mirror local directory into prefix, transferring only differences.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if transfer fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn sync_up<E: Executor>(&self, executor: &E, local: &Path, prefix: &str) -> Result<()> {
        executor
            .run(
                &self
                    .aws()
                    .arg("sync")
                    .path_arg(local)
                    .arg(self.url(prefix)),
            )
            .await?;
        Ok(())
    }

    /// Mirror prefix into local directory, transferring only differences.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if transfer fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn sync_down<E: Executor>(&self, executor: &E, prefix: &str, local: &Path) -> Result<()> {
        executor
            .run(
                &self
                    .aws()
                    .arg("sync")
                    .arg(self.url(prefix))
                    .path_arg(local),
            )
            .await?;
        Ok(())
    }

    /// List objects directly under prefix.
    ///
    /// An empty or missing prefix lists nothing.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if listing fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn list<E: Executor>(&self, executor: &E, prefix: &str) -> Result<Vec<ObjectEntry>> {
        // INVARIANT: `aws s3 ls` prints times in the host's zone, pin it to UTC.
        let command = self
            .aws()
            .env("TZ", "UTC")
            .arg("ls")
            .arg(self.url(prefix))
            .quiet();
        let output = executor.execute(&command).await?;

        // INVARIANT: `aws s3 ls` exits with 1 when nothing matches.
        if output.status == Some(1) && output.stdout.trim().is_empty() {
            debug!("nothing stored under {prefix}");
            return Ok(Vec::new());
        }

        let output = output.check(executor.host(), &command)?;
        Ok(parse_listing(&output.stdout))
    }

    /// Upload single file to key.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if upload fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn put<E: Executor>(&self, executor: &E, local: &Path, key: &str) -> Result<()> {
        executor
            .run(&self.aws().arg("cp").path_arg(local).arg(self.url(key)))
            .await?;
        Ok(())
    }

    /// Download single key into file.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if download fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn get<E: Executor>(&self, executor: &E, key: &str, local: &Path) -> Result<()> {
        executor
            .run(&self.aws().arg("cp").arg(self.url(key)).path_arg(local))
            .await?;
        Ok(())
    }
}

/// Prefix holding keys of environment.
///
/// # Errors
///
/// - Return [`ConfigError::MissingKey`] if `s3_namespace` is missing.
pub fn environment_prefix(environment: &Environment) -> Result<String, ConfigError> {
    Ok(format!(
        "{}.{}",
        environment.s3_namespace()?,
        environment.name()
    ))
}

/// Prefix shared files of environment are relayed through.
///
/// # Errors
///
/// - Return [`ConfigError::MissingKey`] if `s3_namespace` is missing.
pub fn files_prefix(environment: &Environment) -> Result<String, ConfigError> {
    Ok(format!("{}/files/", environment_prefix(environment)?))
}

/// Prefix database dumps of environment are stored under.
///
/// # Errors
///
/// - Return [`ConfigError::MissingKey`] if `s3_namespace` is missing.
pub fn dumps_prefix(environment: &Environment) -> Result<String, ConfigError> {
    Ok(format!("{}/db/", environment_prefix(environment)?))
}

/// File name of environment's dump taken on date.
///
/// # Errors
///
/// - Return [`ConfigError::MissingKey`] if `s3_namespace` is missing.
pub fn dump_name(environment: &Environment, date: NaiveDate) -> Result<String, ConfigError> {
    Ok(format!(
        "{}.{}.sql.gz",
        environment_prefix(environment)?,
        date.format("%Y-%m-%d")
    ))
}

/// Parse `aws s3 ls` output.
///
/// Object lines read `<date> <time> <size> <name>`, with times in UTC as
/// [`BlobStore::list`] requests them. Common prefix lines, i.e.,
/// `PRE <name>/`, are skipped.
pub fn parse_listing(listing: &str) -> Vec<ObjectEntry> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let date = fields.next()?;
            let time = fields.next()?;
            let size = fields.next()?.parse::<u64>().ok()?;
            let name = fields.collect::<Vec<_>>().join(" ");
            if name.is_empty() {
                return None;
            }

            let last_modified =
                NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
                    .ok()?
                    .and_utc();

            Some(ObjectEntry {
                name,
                last_modified,
                size,
            })
        })
        .collect()
}
