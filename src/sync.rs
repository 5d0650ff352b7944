// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Cross-environment synchronization.
//!
//! Move shared files and databases from one environment into another, e.g.,
//! pull production content down into QA, or into the operator's own machine.
//!
//! # Files
//!
//! By default files are relayed through the blob store. The source pushes
//! its files directory up with `aws s3 sync`, then the destination pulls it
//! down, so only differences travel. Alternatively files go host to host
//! through `rsync` over SSH.
//!
//! # Databases
//!
//! Database syncs take a dump of the source, store it in the blob store, and
//! import it into the destination. Dumps younger than the source's freshness
//! window are offered for reuse instead of taking another one. Importing
//! drops every table of the destination first. Dropping and importing are two
//! separate steps, so an import failing after the drop leaves the
//! destination database empty.
//!
//! # Guards
//!
//! Syncing an environment into itself is refused, and so is taking a
//! database from `local`. Writing into `production` needs confirmation. All
//! guards are checked before any command is issued.

pub mod blob;
pub mod database;

pub use blob::{BlobStore, ObjectEntry};
pub use database::MySql;

use crate::{
    config::{ConfigError, Environment},
    exec::{Command, Connect, ExecError, Executor},
    prompt::{PromptError, Prompter},
};

use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// How files travel between environments.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Relay through the blob store.
    #[default]
    BlobStore,

    /// Copy host to host with `rsync` over SSH.
    Direct,
}

/// Result of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,

    /// Operator declined a confirmation. Nothing was changed.
    Declined,
}

/// Synchronize files and databases between environments.
pub struct SyncEngine<'a, C: Connect> {
    connector: &'a C,
    prompter: &'a dyn Prompter,
    clock: fn() -> DateTime<Utc>,
}

impl<'a, C: Connect> SyncEngine<'a, C> {
    pub fn new(connector: &'a C, prompter: &'a dyn Prompter) -> Self {
        Self {
            connector,
            prompter,
            clock: Utc::now,
        }
    }

    /// Use another source of time for dump dates and freshness.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Sync shared files of source into destination.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::GuardViolation`] if source is destination.
    /// - Return [`SyncError::Config`] if either environment lacks a key.
    /// - Return [`SyncError::Exec`] if a transfer fails.
    #[instrument(skip(self, source, destination), level = "debug")]
    pub async fn files(
        &self,
        source: &Environment,
        destination: &Environment,
        transport: Transport,
    ) -> Result<SyncOutcome> {
        guard_distinct(source, destination)?;
        let source_files = files_location(source)?;
        let destination_files = files_location(destination)?;

        if !self.confirm_production(destination, "files")? {
            return Ok(SyncOutcome::Declined);
        }

        let destination_executor = self.connector.connect(destination);
        destination_executor
            .run(
                &Command::new("mkdir")
                    .arg("-p")
                    .path_arg(&destination_files)
                    .quiet(),
            )
            .await?;

        match transport {
            Transport::BlobStore => {
                let store = BlobStore::for_environment(source)?;
                let prefix = blob::files_prefix(source)?;

                info!("push {} files to {}", source.name(), store.url(&prefix));
                let source_executor = self.connector.connect(source);
                store
                    .sync_up(&source_executor, &source_files, &prefix)
                    .await?;

                info!("pull {} files into {}", source.name(), destination.name());
                store
                    .sync_down(&destination_executor, &prefix, &destination_files)
                    .await?;
            }
            Transport::Direct => {
                info!("copy {} files into {}", source.name(), destination.name());
                let command = rsync_command(source, &source_files, destination, &destination_files);
                match source.primary_host() {
                    Some(_) => destination_executor.run(&command).await?,
                    None => self.connector.connect(source).run(&command).await?,
                };
            }
        }

        info!("files synced to {}", destination_files.display());
        Ok(SyncOutcome::Completed)
    }

    /// Sync database of source into destination.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::GuardViolation`] if source is `local`, or is
    ///   destination.
    /// - Return [`SyncError::Config`] if either environment lacks a key.
    /// - Return [`SyncError::Exec`] if dumping, transferring, or importing
    ///   fails.
    #[instrument(skip(self, source, destination), level = "debug")]
    pub async fn db(&self, source: &Environment, destination: &Environment) -> Result<SyncOutcome> {
        if source.is_local() {
            return Err(SyncError::GuardViolation(
                "cannot sync database from local, it has no reliable dump origin".into(),
            ));
        }
        guard_distinct(source, destination)?;

        let store = BlobStore::for_environment(source)?;
        let prefix = blob::dumps_prefix(source)?;
        let source_database = MySql::for_environment(source)?;
        let destination_database = MySql::for_environment(destination)?;

        if !self.confirm_production(destination, "database")? {
            return Ok(SyncOutcome::Declined);
        }

        let source_executor = self.connector.connect(source);
        let key = match self.fresh_dump(&store, &source_executor, source, &prefix).await? {
            Some(key) => key,
            None => {
                self.create_dump(&store, &source_executor, source, &source_database, &prefix)
                    .await?
            }
        };

        let destination_executor = self.connector.connect(destination);
        let local_dump = temporary_path(&key);
        store.get(&destination_executor, &key, &local_dump).await?;

        let imported = async {
            destination_database
                .verify(&destination_executor, &local_dump)
                .await?;
            destination_database
                .drop_tables(&destination_executor)
                .await?;
            destination_database
                .import(&destination_executor, &local_dump)
                .await
        }
        .await;
        remove_file(&destination_executor, &local_dump).await?;
        imported?;

        info!(
            "database {} synced into {}",
            source_database.database(),
            destination.name()
        );
        Ok(SyncOutcome::Completed)
    }

    /// Newest dump within source's freshness window the operator accepts.
    async fn fresh_dump<E: Executor>(
        &self,
        store: &BlobStore,
        executor: &E,
        source: &Environment,
        prefix: &str,
    ) -> Result<Option<String>> {
        let window = Duration::days(i64::from(source.dump_freshness_days()));
        let cutoff = (self.clock)() - window;
        let newest = store
            .list(executor, prefix)
            .await?
            .into_iter()
            .filter(|entry| entry.name.ends_with(".sql.gz"))
            .filter(|entry| entry.last_modified >= cutoff)
            .max_by_key(|entry| entry.last_modified);

        let Some(entry) = newest else {
            info!("no dump of {} younger than {} days", source.name(), window.num_days());
            return Ok(None);
        };

        let message = format!(
            "Use existing dump {} from {}?",
            entry.name,
            entry.last_modified.format("%Y-%m-%d %H:%M UTC")
        );
        if !self.prompter.confirm(&message, true)? {
            return Ok(None);
        }

        info!("reuse dump {}", entry.name);
        Ok(Some(format!("{prefix}{}", entry.name)))
    }

    /// Dump source database into blob store, returning its key.
    async fn create_dump<E: Executor>(
        &self,
        store: &BlobStore,
        executor: &E,
        source: &Environment,
        database: &MySql,
        prefix: &str,
    ) -> Result<String> {
        let name = blob::dump_name(source, (self.clock)().date_naive())?;
        let key = format!("{prefix}{name}");
        let local_dump = temporary_path(&key);

        database.dump(executor, &local_dump).await?;
        let uploaded = store.put(executor, &local_dump, &key).await;
        remove_file(executor, &local_dump).await?;
        uploaded?;

        Ok(key)
    }

    fn confirm_production(&self, destination: &Environment, what: &str) -> Result<bool> {
        if !destination.is_production() {
            return Ok(true);
        }

        let message = format!("Really overwrite the {what} of production?");
        if self.prompter.confirm(&message, false)? {
            return Ok(true);
        }

        info!("sync into production declined");
        Ok(false)
    }
}

fn guard_distinct(source: &Environment, destination: &Environment) -> Result<()> {
    if source.name() == destination.name() {
        return Err(SyncError::GuardViolation(format!(
            "cannot sync {} into itself",
            source.name()
        )));
    }

    Ok(())
}

/// Shared files directory of environment on its own host.
///
/// Relative `files_path` values are resolved against the site path on
/// remote hosts, and against the project root on the operator's machine.
///
/// # Errors
///
/// - Return [`ConfigError::MissingKey`] if `files_path` is missing, or if a
///   remote environment lacks `site_path`.
pub fn files_location(environment: &Environment) -> Result<PathBuf, ConfigError> {
    let files = environment.files_path()?;
    match environment.primary_host() {
        Some(_) => Ok(environment.site_path()?.join(files)),
        None => Ok(environment.project_root().join(files)),
    }
}

fn rsync_command(
    source: &Environment,
    source_files: &Path,
    destination: &Environment,
    destination_files: &Path,
) -> Command {
    let endpoint = |path: &Path, host: Option<&str>| {
        let path = format!("{}/", path.display().to_string().trim_end_matches('/'));
        match host {
            Some(host) => format!("{host}:{path}"),
            None => path,
        }
    };

    // INVARIANT: Runs on the destination when source is remote, otherwise
    // on the operator's machine. Only the far end is addressed by host.
    let (from, to, ssh_options) = match source.primary_host() {
        Some(host) => (
            endpoint(source_files, Some(host)),
            endpoint(destination_files, None),
            source.ssh_options(),
        ),
        None => (
            endpoint(source_files, None),
            endpoint(destination_files, destination.primary_host()),
            destination.ssh_options(),
        ),
    };

    let rsh = std::iter::once("ssh".to_string())
        .chain(ssh_options)
        .collect::<Vec<_>>()
        .join(" ");

    Command::new("rsync")
        .args(["--human-readable", "--archive", "--backup", "--compress"])
        .arg(format!("--rsh={rsh}"))
        .args(["--exclude=css", "--exclude=js", "--exclude=styles"])
        .arg(from)
        .arg(to)
}

fn temporary_path(key: &str) -> PathBuf {
    let name = key.rsplit('/').next().unwrap_or(key);
    Path::new("/tmp").join(name)
}

async fn remove_file<E: Executor>(executor: &E, path: &Path) -> Result<()> {
    executor
        .run(&Command::new("rm").arg("-f").path_arg(path).quiet())
        .await?;
    Ok(())
}

/// Sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Source and destination may not be combined this way.
    #[error("refusing to sync: {0}")]
    GuardViolation(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;
