// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control backends.
//!
//! Every site host keeps a mirror of the source repository at
//! `private/repo`. Releasing a ref takes two steps against that mirror:
//!
//! 1. __Resolve__ the human readable ref, e.g., a branch or tag, into the
//!    canonical revision id after updating the mirror from its remote.
//! 2. __Materialize__ the revision into a fresh changeset directory without
//!    touching the mirror's own working tree, then strip version control
//!    metadata from the copy.
//!
//! Git and Mercurial are supported. The backend is selected per environment
//! through the `repo_type` key.

use crate::exec::{Command, Executor};

use git2::{Oid, Reference};
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};
use tracing::{debug, info, instrument};

/// Version control backend of a site repository.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Vcs {
    #[default]
    #[serde(rename = "git")]
    Git,

    #[serde(rename = "hg")]
    Mercurial,
}

impl Vcs {
    /// Name of the backend's binary.
    pub fn program(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Mercurial => "hg",
        }
    }

    /// Check that ref is safe and well-formed before sending it anywhere.
    ///
    /// Git refs must be valid reference names or hexadecimal object ids.
    /// Mercurial refs are limited to names made of word characters, dots,
    /// slashes, plus signs, and dashes.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::InvalidRef`] if ref is malformed.
    pub fn validate_ref(self, reference: &str) -> Result<()> {
        let invalid = || VcsError::InvalidRef {
            reference: reference.to_string(),
        };

        if reference.is_empty() || reference.starts_with('-') {
            return Err(invalid());
        }

        let valid = match self {
            Self::Git => {
                Oid::from_str(reference).is_ok()
                    || Reference::is_valid_name(&format!("refs/heads/{reference}"))
            }
            Self::Mercurial => reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "_./+-".contains(c)),
        };

        if !valid {
            return Err(invalid());
        }

        Ok(())
    }

    /// Resolve ref into canonical revision id in mirror repository.
    ///
    /// Updates the mirror from its remote first. Git refs are tried as a
    /// remote tracking branch before being tried as given, so branch names
    /// always resolve to what the remote has.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::InvalidRef`] if ref is malformed. No command is
    ///   issued in this case.
    /// - Return [`VcsError::RefNotFound`] if ref does not exist.
    /// - Return [`VcsError::Exec`] if mirror cannot be updated.
    #[instrument(skip(self, executor, mirror), level = "debug")]
    pub async fn resolve_ref<E: Executor>(
        self,
        executor: &E,
        mirror: &Path,
        reference: &str,
    ) -> Result<String> {
        self.validate_ref(reference)?;
        info!("ensure {reference} exists in {}", executor.host());

        match self {
            Self::Git => {
                executor
                    .run(
                        &Command::new("git")
                            .args(["fetch", "--quiet", "--tags"])
                            .current_dir(mirror),
                    )
                    .await?;

                for candidate in [format!("origin/{reference}"), reference.to_string()] {
                    let output = executor
                        .execute(
                            &Command::new("git")
                                .args(["rev-parse", "--verify", "--quiet"])
                                .arg(format!("{candidate}^{{commit}}"))
                                .current_dir(mirror)
                                .quiet(),
                        )
                        .await?;

                    if output.success() {
                        let id = output.stdout.trim();
                        debug!("{candidate} resolved to {id}");
                        return Oid::from_str(id)
                            .map(|oid| oid.to_string())
                            .map_err(|_| VcsError::UnexpectedId(id.to_string()));
                    }
                }
            }
            Self::Mercurial => {
                executor
                    .run(
                        &Command::new("hg")
                            .args(["pull", "--quiet"])
                            .current_dir(mirror),
                    )
                    .await?;

                let output = executor
                    .execute(
                        &Command::new("hg")
                            .args(["identify", "--id", "-r", reference])
                            .current_dir(mirror)
                            .quiet(),
                    )
                    .await?;

                if output.success() {
                    let id = output.stdout.trim().trim_end_matches('+');
                    if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
                        return Err(VcsError::UnexpectedId(id.to_string()));
                    }

                    return Ok(id.to_string());
                }
            }
        }

        Err(VcsError::RefNotFound {
            reference: reference.to_string(),
            host: executor.host().to_string(),
        })
    }

    /// Materialize revision into destination directory.
    ///
    /// The destination must not exist yet. Version control metadata is
    /// removed from the result.
    ///
    /// # Errors
    ///
    /// - Return [`VcsError::Exec`] if any command fails.
    #[instrument(skip(self, executor, mirror, destination), level = "debug")]
    pub async fn materialize<E: Executor>(
        self,
        executor: &E,
        mirror: &Path,
        id: &str,
        destination: &Path,
    ) -> Result<()> {
        info!("prepare {id} for deployment");

        match self {
            Self::Git => {
                executor
                    .run(
                        &Command::new("git")
                            .args(["clone", "--quiet", "--shared", "--no-checkout"])
                            .path_arg(mirror)
                            .path_arg(destination),
                    )
                    .await?;
                executor
                    .run(
                        &Command::new("git")
                            .args(["checkout", "--quiet", "--detach", id])
                            .current_dir(destination),
                    )
                    .await?;
                executor
                    .run(
                        &Command::new("git")
                            .args(["submodule", "--quiet", "update", "--init", "--recursive"])
                            .current_dir(destination),
                    )
                    .await?;
            }
            Self::Mercurial => {
                executor
                    .run(
                        &Command::new("hg")
                            .args(["archive", "--rev", id])
                            .path_arg(destination)
                            .current_dir(mirror),
                    )
                    .await?;
            }
        }

        executor.run(&self.strip_metadata(destination)).await?;

        Ok(())
    }

    /// Command cloning repository into a new mirror.
    pub fn clone_command(self, url: &str, destination: &Path) -> Command {
        Command::new(self.program())
            .args(["clone", "--quiet", url])
            .path_arg(destination)
    }

    /// Command removing version control metadata from a materialized tree.
    ///
    /// Everything matching `.git*` or `.hg*` at the top of the tree goes,
    /// e.g., `.gitignore` or `.hgtags`, along with nested `.git` entries
    /// that submodules leave behind. Ignore files deeper in the tree belong
    /// to the site and stay.
    fn strip_metadata(self, destination: &Path) -> Command {
        let name = match self {
            Self::Git => ".git",
            Self::Mercurial => ".hg",
        };

        Command::new("find")
            .path_arg(destination)
            .args(["(", "-name", name, "-o", "-path"])
            .path_arg(destination.join(format!("{name}*")))
            .args([")", "-prune", "-exec", "rm", "-rf", "{}", "+"])
            .quiet()
    }
}

impl Display for Vcs {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.program())
    }
}

/// Version control error types.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// Ref does not resolve on the mirror.
    #[error("commit {reference:?} does not exist on {host}")]
    RefNotFound { reference: String, host: String },

    /// Ref is malformed, and was never sent to a host.
    #[error("{reference:?} is not a valid ref")]
    InvalidRef { reference: String },

    /// Backend printed something that is not a revision id.
    #[error("unexpected revision id {0:?}")]
    UnexpectedId(String),

    #[error(transparent)]
    Exec(#[from] crate::exec::ExecError),
}

/// Friendly result alias :3
type Result<T, E = VcsError> = std::result::Result<T, E>;
