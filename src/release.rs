// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release management.
//!
//! Release a ref of the site repository to the hosts of an environment.
//!
//! # Pipeline
//!
//! Deploying goes through the following stages strictly in order. Any stage
//! failing aborts the rest:
//!
//! 1. __Resolve__ the ref into a canonical revision id on the mirror.
//! 2. __PreClean__ away a stale changeset of the same id.
//! 3. __Checkout__ the revision into `changesets/<id>`.
//! 4. __Configure__ the live settings file from the host type's template.
//! 5. __SetPermissions__ on code, shared files, and secrets.
//! 6. __LinkAssets__ to the shared files directory, then swap `current`.
//! 7. __LogDeployment__ into the deployment log.
//!
//! The `current` pointer is swapped by renaming a freshly made link over
//! it, so it is never absent, and never points at a half-built changeset. A
//! failed deploy leaves `current` at the previous release. Its partial
//! changeset is left on disk for inspection.
//!
//! # Locking
//!
//! Releasing the same revision twice at once is refused. A lock directory at
//! `private/locks/<id>` is created atomically before the changeset is
//! touched, and removed once the pipeline finishes, successfully or not.

pub mod history;
pub mod retention;

pub use history::{current_actor, DeploymentLog, DeploymentLogEntry, HistoryError};

use crate::{
    config::{ConfigError, Environment},
    exec::{Command, ExecError, Executor},
    path::SiteLayout,
    prompt::{PromptError, Prompter},
    template::{self, TemplateError},
    vcs::{Vcs, VcsError},
};

use chrono::{DateTime, Utc};
use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Successfully released changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Canonical revision id of changeset.
    pub id: String,

    /// Path of changeset on host.
    pub changeset: PathBuf,

    /// Entry appended to deployment log.
    pub entry: DeploymentLogEntry,
}

/// Result of setting up a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,

    /// Operator chose to keep the existing site directory.
    Declined,
}

/// Manage releases of a site on the hosts of an environment.
pub struct ReleaseManager<'a, E: Executor> {
    environment: &'a Environment,
    executor: &'a E,
    prompter: &'a dyn Prompter,
    actor: String,
    clock: fn() -> DateTime<Utc>,
}

impl<'a, E: Executor> ReleaseManager<'a, E> {
    pub fn new(environment: &'a Environment, executor: &'a E, prompter: &'a dyn Prompter) -> Self {
        Self {
            environment,
            executor,
            prompter,
            actor: current_actor(),
            clock: Utc::now,
        }
    }

    /// Record releases under another operator name.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Use another source of time for log entries and retention.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Deploy ref to environment.
    ///
    /// Sets up the site first when its mirror is missing.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::Vcs`] if ref is invalid or does not resolve.
    /// - Return [`ReleaseError::NotInstalled`] if site setup was declined.
    /// - Return [`ReleaseError::Locked`] if the revision is being released
    ///   by someone else.
    /// - Return [`ReleaseError::MissingTemplate`] if the host type has no
    ///   settings template.
    /// - Return [`ReleaseError::Exec`] if any stage's command fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn deploy(&self, reference: &str) -> Result<Release> {
        let layout = self.layout()?;
        let vcs = self.environment.vcs();
        vcs.validate_ref(reference)?;

        if !self.executor.exists(&layout.mirror()).await? {
            info!("no repository mirror found, setting up site first");
            if self.install().await? == InstallOutcome::Declined {
                return Err(ReleaseError::NotInstalled {
                    path: layout.root().to_path_buf(),
                });
            }
        }

        let id = vcs
            .resolve_ref(self.executor, &layout.mirror(), reference)
            .await?;

        self.lock(&layout, &id).await?;
        let result = self.release(&layout, vcs, &id).await;
        if let Err(error) = self.unlock(&layout, &id).await {
            warn!("failed to release deploy lock of {id}: {error}");
        }

        let release = result?;
        info!(
            "{} now serves {id} from {}",
            self.environment.name(),
            release.changeset.display()
        );

        Ok(release)
    }

    async fn release(&self, layout: &SiteLayout, vcs: Vcs, id: &str) -> Result<Release> {
        let changeset = layout.changeset(id);

        self.pre_clean(&changeset).await?;
        vcs.materialize(self.executor, &layout.mirror(), id, &changeset)
            .await?;
        self.configure(&changeset).await?;
        self.set_permissions(layout, &changeset).await?;
        self.link_assets(layout, &changeset).await?;

        let entry = DeploymentLogEntry::new((self.clock)(), &self.actor, id);
        DeploymentLog::new(layout.deployments())
            .append(self.executor, &entry)
            .await?;

        Ok(Release {
            id: id.to_string(),
            changeset,
            entry,
        })
    }

    /// Set up directory structure of site, and clone its mirror.
    ///
    /// An existing site directory is only removed after confirmation.
    /// Renders the virtual host template into `private/<url>` when the
    /// environment names one.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::Config`] if `site_path` or `repo_url` is
    ///   missing.
    /// - Return [`ReleaseError::Prompt`] if operator cannot be asked.
    /// - Return [`ReleaseError::Exec`] if any command fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn install(&self) -> Result<InstallOutcome> {
        let layout = self.layout()?;
        let repo_url = self.environment.repo_url()?;
        let root = layout.root();

        info!("create directory structure at {}", root.display());
        if self.executor.exists(root).await? {
            let message = format!("Remove existing directory {}?", root.display());
            if !self.prompter.confirm(&message, false)? {
                info!("directory not removed and recreated");
                return Ok(InstallOutcome::Declined);
            }

            self.executor
                .run(&Command::new("rm").arg("-rf").path_arg(root).quiet())
                .await?;
        }

        self.executor
            .run(
                &Command::new("mkdir")
                    .arg("-p")
                    .path_arg(layout.changesets())
                    .path_arg(layout.files())
                    .path_arg(layout.logs())
                    .path_arg(layout.private())
                    .quiet(),
            )
            .await?;
        self.executor
            .run(
                &Command::new("touch")
                    .path_arg(layout.logs().join("access.log"))
                    .path_arg(layout.logs().join("error.log"))
                    .quiet(),
            )
            .await?;

        info!("clone repository {repo_url}");
        let vcs = self.environment.vcs();
        self.executor
            .run(&vcs.clone_command(repo_url, &layout.mirror()))
            .await?;

        if let Some(template) = self.environment.vhost_template() {
            self.write_virtual_host(&layout, template).await?;
        }

        info!("site directory structure created at {}", root.display());
        Ok(InstallOutcome::Installed)
    }

    async fn write_virtual_host(&self, layout: &SiteLayout, template: &Path) -> Result<()> {
        let path = self.environment.project_root().join(template);
        let source = read_to_string(&path).map_err(|error| ReleaseError::ReadTemplate {
            path: path.clone(),
            source: error,
        })?;

        let url = match self.environment.site_url() {
            Some(url) => url.to_string(),
            None => self
                .prompter
                .text("Please enter the site url (ex: qa4.dev.example.com):")?,
        };

        let url = url.trim().to_string();
        let mut components = Path::new(&url).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(ReleaseError::InvalidSiteUrl(url));
        }

        let variables = BTreeMap::from([
            ("url".to_string(), url.clone()),
            (
                "host_site_path".to_string(),
                layout.root().display().to_string(),
            ),
            (
                "host_type".to_string(),
                self.environment.host_type()?.to_string(),
            ),
        ]);
        let rendered = template::render(&source, &variables);
        if !rendered.unresolved.is_empty() {
            warn!(
                "virtual host template leaves placeholders untouched: {:?}",
                rendered.unresolved
            );
        }

        let destination = layout.private().join(&url);
        info!("write virtual host {}", destination.display());
        self.executor.write(&destination, &rendered.text).await?;

        Ok(())
    }

    async fn lock(&self, layout: &SiteLayout, id: &str) -> Result<()> {
        self.executor
            .run(&Command::new("mkdir").arg("-p").path_arg(layout.locks()).quiet())
            .await?;

        // INVARIANT: mkdir fails if the directory exists, so only one deploy
        // of a revision can hold its lock.
        let lock = layout.lock(id);
        if !self
            .executor
            .probe(&Command::new("mkdir").path_arg(&lock).quiet())
            .await?
        {
            return Err(ReleaseError::Locked {
                id: id.to_string(),
                path: lock,
            });
        }

        debug!("acquired deploy lock {}", lock.display());
        Ok(())
    }

    async fn unlock(&self, layout: &SiteLayout, id: &str) -> Result<()> {
        self.executor
            .run(&Command::new("rmdir").path_arg(layout.lock(id)).quiet())
            .await?;
        Ok(())
    }

    async fn pre_clean(&self, changeset: &Path) -> Result<()> {
        if self.executor.exists(changeset).await? {
            info!("found the same revision already deployed, cleaning up");
            self.executor
                .run(&Command::new("rm").arg("-rf").path_arg(changeset).quiet())
                .await?;
        }

        Ok(())
    }

    /// Render host type's settings template into the live settings file.
    async fn configure(&self, changeset: &Path) -> Result<()> {
        info!("configure site {}", self.environment.settings_file());

        let settings_dir = changeset.join(self.environment.settings_dir());
        let live = self.environment.settings_file();
        let host_type = self.environment.host_type()?;
        let (stem, extension) = split_extension(live);
        let template = match extension {
            Some(extension) => format!("{stem}.{host_type}.{extension}"),
            None => format!("{stem}.{host_type}"),
        };

        let template_path = settings_dir.join(&template);
        if !self.executor.exists(&template_path).await? {
            return Err(ReleaseError::MissingTemplate {
                path: template_path,
            });
        }

        let source = self.executor.read(&template_path).await?;
        let rendered = template::render(&source, self.environment.settings());
        let text = if self.environment.strict_placeholders() {
            rendered.into_strict()?
        } else {
            if !rendered.unresolved.is_empty() {
                warn!(
                    "{template} leaves placeholders untouched: {:?}",
                    rendered.unresolved
                );
            }
            rendered.text
        };

        self.executor.write(&settings_dir.join(live), &text).await?;

        // INVARIANT: Only the live settings file survives.
        let originals = match extension {
            Some(extension) => format!("{stem}.*.{extension}"),
            None => format!("{stem}.*"),
        };
        self.executor
            .run(
                &Command::new("find")
                    .path_arg(&settings_dir)
                    .args(["-maxdepth", "1", "-name", originals.as_str(), "-delete"])
                    .quiet(),
            )
            .await?;

        Ok(())
    }

    async fn set_permissions(&self, layout: &SiteLayout, changeset: &Path) -> Result<()> {
        info!("set file permissions");

        let user = self.environment.user()?;
        let group = self.environment.webserver_user()?;
        let sudo = self.environment.use_sudo();
        let settings_dir = changeset.join(self.environment.settings_dir());
        let (stem, _) = split_extension(self.environment.settings_file());
        let changeset = changeset.to_string_lossy().into_owned();
        let changeset = changeset.as_str();

        let commands = [
            Command::new("chown").args(["-R", user, "private", "logs", "files", changeset]),
            Command::new("chgrp").args(["-R", group, "files", changeset]),
            Command::new("chmod").args(["-R", "2750", changeset]),
            Command::new("chmod").args(["-R", "2770", "files"]),
            Command::new("chmod").args(["-R", "0700", "private", "logs"]),
            Command::new("find")
                .path_arg(&settings_dir)
                .args(["-maxdepth", "1", "-name"])
                .arg(format!("{stem}*"))
                .args(["-exec", "chmod", "0440", "{}", "+"]),
        ];

        for command in commands {
            self.executor
                .run(&command.current_dir(layout.root()).sudo(sudo).quiet())
                .await?;
        }

        Ok(())
    }

    async fn link_assets(&self, layout: &SiteLayout, changeset: &Path) -> Result<()> {
        info!("create symlinks");

        let settings_dir = self.environment.settings_dir();
        let link = changeset.join(settings_dir).join("files");
        self.executor
            .run(&Command::new("rm").arg("-rf").path_arg(&link).quiet())
            .await?;

        // INVARIANT: Link is relative, climbing out of settings directory,
        // changeset, and changesets, to reach the shared files directory.
        let depth = settings_dir.components().count() + 2;
        let target = format!("{}files", "../".repeat(depth));
        self.executor
            .run(
                &Command::new("ln")
                    .arg("-s")
                    .arg(&target)
                    .path_arg(&link)
                    .quiet(),
            )
            .await?;

        let public = changeset.join(self.environment.public_path());
        self.executor
            .run(
                &Command::new("ln")
                    .arg("-sfn")
                    .path_arg(&public)
                    .path_arg(layout.next_current())
                    .quiet(),
            )
            .await?;
        self.executor
            .run(
                &Command::new("mv")
                    .arg("-Tf")
                    .path_arg(layout.next_current())
                    .path_arg(layout.current())
                    .quiet(),
            )
            .await?;

        Ok(())
    }

    /// Fix ownership and modes of the shared files directory.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::Config`] if `user` or `webserver_user` is
    ///   missing.
    /// - Return [`ReleaseError::Exec`] if any command fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn set_files_perms(&self) -> Result<()> {
        info!("set permissions for the files directory");

        let layout = self.layout()?;
        let user = self.environment.user()?;
        let group = self.environment.webserver_user()?;
        let sudo = self.environment.use_sudo();

        let commands = [
            Command::new("chown").args(["-R", user, "files"]),
            Command::new("chgrp").args(["-R", group, "files"]),
            Command::new("chmod").args(["-R", "2770", "files"]),
        ];

        for command in commands {
            self.executor
                .run(&command.current_dir(layout.root()).sudo(sudo))
                .await?;
        }

        Ok(())
    }

    /// Read deployment log of site.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::History`] if log cannot be read.
    pub async fn history(&self) -> Result<Vec<DeploymentLogEntry>> {
        let layout = self.layout()?;
        Ok(DeploymentLog::new(layout.deployments())
            .read(self.executor)
            .await?)
    }

    /// Revision id `current` points at, if any.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::Exec`] if command cannot be launched.
    pub async fn current(&self) -> Result<Option<String>> {
        let layout = self.layout()?;
        let output = self
            .executor
            .execute(&Command::new("readlink").path_arg(layout.current()).quiet())
            .await?;

        if !output.success() {
            return Ok(None);
        }

        let target = PathBuf::from(output.stdout.trim());
        let id = target
            .strip_prefix(layout.changesets())
            .ok()
            .and_then(|rest| rest.components().next())
            .map(|id| id.as_os_str().to_string_lossy().into_owned());

        Ok(id)
    }

    /// Remove changesets older than given number of days.
    ///
    /// Uses the environment's retention when no age is given. The changeset
    /// `current` points at is always kept. Returns names of the removed
    /// changesets.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::Exec`] if any command fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn clean(&self, days: Option<u32>) -> Result<Vec<String>> {
        let layout = self.layout()?;
        let days = days.unwrap_or_else(|| self.environment.retention_days());

        let listing = self
            .executor
            .run(&retention::listing_command(&layout.changesets()))
            .await?;
        let changesets = retention::parse_listing(&listing);
        let active = self.current().await?;
        let expired = retention::expired(&changesets, (self.clock)(), days, active.as_deref());

        info!("found {} changesets older than {days} days", expired.len());
        if expired.is_empty() {
            return Ok(expired);
        }

        let mut command = Command::new("rm").arg("-rf");
        for name in &expired {
            command = command.path_arg(layout.changeset(name));
        }
        self.executor.run(&command.quiet()).await?;

        info!("removed {}", expired.join(", "));
        Ok(expired)
    }

    /// Rebuild site profile through its reset script.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::Exec`] if reset script fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn rebuild(&self) -> Result<String> {
        info!("rebuild the site profile");
        let layout = self.layout()?;
        Ok(self
            .executor
            .run(
                &Command::new("sh")
                    .args(["../private/reset.sh", "-d"])
                    .current_dir(layout.current()),
            )
            .await?)
    }

    /// Run site command inside the current release, e.g., `drush cc all`.
    ///
    /// # Errors
    ///
    /// - Return [`ReleaseError::EmptyCommand`] if no program is given.
    /// - Return [`ReleaseError::Exec`] if command fails.
    #[instrument(skip(self), level = "debug")]
    pub async fn exec(&self, argv: &[String]) -> Result<String> {
        let (program, args) = argv.split_first().ok_or(ReleaseError::EmptyCommand)?;
        let layout = self.layout()?;
        Ok(self
            .executor
            .run(
                &Command::new(program)
                    .args(args)
                    .current_dir(layout.current()),
            )
            .await?)
    }

    fn layout(&self) -> Result<SiteLayout> {
        Ok(SiteLayout::new(self.environment.site_path()?))
    }
}

fn split_extension(file_name: &str) -> (&str, Option<&str>) {
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => (stem, Some(extension)),
        _ => (file_name, None),
    }
}

/// Release error types.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    /// Host type has no settings template in the changeset.
    #[error("could not find settings template {:?}", path.display())]
    MissingTemplate { path: PathBuf },

    /// Another deploy of the same revision holds its lock.
    #[error("{id} is already being deployed (lock {:?} exists)", path.display())]
    Locked { id: String, path: PathBuf },

    /// Site was never set up, and setting it up was declined.
    #[error("site at {:?} is not set up", path.display())]
    NotInstalled { path: PathBuf },

    /// Local template file cannot be read.
    #[error("failed to read template {:?}", path.display())]
    ReadTemplate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Site url cannot name a file under `private`.
    #[error("invalid site url {0:?}")]
    InvalidSiteUrl(String),

    /// No site command to run.
    #[error("no command given")]
    EmptyCommand,

    /// Strict settings template leaves placeholders behind.
    #[error(transparent)]
    UnresolvedPlaceholders(#[from] TemplateError),

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Friendly result alias :3
pub type Result<T, E = ReleaseError> = std::result::Result<T, E>;
