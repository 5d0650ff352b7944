// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Environment registry layout.
//!
//! Specify the layout of the registry file that lists every environment a
//! site can be released to, e.g., `local`, `qa`, `stage`, `production`.
//!
//! # General Layout
//!
//! The registry is a TOML file composed of two parts: a `[defaults]` table,
//! and one `[environment.<name>]` table per environment. Every key accepted by
//! an environment table is also accepted by the defaults table. Selecting an
//! environment layers its table over the defaults. Template variables under
//! `settings` are merged key by key, with the environment winning.
//!
//! ```toml
//! [defaults]
//! repo_url = "git@github.com:ombu/site.git"
//! s3_bucket = "files.example.com"
//! s3_namespace = "site"
//!
//! [environment.qa]
//! hosts = ["ombu@qa.example.com"]
//! host_type = "staging"
//! site_path = "/vol/main/site"
//!
//! [environment.qa.settings]
//! db_db = "foo"
//! ```
//!
//! # Environments Are Values
//!
//! Selecting an environment yields an owned, immutable [`Environment`].
//! Nothing about the registry changes by selecting from it, so selecting two
//! environments side by side can never leak keys from one into the other.

use crate::vcs::Vcs;

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Default number of days a changeset is kept around.
pub const DEFAULT_RETENTION_DAYS: u32 = 15;

/// Default number of days a database dump can be reused for.
pub const DEFAULT_DUMP_FRESHNESS_DAYS: u32 = 5;

/// Registry of named environments.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Registry {
    /// Keys shared by every environment.
    #[serde(default)]
    pub defaults: EnvironmentDefinition,

    /// Named environment definitions.
    #[serde(default, rename = "environment")]
    pub environments: BTreeMap<String, EnvironmentDefinition>,

    /// Directory holding the registry file.
    #[serde(skip)]
    pub root: PathBuf,
}

impl Registry {
    /// Load registry from target file.
    ///
    /// The parent directory of the file becomes the project root.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not a valid registry.
    /// - Return [`ConfigError::ShellExpansion`] if path expansion fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut registry: Registry = data.parse()?;
        registry.root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(registry)
    }

    /// Names of all defined environments.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.environments.keys().map(String::as_str)
    }

    /// Select environment by name.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownEnvironment`] if no environment has
    ///   target name.
    pub fn select(&self, name: impl AsRef<str>) -> Result<Environment> {
        let name = name.as_ref();
        let definition = self.environments.get(name).ok_or_else(|| {
            ConfigError::UnknownEnvironment {
                name: name.to_string(),
                available: self.names().collect::<Vec<_>>().join(", "),
            }
        })?;

        Ok(Environment {
            name: name.to_string(),
            definition: definition.clone().layered_over(&self.defaults),
            root: self.root.clone(),
        })
    }
}

impl FromStr for Registry {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut registry: Registry = toml::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        registry.defaults.expand_paths()?;
        for definition in registry.environments.values_mut() {
            definition.expand_paths()?;
        }

        Ok(registry)
    }
}

impl Display for Registry {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Keys of a single environment table.
///
/// Every key is optional, because any of them may come from the defaults
/// table instead. Operations that need a key report its absence themselves.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct EnvironmentDefinition {
    /// Hosts of environment. No hosts means the operator's own machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosts: Option<Vec<String>>,

    /// Host type, selects the settings template, e.g., "staging".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_type: Option<String>,

    /// Account owning application code on hosts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Group the webserver runs as.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webserver_user: Option<String>,

    /// Base path of site on hosts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_path: Option<PathBuf>,

    /// Path of user uploaded files, relative to site path or project root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_path: Option<PathBuf>,

    /// Web root inside a changeset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_path: Option<PathBuf>,

    /// Directory of settings file inside a changeset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_dir: Option<PathBuf>,

    /// Name of live settings file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_type: Option<Vcs>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_region: Option<String>,

    /// Age in days after which changesets are removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u32>,

    /// Age in days up to which database dumps are reused.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_freshness_days: Option<u32>,

    /// Escalate permission changes through sudo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_sudo: Option<bool>,

    /// Fail on placeholders left in rendered settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict_placeholders: Option<bool>,

    /// Extra arguments for the `ssh` binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_options: Option<Vec<String>>,

    /// Public URL of site, used for virtual host setup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,

    /// Local path to virtual host template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vhost_template: Option<PathBuf>,

    /// Template variables for settings file.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

impl EnvironmentDefinition {
    /// Layer this definition over a base definition.
    pub fn layered_over(self, base: &EnvironmentDefinition) -> Self {
        let mut settings = base.settings.clone();
        settings.extend(self.settings);

        Self {
            hosts: self.hosts.or_else(|| base.hosts.clone()),
            host_type: self.host_type.or_else(|| base.host_type.clone()),
            user: self.user.or_else(|| base.user.clone()),
            webserver_user: self.webserver_user.or_else(|| base.webserver_user.clone()),
            site_path: self.site_path.or_else(|| base.site_path.clone()),
            files_path: self.files_path.or_else(|| base.files_path.clone()),
            public_path: self.public_path.or_else(|| base.public_path.clone()),
            settings_dir: self.settings_dir.or_else(|| base.settings_dir.clone()),
            settings_file: self.settings_file.or_else(|| base.settings_file.clone()),
            repo_url: self.repo_url.or_else(|| base.repo_url.clone()),
            repo_type: self.repo_type.or(base.repo_type),
            s3_bucket: self.s3_bucket.or_else(|| base.s3_bucket.clone()),
            s3_namespace: self.s3_namespace.or_else(|| base.s3_namespace.clone()),
            s3_region: self.s3_region.or_else(|| base.s3_region.clone()),
            retention_days: self.retention_days.or(base.retention_days),
            dump_freshness_days: self.dump_freshness_days.or(base.dump_freshness_days),
            use_sudo: self.use_sudo.or(base.use_sudo),
            strict_placeholders: self.strict_placeholders.or(base.strict_placeholders),
            ssh_options: self.ssh_options.or_else(|| base.ssh_options.clone()),
            site_url: self.site_url.or_else(|| base.site_url.clone()),
            vhost_template: self.vhost_template.or_else(|| base.vhost_template.clone()),
            settings,
        }
    }

    fn expand_paths(&mut self) -> Result<()> {
        for path in [
            &mut self.site_path,
            &mut self.files_path,
            &mut self.vhost_template,
        ]
        .into_iter()
        .flatten()
        {
            *path = expand(path)?;
        }

        Ok(())
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// A selected environment.
///
/// Immutable once selected. Accessors for keys without a sensible default
/// fail with [`ConfigError::MissingKey`] when the key is absent.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Environment {
    name: String,
    definition: EnvironmentDefinition,
    root: PathBuf,
}

impl Environment {
    /// Construct environment from a definition directly.
    pub fn new(
        name: impl Into<String>,
        definition: EnvironmentDefinition,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            definition,
            root: root.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully layered definition of environment.
    pub fn definition(&self) -> &EnvironmentDefinition {
        &self.definition
    }

    /// Directory holding the registry, used to resolve local paths.
    pub fn project_root(&self) -> &Path {
        &self.root
    }

    /// Environment is the operator's own machine by name.
    pub fn is_local(&self) -> bool {
        self.name == "local"
    }

    pub fn is_production(&self) -> bool {
        self.name == "production"
    }

    /// First host of environment, if any.
    pub fn primary_host(&self) -> Option<&str> {
        self.definition
            .hosts
            .as_ref()
            .and_then(|hosts| hosts.first())
            .map(String::as_str)
    }

    pub fn hosts(&self) -> &[String] {
        self.definition.hosts.as_deref().unwrap_or_default()
    }

    pub fn site_path(&self) -> Result<&Path> {
        self.require("site_path", self.definition.site_path.as_deref())
    }

    pub fn files_path(&self) -> Result<&Path> {
        self.require("files_path", self.definition.files_path.as_deref())
    }

    pub fn host_type(&self) -> Result<&str> {
        self.require("host_type", self.definition.host_type.as_deref())
    }

    pub fn user(&self) -> Result<&str> {
        self.require("user", self.definition.user.as_deref())
    }

    pub fn webserver_user(&self) -> Result<&str> {
        self.require("webserver_user", self.definition.webserver_user.as_deref())
    }

    pub fn repo_url(&self) -> Result<&str> {
        self.require("repo_url", self.definition.repo_url.as_deref())
    }

    pub fn s3_bucket(&self) -> Result<&str> {
        self.require("s3_bucket", self.definition.s3_bucket.as_deref())
    }

    pub fn s3_namespace(&self) -> Result<&str> {
        self.require("s3_namespace", self.definition.s3_namespace.as_deref())
    }

    pub fn s3_region(&self) -> &str {
        self.definition.s3_region.as_deref().unwrap_or("us-west-2")
    }

    pub fn vcs(&self) -> Vcs {
        self.definition.repo_type.unwrap_or_default()
    }

    pub fn public_path(&self) -> &Path {
        self.definition
            .public_path
            .as_deref()
            .unwrap_or(Path::new("public"))
    }

    pub fn settings_dir(&self) -> &Path {
        self.definition
            .settings_dir
            .as_deref()
            .unwrap_or(Path::new("public/sites/default"))
    }

    pub fn settings_file(&self) -> &str {
        self.definition
            .settings_file
            .as_deref()
            .unwrap_or("settings.php")
    }

    pub fn retention_days(&self) -> u32 {
        self.definition
            .retention_days
            .unwrap_or(DEFAULT_RETENTION_DAYS)
    }

    pub fn dump_freshness_days(&self) -> u32 {
        self.definition
            .dump_freshness_days
            .unwrap_or(DEFAULT_DUMP_FRESHNESS_DAYS)
    }

    pub fn use_sudo(&self) -> bool {
        self.definition.use_sudo.unwrap_or(true)
    }

    pub fn strict_placeholders(&self) -> bool {
        self.definition.strict_placeholders.unwrap_or(false)
    }

    pub fn ssh_options(&self) -> Vec<String> {
        self.definition.ssh_options.clone().unwrap_or_default()
    }

    pub fn site_url(&self) -> Option<&str> {
        self.definition.site_url.as_deref()
    }

    pub fn vhost_template(&self) -> Option<&Path> {
        self.definition.vhost_template.as_deref()
    }

    /// Template variables of environment.
    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.definition.settings
    }

    /// Look up a template variable that must be present.
    pub fn setting(&self, key: &'static str) -> Result<&str> {
        self.require(key, self.definition.settings.get(key).map(String::as_str))
    }

    fn require<'a, T: ?Sized>(&self, key: &'static str, value: Option<&'a T>) -> Result<&'a T> {
        value.ok_or_else(|| ConfigError::MissingKey {
            environment: self.name.clone(),
            key,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read registry file.
    #[error("failed to read registry at {:?}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// No environment has the requested name.
    #[error("unknown environment {name:?} (available: {available})")]
    UnknownEnvironment { name: String, available: String },

    /// Environment lacks a key an operation needs.
    #[error("`{key}` not found in {environment:?} environment")]
    MissingKey {
        environment: String,
        key: &'static str,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
