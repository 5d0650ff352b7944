// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where the environment registry lives, and where site paths of
//! an environment are located on its hosts.

use std::path::{Path, PathBuf};

/// File name of the environment registry.
pub const REGISTRY_FILE_NAME: &str = "butter.toml";

/// Locate the environment registry.
///
/// Walks from the start directory up through its ancestors looking for a
/// registry file. Falls back to `$XDG_CONFIG_HOME/butter/butter.toml` when
/// none is found and that file exists.
///
/// # Errors
///
/// - Return [`NoRegistry`] if no registry file can be found.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn find_registry(start: impl AsRef<Path>) -> Result<PathBuf> {
    let nearest = start
        .as_ref()
        .ancestors()
        .map(|dir| dir.join(REGISTRY_FILE_NAME))
        .find(|path| path.is_file());

    if let Some(path) = nearest {
        return Ok(path);
    }

    default_registry_path()
        .filter(|path| path.is_file())
        .ok_or_else(|| NoRegistry {
            start: start.as_ref().to_path_buf(),
        })
}

/// Determine default absolute path to the user-wide registry.
///
/// Does not check if the path returned actually exists.
pub fn default_registry_path() -> Option<PathBuf> {
    dirs::config_dir().map(|path| path.join("butter").join(REGISTRY_FILE_NAME))
}

/// Layout of a site on its host.
///
/// ```text
/// <site_path>/
/// ├── changesets/<id>/      one checkout per released revision
/// ├── current -> changesets/<id>/<public_path>
/// ├── files/                uploads shared by every changeset
/// ├── logs/
/// ├── private/repo/         mirror of the source repository
/// ├── private/locks/<id>/   held while <id> is being released
/// └── DEPLOYMENTS           deployment log
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLayout {
    root: PathBuf,
}

impl SiteLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn changesets(&self) -> PathBuf {
        self.root.join("changesets")
    }

    pub fn changeset(&self, id: &str) -> PathBuf {
        self.changesets().join(id)
    }

    pub fn current(&self) -> PathBuf {
        self.root.join("current")
    }

    /// Staging name of current pointer during an atomic swap.
    pub fn next_current(&self) -> PathBuf {
        self.root.join("current.next")
    }

    pub fn files(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn private(&self) -> PathBuf {
        self.root.join("private")
    }

    pub fn mirror(&self) -> PathBuf {
        self.private().join("repo")
    }

    pub fn locks(&self) -> PathBuf {
        self.private().join("locks")
    }

    pub fn lock(&self, id: &str) -> PathBuf {
        self.locks().join(id)
    }

    pub fn deployments(&self) -> PathBuf {
        self.root.join("DEPLOYMENTS")
    }
}

/// No environment registry could be found.
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot find butter.toml in {:?} or any of its parents", start.display())]
pub struct NoRegistry {
    start: PathBuf,
}

/// Friendly result alias :3
pub type Result<T, E = NoRegistry> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test]
    fn find_registry_in_ancestor() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        let nested = root.join("public").join("sites");
        std::fs::create_dir_all(&nested)?;
        std::fs::write(root.join(REGISTRY_FILE_NAME), "")?;

        assert_eq!(find_registry(&nested)?, root.join(REGISTRY_FILE_NAME));

        Ok(())
    }

    #[sealed_test(env = [("XDG_CONFIG_HOME", "/nonexistent")])]
    fn missing_registry_is_an_error() -> anyhow::Result<()> {
        let root = std::env::current_dir()?;
        assert!(find_registry(&root).is_err());
        Ok(())
    }

    #[test]
    fn site_layout_paths() {
        let layout = SiteLayout::new("/vol/main/site");
        assert_eq!(
            layout.changeset("abc123"),
            PathBuf::from("/vol/main/site/changesets/abc123")
        );
        assert_eq!(layout.mirror(), PathBuf::from("/vol/main/site/private/repo"));
        assert_eq!(
            layout.lock("abc123"),
            PathBuf::from("/vol/main/site/private/locks/abc123")
        );
        assert_eq!(layout.deployments(), PathBuf::from("/vol/main/site/DEPLOYMENTS"));
    }
}
