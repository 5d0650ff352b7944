// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

mod integration;

use anyhow::Result;
use git2::{IndexEntry, IndexTime, Oid, Repository, RepositoryInitOptions};
use std::{
    fs::write,
    path::{Path, PathBuf},
    process::Command,
};

/// Source repository of a site, committed to without a working tree.
pub(crate) struct SiteRepoFixture {
    repo: Repository,
}

impl SiteRepoFixture {
    pub(crate) fn new(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("main");
        let repo = Repository::init_opts(path.as_ref(), &opts)?;

        // INVARIANT: Always provide valid name and email.
        //   - Git will complain if this is not set in CI/CD environments.
        let mut config = repo.config()?;
        config.set_str("user.name", "John Doe")?;
        config.set_str("user.email", "john@doe.com")?;

        Ok(Self { repo })
    }

    pub(crate) fn path(&self) -> PathBuf {
        self.repo.path().parent().unwrap().to_path_buf()
    }

    pub(crate) fn stage_and_commit(
        &self,
        filename: impl AsRef<Path>,
        contents: impl AsRef<str>,
    ) -> Result<Oid> {
        let entry = IndexEntry {
            ctime: IndexTime::new(0, 0),
            mtime: IndexTime::new(0, 0),
            dev: 0,
            ino: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            file_size: contents.as_ref().len() as u32,
            id: self.repo.blob(contents.as_ref().as_bytes())?,
            flags: 0,
            flags_extended: 0,
            path: filename
                .as_ref()
                .to_string_lossy()
                .into_owned()
                .into_bytes(),
        };

        // INVARIANT: Always use new tree produced by index after staging new entry.
        let mut index = self.repo.index()?;
        index.add_frombuffer(&entry, contents.as_ref().as_bytes())?;
        let tree_oid = index.write_tree()?;
        let tree = self.repo.find_tree(tree_oid)?;

        // INVARIANT: Always determine latest parent commits to append to.
        let signature = self.repo.signature()?;
        let mut parents = Vec::new();
        if let Some(parent) = self.repo.head().ok().and_then(|head| head.target()) {
            parents.push(self.repo.find_commit(parent)?);
        }
        let parents = parents.iter().collect::<Vec<_>>();

        Ok(self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            format!("chore: add {:?}", filename.as_ref()).as_ref(),
            &tree,
            &parents,
        )?)
    }
}

/// Registry describing one hostless environment named `dev`.
///
/// Ownership is set to the account running the tests, so releasing works
/// without escalation.
pub(crate) fn write_registry(root: &Path, repo: &Path) -> Result<PathBuf> {
    let registry = format!(
        r#"
        [defaults]
        repo_url = "{repo}"
        use_sudo = false

        [environment.dev]
        host_type = "local"
        user = "{user}"
        webserver_user = "{group}"
        site_path = "{site}"
        files_path = "files"

        [environment.dev.settings]
        db_db = "foo"
        "#,
        repo = repo.display(),
        user = id("-un")?,
        group = id("-gn")?,
        site = root.join("site").display(),
    );

    let path = root.join("butter.toml");
    write(&path, registry)?;
    Ok(path)
}

fn id(flag: &str) -> Result<String> {
    let output = Command::new("id").arg(flag).output()?;
    Ok(String::from_utf8(output.stdout)?.trim().to_string())
}
