// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{write_registry, SiteRepoFixture};

use butter::{
    config::Registry,
    exec::{Activity, LocalExecutor},
    prompt::AssumeYes,
    release::{ReleaseError, ReleaseManager},
    vcs::VcsError,
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::{
    env::current_dir,
    fs::{read_link, read_to_string},
    path::PathBuf,
};
use tokio::runtime::Runtime;

const TEMPLATE: &str = "<?php\n$databases['default']['default']['database'] = '%DB_DB%';\n";

fn site_repo() -> Result<SiteRepoFixture> {
    let repo = SiteRepoFixture::new(current_dir()?.join("repo"))?;
    repo.stage_and_commit("public/index.php", "<?php echo 'hello';\n")?;
    repo.stage_and_commit("public/sites/default/settings.local.php", TEMPLATE)?;
    Ok(repo)
}

#[sealed_test]
fn deploy_local_site_end_to_end() -> Result<()> {
    let repo = site_repo()?;
    let head = repo.stage_and_commit("public/about.php", "<?php echo 'about';\n")?;
    let root = current_dir()?;
    let registry = Registry::load(write_registry(&root, &repo.path())?)?;
    let environment = registry.select("dev")?;

    let executor = LocalExecutor::new(Activity::hidden());
    let manager = ReleaseManager::new(&environment, &executor, &AssumeYes).with_actor("john");
    let release = Runtime::new()?.block_on(manager.deploy("main"))?;
    assert_eq!(release.id, head.to_string());

    let site = root.join("site");
    let changeset = site.join("changesets").join(head.to_string());
    assert_eq!(read_link(site.join("current"))?, changeset.join("public"));

    let settings_dir = changeset.join("public/sites/default");
    let settings = read_to_string(settings_dir.join("settings.php"))?;
    assert!(settings.contains("['database'] = 'foo';"));
    assert!(!settings_dir.join("settings.local.php").exists());
    assert!(!changeset.join(".git").exists());
    assert_eq!(
        read_link(settings_dir.join("files"))?,
        PathBuf::from("../../../../../files")
    );
    assert!(settings_dir.join("files").is_dir());
    assert!(!site.join("private/locks").join(head.to_string()).exists());

    let log = read_to_string(site.join("DEPLOYMENTS"))?;
    assert_eq!(log.lines().count(), 1);
    assert!(log.trim_end().ends_with(&format!("by john: {head}")));

    Ok(())
}

#[sealed_test]
fn redeploy_moves_current_and_clean_keeps_it() -> Result<()> {
    let repo = site_repo()?;
    let root = current_dir()?;
    let registry = Registry::load(write_registry(&root, &repo.path())?)?;
    let environment = registry.select("dev")?;
    let runtime = Runtime::new()?;

    let executor = LocalExecutor::new(Activity::hidden());
    let manager = ReleaseManager::new(&environment, &executor, &AssumeYes);
    let first = runtime.block_on(manager.deploy("main"))?;

    let next = repo.stage_and_commit("public/about.php", "<?php echo 'about';\n")?;

    // Mirror only learns about the new commit by fetching.
    let second = runtime.block_on(manager.deploy("main"))?;
    assert_eq!(second.id, next.to_string());
    assert_eq!(
        runtime.block_on(manager.current())?,
        Some(next.to_string())
    );

    let history = runtime.block_on(manager.history())?;
    let refs = history
        .iter()
        .map(|entry| entry.reference.clone())
        .collect::<Vec<_>>();
    assert_eq!(refs, vec![first.id.clone(), second.id.clone()]);

    let removed = runtime.block_on(manager.clean(Some(0)))?;
    assert_eq!(removed, vec![first.id.clone()]);
    assert!(!first.changeset.exists());
    assert!(second.changeset.exists());

    Ok(())
}

#[sealed_test]
fn unknown_ref_leaves_current_alone() -> Result<()> {
    let repo = site_repo()?;
    let root = current_dir()?;
    let registry = Registry::load(write_registry(&root, &repo.path())?)?;
    let environment = registry.select("dev")?;
    let runtime = Runtime::new()?;

    let executor = LocalExecutor::new(Activity::hidden());
    let manager = ReleaseManager::new(&environment, &executor, &AssumeYes);
    let release = runtime.block_on(manager.deploy("main"))?;

    let result = runtime.block_on(manager.deploy("no-such-branch"));
    assert!(matches!(
        result,
        Err(ReleaseError::Vcs(VcsError::RefNotFound { .. }))
    ));
    assert_eq!(
        read_link(root.join("site/current"))?,
        release.changeset.join("public")
    );

    Ok(())
}
