// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release and synchronize sites across environments.
//!
//! A __site__ lives on the hosts of each of its __environments__, e.g.,
//! `qa`, `stage`, `production`, or the operator's own machine as `local`.
//! Every environment keeps released revisions side by side as
//! __changesets__, and serves exactly one of them through its `current`
//! pointer:
//!
//! - [`release::ReleaseManager`] turns a ref into a configured changeset,
//!   and swaps `current` over to it.
//! - [`sync::SyncEngine`] moves shared files and databases between
//!   environments through a blob store.
//!
//! Environments are described in a registry file, see [`config`]. Commands
//! reach hosts through an [`exec::Executor`], either on the local machine or
//! over SSH.

pub mod config;
pub mod exec;
pub mod path;
pub mod prompt;
pub mod release;
pub mod sync;
pub mod template;
pub mod vcs;
