// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Executor selection by environment.

use crate::{
    config::Environment,
    exec::{Command, Executor, LocalExecutor, Output, Result, SshExecutor},
};

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing::{debug, info};

/// Executor for the host an environment lives on.
///
/// Environments without hosts are the operator's own machine. Otherwise
/// commands go to the first configured host.
#[derive(Debug, Clone)]
pub enum HostExecutor {
    Local(LocalExecutor),
    Ssh(SshExecutor),
}

impl HostExecutor {
    /// Select executor for target environment.
    pub fn for_environment(environment: &Environment, activity: Activity) -> Self {
        match environment.primary_host() {
            Some(host) => Self::Ssh(
                SshExecutor::new(host, activity).with_options(environment.ssh_options()),
            ),
            None => Self::Local(LocalExecutor::new(activity)),
        }
    }
}

impl Executor for HostExecutor {
    fn host(&self) -> &str {
        match self {
            Self::Local(executor) => executor.host(),
            Self::Ssh(executor) => executor.host(),
        }
    }

    async fn execute(&self, command: &Command) -> Result<Output> {
        match self {
            Self::Local(executor) => executor.execute(command).await,
            Self::Ssh(executor) => executor.execute(command).await,
        }
    }
}

/// Open executors for environments.
///
/// Operations spanning two environments, e.g., syncs, open one executor per
/// environment through this.
pub trait Connect {
    type Executor: Executor;

    fn connect(&self, environment: &Environment) -> Self::Executor;
}

/// Connect to environments through [`HostExecutor`].
#[derive(Debug, Clone, Default)]
pub struct Connector {
    activity: Activity,
}

impl Connector {
    pub fn new(activity: Activity) -> Self {
        Self { activity }
    }
}

impl Connect for Connector {
    type Executor = HostExecutor;

    fn connect(&self, environment: &Environment) -> Self::Executor {
        HostExecutor::for_environment(environment, self.activity.clone())
    }
}

/// Terminal feedback for running commands.
///
/// Announces each command through tracing, and shows a spinner while it runs.
/// Spinners are drawn on stderr, and vanish by themselves when stderr is not
/// a terminal.
#[derive(Debug, Clone, Default)]
pub struct Activity {
    visible: bool,
}

impl Activity {
    /// Show spinner for running commands.
    pub fn spinner() -> Self {
        Self { visible: true }
    }

    /// Never draw anything.
    pub fn hidden() -> Self {
        Self { visible: false }
    }

    pub(crate) fn start(&self, host: &str, command: &Command) -> ProgressBar {
        if command.is_quiet() {
            debug!("[{host}] run: {command}");
        } else {
            info!("[{host}] run: {command}");
        }

        if !self.visible {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.green} {elapsed_precise:.dim} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar.set_message(format!("{host}: {}", command.program()));
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    }
}
