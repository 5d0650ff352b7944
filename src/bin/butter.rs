// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use butter::{
    config::{Environment, Registry},
    exec::{Activity, Connect, Connector, HostExecutor},
    path::find_registry,
    prompt::{AssumeYes, InquirePrompter, Prompter},
    release::{InstallOutcome, ReleaseManager},
    sync::{SyncEngine, SyncOutcome, Transport},
};

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{env::current_dir, path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  butter [options] <environment> <task>",
    subcommand_help_heading = "Tasks",
    version
)]
struct Cli {
    /// Path to environment registry.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Answer yes to every confirmation.
    #[arg(short, long)]
    pub yes: bool,

    /// Environment to run task against.
    #[arg(required = true, value_name = "environment")]
    pub environment: String,

    #[command(subcommand)]
    pub task: Task,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let path = match self.config {
            Some(path) => path,
            None => find_registry(current_dir()?)?,
        };
        let registry = Registry::load(&path)?;
        let environment = registry.select(&self.environment)?;

        let prompter: Box<dyn Prompter> = if self.yes {
            Box::new(AssumeYes)
        } else {
            Box::new(InquirePrompter)
        };
        let connector = Connector::new(Activity::spinner());
        let executor = connector.connect(&environment);
        let session = Session {
            registry: &registry,
            environment: &environment,
            connector: &connector,
            executor: &executor,
            prompter: prompter.as_ref(),
        };

        match self.task {
            Task::Install => session.install().await,
            Task::Deploy(opts) => session.deploy(opts).await,
            Task::Log => session.log().await,
            Task::Current => session.current().await,
            Task::Clean(opts) => session.clean(opts).await,
            Task::Rebuild => session.rebuild().await,
            Task::Exec(opts) => session.exec(opts).await,
            Task::SetFilesPerms => session.set_files_perms().await,
            Task::Sync(SyncTask::Files(opts)) => session.sync_files(opts).await,
            Task::Sync(SyncTask::Db(opts)) => session.sync_db(opts).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Task {
    /// Set up site directory structure, and clone its repository.
    #[command(override_usage = "butter [options] <environment> install")]
    Install,

    /// Deploy ref to environment.
    #[command(
        alias = "push",
        override_usage = "butter [options] <environment> deploy <ref>"
    )]
    Deploy(DeployOptions),

    /// Show deployment log.
    #[command(override_usage = "butter [options] <environment> log")]
    Log,

    /// Show revision currently served.
    #[command(override_usage = "butter [options] <environment> current")]
    Current,

    /// Remove old changesets.
    #[command(override_usage = "butter [options] <environment> clean [options]")]
    Clean(CleanOptions),

    /// Rebuild site profile through its reset script.
    #[command(override_usage = "butter [options] <environment> rebuild")]
    Rebuild,

    /// Run command inside current release, e.g., `drush cc all`.
    #[command(override_usage = "butter [options] <environment> exec <command>...")]
    Exec(ExecOptions),

    /// Fix ownership and modes of shared files directory.
    #[command(override_usage = "butter [options] <environment> set-files-perms")]
    SetFilesPerms,

    /// Copy files or database of environment into another.
    #[command(subcommand)]
    Sync(SyncTask),
}

#[derive(Debug, Clone, Subcommand)]
enum SyncTask {
    /// Sync shared files.
    #[command(override_usage = "butter [options] <environment> sync files [options]")]
    Files(SyncFilesOptions),

    /// Sync database.
    #[command(override_usage = "butter [options] <environment> sync db [options]")]
    Db(SyncDbOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployOptions {
    /// Branch, tag, or revision id to deploy.
    #[arg(required = true, value_name = "ref")]
    pub reference: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct CleanOptions {
    /// Remove changesets older than this many days.
    #[arg(short, long, value_name = "days")]
    pub days: Option<u32>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ExecOptions {
    /// Command and its arguments.
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "command"
    )]
    pub command: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncFilesOptions {
    /// Environment to sync into.
    #[arg(short, long, default_value = "local", value_name = "environment")]
    pub to: String,

    /// Copy host to host with rsync instead of relaying through S3.
    #[arg(short, long)]
    pub direct: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SyncDbOptions {
    /// Environment to sync into.
    #[arg(short, long, default_value = "local", value_name = "environment")]
    pub to: String,
}

/// Everything a task needs to run against the selected environment.
struct Session<'a> {
    registry: &'a Registry,
    environment: &'a Environment,
    connector: &'a Connector,
    executor: &'a HostExecutor,
    prompter: &'a dyn Prompter,
}

impl Session<'_> {
    fn releases(&self) -> ReleaseManager<'_, HostExecutor> {
        ReleaseManager::new(self.environment, self.executor, self.prompter)
    }

    fn syncs(&self) -> SyncEngine<'_, Connector> {
        SyncEngine::new(self.connector, self.prompter)
    }

    async fn install(&self) -> Result<()> {
        if self.releases().install().await? == InstallOutcome::Declined {
            info!("install of {} declined", self.environment.name());
        }

        Ok(())
    }

    async fn deploy(&self, opts: DeployOptions) -> Result<()> {
        let release = self.releases().deploy(&opts.reference).await?;
        info!("deployed {} as {}", opts.reference, release.id);
        Ok(())
    }

    async fn log(&self) -> Result<()> {
        for entry in self.releases().history().await? {
            println!("{entry}");
        }

        Ok(())
    }

    async fn current(&self) -> Result<()> {
        match self.releases().current().await? {
            Some(id) => println!("{id}"),
            None => info!("nothing released to {} yet", self.environment.name()),
        }

        Ok(())
    }

    async fn clean(&self, opts: CleanOptions) -> Result<()> {
        self.releases().clean(opts.days).await?;
        Ok(())
    }

    async fn rebuild(&self) -> Result<()> {
        print_output(&self.releases().rebuild().await?);
        Ok(())
    }

    async fn exec(&self, opts: ExecOptions) -> Result<()> {
        print_output(&self.releases().exec(&opts.command).await?);
        Ok(())
    }

    async fn set_files_perms(&self) -> Result<()> {
        self.releases().set_files_perms().await?;
        Ok(())
    }

    async fn sync_files(&self, opts: SyncFilesOptions) -> Result<()> {
        let destination = self.registry.select(&opts.to)?;
        let transport = if opts.direct {
            Transport::Direct
        } else {
            Transport::BlobStore
        };

        let outcome = self
            .syncs()
            .files(self.environment, &destination, transport)
            .await?;
        report(outcome);
        Ok(())
    }

    async fn sync_db(&self, opts: SyncDbOptions) -> Result<()> {
        let destination = self.registry.select(&opts.to)?;
        let outcome = self.syncs().db(self.environment, &destination).await?;
        report(outcome);
        Ok(())
    }
}

fn print_output(output: &str) {
    if !output.is_empty() {
        println!("{output}");
    }
}

fn report(outcome: SyncOutcome) {
    if outcome == SyncOutcome::Declined {
        info!("sync declined, nothing changed");
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}
