// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! MySQL database of a site.
//!
//! Connection details come from the environment's template variables
//! `db_db`, `db_user`, `db_pw`, and optionally `db_host`, i.e., the same
//! values the settings file is rendered with. The password reaches clients
//! through `MYSQL_PWD`, never as an argument, and is redacted from logs.

use crate::{
    config::{ConfigError, Environment},
    exec::{Command, Executor, Result},
};

use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Connection details of a MySQL database.
#[derive(Clone, PartialEq, Eq)]
pub struct MySql {
    database: String,
    user: String,
    password: String,
    host: Option<String>,
}

impl MySql {
    pub fn new(
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        host: Option<String>,
    ) -> Self {
        Self {
            database: database.into(),
            user: user.into(),
            password: password.into(),
            host,
        }
    }

    /// Database of environment.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingKey`] if `db_db`, `db_user`, or `db_pw`
    ///   is missing.
    pub fn for_environment(environment: &Environment) -> Result<Self, ConfigError> {
        Ok(Self::new(
            environment.setting("db_db")?,
            environment.setting("db_user")?,
            environment.setting("db_pw")?,
            environment.settings().get("db_host").cloned(),
        ))
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn client(&self, program: &str) -> Command {
        let mut command = Command::new(program)
            .secret_env("MYSQL_PWD", &self.password)
            .arg(format!("--user={}", self.user));
        if let Some(host) = &self.host {
            command = command.arg(format!("--host={host}"));
        }
        command
    }

    /// Command dumping database as plain SQL into file.
    pub fn dump_command(&self, destination: &Path) -> Command {
        self.client("mysqldump")
            .args(["--single-transaction", "--quick"])
            .arg(format!("--result-file={}", destination.display()))
            .arg(&self.database)
    }

    /// Command printing one table name per line.
    pub fn list_tables_command(&self) -> Command {
        self.client("mysql")
            .args(["-N", "-B", "-e", "SHOW TABLES"])
            .arg(&self.database)
            .quiet()
    }

    /// Command feeding gzipped dump into database.
    ///
    /// Only the status of `mysql` is reported, so the dump must pass
    /// [`verify_command`] first.
    pub fn import_command(&self, dump: &Path) -> Command {
        Command::new("gunzip")
            .arg("-c")
            .path_arg(dump)
            .pipe(self.client("mysql").arg(&self.database))
    }

    /// Dump database into gzipped file on host.
    ///
    /// A failed dump is never compressed. The intermediate SQL file is
    /// removed either way.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if dumping or
    ///   compressing fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn dump<E: Executor>(&self, executor: &E, destination: &Path) -> Result<()> {
        info!("dump database {} on {}", self.database, executor.host());
        let plain = plain_dump_path(destination);
        let dumped = async {
            executor.run(&self.dump_command(&plain)).await?;
            executor.run(&compress_command(&plain, destination)).await
        }
        .await;
        executor
            .run(&Command::new("rm").arg("-f").path_arg(&plain).quiet())
            .await?;
        dumped?;

        Ok(())
    }

    /// Check integrity of gzipped dump on host.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if dump is truncated,
    ///   corrupt, or missing.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn verify<E: Executor>(&self, executor: &E, dump: &Path) -> Result<()> {
        executor.run(&verify_command(dump)).await?;
        Ok(())
    }

    /// List tables of database.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if listing fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn list_tables<E: Executor>(&self, executor: &E) -> Result<Vec<String>> {
        let output = executor.run(&self.list_tables_command()).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|table| !table.is_empty())
            .map(ToString::to_string)
            .collect())
    }

    /// Drop every table of database.
    ///
    /// Foreign key checks are off while dropping, so tables go in any order.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if any statement fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn drop_tables<E: Executor>(&self, executor: &E) -> Result<usize> {
        let tables = self.list_tables(executor).await?;
        if tables.is_empty() {
            return Ok(0);
        }

        warn!(
            "drop {} tables of {} on {}, a failed import leaves it empty",
            tables.len(),
            self.database,
            executor.host()
        );
        executor
            .run(
                &self
                    .client("mysql")
                    .arg(&self.database)
                    .stdin(drop_script(&tables))
                    .quiet(),
            )
            .await?;

        Ok(tables.len())
    }

    /// Import gzipped dump from file on host.
    ///
    /// Run [`MySql::verify`] on the dump first, a truncated archive would
    /// otherwise import partially without an error.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`](crate::exec::ExecError) if import fails.
    #[instrument(skip(self, executor), level = "debug")]
    pub async fn import<E: Executor>(&self, executor: &E, dump: &Path) -> Result<()> {
        info!("import {} into {} on {}", dump.display(), self.database, executor.host());
        executor.run(&self.import_command(dump)).await?;
        Ok(())
    }
}

/// Command compressing plain dump into gzipped file.
pub fn compress_command(plain: &Path, destination: &Path) -> Command {
    Command::new("gzip")
        .args(["--force", "--stdout"])
        .path_arg(plain)
        .stdout_file(destination)
}

/// Command testing integrity of gzipped dump without extracting it.
pub fn verify_command(dump: &Path) -> Command {
    Command::new("gunzip").arg("--test").path_arg(dump).quiet()
}

/// Plain SQL file written before compressing into destination.
fn plain_dump_path(destination: &Path) -> PathBuf {
    match destination.extension() {
        Some(extension) if extension == "gz" => destination.with_extension(""),
        _ => {
            let mut path = destination.as_os_str().to_owned();
            path.push(".sql");
            PathBuf::from(path)
        }
    }
}

impl std::fmt::Debug for MySql {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("MySql")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .finish()
    }
}

/// SQL script dropping tables.
pub fn drop_script(tables: &[String]) -> String {
    let mut script = String::from("SET FOREIGN_KEY_CHECKS=0;\n");
    for table in tables {
        script.push_str(&format!(
            "DROP TABLE IF EXISTS `{}`;\n",
            table.replace('`', "``")
        ));
    }
    script.push_str("SET FOREIGN_KEY_CHECKS=1;\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{fake::FakeExecutor, ExecError, Output};
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn database() -> MySql {
        MySql::new("foo", "foo_user", "s3cret pw", Some("db.internal".into()))
    }

    #[test]
    fn dump_command_hides_password() {
        let command = database().dump_command(Path::new("/tmp/site.qa.sql"));
        assert_eq!(
            command.to_redacted_line(),
            "env MYSQL_PWD='***' mysqldump --user=foo_user --host=db.internal --single-transaction --quick --result-file=/tmp/site.qa.sql foo"
        );
        assert!(command.to_shell_line().contains("MYSQL_PWD='s3cret pw'"));
        assert!(!format!("{:?}", database()).contains("s3cret"));
    }

    #[tokio::test]
    async fn dump_compresses_in_separate_step() -> anyhow::Result<()> {
        let executor = FakeExecutor::new("local");
        database()
            .dump(&executor, Path::new("/tmp/site.qa.2025-03-14.sql.gz"))
            .await?;

        let lines = executor.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("--result-file=/tmp/site.qa.2025-03-14.sql foo"));
        assert_eq!(
            lines[1..].to_vec(),
            vec![
                "gzip --force --stdout /tmp/site.qa.2025-03-14.sql > /tmp/site.qa.2025-03-14.sql.gz".to_string(),
                "rm -f /tmp/site.qa.2025-03-14.sql".to_string(),
            ]
        );

        Ok(())
    }

    #[tokio::test]
    async fn failed_dump_is_never_compressed() {
        let executor = FakeExecutor::new("local");
        executor.respond("mysqldump", Output::failure_with(2, "Access denied for user"));

        let result = database()
            .dump(&executor, Path::new("/tmp/site.qa.2025-03-14.sql.gz"))
            .await;

        assert!(matches!(result, Err(ExecError::CommandFailed { status: Some(2), .. })));
        assert!(!executor.ran("gzip"));
        assert!(executor.ran("rm -f /tmp/site.qa.2025-03-14.sql"));
    }

    #[test]
    fn plain_dump_path_drops_gzip_extension() {
        assert_eq!(
            plain_dump_path(Path::new("/tmp/site.qa.sql.gz")),
            PathBuf::from("/tmp/site.qa.sql")
        );
        assert_eq!(
            plain_dump_path(Path::new("/tmp/site.qa")),
            PathBuf::from("/tmp/site.qa.sql")
        );
    }

    #[test]
    fn drop_script_wraps_foreign_key_checks() {
        let tables = vec!["node".to_string(), "odd`name".to_string()];
        let expect = indoc! {"
            SET FOREIGN_KEY_CHECKS=0;
            DROP TABLE IF EXISTS `node`;
            DROP TABLE IF EXISTS `odd``name`;
            SET FOREIGN_KEY_CHECKS=1;
        "};
        assert_eq!(drop_script(&tables), expect);
    }

    #[tokio::test]
    async fn drop_tables_feeds_script_on_stdin() -> anyhow::Result<()> {
        let executor = FakeExecutor::new("local");
        executor.respond("SHOW TABLES", Output::success_with("node\nusers\n"));

        assert_eq!(database().drop_tables(&executor).await?, 2);

        let records = executor.records();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1].stdin.as_deref(),
            Some(drop_script(&["node".into(), "users".into()]).as_str())
        );

        Ok(())
    }

    #[tokio::test]
    async fn empty_database_drops_nothing() -> anyhow::Result<()> {
        let executor = FakeExecutor::new("local");
        assert_eq!(database().drop_tables(&executor).await?, 0);
        assert_eq!(executor.records().len(), 1);
        Ok(())
    }
}
