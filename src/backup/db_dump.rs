// dbmagic/src/backup/db_dump.rs
use std::io::Write;
use std::path::Path;

use crate::backup::{run_external, PipelineStep};
use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::utils::artifacts::create_private;
use crate::utils::process::{CommandSpec, ProcessRunner};

/// `mysqldump` printing the dump to stdout. The password reaches the client
/// through `MYSQL_PWD` so it never appears in the process list or the log sink.
pub fn dump_command(config: &DatabaseConfig) -> CommandSpec {
    CommandSpec::new("mysqldump")
        .args(connection_args(config))
        .arg(config.name.as_str())
        .env("MYSQL_PWD", config.password.as_str())
}

/// `-h host -P port -u user`, shared by `mysqldump` and `mysql`.
pub fn connection_args(config: &DatabaseConfig) -> Vec<String> {
    vec![
        "-h".to_string(),
        config.host.clone(),
        "-P".to_string(),
        config.port.to_string(),
        "-u".to_string(),
        config.username.clone(),
    ]
}

pub async fn dump_database(
    runner: &dyn ProcessRunner,
    config: &DatabaseConfig,
    target: &Path,
) -> Result<()> {
    let result = run_external(runner, PipelineStep::Dump, &dump_command(config)).await?;
    create_private(target)
        .and_then(|mut file| file.write_all(&result.output))
        .map_err(|e| AppError::step(PipelineStep::Dump, format!("{}: {}", target.display(), e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::process::testing::{ok, FakeProcessRunner};

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            host: "db1".to_string(),
            port: 3307,
            name: "shop".to_string(),
            username: "app".to_string(),
            password: "x".to_string(),
            user_host: "db1".to_string(),
        }
    }

    #[test]
    fn test_dump_command_keeps_password_off_the_command_line() {
        let spec = dump_command(&config());

        assert_eq!(spec.to_string(), "mysqldump -h db1 -P 3307 -u app shop");
        assert_eq!(spec.env, vec![("MYSQL_PWD".to_string(), "x".to_string())]);
    }

    #[tokio::test]
    async fn test_dump_is_written_owner_only() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("shop-prod.sql");
        let runner = FakeProcessRunner::new(|_| ok(b"-- dump"));

        dump_database(&runner, &config(), &target).await?;
        assert_eq!(std::fs::read(&target)?, b"-- dump");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(std::fs::metadata(&target)?.permissions().mode() & 0o777, 0o600);
        }
        Ok(())
    }
}
