// dbmagic/src/restore/db_restore.rs
use std::path::Path;

use crate::backup::db_dump::connection_args;
use crate::backup::{run_external, PipelineStep};
use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::utils::process::{CommandSpec, ProcessRunner, StdinSource};

/// `mysql` reading the plain dump on stdin, password via `MYSQL_PWD`.
pub fn load_command(config: &DatabaseConfig, dump: &Path) -> CommandSpec {
    CommandSpec::new("mysql")
        .args(connection_args(config))
        .arg(config.name.as_str())
        .env("MYSQL_PWD", config.password.as_str())
        .stdin(StdinSource::File(dump.to_path_buf()))
}

pub async fn load_dump(runner: &dyn ProcessRunner, config: &DatabaseConfig, dump: &Path) -> Result<()> {
    if !dump.is_file() {
        return Err(AppError::step(
            PipelineStep::Load,
            format!("dump file not found: {}", dump.display()),
        ));
    }
    run_external(runner, PipelineStep::Load, &load_command(config, dump)).await?;
    Ok(())
}
