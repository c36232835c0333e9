// dbmagic/src/backup/mod.rs
//! Export side of the archive pipeline plus the pieces the import side shares:
//! the confirmation gate, the pipeline context and external step execution.

mod logic;
pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod encryption;

use std::fmt;

use crate::config::AppConfig;
use crate::database::DatabaseProbe;
use crate::errors::{AppError, Result};
use crate::interaction::InteractionPort;
use crate::transport::Transport;
use crate::utils::process::{CommandResult, CommandSpec, ProcessRunner};

pub use logic::{export_database, export_storage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Confirm,
    Probe,
    Dump,
    Compress,
    Encrypt,
    Upload,
    Download,
    Decrypt,
    Decompress,
    Load,
    MirrorPush,
    StoragePull,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStep::Confirm => "confirmation",
            PipelineStep::Probe => "database probe",
            PipelineStep::Dump => "database dump",
            PipelineStep::Compress => "compression",
            PipelineStep::Encrypt => "encryption",
            PipelineStep::Upload => "upload",
            PipelineStep::Download => "download",
            PipelineStep::Decrypt => "decryption",
            PipelineStep::Decompress => "decompression",
            PipelineStep::Load => "database load",
            PipelineStep::MirrorPush => "storage push",
            PipelineStep::StoragePull => "storage pull",
        };
        f.write_str(name)
    }
}

/// Everything a pipeline run talks to.
#[derive(Clone, Copy)]
pub struct PipelineContext<'a> {
    pub config: &'a AppConfig,
    pub runner: &'a dyn ProcessRunner,
    pub probe: &'a dyn DatabaseProbe,
    pub transport: &'a dyn Transport,
    pub io: &'a dyn InteractionPort,
}

/// Shows `warning` and requires the operator to type the slug exactly.
/// Anything else, including surrounding whitespace or a different case, aborts.
pub fn confirmation_gate(io: &dyn InteractionPort, slug: &str, warning: &str, prompt: &str) -> Result<()> {
    io.info(warning);
    let typed = io.ask(&format!("Type '{}' to {}", slug, prompt), None)?;
    if typed != slug {
        io.info("Aborting ...");
        return Err(AppError::OperatorAbort(format!(
            "confirmation did not match '{}'",
            slug
        )));
    }
    Ok(())
}

/// Runs one external step; a non-zero exit becomes `AppError::ExternalTool`.
pub(crate) async fn run_external(
    runner: &dyn ProcessRunner,
    step: PipelineStep,
    spec: &CommandSpec,
) -> Result<CommandResult> {
    let result = runner.run(spec, true).await?;
    if !result.succeeded {
        return Err(AppError::ExternalTool {
            step,
            command: spec.to_string(),
            exit_code: result.exit_code,
        });
    }
    Ok(result)
}

/// Operator-facing report for a failed pipeline run. Aborts were already announced.
pub(crate) fn report_failure(ctx: &PipelineContext<'_>, err: &AppError, what: &str) {
    match err {
        AppError::OperatorAbort(_) => return,
        AppError::ExternalTool { command, .. } => {
            ctx.io
                .error("An error occurred while executing a system command:");
            ctx.io.error(&format!("$ {}", command));
            ctx.io.info(&format!(
                "Check {} for details.",
                ctx.runner.log_sink().display()
            ));
        }
        other => ctx.io.error(&other.to_string()),
    }
    ctx.io.info(&format!("Aborting {} ...", what));
}

#[cfg(test)]
pub(crate) mod testing {
    use std::path::Path;

    use crate::config::{AppConfig, ConfigSource};

    /// A gsutil-backed configuration whose local directories live under `root`.
    pub fn app_config(root: &Path) -> AppConfig {
        let source = ConfigSource::from_value(serde_json::json!({
            "database": {
                "host": "db1",
                "name": "shop",
                "user": "app",
                "password": "x"
            },
            "archive": {
                "slug": "shop-prod",
                "bucket": "backups",
                "secret": "s3cr3t"
            },
            "paths": {
                "tmp_dir": root.join("tmp").to_string_lossy(),
                "storage_dir": root.join("storage").to_string_lossy(),
                "log_file": root.join("logs/dbmagic.log").to_string_lossy()
            }
        }));
        AppConfig::from_source(&source).expect("test configuration is complete")
    }
}
