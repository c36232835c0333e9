use thiserror::Error;

use crate::backup::PipelineStep;
use crate::database::DbFailure;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database connection failed: {0}")]
    Connectivity(DbFailure),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("{step} failed: `{command}` exited with {}", describe_exit(.exit_code))]
    ExternalTool {
        step: PipelineStep,
        command: String,
        exit_code: Option<i32>,
    },

    #[error("Executable `{0}` not found in PATH")]
    ToolNotFound(String),

    #[error("{step} failed: {message}")]
    Step { step: PipelineStep, message: String },

    #[error("Operation aborted: {0}")]
    OperatorAbort(String),

    #[error("Interaction failed: {0}")]
    Interaction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn step(step: PipelineStep, message: impl Into<String>) -> Self {
        AppError::Step {
            step,
            message: message.into(),
        }
    }

    /// Operator aborts end the process unsuccessfully but are not reported as errors.
    pub fn is_operator_abort(&self) -> bool {
        matches!(self, AppError::OperatorAbort(_))
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
