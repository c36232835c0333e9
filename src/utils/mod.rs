pub mod artifacts;
pub mod process;
pub mod workspace;

use std::path::PathBuf;
use which::which;

use crate::errors::{AppError, Result};

/// Finds an executable (`mysqldump`, `gpg`, `gsutil`, ...) in the system PATH.
pub fn find_executable(program: &str) -> Result<PathBuf> {
    which(program).map_err(|_| AppError::ToolNotFound(program.to_string()))
}
