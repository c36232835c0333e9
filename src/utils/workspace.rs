// dbmagic/src/utils/workspace.rs
use std::fs;
use std::path::Path;

use crate::config::PathsConfig;
use crate::errors::Result;
use crate::interaction::InteractionPort;

/// Creates the storage directory and the log sink's directory when missing.
///
/// Required parameters were already checked when the configuration was loaded.
pub fn prepare_workspace(paths: &PathsConfig, io: &dyn InteractionPort) -> Result<()> {
    ensure_dir(&paths.storage_dir, "storage", io)?;
    if let Some(log_dir) = paths.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(log_dir, "logs", io)?;
    }
    Ok(())
}

fn ensure_dir(dir: &Path, label: &str, io: &dyn InteractionPort) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    io.success(&format!(
        "Successfully created {} directory ({})!",
        label,
        dir.display()
    ));
    Ok(())
}
