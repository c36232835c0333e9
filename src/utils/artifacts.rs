// dbmagic/src/utils/artifacts.rs
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The local intermediates of one database export or import:
/// `{tmp}/{slug}.sql`, `{tmp}/{slug}.sql.gz` and `{tmp}/{slug}.sql.gz.enc`.
///
/// Dumps are sensitive, so every file is removed when the set is dropped,
/// whichever way the owning pipeline returns.
#[derive(Debug)]
pub struct ArtifactSet {
    dir: PathBuf,
    slug: String,
}

impl ArtifactSet {
    pub fn new(dir: &Path, slug: &str) -> Self {
        ArtifactSet {
            dir: dir.to_path_buf(),
            slug: slug.to_string(),
        }
    }

    pub fn dump(&self) -> PathBuf {
        self.dir.join(format!("{}.sql", self.slug))
    }

    pub fn compressed(&self) -> PathBuf {
        self.dir.join(format!("{}.sql.gz", self.slug))
    }

    pub fn encrypted(&self) -> PathBuf {
        self.dir.join(format!("{}.sql.gz.enc", self.slug))
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Best-effort removal; failures are logged and never escalated.
    pub fn cleanup(&self) {
        for path in [self.dump(), self.compressed(), self.encrypted()] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed temporary artifact"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %path.display(),
                    "Failed to remove temporary artifact: {}",
                    e
                ),
            }
        }
    }
}

impl Drop for ArtifactSet {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Creates (or truncates) `path` readable by the owner only. Intermediates hold
/// plaintext dumps and usually sit in the shared temp directory.
pub fn create_private(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);
    let file = options.open(path)?;
    // `mode` only applies to new files; a leftover would keep its old bits.
    #[cfg(unix)]
    file.set_permissions(<fs::Permissions as std::os::unix::fs::PermissionsExt>::from_mode(0o600))?;
    Ok(file)
}

/// Lists files in `dir` whose name starts with `{slug}.sql`.
#[cfg(test)]
pub fn leftovers(dir: &Path, slug: &str) -> Vec<PathBuf> {
    let prefix = format!("{}.sql", slug);
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.path())
            .collect(),
        Err(_) => Vec::new(),
    }
}
