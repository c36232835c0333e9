// dbmagic/src/transport/mod.rs
//! Moving archives and storage trees between this host and the remote archive.
//!
//! Remote layout, relative to the backend root (bucket or ssh home):
//! `dbmagic/{slug}.sql.gz.enc` and `fsmagic/{slug}/`.

pub(crate) mod command;
pub(crate) mod s3;

use async_trait::async_trait;
use std::path::Path;

use crate::config::{ArchiveConfig, TransportBackend};
use crate::errors::{AppError, Result};
use crate::utils::process::ProcessRunner;

pub use command::{GsutilTransport, RsyncTransport};
pub use s3::S3Transport;

pub const DATABASE_PREFIX: &str = "dbmagic";
pub const STORAGE_PREFIX: &str = "fsmagic";

pub fn database_artifact(slug: &str) -> String {
    format!("{}/{}.sql.gz.enc", DATABASE_PREFIX, slug)
}

pub fn storage_dir(slug: &str) -> String {
    format!("{}/{}/", STORAGE_PREFIX, slug)
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable location of `remote`, e.g. `gs://bucket/dbmagic/x.sql.gz.enc`.
    fn describe(&self, remote: &str) -> String;

    async fn upload(&self, local: &Path, remote: &str) -> Result<()>;
    async fn download(&self, remote: &str, local: &Path) -> Result<()>;

    /// Makes `remote_dir` identical to `local_dir`, deleting remote extras.
    async fn mirror_push(&self, local_dir: &Path, remote_dir: &str) -> Result<()>;

    /// Copies everything under `remote_dir` into `local_dir`. Local files the
    /// remote does not have are left alone.
    async fn pull_tree(&self, remote_dir: &str, local_dir: &Path) -> Result<()>;
}

/// Builds the backend selected by `archive.backend`.
pub async fn build_transport<'a>(
    archive: &ArchiveConfig,
    runner: &'a dyn ProcessRunner,
) -> Result<Box<dyn Transport + 'a>> {
    let missing = |key: &str| AppError::Config(format!("Missing parameter: {}", key));

    match archive.backend {
        TransportBackend::Gsutil => {
            let bucket = archive.bucket.clone().ok_or_else(|| missing("archive.bucket"))?;
            Ok(Box::new(GsutilTransport::new(runner, bucket)))
        }
        TransportBackend::Rsync => {
            let host = archive
                .ssh_host
                .clone()
                .ok_or_else(|| missing("archive.ssh_host"))?;
            Ok(Box::new(RsyncTransport::new(runner, host)))
        }
        TransportBackend::S3 => {
            let bucket = archive.bucket.clone().ok_or_else(|| missing("archive.bucket"))?;
            let s3 = archive.s3.as_ref().ok_or_else(|| missing("archive.s3"))?;
            Ok(Box::new(S3Transport::connect(s3, bucket).await))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A transport whose "remote" is a local directory.

    use super::*;
    use crate::backup::PipelineStep;
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use walkdir::WalkDir;

    pub struct FakeTransport {
        root: PathBuf,
        calls: Mutex<Vec<String>>,
        fail: Option<PipelineStep>,
    }

    impl FakeTransport {
        pub fn new(root: &Path) -> Self {
            FakeTransport {
                root: root.to_path_buf(),
                calls: Mutex::new(Vec::new()),
                fail: None,
            }
        }

        pub fn failing(root: &Path, step: PipelineStep) -> Self {
            FakeTransport {
                fail: Some(step),
                ..FakeTransport::new(root)
            }
        }

        pub fn remote_path(&self, remote: &str) -> PathBuf {
            self.root.join(remote)
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, step: PipelineStep, call: String) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.fail == Some(step) {
                return Err(AppError::step(step, "remote unavailable"));
            }
            Ok(())
        }
    }

    fn files_under(dir: &Path) -> BTreeSet<PathBuf> {
        WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.path().strip_prefix(dir).ok().map(Path::to_path_buf))
            .collect()
    }

    fn copy_tree(from: &Path, to: &Path, delete_extras: bool) -> Result<()> {
        fs::create_dir_all(to)?;
        let wanted = files_under(from);
        if delete_extras {
            for stale in files_under(to).difference(&wanted) {
                fs::remove_file(to.join(stale))?;
            }
        }
        for relative in &wanted {
            let target = to.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(from.join(relative), target)?;
        }
        Ok(())
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn describe(&self, remote: &str) -> String {
            format!("fake://{}", remote)
        }

        async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
            self.record(PipelineStep::Upload, format!("upload {}", remote))?;
            let target = self.remote_path(remote);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(local, target)?;
            Ok(())
        }

        async fn download(&self, remote: &str, local: &Path) -> Result<()> {
            self.record(PipelineStep::Download, format!("download {}", remote))?;
            fs::copy(self.remote_path(remote), local)?;
            Ok(())
        }

        async fn mirror_push(&self, local_dir: &Path, remote_dir: &str) -> Result<()> {
            self.record(PipelineStep::MirrorPush, format!("mirror_push {}", remote_dir))?;
            copy_tree(local_dir, &self.remote_path(remote_dir), true)
        }

        async fn pull_tree(&self, remote_dir: &str, local_dir: &Path) -> Result<()> {
            self.record(PipelineStep::StoragePull, format!("pull_tree {}", remote_dir))?;
            copy_tree(&self.remote_path(remote_dir), local_dir, false)
        }
    }
}
