// dbmagic/src/transport/command.rs
//! Transports that shell out to `gsutil` or `rsync` through the process runner.

use async_trait::async_trait;
use std::path::Path;

use crate::backup::{run_external, PipelineStep};
use crate::errors::Result;
use crate::transport::Transport;
use crate::utils::process::{CommandSpec, ProcessRunner};

/// Directory argument with a trailing slash, so both tools copy the contents.
fn dir_arg(dir: &Path) -> String {
    let rendered = dir.to_string_lossy();
    if rendered.ends_with('/') {
        rendered.into_owned()
    } else {
        format!("{}/", rendered)
    }
}

/// Google Cloud Storage through `gsutil`.
pub struct GsutilTransport<'a> {
    runner: &'a dyn ProcessRunner,
    bucket: String,
}

impl<'a> GsutilTransport<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, bucket: String) -> Self {
        GsutilTransport { runner, bucket }
    }

    fn url(&self, remote: &str) -> String {
        format!("gs://{}/{}", self.bucket, remote)
    }
}

#[async_trait]
impl Transport for GsutilTransport<'_> {
    fn describe(&self, remote: &str) -> String {
        self.url(remote)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let spec = CommandSpec::new("gsutil")
            .arg("cp")
            .path_arg(local)
            .arg(self.url(remote));
        run_external(self.runner, PipelineStep::Upload, &spec).await?;
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let spec = CommandSpec::new("gsutil")
            .arg("cp")
            .arg(self.url(remote))
            .path_arg(local);
        run_external(self.runner, PipelineStep::Download, &spec).await?;
        Ok(())
    }

    async fn mirror_push(&self, local_dir: &Path, remote_dir: &str) -> Result<()> {
        let spec = CommandSpec::new("gsutil")
            .args(["-m", "rsync", "-d", "-r"])
            .arg(dir_arg(local_dir))
            .arg(self.url(remote_dir));
        run_external(self.runner, PipelineStep::MirrorPush, &spec).await?;
        Ok(())
    }

    async fn pull_tree(&self, remote_dir: &str, local_dir: &Path) -> Result<()> {
        let spec = CommandSpec::new("gsutil")
            .args(["-m", "rsync", "-r"])
            .arg(self.url(remote_dir))
            .arg(dir_arg(local_dir));
        run_external(self.runner, PipelineStep::StoragePull, &spec).await?;
        Ok(())
    }
}

/// A plain ssh host, paths relative to the remote home directory.
pub struct RsyncTransport<'a> {
    runner: &'a dyn ProcessRunner,
    host: String,
}

impl<'a> RsyncTransport<'a> {
    pub fn new(runner: &'a dyn ProcessRunner, host: String) -> Self {
        RsyncTransport { runner, host }
    }

    fn location(&self, remote: &str) -> String {
        format!("{}:~/{}", self.host, remote)
    }

    fn rsync(&self) -> CommandSpec {
        // --mkpath creates missing remote parents (rsync >= 3.2.3).
        CommandSpec::new("rsync").args(["-az", "--mkpath", "-e", "ssh"])
    }
}

#[async_trait]
impl Transport for RsyncTransport<'_> {
    fn describe(&self, remote: &str) -> String {
        self.location(remote)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let spec = self.rsync().path_arg(local).arg(self.location(remote));
        run_external(self.runner, PipelineStep::Upload, &spec).await?;
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let spec = self.rsync().arg(self.location(remote)).path_arg(local);
        run_external(self.runner, PipelineStep::Download, &spec).await?;
        Ok(())
    }

    async fn mirror_push(&self, local_dir: &Path, remote_dir: &str) -> Result<()> {
        let spec = self
            .rsync()
            .arg("--delete")
            .arg(dir_arg(local_dir))
            .arg(self.location(remote_dir));
        run_external(self.runner, PipelineStep::MirrorPush, &spec).await?;
        Ok(())
    }

    async fn pull_tree(&self, remote_dir: &str, local_dir: &Path) -> Result<()> {
        let spec = self
            .rsync()
            .arg(self.location(remote_dir))
            .arg(dir_arg(local_dir));
        run_external(self.runner, PipelineStep::StoragePull, &spec).await?;
        Ok(())
    }
}
