// dbmagic/src/transport/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use walkdir::WalkDir;

use crate::backup::PipelineStep;
use crate::config::S3Config;
use crate::errors::{AppError, Result};
use crate::transport::Transport;

/// An S3-compatible bucket (AWS, DigitalOcean Spaces, MinIO).
pub struct S3Transport {
    client: s3::Client,
    bucket: String,
}

impl S3Transport {
    pub async fn connect(config: &S3Config, bucket: String) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(Credentials::new(
                &config.access_key_id,
                &config.secret_access_key,
                None,
                None,
                "Static",
            ));
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = loader.load().await;

        S3Transport {
            client: s3::Client::new(&sdk_config),
            bucket,
        }
    }

    async fn list_keys(&self, prefix: &str, step: PipelineStep) -> Result<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        let mut continuation: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| {
                    AppError::step(
                        step,
                        format!("listing {}: {}", self.describe(prefix), DisplayErrorContext(&e)),
                    )
                })?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_string),
            );
            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    async fn put(&self, local: &Path, key: &str, step: PipelineStep) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| AppError::step(step, format!("{}: {}", local.display(), e)))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                AppError::step(
                    step,
                    format!("uploading to {}: {}", self.describe(key), DisplayErrorContext(&e)),
                )
            })?;
        debug!(key, "Uploaded object");
        Ok(())
    }

    async fn get(&self, key: &str, local: &Path, step: PipelineStep) -> Result<usize> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::step(
                    step,
                    format!("downloading {}: {}", self.describe(key), DisplayErrorContext(&e)),
                )
            })?;

        let mut output_file = File::create(local).await?;
        let mut total_bytes = 0;
        while let Some(chunk) = object
            .body
            .try_next()
            .await
            .map_err(|e| AppError::step(step, format!("reading {}: {}", self.describe(key), e)))?
        {
            output_file.write_all(&chunk).await?;
            total_bytes += chunk.len();
        }
        output_file.flush().await?;
        debug!(key, total_bytes, "Downloaded object");
        Ok(total_bytes)
    }

    async fn delete(&self, key: &str, step: PipelineStep) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                AppError::step(
                    step,
                    format!("deleting {}: {}", self.describe(key), DisplayErrorContext(&e)),
                )
            })?;
        Ok(())
    }
}

/// Files below `dir` as `/`-separated paths relative to `dir`.
fn local_files(dir: &Path) -> Result<BTreeSet<String>> {
    let mut files = BTreeSet::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| AppError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(dir) {
            let parts: Vec<_> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.insert(parts.join("/"));
        }
    }
    Ok(files)
}

fn key_prefix(remote_dir: &str) -> String {
    if remote_dir.ends_with('/') {
        remote_dir.to_string()
    } else {
        format!("{}/", remote_dir)
    }
}

/// `(key, relative path)` pairs to download, or `None` when the prefix holds
/// nothing. An empty listing usually means a wrong slug or bucket.
fn pull_plan<'k>(remote: &'k BTreeSet<String>, prefix: &str) -> Option<Vec<(&'k str, &'k str)>> {
    let plan: Vec<_> = remote
        .iter()
        .filter_map(|key| {
            key.strip_prefix(prefix)
                .filter(|relative| !relative.is_empty())
                .map(|relative| (key.as_str(), relative))
        })
        .collect();
    if plan.is_empty() { None } else { Some(plan) }
}

fn local_path(dir: &Path, relative: &str) -> PathBuf {
    relative.split('/').fold(dir.to_path_buf(), |path, part| path.join(part))
}

#[async_trait]
impl Transport for S3Transport {
    fn describe(&self, remote: &str) -> String {
        format!("s3://{}/{}", self.bucket, remote)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        self.put(local, remote, PipelineStep::Upload).await
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        self.get(remote, local, PipelineStep::Download).await?;
        Ok(())
    }

    async fn mirror_push(&self, local_dir: &Path, remote_dir: &str) -> Result<()> {
        let step = PipelineStep::MirrorPush;
        let prefix = key_prefix(remote_dir);
        let local = local_files(local_dir)?;
        let remote = self.list_keys(&prefix, step).await?;

        for relative in &local {
            self.put(&local_path(local_dir, relative), &format!("{}{}", prefix, relative), step)
                .await?;
        }
        for key in &remote {
            let relative = key.strip_prefix(&prefix).unwrap_or(key);
            if !local.contains(relative) {
                self.delete(key, step).await?;
                debug!(key = %key, "Deleted stale object");
            }
        }
        Ok(())
    }

    async fn pull_tree(&self, remote_dir: &str, local_dir: &Path) -> Result<()> {
        let step = PipelineStep::StoragePull;
        let prefix = key_prefix(remote_dir);
        let remote = self.list_keys(&prefix, step).await?;
        let downloads = pull_plan(&remote, &prefix)
            .ok_or_else(|| {
                AppError::step(step, format!("nothing is archived under {}", self.describe(&prefix)))
            })?;
        tokio::fs::create_dir_all(local_dir).await?;

        for (key, relative) in downloads {
            self.get(key, &local_path(local_dir, relative), step).await?;
        }
        Ok(())
    }
}
