// dbmagic/src/restore/logic.rs
use std::fs;
use tracing::debug;

use crate::backup::archive::decompress_in_place;
use crate::backup::encryption::GpgCipher;
use crate::backup::{confirmation_gate, report_failure, PipelineContext};
use crate::errors::Result;
use crate::restore::db_restore::load_dump;
use crate::transport::{database_artifact, storage_dir};
use crate::utils::artifacts::ArtifactSet;

/// Replaces the local database with the archived `dbmagic/{slug}.sql.gz.enc`.
pub async fn import_database(ctx: &PipelineContext<'_>) -> Result<()> {
    ctx.io.info("Importing database from the archive");
    let result = run_database_import(ctx).await;
    match &result {
        Ok(()) => ctx.io.success("Database dump was successfully imported!"),
        Err(e) => report_failure(ctx, e, "database import"),
    }
    result
}

async fn run_database_import(ctx: &PipelineContext<'_>) -> Result<()> {
    let config = ctx.config;
    let slug = &config.archive.slug;

    confirmation_gate(
        ctx.io,
        slug,
        "Warning: Importing the database will override your local database.",
        "IMPORT the database FROM dbmagic",
    )?;

    let artifacts = ArtifactSet::new(&config.paths.tmp_dir, slug);
    artifacts.ensure_dir()?;

    let remote = database_artifact(slug);
    debug!(remote = %ctx.transport.describe(&remote), "Downloading archive");
    ctx.transport.download(&remote, &artifacts.encrypted()).await?;

    GpgCipher::new(ctx.runner, &config.archive.secret, &config.archive.cipher)
        .decrypt(&artifacts.encrypted(), &artifacts.compressed())
        .await?;
    let dump = decompress_in_place(&artifacts.compressed())?;

    load_dump(ctx.runner, &config.database, &dump).await
}

/// Copies `fsmagic/{slug}/` into the storage directory. Files that only exist
/// locally are kept, so no confirmation is asked.
pub async fn import_storage(ctx: &PipelineContext<'_>) -> Result<()> {
    ctx.io.info("Importing storage from the archive");
    let result = run_storage_import(ctx).await;
    match &result {
        Ok(()) => ctx.io.success("Storage was successfully imported!"),
        Err(e) => report_failure(ctx, e, "storage import"),
    }
    result
}

async fn run_storage_import(ctx: &PipelineContext<'_>) -> Result<()> {
    let storage = &ctx.config.paths.storage_dir;
    fs::create_dir_all(storage)?;
    ctx.transport
        .pull_tree(&storage_dir(&ctx.config.archive.slug), storage)
        .await
}
