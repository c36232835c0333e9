// dbmagic/src/backup/logic.rs
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::backup::archive::compress_in_place;
use crate::backup::db_dump::dump_database;
use crate::backup::encryption::GpgCipher;
use crate::backup::{confirmation_gate, report_failure, PipelineContext, PipelineStep};
use crate::database::ConnectTarget;
use crate::errors::{AppError, Result};
use crate::transport::{database_artifact, storage_dir};
use crate::utils::artifacts::ArtifactSet;

/// Publishes the configured database to `dbmagic/{slug}.sql.gz.enc`,
/// replacing whatever the archive held for this slug.
pub async fn export_database(ctx: &PipelineContext<'_>) -> Result<()> {
    ctx.io.info("Exporting database to the archive");
    let result = run_database_export(ctx).await;
    match &result {
        Ok(()) => ctx.io.success("Database dump was successfully exported!"),
        Err(e) => report_failure(ctx, e, "database export"),
    }
    result
}

async fn run_database_export(ctx: &PipelineContext<'_>) -> Result<()> {
    let config = ctx.config;
    let slug = &config.archive.slug;

    confirmation_gate(
        ctx.io,
        slug,
        "Warning: Exporting the database will override your currently stored database.",
        "PUBLISH the database TO dbmagic",
    )?;

    if let Err(failure) = ctx
        .probe
        .check(&ConnectTarget::application(&config.database))
        .await
    {
        ctx.io.error(&format!(
            "Could not export database '{}':",
            config.database.name
        ));
        return Err(AppError::Connectivity(failure));
    }

    let artifacts = ArtifactSet::new(&config.paths.tmp_dir, slug);
    artifacts.ensure_dir()?;

    dump_database(ctx.runner, &config.database, &artifacts.dump()).await?;
    debug!(path = %artifacts.dump().display(), "Database dumped");

    let compressed = compress_in_place(&artifacts.dump())?;
    GpgCipher::new(ctx.runner, &config.archive.secret, &config.archive.cipher)
        .encrypt(&compressed, &artifacts.encrypted())
        .await?;

    let remote = database_artifact(slug);
    ctx.transport.upload(&artifacts.encrypted(), &remote).await?;
    debug!(remote = %ctx.transport.describe(&remote), "Archive uploaded");
    Ok(())
}

/// Mirrors the storage directory to `fsmagic/{slug}/`, deletions included.
pub async fn export_storage(ctx: &PipelineContext<'_>) -> Result<()> {
    ctx.io.info("Exporting storage to the archive");
    let result = run_storage_export(ctx).await;
    match &result {
        Ok(()) => ctx.io.success("Storage was successfully exported!"),
        Err(e) => report_failure(ctx, e, "storage export"),
    }
    result
}

async fn run_storage_export(ctx: &PipelineContext<'_>) -> Result<()> {
    let config = ctx.config;
    let storage = &config.paths.storage_dir;

    // An empty tree would wipe the published copy.
    if !has_entries(storage) {
        return Err(AppError::step(
            PipelineStep::MirrorPush,
            format!(
                "storage directory ({}) is empty, nothing was published",
                storage.display()
            ),
        ));
    }

    confirmation_gate(
        ctx.io,
        &config.archive.slug,
        "Warning: Exporting the storage will override your currently stored storage.",
        "publish the storage directory to fsmagic",
    )?;

    ctx.transport
        .mirror_push(storage, &storage_dir(&config.archive.slug))
        .await
}

fn has_entries(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::testing::app_config;
    use crate::database::testing::FakeServer;
    use crate::interaction::testing::{Level, ScriptedInteraction};
    use crate::transport::testing::FakeTransport;
    use crate::utils::artifacts::leftovers;
    use crate::utils::process::testing::{failed, ok, FakeProcessRunner};

    fn ready_server() -> FakeServer {
        let server = FakeServer::with_root("toor");
        server.add_account("app", "db1", "x", &[]);
        server.add_schema("shop", 3);
        server.grant_schema("shop", "app", "db1");
        server
    }

    #[tokio::test]
    async fn test_mismatched_confirmation_has_no_side_effects() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = app_config(dir.path());
        let server = ready_server();
        let runner = FakeProcessRunner::new(|_| ok(b""));
        let transport = FakeTransport::new(&dir.path().join("remote"));
        let io = ScriptedInteraction::new(["shop"]);
        let ctx = PipelineContext {
            config: &config,
            runner: &runner,
            probe: &server,
            transport: &transport,
            io: &io,
        };

        let err = export_database(&ctx).await.unwrap_err();
        assert!(err.is_operator_abort());
        assert!(runner.calls().is_empty());
        assert!(transport.calls().is_empty());
        assert_eq!(server.state().probes, 0);
        assert!(!config.paths.tmp_dir.exists());
        assert!(!io.saw(Level::Success, "exported"));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_dump_leaves_nothing_behind() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = app_config(dir.path());
        let server = ready_server();
        let runner = FakeProcessRunner::new(|_| failed(2));
        let transport = FakeTransport::new(&dir.path().join("remote"));
        let io = ScriptedInteraction::new(["shop-prod"]);
        let ctx = PipelineContext {
            config: &config,
            runner: &runner,
            probe: &server,
            transport: &transport,
            io: &io,
        };

        let err = export_database(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::ExternalTool {
                step: PipelineStep::Dump,
                ..
            }
        ));
        assert_eq!(runner.programs(), vec!["mysqldump"]);
        assert!(transport.calls().is_empty());
        assert!(leftovers(&config.paths.tmp_dir, "shop-prod").is_empty());
        assert!(io.saw(Level::Error, "$ mysqldump -h db1 -P 3306 -u app"));
        assert!(io.saw(Level::Info, "dbmagic.log for details"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_database_aborts_before_dump() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = app_config(dir.path());
        let server = FakeServer::with_root("toor");
        let runner = FakeProcessRunner::new(|_| ok(b""));
        let transport = FakeTransport::new(&dir.path().join("remote"));
        let io = ScriptedInteraction::new(["shop-prod"]);
        let ctx = PipelineContext {
            config: &config,
            runner: &runner,
            probe: &server,
            transport: &transport,
            io: &io,
        };

        let err = export_database(&ctx).await.unwrap_err();
        assert!(matches!(err, AppError::Connectivity(_)));
        assert!(io.saw(Level::Error, "Could not export database 'shop':"));
        assert!(runner.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_upload_still_cleans_up() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = app_config(dir.path());
        let server = ready_server();
        let runner = FakeProcessRunner::new(|spec| {
            if let Some(pos) = spec.args.iter().position(|a| a == "--output") {
                let _ = std::fs::write(&spec.args[pos + 1], b"sealed");
            }
            ok(b"-- dump")
        });
        let transport = FakeTransport::failing(&dir.path().join("remote"), PipelineStep::Upload);
        let io = ScriptedInteraction::new(["shop-prod"]);
        let ctx = PipelineContext {
            config: &config,
            runner: &runner,
            probe: &server,
            transport: &transport,
            io: &io,
        };

        let err = export_database(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Step {
                step: PipelineStep::Upload,
                ..
            }
        ));
        assert_eq!(runner.programs(), vec!["mysqldump", "gpg"]);
        assert!(leftovers(&config.paths.tmp_dir, "shop-prod").is_empty());
        assert!(io.saw(Level::Info, "Aborting database export"));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_storage_is_never_published() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = app_config(dir.path());
        std::fs::create_dir_all(&config.paths.storage_dir)?;
        let server = ready_server();
        let runner = FakeProcessRunner::new(|_| ok(b""));
        let transport = FakeTransport::new(&dir.path().join("remote"));
        let io = ScriptedInteraction::default();
        let ctx = PipelineContext {
            config: &config,
            runner: &runner,
            probe: &server,
            transport: &transport,
            io: &io,
        };

        let err = export_storage(&ctx).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Step {
                step: PipelineStep::MirrorPush,
                ref message,
            } if message.contains("is empty")
        ));
        assert!(io.saw(Level::Error, "storage push failed: storage directory"));
        assert!(io.prompts().is_empty());
        assert!(transport.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_export_mirrors_after_confirmation() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = app_config(dir.path());
        std::fs::create_dir_all(config.paths.storage_dir.join("images"))?;
        std::fs::write(config.paths.storage_dir.join("images/logo.png"), b"png")?;

        let remote_root = dir.path().join("remote");
        let stale = remote_root.join("fsmagic/shop-prod/old.txt");
        std::fs::create_dir_all(stale.parent().unwrap())?;
        std::fs::write(&stale, b"old")?;

        let server = ready_server();
        let runner = FakeProcessRunner::new(|_| ok(b""));
        let transport = FakeTransport::new(&remote_root);
        let io = ScriptedInteraction::new(["shop-prod"]);
        let ctx = PipelineContext {
            config: &config,
            runner: &runner,
            probe: &server,
            transport: &transport,
            io: &io,
        };

        export_storage(&ctx).await?;
        assert_eq!(transport.calls(), vec!["mirror_push fsmagic/shop-prod/"]);
        assert!(remote_root.join("fsmagic/shop-prod/images/logo.png").exists());
        assert!(!stale.exists());
        assert!(io.saw(Level::Success, "Storage was successfully exported!"));
        Ok(())
    }
}
