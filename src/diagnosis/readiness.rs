// dbmagic/src/diagnosis/readiness.rs
use tracing::debug;

use crate::backup::PipelineContext;
use crate::database::{ConnectTarget, ProbeResult};
use crate::errors::{AppError, Result};
use crate::restore::import_database;

/// Succeeds when the application schema holds tables. Otherwise offers to
/// import the archived dump; declining ends the command.
pub async fn check_database(ctx: &PipelineContext<'_>) -> Result<()> {
    let database = &ctx.config.database;

    let tables = match ctx.probe.probe(&ConnectTarget::application(database)).await {
        ProbeResult::Connected(mut handle) => {
            let count = handle.table_count(&database.name).await;
            handle.close().await;
            count.unwrap_or_else(|failure| {
                debug!(%failure, "Counting tables failed");
                0
            })
        }
        ProbeResult::Failed(failure) => {
            debug!(%failure, "Application login failed during readiness check");
            0
        }
    };

    if tables > 0 {
        ctx.io.success(&format!(
            "Database '{}' is populated ({} tables)!",
            database.name, tables
        ));
        return Ok(());
    }

    ctx.io
        .info("It seems like you have not yet imported a database dump.");
    if ctx.io.confirm("Import dump from the archive?", true)? {
        import_database(ctx).await
    } else {
        ctx.io.info("Database not ready -> exiting...");
        Err(AppError::OperatorAbort("database not ready".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::testing::app_config;
    use crate::database::testing::FakeServer;
    use crate::interaction::testing::{Level, ScriptedInteraction};
    use crate::transport::testing::FakeTransport;
    use crate::utils::process::testing::{ok, FakeProcessRunner};

    fn server_with_tables(tables: i64) -> FakeServer {
        let server = FakeServer::with_root("toor");
        server.add_account("app", "db1", "x", &[]);
        server.add_schema("shop", tables);
        server.grant_schema("shop", "app", "db1");
        server
    }

    #[tokio::test]
    async fn test_populated_schema_needs_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = app_config(dir.path());
        let server = server_with_tables(12);
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

        check_database(&ctx).await?;
        assert!(io.saw(Level::Success, "(12 tables)"));
        assert!(io.prompts().is_empty());
        assert_eq!(server.state().open_handles, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_schema_offers_import() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = app_config(dir.path());
        let server = server_with_tables(0);
        let runner = FakeProcessRunner::new(|_| ok(b""));
        let transport = FakeTransport::new(&dir.path().join("remote"));

        let io = ScriptedInteraction::new(["n"]);
        let ctx = PipelineContext {
            config: &config,
            runner: &runner,
            probe: &server,
            transport: &transport,
            io: &io,
        };
        let err = check_database(&ctx).await.unwrap_err();
        assert!(err.is_operator_abort());
        assert!(io.saw(Level::Info, "Database not ready -> exiting..."));

        // Accepting leads into the import, whose own gate is declined here.
        let io = ScriptedInteraction::new(["y", "nope"]);
        let ctx = PipelineContext { io: &io, ..ctx };
        let err = check_database(&ctx).await.unwrap_err();
        assert!(err.is_operator_abort());
        assert_eq!(
            io.prompts(),
            vec![
                "Import dump from the archive?",
                "Type 'shop-prod' to IMPORT the database FROM dbmagic"
            ]
        );
        assert!(transport.calls().is_empty());
        Ok(())
    }
}
