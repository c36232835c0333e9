// dbmagic/src/diagnosis/mod.rs
pub mod engine;
mod readiness;

use tracing::debug;

use crate::config::DatabaseConfig;
use crate::database::{ConnectTarget, DatabaseProbe};
use crate::errors::{AppError, Result};
use crate::interaction::InteractionPort;

pub use engine::{DiagnosisEngine, Outcome};
pub use readiness::check_database;

/// Makes sure the application credentials can open their schema, repairing
/// the server with the operator's help when they cannot.
pub async fn setup_database(
    config: &DatabaseConfig,
    probe: &dyn DatabaseProbe,
    io: &dyn InteractionPort,
) -> Result<()> {
    let mut engine = DiagnosisEngine::new(config, probe, io);
    loop {
        match engine.run().await? {
            Outcome::Aborted => {
                io.info("Update the database section of your configuration and run the command again.");
                return Err(AppError::OperatorAbort("database diagnosis declined".to_string()));
            }
            Outcome::Repaired => match probe.check(&ConnectTarget::application(config)).await {
                Ok(()) => {
                    io.success("Database test successful!");
                    return Ok(());
                }
                Err(failure) => {
                    debug!(%failure, "Probe still failing after repair, diagnosing again");
                    engine.restart();
                }
            },
        }
    }
}
