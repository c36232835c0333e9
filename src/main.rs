//! Database and storage snapshots for one deployment.
//!
//! Repairs the application's MySQL access and moves encrypted database dumps
//! and the storage tree to and from a shared archive.

// dbmagic/src/main.rs
mod backup;
mod config;
mod database;
mod diagnosis;
mod errors;
mod interaction;
mod restore;
mod transport;
mod utils;

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use backup::PipelineContext;
use config::AppConfig;
use database::MySqlProbe;
use errors::AppError;
use interaction::{ConsoleInteraction, InteractionPort};
use utils::process::SystemProcessRunner;

const DEFAULT_CONFIG_PATH: &str = "config.json";
const CONFIG_PATH_VAR: &str = "DBMAGIC_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Doctor,
    DbExport,
    DbImport,
    StorageExport,
    StorageImport,
}

impl Command {
    fn parse(choice: &str) -> Option<Self> {
        match choice {
            "1" | "doctor" => Some(Command::Doctor),
            "2" | "db:export" => Some(Command::DbExport),
            "3" | "db:import" => Some(Command::DbImport),
            "4" | "storage:export" => Some(Command::StorageExport),
            "5" | "storage:import" => Some(Command::StorageImport),
            _ => None,
        }
    }

    /// Database commands make sure the application can reach its schema first.
    fn needs_database(self) -> bool {
        matches!(self, Command::Doctor | Command::DbExport | Command::DbImport)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run_app().await {
        Ok(()) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            match e.downcast_ref::<AppError>() {
                Some(app_err) if app_err.is_operator_abort() => println!("🛑 {}", app_err),
                _ => eprintln!("❌ Error: {:?}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    let config_path = env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let app_config = AppConfig::load_from_json(&config_path).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            config_path.display()
        )
    })?;

    let choice = match env::args().nth(1) {
        Some(arg) => arg.trim().to_string(),
        None => prompt_choice()?,
    };
    let Some(command) = Command::parse(&choice) else {
        println!("❌ Invalid choice. Enter 1-5 or one of: doctor, db:export, db:import, storage:export, storage:import.");
        anyhow::bail!("Invalid operation choice: {}", choice);
    };

    let io = ConsoleInteraction::new();
    let runner = SystemProcessRunner::new(&app_config.paths.log_file);
    let probe = MySqlProbe::new();
    let transport = transport::build_transport(&app_config.archive, &runner)
        .await
        .context("Failed to set up the archive transport")?;
    let ctx = PipelineContext {
        config: &app_config,
        runner: &runner,
        probe: &probe,
        transport: transport.as_ref(),
        io: &io,
    };

    utils::workspace::prepare_workspace(&app_config.paths, &io)
        .context("Failed to prepare the working directories")?;

    if command.needs_database() {
        println!("🔍 Checking database access for {}...", app_config.database);
        diagnosis::setup_database(&app_config.database, &probe, &io)
            .await
            .context("Database setup failed")?;
    }

    match command {
        Command::Doctor => {
            diagnosis::check_database(&ctx)
                .await
                .context("Database check failed")?;
            io.complete("Your installation is ready");
        }
        Command::DbExport => {
            println!("🚀 Starting database export...");
            backup::export_database(&ctx)
                .await
                .context("Database export failed")?;
        }
        Command::DbImport => {
            println!("🔄 Starting database import...");
            restore::import_database(&ctx)
                .await
                .context("Database import failed")?;
        }
        Command::StorageExport => {
            println!("🚀 Starting storage export...");
            backup::export_storage(&ctx)
                .await
                .context("Storage export failed")?;
        }
        Command::StorageImport => {
            println!("🔄 Starting storage import...");
            restore::import_storage(&ctx)
                .await
                .context("Storage import failed")?;
        }
    }
    Ok(())
}

/// Asks which command to run when none was given on the command line.
fn prompt_choice() -> Result<String> {
    use std::io::{stdin, stdout, Write};

    println!("Select an operation:");
    println!("1. Check and repair the database setup (or type 'doctor')");
    println!("2. Publish the database to the archive (or type 'db:export')");
    println!("3. Import the database from the archive (or type 'db:import')");
    println!("4. Publish the storage directory (or type 'storage:export')");
    println!("5. Import the storage directory (or type 'storage:import')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin()
        .read_line(&mut input)
        .context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
