// dbmagic/src/database/probe.rs
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::{Connection, Executor};
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::database::statements::AdminStatement;

/// MySQL `ER_DBACCESS_DENIED_ERROR`: the principal may log in but not use the schema.
pub const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
/// MySQL `ER_ACCESS_DENIED_ERROR`: wrong user name or password.
#[cfg(test)]
pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A database-side failure: the server message plus its vendor error number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbFailure {
    pub message: String,
    pub code: Option<u16>,
}

impl DbFailure {
    pub fn new(message: impl Into<String>) -> Self {
        DbFailure {
            message: message.into(),
            code: None,
        }
    }

    #[cfg(test)]
    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        DbFailure {
            message: message.into(),
            code: Some(code),
        }
    }

    pub fn is_schema_access_denied(&self) -> bool {
        self.code == Some(ER_DBACCESS_DENIED_ERROR)
    }
}

impl fmt::Display for DbFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (error {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DbFailure {}

impl From<sqlx::Error> for DbFailure {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) => DbFailure {
                message: db_err.message().to_string(),
                code: db_err
                    .try_downcast_ref::<MySqlDatabaseError>()
                    .map(|e| e.number()),
            },
            None => DbFailure::new(err.to_string()),
        }
    }
}

/// Who to connect as, and optionally which schema to open.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub schema: Option<String>,
}

impl ConnectTarget {
    /// The application credentials scoped to the configured schema.
    pub fn application(config: &DatabaseConfig) -> Self {
        ConnectTarget {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            schema: Some(config.name.clone()),
        }
    }

    /// Administrative credentials on the configured server, no schema.
    pub fn root(config: &DatabaseConfig, username: &str, password: &str) -> Self {
        ConnectTarget {
            host: config.host.clone(),
            port: config.port,
            username: username.to_string(),
            password: password.to_string(),
            schema: None,
        }
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)?;
        if let Some(schema) = &self.schema {
            write!(f, "/{}", schema)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectTarget({})", self)
    }
}

/// A live connection. Callers release it with `close`.
#[async_trait]
pub trait DbHandle: Send {
    /// Lines of `SHOW GRANTS` for the connected principal.
    async fn grants(&mut self) -> Result<Vec<String>, DbFailure>;
    async fn user_exists(&mut self, username: &str, host: &str) -> Result<bool, DbFailure>;
    async fn schema_exists(&mut self, schema: &str) -> Result<bool, DbFailure>;
    async fn table_count(&mut self, schema: &str) -> Result<i64, DbFailure>;
    async fn execute(&mut self, statement: &AdminStatement) -> Result<(), DbFailure>;
    async fn close(self: Box<Self>);
}

pub enum ProbeResult {
    Connected(Box<dyn DbHandle>),
    Failed(DbFailure),
}

impl fmt::Debug for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeResult::Connected(_) => f.write_str("Connected"),
            ProbeResult::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
        }
    }
}

/// Non-fatal connectivity check: every failure comes back as `ProbeResult::Failed`.
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    async fn probe(&self, target: &ConnectTarget) -> ProbeResult;

    /// Probes and immediately releases the connection.
    async fn check(&self, target: &ConnectTarget) -> Result<(), DbFailure> {
        match self.probe(target).await {
            ProbeResult::Connected(handle) => {
                handle.close().await;
                Ok(())
            }
            ProbeResult::Failed(failure) => Err(failure),
        }
    }
}

pub struct MySqlProbe {
    connect_timeout: Duration,
}

impl MySqlProbe {
    pub fn new() -> Self {
        MySqlProbe {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Default for MySqlProbe {
    fn default() -> Self {
        MySqlProbe::new()
    }
}

#[async_trait]
impl DatabaseProbe for MySqlProbe {
    async fn probe(&self, target: &ConnectTarget) -> ProbeResult {
        let mut options = MySqlConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&target.username)
            .password(&target.password);
        if let Some(schema) = &target.schema {
            options = options.database(schema);
        }

        debug!(target = %target, "Probing database connection");
        match timeout(self.connect_timeout, MySqlConnection::connect_with(&options)).await {
            Ok(Ok(conn)) => ProbeResult::Connected(Box::new(MySqlHandle { conn })),
            Ok(Err(e)) => ProbeResult::Failed(DbFailure::from(e)),
            Err(_) => ProbeResult::Failed(DbFailure::new(format!(
                "Connection to {}:{} timed out after {} seconds",
                target.host,
                target.port,
                self.connect_timeout.as_secs()
            ))),
        }
    }
}

struct MySqlHandle {
    conn: MySqlConnection,
}

#[async_trait]
impl DbHandle for MySqlHandle {
    async fn grants(&mut self) -> Result<Vec<String>, DbFailure> {
        let grants = sqlx::query_scalar::<_, String>("SHOW GRANTS")
            .fetch_all(&mut self.conn)
            .await?;
        Ok(grants)
    }

    async fn user_exists(&mut self, username: &str, host: &str) -> Result<bool, DbFailure> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM mysql.user WHERE User = ? AND Host = ?")
                .bind(username)
                .bind(host)
                .fetch_one(&mut self.conn)
                .await?;
        Ok(count > 0)
    }

    async fn schema_exists(&mut self, schema: &str) -> Result<bool, DbFailure> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.SCHEMATA WHERE SCHEMA_NAME = ?",
        )
        .bind(schema)
        .fetch_one(&mut self.conn)
        .await?;
        Ok(count > 0)
    }

    async fn table_count(&mut self, schema: &str) -> Result<i64, DbFailure> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM information_schema.TABLES WHERE TABLE_SCHEMA = ?")
                .bind(schema)
                .fetch_one(&mut self.conn)
                .await?;
        Ok(count)
    }

    async fn execute(&mut self, statement: &AdminStatement) -> Result<(), DbFailure> {
        debug!(statement = %statement, "Executing administrative statement");
        // A bare &str goes over the text protocol, which accepts every DDL statement.
        (&mut self.conn).execute(statement.sql()).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            debug!("Closing database connection failed: {}", e);
        }
    }
}
