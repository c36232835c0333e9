// dbmagic/src/diagnosis/engine.rs
//! Guided repair of the application's database access.
//!
//! The engine is a single loop over [`Step`]. Each step runs one check, talks
//! to the operator when something is missing and names the next step. Repair
//! actions always re-enter at [`Step::RootLogin`] so that the root login and
//! every later check are validated again against the changed server.

use std::fmt;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::database::statements::{self, AdminStatement};
use crate::database::{ConnectTarget, DatabaseProbe, DbHandle, ProbeResult};
use crate::errors::Result;
use crate::interaction::InteractionPort;

/// Grant fragment that marks a principal as able to repair users, schemas and grants.
pub const ROOT_PRIVILEGE_MARKER: &str = "ALL PRIVILEGES ON *.*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    AwaitProbe,
    AskRepair,
    RootLogin,
    PrivilegeCheck,
    UserCheck,
    SchemaCheck,
    SchemaPrivilegeCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Repaired,
    /// The operator declined to continue; the calling command must stop.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Next(Step),
    Finish(Outcome),
}

#[derive(Clone, PartialEq, Eq)]
pub struct RootCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RootCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootCredentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// State carried across re-entries of one diagnosis run.
#[derive(Default)]
pub struct DiagnosisSession {
    root: Option<RootCredentials>,
    handle: Option<Box<dyn DbHandle>>,
}

impl DiagnosisSession {
    async fn release_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close().await;
        }
    }

    async fn forget_root(&mut self) {
        self.release_handle().await;
        self.root = None;
    }
}

/// True when any `SHOW GRANTS` line grants `ALL PRIVILEGES ON *.*`.
pub fn is_root_capable(grants: &[String]) -> bool {
    grants
        .iter()
        .any(|line| line.to_ascii_uppercase().contains(ROOT_PRIVILEGE_MARKER))
}

pub struct DiagnosisEngine<'a> {
    config: &'a DatabaseConfig,
    probe: &'a dyn DatabaseProbe,
    io: &'a dyn InteractionPort,
    step: Step,
    session: DiagnosisSession,
}

impl<'a> DiagnosisEngine<'a> {
    pub fn new(
        config: &'a DatabaseConfig,
        probe: &'a dyn DatabaseProbe,
        io: &'a dyn InteractionPort,
    ) -> Self {
        DiagnosisEngine {
            config,
            probe,
            io,
            step: Step::AwaitProbe,
            session: DiagnosisSession::default(),
        }
    }

    pub fn step(&self) -> Step {
        self.step
    }

    #[cfg(test)]
    pub fn has_root_credentials(&self) -> bool {
        self.session.root.is_some()
    }

    /// Starts over at [`Step::AwaitProbe`].
    pub fn restart(&mut self) {
        self.step = Step::AwaitProbe;
    }

    /// Drives the machine to a terminal outcome. The session, root connection
    /// included, is discarded on every exit.
    pub async fn run(&mut self) -> Result<Outcome> {
        let result = loop {
            match self.advance().await {
                Ok(Some(outcome)) => break Ok(outcome),
                Ok(None) => continue,
                Err(e) => break Err(e),
            }
        };
        self.session.forget_root().await;
        result
    }

    /// Executes the current step. Returns the outcome once a terminal state is reached.
    pub async fn advance(&mut self) -> Result<Option<Outcome>> {
        let transition = match self.step {
            Step::AwaitProbe => self.await_probe().await?,
            Step::AskRepair => self.ask_repair()?,
            Step::RootLogin => self.root_login().await?,
            Step::PrivilegeCheck => self.privilege_check().await?,
            Step::UserCheck => self.user_check().await?,
            Step::SchemaCheck => self.schema_check().await?,
            Step::SchemaPrivilegeCheck => self.schema_privilege_check().await?,
        };
        debug!(from = ?self.step(), to = ?transition, "Diagnosis transition");

        match transition {
            Transition::Next(step) => {
                self.step = step;
                Ok(None)
            }
            Transition::Finish(outcome) => Ok(Some(outcome)),
        }
    }

    async fn await_probe(&mut self) -> Result<Transition> {
        match self.probe.probe(&ConnectTarget::application(self.config)).await {
            ProbeResult::Connected(handle) => {
                handle.close().await;
                Ok(Transition::Finish(Outcome::Repaired))
            }
            ProbeResult::Failed(failure) => {
                self.io.error("A database error occurred!");
                self.io.error(&failure.to_string());
                Ok(Transition::Next(Step::AskRepair))
            }
        }
    }

    fn ask_repair(&mut self) -> Result<Transition> {
        if self.io.confirm("Run diagnosis?", true)? {
            Ok(Transition::Next(Step::RootLogin))
        } else {
            Ok(Transition::Finish(Outcome::Aborted))
        }
    }

    async fn root_login(&mut self) -> Result<Transition> {
        // Every entry reconnects, so a repair made on the previous round is seen.
        self.session.release_handle().await;

        let credentials = match self.session.root.take() {
            Some(credentials) => credentials,
            None => RootCredentials {
                username: self
                    .io
                    .ask("MySQL root user", Some(self.config.username.as_str()))?,
                password: self
                    .io
                    .ask("MySQL root password", Some(self.config.password.as_str()))?,
            },
        };

        let target = ConnectTarget::root(self.config, &credentials.username, &credentials.password);
        match self.probe.probe(&target).await {
            ProbeResult::Connected(handle) => {
                self.session.handle = Some(handle);
                self.session.root = Some(credentials);
                Ok(Transition::Next(Step::PrivilegeCheck))
            }
            ProbeResult::Failed(failure) => {
                self.io.info(
                    "The system was not able to log in to your MySQL server. Are you providing root user credentials?",
                );
                self.io.error(&failure.to_string());
                self.retry()
            }
        }
    }

    async fn privilege_check(&mut self) -> Result<Transition> {
        let Some(handle) = self.session.handle.as_mut() else {
            return Ok(Transition::Next(Step::RootLogin));
        };

        let grants = match handle.grants().await {
            Ok(grants) => grants,
            Err(failure) => {
                self.io.error("Could not read the privileges of the root user:");
                self.io.error(&failure.to_string());
                return self.retry();
            }
        };

        if is_root_capable(&grants) {
            self.io.success("Root user has sufficient privileges!");
            return Ok(Transition::Next(Step::UserCheck));
        }

        let username = self
            .session
            .root
            .as_ref()
            .map(|c| c.username.clone())
            .unwrap_or_default();
        self.io
            .error(&format!("The user '{}' does not have root privileges!", username));
        self.session.forget_root().await;
        self.retry()
    }

    async fn user_check(&mut self) -> Result<Transition> {
        let Some(handle) = self.session.handle.as_mut() else {
            return Ok(Transition::Next(Step::RootLogin));
        };
        let config = self.config;
        let (username, host) = (&config.username, &config.user_host);

        match handle.user_exists(username, host).await {
            Ok(true) => {
                self.io.success(&format!("User '{}' exists!", username));
                Ok(Transition::Next(Step::SchemaCheck))
            }
            Ok(false) => {
                self.io
                    .error(&format!("The user '{}'@'{}' does not exist!", username, host));
                if self.io.confirm("Create user?", true)? {
                    let statement = statements::create_user(username, host, &config.password)?;
                    self.apply(&[statement]).await
                } else {
                    self.retry()
                }
            }
            Err(failure) => {
                self.io.error("Could not look up the application user:");
                self.io.error(&failure.to_string());
                self.retry()
            }
        }
    }

    async fn schema_check(&mut self) -> Result<Transition> {
        let Some(handle) = self.session.handle.as_mut() else {
            return Ok(Transition::Next(Step::RootLogin));
        };
        let config = self.config;
        let schema = &config.name;

        match handle.schema_exists(schema).await {
            Ok(true) => {
                self.io.success(&format!("Database '{}' exists!", schema));
                Ok(Transition::Next(Step::SchemaPrivilegeCheck))
            }
            Ok(false) => {
                self.io
                    .error(&format!("The database '{}' does not exist!", schema));
                if self.io.confirm("Create database?", true)? {
                    let statement = statements::create_database(schema)?;
                    self.apply(&[statement]).await
                } else {
                    self.retry()
                }
            }
            Err(failure) => {
                self.io.error("Could not look up the database:");
                self.io.error(&failure.to_string());
                self.retry()
            }
        }
    }

    async fn schema_privilege_check(&mut self) -> Result<Transition> {
        let config = self.config;
        let (username, schema) = (&config.username, &config.name);

        match self.probe.probe(&ConnectTarget::application(config)).await {
            ProbeResult::Connected(handle) => {
                handle.close().await;
                self.io.success(&format!(
                    "User '{}' has privileges to access database '{}'!",
                    username, schema
                ));
                Ok(Transition::Finish(Outcome::Repaired))
            }
            ProbeResult::Failed(failure) if failure.is_schema_access_denied() => {
                self.io.error(&format!(
                    "The user '{}' does not have privileges to access the database '{}'!",
                    username, schema
                ));
                if self.io.confirm("Create privileges?", true)? {
                    let grant =
                        statements::grant_schema_privileges(schema, username, &config.user_host)?;
                    self.apply(&[grant, statements::flush_privileges()]).await
                } else {
                    self.retry()
                }
            }
            ProbeResult::Failed(failure) => {
                self.io.error("An unexpected error occurred:");
                self.io.error(&failure.to_string());
                self.retry()
            }
        }
    }

    /// Runs mutating statements on the root connection, then re-enters.
    async fn apply(&mut self, batch: &[AdminStatement]) -> Result<Transition> {
        let Some(handle) = self.session.handle.as_mut() else {
            return Ok(Transition::Next(Step::RootLogin));
        };

        for statement in batch {
            if let Err(failure) = handle.execute(statement).await {
                self.io.error(&format!("Could not execute: {}", statement));
                self.io.error(&failure.to_string());
                return self.retry();
            }
            self.io.success(&format!("Executed: {}", statement));
        }
        Ok(Transition::Next(Step::RootLogin))
    }

    /// Waits for the operator before re-entering at the root login. Root
    /// credentials still in the session are reused there.
    fn retry(&mut self) -> Result<Transition> {
        if self.io.retry_prompt()? {
            Ok(Transition::Next(Step::RootLogin))
        } else {
            Ok(Transition::Finish(Outcome::Aborted))
        }
    }
}
