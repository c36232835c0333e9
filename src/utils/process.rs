// dbmagic/src/utils/process.rs
use async_trait::async_trait;
use chrono::Local;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{AppError, Result};
use crate::utils::find_executable;

/// What an external command reads on stdin.
#[derive(Debug, Clone)]
pub enum StdinSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// A structured command line. Secrets travel through `env` or `stdin`, never `args`,
/// so `Display` is safe to show to the operator and to write to the log sink.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<StdinSource>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        CommandSpec {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, source: StdinSource) -> Self {
        self.stdin = Some(source);
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        if let Some(StdinSource::File(path)) = &self.stdin {
            write!(f, " < {}", path.display())?;
        }
        Ok(())
    }
}

/// Outcome of one external invocation. Non-zero exit is the failure signal.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub succeeded: bool,
    pub output: Vec<u8>,
    pub exit_code: Option<i32>,
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `spec` to completion. Only a missing executable or a spawn failure is an
    /// `Err`; a non-zero exit is reported through `CommandResult::succeeded`.
    async fn run(&self, spec: &CommandSpec, redirect_stderr_to_log: bool) -> Result<CommandResult>;

    /// The file redirected stderr is appended to.
    fn log_sink(&self) -> &Path;
}

/// Runs commands on the host, resolving programs on `PATH`.
pub struct SystemProcessRunner {
    log_sink: PathBuf,
}

impl SystemProcessRunner {
    pub fn new(log_sink: impl Into<PathBuf>) -> Self {
        SystemProcessRunner {
            log_sink: log_sink.into(),
        }
    }

    fn append_to_log(&self, spec: &CommandSpec, stderr: &[u8]) {
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_sink)
            .and_then(|mut file| {
                writeln!(
                    file,
                    "--- {} $ {}",
                    Local::now().format("%Y-%m-%d %H:%M:%S"),
                    spec
                )?;
                file.write_all(stderr)
            });
        if let Err(e) = appended {
            warn!(
                log_sink = %self.log_sink.display(),
                "Failed to append command stderr to log sink: {}",
                e
            );
        }
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, spec: &CommandSpec, redirect_stderr_to_log: bool) -> Result<CommandResult> {
        let program_path = find_executable(&spec.program)?;
        debug!(command = %spec, "Running external command");

        let mut command = Command::new(program_path);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(if redirect_stderr_to_log {
                Stdio::piped()
            } else {
                Stdio::inherit()
            });

        match &spec.stdin {
            Some(StdinSource::File(path)) => {
                let file = std::fs::File::open(path)?;
                command.stdin(Stdio::from(file));
            }
            Some(StdinSource::Bytes(_)) => {
                command.stdin(Stdio::piped());
            }
            None => {
                command.stdin(Stdio::null());
            }
        }

        let mut child = command.spawn()?;
        let feed = match &spec.stdin {
            Some(StdinSource::Bytes(bytes)) => child.stdin.take().map(|pipe| (pipe, bytes)),
            _ => None,
        };
        // Feed stdin while collecting output, so a child that exits early is
        // still reaped and its stderr still reaches the log sink.
        let write_stdin = async move {
            if let Some((mut pipe, bytes)) = feed {
                pipe.write_all(bytes).await?;
                // Dropping the pipe closes it so the child sees EOF.
            }
            Ok::<(), std::io::Error>(())
        };
        let (written, output) = tokio::join!(write_stdin, child.wait_with_output());
        let output = output?;
        if redirect_stderr_to_log && !output.stderr.is_empty() {
            self.append_to_log(spec, &output.stderr);
        }
        match written {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!(command = %spec, "Command exited before reading all of stdin");
            }
            Err(e) => return Err(e.into()),
            Ok(()) => {}
        }

        debug!(command = %spec, status = %output.status, "External command finished");
        Ok(CommandResult {
            succeeded: output.status.success(),
            output: output.stdout,
            exit_code: output.status.code(),
        })
    }

    fn log_sink(&self) -> &Path {
        &self.log_sink
    }
}
