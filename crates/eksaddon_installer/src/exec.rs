//! External command execution.
//!
//! Every collaborator that shells out (`aws`, `eksctl`, `kubectl`, `helm`)
//! goes through a [`CommandExecutor`], so tests can substitute a recording
//! executor and assert on the exact command lines.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ExecError, ExecResult};

/// A program, its arguments and optional standard input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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

    /// Append `flag value` when the value is present.
    pub fn opt(self, flag: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.arg(flag).arg(value),
            None => self,
        }
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Shell-like rendering for logs and error messages.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) || arg.contains('{') {
                out.push_str(&format!(" '{}'", arg));
            } else {
                out.push(' ');
                out.push_str(arg);
            }
        }
        out
    }

    /// Whether `words` appear as consecutive arguments.
    pub fn has_args(&self, words: &[&str]) -> bool {
        words.is_empty()
            || self
                .args
                .windows(words.len())
                .any(|w| w.iter().zip(words).all(|(a, b)| a == b))
    }

    /// Whether the arguments start with the given words.
    pub fn starts_with(&self, program: &str, args: &[&str]) -> bool {
        self.program == program
            && self.args.len() >= args.len()
            && self.args.iter().zip(args).all(|(a, b)| a == b)
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Turn a non-zero exit into an error.
    pub fn check(self, command: &CommandLine) -> ExecResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ExecError::Failed {
                command: command.display(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs command lines.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run to completion. A non-zero exit is returned, not raised.
    async fn execute(&self, command: &CommandLine) -> ExecResult<CommandOutput>;

    /// Run to completion and fail on a non-zero exit.
    async fn execute_checked(&self, command: &CommandLine) -> ExecResult<CommandOutput> {
        self.execute(command).await?.check(command)
    }
}

/// Executes commands as local child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    env: Vec<(String, String)>,
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an environment variable for every spawned command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, command: &CommandLine) -> ExecResult<CommandOutput> {
        debug!("Executing: {}", command.display());
        let started = Instant::now();

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExecError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        if let (Some(input), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if result.is_success() {
            debug!(
                "{} finished in {}ms",
                command.program,
                started.elapsed().as_millis()
            );
        } else {
            warn!(
                "{} exited with {:?}: {}",
                command.display(),
                result.code,
                result.stderr.trim()
            );
        }
        Ok(result)
    }
}
