//! Error types for command execution and package installation.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for command execution.
pub type ExecResult<T> = Result<T, ExecError>;

/// Result type alias for package manager calls.
pub type PackageResult<T> = Result<T, PackageError>;

/// Result type alias for installer operations.
pub type InstallerResult<T> = Result<T, InstallerError>;

/// Errors from running an external command.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a [`PackageManager`](crate::PackageManager).
#[derive(Error, Debug)]
pub enum PackageError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Unexpected output from {command}: {message}")]
    Parse { command: String, message: String },

    #[error("Package manager error: {0}")]
    Api(String),
}

/// Errors that can occur while applying or removing a release.
#[derive(Error, Debug)]
pub enum InstallerError {
    #[error("Install of release {release} failed: {source}. The release may be left partially applied; re-running install is safe")]
    Install {
        release: String,
        #[source]
        source: PackageError,
    },

    /// Raised on deadline expiry and on cancellation alike.
    #[error("Release {release} was applied but was not ready after {waited:?}{}", wait_note(.cancelled))]
    ReadinessTimeout {
        release: String,
        waited: Duration,
        cancelled: bool,
    },

    #[error("Removal of release {release} failed: {source}")]
    Remove {
        release: String,
        #[source]
        source: PackageError,
    },

    #[error("Could not read state of release {release}: {source}")]
    Status {
        release: String,
        #[source]
        source: PackageError,
    },

    #[error("Values document for {release} is not a mapping: {message}")]
    InvalidValues { release: String, message: String },
}

impl InstallerError {
    /// Re-running the install may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InstallerError::Install { .. }
                | InstallerError::ReadinessTimeout { .. }
                | InstallerError::Status { .. }
        )
    }

    /// The workload was applied and only the readiness wait failed.
    pub fn is_readiness_timeout(&self) -> bool {
        matches!(self, InstallerError::ReadinessTimeout { .. })
    }
}

fn wait_note(cancelled: &bool) -> &'static str {
    if *cancelled {
        " (wait cancelled)"
    } else {
        ""
    }
}
