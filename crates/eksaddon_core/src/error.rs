//! Error types for the core module.

use std::path::PathBuf;

use eksaddon_installer::{ExecError, InstallerError};
use eksaddon_resource::{ResourceError, TeardownError};
use eksaddon_templates::TemplateError;
use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while planning, installing or uninstalling an
/// application.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    #[error("Invalid option {key}: {message}")]
    InvalidOption { key: String, message: String },

    #[error("Failed to read options file {path}: {message}")]
    OptionsFile { path: PathBuf, message: String },

    #[error("Cluster context lookup failed for {cluster}: {message}")]
    Context { cluster: String, message: String },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Installer(#[from] InstallerError),

    #[error(transparent)]
    Teardown(#[from] TeardownError),
}

impl CoreError {
    pub fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::InvalidOption {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Whether the failure happened before anything in the account or the
    /// cluster was changed.
    pub fn is_pre_flight(&self) -> bool {
        match self {
            CoreError::ApplicationNotFound(_)
            | CoreError::InvalidOption { .. }
            | CoreError::OptionsFile { .. }
            | CoreError::Context { .. }
            | CoreError::Exec(_)
            | CoreError::Template(_) => true,
            CoreError::Resource(e) => matches!(
                e,
                ResourceError::DuplicateName(_)
                    | ResourceError::UnknownReference { .. }
                    | ResourceError::Cycle(_)
                    | ResourceError::Template { .. }
            ),
            CoreError::Installer(_) | CoreError::Teardown(_) => false,
        }
    }
}
