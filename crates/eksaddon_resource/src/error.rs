//! Error types for cloud resources.

use std::fmt;

use eksaddon_installer::ExecError;
use eksaddon_templates::TemplateError;
use thiserror::Error;

use crate::kind::ResourceKind;
use crate::resource::TeardownReport;

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Result type alias for cloud collaborator calls.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors reported by a [`CloudProvider`](crate::CloudProvider).
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Cloud API error: {0}")]
    Api(String),
}

impl CloudError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}

/// Errors that can occur while validating, resolving, ensuring or tearing
/// down resources.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("Duplicate resource name: {0}")]
    DuplicateName(String),

    #[error("Resource {resource} requires unknown resource {reference}")]
    UnknownReference { resource: String, reference: String },

    #[error("Dependency cycle or ordering violation involving {0}")]
    Cycle(String),

    #[error("Failed to render {name}: {source}")]
    Template {
        name: String,
        #[source]
        source: TemplateError,
    },

    #[error("Lookup of {kind} {name} failed: {source}")]
    Lookup {
        name: String,
        kind: ResourceKind,
        #[source]
        source: CloudError,
    },

    #[error("Create of {kind} {name} failed: {source}")]
    Create {
        name: String,
        kind: ResourceKind,
        #[source]
        source: CloudError,
    },

    #[error("Delete of {kind} {name} failed: {source}")]
    Delete {
        name: String,
        kind: ResourceKind,
        #[source]
        source: CloudError,
    },
}

impl ResourceError {
    /// Name of the resource the error is about, when there is one.
    pub fn resource_name(&self) -> Option<&str> {
        match self {
            ResourceError::DuplicateName(name) | ResourceError::Cycle(name) => Some(name),
            ResourceError::UnknownReference { resource, .. } => Some(resource),
            ResourceError::Template { name, .. }
            | ResourceError::Lookup { name, .. }
            | ResourceError::Create { name, .. }
            | ResourceError::Delete { name, .. } => Some(name),
        }
    }
}

/// Teardown keeps going past individual failures and reports all of them.
#[derive(Debug)]
pub struct TeardownError {
    pub failures: Vec<ResourceError>,
    /// Resources that were handled before and after the failures.
    pub completed: Vec<TeardownReport>,
}

impl TeardownError {
    pub fn new(failures: Vec<ResourceError>, completed: Vec<TeardownReport>) -> Self {
        Self { failures, completed }
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter_map(ResourceError::resource_name)
            .collect()
    }
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Teardown failed for {} resource(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}
