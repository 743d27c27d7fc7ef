//! Error types for templates.

use thiserror::Error;

/// Result type alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur while building a context or rendering a document.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Variable not found in context while rendering {template}: {variable}")]
    MissingVariable { template: String, variable: String },

    #[error("Template {template} is malformed: {message}")]
    Syntax { template: String, message: String },

    #[error("Template rendering failed for {template}: {message}")]
    RenderingFailed { template: String, message: String },

    #[error("Unsafe value for {field}: {reason}")]
    UnsafeValue { field: String, reason: String },

    #[error("Invalid context field {field}: {message}")]
    InvalidContext { field: String, message: String },

    #[error("Rendered {template} is not valid {format}: {message}")]
    MalformedOutput {
        template: String,
        format: String,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
