//! Template rendering.
//!
//! Templates use Tera syntax (`{{ cluster_name }}`, `{% if %}`, `{% for %}`).
//! Rendering is strict: an undefined variable is an error, never an empty
//! string. Output is parsed back in its declared format before it is handed
//! to a collaborator.

use std::error::Error as StdError;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tera::Tera;
use tracing::debug;

use crate::context::RenderContext;
use crate::error::{TemplateError, TemplateResult};

/// Syntax of a template's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Yaml,
    Json,
    /// A single-line value such as a role or queue name.
    Text,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Yaml => "yaml",
            DocumentFormat::Json => "json",
            DocumentFormat::Text => "text",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named template body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    pub name: String,
    pub body: String,
    pub format: DocumentFormat,
}

impl TemplateSource {
    pub fn new(name: impl Into<String>, body: impl Into<String>, format: DocumentFormat) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            format,
        }
    }

    pub fn yaml(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(name, body, DocumentFormat::Yaml)
    }

    pub fn json(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(name, body, DocumentFormat::Json)
    }

    /// A one-line template, e.g. `KarpenterNodeRole-{{ cluster_name }}`.
    pub fn text(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(name, body, DocumentFormat::Text)
    }
}

/// Output of a render. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    name: String,
    format: DocumentFormat,
    body: String,
}

impl RenderedDocument {
    pub(crate) fn new(name: impl Into<String>, format: DocumentFormat, body: String) -> Self {
        Self {
            name: name.into(),
            format,
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn as_str(&self) -> &str {
        &self.body
    }

    pub fn into_string(self) -> String {
        self.body
    }

    /// Parse a YAML or JSON document into a generic value.
    pub fn to_value(&self) -> TemplateResult<serde_yaml::Value> {
        serde_yaml::from_str(&self.body).map_err(|e| TemplateError::MalformedOutput {
            template: self.name.clone(),
            format: self.format.to_string(),
            message: e.to_string(),
        })
    }
}

impl fmt::Display for RenderedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.body)
    }
}

/// Stateless template renderer. Safe to share across invocations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Render a template against a context.
    pub fn render(
        &self,
        source: &TemplateSource,
        context: &RenderContext,
    ) -> TemplateResult<RenderedDocument> {
        context.validate()?;
        let tera_context = context.to_tera()?;
        self.render_with(source, &tera_context)
    }

    /// Render a template against an already converted Tera context.
    ///
    /// Callers rendering many templates for the same context validate it
    /// once and reuse the conversion.
    pub fn render_with(
        &self,
        source: &TemplateSource,
        context: &tera::Context,
    ) -> TemplateResult<RenderedDocument> {
        debug!("Rendering template {} ({})", source.name, source.format);

        // A fresh instance per render keeps the renderer free of shared state.
        let mut tera = Tera::default();
        tera.add_raw_template(&source.name, &source.body)
            .map_err(|e| TemplateError::Syntax {
                template: source.name.clone(),
                message: error_chain(&e),
            })?;

        let body = tera
            .render(&source.name, context)
            .map_err(|e| classify_render_error(&source.name, &e))?;

        check_output(source, &body)?;
        Ok(RenderedDocument::new(&source.name, source.format, body))
    }
}

/// Reject a value that could change the structure of the YAML or JSON
/// document it is interpolated into.
pub fn ensure_safe_scalar(field: &str, value: &str) -> TemplateResult<()> {
    let unsafe_value = |reason: &str| TemplateError::UnsafeValue {
        field: field.to_string(),
        reason: reason.to_string(),
    };

    if let Some(c) = value.chars().find(|c| c.is_control()) {
        return Err(unsafe_value(&format!("contains control character {:?}", c)));
    }
    // Quotes and brackets break JSON strings and flow collections anywhere.
    if let Some(c) = value.chars().find(|c| "\"'\\{}[]".contains(*c)) {
        return Err(unsafe_value(&format!("contains reserved character {:?}", c)));
    }
    if value.contains(": ") || value.ends_with(':') {
        return Err(unsafe_value("contains a mapping indicator"));
    }
    if value.contains(" #") {
        return Err(unsafe_value("contains a comment marker"));
    }
    // The remaining indicators only mean something at the start of a plain scalar.
    if let Some(c) = value
        .chars()
        .next()
        .filter(|c| "-?:,#&*!|>%@` ".contains(*c))
    {
        return Err(unsafe_value(&format!("starts with indicator {:?}", c)));
    }
    if value.ends_with(' ') {
        return Err(unsafe_value("has trailing whitespace"));
    }
    Ok(())
}

fn check_output(source: &TemplateSource, body: &str) -> TemplateResult<()> {
    let malformed = |message: String| TemplateError::MalformedOutput {
        template: source.name.clone(),
        format: source.format.to_string(),
        message,
    };

    match source.format {
        DocumentFormat::Yaml => {
            serde_yaml::from_str::<serde_yaml::Value>(body).map_err(|e| malformed(e.to_string()))?;
        }
        DocumentFormat::Json => {
            serde_json::from_str::<serde_json::Value>(body).map_err(|e| malformed(e.to_string()))?;
        }
        DocumentFormat::Text => {
            if body.trim().is_empty() {
                return Err(malformed("rendered to an empty value".to_string()));
            }
            ensure_safe_scalar(&source.name, body)?;
        }
    }
    Ok(())
}

fn classify_render_error(template: &str, error: &tera::Error) -> TemplateError {
    let message = error_chain(error);
    match missing_variable_pattern().captures(&message) {
        Some(caps) => TemplateError::MissingVariable {
            template: template.to_string(),
            variable: caps[1].to_string(),
        },
        None => TemplateError::RenderingFailed {
            template: template.to_string(),
            message,
        },
    }
}

/// Tera nests the useful message in the error's source chain.
fn error_chain(error: &tera::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

fn missing_variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Variable `([^`]+)` not found").unwrap())
}
