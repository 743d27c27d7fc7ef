//! # eksaddon_templates
//!
//! Rendering context, template renderer and IAM policy documents for eksaddon.
//!
//! Everything an add-on writes to the cloud or the cluster passes through this
//! crate: names like `KarpenterNodeRole-{{ cluster_name }}`, Helm values
//! documents, in-cluster manifests and IAM policies.
//!
//! - [`RenderContext`] is the immutable variable bag for one invocation.
//! - [`TemplateRenderer`] renders Tera templates strictly (undefined
//!   variables fail) and rejects values that would corrupt YAML/JSON.
//! - [`PolicyDocument`] builds IAM policies as data rather than text.
//!
//! ## Example
//!
//! ```rust
//! use eksaddon_templates::{RenderContext, TemplateRenderer, TemplateSource};
//!
//! let ctx = RenderContext::new("aws", "us-east-1", "111111111111", "demo");
//! let source = TemplateSource::text("queue", "karpenter-{{ cluster_name }}");
//! let doc = TemplateRenderer::new().render(&source, &ctx).unwrap();
//! assert_eq!(doc.as_str(), "karpenter-demo");
//! ```

pub mod context;
pub mod error;
pub mod policy;
pub mod renderer;

pub use context::{IrsaAnnotation, RenderContext, KNOWN_PARTITIONS};
pub use error::{TemplateError, TemplateResult};
pub use policy::{ConditionBlock, Effect, OneOrMany, PolicyDocument, Principal, Statement};
pub use renderer::{
    ensure_safe_scalar, DocumentFormat, RenderedDocument, TemplateRenderer, TemplateSource,
};
