//! # eksaddon_resource
//!
//! Cloud and cluster resources an add-on depends on, and the resolver that
//! creates and removes them in order.
//!
//! ## Features
//!
//! - Seven resource kinds: service-linked roles, workload (IRSA) roles, IAM
//!   roles, IAM-to-Kubernetes identity mappings, managed queues, customer
//!   policies and in-cluster manifests
//! - Idempotent ensure (lookup, then create only if absent)
//! - Reverse-order teardown that keeps going past failures
//! - [`AwsCliProvider`] drives `aws`, `eksctl` and `kubectl`; [`MockCloud`]
//!   keeps everything in memory for tests
//!
//! ## Example
//!
//! ```rust
//! use eksaddon_resource::{
//!     DependencyResolver, MockCloud, QueueSpec, Resource, ResourceKind, ResourceSpec,
//! };
//! use eksaddon_templates::{RenderContext, TemplateSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = RenderContext::new("aws", "us-east-1", "111111111111", "demo");
//!     let queue = Resource::new(
//!         "interruption-queue",
//!         ResourceSpec::ManagedQueue(QueueSpec {
//!             queue_name: TemplateSource::text("queue", "karpenter-{{ cluster_name }}"),
//!             message_retention_secs: 300,
//!             managed_encryption: true,
//!             policy: None,
//!         }),
//!     );
//!
//!     let cloud = MockCloud::new();
//!     DependencyResolver::new().ensure(&cloud, &[queue], &ctx).await?;
//!     assert!(cloud.exists(ResourceKind::ManagedQueue, "karpenter-demo"));
//!     Ok(())
//! }
//! ```

pub mod aws;
pub mod cloud;
pub mod error;
pub mod kind;
pub mod mock;
pub mod resolver;
pub mod resource;
pub mod spec;

pub use aws::AwsCliProvider;
pub use cloud::{CloudProvider, Lookup};
pub use error::{CloudError, CloudResult, ResourceError, ResourceResult, TeardownError};
pub use kind::ResourceKind;
pub use mock::{CloudCall, CloudMethod, MockCloud};
pub use resolver::{flatten_all, DependencyResolver};
pub use resource::{
    EnsureAction, EnsureReport, ResolvedResource, Resource, TeardownAction, TeardownReport,
};
pub use spec::{
    customer_policy_arn, manifest_key, parse_manifest_key, role_arn, CreateParams,
    CustomPolicySpec, FederatedIdentitySpec, IamAuthSpec, IamRoleSpec, ManifestSpec,
    PolicyBuilder, PolicyRef, PolicySource, QueueSpec, ResourceSpec, ServiceLinkedRoleSpec,
};
