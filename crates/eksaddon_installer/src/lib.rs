//! # eksaddon_installer
//!
//! Command execution and packaged workload installation for eksaddon.
//!
//! # Features
//!
//! - **Command execution**: [`CommandExecutor`] runs `aws`, `eksctl`,
//!   `kubectl` and `helm`; [`ProcessExecutor`] spawns real processes
//! - **Installer**: idempotent install-or-upgrade with a cancellable
//!   readiness wait
//! - **Helm**: [`HelmCli`] implements [`PackageManager`] over the helm CLI
//! - **Mocks**: [`MockExecutor`] and [`MockPackageManager`] for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use eksaddon_installer::{HelmCli, Installer, InstallerDescriptor, ProcessExecutor};
//! use eksaddon_templates::{RenderContext, TemplateRenderer, TemplateSource};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let descriptor = InstallerDescriptor::new(
//!         "oci://public.ecr.aws/karpenter/karpenter",
//!         "karpenter",
//!         "karpenter",
//!         TemplateSource::yaml("values", "settings:\n  clusterName: {{ cluster_name }}\n"),
//!     );
//!     let ctx = RenderContext::new("aws", "us-east-1", "111111111111", "demo");
//!     let values = TemplateRenderer::new().render(&descriptor.values_template, &ctx)?;
//!
//!     let helm = HelmCli::new(Arc::new(ProcessExecutor::new()));
//!     let coordinates = descriptor.coordinates("karpenter", "1.5.0");
//!     let installer = Installer::new(descriptor, Arc::new(helm));
//!
//!     let report = installer
//!         .apply(&values, &coordinates, &CancellationToken::new())
//!         .await?;
//!     println!("{:?} -> {}", report.action, report.state);
//!     Ok(())
//! }
//! ```

pub mod descriptor;
pub mod error;
pub mod exec;
pub mod helm;
pub mod installer;
pub mod mock;
pub mod package;

pub use descriptor::{
    InstallerDescriptor, PackageCoordinates, DEFAULT_POLL_INTERVAL, DEFAULT_READY_TIMEOUT,
};
pub use error::{
    ExecError, ExecResult, InstallerError, InstallerResult, PackageError, PackageResult,
};
pub use exec::{CommandExecutor, CommandLine, CommandOutput, ProcessExecutor};
pub use helm::HelmCli;
pub use installer::{InstallAction, InstallReport, InstallState, Installer, RemoveOutcome};
pub use mock::{MockExecutor, MockPackageManager, PackageCall};
pub use package::{PackageManager, ReleaseInfo, STATUS_DEPLOYED};
