//! # eksaddon_core
//!
//! Application lifecycle for eksaddon.
//!
//! An [`Application`] composes prerequisite cloud resources, a packaged
//! workload and follow-on in-cluster resources. Install ensures the
//! dependencies in declared order, applies the release and, only once that
//! succeeded, ensures the post-install resources. Uninstall removes the
//! release and tears every resource down in reverse.
//!
//! # Architecture
//!
//! - **Context**: [`ContextSource`] reads account, partition and OIDC issuer
//!   once per invocation
//! - **Options**: application defaults, an options file and command line
//!   overrides layered into [`ApplicationOptions`]
//! - **Application**: plan, install and uninstall against an [`Environment`]
//! - **Registry**: maps application names to factories
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use eksaddon_core::{apps, AwsCliContextSource, Environment};
//! use eksaddon_installer::{HelmCli, ProcessExecutor};
//! use eksaddon_resource::AwsCliProvider;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = Arc::new(ProcessExecutor::new());
//!     let env = Environment::new(
//!         Arc::new(AwsCliContextSource::new(executor.clone())),
//!         Arc::new(AwsCliProvider::new(executor.clone(), "demo", "us-east-1")),
//!         Arc::new(HelmCli::new(executor)),
//!     );
//!
//!     let app = apps::builtin_registry().get_required("karpenter")?;
//!     let options = app.options().for_cluster("demo", "us-east-1");
//!     let outcome = app.install(&env, &options, &CancellationToken::new()).await?;
//!     println!("{:?}", outcome.release.state);
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod apps;
pub mod context;
pub mod error;
pub mod options;
pub mod registry;

pub use application::{Application, Environment, InstallOutcome, InstallPlan, UninstallOutcome};
pub use context::{AwsCliContextSource, ClusterIdentity, ContextSource, StaticContextSource};
pub use error::{CoreError, CoreResult};
pub use options::{ApplicationOptions, OptionOverrides};
pub use registry::{ApplicationFactory, ApplicationRegistry};
