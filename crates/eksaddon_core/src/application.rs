//! Application lifecycle: plan, install and uninstall.
//!
//! ```text
//! install:   context -> validate -> render everything -> ensure dependencies
//!            -> apply release -> ensure post-install resources
//! uninstall: context -> validate -> render everything -> remove release
//!            -> tear down (dependencies ++ post-install) in reverse
//! ```

use std::sync::Arc;

use eksaddon_installer::{
    InstallReport, Installer, InstallerDescriptor, PackageCoordinates, PackageManager,
    RemoveOutcome,
};
use eksaddon_resource::{
    CloudProvider, DependencyResolver, EnsureReport, ResolvedResource, Resource, TeardownReport,
};
use eksaddon_templates::{RenderContext, RenderedDocument, TemplateRenderer};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::{ClusterIdentity, ContextSource};
use crate::error::CoreResult;
use crate::options::ApplicationOptions;

/// External collaborators an application runs against.
#[derive(Clone)]
pub struct Environment {
    pub context_source: Arc<dyn ContextSource>,
    pub cloud: Arc<dyn CloudProvider>,
    pub packages: Arc<dyn PackageManager>,
    pub renderer: TemplateRenderer,
}

impl Environment {
    pub fn new(
        context_source: Arc<dyn ContextSource>,
        cloud: Arc<dyn CloudProvider>,
        packages: Arc<dyn PackageManager>,
    ) -> Self {
        Self {
            context_source,
            cloud,
            packages,
            renderer: TemplateRenderer::new(),
        }
    }
}

/// An installable add-on.
///
/// Built once per command invocation and never persisted.
#[derive(Debug, Clone)]
pub struct Application {
    pub name: String,
    pub description: String,
    /// Created in declared order before the release is applied.
    pub dependencies: Vec<Resource>,
    pub installer: InstallerDescriptor,
    pub defaults: ApplicationOptions,
    /// Created only after the release applied successfully.
    pub post_install_resources: Vec<Resource>,
}

/// Everything an install would do, fully rendered.
#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub context: RenderContext,
    pub dependencies: Vec<ResolvedResource>,
    pub coordinates: PackageCoordinates,
    pub values: RenderedDocument,
    pub post_install: Vec<ResolvedResource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub dependencies: Vec<EnsureReport>,
    pub release: InstallReport,
    pub post_install: Vec<EnsureReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UninstallOutcome {
    pub release: RemoveOutcome,
    /// In teardown order.
    pub resources: Vec<TeardownReport>,
}

impl Application {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        installer: InstallerDescriptor,
        defaults: ApplicationOptions,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            dependencies: Vec::new(),
            installer,
            defaults,
            post_install_resources: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, resource: Resource) -> Self {
        self.dependencies.push(resource);
        self
    }

    pub fn with_post_install(mut self, resource: Resource) -> Self {
        self.post_install_resources.push(resource);
        self
    }

    /// A copy of the application defaults to layer overrides on.
    pub fn options(&self) -> ApplicationOptions {
        self.defaults.clone()
    }

    /// Dependencies followed by post-install resources, the order resources
    /// are created in.
    fn all_resources(&self) -> Vec<Resource> {
        self.dependencies
            .iter()
            .chain(&self.post_install_resources)
            .cloned()
            .collect()
    }

    /// Check resource names are unique and references point backwards,
    /// across both resource lists.
    pub fn validate(&self) -> CoreResult<()> {
        DependencyResolver::new().validate(&self.all_resources())?;
        Ok(())
    }

    /// Build the render context for one invocation.
    pub fn context(&self, identity: &ClusterIdentity, options: &ApplicationOptions) -> RenderContext {
        let mut ctx = RenderContext::new(
            &identity.partition,
            &identity.region,
            &identity.account,
            &options.cluster_name,
        )
        .with_service_account(&options.namespace, &options.service_account)
        .with_version(&options.version)
        .with_replicas(options.replicas)
        .with_spot_to_spot(options.enable_spot_to_spot)
        .with_settings(options.settings.clone());
        if let Some(issuer) = &identity.oidc_issuer {
            ctx = ctx.with_oidc_issuer(issuer);
        }
        ctx
    }

    fn descriptor_for(&self, options: &ApplicationOptions) -> InstallerDescriptor {
        let mut descriptor = self.installer.clone().with_wait(options.wait);
        if let Some(timeout) = options.timeout() {
            descriptor = descriptor.with_timeout(timeout);
        }
        descriptor
    }

    /// Resolve the context and render every resource and the values
    /// document. Makes no change anywhere.
    pub async fn plan(&self, env: &Environment, options: &ApplicationOptions) -> CoreResult<InstallPlan> {
        options.validate()?;
        self.validate()?;

        let identity = env
            .context_source
            .cluster_identity(&options.cluster_name, &options.region)
            .await?;
        let context = self.context(&identity, options);
        context.validate()?;

        let resolver = DependencyResolver::with_renderer(env.renderer);
        let dependencies = resolver.resolve(&self.dependencies, &context)?;
        let post_install = resolver.resolve(&self.post_install_resources, &context)?;
        let values = env.renderer.render(&self.installer.values_template, &context)?;
        let coordinates = self
            .installer
            .coordinates(&options.namespace, options.chart_version());

        Ok(InstallPlan {
            context,
            dependencies,
            coordinates,
            values,
            post_install,
        })
    }

    /// Ensure dependencies, apply the release, then ensure post-install
    /// resources. Stops at the first failure; a re-run picks up where this
    /// one left off.
    pub async fn install(
        &self,
        env: &Environment,
        options: &ApplicationOptions,
        cancel: &CancellationToken,
    ) -> CoreResult<InstallOutcome> {
        let plan = self.plan(env, options).await?;
        let resolver = DependencyResolver::with_renderer(env.renderer);

        info!(
            "Installing {} on cluster {} ({} dependencies)",
            self.name,
            options.cluster_name,
            plan.dependencies.len()
        );
        let dependencies = resolver.ensure_all(env.cloud.as_ref(), &plan.dependencies).await?;

        let installer = Installer::new(self.descriptor_for(options), env.packages.clone());
        let release = installer.apply(&plan.values, &plan.coordinates, cancel).await?;

        let post_install = resolver
            .ensure_all(env.cloud.as_ref(), &plan.post_install)
            .await?;

        info!("Installed {} ({})", self.name, release.state);
        Ok(InstallOutcome {
            dependencies,
            release,
            post_install,
        })
    }

    /// Remove the release, then tear down every resource in reverse creation
    /// order. Teardown keeps going past failures and reports them together.
    pub async fn uninstall(
        &self,
        env: &Environment,
        options: &ApplicationOptions,
    ) -> CoreResult<UninstallOutcome> {
        options.validate()?;
        let resources = self.all_resources();
        let resolver = DependencyResolver::with_renderer(env.renderer);
        resolver.validate(&resources)?;

        let identity = env
            .context_source
            .cluster_identity(&options.cluster_name, &options.region)
            .await?;
        let context = self.context(&identity, options);
        context.validate()?;
        let resolved = resolver.resolve(&resources, &context)?;

        info!("Uninstalling {} from cluster {}", self.name, options.cluster_name);
        let installer = Installer::new(self.descriptor_for(options), env.packages.clone());
        let release = installer.remove(&options.namespace).await?;

        let resources = resolver
            .teardown_all(env.cloud.as_ref(), &resolved)
            .await
            .map_err(|e| {
                warn!("Uninstall of {} left {} resource(s) behind", self.name, e.failures.len());
                e
            })?;

        Ok(UninstallOutcome { release, resources })
    }
}
