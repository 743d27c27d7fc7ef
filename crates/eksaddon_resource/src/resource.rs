//! Resources and their ensure/teardown contract.

use serde::Serialize;
use tracing::{debug, info, warn};

use eksaddon_templates::{RenderContext, TemplateRenderer};

use crate::cloud::{CloudProvider, Lookup};
use crate::error::{ResourceError, ResourceResult, TeardownError};
use crate::kind::ResourceKind;
use crate::spec::{CreateParams, ResourceSpec};

/// A named cloud or cluster object an add-on depends on.
///
/// Nested `dependencies` are ensured before the resource itself and torn
/// down after it. `requires` names earlier declared resources that must
/// exist first; the resolver checks those references.
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub spec: ResourceSpec,
    pub dependencies: Vec<Resource>,
    pub requires: Vec<String>,
}

impl Resource {
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            dependencies: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: Resource) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn requires(mut self, name: impl Into<String>) -> Self {
        self.requires.push(name.into());
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    /// This resource and its nested dependencies, dependencies first.
    pub fn flatten(&self) -> Vec<&Resource> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<&'a Resource>) {
        for dependency in &self.dependencies {
            dependency.flatten_into(out);
        }
        out.push(self);
    }

    /// Render this resource alone, without its nested dependencies.
    pub fn resolve(
        &self,
        renderer: &TemplateRenderer,
        ctx: &RenderContext,
    ) -> ResourceResult<ResolvedResource> {
        let params = self
            .spec
            .resolve(&self.name, renderer, ctx)
            .map_err(|source| ResourceError::Template {
                name: self.name.clone(),
                source,
            })?;
        Ok(ResolvedResource {
            name: self.name.clone(),
            kind: self.kind(),
            key: params.key(),
            params,
        })
    }

    /// Render this resource and every nested dependency, dependencies first.
    pub fn resolve_all(
        &self,
        renderer: &TemplateRenderer,
        ctx: &RenderContext,
    ) -> ResourceResult<Vec<ResolvedResource>> {
        self.flatten()
            .into_iter()
            .map(|r| r.resolve(renderer, ctx))
            .collect()
    }

    /// Make sure the resource and its dependencies exist. Everything is
    /// rendered before the first cloud call.
    pub async fn ensure(
        &self,
        cloud: &dyn CloudProvider,
        renderer: &TemplateRenderer,
        ctx: &RenderContext,
    ) -> ResourceResult<Vec<EnsureReport>> {
        let resolved = self.resolve_all(renderer, ctx)?;
        let mut reports = Vec::with_capacity(resolved.len());
        for resource in &resolved {
            reports.push(resource.ensure(cloud).await?);
        }
        Ok(reports)
    }

    /// Remove the resource, then its dependencies in reverse order.
    pub async fn teardown(
        &self,
        cloud: &dyn CloudProvider,
        renderer: &TemplateRenderer,
        ctx: &RenderContext,
    ) -> Result<Vec<TeardownReport>, TeardownError> {
        let resolved = self
            .resolve_all(renderer, ctx)
            .map_err(|e| TeardownError::new(vec![e], Vec::new()))?;
        teardown_in_reverse(cloud, &resolved).await
    }
}

/// Tear down resolved resources last-to-first, continuing past failures.
pub(crate) async fn teardown_in_reverse(
    cloud: &dyn CloudProvider,
    resolved: &[ResolvedResource],
) -> Result<Vec<TeardownReport>, TeardownError> {
    let mut completed = Vec::new();
    let mut failures = Vec::new();
    for resource in resolved.iter().rev() {
        match resource.teardown(cloud).await {
            Ok(report) => completed.push(report),
            Err(e) => {
                warn!("Teardown of {} failed: {}", resource.name, e);
                failures.push(e);
            }
        }
    }
    if failures.is_empty() {
        Ok(completed)
    } else {
        Err(TeardownError::new(failures, completed))
    }
}

/// A resource with every name and document rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    pub name: String,
    pub kind: ResourceKind,
    /// Key the cloud collaborator looks the resource up by.
    pub key: String,
    pub params: CreateParams,
}

impl ResolvedResource {
    /// Create the resource unless a lookup finds it. Never modifies an
    /// existing resource.
    pub async fn ensure(&self, cloud: &dyn CloudProvider) -> ResourceResult<EnsureReport> {
        let lookup = cloud
            .lookup(self.kind, &self.key)
            .await
            .map_err(|source| ResourceError::Lookup {
                name: self.name.clone(),
                kind: self.kind,
                source,
            })?;

        if lookup.exists {
            debug!("{} {} already present", self.kind, self.key);
            return Ok(EnsureReport {
                name: self.name.clone(),
                kind: self.kind,
                action: EnsureAction::AlreadyPresent,
                identifier: lookup.identifier.unwrap_or_else(|| self.key.clone()),
            });
        }

        let identifier = cloud
            .create(self.kind, &self.params)
            .await
            .map_err(|source| ResourceError::Create {
                name: self.name.clone(),
                kind: self.kind,
                source,
            })?;
        info!("Created {} {} ({})", self.kind, self.name, identifier);

        Ok(EnsureReport {
            name: self.name.clone(),
            kind: self.kind,
            action: EnsureAction::Created,
            identifier,
        })
    }

    /// Delete the resource if it exists. A missing resource is not an error.
    pub async fn teardown(&self, cloud: &dyn CloudProvider) -> ResourceResult<TeardownReport> {
        let lookup = match cloud.lookup(self.kind, &self.key).await {
            Ok(lookup) => lookup,
            Err(e) if e.is_not_found() => Lookup::absent(),
            Err(source) => {
                return Err(ResourceError::Lookup {
                    name: self.name.clone(),
                    kind: self.kind,
                    source,
                })
            }
        };

        let action = if !lookup.exists {
            debug!("{} {} already absent", self.kind, self.key);
            TeardownAction::AlreadyAbsent
        } else {
            let identifier = lookup.identifier.unwrap_or_else(|| self.key.clone());
            match cloud.delete(self.kind, &identifier).await {
                Ok(()) => {
                    info!("Deleted {} {} ({})", self.kind, self.name, identifier);
                    TeardownAction::Deleted
                }
                Err(e) if e.is_not_found() => TeardownAction::AlreadyAbsent,
                Err(source) => {
                    return Err(ResourceError::Delete {
                        name: self.name.clone(),
                        kind: self.kind,
                        source,
                    })
                }
            }
        };

        Ok(TeardownReport {
            name: self.name.clone(),
            kind: self.kind,
            action,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnsureAction {
    Created,
    AlreadyPresent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnsureReport {
    pub name: String,
    pub kind: ResourceKind,
    pub action: EnsureAction,
    pub identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TeardownAction {
    Deleted,
    AlreadyAbsent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub name: String,
    pub kind: ResourceKind,
    pub action: TeardownAction,
}
