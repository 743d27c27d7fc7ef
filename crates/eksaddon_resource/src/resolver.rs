//! Dependency resolution.
//!
//! Dependencies run in declared order, each resource's nested dependencies
//! first. Ensure stops at the first failure. Teardown runs the same
//! sequence backwards and keeps going past failures.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info};

use eksaddon_templates::{RenderContext, TemplateRenderer};

use crate::cloud::CloudProvider;
use crate::error::{ResourceError, ResourceResult, TeardownError};
use crate::resource::{teardown_in_reverse, EnsureReport, ResolvedResource, Resource, TeardownReport};

/// Every resource in `resources` and their nested dependencies, in ensure
/// order.
pub fn flatten_all(resources: &[Resource]) -> Vec<&Resource> {
    resources.iter().flat_map(Resource::flatten).collect()
}

/// Validates, renders and applies ordered resource lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver {
    renderer: TemplateRenderer,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_renderer(renderer: TemplateRenderer) -> Self {
        Self { renderer }
    }

    /// Check names are unique, `requires` references exist, and the graph
    /// formed by declared order plus references has no cycle.
    ///
    /// Declared order is part of the graph, so a reference to a resource
    /// declared later shows up as a cycle.
    pub fn validate(&self, resources: &[Resource]) -> ResourceResult<()> {
        let flat = flatten_all(resources);
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();

        for resource in &flat {
            let idx = graph.add_node(resource.name.as_str());
            if nodes.insert(resource.name.as_str(), idx).is_some() {
                return Err(ResourceError::DuplicateName(resource.name.clone()));
            }
        }

        for pair in flat.windows(2) {
            graph.add_edge(nodes[pair[0].name.as_str()], nodes[pair[1].name.as_str()], ());
        }

        for resource in &flat {
            let to = nodes[resource.name.as_str()];
            for dependency in &resource.dependencies {
                graph.add_edge(nodes[dependency.name.as_str()], to, ());
            }
            for reference in &resource.requires {
                let from = nodes.get(reference.as_str()).ok_or_else(|| {
                    ResourceError::UnknownReference {
                        resource: resource.name.clone(),
                        reference: reference.clone(),
                    }
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        toposort(&graph, None)
            .map_err(|cycle| ResourceError::Cycle(graph[cycle.node_id()].to_string()))?;
        debug!("Validated {} resources", flat.len());
        Ok(())
    }

    /// Render every resource. Fails before any cloud call if one does not
    /// render.
    pub fn resolve(
        &self,
        resources: &[Resource],
        ctx: &RenderContext,
    ) -> ResourceResult<Vec<ResolvedResource>> {
        flatten_all(resources)
            .into_iter()
            .map(|r| r.resolve(&self.renderer, ctx))
            .collect()
    }

    /// Ensure resolved resources in order, stopping at the first failure.
    /// Resources created before the failure are left in place.
    pub async fn ensure_all(
        &self,
        cloud: &dyn CloudProvider,
        resolved: &[ResolvedResource],
    ) -> ResourceResult<Vec<EnsureReport>> {
        let mut reports = Vec::with_capacity(resolved.len());
        for resource in resolved {
            debug!("Ensuring {} ({})", resource.name, resource.kind);
            reports.push(resource.ensure(cloud).await?);
        }
        info!("Ensured {} resources", reports.len());
        Ok(reports)
    }

    /// Tear down resolved resources in reverse order. `resolved` is in
    /// ensure order.
    pub async fn teardown_all(
        &self,
        cloud: &dyn CloudProvider,
        resolved: &[ResolvedResource],
    ) -> Result<Vec<TeardownReport>, TeardownError> {
        let reports = teardown_in_reverse(cloud, resolved).await?;
        info!("Tore down {} resources", reports.len());
        Ok(reports)
    }

    /// Validate, render, then ensure.
    pub async fn ensure(
        &self,
        cloud: &dyn CloudProvider,
        resources: &[Resource],
        ctx: &RenderContext,
    ) -> ResourceResult<Vec<EnsureReport>> {
        self.validate(resources)?;
        let resolved = self.resolve(resources, ctx)?;
        self.ensure_all(cloud, &resolved).await
    }

    /// Validate, render, then tear down.
    pub async fn teardown(
        &self,
        cloud: &dyn CloudProvider,
        resources: &[Resource],
        ctx: &RenderContext,
    ) -> Result<Vec<TeardownReport>, TeardownError> {
        let resolved = self
            .validate(resources)
            .and_then(|()| self.resolve(resources, ctx))
            .map_err(|e| TeardownError::new(vec![e], Vec::new()))?;
        self.teardown_all(cloud, &resolved).await
    }
}
