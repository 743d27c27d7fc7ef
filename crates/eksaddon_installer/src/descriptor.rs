//! Package installer descriptors.

use std::time::Duration;

use eksaddon_templates::TemplateSource;
use serde::{Deserialize, Serialize};

/// Default bound on the readiness wait.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default delay between readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Where a package comes from and which release it becomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCoordinates {
    /// Chart repository, either `oci://...` or an HTTP chart repository.
    pub repository: String,
    pub chart: String,
    pub release: String,
    pub namespace: String,
    pub version: String,
    pub create_namespace: bool,
}

impl PackageCoordinates {
    pub fn is_oci(&self) -> bool {
        self.repository.starts_with("oci://")
    }

    /// Chart string as the package manager reports it, e.g. `karpenter-1.5.0`.
    pub fn chart_label(&self) -> String {
        format!("{}-{}", self.chart, self.version)
    }
}

/// Stateless description of how an application's workload is installed.
#[derive(Debug, Clone)]
pub struct InstallerDescriptor {
    pub repository_url: String,
    pub chart_name: String,
    pub release_name: String,
    pub values_template: TemplateSource,
    pub wait_for_ready: bool,
    /// Deployment whose availability marks the workload ready. Defaults to
    /// the release name.
    pub ready_deployment: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl InstallerDescriptor {
    pub fn new(
        repository_url: impl Into<String>,
        chart_name: impl Into<String>,
        release_name: impl Into<String>,
        values_template: TemplateSource,
    ) -> Self {
        Self {
            repository_url: repository_url.into(),
            chart_name: chart_name.into(),
            release_name: release_name.into(),
            values_template,
            wait_for_ready: true,
            ready_deployment: None,
            timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait_for_ready = wait;
        self
    }

    pub fn with_ready_deployment(mut self, deployment: impl Into<String>) -> Self {
        self.ready_deployment = Some(deployment.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn ready_deployment(&self) -> &str {
        self.ready_deployment
            .as_deref()
            .unwrap_or(&self.release_name)
    }

    pub fn coordinates(
        &self,
        namespace: impl Into<String>,
        version: impl Into<String>,
    ) -> PackageCoordinates {
        PackageCoordinates {
            repository: self.repository_url.clone(),
            chart: self.chart_name.clone(),
            release: self.release_name.clone(),
            namespace: namespace.into(),
            version: version.into(),
            create_namespace: true,
        }
    }
}
