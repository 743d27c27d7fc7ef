//! Package manager collaborator interface.

use async_trait::async_trait;
use eksaddon_templates::RenderedDocument;
use serde::{Deserialize, Serialize};

use crate::descriptor::PackageCoordinates;
use crate::error::PackageResult;

/// Release status reported for a successfully deployed release.
pub const STATUS_DEPLOYED: &str = "deployed";

/// State of a release as the package manager reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub release: String,
    pub namespace: String,
    /// Chart label, e.g. `karpenter-1.5.0`.
    pub chart: String,
    pub status: String,
    /// User-supplied values of the deployed revision.
    pub values: serde_yaml::Value,
}

impl ReleaseInfo {
    pub fn is_deployed(&self) -> bool {
        self.status == STATUS_DEPLOYED
    }
}

/// Install/upgrade/uninstall of packaged workloads.
#[async_trait]
pub trait PackageManager: Send + Sync {
    /// Current state of a release, `None` if it is not installed.
    async fn release(&self, release: &str, namespace: &str) -> PackageResult<Option<ReleaseInfo>>;

    /// Install the release or upgrade it in place.
    async fn install_or_upgrade(
        &self,
        coordinates: &PackageCoordinates,
        values: &RenderedDocument,
    ) -> PackageResult<()>;

    /// Uninstall a release. Returns `false` if it was not installed.
    async fn uninstall(&self, release: &str, namespace: &str) -> PackageResult<bool>;

    /// Whether the workload's deployment reports all replicas available.
    async fn workload_ready(&self, namespace: &str, deployment: &str) -> PackageResult<bool>;
}
