//! Cloud collaborator interface.

use async_trait::async_trait;

use crate::error::CloudResult;
use crate::kind::ResourceKind;
use crate::spec::CreateParams;

/// Result of looking a resource up by its key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lookup {
    pub exists: bool,
    /// Provider identifier (ARN, queue URL, ...) when the resource exists.
    pub identifier: Option<String>,
}

impl Lookup {
    pub fn found(identifier: impl Into<String>) -> Self {
        Self {
            exists: true,
            identifier: Some(identifier.into()),
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }
}

/// Account and cluster operations a resource needs.
///
/// Implementations are scoped to one cluster and region.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Look a resource up by its rendered key.
    async fn lookup(&self, kind: ResourceKind, key: &str) -> CloudResult<Lookup>;

    /// Create a resource and return its identifier.
    async fn create(&self, kind: ResourceKind, params: &CreateParams) -> CloudResult<String>;

    /// Delete a resource by the identifier a lookup returned.
    async fn delete(&self, kind: ResourceKind, identifier: &str) -> CloudResult<()>;
}
