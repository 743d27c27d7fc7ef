//! In-memory cloud provider for testing.
//!
//! Records every call in order, keeps created resources in a map and can be
//! told to fail individual operations by key. Identifiers equal lookup keys.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::cloud::{CloudProvider, Lookup};
use crate::error::{CloudError, CloudResult};
use crate::kind::ResourceKind;
use crate::spec::CreateParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudMethod {
    Lookup,
    Create,
    Delete,
}

/// Captured call information for verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudCall {
    pub method: CloudMethod,
    pub kind: ResourceKind,
    /// Lookup key for lookups and creates, identifier for deletes.
    pub key: String,
}

/// Mock cloud provider.
#[derive(Clone, Default)]
pub struct MockCloud {
    existing: Arc<RwLock<HashSet<(ResourceKind, String)>>>,
    calls: Arc<RwLock<Vec<CloudCall>>>,
    failures: Arc<RwLock<HashSet<(CloudMethod, String)>>>,
}

impl MockCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a resource as already existing.
    pub fn with_existing(self, kind: ResourceKind, key: impl Into<String>) -> Self {
        self.existing.write().insert((kind, key.into()));
        self
    }

    /// Fail the given operation for a key.
    pub fn fail_on(self, method: CloudMethod, key: impl Into<String>) -> Self {
        self.failures.write().insert((method, key.into()));
        self
    }

    pub fn get_calls(&self) -> Vec<CloudCall> {
        self.calls.read().clone()
    }

    pub fn get_method_calls(&self, method: CloudMethod) -> Vec<CloudCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Keys passed to `method`, in call order.
    pub fn keys_for(&self, method: CloudMethod) -> Vec<String> {
        self.get_method_calls(method)
            .into_iter()
            .map(|c| c.key)
            .collect()
    }

    pub fn exists(&self, kind: ResourceKind, key: &str) -> bool {
        self.existing.read().contains(&(kind, key.to_string()))
    }

    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    fn record(&self, method: CloudMethod, kind: ResourceKind, key: &str) {
        self.calls.write().push(CloudCall {
            method,
            kind,
            key: key.to_string(),
        });
    }

    fn check_failure(&self, method: CloudMethod, key: &str) -> CloudResult<()> {
        if self.failures.read().contains(&(method, key.to_string())) {
            return Err(CloudError::Api(format!("simulated {:?} failure for {}", method, key)));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudProvider for MockCloud {
    async fn lookup(&self, kind: ResourceKind, key: &str) -> CloudResult<Lookup> {
        self.record(CloudMethod::Lookup, kind, key);
        self.check_failure(CloudMethod::Lookup, key)?;
        Ok(if self.exists(kind, key) {
            Lookup::found(key)
        } else {
            Lookup::absent()
        })
    }

    async fn create(&self, kind: ResourceKind, params: &CreateParams) -> CloudResult<String> {
        let key = params.key();
        self.record(CloudMethod::Create, kind, &key);
        self.check_failure(CloudMethod::Create, &key)?;

        self.existing.write().insert((kind, key.clone()));
        Ok(key)
    }

    async fn delete(&self, kind: ResourceKind, identifier: &str) -> CloudResult<()> {
        self.record(CloudMethod::Delete, kind, identifier);
        self.check_failure(CloudMethod::Delete, identifier)?;

        if self.existing.write().remove(&(kind, identifier.to_string())) {
            Ok(())
        } else {
            Err(CloudError::NotFound(identifier.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(name: &str) -> CreateParams {
        CreateParams::Queue {
            queue_name: name.to_string(),
            attributes: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_then_lookup_then_delete() {
        let cloud = MockCloud::new();

        let id = cloud
            .create(ResourceKind::ManagedQueue, &queue("karpenter-demo"))
            .await
            .unwrap();
        let lookup = cloud
            .lookup(ResourceKind::ManagedQueue, "karpenter-demo")
            .await
            .unwrap();
        assert_eq!(lookup, Lookup::found(id.clone()));

        cloud.delete(ResourceKind::ManagedQueue, &id).await.unwrap();
        assert!(!cloud.exists(ResourceKind::ManagedQueue, "karpenter-demo"));
        assert!(cloud
            .delete(ResourceKind::ManagedQueue, &id)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_simulated_failure() {
        let cloud = MockCloud::new().fail_on(CloudMethod::Create, "karpenter-demo");
        assert!(cloud
            .create(ResourceKind::ManagedQueue, &queue("karpenter-demo"))
            .await
            .is_err());
        assert_eq!(cloud.keys_for(CloudMethod::Create), vec!["karpenter-demo"]);
    }
}
