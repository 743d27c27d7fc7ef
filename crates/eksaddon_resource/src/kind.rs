//! Resource kinds.

use serde::{Deserialize, Serialize};

/// Kinds of cloud and cluster objects an add-on can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Account-wide role owned by an AWS service.
    ServiceLinkedRole,
    /// IAM role assumed by a Kubernetes service account (IRSA).
    FederatedIdentity,
    /// IAM role assumed by an AWS service, e.g. EC2 nodes.
    IamRole,
    /// Mapping of an IAM role to Kubernetes users and groups.
    IamAuth,
    /// SQS queue.
    ManagedQueue,
    /// Customer managed IAM policy.
    CustomPolicy,
    /// Kubernetes object applied to the cluster.
    Manifest,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ServiceLinkedRole => "service-linked-role",
            ResourceKind::FederatedIdentity => "federated-identity",
            ResourceKind::IamRole => "iam-role",
            ResourceKind::IamAuth => "iam-auth",
            ResourceKind::ManagedQueue => "managed-queue",
            ResourceKind::CustomPolicy => "custom-policy",
            ResourceKind::Manifest => "manifest",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            ResourceKind::ServiceLinkedRole,
            ResourceKind::FederatedIdentity,
            ResourceKind::IamRole,
            ResourceKind::IamAuth,
            ResourceKind::ManagedQueue,
            ResourceKind::CustomPolicy,
            ResourceKind::Manifest,
        ]
    }

    /// Whether the object lives in the cluster rather than the AWS account.
    pub fn is_in_cluster(&self) -> bool {
        matches!(self, ResourceKind::IamAuth | ResourceKind::Manifest)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_unique() {
        let mut names: Vec<_> = ResourceKind::all().iter().map(|k| k.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ResourceKind::all().len());
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ResourceKind::ServiceLinkedRole).unwrap();
        assert_eq!(json, "\"service-linked-role\"");
        assert!(ResourceKind::Manifest.is_in_cluster());
        assert!(!ResourceKind::ManagedQueue.is_in_cluster());
    }
}
