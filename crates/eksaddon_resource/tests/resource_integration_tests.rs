//! Integration tests for resource ensure and teardown against the in-memory
//! cloud.

use eksaddon_resource::{
    CloudMethod, CustomPolicySpec, DependencyResolver, EnsureAction, IamAuthSpec, IamRoleSpec,
    ManifestSpec, MockCloud, PolicyRef, PolicySource, QueueSpec, Resource, ResourceError,
    ResourceKind, ResourceSpec, ServiceLinkedRoleSpec, TeardownAction,
};
use eksaddon_templates::{RenderContext, TemplateSource};

fn ctx() -> RenderContext {
    RenderContext::new("aws", "us-east-1", "111111111111", "demo")
}

fn spot_role() -> Resource {
    Resource::new(
        "spot-role",
        ResourceSpec::ServiceLinkedRole(ServiceLinkedRoleSpec {
            role_name: "AWSServiceRoleForEC2Spot".to_string(),
            service_name: "spot.amazonaws.com".to_string(),
        }),
    )
}

fn node_role() -> Resource {
    Resource::new(
        "node-role",
        ResourceSpec::IamRole(IamRoleSpec {
            role_name: TemplateSource::text("node-role", "KarpenterNodeRole-{{ cluster_name }}"),
            trusted_service: "ec2.amazonaws.com".to_string(),
            attached_policies: vec![PolicyRef::aws_managed("AmazonEKSWorkerNodePolicy")],
            inline_policy: None,
        }),
    )
}

fn queue() -> Resource {
    Resource::new(
        "queue",
        ResourceSpec::ManagedQueue(QueueSpec {
            queue_name: TemplateSource::text("queue", "karpenter-{{ cluster_name }}"),
            message_retention_secs: 300,
            managed_encryption: true,
            policy: None,
        }),
    )
}

fn node_mapping() -> Resource {
    Resource::new(
        "node-mapping",
        ResourceSpec::IamAuth(IamAuthSpec {
            role_name: TemplateSource::text("mapping", "KarpenterNodeRole-{{ cluster_name }}"),
            username: "system:node:{{EC2PrivateDNSName}}".to_string(),
            groups: vec!["system:bootstrappers".to_string(), "system:nodes".to_string()],
        }),
    )
    .requires("node-role")
}

const NODE_ROLE: &str = "KarpenterNodeRole-demo";
const QUEUE: &str = "karpenter-demo";
const MAPPING: &str = "arn:aws:iam::111111111111:role/KarpenterNodeRole-demo";

#[tokio::test]
async fn test_ensure_creates_in_declared_order() {
    let cloud = MockCloud::new();
    let reports = DependencyResolver::new()
        .ensure(&cloud, &[spot_role(), node_role(), queue(), node_mapping()], &ctx())
        .await
        .unwrap();

    assert_eq!(
        cloud.keys_for(CloudMethod::Create),
        vec!["AWSServiceRoleForEC2Spot", NODE_ROLE, QUEUE, MAPPING]
    );
    assert!(reports.iter().all(|r| r.action == EnsureAction::Created));
    assert_eq!(reports[3].kind, ResourceKind::IamAuth);
}

#[tokio::test]
async fn test_second_ensure_creates_nothing() {
    let cloud = MockCloud::new();
    let resources = vec![spot_role(), node_role(), queue()];
    let resolver = DependencyResolver::new();

    resolver.ensure(&cloud, &resources, &ctx()).await.unwrap();
    cloud.clear_calls();
    let reports = resolver.ensure(&cloud, &resources, &ctx()).await.unwrap();

    assert!(cloud.get_method_calls(CloudMethod::Create).is_empty());
    assert_eq!(cloud.get_method_calls(CloudMethod::Lookup).len(), 3);
    assert!(reports
        .iter()
        .all(|r| r.action == EnsureAction::AlreadyPresent));
}

#[tokio::test]
async fn test_existing_resource_is_left_alone() {
    let cloud = MockCloud::new().with_existing(ResourceKind::ManagedQueue, QUEUE);
    let reports = DependencyResolver::new()
        .ensure(&cloud, &[node_role(), queue()], &ctx())
        .await
        .unwrap();

    assert_eq!(reports[0].action, EnsureAction::Created);
    assert_eq!(reports[1].action, EnsureAction::AlreadyPresent);
    assert_eq!(cloud.keys_for(CloudMethod::Create), vec![NODE_ROLE]);
}

#[tokio::test]
async fn test_ensure_stops_at_first_failure() {
    let cloud = MockCloud::new().fail_on(CloudMethod::Create, NODE_ROLE);
    let err = DependencyResolver::new()
        .ensure(&cloud, &[spot_role(), node_role(), queue()], &ctx())
        .await
        .unwrap_err();

    match &err {
        ResourceError::Create { name, kind, .. } => {
            assert_eq!(name, "node-role");
            assert_eq!(*kind, ResourceKind::IamRole);
        }
        other => panic!("expected create failure, got {:?}", other),
    }
    // The queue is never attempted and the spot role is not rolled back.
    assert!(!cloud
        .get_calls()
        .iter()
        .any(|c| c.kind == ResourceKind::ManagedQueue));
    assert!(cloud.exists(ResourceKind::ServiceLinkedRole, "AWSServiceRoleForEC2Spot"));
    assert!(cloud.get_method_calls(CloudMethod::Delete).is_empty());
}

#[tokio::test]
async fn test_nested_dependencies_are_created_first_and_removed_last() {
    let cloud = MockCloud::new();
    let policy = Resource::new(
        "controller-policy",
        ResourceSpec::CustomPolicy(CustomPolicySpec {
            policy_name: TemplateSource::text("policy", "KarpenterController-{{ cluster_name }}"),
            policy: PolicySource::Template(TemplateSource::json(
                "policy",
                r#"{"Version": "2012-10-17", "Statement": []}"#,
            )),
        }),
    );
    let role = Resource::new(
        "controller-role",
        ResourceSpec::IamRole(IamRoleSpec {
            role_name: TemplateSource::text("role", "KarpenterController-{{ cluster_name }}"),
            trusted_service: "ec2.amazonaws.com".to_string(),
            attached_policies: vec![PolicyRef::Customer(TemplateSource::text(
                "policy",
                "KarpenterController-{{ cluster_name }}",
            ))],
            inline_policy: None,
        }),
    )
    .with_dependency(policy);
    let resolver = DependencyResolver::new();

    resolver.ensure(&cloud, &[role.clone()], &ctx()).await.unwrap();
    let creates = cloud.get_method_calls(CloudMethod::Create);
    assert_eq!(creates[0].kind, ResourceKind::CustomPolicy);
    assert_eq!(creates[1].kind, ResourceKind::IamRole);

    let reports = resolver.teardown(&cloud, &[role], &ctx()).await.unwrap();
    let kinds: Vec<_> = reports.iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![ResourceKind::IamRole, ResourceKind::CustomPolicy]);
}

#[tokio::test]
async fn test_teardown_runs_in_reverse_and_tolerates_absence() {
    let cloud = MockCloud::new()
        .with_existing(ResourceKind::IamRole, NODE_ROLE)
        .with_existing(ResourceKind::IamAuth, MAPPING);

    let reports = DependencyResolver::new()
        .teardown(&cloud, &[node_role(), queue(), node_mapping()], &ctx())
        .await
        .unwrap();

    let names: Vec<_> = reports.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["node-mapping", "queue", "node-role"]);
    assert_eq!(reports[0].action, TeardownAction::Deleted);
    assert_eq!(reports[1].action, TeardownAction::AlreadyAbsent);
    assert_eq!(reports[2].action, TeardownAction::Deleted);
    assert_eq!(cloud.keys_for(CloudMethod::Delete), vec![MAPPING, NODE_ROLE]);
}

#[tokio::test]
async fn test_teardown_continues_past_failures() {
    let cloud = MockCloud::new()
        .with_existing(ResourceKind::ServiceLinkedRole, "AWSServiceRoleForEC2Spot")
        .with_existing(ResourceKind::IamRole, NODE_ROLE)
        .with_existing(ResourceKind::ManagedQueue, QUEUE)
        .fail_on(CloudMethod::Delete, NODE_ROLE);

    let err = DependencyResolver::new()
        .teardown(&cloud, &[spot_role(), node_role(), queue()], &ctx())
        .await
        .unwrap_err();

    assert_eq!(err.failed_names(), vec!["node-role"]);
    assert_eq!(err.completed.len(), 2);
    assert!(!cloud.exists(ResourceKind::ManagedQueue, QUEUE));
    assert!(!cloud.exists(ResourceKind::ServiceLinkedRole, "AWSServiceRoleForEC2Spot"));
    assert!(cloud.exists(ResourceKind::IamRole, NODE_ROLE));
    assert!(err.to_string().contains("node-role"));
}

#[tokio::test]
async fn test_render_failure_makes_no_cloud_calls() {
    let cloud = MockCloud::new();
    let broken = Resource::new(
        "nodepool",
        ResourceSpec::Manifest(ManifestSpec {
            api_kind: "nodepools.karpenter.sh".to_string(),
            object_name: TemplateSource::text("name", "default"),
            namespace: None,
            template: TemplateSource::yaml("nodepool", "name: {{ missing_value }}\n"),
        }),
    );

    let err = DependencyResolver::new()
        .ensure(&cloud, &[spot_role(), node_role(), broken], &ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, ResourceError::Template { ref name, .. } if name == "nodepool"));
    assert!(cloud.get_calls().is_empty());
}

#[tokio::test]
async fn test_invalid_graph_makes_no_cloud_calls() {
    let cloud = MockCloud::new();
    let err = DependencyResolver::new()
        .ensure(&cloud, &[node_mapping(), node_role()], &ctx())
        .await
        .unwrap_err();

    assert!(matches!(err, ResourceError::Cycle(_)));
    assert!(cloud.get_calls().is_empty());
}
