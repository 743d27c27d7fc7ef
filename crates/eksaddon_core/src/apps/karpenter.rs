//! Karpenter node autoscaling.
//!
//! Chart: `oci://public.ecr.aws/karpenter/karpenter`. Docs: <https://karpenter.sh/docs/>.
//!
//! Dependencies, in order: the EC2 Spot service-linked role, the controller's
//! service account role, the node role, the interruption queue and the
//! mapping that lets nodes with the node role join the cluster. After the
//! chart is ready, a default `NodePool` (and the `EC2NodeClass` it refers
//! to) is applied.

use eksaddon_installer::InstallerDescriptor;
use eksaddon_resource::{
    FederatedIdentitySpec, IamAuthSpec, IamRoleSpec, ManifestSpec, PolicyRef, PolicySource,
    QueueSpec, Resource, ResourceSpec, ServiceLinkedRoleSpec,
};
use eksaddon_templates::{
    PolicyDocument, Principal, RenderContext, Statement, TemplateResult, TemplateSource,
};

use crate::application::Application;
use crate::options::ApplicationOptions;

pub const NAME: &str = "karpenter";
pub const DEFAULT_VERSION: &str = "1.5.0";
pub const REPOSITORY: &str = "oci://public.ecr.aws/karpenter/karpenter";

const NODE_ROLE_NAME: &str = "KarpenterNodeRole-{{ cluster_name }}";
const QUEUE_NAME: &str = "karpenter-{{ cluster_name }}";

const VALUES_TEMPLATE: &str = r#"serviceAccount:
  name: {{ service_account }}
  annotations:
    {{ irsa_annotation.key }}: {{ irsa_annotation.value }}
replicas: {{ replicas }}
controller:
  image:
    tag: {{ version }}
  resources:
    requests:
      cpu: "1"
      memory: "1Gi"
settings:
  clusterName: {{ cluster_name }}
  interruptionQueue: karpenter-{{ cluster_name }}
  featureGates:
    spotToSpotConsolidation: {{ enable_spot_to_spot }}
"#;

const NODE_CLASS_TEMPLATE: &str = r#"apiVersion: karpenter.k8s.aws/v1
kind: EC2NodeClass
metadata:
  name: default
spec:
  role: KarpenterNodeRole-{{ cluster_name }}
  amiSelectorTerms:
    - alias: {{ settings.ami_alias | default(value="al2023@latest") }}
  subnetSelectorTerms:
    - tags:
        karpenter.sh/discovery: {{ cluster_name }}
  securityGroupSelectorTerms:
    - tags:
        karpenter.sh/discovery: {{ cluster_name }}
"#;

const NODE_POOL_TEMPLATE: &str = r#"apiVersion: karpenter.sh/v1
kind: NodePool
metadata:
  name: default
spec:
  template:
    spec:
      requirements:
        - key: kubernetes.io/arch
          operator: In
          values: ["amd64"]
        - key: kubernetes.io/os
          operator: In
          values: ["linux"]
        - key: karpenter.sh/capacity-type
          operator: In
          values: ["spot", "on-demand"]
        - key: karpenter.k8s.aws/instance-category
          operator: In
          values: ["c", "m", "r"]
        - key: karpenter.k8s.aws/instance-generation
          operator: Gt
          values: ["2"]
      nodeClassRef:
        group: karpenter.k8s.aws
        kind: EC2NodeClass
        name: default
      expireAfter: 720h
  limits:
    cpu: {{ settings.nodepool_cpu_limit | default(value="1000") }}
  disruption:
    consolidationPolicy: WhenEmptyOrUnderutilized
    consolidateAfter: 1m
"#;

/// Build the Karpenter application.
pub fn application() -> Application {
    let installer = InstallerDescriptor::new(
        REPOSITORY,
        "karpenter",
        "karpenter",
        TemplateSource::yaml("karpenter-values", VALUES_TEMPLATE),
    );

    Application::new(
        NAME,
        "Karpenter Node Autoscaling",
        installer,
        ApplicationOptions::new("karpenter", "karpenter", DEFAULT_VERSION),
    )
    .with_dependency(spot_service_linked_role())
    .with_dependency(controller_identity())
    .with_dependency(node_role())
    .with_dependency(interruption_queue())
    .with_dependency(node_identity_mapping())
    .with_post_install(default_node_pool())
}

fn spot_service_linked_role() -> Resource {
    Resource::new(
        "ec2-spot-service-linked-role",
        ResourceSpec::ServiceLinkedRole(ServiceLinkedRoleSpec {
            role_name: "AWSServiceRoleForEC2Spot".to_string(),
            service_name: "spot.amazonaws.com".to_string(),
        }),
    )
}

fn controller_identity() -> Resource {
    Resource::new(
        "karpenter-irsa",
        ResourceSpec::FederatedIdentity(FederatedIdentitySpec {
            inline_policy: Some(PolicySource::Built(controller_policy)),
            attached_policies: Vec::new(),
        }),
    )
}

fn node_role() -> Resource {
    Resource::new(
        "karpenter-node-role",
        ResourceSpec::IamRole(IamRoleSpec {
            role_name: TemplateSource::text("karpenter-node-role-name", NODE_ROLE_NAME),
            trusted_service: "ec2.amazonaws.com".to_string(),
            attached_policies: [
                "AmazonEKSWorkerNodePolicy",
                "AmazonEKS_CNI_Policy",
                "AmazonEC2ContainerRegistryReadOnly",
                "AmazonSSMManagedInstanceCore",
            ]
            .into_iter()
            .map(PolicyRef::aws_managed)
            .collect(),
            inline_policy: None,
        }),
    )
}

fn interruption_queue() -> Resource {
    Resource::new(
        "karpenter-sqs-queue",
        ResourceSpec::ManagedQueue(QueueSpec {
            queue_name: TemplateSource::text("karpenter-queue-name", QUEUE_NAME),
            message_retention_secs: 300,
            managed_encryption: true,
            policy: Some(PolicySource::Built(queue_policy)),
        }),
    )
}

fn node_identity_mapping() -> Resource {
    Resource::new(
        "karpenter-node-iam-auth",
        ResourceSpec::IamAuth(IamAuthSpec {
            role_name: TemplateSource::text("karpenter-node-iam-auth-role", NODE_ROLE_NAME),
            username: "system:node:{{EC2PrivateDNSName}}".to_string(),
            groups: vec!["system:bootstrappers".to_string(), "system:nodes".to_string()],
        }),
    )
    .requires("karpenter-node-role")
}

fn default_node_pool() -> Resource {
    let node_class = Resource::new(
        "karpenter-default-ec2nodeclass",
        ResourceSpec::Manifest(ManifestSpec {
            api_kind: "ec2nodeclasses.karpenter.k8s.aws".to_string(),
            object_name: TemplateSource::text("ec2nodeclass-name", "default"),
            namespace: None,
            template: TemplateSource::yaml("karpenter-default-ec2nodeclass", NODE_CLASS_TEMPLATE),
        }),
    );

    Resource::new(
        "karpenter-default-nodepool",
        ResourceSpec::Manifest(ManifestSpec {
            api_kind: "nodepools.karpenter.sh".to_string(),
            object_name: TemplateSource::text("nodepool-name", "default"),
            namespace: None,
            template: TemplateSource::yaml("karpenter-default-nodepool", NODE_POOL_TEMPLATE),
        }),
    )
    .with_dependency(node_class)
}

/// Lets EventBridge and SQS deliver interruption events to the queue.
fn queue_policy(ctx: &RenderContext) -> TemplateResult<PolicyDocument> {
    let queue_arn = format!(
        "arn:{}:sqs:{}:{}:karpenter-{}",
        ctx.partition, ctx.region, ctx.account, ctx.cluster_name
    );
    Ok(PolicyDocument::new().statement(
        Statement::allow("EC2InterruptionPolicy", "sqs:SendMessage")
            .principal(Principal::services(["events.amazonaws.com", "sqs.amazonaws.com"]))
            .resource(queue_arn),
    ))
}

/// Controller permissions, scoped to resources tagged for this cluster.
fn controller_policy(ctx: &RenderContext) -> TemplateResult<PolicyDocument> {
    let partition = ctx.partition.as_str();
    let region = ctx.region.as_str();
    let account = ctx.account.as_str();
    let cluster = ctx.cluster_name.as_str();

    let ec2 = |resource: &str| format!("arn:{}:ec2:{}:*:{}", partition, region, resource);
    let iam = |resource: &str| format!("arn:{}:iam::{}:{}", partition, account, resource);

    let resource_owned = format!("aws:ResourceTag/kubernetes.io/cluster/{}", cluster);
    let request_owned = format!("aws:RequestTag/kubernetes.io/cluster/{}", cluster);
    let tagged_resources: Vec<String> = [
        "fleet/*",
        "instance/*",
        "volume/*",
        "network-interface/*",
        "launch-template/*",
        "spot-instances-request/*",
    ]
    .into_iter()
    .map(ec2)
    .collect();
    let instance_profiles = iam("instance-profile/*");

    Ok(PolicyDocument::new()
        .statement(
            Statement::allow(
                "AllowScopedEC2InstanceAccessActions",
                vec!["ec2:RunInstances", "ec2:CreateFleet"],
            )
            .resource(vec![
                format!("arn:{}:ec2:{}::image/*", partition, region),
                format!("arn:{}:ec2:{}::snapshot/*", partition, region),
                ec2("security-group/*"),
                ec2("subnet/*"),
            ]),
        )
        .statement(
            Statement::allow(
                "AllowScopedEC2LaunchTemplateAccessActions",
                vec!["ec2:RunInstances", "ec2:CreateFleet"],
            )
            .resource(ec2("launch-template/*"))
            .condition("StringEquals", resource_owned.as_str(), "owned")
            .condition("StringLike", "aws:ResourceTag/karpenter.sh/nodepool", "*"),
        )
        .statement(
            Statement::allow(
                "AllowScopedEC2InstanceActionsWithTags",
                vec!["ec2:RunInstances", "ec2:CreateFleet", "ec2:CreateLaunchTemplate"],
            )
            .resource(tagged_resources.clone())
            .condition("StringEquals", request_owned.as_str(), "owned")
            .condition("StringEquals", "aws:RequestTag/eks:eks-cluster-name", cluster)
            .condition("StringLike", "aws:RequestTag/karpenter.sh/nodepool", "*"),
        )
        .statement(
            Statement::allow("AllowScopedResourceCreationTagging", "ec2:CreateTags")
                .resource(tagged_resources)
                .condition("StringEquals", request_owned.as_str(), "owned")
                .condition("StringEquals", "aws:RequestTag/eks:eks-cluster-name", cluster)
                .condition(
                    "StringEquals",
                    "ec2:CreateAction",
                    vec!["RunInstances", "CreateFleet", "CreateLaunchTemplate"],
                )
                .condition("StringLike", "aws:RequestTag/karpenter.sh/nodepool", "*"),
        )
        .statement(
            Statement::allow("AllowScopedResourceTagging", "ec2:CreateTags")
                .resource(ec2("instance/*"))
                .condition("StringEquals", resource_owned.as_str(), "owned")
                .condition("StringLike", "aws:ResourceTag/karpenter.sh/nodepool", "*")
                .condition(
                    "StringEqualsIfExists",
                    "aws:RequestTag/eks:eks-cluster-name",
                    cluster,
                )
                .condition(
                    "ForAllValues:StringEquals",
                    "aws:TagKeys",
                    vec!["eks:eks-cluster-name", "karpenter.sh/nodeclaim", "Name"],
                ),
        )
        .statement(
            Statement::allow(
                "AllowScopedDeletion",
                vec!["ec2:TerminateInstances", "ec2:DeleteLaunchTemplate"],
            )
            .resource(vec![ec2("instance/*"), ec2("launch-template/*")])
            .condition("StringEquals", resource_owned.as_str(), "owned")
            .condition("StringLike", "aws:ResourceTag/karpenter.sh/nodepool", "*"),
        )
        .statement(
            Statement::allow(
                "AllowRegionalReadActions",
                vec![
                    "ec2:DescribeImages",
                    "ec2:DescribeInstances",
                    "ec2:DescribeInstanceTypeOfferings",
                    "ec2:DescribeInstanceTypes",
                    "ec2:DescribeLaunchTemplates",
                    "ec2:DescribeSecurityGroups",
                    "ec2:DescribeSpotPriceHistory",
                    "ec2:DescribeSubnets",
                ],
            )
            .resource("*")
            .condition("StringEquals", "aws:RequestedRegion", region),
        )
        .statement(
            Statement::allow("AllowSSMReadActions", vec!["ssm:GetParameter"])
                .resource(format!("arn:{}:ssm:{}::parameter/aws/service/*", partition, region)),
        )
        .statement(
            Statement::allow("AllowPricingReadActions", vec!["pricing:GetProducts"]).resource("*"),
        )
        .statement(
            Statement::allow(
                "AllowInterruptionQueueActions",
                vec!["sqs:DeleteMessage", "sqs:GetQueueUrl", "sqs:ReceiveMessage"],
            )
            .resource(format!(
                "arn:{}:sqs:{}:{}:karpenter-{}",
                partition, region, account, cluster
            )),
        )
        .statement(
            Statement::allow("AllowPassingInstanceRole", "iam:PassRole")
                .resource(iam(&format!("role/KarpenterNodeRole-{}", cluster)))
                .condition(
                    "StringEquals",
                    "iam:PassedToService",
                    vec!["ec2.amazonaws.com", "ec2.amazonaws.com.cn"],
                ),
        )
        .statement(
            Statement::allow(
                "AllowScopedInstanceProfileCreationActions",
                vec!["iam:CreateInstanceProfile"],
            )
            .resource(instance_profiles.clone())
            .condition("StringEquals", request_owned.as_str(), "owned")
            .condition("StringEquals", "aws:RequestTag/eks:eks-cluster-name", cluster)
            .condition("StringEquals", "aws:RequestTag/topology.kubernetes.io/region", region)
            .condition("StringLike", "aws:RequestTag/karpenter.k8s.aws/ec2nodeclass", "*"),
        )
        .statement(
            Statement::allow(
                "AllowScopedInstanceProfileTagActions",
                vec!["iam:TagInstanceProfile"],
            )
            .resource(instance_profiles.clone())
            .condition("StringEquals", resource_owned.as_str(), "owned")
            .condition("StringEquals", "aws:ResourceTag/topology.kubernetes.io/region", region)
            .condition("StringEquals", request_owned.as_str(), "owned")
            .condition("StringEquals", "aws:RequestTag/eks:eks-cluster-name", cluster)
            .condition("StringEquals", "aws:RequestTag/topology.kubernetes.io/region", region)
            .condition("StringLike", "aws:ResourceTag/karpenter.k8s.aws/ec2nodeclass", "*")
            .condition("StringLike", "aws:RequestTag/karpenter.k8s.aws/ec2nodeclass", "*"),
        )
        .statement(
            Statement::allow(
                "AllowScopedInstanceProfileActions",
                vec![
                    "iam:AddRoleToInstanceProfile",
                    "iam:RemoveRoleFromInstanceProfile",
                    "iam:DeleteInstanceProfile",
                ],
            )
            .resource(instance_profiles.clone())
            .condition("StringEquals", resource_owned.as_str(), "owned")
            .condition("StringEquals", "aws:ResourceTag/topology.kubernetes.io/region", region)
            .condition("StringLike", "aws:ResourceTag/karpenter.k8s.aws/ec2nodeclass", "*"),
        )
        .statement(
            Statement::allow("AllowInstanceProfileReadActions", "iam:GetInstanceProfile")
                .resource(instance_profiles),
        )
        .statement(
            Statement::allow("AllowAPIServerEndpointDiscovery", "eks:DescribeCluster").resource(
                format!(
                    "arn:{}:eks:{}:{}:cluster/{}",
                    partition, region, account, cluster
                ),
            ),
        ))
}

#[cfg(test)]
mod tests {
    use eksaddon_resource::{DependencyResolver, ResourceKind};
    use eksaddon_templates::TemplateRenderer;

    use super::*;

    fn ctx() -> RenderContext {
        RenderContext::new("aws", "us-east-1", "111111111111", "demo")
            .with_service_account("karpenter", "karpenter")
            .with_version(DEFAULT_VERSION)
            .with_oidc_issuer("https://oidc.eks.us-east-1.amazonaws.com/id/EXAMPLE")
    }

    #[test]
    fn test_application_shape() {
        let app = application();
        let kinds: Vec<_> = app.dependencies.iter().map(Resource::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ResourceKind::ServiceLinkedRole,
                ResourceKind::FederatedIdentity,
                ResourceKind::IamRole,
                ResourceKind::ManagedQueue,
                ResourceKind::IamAuth,
            ]
        );
        assert_eq!(app.post_install_resources.len(), 1);
        assert!(app.installer.wait_for_ready);
        assert!(app.validate().is_ok());
    }

    #[test]
    fn test_controller_policy_is_scoped_to_cluster() {
        let policy = controller_policy(&ctx()).unwrap();
        assert_eq!(policy.statements.len(), 16);

        let pass_role = policy.find("AllowPassingInstanceRole").unwrap();
        assert_eq!(
            pass_role.resource.as_ref().unwrap().values(),
            vec!["arn:aws:iam::111111111111:role/KarpenterNodeRole-demo"]
        );

        let launch = policy.find("AllowScopedEC2LaunchTemplateAccessActions").unwrap();
        assert!(launch.condition["StringEquals"]
            .contains_key("aws:ResourceTag/kubernetes.io/cluster/demo"));

        let json: serde_json::Value = serde_json::from_str(&policy.to_json().unwrap()).unwrap();
        assert_eq!(json["Version"], "2012-10-17");
    }

    #[test]
    fn test_queue_policy_names_the_queue() {
        let policy = queue_policy(&ctx()).unwrap();
        let statement = policy.find("EC2InterruptionPolicy").unwrap();
        assert_eq!(
            statement.resource.as_ref().unwrap().values(),
            vec!["arn:aws:sqs:us-east-1:111111111111:karpenter-demo"]
        );
    }

    #[test]
    fn test_templates_render() {
        let renderer = TemplateRenderer::new();
        let ctx = ctx().with_setting("nodepool_cpu_limit", "200");
        let app = application();

        let values = renderer.render(&app.installer.values_template, &ctx).unwrap();
        let parsed = values.to_value().unwrap();
        assert_eq!(parsed["settings"]["clusterName"], "demo");
        assert_eq!(parsed["settings"]["interruptionQueue"], "karpenter-demo");
        assert_eq!(
            parsed["serviceAccount"]["annotations"]["eks.amazonaws.com/role-arn"],
            "arn:aws:iam::111111111111:role/eksaddon.demo.karpenter.karpenter"
        );
        assert_eq!(
            parsed["settings"]["featureGates"]["spotToSpotConsolidation"],
            serde_yaml::Value::Bool(false)
        );

        let manifests = DependencyResolver::new()
            .resolve(&app.post_install_resources, &ctx)
            .unwrap();
        let keys: Vec<_> = manifests.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "ec2nodeclasses.karpenter.k8s.aws/default",
                "nodepools.karpenter.sh/default"
            ]
        );
    }
}
