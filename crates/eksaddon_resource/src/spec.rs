//! Per-kind resource specifications and their resolution into concrete
//! create parameters.
//!
//! A spec holds templates and builders. Resolving it against a
//! [`RenderContext`] yields [`CreateParams`] with every name and document
//! already rendered, so nothing is rendered while cloud calls are in flight.

use std::collections::BTreeMap;
use std::fmt;

use eksaddon_templates::{
    PolicyDocument, RenderContext, RenderedDocument, TemplateRenderer, TemplateResult,
    TemplateSource,
};

use crate::kind::ResourceKind;

/// Builds a policy document from the context.
pub type PolicyBuilder = fn(&RenderContext) -> TemplateResult<PolicyDocument>;

/// Where a policy document comes from.
#[derive(Clone)]
pub enum PolicySource {
    /// Structured builder; values can never change the document's shape.
    Built(PolicyBuilder),
    /// JSON template rendered through the template renderer.
    Template(TemplateSource),
}

impl fmt::Debug for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicySource::Built(_) => f.write_str("PolicySource::Built(..)"),
            PolicySource::Template(source) => {
                f.debug_tuple("PolicySource::Template").field(&source.name).finish()
            }
        }
    }
}

impl PolicySource {
    pub fn render(
        &self,
        name: &str,
        renderer: &TemplateRenderer,
        ctx: &RenderContext,
    ) -> TemplateResult<RenderedDocument> {
        match self {
            PolicySource::Built(build) => build(ctx)?.render(name),
            PolicySource::Template(source) => renderer.render(source, ctx),
        }
    }
}

/// A policy attached to a role.
#[derive(Debug, Clone)]
pub enum PolicyRef {
    /// AWS managed policy by name, e.g. `AmazonEKSWorkerNodePolicy`.
    AwsManaged(String),
    /// Customer managed policy in the cluster's account, by name template.
    Customer(TemplateSource),
}

impl PolicyRef {
    pub fn aws_managed(name: impl Into<String>) -> Self {
        PolicyRef::AwsManaged(name.into())
    }

    fn arn(&self, renderer: &TemplateRenderer, ctx: &RenderContext) -> TemplateResult<String> {
        match self {
            PolicyRef::AwsManaged(name) => {
                Ok(format!("arn:{}:iam::aws:policy/{}", ctx.partition, name))
            }
            PolicyRef::Customer(name) => {
                let name = renderer.render(name, ctx)?.into_string();
                Ok(customer_policy_arn(ctx, &name))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceLinkedRoleSpec {
    pub role_name: String,
    /// Service principal owning the role, e.g. `spot.amazonaws.com`.
    pub service_name: String,
}

/// IAM role for the workload's service account. The role name and trust
/// policy come from the context.
#[derive(Debug, Clone)]
pub struct FederatedIdentitySpec {
    pub inline_policy: Option<PolicySource>,
    pub attached_policies: Vec<PolicyRef>,
}

#[derive(Debug, Clone)]
pub struct IamRoleSpec {
    pub role_name: TemplateSource,
    /// Service principal allowed to assume the role.
    pub trusted_service: String,
    pub attached_policies: Vec<PolicyRef>,
    pub inline_policy: Option<PolicySource>,
}

#[derive(Debug, Clone)]
pub struct IamAuthSpec {
    /// Name of the role being mapped, in the cluster's account.
    pub role_name: TemplateSource,
    /// Kubernetes username. Placeholders such as `{{EC2PrivateDNSName}}`
    /// are expanded by the cluster authenticator, not by the renderer.
    pub username: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub queue_name: TemplateSource,
    pub message_retention_secs: u32,
    pub managed_encryption: bool,
    pub policy: Option<PolicySource>,
}

#[derive(Debug, Clone)]
pub struct CustomPolicySpec {
    pub policy_name: TemplateSource,
    pub policy: PolicySource,
}

#[derive(Debug, Clone)]
pub struct ManifestSpec {
    /// Resource type as kubectl names it, e.g. `nodepools.karpenter.sh`.
    pub api_kind: String,
    pub object_name: TemplateSource,
    /// `None` for cluster-scoped objects.
    pub namespace: Option<String>,
    pub template: TemplateSource,
}

/// Kind-specific parameters of a resource.
#[derive(Debug, Clone)]
pub enum ResourceSpec {
    ServiceLinkedRole(ServiceLinkedRoleSpec),
    FederatedIdentity(FederatedIdentitySpec),
    IamRole(IamRoleSpec),
    IamAuth(IamAuthSpec),
    ManagedQueue(QueueSpec),
    CustomPolicy(CustomPolicySpec),
    Manifest(ManifestSpec),
}

/// Fully rendered inputs for a create call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateParams {
    ServiceLinkedRole {
        role_name: String,
        service_name: String,
    },
    Role {
        role_name: String,
        trust_policy: RenderedDocument,
        policy_arns: Vec<String>,
        inline_policy: Option<RenderedDocument>,
    },
    IamAuth {
        role_arn: String,
        username: String,
        groups: Vec<String>,
    },
    Queue {
        queue_name: String,
        attributes: BTreeMap<String, String>,
    },
    Policy {
        policy_name: String,
        document: RenderedDocument,
    },
    Manifest {
        api_kind: String,
        object_name: String,
        namespace: Option<String>,
        document: RenderedDocument,
    },
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::ServiceLinkedRole(_) => ResourceKind::ServiceLinkedRole,
            ResourceSpec::FederatedIdentity(_) => ResourceKind::FederatedIdentity,
            ResourceSpec::IamRole(_) => ResourceKind::IamRole,
            ResourceSpec::IamAuth(_) => ResourceKind::IamAuth,
            ResourceSpec::ManagedQueue(_) => ResourceKind::ManagedQueue,
            ResourceSpec::CustomPolicy(_) => ResourceKind::CustomPolicy,
            ResourceSpec::Manifest(_) => ResourceKind::Manifest,
        }
    }

    /// Render names and documents into create parameters.
    pub fn resolve(
        &self,
        name: &str,
        renderer: &TemplateRenderer,
        ctx: &RenderContext,
    ) -> TemplateResult<CreateParams> {
        let text = |source: &TemplateSource| -> TemplateResult<String> {
            Ok(renderer.render(source, ctx)?.into_string())
        };
        let inline = |policy: &Option<PolicySource>| {
            policy
                .as_ref()
                .map(|p| p.render(name, renderer, ctx))
                .transpose()
        };

        Ok(match self {
            ResourceSpec::ServiceLinkedRole(spec) => CreateParams::ServiceLinkedRole {
                role_name: spec.role_name.clone(),
                service_name: spec.service_name.clone(),
            },
            ResourceSpec::FederatedIdentity(spec) => CreateParams::Role {
                role_name: ctx.irsa_role_name(),
                trust_policy: PolicyDocument::assume_role_for_service_account(
                    &ctx.partition,
                    &ctx.account,
                    &ctx.oidc_provider()?,
                    &ctx.namespace,
                    &ctx.service_account,
                )
                .render(format!("{}-trust", name))?,
                policy_arns: attached_arns(&spec.attached_policies, renderer, ctx)?,
                inline_policy: inline(&spec.inline_policy)?,
            },
            ResourceSpec::IamRole(spec) => CreateParams::Role {
                role_name: text(&spec.role_name)?,
                trust_policy: PolicyDocument::assume_role_for_service(&spec.trusted_service)
                    .render(format!("{}-trust", name))?,
                policy_arns: attached_arns(&spec.attached_policies, renderer, ctx)?,
                inline_policy: inline(&spec.inline_policy)?,
            },
            ResourceSpec::IamAuth(spec) => CreateParams::IamAuth {
                role_arn: role_arn(ctx, &text(&spec.role_name)?),
                username: spec.username.clone(),
                groups: spec.groups.clone(),
            },
            ResourceSpec::ManagedQueue(spec) => {
                let mut attributes = BTreeMap::from([(
                    "MessageRetentionPeriod".to_string(),
                    spec.message_retention_secs.to_string(),
                )]);
                if spec.managed_encryption {
                    attributes.insert("SqsManagedSseEnabled".to_string(), "true".to_string());
                }
                if let Some(policy) = &spec.policy {
                    let document = policy.render(name, renderer, ctx)?;
                    attributes.insert("Policy".to_string(), document.into_string());
                }
                CreateParams::Queue {
                    queue_name: text(&spec.queue_name)?,
                    attributes,
                }
            }
            ResourceSpec::CustomPolicy(spec) => CreateParams::Policy {
                policy_name: text(&spec.policy_name)?,
                document: spec.policy.render(name, renderer, ctx)?,
            },
            ResourceSpec::Manifest(spec) => CreateParams::Manifest {
                api_kind: spec.api_kind.clone(),
                object_name: text(&spec.object_name)?,
                namespace: spec.namespace.clone(),
                document: renderer.render(&spec.template, ctx)?,
            },
        })
    }
}

impl CreateParams {
    /// Key the resource is looked up by: a role, queue or policy name, the
    /// mapped role ARN, or an object key for manifests.
    pub fn key(&self) -> String {
        match self {
            CreateParams::ServiceLinkedRole { role_name, .. }
            | CreateParams::Role { role_name, .. } => role_name.clone(),
            CreateParams::IamAuth { role_arn, .. } => role_arn.clone(),
            CreateParams::Queue { queue_name, .. } => queue_name.clone(),
            CreateParams::Policy { policy_name, .. } => policy_name.clone(),
            CreateParams::Manifest {
                api_kind,
                object_name,
                namespace,
                ..
            } => manifest_key(api_kind, namespace.as_deref(), object_name),
        }
    }
}

fn attached_arns(
    policies: &[PolicyRef],
    renderer: &TemplateRenderer,
    ctx: &RenderContext,
) -> TemplateResult<Vec<String>> {
    policies.iter().map(|p| p.arn(renderer, ctx)).collect()
}

pub fn role_arn(ctx: &RenderContext, role_name: &str) -> String {
    format!("arn:{}:iam::{}:role/{}", ctx.partition, ctx.account, role_name)
}

pub fn customer_policy_arn(ctx: &RenderContext, policy_name: &str) -> String {
    format!(
        "arn:{}:iam::{}:policy/{}",
        ctx.partition, ctx.account, policy_name
    )
}

/// Lookup key of an in-cluster object: `kind/name` or `kind/namespace/name`.
pub fn manifest_key(api_kind: &str, namespace: Option<&str>, object_name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}/{}/{}", api_kind, ns, object_name),
        None => format!("{}/{}", api_kind, object_name),
    }
}

/// Inverse of [`manifest_key`]: `(api_kind, namespace, name)`.
pub fn parse_manifest_key(key: &str) -> Option<(&str, Option<&str>, &str)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [kind, name] if !kind.is_empty() && !name.is_empty() => Some((*kind, None, *name)),
        [kind, ns, name] if !kind.is_empty() && !ns.is_empty() && !name.is_empty() => {
            Some((*kind, Some(*ns), *name))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use eksaddon_templates::{Statement, TemplateError};

    use super::*;

    fn demo() -> RenderContext {
        RenderContext::new("aws", "us-east-1", "111111111111", "demo")
            .with_service_account("karpenter", "karpenter")
            .with_oidc_issuer("https://oidc.eks.us-east-1.amazonaws.com/id/ABC")
    }

    fn queue_policy(ctx: &RenderContext) -> TemplateResult<PolicyDocument> {
        Ok(PolicyDocument::new().statement(
            Statement::allow("EC2InterruptionPolicy", "sqs:SendMessage").resource(format!(
                "arn:{}:sqs:{}:{}:karpenter-{}",
                ctx.partition, ctx.region, ctx.account, ctx.cluster_name
            )),
        ))
    }

    #[test]
    fn test_iam_role_resolves_names_and_arns() {
        let spec = ResourceSpec::IamRole(IamRoleSpec {
            role_name: TemplateSource::text("node-role", "KarpenterNodeRole-{{ cluster_name }}"),
            trusted_service: "ec2.amazonaws.com".to_string(),
            attached_policies: vec![
                PolicyRef::aws_managed("AmazonEKSWorkerNodePolicy"),
                PolicyRef::Customer(TemplateSource::text("p", "extra-{{ cluster_name }}")),
            ],
            inline_policy: None,
        });

        let params = spec
            .resolve("node-role", &TemplateRenderer::new(), &demo())
            .unwrap();
        assert_eq!(params.key(), "KarpenterNodeRole-demo");
        match params {
            CreateParams::Role {
                role_name,
                trust_policy,
                policy_arns,
                inline_policy,
            } => {
                assert_eq!(role_name, "KarpenterNodeRole-demo");
                assert!(trust_policy.as_str().contains("ec2.amazonaws.com"));
                assert_eq!(
                    policy_arns,
                    vec![
                        "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy".to_string(),
                        "arn:aws:iam::111111111111:policy/extra-demo".to_string(),
                    ]
                );
                assert!(inline_policy.is_none());
            }
            other => panic!("unexpected params {:?}", other),
        }
    }

    #[test]
    fn test_federated_identity_uses_service_account_role() {
        let spec = ResourceSpec::FederatedIdentity(FederatedIdentitySpec {
            inline_policy: Some(PolicySource::Built(queue_policy)),
            attached_policies: Vec::new(),
        });

        let params = spec
            .resolve("karpenter-irsa", &TemplateRenderer::new(), &demo())
            .unwrap();
        assert_eq!(params.key(), "eksaddon.demo.karpenter.karpenter");
        let CreateParams::Role {
            trust_policy,
            inline_policy,
            ..
        } = params
        else {
            panic!("expected role params");
        };
        assert!(trust_policy
            .as_str()
            .contains("system:serviceaccount:karpenter:karpenter"));
        assert!(inline_policy.unwrap().as_str().contains("karpenter-demo"));
    }

    #[test]
    fn test_federated_identity_requires_oidc_issuer() {
        let ctx = RenderContext::new("aws", "us-east-1", "111111111111", "demo");
        let spec = ResourceSpec::FederatedIdentity(FederatedIdentitySpec {
            inline_policy: None,
            attached_policies: Vec::new(),
        });
        assert!(matches!(
            spec.resolve("irsa", &TemplateRenderer::new(), &ctx),
            Err(TemplateError::InvalidContext { .. })
        ));
    }

    #[test]
    fn test_queue_attributes_carry_policy() {
        let spec = ResourceSpec::ManagedQueue(QueueSpec {
            queue_name: TemplateSource::text("queue", "karpenter-{{ cluster_name }}"),
            message_retention_secs: 300,
            managed_encryption: true,
            policy: Some(PolicySource::Built(queue_policy)),
        });

        let params = spec
            .resolve("queue", &TemplateRenderer::new(), &demo())
            .unwrap();
        assert_eq!(params.key(), "karpenter-demo");
        let CreateParams::Queue { attributes, .. } = params else {
            panic!("expected queue params");
        };
        assert_eq!(attributes["MessageRetentionPeriod"], "300");
        assert_eq!(attributes["SqsManagedSseEnabled"], "true");
        assert!(attributes["Policy"].contains("sqs:SendMessage"));
    }

    #[test]
    fn test_iam_auth_keeps_authenticator_placeholder() {
        let spec = ResourceSpec::IamAuth(IamAuthSpec {
            role_name: TemplateSource::text("role", "KarpenterNodeRole-{{ cluster_name }}"),
            username: "system:node:{{EC2PrivateDNSName}}".to_string(),
            groups: vec!["system:bootstrappers".to_string(), "system:nodes".to_string()],
        });

        let params = spec
            .resolve("auth", &TemplateRenderer::new(), &demo())
            .unwrap();
        assert_eq!(params.key(), "arn:aws:iam::111111111111:role/KarpenterNodeRole-demo");
        let CreateParams::IamAuth { username, .. } = params else {
            panic!("expected iam auth params");
        };
        assert_eq!(username, "system:node:{{EC2PrivateDNSName}}");
    }

    #[test]
    fn test_manifest_keys_round_trip() {
        assert_eq!(
            parse_manifest_key(&manifest_key("nodepools.karpenter.sh", None, "default")),
            Some(("nodepools.karpenter.sh", None, "default"))
        );
        assert_eq!(
            parse_manifest_key(&manifest_key("configmaps", Some("kube-system"), "x")),
            Some(("configmaps", Some("kube-system"), "x"))
        );
        assert_eq!(parse_manifest_key("broken"), None);
        assert_eq!(parse_manifest_key("a//b"), None);
    }
}
