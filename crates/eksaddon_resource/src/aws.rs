//! Cloud provider backed by the `aws`, `eksctl` and `kubectl` CLIs.

use std::sync::Arc;

use async_trait::async_trait;
use eksaddon_installer::{CommandExecutor, CommandLine, ExecError};
use tracing::{debug, info, warn};

use crate::cloud::{CloudProvider, Lookup};
use crate::error::{CloudError, CloudResult};
use crate::kind::ResourceKind;
use crate::spec::{manifest_key, parse_manifest_key, CreateParams};

const IAM_MISSING: &[&str] = &["NoSuchEntity"];
const QUEUE_MISSING: &[&str] = &["NonExistentQueue", "QueueDoesNotExist"];
const MAPPING_MISSING: &[&str] = &["not found", "no iamidentitymapping"];
/// A removed CRD makes every object of that type absent.
const OBJECT_MISSING: &[&str] = &["NotFound", "the server doesn't have a resource type"];

/// [`CloudProvider`] for one cluster, shelling out through a
/// [`CommandExecutor`].
#[derive(Clone)]
pub struct AwsCliProvider {
    executor: Arc<dyn CommandExecutor>,
    cluster_name: String,
    region: String,
    kube_context: Option<String>,
}

impl AwsCliProvider {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        cluster_name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            cluster_name: cluster_name.into(),
            region: region.into(),
            kube_context: None,
        }
    }

    /// Target a kubeconfig context other than the current one.
    pub fn with_kube_context(mut self, context: impl Into<String>) -> Self {
        self.kube_context = Some(context.into());
        self
    }

    fn aws(&self, service: &str, operation: &str) -> CommandLine {
        CommandLine::new("aws")
            .args([service, operation])
            .args(["--region", self.region.as_str(), "--output", "text"])
    }

    fn eksctl(&self, verb: &str) -> CommandLine {
        CommandLine::new("eksctl")
            .args([verb, "iamidentitymapping"])
            .args(["--cluster", self.cluster_name.as_str()])
            .args(["--region", self.region.as_str()])
    }

    fn kubectl(&self, verb: &str) -> CommandLine {
        CommandLine::new("kubectl")
            .opt("--context", self.kube_context.as_deref())
            .arg(verb)
    }

    /// Run a read command. Returns `None` when stderr shows the object is
    /// missing.
    async fn fetch(&self, cmd: &CommandLine, missing: &[&str]) -> CloudResult<Option<String>> {
        match self.executor.execute_checked(cmd).await {
            Ok(output) => Ok(Some(output.stdout_trimmed().to_string())),
            Err(e) if is_missing(&e, missing) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Run a mutating command. A missing object becomes [`CloudError::NotFound`].
    async fn mutate(
        &self,
        cmd: &CommandLine,
        missing: &[&str],
        what: &str,
    ) -> CloudResult<String> {
        match self.executor.execute_checked(cmd).await {
            Ok(output) => Ok(output.stdout_trimmed().to_string()),
            Err(e) if is_missing(&e, missing) => Err(CloudError::NotFound(what.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Text-output list query; `None` and blank mean an empty list.
    async fn list(&self, cmd: &CommandLine) -> CloudResult<Vec<String>> {
        let out = self.mutate(cmd, IAM_MISSING, "role").await?;
        Ok(out
            .split_whitespace()
            .filter(|s| *s != "None")
            .map(String::from)
            .collect())
    }

    async fn create_role(
        &self,
        role_name: &str,
        trust_policy: &str,
        policy_arns: &[String],
        inline_policy: Option<&str>,
    ) -> CloudResult<String> {
        let create = self
            .aws("iam", "create-role")
            .args(["--role-name", role_name])
            .args(["--assume-role-policy-document", trust_policy])
            .args(["--query", "Role.Arn"]);
        let arn = self.mutate(&create, &[], role_name).await?;

        // A role found by lookup is taken as complete, so a role left
        // without its policies would never be repaired by a re-run.
        if let Err(e) = self.configure_role(role_name, policy_arns, inline_policy).await {
            warn!("Configuring role {} failed, deleting it: {}", role_name, e);
            if let Err(cleanup) = self.delete_role(role_name).await {
                warn!("Could not delete partially created role {}: {}", role_name, cleanup);
            }
            return Err(e);
        }
        Ok(arn)
    }

    async fn configure_role(
        &self,
        role_name: &str,
        policy_arns: &[String],
        inline_policy: Option<&str>,
    ) -> CloudResult<()> {
        for policy_arn in policy_arns {
            let attach = self
                .aws("iam", "attach-role-policy")
                .args(["--role-name", role_name])
                .args(["--policy-arn", policy_arn.as_str()]);
            self.mutate(&attach, &[], role_name).await?;
        }

        if let Some(document) = inline_policy {
            let put = self
                .aws("iam", "put-role-policy")
                .args(["--role-name", role_name])
                .args(["--policy-name", role_name])
                .args(["--policy-document", document]);
            self.mutate(&put, &[], role_name).await?;
        }
        Ok(())
    }

    /// Detach everything IAM requires before a role can go, then delete it.
    async fn delete_role(&self, role_name: &str) -> CloudResult<()> {
        let attached = self
            .list(
                &self
                    .aws("iam", "list-attached-role-policies")
                    .args(["--role-name", role_name])
                    .args(["--query", "AttachedPolicies[].PolicyArn"]),
            )
            .await?;
        for policy_arn in &attached {
            let detach = self
                .aws("iam", "detach-role-policy")
                .args(["--role-name", role_name])
                .args(["--policy-arn", policy_arn.as_str()]);
            self.mutate(&detach, IAM_MISSING, role_name).await?;
        }

        let inline = self
            .list(
                &self
                    .aws("iam", "list-role-policies")
                    .args(["--role-name", role_name])
                    .args(["--query", "PolicyNames"]),
            )
            .await?;
        for policy_name in &inline {
            let delete = self
                .aws("iam", "delete-role-policy")
                .args(["--role-name", role_name])
                .args(["--policy-name", policy_name.as_str()]);
            self.mutate(&delete, IAM_MISSING, role_name).await?;
        }

        let profiles = self
            .list(
                &self
                    .aws("iam", "list-instance-profiles-for-role")
                    .args(["--role-name", role_name])
                    .args(["--query", "InstanceProfiles[].InstanceProfileName"]),
            )
            .await?;
        for profile in &profiles {
            let remove = self
                .aws("iam", "remove-role-from-instance-profile")
                .args(["--instance-profile-name", profile.as_str()])
                .args(["--role-name", role_name]);
            self.mutate(&remove, IAM_MISSING, role_name).await?;
        }

        let delete = self
            .aws("iam", "delete-role")
            .args(["--role-name", role_name]);
        self.mutate(&delete, IAM_MISSING, role_name).await?;
        Ok(())
    }

    fn manifest_command(&self, verb: &str, key: &str) -> CloudResult<CommandLine> {
        let (api_kind, namespace, name) = parse_manifest_key(key)
            .ok_or_else(|| CloudError::UnexpectedResponse(format!("bad object key {}", key)))?;
        Ok(self
            .kubectl(verb)
            .args([api_kind, name])
            .opt("--namespace", namespace))
    }
}

#[async_trait]
impl CloudProvider for AwsCliProvider {
    async fn lookup(&self, kind: ResourceKind, key: &str) -> CloudResult<Lookup> {
        debug!("Looking up {} {}", kind, key);
        let found = match kind {
            ResourceKind::ServiceLinkedRole
            | ResourceKind::FederatedIdentity
            | ResourceKind::IamRole => {
                let cmd = self
                    .aws("iam", "get-role")
                    .args(["--role-name", key, "--query", "Role.Arn"]);
                self.fetch(&cmd, IAM_MISSING).await?
            }
            ResourceKind::CustomPolicy => {
                let query = format!("Policies[?PolicyName=='{}'].Arn", key);
                let cmd = self
                    .aws("iam", "list-policies")
                    .args(["--scope", "Local", "--query", query.as_str()]);
                self.fetch(&cmd, IAM_MISSING)
                    .await?
                    .filter(|arn| !arn.is_empty() && arn != "None")
            }
            ResourceKind::ManagedQueue => {
                let cmd = self
                    .aws("sqs", "get-queue-url")
                    .args(["--queue-name", key, "--query", "QueueUrl"]);
                self.fetch(&cmd, QUEUE_MISSING).await?
            }
            ResourceKind::IamAuth => {
                let cmd = self
                    .eksctl("get")
                    .args(["--arn", key, "--output", "json"]);
                self.fetch(&cmd, MAPPING_MISSING)
                    .await?
                    .map(|_| key.to_string())
            }
            ResourceKind::Manifest => {
                let cmd = self.manifest_command("get", key)?.args(["--output", "name"]);
                self.fetch(&cmd, OBJECT_MISSING)
                    .await?
                    .map(|_| key.to_string())
            }
        };

        Ok(match found {
            Some(identifier) if !identifier.is_empty() && identifier != "None" => {
                Lookup::found(identifier)
            }
            Some(_) => Lookup::found(key),
            None => Lookup::absent(),
        })
    }

    async fn create(&self, kind: ResourceKind, params: &CreateParams) -> CloudResult<String> {
        debug!("Creating {}", kind);
        let identifier = match params {
            CreateParams::ServiceLinkedRole {
                role_name,
                service_name,
            } => {
                let cmd = self
                    .aws("iam", "create-service-linked-role")
                    .args(["--aws-service-name", service_name.as_str()])
                    .args(["--query", "Role.Arn"]);
                self.mutate(&cmd, &[], role_name).await?
            }
            CreateParams::Role {
                role_name,
                trust_policy,
                policy_arns,
                inline_policy,
            } => {
                self.create_role(
                    role_name,
                    trust_policy.as_str(),
                    policy_arns,
                    inline_policy.as_ref().map(|d| d.as_str()),
                )
                .await?
            }
            CreateParams::IamAuth {
                role_arn,
                username,
                groups,
            } => {
                let mut cmd = self
                    .eksctl("create")
                    .args(["--arn", role_arn.as_str()])
                    .args(["--username", username.as_str()]);
                for group in groups {
                    cmd = cmd.args(["--group", group.as_str()]);
                }
                self.mutate(&cmd, &[], role_arn).await?;
                role_arn.clone()
            }
            CreateParams::Queue {
                queue_name,
                attributes,
            } => {
                let attributes = serde_json::to_string(attributes)
                    .map_err(|e| CloudError::UnexpectedResponse(e.to_string()))?;
                let cmd = self
                    .aws("sqs", "create-queue")
                    .args(["--queue-name", queue_name.as_str()])
                    .args(["--attributes", attributes.as_str()])
                    .args(["--query", "QueueUrl"]);
                self.mutate(&cmd, &[], queue_name).await?
            }
            CreateParams::Policy {
                policy_name,
                document,
            } => {
                let cmd = self
                    .aws("iam", "create-policy")
                    .args(["--policy-name", policy_name.as_str()])
                    .args(["--policy-document", document.as_str()])
                    .args(["--query", "Policy.Arn"]);
                self.mutate(&cmd, &[], policy_name).await?
            }
            CreateParams::Manifest {
                api_kind,
                object_name,
                namespace,
                document,
            } => {
                let cmd = self
                    .kubectl("apply")
                    .opt("--namespace", namespace.as_deref())
                    .args(["--filename", "-"])
                    .stdin(document.as_str());
                self.mutate(&cmd, &[], object_name).await?;
                manifest_key(api_kind, namespace.as_deref(), object_name)
            }
        };
        info!("{} created: {}", kind, identifier);
        Ok(identifier)
    }

    async fn delete(&self, kind: ResourceKind, identifier: &str) -> CloudResult<()> {
        debug!("Deleting {} {}", kind, identifier);
        match kind {
            ResourceKind::ServiceLinkedRole => {
                let cmd = self
                    .aws("iam", "delete-service-linked-role")
                    .args(["--role-name", role_name_from_arn(identifier)]);
                self.mutate(&cmd, IAM_MISSING, identifier).await?;
            }
            ResourceKind::FederatedIdentity | ResourceKind::IamRole => {
                self.delete_role(role_name_from_arn(identifier)).await?;
            }
            ResourceKind::CustomPolicy => {
                let cmd = self
                    .aws("iam", "delete-policy")
                    .args(["--policy-arn", identifier]);
                self.mutate(&cmd, IAM_MISSING, identifier).await?;
            }
            ResourceKind::ManagedQueue => {
                let cmd = self
                    .aws("sqs", "delete-queue")
                    .args(["--queue-url", identifier]);
                self.mutate(&cmd, QUEUE_MISSING, identifier).await?;
            }
            ResourceKind::IamAuth => {
                let cmd = self.eksctl("delete").args(["--arn", identifier]);
                self.mutate(&cmd, MAPPING_MISSING, identifier).await?;
            }
            ResourceKind::Manifest => {
                let cmd = self
                    .manifest_command("delete", identifier)?
                    .args(["--ignore-not-found", "--wait=false"]);
                self.mutate(&cmd, OBJECT_MISSING, identifier).await?;
            }
        }
        Ok(())
    }
}

/// `arn:aws:iam::1:role/path/Name` -> `Name`. Plain names pass through.
fn role_name_from_arn(identifier: &str) -> &str {
    identifier.rsplit('/').next().unwrap_or(identifier)
}

fn is_missing(error: &ExecError, markers: &[&str]) -> bool {
    match error {
        ExecError::Failed { stderr, .. } => markers.iter().any(|m| stderr.contains(m)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use eksaddon_installer::{CommandOutput, MockExecutor};
    use eksaddon_templates::PolicyDocument;

    use super::*;

    fn provider(executor: &Arc<MockExecutor>) -> AwsCliProvider {
        AwsCliProvider::new(executor.clone(), "demo", "us-east-1")
    }

    #[tokio::test]
    async fn test_lookup_maps_missing_role_to_absent() {
        let executor = Arc::new(MockExecutor::new().respond(
            "aws",
            &["get-role"],
            CommandOutput::failure(
                254,
                "An error occurred (NoSuchEntity) when calling the GetRole operation",
            ),
        ));

        let lookup = provider(&executor)
            .lookup(ResourceKind::IamRole, "KarpenterNodeRole-demo")
            .await
            .unwrap();
        assert!(!lookup.exists);
        assert!(executor.was_called("aws", &["--role-name", "KarpenterNodeRole-demo"]));
    }

    #[tokio::test]
    async fn test_lookup_returns_queue_url() {
        let url = "https://sqs.us-east-1.amazonaws.com/111111111111/karpenter-demo";
        let executor = Arc::new(MockExecutor::new().respond(
            "aws",
            &["get-queue-url"],
            CommandOutput::success(format!("{}\n", url)),
        ));

        let lookup = provider(&executor)
            .lookup(ResourceKind::ManagedQueue, "karpenter-demo")
            .await
            .unwrap();
        assert_eq!(lookup, Lookup::found(url));
    }

    #[tokio::test]
    async fn test_lookup_propagates_other_failures() {
        let executor = Arc::new(MockExecutor::new().respond(
            "aws",
            &["get-role"],
            CommandOutput::failure(254, "AccessDenied"),
        ));

        assert!(matches!(
            provider(&executor)
                .lookup(ResourceKind::IamRole, "KarpenterNodeRole-demo")
                .await,
            Err(CloudError::Exec(_))
        ));
    }

    #[tokio::test]
    async fn test_create_role_attaches_policies() {
        let executor = Arc::new(MockExecutor::new().respond(
            "aws",
            &["create-role"],
            CommandOutput::success("arn:aws:iam::111111111111:role/KarpenterNodeRole-demo\n"),
        ));
        let trust = PolicyDocument::assume_role_for_service("ec2.amazonaws.com")
            .render("trust")
            .unwrap();
        let params = CreateParams::Role {
            role_name: "KarpenterNodeRole-demo".to_string(),
            trust_policy: trust,
            policy_arns: vec![
                "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy".to_string(),
                "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy".to_string(),
            ],
            inline_policy: None,
        };

        let arn = provider(&executor)
            .create(ResourceKind::IamRole, &params)
            .await
            .unwrap();
        assert_eq!(arn, "arn:aws:iam::111111111111:role/KarpenterNodeRole-demo");

        let commands = executor.get_commands();
        assert_eq!(commands.len(), 3);
        assert!(commands[0].has_args(&["iam", "create-role"]));
        assert!(commands[1].has_args(&["--policy-arn", "arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy"]));
        assert!(commands[2].has_args(&["--policy-arn", "arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy"]));
    }

    #[tokio::test]
    async fn test_create_iam_auth_passes_groups() {
        let executor = Arc::new(MockExecutor::new());
        let params = CreateParams::IamAuth {
            role_arn: "arn:aws:iam::111111111111:role/KarpenterNodeRole-demo".to_string(),
            username: "system:node:{{EC2PrivateDNSName}}".to_string(),
            groups: vec!["system:bootstrappers".to_string(), "system:nodes".to_string()],
        };

        provider(&executor)
            .create(ResourceKind::IamAuth, &params)
            .await
            .unwrap();

        let cmd = &executor.get_commands()[0];
        assert!(cmd.starts_with("eksctl", &["create", "iamidentitymapping", "--cluster", "demo"]));
        assert!(cmd.has_args(&["--group", "system:bootstrappers", "--group", "system:nodes"]));
        assert!(cmd.has_args(&["--username", "system:node:{{EC2PrivateDNSName}}"]));
    }

    #[tokio::test]
    async fn test_delete_role_detaches_before_delete() {
        let executor = Arc::new(
            MockExecutor::new()
                .respond(
                    "aws",
                    &["list-attached-role-policies"],
                    CommandOutput::success("arn:aws:iam::aws:policy/A\tarn:aws:iam::aws:policy/B\n"),
                )
                .respond("aws", &["list-role-policies"], CommandOutput::success("None\n"))
                .respond(
                    "aws",
                    &["list-instance-profiles-for-role"],
                    CommandOutput::success("demo_profile\n"),
                ),
        );

        provider(&executor)
            .delete(
                ResourceKind::IamRole,
                "arn:aws:iam::111111111111:role/KarpenterNodeRole-demo",
            )
            .await
            .unwrap();

        let ops: Vec<String> = executor
            .get_commands()
            .iter()
            .map(|c| c.args[1].clone())
            .collect();
        assert_eq!(
            ops,
            vec![
                "list-attached-role-policies",
                "detach-role-policy",
                "detach-role-policy",
                "list-role-policies",
                "list-instance-profiles-for-role",
                "remove-role-from-instance-profile",
                "delete-role",
            ]
        );
        assert!(executor.was_called("aws", &["--role-name", "KarpenterNodeRole-demo"]));
    }

    #[tokio::test]
    async fn test_delete_missing_queue_is_not_found() {
        let executor = Arc::new(MockExecutor::new().respond(
            "aws",
            &["delete-queue"],
            CommandOutput::failure(254, "AWS.SimpleQueueService.NonExistentQueue"),
        ));

        let err = provider(&executor)
            .delete(ResourceKind::ManagedQueue, "https://sqs/karpenter-demo")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_manifest_commands_use_object_key() {
        let executor = Arc::new(MockExecutor::new());
        let cloud = provider(&executor).with_kube_context("demo-admin");

        let lookup = cloud
            .lookup(ResourceKind::Manifest, "nodepools.karpenter.sh/default")
            .await
            .unwrap();
        assert_eq!(lookup, Lookup::found("nodepools.karpenter.sh/default"));

        cloud
            .delete(ResourceKind::Manifest, "nodepools.karpenter.sh/default")
            .await
            .unwrap();

        let commands = executor.get_commands();
        assert_eq!(
            commands[1].args,
            vec![
                "--context",
                "demo-admin",
                "delete",
                "nodepools.karpenter.sh",
                "default",
                "--ignore-not-found",
                "--wait=false",
            ]
        );
    }

    #[tokio::test]
    async fn test_manifest_without_crd_counts_as_absent() {
        let executor = Arc::new(
            MockExecutor::new()
                .respond(
                    "kubectl",
                    &["get"],
                    CommandOutput::failure(
                        1,
                        "error: the server doesn't have a resource type \"nodepools\"",
                    ),
                )
                .respond(
                    "kubectl",
                    &["delete"],
                    CommandOutput::failure(
                        1,
                        "error: the server doesn't have a resource type \"nodepools\"",
                    ),
                ),
        );
        let cloud = provider(&executor);

        let lookup = cloud
            .lookup(ResourceKind::Manifest, "nodepools.karpenter.sh/default")
            .await
            .unwrap();
        assert!(!lookup.exists);

        let err = cloud
            .delete(ResourceKind::Manifest, "nodepools.karpenter.sh/default")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(executor.was_called("kubectl", &["--ignore-not-found", "--wait=false"]));
    }

    #[tokio::test]
    async fn test_failed_attach_deletes_the_new_role() {
        let executor = Arc::new(
            MockExecutor::new()
                .respond(
                    "aws",
                    &["create-role"],
                    CommandOutput::success("arn:aws:iam::111111111111:role/KarpenterNodeRole-demo\n"),
                )
                .respond(
                    "aws",
                    &["attach-role-policy"],
                    CommandOutput::failure(254, "An error occurred (Throttling)"),
                ),
        );
        let trust = PolicyDocument::assume_role_for_service("ec2.amazonaws.com")
            .render("trust")
            .unwrap();
        let params = CreateParams::Role {
            role_name: "KarpenterNodeRole-demo".to_string(),
            trust_policy: trust,
            policy_arns: vec!["arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy".to_string()],
            inline_policy: None,
        };

        let result = provider(&executor)
            .create(ResourceKind::IamRole, &params)
            .await;
        assert!(matches!(result, Err(CloudError::Exec(_))));

        let ops: Vec<String> = executor
            .get_commands()
            .iter()
            .map(|c| c.args[1].clone())
            .collect();
        assert_eq!(
            ops,
            vec![
                "create-role",
                "attach-role-policy",
                "list-attached-role-policies",
                "list-role-policies",
                "list-instance-profiles-for-role",
                "delete-role",
            ]
        );
    }

    #[test]
    fn test_role_name_from_arn() {
        assert_eq!(
            role_name_from_arn(
                "arn:aws:iam::1:role/aws-service-role/spot.amazonaws.com/AWSServiceRoleForEC2Spot"
            ),
            "AWSServiceRoleForEC2Spot"
        );
        assert_eq!(role_name_from_arn("plain"), "plain");
    }
}
