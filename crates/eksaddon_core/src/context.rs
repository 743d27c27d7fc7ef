//! Cluster identity lookup.
//!
//! The account, partition and OIDC issuer of the target cluster are read
//! once at the start of an invocation. Everything after that works from the
//! resulting [`RenderContext`](eksaddon_templates::RenderContext).

use std::sync::Arc;

use async_trait::async_trait;
use eksaddon_installer::{CommandExecutor, CommandLine};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Where a cluster lives and how its workloads federate into IAM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub partition: String,
    pub region: String,
    pub account: String,
    pub oidc_issuer: Option<String>,
}

/// Supplies the identity of a cluster from ambient credentials.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn cluster_identity(&self, cluster: &str, region: &str) -> CoreResult<ClusterIdentity>;
}

/// Reads the caller identity and cluster description through the `aws` CLI.
#[derive(Clone)]
pub struct AwsCliContextSource {
    executor: Arc<dyn CommandExecutor>,
}

impl AwsCliContextSource {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ContextSource for AwsCliContextSource {
    async fn cluster_identity(&self, cluster: &str, region: &str) -> CoreResult<ClusterIdentity> {
        let caller = CommandLine::new("aws")
            .args(["sts", "get-caller-identity"])
            .args(["--region", region])
            .args(["--query", "[Account,Arn]", "--output", "text"]);
        let output = self.executor.execute_checked(&caller).await?;
        let (account, partition) = parse_caller_identity(output.stdout_trimmed())
            .ok_or_else(|| CoreError::Context {
                cluster: cluster.to_string(),
                message: format!("unexpected caller identity {:?}", output.stdout_trimmed()),
            })?;

        let describe = CommandLine::new("aws")
            .args(["eks", "describe-cluster", "--name", cluster])
            .args(["--region", region])
            .args(["--query", "cluster.identity.oidc.issuer", "--output", "text"]);
        let output = self
            .executor
            .execute_checked(&describe)
            .await
            .map_err(|e| CoreError::Context {
                cluster: cluster.to_string(),
                message: e.to_string(),
            })?;
        let oidc_issuer = match output.stdout_trimmed() {
            "" | "None" => None,
            issuer => Some(issuer.to_string()),
        };

        debug!(
            "Cluster {} is in account {} ({}), issuer {:?}",
            cluster, account, partition, oidc_issuer
        );
        Ok(ClusterIdentity {
            partition,
            region: region.to_string(),
            account,
            oidc_issuer,
        })
    }
}

/// `<account>\t<caller arn>` into the account and the ARN's partition.
fn parse_caller_identity(stdout: &str) -> Option<(String, String)> {
    let mut fields = stdout.split_whitespace();
    let account = fields.next()?;
    let arn = fields.next()?;
    let partition = arn.strip_prefix("arn:")?.split(':').next()?;
    if partition.is_empty() {
        return None;
    }
    Some((account.to_string(), partition.to_string()))
}

/// Fixed identity, for dry runs against a known account and for tests.
#[derive(Debug, Clone)]
pub struct StaticContextSource {
    identity: ClusterIdentity,
}

impl StaticContextSource {
    pub fn new(
        partition: impl Into<String>,
        region: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            identity: ClusterIdentity {
                partition: partition.into(),
                region: region.into(),
                account: account.into(),
                oidc_issuer: None,
            },
        }
    }

    pub fn with_oidc_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.identity.oidc_issuer = Some(issuer.into());
        self
    }
}

#[async_trait]
impl ContextSource for StaticContextSource {
    async fn cluster_identity(&self, _cluster: &str, _region: &str) -> CoreResult<ClusterIdentity> {
        Ok(self.identity.clone())
    }
}
