//! Helm CLI package manager.

use std::sync::Arc;

use async_trait::async_trait;
use eksaddon_templates::RenderedDocument;
use serde::Deserialize;
use tracing::debug;

use crate::descriptor::PackageCoordinates;
use crate::error::{ExecError, PackageError, PackageResult};
use crate::exec::{CommandExecutor, CommandLine};
use crate::package::{PackageManager, ReleaseInfo};

/// `helm list -o json` entry.
#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
    namespace: String,
    chart: String,
    status: String,
}

/// The parts of `kubectl get deployment -o json` readiness needs.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Deployment {
    metadata: DeploymentMetadata,
    spec: DeploymentSpec,
    status: DeploymentStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DeploymentMetadata {
    generation: i64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct DeploymentSpec {
    replicas: i64,
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self { replicas: 1 }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeploymentStatus {
    observed_generation: i64,
    updated_replicas: i64,
    available_replicas: i64,
}

impl Deployment {
    fn is_ready(&self) -> bool {
        self.status.observed_generation >= self.metadata.generation
            && self.status.updated_replicas >= self.spec.replicas
            && self.status.available_replicas >= self.spec.replicas
    }
}

/// [`PackageManager`] backed by the `helm` and `kubectl` CLIs.
#[derive(Clone)]
pub struct HelmCli {
    executor: Arc<dyn CommandExecutor>,
    kube_context: Option<String>,
}

impl HelmCli {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            kube_context: None,
        }
    }

    /// Target a kubeconfig context other than the current one.
    pub fn with_kube_context(mut self, context: impl Into<String>) -> Self {
        self.kube_context = Some(context.into());
        self
    }

    fn helm(&self) -> CommandLine {
        CommandLine::new("helm").opt("--kube-context", self.kube_context.as_deref())
    }

    fn kubectl(&self) -> CommandLine {
        CommandLine::new("kubectl").opt("--context", self.kube_context.as_deref())
    }

    fn install_command(
        &self,
        coordinates: &PackageCoordinates,
        values: &RenderedDocument,
    ) -> CommandLine {
        let mut cmd = self
            .helm()
            .args(["upgrade", "--install"])
            .arg(&coordinates.release);
        cmd = if coordinates.is_oci() {
            cmd.arg(&coordinates.repository)
        } else {
            cmd.arg(&coordinates.chart)
                .arg("--repo")
                .arg(&coordinates.repository)
        };
        cmd = cmd
            .arg("--namespace")
            .arg(&coordinates.namespace)
            .arg("--version")
            .arg(&coordinates.version);
        if coordinates.create_namespace {
            cmd = cmd.arg("--create-namespace");
        }
        cmd.args(["--values", "-"]).stdin(values.as_str())
    }
}

#[async_trait]
impl PackageManager for HelmCli {
    async fn release(&self, release: &str, namespace: &str) -> PackageResult<Option<ReleaseInfo>> {
        let list = self
            .helm()
            .args(["list", "--all", "--namespace", namespace])
            .arg("--filter")
            .arg(format!("^{}$", release))
            .args(["--output", "json"]);
        let output = self.executor.execute_checked(&list).await?;
        let entries: Vec<ListEntry> =
            serde_json::from_str(output.stdout_trimmed()).map_err(|e| PackageError::Parse {
                command: list.display(),
                message: e.to_string(),
            })?;

        let Some(entry) = entries.into_iter().find(|e| e.name == release) else {
            debug!("Release {} not found in {}", release, namespace);
            return Ok(None);
        };

        let get_values = self
            .helm()
            .args(["get", "values", release, "--namespace", namespace])
            .args(["--output", "yaml"]);
        let output = self.executor.execute_checked(&get_values).await?;
        let values = match serde_yaml::from_str(&output.stdout) {
            Ok(serde_yaml::Value::Null) => serde_yaml::Value::Mapping(Default::default()),
            Ok(values) => values,
            Err(e) => {
                return Err(PackageError::Parse {
                    command: get_values.display(),
                    message: e.to_string(),
                })
            }
        };

        Ok(Some(ReleaseInfo {
            release: entry.name,
            namespace: entry.namespace,
            chart: entry.chart,
            status: entry.status,
            values,
        }))
    }

    async fn install_or_upgrade(
        &self,
        coordinates: &PackageCoordinates,
        values: &RenderedDocument,
    ) -> PackageResult<()> {
        let cmd = self.install_command(coordinates, values);
        self.executor.execute_checked(&cmd).await?;
        Ok(())
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> PackageResult<bool> {
        let cmd = self
            .helm()
            .args(["uninstall", release, "--namespace", namespace]);
        match self.executor.execute_checked(&cmd).await {
            Ok(_) => Ok(true),
            Err(ExecError::Failed { stderr, .. }) if stderr.contains("not found") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn workload_ready(&self, namespace: &str, deployment: &str) -> PackageResult<bool> {
        let cmd = self
            .kubectl()
            .args(["get", "deployment", deployment, "--namespace", namespace])
            .args(["--output", "json"]);
        let output = match self.executor.execute_checked(&cmd).await {
            Ok(output) => output,
            Err(ExecError::Failed { stderr, .. }) if stderr.contains("NotFound") => {
                return Ok(false)
            }
            Err(e) => return Err(e.into()),
        };
        let deployment: Deployment =
            serde_json::from_str(output.stdout_trimmed()).map_err(|e| PackageError::Parse {
                command: cmd.display(),
                message: e.to_string(),
            })?;
        Ok(deployment.is_ready())
    }
}
