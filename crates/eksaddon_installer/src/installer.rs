//! Idempotent install-or-upgrade with an optional readiness wait.
//!
//! ```text
//! NotInstalled -> Installing -> Installed           (no wait)
//! NotInstalled -> Installing -> Installed -> Ready  (wait)
//! Installing -> Failed
//! ```

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use eksaddon_templates::RenderedDocument;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::descriptor::{InstallerDescriptor, PackageCoordinates};
use crate::error::{InstallerError, InstallerResult};
use crate::package::PackageManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallState {
    NotInstalled,
    Installing,
    Installed,
    Ready,
    Failed,
}

impl InstallState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: InstallState) -> bool {
        use InstallState::*;
        matches!(
            (self, next),
            (NotInstalled, Installing)
                | (NotInstalled, Installed)
                | (Installing, Installed)
                | (Installing, Failed)
                | (Installed, Ready)
        )
    }
}

impl std::fmt::Display for InstallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstallState::NotInstalled => "not-installed",
            InstallState::Installing => "installing",
            InstallState::Installed => "installed",
            InstallState::Ready => "ready",
            InstallState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// What apply did to the release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallAction {
    Install,
    Upgrade,
    /// The deployed release already has these values and chart version.
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub release: String,
    pub namespace: String,
    pub chart: String,
    pub action: InstallAction,
    pub state: InstallState,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoveOutcome {
    Removed,
    AlreadyAbsent,
}

/// Applies one descriptor through a package manager. Holds no state
/// between calls.
#[derive(Clone)]
pub struct Installer {
    descriptor: InstallerDescriptor,
    packages: Arc<dyn PackageManager>,
}

impl Installer {
    pub fn new(descriptor: InstallerDescriptor, packages: Arc<dyn PackageManager>) -> Self {
        Self {
            descriptor,
            packages,
        }
    }

    pub fn descriptor(&self) -> &InstallerDescriptor {
        &self.descriptor
    }

    /// Install or upgrade the release with the rendered values.
    ///
    /// Re-applying identical values to a deployed release of the same chart
    /// version makes no package manager call. With `wait_for_ready`, blocks
    /// until the workload is available, the descriptor's timeout elapses or
    /// `cancel` fires.
    pub async fn apply(
        &self,
        values: &RenderedDocument,
        coordinates: &PackageCoordinates,
        cancel: &CancellationToken,
    ) -> InstallerResult<InstallReport> {
        let release = coordinates.release.as_str();
        let mut state = InstallState::NotInstalled;

        let desired = values
            .to_value()
            .map_err(|e| InstallerError::InvalidValues {
                release: release.to_string(),
                message: e.to_string(),
            })?;
        if !desired.is_mapping() {
            return Err(InstallerError::InvalidValues {
                release: release.to_string(),
                message: "expected a mapping at the top level".to_string(),
            });
        }

        let existing = self
            .packages
            .release(release, &coordinates.namespace)
            .await
            .map_err(|source| InstallerError::Status {
                release: release.to_string(),
                source,
            })?;

        let action = match &existing {
            None => InstallAction::Install,
            Some(info)
                if info.is_deployed()
                    && info.chart == coordinates.chart_label()
                    && info.values == desired =>
            {
                InstallAction::Unchanged
            }
            Some(_) => InstallAction::Upgrade,
        };
        debug!("Release {} action: {:?}", release, action);

        if action != InstallAction::Unchanged {
            transition(release, &mut state, InstallState::Installing);
            info!(
                "{} release {} ({}) in namespace {}",
                if action == InstallAction::Install { "Installing" } else { "Upgrading" },
                release,
                coordinates.chart_label(),
                coordinates.namespace
            );
            if let Err(source) = self.packages.install_or_upgrade(coordinates, values).await {
                transition(release, &mut state, InstallState::Failed);
                error!("Install of {} failed: {}", release, source);
                return Err(InstallerError::Install {
                    release: release.to_string(),
                    source,
                });
            }
        } else {
            info!("Release {} is up to date", release);
        }
        transition(release, &mut state, InstallState::Installed);

        if self.descriptor.wait_for_ready {
            self.wait_ready(coordinates, cancel).await?;
            transition(release, &mut state, InstallState::Ready);
        }

        Ok(InstallReport {
            release: release.to_string(),
            namespace: coordinates.namespace.clone(),
            chart: coordinates.chart_label(),
            action,
            state,
            completed_at: Utc::now(),
        })
    }

    /// Uninstall the release. An absent release is not an error.
    pub async fn remove(&self, namespace: &str) -> InstallerResult<RemoveOutcome> {
        let release = self.descriptor.release_name.as_str();
        let removed = self
            .packages
            .uninstall(release, namespace)
            .await
            .map_err(|source| InstallerError::Remove {
                release: release.to_string(),
                source,
            })?;

        if removed {
            info!("Uninstalled release {} from {}", release, namespace);
            Ok(RemoveOutcome::Removed)
        } else {
            debug!("Release {} not installed in {}", release, namespace);
            Ok(RemoveOutcome::AlreadyAbsent)
        }
    }

    async fn wait_ready(
        &self,
        coordinates: &PackageCoordinates,
        cancel: &CancellationToken,
    ) -> InstallerResult<()> {
        let deployment = self.descriptor.ready_deployment();
        let started = Instant::now();
        let deadline = tokio::time::sleep(self.descriptor.timeout);
        tokio::pin!(deadline);

        info!(
            "Waiting up to {:?} for deployment {}/{}",
            self.descriptor.timeout, coordinates.namespace, deployment
        );

        loop {
            let check = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.timed_out(started, true)),
                _ = &mut deadline => return Err(self.timed_out(started, false)),
                check = self.packages.workload_ready(&coordinates.namespace, deployment) => check,
            };

            match check {
                Ok(true) => {
                    info!(
                        "Deployment {}/{} ready after {}s",
                        coordinates.namespace,
                        deployment,
                        started.elapsed().as_secs()
                    );
                    return Ok(());
                }
                Ok(false) => debug!("Deployment {} not ready yet", deployment),
                Err(e) => warn!("Readiness check for {} failed: {}", deployment, e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.timed_out(started, true)),
                _ = &mut deadline => return Err(self.timed_out(started, false)),
                _ = tokio::time::sleep(self.descriptor.poll_interval) => {}
            }
        }
    }

    fn timed_out(&self, started: Instant, cancelled: bool) -> InstallerError {
        warn!(
            "Release {} not ready after {:?}",
            self.descriptor.release_name,
            started.elapsed()
        );
        InstallerError::ReadinessTimeout {
            release: self.descriptor.release_name.clone(),
            waited: started.elapsed(),
            cancelled,
        }
    }
}

fn transition(release: &str, state: &mut InstallState, next: InstallState) {
    debug_assert!(
        state.can_transition_to(next),
        "illegal transition {} -> {}",
        state,
        next
    );
    debug!("Release {}: {} -> {}", release, state, next);
    *state = next;
}
