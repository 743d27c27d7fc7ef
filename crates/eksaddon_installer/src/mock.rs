//! Mock collaborators for testing.
//!
//! [`MockExecutor`] records command lines and answers from a script.
//! [`MockPackageManager`] keeps releases in memory and can be told to fail
//! installs or stay unready.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eksaddon_templates::RenderedDocument;
use parking_lot::RwLock;

use crate::descriptor::PackageCoordinates;
use crate::error::{ExecError, ExecResult, PackageError, PackageResult};
use crate::exec::{CommandExecutor, CommandLine, CommandOutput};
use crate::package::{PackageManager, ReleaseInfo, STATUS_DEPLOYED};

/// Scripted answer for commands matching a program and argument words.
#[derive(Debug, Clone)]
struct ScriptedResponse {
    program: String,
    words: Vec<String>,
    output: CommandOutput,
}

/// Recording command executor.
///
/// Unscripted commands succeed with empty output.
#[derive(Clone, Default)]
pub struct MockExecutor {
    script: Arc<RwLock<Vec<ScriptedResponse>>>,
    commands: Arc<RwLock<Vec<CommandLine>>>,
    spawn_failure: Arc<RwLock<Option<String>>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands of `program` whose arguments contain `words`
    /// consecutively. Earlier entries win.
    pub fn respond(self, program: &str, words: &[&str], output: CommandOutput) -> Self {
        self.script.write().push(ScriptedResponse {
            program: program.to_string(),
            words: words.iter().map(|w| w.to_string()).collect(),
            output,
        });
        self
    }

    /// Make every command fail to spawn, as if the program were missing.
    pub fn simulate_spawn_failure(self, program: impl Into<String>) -> Self {
        *self.spawn_failure.write() = Some(program.into());
        self
    }

    pub fn get_commands(&self) -> Vec<CommandLine> {
        self.commands.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.commands.read().len()
    }

    /// Whether any command of `program` contained `words`.
    pub fn was_called(&self, program: &str, words: &[&str]) -> bool {
        self.commands
            .read()
            .iter()
            .any(|c| c.program == program && c.has_args(words))
    }

    pub fn clear_calls(&self) {
        self.commands.write().clear();
    }
}

#[async_trait]
impl CommandExecutor for MockExecutor {
    async fn execute(&self, command: &CommandLine) -> ExecResult<CommandOutput> {
        self.commands.write().push(command.clone());

        if let Some(program) = self.spawn_failure.read().as_ref() {
            if *program == command.program {
                return Err(ExecError::Spawn {
                    program: program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
                });
            }
        }

        let script = self.script.read();
        let output = script
            .iter()
            .find(|r| {
                let words: Vec<&str> = r.words.iter().map(String::as_str).collect();
                r.program == command.program && command.has_args(&words)
            })
            .map(|r| r.output.clone())
            .unwrap_or_else(|| CommandOutput::success(""));
        Ok(output)
    }
}

/// Captured package manager call.
#[derive(Debug, Clone)]
pub struct PackageCall {
    pub method: String,
    pub release: String,
    pub namespace: String,
    pub version: Option<String>,
    pub values: Option<String>,
}

/// In-memory package manager.
#[derive(Clone, Default)]
pub struct MockPackageManager {
    releases: Arc<RwLock<HashMap<(String, String), ReleaseInfo>>>,
    calls: Arc<RwLock<Vec<PackageCall>>>,
    install_failure: Arc<RwLock<Option<String>>>,
    /// Checks answered "not ready" before the workload reports ready.
    unready_checks: Arc<AtomicUsize>,
    never_ready: Arc<RwLock<bool>>,
    checks: Arc<AtomicUsize>,
}

impl MockPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an already deployed release.
    pub fn with_release(self, info: ReleaseInfo) -> Self {
        self.releases
            .write()
            .insert((info.release.clone(), info.namespace.clone()), info);
        self
    }

    /// Make every install/upgrade fail.
    pub fn simulate_install_failure(self, message: impl Into<String>) -> Self {
        *self.install_failure.write() = Some(message.into());
        self
    }

    /// Report "not ready" for the first `checks` readiness checks.
    pub fn ready_after(self, checks: usize) -> Self {
        self.unready_checks.store(checks, Ordering::SeqCst);
        self
    }

    pub fn never_ready(self) -> Self {
        *self.never_ready.write() = true;
        self
    }

    pub fn get_calls(&self) -> Vec<PackageCall> {
        self.calls.read().clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.calls.read().iter().any(|c| c.method == method)
    }

    pub fn get_method_calls(&self, method: &str) -> Vec<PackageCall> {
        self.calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn installed(&self, release: &str, namespace: &str) -> Option<ReleaseInfo> {
        self.releases
            .read()
            .get(&(release.to_string(), namespace.to_string()))
            .cloned()
    }

    fn record(&self, method: &str, release: &str, namespace: &str) -> PackageCall {
        let call = PackageCall {
            method: method.to_string(),
            release: release.to_string(),
            namespace: namespace.to_string(),
            version: None,
            values: None,
        };
        self.calls.write().push(call.clone());
        call
    }
}

#[async_trait]
impl PackageManager for MockPackageManager {
    async fn release(&self, release: &str, namespace: &str) -> PackageResult<Option<ReleaseInfo>> {
        self.record("release", release, namespace);
        Ok(self.installed(release, namespace))
    }

    async fn install_or_upgrade(
        &self,
        coordinates: &PackageCoordinates,
        values: &RenderedDocument,
    ) -> PackageResult<()> {
        self.calls.write().push(PackageCall {
            method: "install_or_upgrade".to_string(),
            release: coordinates.release.clone(),
            namespace: coordinates.namespace.clone(),
            version: Some(coordinates.version.clone()),
            values: Some(values.as_str().to_string()),
        });

        if let Some(message) = self.install_failure.read().clone() {
            return Err(PackageError::Api(message));
        }

        let parsed = values.to_value().map_err(|e| PackageError::Parse {
            command: "install_or_upgrade".to_string(),
            message: e.to_string(),
        })?;
        self.releases.write().insert(
            (coordinates.release.clone(), coordinates.namespace.clone()),
            ReleaseInfo {
                release: coordinates.release.clone(),
                namespace: coordinates.namespace.clone(),
                chart: coordinates.chart_label(),
                status: STATUS_DEPLOYED.to_string(),
                values: parsed,
            },
        );
        Ok(())
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> PackageResult<bool> {
        self.record("uninstall", release, namespace);
        Ok(self
            .releases
            .write()
            .remove(&(release.to_string(), namespace.to_string()))
            .is_some())
    }

    async fn workload_ready(&self, namespace: &str, deployment: &str) -> PackageResult<bool> {
        self.record("workload_ready", deployment, namespace);
        let seen = self.checks.fetch_add(1, Ordering::SeqCst);
        if *self.never_ready.read() {
            return Ok(false);
        }
        Ok(seen >= self.unready_checks.load(Ordering::SeqCst))
    }
}
