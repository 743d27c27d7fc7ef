//! User-settable application options.
//!
//! Each application carries its defaults. An options file and command line
//! overrides are layered on top, later layers winning.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Resolved options for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationOptions {
    pub cluster_name: String,
    pub region: String,
    pub namespace: String,
    pub service_account: String,
    /// Workload version, e.g. the controller image tag.
    pub version: String,
    /// Chart version. Defaults to `version`.
    pub chart_version: Option<String>,
    pub replicas: u32,
    pub enable_spot_to_spot: bool,
    pub wait: bool,
    pub timeout_secs: Option<u64>,
    /// Free-form values exposed to templates as `settings.<key>`.
    pub settings: BTreeMap<String, String>,
}

impl ApplicationOptions {
    pub fn new(
        namespace: impl Into<String>,
        service_account: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            cluster_name: String::new(),
            region: String::new(),
            namespace: namespace.into(),
            service_account: service_account.into(),
            version: version.into(),
            chart_version: None,
            replicas: 1,
            enable_spot_to_spot: false,
            wait: true,
            timeout_secs: None,
            settings: BTreeMap::new(),
        }
    }

    /// Target cluster and region.
    pub fn for_cluster(mut self, cluster_name: impl Into<String>, region: impl Into<String>) -> Self {
        self.cluster_name = cluster_name.into();
        self.region = region.into();
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn chart_version(&self) -> &str {
        self.chart_version.as_deref().unwrap_or(&self.version)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Layer overrides on top of these options.
    pub fn apply(&mut self, overrides: &OptionOverrides) {
        if let Some(v) = &overrides.cluster_name {
            self.cluster_name = v.clone();
        }
        if let Some(v) = &overrides.region {
            self.region = v.clone();
        }
        if let Some(v) = &overrides.namespace {
            self.namespace = v.clone();
        }
        if let Some(v) = &overrides.service_account {
            self.service_account = v.clone();
        }
        if let Some(v) = &overrides.version {
            self.version = v.clone();
        }
        if let Some(v) = &overrides.chart_version {
            self.chart_version = Some(v.clone());
        }
        if let Some(v) = overrides.replicas {
            self.replicas = v;
        }
        if let Some(v) = overrides.enable_spot_to_spot {
            self.enable_spot_to_spot = v;
        }
        if let Some(v) = overrides.wait {
            self.wait = v;
        }
        if let Some(v) = overrides.timeout_secs {
            self.timeout_secs = Some(v);
        }
        self.settings
            .extend(overrides.settings.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Check the options an invocation cannot run without.
    pub fn validate(&self) -> CoreResult<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(CoreError::invalid_option("cluster_name", "a cluster name is required"));
        }
        if self.region.trim().is_empty() {
            return Err(CoreError::invalid_option("region", "a region is required"));
        }
        if self.replicas == 0 {
            return Err(CoreError::invalid_option("replicas", "must be at least 1"));
        }
        if self.timeout_secs == Some(0) {
            return Err(CoreError::invalid_option("timeout_secs", "must be at least 1"));
        }
        Ok(())
    }
}

/// A partial set of options from an options file or the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionOverrides {
    pub cluster_name: Option<String>,
    pub region: Option<String>,
    pub namespace: Option<String>,
    pub service_account: Option<String>,
    pub version: Option<String>,
    pub chart_version: Option<String>,
    pub replicas: Option<u32>,
    pub enable_spot_to_spot: Option<bool>,
    pub wait: Option<bool>,
    pub timeout_secs: Option<u64>,
    pub settings: BTreeMap<String, String>,
}

impl OptionOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML options file.
    pub fn from_yaml(content: &str) -> CoreResult<Self> {
        serde_yaml::from_str(content).map_err(|e| CoreError::invalid_option("options", e.to_string()))
    }

    /// Load a YAML options file from disk.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CoreError::OptionsFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_yaml::from_str(&content).map_err(|e| CoreError::OptionsFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Set one option by name. Unknown names become settings.
    pub fn set(&mut self, key: &str, value: &str) -> CoreResult<()> {
        match key {
            "cluster_name" => self.cluster_name = Some(value.to_string()),
            "region" => self.region = Some(value.to_string()),
            "namespace" => self.namespace = Some(value.to_string()),
            "service_account" => self.service_account = Some(value.to_string()),
            "version" => self.version = Some(value.to_string()),
            "chart_version" => self.chart_version = Some(value.to_string()),
            "replicas" => self.replicas = Some(parse(key, value)?),
            "enable_spot_to_spot" => self.enable_spot_to_spot = Some(parse(key, value)?),
            "wait" => self.wait = Some(parse(key, value)?),
            "timeout_secs" => self.timeout_secs = Some(parse(key, value)?),
            _ => {
                if key.is_empty() {
                    return Err(CoreError::invalid_option(key, "empty option name"));
                }
                self.settings.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Parse and set a `key=value` assignment.
    pub fn set_assignment(&mut self, assignment: &str) -> CoreResult<()> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| {
            CoreError::invalid_option(assignment, "expected key=value")
        })?;
        self.set(key.trim(), value.trim())
    }

    /// Combine two layers, `other` winning.
    pub fn merge(mut self, other: OptionOverrides) -> Self {
        self.cluster_name = other.cluster_name.or(self.cluster_name);
        self.region = other.region.or(self.region);
        self.namespace = other.namespace.or(self.namespace);
        self.service_account = other.service_account.or(self.service_account);
        self.version = other.version.or(self.version);
        self.chart_version = other.chart_version.or(self.chart_version);
        self.replicas = other.replicas.or(self.replicas);
        self.enable_spot_to_spot = other.enable_spot_to_spot.or(self.enable_spot_to_spot);
        self.wait = other.wait.or(self.wait);
        self.timeout_secs = other.timeout_secs.or(self.timeout_secs);
        self.settings.extend(other.settings);
        self
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> CoreResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| CoreError::invalid_option(key, format!("{:?}: {}", value, e)))
}
