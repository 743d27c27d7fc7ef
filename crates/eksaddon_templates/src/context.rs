//! Immutable substitution context shared by every render of one invocation.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{TemplateError, TemplateResult};
use crate::renderer::ensure_safe_scalar;

/// Partitions the account id / ARN builders know how to address.
pub const KNOWN_PARTITIONS: &[&str] = &["aws", "aws-cn", "aws-us-gov", "aws-iso", "aws-iso-b"];

/// Service account annotation binding a pod identity to an IAM role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrsaAnnotation {
    pub key: String,
    pub value: String,
}

impl IrsaAnnotation {
    /// Annotation key read by the EKS pod identity webhook.
    pub const ROLE_ARN_KEY: &'static str = "eks.amazonaws.com/role-arn";

    pub fn for_role(partition: &str, account: &str, role_name: &str) -> Self {
        Self {
            key: Self::ROLE_ARN_KEY.to_string(),
            value: format!("arn:{}:iam::{}:role/{}", partition, account, role_name),
        }
    }
}

/// Every variable a template may reference.
///
/// Built once per install/uninstall and never mutated afterwards. Cloning is
/// cheap enough that callers hand out owned copies rather than share locks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderContext {
    pub partition: String,
    pub region: String,
    pub account: String,
    pub cluster_name: String,
    pub namespace: String,
    pub service_account: String,
    pub irsa_annotation: IrsaAnnotation,
    pub version: String,
    pub replicas: u32,
    pub enable_spot_to_spot: bool,
    /// Cluster OIDC issuer URL, required by federated identity trust policies.
    pub oidc_issuer: Option<String>,
    /// Extension fields for individual resources and applications.
    pub settings: BTreeMap<String, String>,
}

impl RenderContext {
    /// Create a context for a cluster. Workload fields start at neutral defaults.
    pub fn new(
        partition: impl Into<String>,
        region: impl Into<String>,
        account: impl Into<String>,
        cluster_name: impl Into<String>,
    ) -> Self {
        let mut ctx = Self {
            partition: partition.into(),
            region: region.into(),
            account: account.into(),
            cluster_name: cluster_name.into(),
            namespace: "default".to_string(),
            service_account: "default".to_string(),
            irsa_annotation: IrsaAnnotation {
                key: IrsaAnnotation::ROLE_ARN_KEY.to_string(),
                value: String::new(),
            },
            version: "latest".to_string(),
            replicas: 1,
            enable_spot_to_spot: false,
            oidc_issuer: None,
            settings: BTreeMap::new(),
        };
        ctx.refresh_irsa_annotation();
        ctx
    }

    /// Set the namespace and service account the workload runs as.
    pub fn with_service_account(
        mut self,
        namespace: impl Into<String>,
        service_account: impl Into<String>,
    ) -> Self {
        self.namespace = namespace.into();
        self.service_account = service_account.into();
        self.refresh_irsa_annotation();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_spot_to_spot(mut self, enabled: bool) -> Self {
        self.enable_spot_to_spot = enabled;
        self
    }

    pub fn with_oidc_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.oidc_issuer = Some(issuer.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_settings(mut self, settings: BTreeMap<String, String>) -> Self {
        self.settings.extend(settings);
        self
    }

    /// Name of the IAM role bound to the workload's service account.
    pub fn irsa_role_name(&self) -> String {
        format!(
            "eksaddon.{}.{}.{}",
            self.cluster_name, self.namespace, self.service_account
        )
    }

    /// OIDC issuer without its scheme, as IAM expects it in provider ARNs
    /// and condition keys.
    pub fn oidc_provider(&self) -> TemplateResult<String> {
        let issuer = self.oidc_issuer.as_deref().ok_or_else(|| {
            TemplateError::InvalidContext {
                field: "oidc_issuer".to_string(),
                message: "cluster has no OIDC issuer; federated identity is unavailable".to_string(),
            }
        })?;
        Ok(issuer.trim_start_matches("https://").to_string())
    }

    /// Look up an extension field.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    fn refresh_irsa_annotation(&mut self) {
        let role = self.irsa_role_name();
        self.irsa_annotation = IrsaAnnotation::for_role(&self.partition, &self.account, &role);
    }

    /// Check identity fields and reject any value that could break the
    /// structure of a YAML or JSON document it is substituted into.
    pub fn validate(&self) -> TemplateResult<()> {
        if !KNOWN_PARTITIONS.contains(&self.partition.as_str()) {
            return Err(invalid("partition", &self.partition, "unknown partition"));
        }
        if !account_pattern().is_match(&self.account) {
            return Err(invalid("account", &self.account, "expected a 12 digit account id"));
        }
        if !region_pattern().is_match(&self.region) {
            return Err(invalid("region", &self.region, "not a region name"));
        }
        if !cluster_pattern().is_match(&self.cluster_name) {
            return Err(invalid(
                "cluster_name",
                &self.cluster_name,
                "must start with a letter or digit and contain only letters, digits, '-' and '_' (max 100)",
            ));
        }

        for (field, value) in [
            ("namespace", self.namespace.as_str()),
            ("service_account", self.service_account.as_str()),
            ("version", self.version.as_str()),
            ("irsa_annotation.key", self.irsa_annotation.key.as_str()),
            ("irsa_annotation.value", self.irsa_annotation.value.as_str()),
        ] {
            if value.is_empty() {
                return Err(invalid(field, value, "must not be blank"));
            }
            ensure_safe_scalar(field, value)?;
        }
        if let Some(issuer) = &self.oidc_issuer {
            ensure_safe_scalar("oidc_issuer", issuer)?;
        }
        for (key, value) in &self.settings {
            ensure_safe_scalar(&format!("settings.{}", key), value)?;
        }
        Ok(())
    }

    /// Convert into a Tera context.
    pub fn to_tera(&self) -> TemplateResult<tera::Context> {
        let mut ctx = tera::Context::from_serialize(self).map_err(|e| {
            TemplateError::RenderingFailed {
                template: "<context>".to_string(),
                message: e.to_string(),
            }
        })?;
        ctx.insert("irsa_role_name", &self.irsa_role_name());
        Ok(ctx)
    }
}

fn invalid(field: &str, value: &str, message: &str) -> TemplateError {
    TemplateError::InvalidContext {
        field: field.to_string(),
        message: format!("{:?}: {}", value, message),
    }
}

fn account_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{12}$").unwrap())
}

fn region_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d+$").unwrap())
}

fn cluster_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,99}$").unwrap())
}
