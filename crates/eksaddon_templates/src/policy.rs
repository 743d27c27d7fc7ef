//! Structured IAM policy documents.
//!
//! Policies are built as data and serialized with serde, so values such as
//! cluster names end up as JSON strings and can never alter the document
//! structure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TemplateResult;
use crate::renderer::{DocumentFormat, RenderedDocument};

/// IAM policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// A single string or a list of strings, as IAM accepts for most fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn values(&self) -> Vec<&str> {
        match self {
            OneOrMany::One(v) => vec![v.as_str()],
            OneOrMany::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for OneOrMany {
    fn from(value: &str) -> Self {
        OneOrMany::One(value.to_string())
    }
}

impl From<String> for OneOrMany {
    fn from(value: String) -> Self {
        OneOrMany::One(value)
    }
}

impl From<Vec<String>> for OneOrMany {
    fn from(values: Vec<String>) -> Self {
        OneOrMany::Many(values)
    }
}

impl From<Vec<&str>> for OneOrMany {
    fn from(values: Vec<&str>) -> Self {
        OneOrMany::Many(values.into_iter().map(String::from).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// Condition operator -> condition key -> value(s).
pub type ConditionBlock = BTreeMap<String, BTreeMap<String, OneOrMany>>;

/// Principal map, e.g. `{"Service": "ec2.amazonaws.com"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(BTreeMap<String, OneOrMany>);

impl Principal {
    pub fn service(service: impl Into<String>) -> Self {
        Self(BTreeMap::from([("Service".to_string(), OneOrMany::One(service.into()))]))
    }

    /// Several service principals, e.g. EventBridge and SQS on a queue policy.
    pub fn services<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(BTreeMap::from([(
            "Service".to_string(),
            OneOrMany::Many(services.into_iter().map(Into::into).collect()),
        )]))
    }

    pub fn federated(arn: impl Into<String>) -> Self {
        Self(BTreeMap::from([("Federated".to_string(), OneOrMany::One(arn.into()))]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
    pub action: OneOrMany,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub condition: ConditionBlock,
}

impl Statement {
    pub fn allow(sid: impl Into<String>, action: impl Into<OneOrMany>) -> Self {
        Self {
            sid: Some(sid.into()),
            effect: Effect::Allow,
            principal: None,
            resource: None,
            action: action.into(),
            condition: BTreeMap::new(),
        }
    }

    /// An unnamed allow statement, as used in trust policies.
    pub fn allow_unnamed(action: impl Into<OneOrMany>) -> Self {
        Self {
            sid: None,
            ..Self::allow("", action)
        }
    }

    pub fn resource(mut self, resource: impl Into<OneOrMany>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Add a condition. Repeated keys under the same operator are replaced.
    pub fn condition(
        mut self,
        operator: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<OneOrMany>,
    ) -> Self {
        self.condition
            .entry(operator.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<Statement>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyDocument {
    pub fn new() -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statements: Vec::new(),
        }
    }

    pub fn statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Trust policy letting an AWS service assume the role.
    pub fn assume_role_for_service(service: impl Into<String>) -> Self {
        Self::new().statement(
            Statement::allow_unnamed("sts:AssumeRole").principal(Principal::service(service)),
        )
    }

    /// Trust policy letting a Kubernetes service account assume the role
    /// through the cluster's OIDC provider.
    pub fn assume_role_for_service_account(
        partition: &str,
        account: &str,
        oidc_provider: &str,
        namespace: &str,
        service_account: &str,
    ) -> Self {
        let provider_arn = format!(
            "arn:{}:iam::{}:oidc-provider/{}",
            partition, account, oidc_provider
        );
        Self::new().statement(
            Statement::allow_unnamed("sts:AssumeRoleWithWebIdentity")
                .principal(Principal::federated(provider_arn))
                .condition(
                    "StringEquals",
                    format!("{}:aud", oidc_provider),
                    "sts.amazonaws.com",
                )
                .condition(
                    "StringEquals",
                    format!("{}:sub", oidc_provider),
                    format!("system:serviceaccount:{}:{}", namespace, service_account),
                ),
        )
    }

    pub fn find(&self, sid: &str) -> Option<&Statement> {
        self.statements
            .iter()
            .find(|s| s.sid.as_deref() == Some(sid))
    }

    pub fn to_json(&self) -> TemplateResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Serialize into a rendered document handed to the cloud collaborator.
    pub fn render(&self, name: impl Into<String>) -> TemplateResult<RenderedDocument> {
        Ok(RenderedDocument::new(name, DocumentFormat::Json, self.to_json()?))
    }
}
