//! Filter-configuration document for the gateway's external processor.
//!
//! The document is produced by the control plane and mounted next to the
//! processor; it is decoupled from any orchestration concepts so the data
//! plane can be run and tested standalone. The configuration is immutable
//! for the life of the process and reloaded only on restart.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Default header carrying the decoded model name.
pub const DEFAULT_MODEL_NAME_HEADER_KEY: &str = "x-ai-eg-model";
/// Default header carrying the routing decision.
pub const DEFAULT_SELECTED_ROUTE_HEADER_KEY: &str = "x-ai-eg-selected-route";
/// Header carrying the selected backend name to the upstream filter.
pub const SELECTED_BACKEND_HEADER_KEY: &str = "x-ai-eg-selected-backend";
/// Header marking a stream as handled by the per-cluster (upstream) filter.
pub const UPSTREAM_FILTER_HEADER_KEY: &str = "x-ai-eg-upstream-filter";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode config: {0}")]
    Decode(#[from] serde_yaml::Error),
    #[error("duplicate rule name: {0}")]
    DuplicateRuleName(String),
    #[error("rule {0} has no backends")]
    EmptyBackends(String),
    #[error("rule {0} has a header match with an empty name")]
    EmptyHeaderMatchKey(String),
    #[error("backend {0} declares more than one auth kind")]
    AmbiguousAuth(String),
    #[error("request cost {0} is of type CEL but has no expression")]
    MissingCelExpression(String),
    #[error("request cost {metadata_key} has an invalid CEL expression: {message}")]
    InvalidCelExpression { metadata_key: String, message: String },
}

/// Root configuration schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Opaque identifier correlating a configuration generation.
    #[serde(default)]
    pub uuid: String,
    /// Namespace under which dynamic metadata is written back to the proxy.
    #[serde(default)]
    pub metadata_namespace: String,
    /// The canonical inbound schema.
    pub schema: VersionedApiSchema,
    #[serde(default = "default_model_name_header_key")]
    pub model_name_header_key: String,
    /// Populated with the selected rule name after the routing decision.
    #[serde(default = "default_selected_route_header_key")]
    pub selected_route_header_key: String,
    #[serde(default)]
    pub llm_request_costs: Vec<LlmRequestCost>,
    /// Models advertised by `GET /v1/models`.
    #[serde(default)]
    pub models: Vec<DeclaredModel>,
    #[serde(default)]
    pub rules: Vec<RouteRule>,
}

fn default_model_name_header_key() -> String {
    DEFAULT_MODEL_NAME_HEADER_KEY.to_string()
}

fn default_selected_route_header_key() -> String {
    DEFAULT_SELECTED_ROUTE_HEADER_KEY.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiSchemaName {
    #[serde(rename = "OpenAI")]
    OpenAi,
    #[serde(rename = "AWSBedrock")]
    AwsBedrock,
    #[serde(rename = "AzureOpenAI")]
    AzureOpenAi,
    #[serde(rename = "GCPGemini")]
    GcpGemini,
    #[serde(rename = "GCPAnthropic")]
    GcpAnthropic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedApiSchema {
    pub name: ApiSchemaName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LlmRequestCostType {
    OutputToken,
    InputToken,
    TotalToken,
    #[serde(rename = "CEL")]
    Cel,
}

/// Where a request cost lands in the dynamic metadata and how it is
/// computed from the stream's token tallies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmRequestCost {
    pub metadata_key: String,
    pub r#type: LlmRequestCostType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredModel {
    pub name: String,
    #[serde(default)]
    pub owned_by: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    pub name: String,
    /// Exact-match conditions; a rule matches iff every entry holds.
    #[serde(default)]
    pub headers: Vec<HeaderMatch>,
    pub backends: Vec<Backend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatch {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    pub schema: VersionedApiSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<BackendAuth>,
}

/// Exactly one of the fields must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKeyAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpAuth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyAuth {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsAuth {
    pub credential_file_name: String,
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureAuth {
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpAuth {
    pub credential_file_name: String,
    pub region: String,
    pub project_name: String,
}

impl Config {
    /// Reads and validates a YAML (or JSON, which YAML subsumes) document.
    pub fn load(path: &str) -> Result<Config, ConfigError> {
        let raw = std::fs::read(path)?;
        Config::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Config, ConfigError> {
        let config: Config = serde_yaml::from_slice(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(ConfigError::DuplicateRuleName(rule.name.clone()));
            }
            if rule.backends.is_empty() {
                return Err(ConfigError::EmptyBackends(rule.name.clone()));
            }
            if rule.headers.iter().any(|m| m.name.is_empty()) {
                return Err(ConfigError::EmptyHeaderMatchKey(rule.name.clone()));
            }
            for backend in &rule.backends {
                if let Some(auth) = &backend.auth {
                    let kinds = usize::from(auth.api_key.is_some())
                        + usize::from(auth.aws.is_some())
                        + usize::from(auth.azure.is_some())
                        + usize::from(auth.gcp.is_some());
                    if kinds > 1 {
                        return Err(ConfigError::AmbiguousAuth(backend.name.clone()));
                    }
                }
            }
        }
        for cost in &self.llm_request_costs {
            if cost.r#type == LlmRequestCostType::Cel {
                let expression = cost
                    .cel
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingCelExpression(cost.metadata_key.clone()))?;
                cel_interpreter::Program::compile(expression).map_err(|err| {
                    ConfigError::InvalidCelExpression {
                        metadata_key: cost.metadata_key.clone(),
                        message: err.to_string(),
                    }
                })?;
            }
        }
        Ok(())
    }
}
