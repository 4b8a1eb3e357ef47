//! Provider and ToolRegistry definitions consumed by the resolver.

use crate::{ObjectMeta, impl_object};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An inference provider definition (model endpoint plus credentials).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct Provider {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Provider definition.
    pub spec: ProviderSpec,
}

impl_object!(Provider, "Provider");

/// Provider definition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Provider family (e.g. `openai`, `anthropic`, `bedrock`).
    #[serde(rename = "type")]
    pub provider_type: String,

    /// Model name served by this provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Credential source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialSpec>,

    /// Hyperscaler platform coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,

    /// Workload-identity / role authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<ProviderAuthSpec>,

    /// Model parameter defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<ModelDefaults>,
}

/// Where a provider credential comes from. Exactly one field is set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSpec {
    /// Reference to a secret key holding the credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
    /// Name of an environment variable already present on the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
    /// Path to a mounted credential file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

/// Reference to one key of a secret.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    /// Secret name.
    pub name: String,
    /// Key within the secret's data.
    pub key: String,
}

/// Hyperscaler platform coordinates projected as env vars onto workers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Cloud region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Cloud project / account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Service endpoint override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Workload-identity / role authentication for hyperscaler providers.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAuthSpec {
    /// Use ambient workload identity; when set on any resolved provider the
    /// worker pod runs under the configured service account.
    #[serde(default)]
    pub workload_identity: bool,
    /// Role to assume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Service-account email for identity federation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
}

/// Model parameter defaults copied into the override config.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelDefaults {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling cut-off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum output tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

// ---------------------------------------------------------------------------
// ToolRegistry
// ---------------------------------------------------------------------------

/// A named set of tool handlers workers may call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct ToolRegistry {
    /// Shared record metadata.
    pub metadata: ObjectMeta,
    /// Registry definition.
    pub spec: ToolRegistrySpec,
}

impl_object!(ToolRegistry, "ToolRegistry");

/// Registry definition: a flat list of tool definitions.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct ToolRegistrySpec {
    /// Tool definitions in declaration order.
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// One tool handler entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name as exposed to the agent.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Endpoint the worker dispatches calls to.
    pub endpoint: String,
    /// Handler flavour (e.g. `http`, `grpc`, `builtin`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_type: Option<String>,
    /// Named handler within the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_name: Option<String>,
}
