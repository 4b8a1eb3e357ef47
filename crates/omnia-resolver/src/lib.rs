//! omnia-resolver
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Resolves an ArenaJob's provider-override selectors, tool-registry
//! overrides, and the namespace binding registry, then composes the
//! override-config artefact workers read instead of querying the state
//! store themselves. Composition is deterministic: the same inputs always
//! serialise to byte-equal JSON.

/// Store-backed selector resolution.
pub mod resolve;

pub use resolve::{ResolveError, Resolver};

use omnia_core::env::credential_env_name;
use omnia_core::{PlatformSpec, Provider, ToolDefinition};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Auth-method tag published for workload-identity providers.
pub const AUTH_METHOD_WORKLOAD_IDENTITY: &str = "workload-identity";

// ---------------------------------------------------------------------------
// Override entries
// ---------------------------------------------------------------------------

/// One provider entry in the override config.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderOverride {
    /// Provider record name.
    pub id: String,
    /// Provider family.
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Name of the env var carrying the credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,
    /// Path of the mounted credential file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_file: Option<String>,
    /// Hyperscaler platform coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<PlatformSpec>,
    /// Auth-method tag (e.g. `workload-identity`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<String>,
    /// Role to assume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    /// Service-account email for identity federation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_email: Option<String>,
    /// Sampling temperature default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Max output tokens default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl From<&Provider> for ProviderOverride {
    fn from(provider: &Provider) -> Self {
        let spec = &provider.spec;
        let (credential_env, credential_file) = match &spec.credential {
            Some(credential) => {
                if let Some(path) = &credential.file_path {
                    (None, Some(path.clone()))
                } else if let Some(env_var) = &credential.env_var {
                    (Some(env_var.clone()), None)
                } else if credential.secret_ref.is_some() {
                    (Some(credential_env_name(&spec.provider_type)), None)
                } else {
                    (None, None)
                }
            }
            None => (None, None),
        };
        let auth = spec.auth.as_ref();
        Self {
            id: provider.metadata.name.clone(),
            provider_type: spec.provider_type.clone(),
            model: spec.model.clone(),
            base_url: spec.base_url.clone(),
            credential_env,
            credential_file,
            platform: spec.platform.clone(),
            auth_method: auth
                .filter(|a| a.workload_identity)
                .map(|_| AUTH_METHOD_WORKLOAD_IDENTITY.to_string()),
            role_arn: auth.and_then(|a| a.role_arn.clone()),
            service_account_email: auth.and_then(|a| a.service_account_email.clone()),
            temperature: spec.defaults.as_ref().and_then(|d| d.temperature),
            top_p: spec.defaults.as_ref().and_then(|d| d.top_p),
            max_tokens: spec.defaults.as_ref().and_then(|d| d.max_tokens),
        }
    }
}

/// One tool entry in the override config.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolOverride {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Endpoint the worker dispatches calls to.
    pub endpoint: String,
    /// Handler flavour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_type: Option<String>,
    /// Registry the tool came from.
    pub registry_name: String,
    /// Named handler within the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler_name: Option<String>,
}

impl ToolOverride {
    /// Build from a registry's tool definition.
    pub fn from_definition(registry_name: &str, definition: &ToolDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            endpoint: definition.endpoint.clone(),
            handler_type: definition.handler_type.clone(),
            registry_name: registry_name.to_string(),
            handler_name: definition.handler_name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Override config
// ---------------------------------------------------------------------------

/// The per-job override config mounted into worker pods.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
pub struct OverrideConfig {
    /// Group name → ordered provider overrides.
    #[serde(default)]
    pub providers: BTreeMap<String, Vec<ProviderOverride>>,
    /// Ordered tool overrides.
    #[serde(default)]
    pub tools: Vec<ToolOverride>,
    /// `namespace/name` → provider override, for annotation-driven
    /// credential binding.
    #[serde(default)]
    pub bindings: BTreeMap<String, ProviderOverride>,
}

impl OverrideConfig {
    /// Returns `true` when all three parts are empty.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty() && self.tools.is_empty() && self.bindings.is_empty()
    }

    /// Deterministic JSON serialisation: maps are ordered, list order is
    /// the input order, and the same inputs always yield byte-equal output.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// All provider overrides across groups, group-sorted.
    pub fn all_providers(&self) -> impl Iterator<Item = &ProviderOverride> {
        self.providers.values().flatten()
    }
}

/// Compose the override config from resolved inputs, returning `None` when
/// there is nothing to mount. Inputs are not mutated.
pub fn build_override_config(
    providers_by_group: BTreeMap<String, Vec<ProviderOverride>>,
    tools: Vec<ToolOverride>,
    bindings: BTreeMap<String, ProviderOverride>,
) -> Option<OverrideConfig> {
    let config = OverrideConfig {
        providers: providers_by_group,
        tools,
        bindings,
    };
    if config.is_empty() { None } else { Some(config) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_core::{
        CredentialSpec, ModelDefaults, ObjectMeta, ProviderAuthSpec, ProviderSpec, SecretKeyRef,
    };

    fn provider(name: &str, provider_type: &str) -> Provider {
        Provider {
            metadata: ObjectMeta::named("prod", name),
            spec: ProviderSpec {
                provider_type: provider_type.to_string(),
                model: Some("test-model".into()),
                ..ProviderSpec::default()
            },
        }
    }

    #[test]
    fn secret_credential_projects_to_typed_env_name() {
        let mut p = provider("openai-a", "openai");
        p.spec.credential = Some(CredentialSpec {
            secret_ref: Some(SecretKeyRef {
                name: "openai-keys".into(),
                key: "api-key".into(),
            }),
            env_var: None,
            file_path: None,
        });
        let entry = ProviderOverride::from(&p);
        assert_eq!(entry.credential_env.as_deref(), Some("OPENAI_API_KEY"));
        assert!(entry.credential_file.is_none());
    }

    #[test]
    fn file_credential_wins_over_env() {
        let mut p = provider("vertex-a", "vertex");
        p.spec.credential = Some(CredentialSpec {
            secret_ref: None,
            env_var: Some("IGNORED".into()),
            file_path: Some("/var/creds/vertex.json".into()),
        });
        let entry = ProviderOverride::from(&p);
        assert_eq!(
            entry.credential_file.as_deref(),
            Some("/var/creds/vertex.json")
        );
        assert!(entry.credential_env.is_none());
    }

    #[test]
    fn workload_identity_projects_auth_fields() {
        let mut p = provider("bedrock-a", "bedrock");
        p.spec.auth = Some(ProviderAuthSpec {
            workload_identity: true,
            role_arn: Some("arn:aws:iam::1:role/arena".into()),
            service_account_email: None,
        });
        p.spec.defaults = Some(ModelDefaults {
            temperature: Some(0.1),
            top_p: None,
            max_tokens: Some(1024),
        });
        let entry = ProviderOverride::from(&p);
        assert_eq!(entry.auth_method.as_deref(), Some("workload-identity"));
        assert_eq!(entry.role_arn.as_deref(), Some("arn:aws:iam::1:role/arena"));
        assert_eq!(entry.temperature, Some(0.1));
        assert_eq!(entry.max_tokens, Some(1024));
    }

    #[test]
    fn empty_config_is_skipped() {
        assert!(build_override_config(BTreeMap::new(), Vec::new(), BTreeMap::new()).is_none());
    }

    #[test]
    fn composition_is_byte_deterministic() {
        let make = || {
            let mut groups = BTreeMap::new();
            groups.insert(
                "default".to_string(),
                vec![
                    ProviderOverride::from(&provider("openai-a", "openai")),
                    ProviderOverride::from(&provider("openai-b", "openai")),
                ],
            );
            groups.insert(
                "judge".to_string(),
                vec![ProviderOverride::from(&provider("anthropic-a", "anthropic"))],
            );
            let tools = vec![ToolOverride {
                name: "web-search".into(),
                endpoint: "http://tools:8080/search".into(),
                registry_name: "default-tools".into(),
                ..ToolOverride::default()
            }];
            let mut bindings = BTreeMap::new();
            bindings.insert(
                "prod/openai-a".to_string(),
                ProviderOverride::from(&provider("openai-a", "openai")),
            );
            build_override_config(groups, tools, bindings).unwrap()
        };
        let a = make().to_json().unwrap();
        let b = make().to_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serialised_shape_matches_contract() {
        let mut groups = BTreeMap::new();
        groups.insert(
            "default".to_string(),
            vec![ProviderOverride::from(&provider("openai-a", "openai"))],
        );
        let config = build_override_config(groups, Vec::new(), BTreeMap::new()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&config.to_json().unwrap()).unwrap();
        assert_eq!(value["providers"]["default"][0]["id"], "openai-a");
        assert_eq!(value["providers"]["default"][0]["type"], "openai");
        assert!(value.get("tools").is_some());
        assert!(value.get("bindings").is_some());
    }
}
