//! Store-backed resolution of provider selectors, tool-registry overrides,
//! the namespace binding registry, and fleet runtime endpoints.

use crate::{ProviderOverride, ToolOverride};
use globset::Glob;
use omnia_core::{
    AgentRuntime, Provider, ProviderOverrideSelector, ToolRegistry, ToolRegistrySelector,
};
use omnia_error::ErrorCode;
use omnia_store::{Api, LabelSelector, Store, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Errors from selector resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// A provider selector matched nothing.
    #[error("no provider matches selector '{selector}' for group '{group}'")]
    NoProviders {
        /// Group the selector belongs to.
        group: String,
        /// The name glob.
        selector: String,
    },

    /// A provider selector glob failed to compile.
    #[error("invalid provider selector '{selector}': {source}")]
    BadSelector {
        /// The offending glob.
        selector: String,
        /// Underlying glob error.
        #[source]
        source: globset::Error,
    },

    /// The named tool registry does not exist.
    #[error("tool registry '{name}' not found")]
    RegistryNotFound {
        /// The missing registry name.
        name: String,
    },

    /// The fleet target runtime is missing or has no serving endpoint.
    #[error("agent runtime '{name}' {detail}")]
    RuntimeUnavailable {
        /// Runtime name.
        name: String,
        /// What is missing.
        detail: String,
    },

    /// State store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ResolveError {
    /// Stable error code for conditions and events.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoProviders { .. } | Self::BadSelector { .. } => ErrorCode::ProviderNotFound,
            Self::RegistryNotFound { .. } => ErrorCode::ToolRegistryNotFound,
            Self::RuntimeUnavailable { .. } => ErrorCode::RuntimeNotFound,
            Self::Store(err) => err.code(),
        }
    }
}

/// Resolves an ArenaJob's declared selectors against the state store.
pub struct Resolver {
    providers: Api<Provider>,
    registries: Api<ToolRegistry>,
    runtimes: Api<AgentRuntime>,
}

impl Resolver {
    /// Build a resolver over the given store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            providers: Api::new(Arc::clone(&store)),
            registries: Api::new(Arc::clone(&store)),
            runtimes: Api::new(store),
        }
    }

    /// Resolve each override selector into its provider group. Providers are
    /// matched by name glob plus optional labels, and sorted by name within
    /// each group so downstream composition is deterministic.
    pub async fn resolve_provider_groups(
        &self,
        namespace: &str,
        selectors: &[ProviderOverrideSelector],
    ) -> Result<BTreeMap<String, Vec<Provider>>, ResolveError> {
        let mut groups: BTreeMap<String, Vec<Provider>> = BTreeMap::new();
        for selector in selectors {
            let glob = Glob::new(&selector.selector)
                .map_err(|source| ResolveError::BadSelector {
                    selector: selector.selector.clone(),
                    source,
                })?
                .compile_matcher();
            let labels = LabelSelector {
                match_labels: selector.match_labels.clone(),
            };

            let mut matched: Vec<Provider> = self
                .providers
                .list(Some(namespace), &labels)
                .await?
                .into_iter()
                .filter(|p| glob.is_match(&p.metadata.name))
                .collect();
            if matched.is_empty() {
                return Err(ResolveError::NoProviders {
                    group: selector.group.clone(),
                    selector: selector.selector.clone(),
                });
            }
            matched.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
            debug!(
                group = %selector.group,
                selector = %selector.selector,
                matched = matched.len(),
                "resolved provider group"
            );
            groups.entry(selector.group.clone()).or_default().extend(matched);
        }
        Ok(groups)
    }

    /// Flatten the selected tool registries into a tool-override list. A
    /// name selector addresses exactly one registry; a label selector
    /// flattens every matching registry in name order.
    pub async fn resolve_tool_overrides(
        &self,
        namespace: &str,
        selector: &ToolRegistrySelector,
    ) -> Result<Vec<ToolOverride>, ResolveError> {
        let registries = if let Some(name) = &selector.name {
            let registry = self
                .registries
                .get(namespace, name)
                .await?
                .ok_or_else(|| ResolveError::RegistryNotFound { name: name.clone() })?;
            vec![registry]
        } else {
            let labels = LabelSelector {
                match_labels: selector.match_labels.clone(),
            };
            let mut matched = self.registries.list(Some(namespace), &labels).await?;
            matched.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
            matched
        };

        let mut tools = Vec::new();
        for registry in &registries {
            for definition in &registry.spec.tools {
                tools.push(ToolOverride::from_definition(
                    &registry.metadata.name,
                    definition,
                ));
            }
        }
        Ok(tools)
    }

    /// Binding registry: every provider in the namespace keyed
    /// `namespace/name`.
    pub async fn build_binding_registry(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, ProviderOverride>, ResolveError> {
        let providers = self
            .providers
            .list(Some(namespace), &LabelSelector::everything())
            .await?;
        Ok(providers
            .iter()
            .map(|p| {
                (
                    format!("{}/{}", p.metadata.namespace, p.metadata.name),
                    ProviderOverride::from(p),
                )
            })
            .collect())
    }

    /// Serving endpoint of a fleet job's target runtime.
    pub async fn resolve_fleet_endpoint(
        &self,
        namespace: &str,
        runtime_ref: &str,
    ) -> Result<String, ResolveError> {
        let runtime = self
            .runtimes
            .get(namespace, runtime_ref)
            .await?
            .ok_or_else(|| ResolveError::RuntimeUnavailable {
                name: runtime_ref.to_string(),
                detail: "not found".to_string(),
            })?;
        runtime
            .status
            .as_ref()
            .and_then(|s| s.endpoint.clone())
            .ok_or_else(|| ResolveError::RuntimeUnavailable {
                name: runtime_ref.to_string(),
                detail: "has no serving endpoint".to_string(),
            })
    }
}
