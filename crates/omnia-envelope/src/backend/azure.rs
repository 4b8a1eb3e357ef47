//! Azure Key Vault backend.
//!
//! Bearer-token REST against the Key Vault `wrapkey`/`unwrapkey`
//! operations. Key versions come from the key identifier tail and become
//! the envelope's `kv` tag.

use crate::{
    EnvelopeError, KeyMetadata, KmsKeyProvider, PAYLOAD_ALGORITHM, ProviderType, RotationOutcome,
    WrappedKey,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

const API_VERSION: &str = "7.4";
const WRAP_ALGORITHM: &str = "RSA-OAEP-256";

/// Azure Key Vault connection settings.
#[derive(Debug, Clone)]
pub struct AzureKeyVaultConfig {
    /// Vault base URL, e.g. `https://omnia.vault.azure.net`.
    pub vault_url: String,
    /// Key name inside the vault.
    pub key_name: String,
    /// OAuth bearer token for the vault resource.
    pub access_token: String,
}

/// Azure Key Vault key provider.
pub struct AzureKeyVault {
    config: AzureKeyVaultConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct KeyOperationResponse {
    /// Base64url payload.
    value: String,
    /// Key identifier, `{vault}/keys/{name}/{version}`.
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Deserialize)]
struct KeyBundle {
    key: KeyInfo,
    #[serde(default)]
    attributes: KeyAttributes,
}

#[derive(Deserialize)]
struct KeyInfo {
    kid: String,
}

#[derive(Deserialize, Default)]
struct KeyAttributes {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
}

impl AzureKeyVault {
    /// Build a provider over the given settings.
    pub fn new(config: AzureKeyVaultConfig) -> Result<Self, EnvelopeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EnvelopeError::Kms {
                detail: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, EnvelopeError> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.config.access_token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(|e| EnvelopeError::Kms {
            detail: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(EnvelopeError::Kms {
                detail: format!("{url} returned {}", response.status()),
            });
        }
        response.json().await.map_err(|e| EnvelopeError::Kms {
            detail: e.to_string(),
        })
    }

    /// `{vault}/keys/{name}/{version}` → `{version}`.
    fn version_of(kid: &str) -> Option<String> {
        kid.rsplit('/').next().map(str::to_string)
    }
}

#[async_trait]
impl KmsKeyProvider for AzureKeyVault {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Azure
    }

    async fn wrap_dek(&self, dek: &[u8]) -> Result<WrappedKey, EnvelopeError> {
        let url = format!(
            "{}/keys/{}/wrapkey?api-version={API_VERSION}",
            self.config.vault_url, self.config.key_name
        );
        let response: KeyOperationResponse = self
            .call(
                reqwest::Method::POST,
                &url,
                Some(json!({
                    "alg": WRAP_ALGORITHM,
                    "value": URL_SAFE_NO_PAD.encode(dek)
                })),
            )
            .await?;
        let wdek = URL_SAFE_NO_PAD
            .decode(&response.value)
            .map_err(|_| EnvelopeError::Kms {
                detail: "wrapkey returned non-base64url value".to_string(),
            })?;
        Ok(WrappedKey {
            wdek,
            key_version: response.kid.as_deref().and_then(Self::version_of),
        })
    }

    async fn unwrap_dek(
        &self,
        wdek: &[u8],
        key_version: Option<&str>,
    ) -> Result<Vec<u8>, EnvelopeError> {
        let url = match key_version {
            Some(version) => format!(
                "{}/keys/{}/{version}/unwrapkey?api-version={API_VERSION}",
                self.config.vault_url, self.config.key_name
            ),
            None => format!(
                "{}/keys/{}/unwrapkey?api-version={API_VERSION}",
                self.config.vault_url, self.config.key_name
            ),
        };
        let response: KeyOperationResponse = self
            .call(
                reqwest::Method::POST,
                &url,
                Some(json!({
                    "alg": WRAP_ALGORITHM,
                    "value": URL_SAFE_NO_PAD.encode(wdek)
                })),
            )
            .await?;
        URL_SAFE_NO_PAD
            .decode(&response.value)
            .map_err(|_| EnvelopeError::Kms {
                detail: "unwrapkey returned non-base64url value".to_string(),
            })
    }

    async fn key_metadata(&self) -> Result<KeyMetadata, EnvelopeError> {
        let url = format!(
            "{}/keys/{}?api-version={API_VERSION}",
            self.config.vault_url, self.config.key_name
        );
        let bundle: KeyBundle = self.call(reqwest::Method::GET, &url, None).await?;
        if !bundle.attributes.enabled {
            return Err(EnvelopeError::KeyDisabled {
                key_id: self.config.key_name.clone(),
            });
        }
        Ok(KeyMetadata {
            key_id: self.config.key_name.clone(),
            key_version: Self::version_of(&bundle.key.kid).unwrap_or_default(),
            algorithm: PAYLOAD_ALGORITHM.to_string(),
            created_at: bundle
                .attributes
                .created
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or_else(Utc::now),
            expires_at: bundle
                .attributes
                .exp
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            enabled: true,
        })
    }

    async fn rotate_key(&self) -> Result<RotationOutcome, EnvelopeError> {
        let previous = self.key_metadata().await?.key_version;
        let url = format!(
            "{}/keys/{}/rotate?api-version={API_VERSION}",
            self.config.vault_url, self.config.key_name
        );
        let bundle: KeyBundle = self.call(reqwest::Method::POST, &url, None).await?;
        Ok(RotationOutcome {
            previous_version: previous,
            new_version: Self::version_of(&bundle.key.kid).unwrap_or_default(),
            rotated_at: Utc::now(),
        })
    }
}
