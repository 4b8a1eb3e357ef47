//! HashiCorp Vault transit backend.
//!
//! Wrapped keys are the transit ciphertext strings (`vault:vN:...`); the
//! version prefix doubles as the envelope's `kv` tag.

use crate::{
    EnvelopeError, KeyMetadata, KmsKeyProvider, PAYLOAD_ALGORITHM, ProviderType, RotationOutcome,
    WrappedKey,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Vault transit connection settings.
#[derive(Debug, Clone)]
pub struct VaultTransitConfig {
    /// Vault address, e.g. `https://vault.internal:8200`.
    pub address: String,
    /// Vault token.
    pub token: String,
    /// Transit mount path.
    pub mount: String,
    /// Transit key name.
    pub key_name: String,
}

impl VaultTransitConfig {
    /// Settings with the conventional `transit` mount.
    pub fn new(address: impl Into<String>, token: impl Into<String>, key_name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            mount: "transit".to_string(),
            key_name: key_name.into(),
        }
    }
}

/// Vault transit key provider.
pub struct VaultTransit {
    config: VaultTransitConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TransitResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct CiphertextData {
    ciphertext: String,
}

#[derive(Deserialize)]
struct PlaintextData {
    plaintext: String,
}

#[derive(Deserialize)]
struct KeyData {
    #[serde(default)]
    latest_version: u64,
    #[serde(default)]
    keys: std::collections::BTreeMap<String, serde_json::Value>,
}

impl VaultTransit {
    /// Build a provider over the given settings.
    pub fn new(config: VaultTransitConfig) -> Result<Self, EnvelopeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EnvelopeError::Kms {
                detail: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    fn url(&self, operation: &str) -> String {
        format!(
            "{}/v1/{}/{operation}",
            self.config.address, self.config.mount
        )
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<T, EnvelopeError> {
        let response = self
            .client
            .post(url)
            .header("X-Vault-Token", &self.config.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| EnvelopeError::Kms {
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

    async fn get_key(&self) -> Result<KeyData, EnvelopeError> {
        let url = format!(
            "{}/v1/{}/keys/{}",
            self.config.address, self.config.mount, self.config.key_name
        );
        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| EnvelopeError::Kms {
                detail: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(EnvelopeError::Kms {
                detail: format!("{url} returned {}", response.status()),
            });
        }
        let body: TransitResponse<KeyData> =
            response.json().await.map_err(|e| EnvelopeError::Kms {
                detail: e.to_string(),
            })?;
        Ok(body.data)
    }

    fn version_of(ciphertext: &str) -> Option<String> {
        // "vault:v3:...." → "v3"
        ciphertext.split(':').nth(1).map(str::to_string)
    }
}

#[async_trait]
impl KmsKeyProvider for VaultTransit {
    fn provider_type(&self) -> ProviderType {
        ProviderType::VaultTransit
    }

    async fn wrap_dek(&self, dek: &[u8]) -> Result<WrappedKey, EnvelopeError> {
        let url = format!("{}/{}", self.url("encrypt"), self.config.key_name);
        let body: TransitResponse<CiphertextData> = self
            .post(&url, json!({ "plaintext": STANDARD.encode(dek) }))
            .await?;
        debug!(key = %self.config.key_name, "wrapped data key via transit");
        Ok(WrappedKey {
            key_version: Self::version_of(&body.data.ciphertext),
            wdek: body.data.ciphertext.into_bytes(),
        })
    }

    async fn unwrap_dek(
        &self,
        wdek: &[u8],
        _key_version: Option<&str>,
    ) -> Result<Vec<u8>, EnvelopeError> {
        let ciphertext =
            String::from_utf8(wdek.to_vec()).map_err(|_| EnvelopeError::InvalidEnvelope {
                detail: "transit wrapped key is not utf-8".to_string(),
            })?;
        let url = format!("{}/{}", self.url("decrypt"), self.config.key_name);
        let body: TransitResponse<PlaintextData> =
            self.post(&url, json!({ "ciphertext": ciphertext })).await?;
        STANDARD
            .decode(&body.data.plaintext)
            .map_err(|_| EnvelopeError::Kms {
                detail: "transit returned non-base64 plaintext".to_string(),
            })
    }

    async fn key_metadata(&self) -> Result<KeyMetadata, EnvelopeError> {
        let key = self.get_key().await?;
        let created_at = key
            .keys
            .get(&key.latest_version.to_string())
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(Utc::now);
        Ok(KeyMetadata {
            key_id: self.config.key_name.clone(),
            key_version: format!("v{}", key.latest_version),
            algorithm: PAYLOAD_ALGORITHM.to_string(),
            created_at,
            expires_at: None,
            enabled: key.latest_version > 0,
        })
    }

    async fn rotate_key(&self) -> Result<RotationOutcome, EnvelopeError> {
        let before = self.get_key().await?.latest_version;
        let url = format!(
            "{}/v1/{}/keys/{}/rotate",
            self.config.address, self.config.mount, self.config.key_name
        );
        let response = self
            .client
            .post(&url)
            .header("X-Vault-Token", &self.config.token)
            .send()
            .await
            .map_err(|e| EnvelopeError::Kms {
                detail: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(EnvelopeError::Kms {
                detail: format!("{url} returned {}", response.status()),
            });
        }
        let after = self.get_key().await?.latest_version;
        Ok(RotationOutcome {
            previous_version: format!("v{before}"),
            new_version: format!("v{after}"),
            rotated_at: Utc::now(),
        })
    }
}
