//! GCP Cloud KMS backend.
//!
//! Bearer-token REST against the Cloud KMS v1 surface. Encrypt responses
//! name the crypto-key version that wrapped the key; that version number
//! becomes the envelope's `kv` tag.

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

/// GCP Cloud KMS connection settings.
#[derive(Debug, Clone)]
pub struct GcpKmsConfig {
    /// Fully-qualified crypto-key resource name:
    /// `projects/{p}/locations/{l}/keyRings/{r}/cryptoKeys/{k}`.
    pub key_name: String,
    /// OAuth bearer token.
    pub access_token: String,
    /// Endpoint override (defaults to `https://cloudkms.googleapis.com`).
    pub endpoint: Option<String>,
}

/// GCP Cloud KMS key provider.
pub struct GcpKms {
    config: GcpKmsConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Deserialize)]
struct CryptoKey {
    #[serde(default)]
    primary: Option<CryptoKeyVersion>,
}

#[derive(Deserialize)]
struct CryptoKeyVersion {
    name: String,
    #[serde(default)]
    state: String,
    #[serde(rename = "createTime", default)]
    create_time: Option<DateTime<Utc>>,
}

impl GcpKms {
    /// Build a provider over the given settings.
    pub fn new(config: GcpKmsConfig) -> Result<Self, EnvelopeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EnvelopeError::Kms {
                detail: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    fn base(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://cloudkms.googleapis.com".to_string())
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

    /// "…/cryptoKeyVersions/3" → "3".
    fn version_number(name: &str) -> Option<String> {
        name.rsplit('/').next().map(str::to_string)
    }
}

#[async_trait]
impl KmsKeyProvider for GcpKms {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Gcp
    }

    async fn wrap_dek(&self, dek: &[u8]) -> Result<WrappedKey, EnvelopeError> {
        let url = format!("{}/v1/{}:encrypt", self.base(), self.config.key_name);
        let response: EncryptResponse = self
            .call(
                reqwest::Method::POST,
                &url,
                Some(json!({ "plaintext": STANDARD.encode(dek) })),
            )
            .await?;
        let wdek = STANDARD
            .decode(&response.ciphertext)
            .map_err(|_| EnvelopeError::Kms {
                detail: "encrypt returned non-base64 ciphertext".to_string(),
            })?;
        Ok(WrappedKey {
            wdek,
            key_version: response.name.as_deref().and_then(Self::version_number),
        })
    }

    async fn unwrap_dek(
        &self,
        wdek: &[u8],
        _key_version: Option<&str>,
    ) -> Result<Vec<u8>, EnvelopeError> {
        // Cloud KMS ciphertexts embed their wrapping version; decrypt does
        // not take one.
        let url = format!("{}/v1/{}:decrypt", self.base(), self.config.key_name);
        let response: DecryptResponse = self
            .call(
                reqwest::Method::POST,
                &url,
                Some(json!({ "ciphertext": STANDARD.encode(wdek) })),
            )
            .await?;
        STANDARD
            .decode(&response.plaintext)
            .map_err(|_| EnvelopeError::Kms {
                detail: "decrypt returned non-base64 plaintext".to_string(),
            })
    }

    async fn key_metadata(&self) -> Result<KeyMetadata, EnvelopeError> {
        let url = format!("{}/v1/{}", self.base(), self.config.key_name);
        let key: CryptoKey = self.call(reqwest::Method::GET, &url, None).await?;
        let primary = key.primary.ok_or_else(|| EnvelopeError::Kms {
            detail: "crypto key has no primary version".to_string(),
        })?;
        if primary.state != "ENABLED" {
            return Err(EnvelopeError::KeyDisabled {
                key_id: self.config.key_name.clone(),
            });
        }
        Ok(KeyMetadata {
            key_id: self.config.key_name.clone(),
            key_version: Self::version_number(&primary.name).unwrap_or_default(),
            algorithm: PAYLOAD_ALGORITHM.to_string(),
            created_at: primary.create_time.unwrap_or_else(Utc::now),
            expires_at: None,
            enabled: true,
        })
    }

    async fn rotate_key(&self) -> Result<RotationOutcome, EnvelopeError> {
        let previous = self.key_metadata().await?.key_version;

        // Rotation is two steps: mint a version, then promote it.
        let create_url = format!(
            "{}/v1/{}/cryptoKeyVersions",
            self.base(),
            self.config.key_name
        );
        let created: CryptoKeyVersion = self
            .call(reqwest::Method::POST, &create_url, Some(json!({})))
            .await?;
        let new_version = Self::version_number(&created.name).unwrap_or_default();

        let promote_url = format!(
            "{}/v1/{}:updatePrimaryVersion",
            self.base(),
            self.config.key_name
        );
        let _: serde_json::Value = self
            .call(
                reqwest::Method::POST,
                &promote_url,
                Some(json!({ "cryptoKeyVersionId": new_version })),
            )
            .await?;

        Ok(RotationOutcome {
            previous_version: previous,
            new_version,
            rotated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "projects/p/locations/global/keyRings/r/cryptoKeys/omnia";

    fn provider(server: &MockServer) -> GcpKms {
        GcpKms::new(GcpKmsConfig {
            key_name: KEY.into(),
            access_token: "token".into(),
            endpoint: Some(server.uri()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn wrap_extracts_version_from_response_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1/{KEY}:encrypt")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": format!("{KEY}/cryptoKeyVersions/3"),
                "ciphertext": STANDARD.encode(b"wrapped")
            })))
            .mount(&server)
            .await;

        let wrapped = provider(&server).wrap_dek(&[2u8; 32]).await.unwrap();
        assert_eq!(wrapped.wdek, b"wrapped");
        assert_eq!(wrapped.key_version.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn metadata_rejects_disabled_primary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/v1/{KEY}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "primary": {
                    "name": format!("{KEY}/cryptoKeyVersions/2"),
                    "state": "DISABLED"
                }
            })))
            .mount(&server)
            .await;

        let err = provider(&server).key_metadata().await.unwrap_err();
        assert!(matches!(err, EnvelopeError::KeyDisabled { .. }));
    }
}
