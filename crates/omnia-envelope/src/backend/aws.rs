//! AWS KMS backend.
//!
//! Speaks the KMS JSON API directly with SigV4 request signing; wrapped
//! keys are the opaque `CiphertextBlob` bytes (which embed the key
//! version, so `kv` stays unset).

use crate::{
    EnvelopeError, KeyMetadata, KmsKeyProvider, PAYLOAD_ALGORITHM, ProviderType, RotationOutcome,
    WrappedKey,
};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "kms";

/// AWS KMS connection settings.
#[derive(Debug, Clone)]
pub struct AwsKmsConfig {
    /// AWS region.
    pub region: String,
    /// KMS key id or ARN.
    pub key_id: String,
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token for temporary credentials.
    pub session_token: Option<String>,
    /// Endpoint override (defaults to the regional KMS endpoint).
    pub endpoint: Option<String>,
}

/// AWS KMS key provider.
pub struct AwsKms {
    config: AwsKmsConfig,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EncryptResponse {
    #[serde(rename = "CiphertextBlob")]
    ciphertext_blob: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    #[serde(rename = "Plaintext")]
    plaintext: String,
}

#[derive(Deserialize)]
struct DescribeKeyResponse {
    #[serde(rename = "KeyMetadata")]
    key_metadata: AwsKeyMetadata,
}

#[derive(Deserialize)]
struct AwsKeyMetadata {
    #[serde(rename = "KeyId")]
    key_id: String,
    #[serde(rename = "Enabled", default)]
    enabled: bool,
    #[serde(rename = "CreationDate", default)]
    creation_date: Option<f64>,
}

impl AwsKms {
    /// Build a provider over the given settings.
    pub fn new(config: AwsKmsConfig) -> Result<Self, EnvelopeError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EnvelopeError::Kms {
                detail: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        self.config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://kms.{}.amazonaws.com", self.config.region))
    }

    fn host(&self) -> String {
        self.endpoint()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .to_string()
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// SigV4 signing key: chained HMACs over date, region, service.
    fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
        let k_date = Self::hmac(format!("AWS4{secret}").as_bytes(), date.as_bytes());
        let k_region = Self::hmac(&k_date, region.as_bytes());
        let k_service = Self::hmac(&k_region, service.as_bytes());
        Self::hmac(&k_service, b"aws4_request")
    }

    fn sha256_hex(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Sign and send one KMS operation.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        target: &str,
        body: serde_json::Value,
    ) -> Result<T, EnvelopeError> {
        let payload = body.to_string();
        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let host = self.host();
        let content_type = "application/x-amz-json-1.1";
        let payload_hash = Self::sha256_hex(payload.as_bytes());

        // Canonical request over the headers we send, sorted by name.
        let mut header_pairs = vec![
            ("content-type".to_string(), content_type.to_string()),
            ("host".to_string(), host.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
            ("x-amz-target".to_string(), target.to_string()),
        ];
        if let Some(token) = &self.config.session_token {
            header_pairs.push(("x-amz-security-token".to_string(), token.clone()));
        }
        header_pairs.sort();
        let canonical_headers: String = header_pairs
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect();
        let signed_headers: String = header_pairs
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request =
            format!("POST\n/\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");
        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            Self::sha256_hex(canonical_request.as_bytes())
        );
        let signing_key = Self::signing_key(
            &self.config.secret_access_key,
            &date,
            &self.config.region,
            SERVICE,
        );
        let signature = hex::encode(Self::hmac(&signing_key, string_to_sign.as_bytes()));
        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            self.config.access_key_id
        );

        let mut request = self
            .client
            .post(self.endpoint())
            .header("Content-Type", content_type)
            .header("X-Amz-Date", &amz_date)
            .header("X-Amz-Target", target)
            .header("Authorization", authorization)
            .body(payload);
        if let Some(token) = &self.config.session_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request.send().await.map_err(|e| EnvelopeError::Kms {
            detail: e.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(EnvelopeError::Kms {
                detail: format!("{target} returned {}", response.status()),
            });
        }
        response.json().await.map_err(|e| EnvelopeError::Kms {
            detail: e.to_string(),
        })
    }
}

#[async_trait]
impl KmsKeyProvider for AwsKms {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Aws
    }

    async fn wrap_dek(&self, dek: &[u8]) -> Result<WrappedKey, EnvelopeError> {
        let response: EncryptResponse = self
            .call(
                "TrentService.Encrypt",
                json!({ "KeyId": self.config.key_id, "Plaintext": STANDARD.encode(dek) }),
            )
            .await?;
        let wdek = STANDARD
            .decode(&response.ciphertext_blob)
            .map_err(|_| EnvelopeError::Kms {
                detail: "Encrypt returned non-base64 CiphertextBlob".to_string(),
            })?;
        // The ciphertext blob embeds the key version.
        Ok(WrappedKey {
            wdek,
            key_version: None,
        })
    }

    async fn unwrap_dek(
        &self,
        wdek: &[u8],
        _key_version: Option<&str>,
    ) -> Result<Vec<u8>, EnvelopeError> {
        let response: DecryptResponse = self
            .call(
                "TrentService.Decrypt",
                json!({ "CiphertextBlob": STANDARD.encode(wdek) }),
            )
            .await?;
        STANDARD
            .decode(&response.plaintext)
            .map_err(|_| EnvelopeError::Kms {
                detail: "Decrypt returned non-base64 Plaintext".to_string(),
            })
    }

    async fn key_metadata(&self) -> Result<KeyMetadata, EnvelopeError> {
        let response: DescribeKeyResponse = self
            .call(
                "TrentService.DescribeKey",
                json!({ "KeyId": self.config.key_id }),
            )
            .await?;
        let meta = response.key_metadata;
        if !meta.enabled {
            return Err(EnvelopeError::KeyDisabled {
                key_id: meta.key_id,
            });
        }
        let created_at = meta
            .creation_date
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .unwrap_or_else(Utc::now);
        Ok(KeyMetadata {
            key_id: meta.key_id,
            key_version: "aws-managed".to_string(),
            algorithm: PAYLOAD_ALGORITHM.to_string(),
            created_at,
            expires_at: None,
            enabled: true,
        })
    }

    async fn rotate_key(&self) -> Result<RotationOutcome, EnvelopeError> {
        let _: serde_json::Value = self
            .call(
                "TrentService.RotateKeyOnDemand",
                json!({ "KeyId": self.config.key_id }),
            )
            .await?;
        // KMS tracks rotations internally; blob-embedded versions keep old
        // envelopes decryptable without a kv tag.
        Ok(RotationOutcome {
            previous_version: "aws-managed".to_string(),
            new_version: "aws-managed".to_string(),
            rotated_at: Utc::now(),
        })
    }
}
