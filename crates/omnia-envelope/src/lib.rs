//! omnia-envelope
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Envelope encryption for durable artefacts: every persisted value is one
//! JSON envelope `{v, wdek, nonce, ct, kv?}` whose payload is AES-256-GCM
//! under a per-message data key, with the data key wrapped by a KMS-held
//! master key. Four KMS backends share the envelope format; they differ
//! only in key wrap/unwrap and metadata. Bulk re-encryption lives in
//! [`reencrypt`] as a collaborator over any provider.

/// KMS backends.
pub mod backend;
/// Bulk re-encryption over an injected message store.
pub mod reencrypt;

pub use backend::aws::{AwsKms, AwsKmsConfig};
pub use backend::azure::{AzureKeyVault, AzureKeyVaultConfig};
pub use backend::gcp::{GcpKms, GcpKmsConfig};
pub use backend::local::LocalKms;
pub use backend::vault::{VaultTransit, VaultTransitConfig};
pub use reencrypt::{MessagePage, MessageStore, ReencryptReport, Reencryptor, StoredMessage};

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use omnia_error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Envelope format version emitted by this implementation.
pub const ENVELOPE_VERSION: u8 = 1;
/// Payload cipher identifier recorded in key metadata.
pub const PAYLOAD_ALGORITHM: &str = "AES-256-GCM";

const DEK_LEN: usize = 32;
const NONCE_LEN: usize = 12;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from envelope operations.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The envelope JSON is malformed or has an unsupported version.
    #[error("invalid envelope: {detail}")]
    InvalidEnvelope {
        /// What failed to parse.
        detail: String,
    },

    /// Authenticated decryption failed: wrong key or tampered ciphertext.
    #[error("decryption failed (wrong key or tampered ciphertext)")]
    DecryptFailed,

    /// The KMS backend could not be reached or rejected the request.
    #[error("kms backend failure: {detail}")]
    Kms {
        /// Backend detail.
        detail: String,
    },

    /// The master key exists but is disabled.
    #[error("master key '{key_id}' is disabled")]
    KeyDisabled {
        /// The disabled key.
        key_id: String,
    },
}

impl EnvelopeError {
    /// Stable error code for conditions and events.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidEnvelope { .. } => ErrorCode::EnvelopeInvalid,
            Self::DecryptFailed => ErrorCode::DecryptFailed,
            Self::Kms { .. } => ErrorCode::KmsUnavailable,
            Self::KeyDisabled { .. } => ErrorCode::KeyDisabled,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One serialised encrypted value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Format version.
    pub v: u8,
    /// Backend-wrapped data key, base64.
    pub wdek: String,
    /// AES-GCM nonce, base64.
    pub nonce: String,
    /// Ciphertext, base64.
    pub ct: String,
    /// Master-key version the data key was wrapped under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kv: Option<String>,
}

impl Envelope {
    /// Parse an envelope from its JSON form, validating the version.
    pub fn from_json(json: &str) -> Result<Self, EnvelopeError> {
        let envelope: Envelope =
            serde_json::from_str(json).map_err(|e| EnvelopeError::InvalidEnvelope {
                detail: e.to_string(),
            })?;
        if envelope.v != ENVELOPE_VERSION {
            return Err(EnvelopeError::InvalidEnvelope {
                detail: format!("unsupported envelope version {}", envelope.v),
            });
        }
        Ok(envelope)
    }

    /// Serialise to the canonical JSON form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope serialises")
    }
}

// ---------------------------------------------------------------------------
// KMS provider interface
// ---------------------------------------------------------------------------

/// Which KMS backend a provider speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    /// AWS KMS.
    Aws,
    /// GCP Cloud KMS.
    Gcp,
    /// Azure Key Vault.
    Azure,
    /// HashiCorp Vault transit engine.
    VaultTransit,
    /// In-process master key, for tests and development.
    Local,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
            Self::VaultTransit => "vault-transit",
            Self::Local => "local",
        };
        f.write_str(s)
    }
}

/// A wrapped data key plus the master-key version that wrapped it.
#[derive(Debug, Clone)]
pub struct WrappedKey {
    /// Backend-wrapped data key bytes.
    pub wdek: Vec<u8>,
    /// Master-key version tag, when the backend versions keys.
    pub key_version: Option<String>,
}

/// Master-key metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyMetadata {
    /// Key identifier.
    pub key_id: String,
    /// Current key version.
    pub key_version: String,
    /// Payload algorithm.
    pub algorithm: String,
    /// When the current version was created.
    pub created_at: DateTime<Utc>,
    /// When the key expires, if scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Whether the key is enabled.
    pub enabled: bool,
}

/// Outcome of a key rotation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RotationOutcome {
    /// Version before rotation.
    pub previous_version: String,
    /// Version after rotation.
    pub new_version: String,
    /// When the rotation happened.
    pub rotated_at: DateTime<Utc>,
}

/// One KMS backend: wraps and unwraps data keys under a master key.
///
/// Backends only differ here; the envelope format is shared.
#[async_trait]
pub trait KmsKeyProvider: Send + Sync {
    /// Backend discriminator.
    fn provider_type(&self) -> ProviderType;

    /// Wrap a data key under the current master key.
    async fn wrap_dek(&self, dek: &[u8]) -> Result<WrappedKey, EnvelopeError>;

    /// Unwrap a data key. `key_version` is the envelope's `kv` tag, when
    /// present.
    async fn unwrap_dek(
        &self,
        wdek: &[u8],
        key_version: Option<&str>,
    ) -> Result<Vec<u8>, EnvelopeError>;

    /// Master-key metadata.
    async fn key_metadata(&self) -> Result<KeyMetadata, EnvelopeError>;

    /// Rotate the master key.
    async fn rotate_key(&self) -> Result<RotationOutcome, EnvelopeError>;
}

// ---------------------------------------------------------------------------
// EnvelopeCipher
// ---------------------------------------------------------------------------

/// Envelope encrypt/decrypt over any [`KmsKeyProvider`].
#[derive(Clone)]
pub struct EnvelopeCipher {
    provider: Arc<dyn KmsKeyProvider>,
}

impl EnvelopeCipher {
    /// Build a cipher over the given provider.
    pub fn new(provider: Arc<dyn KmsKeyProvider>) -> Self {
        Self { provider }
    }

    /// The underlying provider.
    pub fn provider(&self) -> &Arc<dyn KmsKeyProvider> {
        &self.provider
    }

    /// Encrypt a plaintext into an envelope: a fresh data key encrypts the
    /// payload, and the backend wraps the data key.
    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope, EnvelopeError> {
        let dek = Aes256Gcm::generate_key(OsRng);
        let wrapped = self.provider.wrap_dek(dek.as_slice()).await?;

        let cipher = Aes256Gcm::new(&dek);
        let nonce = Aes256Gcm::generate_nonce(OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EnvelopeError::DecryptFailed)?;

        Ok(Envelope {
            v: ENVELOPE_VERSION,
            wdek: STANDARD.encode(&wrapped.wdek),
            nonce: STANDARD.encode(nonce),
            ct: STANDARD.encode(&ciphertext),
            kv: wrapped.key_version,
        })
    }

    /// Decrypt an envelope back to its plaintext.
    pub async fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>, EnvelopeError> {
        if envelope.v != ENVELOPE_VERSION {
            return Err(EnvelopeError::InvalidEnvelope {
                detail: format!("unsupported envelope version {}", envelope.v),
            });
        }
        let invalid = |field: &str| EnvelopeError::InvalidEnvelope {
            detail: format!("field '{field}' is not valid base64"),
        };
        let wdek = STANDARD.decode(&envelope.wdek).map_err(|_| invalid("wdek"))?;
        let nonce_bytes = STANDARD
            .decode(&envelope.nonce)
            .map_err(|_| invalid("nonce"))?;
        let ciphertext = STANDARD.decode(&envelope.ct).map_err(|_| invalid("ct"))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(EnvelopeError::InvalidEnvelope {
                detail: format!("nonce must be {NONCE_LEN} bytes"),
            });
        }

        let dek = self
            .provider
            .unwrap_dek(&wdek, envelope.kv.as_deref())
            .await?;
        if dek.len() != DEK_LEN {
            return Err(EnvelopeError::DecryptFailed);
        }
        let cipher =
            Aes256Gcm::new_from_slice(&dek).map_err(|_| EnvelopeError::DecryptFailed)?;
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| EnvelopeError::DecryptFailed)
    }

    /// Master-key metadata from the backend.
    pub async fn key_metadata(&self) -> Result<KeyMetadata, EnvelopeError> {
        self.provider.key_metadata().await
    }

    /// Rotate the backend master key. Existing envelopes stay decryptable
    /// via their `kv` tag; new envelopes wrap under the new version.
    pub async fn rotate_key(&self) -> Result<RotationOutcome, EnvelopeError> {
        self.provider.rotate_key().await
    }
}
