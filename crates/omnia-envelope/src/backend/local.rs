//! In-process KMS: a versioned master key derived from a passphrase.
//!
//! Backs tests and single-node development. Rotation appends a new master
//! key version; envelopes carry the wrapping version in `kv`, so old
//! envelopes stay decryptable after rotation.

use crate::{
    EnvelopeError, KeyMetadata, KmsKeyProvider, PAYLOAD_ALGORITHM, ProviderType, RotationOutcome,
    WrappedKey,
};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::RwLock;

const NONCE_LEN: usize = 12;

/// In-process master-key provider.
pub struct LocalKms {
    key_id: String,
    versions: RwLock<Vec<[u8; 32]>>,
    created_at: DateTime<Utc>,
    enabled: RwLock<bool>,
}

impl LocalKms {
    /// Derive the initial master key from a passphrase.
    pub fn new(passphrase: &str) -> Self {
        Self {
            key_id: "local".to_string(),
            versions: RwLock::new(vec![Self::derive(passphrase, 1)]),
            created_at: Utc::now(),
            enabled: RwLock::new(true),
        }
    }

    /// Disable the key; subsequent wraps fail with `KeyDisabled`.
    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.write().unwrap() = enabled;
    }

    fn derive(passphrase: &str, version: usize) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(passphrase.as_bytes());
        hasher.update(version.to_be_bytes());
        hasher.finalize().into()
    }

    fn current_version(&self) -> usize {
        self.versions.read().unwrap().len()
    }

    fn key_for(&self, version: usize) -> Result<[u8; 32], EnvelopeError> {
        self.versions
            .read()
            .unwrap()
            .get(version.checked_sub(1).unwrap_or(usize::MAX))
            .copied()
            .ok_or_else(|| EnvelopeError::Kms {
                detail: format!("unknown key version v{version}"),
            })
    }

    fn parse_version(tag: Option<&str>) -> Result<Option<usize>, EnvelopeError> {
        match tag {
            None => Ok(None),
            Some(tag) => tag
                .strip_prefix('v')
                .and_then(|n| n.parse().ok())
                .map(Some)
                .ok_or_else(|| EnvelopeError::InvalidEnvelope {
                    detail: format!("malformed key version tag '{tag}'"),
                }),
        }
    }
}

#[async_trait]
impl KmsKeyProvider for LocalKms {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Local
    }

    async fn wrap_dek(&self, dek: &[u8]) -> Result<WrappedKey, EnvelopeError> {
        if !*self.enabled.read().unwrap() {
            return Err(EnvelopeError::KeyDisabled {
                key_id: self.key_id.clone(),
            });
        }
        let version = self.current_version();
        let master = self.key_for(version)?;
        let cipher = Aes256Gcm::new_from_slice(&master)
            .map_err(|_| EnvelopeError::DecryptFailed)?;
        let nonce = Aes256Gcm::generate_nonce(OsRng);
        let wrapped = cipher
            .encrypt(&nonce, dek)
            .map_err(|_| EnvelopeError::DecryptFailed)?;

        let mut wdek = Vec::with_capacity(NONCE_LEN + wrapped.len());
        wdek.extend_from_slice(nonce.as_slice());
        wdek.extend_from_slice(&wrapped);
        Ok(WrappedKey {
            wdek,
            key_version: Some(format!("v{version}")),
        })
    }

    async fn unwrap_dek(
        &self,
        wdek: &[u8],
        key_version: Option<&str>,
    ) -> Result<Vec<u8>, EnvelopeError> {
        if wdek.len() <= NONCE_LEN {
            return Err(EnvelopeError::InvalidEnvelope {
                detail: "wrapped key too short".to_string(),
            });
        }
        let version = Self::parse_version(key_version)?.unwrap_or_else(|| self.current_version());
        let master = self.key_for(version)?;
        let cipher = Aes256Gcm::new_from_slice(&master)
            .map_err(|_| EnvelopeError::DecryptFailed)?;
        let (nonce, wrapped) = wdek.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), wrapped)
            .map_err(|_| EnvelopeError::DecryptFailed)
    }

    async fn key_metadata(&self) -> Result<KeyMetadata, EnvelopeError> {
        Ok(KeyMetadata {
            key_id: self.key_id.clone(),
            key_version: format!("v{}", self.current_version()),
            algorithm: PAYLOAD_ALGORITHM.to_string(),
            created_at: self.created_at,
            expires_at: None,
            enabled: *self.enabled.read().unwrap(),
        })
    }

    async fn rotate_key(&self) -> Result<RotationOutcome, EnvelopeError> {
        let mut versions = self.versions.write().unwrap();
        let previous = versions.len();
        let next = previous + 1;
        versions.push(Self::derive(&self.key_id, next));
        Ok(RotationOutcome {
            previous_version: format!("v{previous}"),
            new_version: format!("v{next}"),
            rotated_at: Utc::now(),
        })
    }
}
