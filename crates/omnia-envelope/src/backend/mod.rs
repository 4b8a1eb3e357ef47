//! KMS backends. All wrap a 32-byte data key under a backend-held master
//! key; the envelope format on top is identical across them.

/// AWS KMS (SigV4-signed REST).
pub mod aws;
/// Azure Key Vault.
pub mod azure;
/// GCP Cloud KMS.
pub mod gcp;
/// In-process master key for tests and development.
pub mod local;
/// HashiCorp Vault transit engine.
pub mod vault;
