//! omnia-license
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Maps a signed license token (or the `dev` bypass) to a set of allowed
//! features. Each check returns either success or a structured violation
//! carrying the offending feature and an upgrade hint.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use omnia_core::ArenaJobType;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Worker replica count included with every edition; scaling beyond it is a
/// licensed feature.
pub const OPEN_CORE_WORKER_CAP: i32 = 4;

const UPGRADE_HINT: &str =
    "this feature requires an enterprise license; see https://altairalabs.ai/pricing";

// ---------------------------------------------------------------------------
// Features & editions
// ---------------------------------------------------------------------------

/// Individually licensable features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    /// Load-test job type.
    LoadTests,
    /// Cron-scheduled jobs.
    ScheduledJobs,
    /// Fleet execution mode.
    FleetMode,
    /// More than [`OPEN_CORE_WORKER_CAP`] workers per job.
    WorkerScale,
    /// Git-backed sources.
    GitSources,
    /// OCI-backed sources.
    OciSources,
}

impl Feature {
    /// Stable wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoadTests => "load-tests",
            Self::ScheduledJobs => "scheduled-jobs",
            Self::FleetMode => "fleet-mode",
            Self::WorkerScale => "worker-scale",
            Self::GitSources => "git-sources",
            Self::OciSources => "oci-sources",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// License edition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Edition {
    /// Development bypass: every feature allowed.
    Dev,
    /// Free tier: evaluations with configmap and git sources.
    OpenCore,
    /// Paid tier: features as enumerated in the token.
    Enterprise,
}

impl Edition {
    /// Features included with the edition before token grants are applied.
    fn base_features(&self) -> BTreeSet<Feature> {
        match self {
            Self::Dev => BTreeSet::from([
                Feature::LoadTests,
                Feature::ScheduledJobs,
                Feature::FleetMode,
                Feature::WorkerScale,
                Feature::GitSources,
                Feature::OciSources,
            ]),
            Self::OpenCore => BTreeSet::from([Feature::GitSources]),
            Self::Enterprise => BTreeSet::from([Feature::GitSources, Feature::OciSources]),
        }
    }
}

// ---------------------------------------------------------------------------
// Violations
// ---------------------------------------------------------------------------

/// Structured license denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("license does not include feature '{feature}': {message}")]
pub struct LicenseViolation {
    /// The offending feature.
    pub feature: Feature,
    /// Human-readable detail.
    pub message: String,
    /// Where to go to unlock the feature.
    pub upgrade_hint: String,
}

impl LicenseViolation {
    fn for_feature(feature: Feature, message: impl Into<String>) -> Self {
        Self {
            feature,
            message: message.into(),
            upgrade_hint: UPGRADE_HINT.to_string(),
        }
    }
}

/// Token parse/verification failure.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token is not `claims.signature` shaped.
    #[error("malformed license token")]
    Malformed,
    /// The signature does not verify against the signing secret.
    #[error("license token signature mismatch")]
    BadSignature,
    /// The claims payload could not be decoded.
    #[error("invalid license claims: {0}")]
    InvalidClaims(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Token claims
// ---------------------------------------------------------------------------

/// Signed claims payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LicenseClaims {
    edition: Edition,
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    subject: Option<String>,
}

// ---------------------------------------------------------------------------
// License
// ---------------------------------------------------------------------------

/// A validated license: an edition plus its granted feature set.
#[derive(Debug, Clone)]
pub struct License {
    edition: Edition,
    features: BTreeSet<Feature>,
    subject: Option<String>,
}

impl License {
    /// The development bypass license.
    pub fn dev() -> Self {
        Self {
            edition: Edition::Dev,
            features: Edition::Dev.base_features(),
            subject: None,
        }
    }

    /// The unlicensed open-core baseline.
    pub fn open_core() -> Self {
        Self {
            edition: Edition::OpenCore,
            features: Edition::OpenCore.base_features(),
            subject: None,
        }
    }

    /// Parse and verify a token against the signing secret.
    ///
    /// The literal token `"dev"` selects the development bypass.
    pub fn from_token(token: &str, signing_secret: &[u8]) -> Result<Self, TokenError> {
        if token == "dev" {
            debug!("dev license bypass active");
            return Ok(Self::dev());
        }

        let (claims_b64, signature_b64) =
            token.split_once('.').ok_or(TokenError::Malformed)?;
        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = HmacSha256::new_from_slice(signing_secret)
            .map_err(|_| TokenError::BadSignature)?;
        mac.update(&claims_bytes);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims: LicenseClaims =
            serde_json::from_slice(&claims_bytes).map_err(TokenError::InvalidClaims)?;

        let mut features = claims.edition.base_features();
        features.extend(claims.features.iter().copied());
        Ok(Self {
            edition: claims.edition,
            features,
            subject: claims.subject,
        })
    }

    /// Sign a claims payload into a token. Used by provisioning tooling and
    /// tests.
    pub fn sign_token(
        edition: Edition,
        features: &[Feature],
        subject: Option<&str>,
        signing_secret: &[u8],
    ) -> String {
        let claims = LicenseClaims {
            edition,
            features: features.to_vec(),
            subject: subject.map(str::to_string),
        };
        let claims_bytes = serde_json::to_vec(&claims).expect("claims serialise");
        let mut mac =
            HmacSha256::new_from_slice(signing_secret).expect("hmac accepts any key length");
        mac.update(&claims_bytes);
        let signature = mac.finalize().into_bytes();
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&claims_bytes),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// The license edition.
    pub fn edition(&self) -> Edition {
        self.edition
    }

    /// The licensed subject, when the token names one.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Whether the license grants a feature.
    pub fn allows(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    fn require(&self, feature: Feature, message: impl Into<String>) -> Result<(), LicenseViolation> {
        if self.allows(feature) {
            Ok(())
        } else {
            Err(LicenseViolation::for_feature(feature, message))
        }
    }

    /// Validate an ArenaJob intent: job type (defaulted to evaluation when
    /// unset), worker replica count (defaulted to 1), and whether a schedule
    /// is declared.
    pub fn validate_arena_job(
        &self,
        job_type: Option<ArenaJobType>,
        replicas: i32,
        has_schedule: bool,
    ) -> Result<(), LicenseViolation> {
        if job_type == Some(ArenaJobType::LoadTest) {
            self.require(Feature::LoadTests, "load-test jobs are not licensed")?;
        }
        if has_schedule {
            self.require(Feature::ScheduledJobs, "scheduled jobs are not licensed")?;
        }
        if replicas.max(1) > OPEN_CORE_WORKER_CAP {
            self.require(
                Feature::WorkerScale,
                format!("worker count {replicas} exceeds the included cap of {OPEN_CORE_WORKER_CAP}"),
            )?;
        }
        Ok(())
    }

    /// Validate fleet-mode execution.
    pub fn validate_fleet_mode(&self) -> Result<(), LicenseViolation> {
        self.require(Feature::FleetMode, "fleet execution mode is not licensed")
    }

    /// Validate a source backend type.
    pub fn validate_source_type(
        &self,
        source_type: omnia_core::SourceType,
    ) -> Result<(), LicenseViolation> {
        match source_type {
            omnia_core::SourceType::ConfigMap => Ok(()),
            omnia_core::SourceType::Git => {
                self.require(Feature::GitSources, "git sources are not licensed")
            }
            omnia_core::SourceType::Oci => {
                self.require(Feature::OciSources, "oci sources are not licensed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omnia_core::SourceType;

    const SECRET: &[u8] = b"test-signing-secret";

    #[test]
    fn dev_bypass_allows_everything() {
        let license = License::from_token("dev", SECRET).unwrap();
        assert_eq!(license.edition(), Edition::Dev);
        assert!(
            license
                .validate_arena_job(Some(ArenaJobType::LoadTest), 64, true)
                .is_ok()
        );
        assert!(license.validate_fleet_mode().is_ok());
        assert!(license.validate_source_type(SourceType::Oci).is_ok());
    }

    #[test]
    fn open_core_denies_scheduled_load_test() {
        let license = License::open_core();
        let violation = license
            .validate_arena_job(Some(ArenaJobType::LoadTest), 1, true)
            .unwrap_err();
        assert_eq!(violation.feature, Feature::LoadTests);
        assert!(violation.upgrade_hint.contains("enterprise"));
    }

    #[test]
    fn open_core_allows_plain_evaluation() {
        let license = License::open_core();
        assert!(license.validate_arena_job(None, 0, false).is_ok());
        assert!(
            license
                .validate_arena_job(Some(ArenaJobType::Evaluation), 4, false)
                .is_ok()
        );
    }

    #[test]
    fn worker_cap_enforced() {
        let license = License::open_core();
        let violation = license
            .validate_arena_job(None, OPEN_CORE_WORKER_CAP + 1, false)
            .unwrap_err();
        assert_eq!(violation.feature, Feature::WorkerScale);
        assert!(violation.message.contains("exceeds"));
    }

    #[test]
    fn source_types_gated_per_edition() {
        let license = License::open_core();
        assert!(license.validate_source_type(SourceType::ConfigMap).is_ok());
        assert!(license.validate_source_type(SourceType::Git).is_ok());
        let violation = license.validate_source_type(SourceType::Oci).unwrap_err();
        assert_eq!(violation.feature, Feature::OciSources);
    }

    #[test]
    fn signed_token_roundtrip() {
        let token = License::sign_token(
            Edition::Enterprise,
            &[Feature::LoadTests, Feature::ScheduledJobs],
            Some("acme"),
            SECRET,
        );
        let license = License::from_token(&token, SECRET).unwrap();
        assert_eq!(license.edition(), Edition::Enterprise);
        assert_eq!(license.subject(), Some("acme"));
        assert!(
            license
                .validate_arena_job(Some(ArenaJobType::LoadTest), 1, true)
                .is_ok()
        );
        // Fleet mode was not granted.
        assert!(license.validate_fleet_mode().is_err());
    }

    #[test]
    fn tampered_token_rejected() {
        let token = License::sign_token(Edition::Enterprise, &[], None, SECRET);
        let (claims, _sig) = token.split_once('.').unwrap();
        let forged = format!("{claims}.{}", URL_SAFE_NO_PAD.encode(b"not-a-signature"));
        assert!(matches!(
            License::from_token(&forged, SECRET),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = License::sign_token(Edition::Enterprise, &[], None, SECRET);
        assert!(matches!(
            License::from_token(&token, b"other-secret"),
            Err(TokenError::BadSignature)
        ));
    }

    #[test]
    fn garbage_token_is_malformed() {
        assert!(matches!(
            License::from_token("not a token", SECRET),
            Err(TokenError::Malformed)
        ));
    }
}
