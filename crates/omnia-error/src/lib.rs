//! Unified error taxonomy with stable error codes for Omnia.
//!
//! Every Omnia error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context.  Use the builder returned by
//! [`OmniaError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Cluster state store errors (reads, writes, watches).
    Store,
    /// Admission webhook denials and structural rule violations.
    Admission,
    /// Licensing errors.
    License,
    /// Source fetch and artefact errors.
    Source,
    /// Arena config parsing and scenario partitioning errors.
    Arena,
    /// Work queue errors.
    Queue,
    /// Provider / tool resolution errors.
    Resolve,
    /// Worker workload composition and lifecycle errors.
    Workload,
    /// Envelope encryption and KMS errors.
    Crypto,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Store => "store",
            Self::Admission => "admission",
            Self::License => "license",
            Self::Source => "source",
            Self::Arena => "arena",
            Self::Queue => "queue",
            Self::Resolve => "resolve",
            Self::Workload => "workload",
            Self::Crypto => "crypto",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.  Conditions and events
/// embed these codes as their `reason` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Store --
    /// Optimistic-concurrency conflict: the caller's resourceVersion is stale.
    StoreConflict,
    /// The referenced record does not exist.
    StoreNotFound,
    /// A record with the same key already exists.
    StoreAlreadyExists,
    /// A watch consumer fell behind and events were dropped.
    StoreWatchLagged,

    // -- Admission --
    /// A structural admission rule rejected the record.
    AdmissionDenied,
    /// A child privacy policy is less restrictive than its parent.
    PolicyHierarchyViolated,
    /// Deleting the last global-level privacy policy is not allowed.
    LastGlobalPolicy,

    // -- License --
    /// The license does not cover a requested feature.
    LicenseViolation,
    /// The license token failed signature or structural checks.
    LicenseTokenInvalid,

    // -- Source --
    /// The referenced source is missing or not in the Ready phase.
    SourceNotReady,
    /// A backend fetch operation failed.
    SourceFetchFailed,
    /// A Ready source carries no artefact description.
    SourceArtifactMissing,
    /// An archive entry attempted to escape the extraction root.
    ArchiveEscape,

    // -- Arena --
    /// The arena configuration file could not be parsed.
    ArenaConfigInvalid,
    /// A scenario include/exclude pattern failed to compile.
    ScenarioFilterInvalid,

    // -- Queue --
    /// The work queue endpoint could not be reached.
    QueueUnreachable,
    /// The addressed work item does not exist in the job partition.
    QueueItemNotFound,
    /// An ack or nack arrived for an item that is not currently leased.
    QueueItemNotLeased,

    // -- Resolve --
    /// No provider matched the declared selector.
    ProviderNotFound,
    /// The declared tool registry does not exist.
    ToolRegistryNotFound,
    /// The fleet target agent runtime is missing or has no endpoint.
    RuntimeNotFound,

    // -- Workload --
    /// Creating the worker batch workload failed.
    WorkloadCreateFailed,
    /// The worker batch workload reported a terminal failure.
    WorkloadFailed,

    // -- Crypto --
    /// The envelope JSON is malformed or has an unsupported version.
    EnvelopeInvalid,
    /// Authenticated decryption failed (wrong key or tampered ciphertext).
    DecryptFailed,
    /// The KMS backend could not be reached or rejected the request.
    KmsUnavailable,
    /// The master key exists but is disabled.
    KeyDisabled,

    // -- Internal --
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::StoreConflict
            | Self::StoreNotFound
            | Self::StoreAlreadyExists
            | Self::StoreWatchLagged => ErrorCategory::Store,

            Self::AdmissionDenied | Self::PolicyHierarchyViolated | Self::LastGlobalPolicy => {
                ErrorCategory::Admission
            }

            Self::LicenseViolation | Self::LicenseTokenInvalid => ErrorCategory::License,

            Self::SourceNotReady
            | Self::SourceFetchFailed
            | Self::SourceArtifactMissing
            | Self::ArchiveEscape => ErrorCategory::Source,

            Self::ArenaConfigInvalid | Self::ScenarioFilterInvalid => ErrorCategory::Arena,

            Self::QueueUnreachable | Self::QueueItemNotFound | Self::QueueItemNotLeased => {
                ErrorCategory::Queue
            }

            Self::ProviderNotFound | Self::ToolRegistryNotFound | Self::RuntimeNotFound => {
                ErrorCategory::Resolve
            }

            Self::WorkloadCreateFailed | Self::WorkloadFailed => ErrorCategory::Workload,

            Self::EnvelopeInvalid
            | Self::DecryptFailed
            | Self::KmsUnavailable
            | Self::KeyDisabled => ErrorCategory::Crypto,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"SOURCE_NOT_READY"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreConflict => "STORE_CONFLICT",
            Self::StoreNotFound => "STORE_NOT_FOUND",
            Self::StoreAlreadyExists => "STORE_ALREADY_EXISTS",
            Self::StoreWatchLagged => "STORE_WATCH_LAGGED",
            Self::AdmissionDenied => "ADMISSION_DENIED",
            Self::PolicyHierarchyViolated => "POLICY_HIERARCHY_VIOLATED",
            Self::LastGlobalPolicy => "LAST_GLOBAL_POLICY",
            Self::LicenseViolation => "LICENSE_VIOLATION",
            Self::LicenseTokenInvalid => "LICENSE_TOKEN_INVALID",
            Self::SourceNotReady => "SOURCE_NOT_READY",
            Self::SourceFetchFailed => "SOURCE_FETCH_FAILED",
            Self::SourceArtifactMissing => "SOURCE_ARTIFACT_MISSING",
            Self::ArchiveEscape => "ARCHIVE_ESCAPE",
            Self::ArenaConfigInvalid => "ARENA_CONFIG_INVALID",
            Self::ScenarioFilterInvalid => "SCENARIO_FILTER_INVALID",
            Self::QueueUnreachable => "QUEUE_UNREACHABLE",
            Self::QueueItemNotFound => "QUEUE_ITEM_NOT_FOUND",
            Self::QueueItemNotLeased => "QUEUE_ITEM_NOT_LEASED",
            Self::ProviderNotFound => "PROVIDER_NOT_FOUND",
            Self::ToolRegistryNotFound => "TOOL_REGISTRY_NOT_FOUND",
            Self::RuntimeNotFound => "RUNTIME_NOT_FOUND",
            Self::WorkloadCreateFailed => "WORKLOAD_CREATE_FAILED",
            Self::WorkloadFailed => "WORKLOAD_FAILED",
            Self::EnvelopeInvalid => "ENVELOPE_INVALID",
            Self::DecryptFailed => "DECRYPT_FAILED",
            Self::KmsUnavailable => "KMS_UNAVAILABLE",
            Self::KeyDisabled => "KEY_DISABLED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Returns `true` when a reconcile hitting this code should surface a
    /// terminal phase rather than be requeued.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::LicenseViolation
                | Self::LicenseTokenInvalid
                | Self::SourceNotReady
                | Self::SourceArtifactMissing
                | Self::WorkloadFailed
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OmniaError
// ---------------------------------------------------------------------------

/// Unified Omnia error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use omnia_error::{ErrorCode, OmniaError};
///
/// let err = OmniaError::new(ErrorCode::SourceNotReady, "source still fetching")
///     .with_context("source", "arena-configs")
///     .with_context("phase", "Fetching");
/// ```
pub struct OmniaError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl OmniaError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for OmniaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("OmniaError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for OmniaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for OmniaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of an [`OmniaError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OmniaErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&OmniaError> for OmniaErrorDto {
    fn from(err: &OmniaError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<OmniaErrorDto> for OmniaError {
    fn from(dto: OmniaErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io;

    /// All error codes for exhaustive iteration in tests.
    const ALL_CODES: &[ErrorCode] = &[
        ErrorCode::StoreConflict,
        ErrorCode::StoreNotFound,
        ErrorCode::StoreAlreadyExists,
        ErrorCode::StoreWatchLagged,
        ErrorCode::AdmissionDenied,
        ErrorCode::PolicyHierarchyViolated,
        ErrorCode::LastGlobalPolicy,
        ErrorCode::LicenseViolation,
        ErrorCode::LicenseTokenInvalid,
        ErrorCode::SourceNotReady,
        ErrorCode::SourceFetchFailed,
        ErrorCode::SourceArtifactMissing,
        ErrorCode::ArchiveEscape,
        ErrorCode::ArenaConfigInvalid,
        ErrorCode::ScenarioFilterInvalid,
        ErrorCode::QueueUnreachable,
        ErrorCode::QueueItemNotFound,
        ErrorCode::QueueItemNotLeased,
        ErrorCode::ProviderNotFound,
        ErrorCode::ToolRegistryNotFound,
        ErrorCode::RuntimeNotFound,
        ErrorCode::WorkloadCreateFailed,
        ErrorCode::WorkloadFailed,
        ErrorCode::EnvelopeInvalid,
        ErrorCode::DecryptFailed,
        ErrorCode::KmsUnavailable,
        ErrorCode::KeyDisabled,
        ErrorCode::Internal,
    ];

    #[test]
    fn basic_construction() {
        let err = OmniaError::new(ErrorCode::Internal, "boom");
        assert_eq!(err.code, ErrorCode::Internal);
        assert_eq!(err.message, "boom");
        assert!(err.source.is_none());
        assert!(err.context.is_empty());
    }

    #[test]
    fn display_without_context() {
        let err = OmniaError::new(ErrorCode::SourceNotReady, "source s is Fetching");
        assert_eq!(err.to_string(), "[SOURCE_NOT_READY] source s is Fetching");
    }

    #[test]
    fn display_with_context() {
        let err = OmniaError::new(ErrorCode::QueueUnreachable, "connect refused")
            .with_context("addr", "redis:6379");
        let s = err.to_string();
        assert!(s.starts_with("[QUEUE_UNREACHABLE] connect refused"));
        assert!(s.contains("redis:6379"));
    }

    #[test]
    fn builder_with_source() {
        let src = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err = OmniaError::new(ErrorCode::SourceFetchFailed, "clone failed").with_source(src);
        assert!(err.source.is_some());
        let displayed = err.source.as_ref().unwrap().to_string();
        assert_eq!(displayed, "access denied");
    }

    #[test]
    fn category_mapping_per_family() {
        assert_eq!(ErrorCode::StoreConflict.category(), ErrorCategory::Store);
        assert_eq!(
            ErrorCode::PolicyHierarchyViolated.category(),
            ErrorCategory::Admission
        );
        assert_eq!(
            ErrorCode::LicenseViolation.category(),
            ErrorCategory::License
        );
        assert_eq!(ErrorCode::ArchiveEscape.category(), ErrorCategory::Source);
        assert_eq!(
            ErrorCode::ArenaConfigInvalid.category(),
            ErrorCategory::Arena
        );
        assert_eq!(
            ErrorCode::QueueItemNotLeased.category(),
            ErrorCategory::Queue
        );
        assert_eq!(
            ErrorCode::ProviderNotFound.category(),
            ErrorCategory::Resolve
        );
        assert_eq!(
            ErrorCode::WorkloadCreateFailed.category(),
            ErrorCategory::Workload
        );
        assert_eq!(ErrorCode::DecryptFailed.category(), ErrorCategory::Crypto);
        assert_eq!(ErrorCode::Internal.category(), ErrorCategory::Internal);
    }

    #[test]
    fn terminal_codes() {
        assert!(ErrorCode::LicenseViolation.is_terminal());
        assert!(ErrorCode::SourceNotReady.is_terminal());
        assert!(ErrorCode::WorkloadFailed.is_terminal());
        assert!(!ErrorCode::StoreConflict.is_terminal());
        assert!(!ErrorCode::QueueUnreachable.is_terminal());
        assert!(!ErrorCode::WorkloadCreateFailed.is_terminal());
    }

    #[test]
    fn std_error_source_chain() {
        let inner = io::Error::new(io::ErrorKind::NotFound, "not found");
        let err = OmniaError::new(ErrorCode::StoreNotFound, "missing record").with_source(inner);
        let src = std::error::Error::source(&err).unwrap();
        assert_eq!(src.to_string(), "not found");
    }

    #[test]
    fn error_code_serde_roundtrip() {
        let code = ErrorCode::LicenseViolation;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, r#""LICENSE_VIOLATION""#);
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn dto_roundtrip_with_source() {
        let src = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke");
        let err = OmniaError::new(ErrorCode::QueueUnreachable, "push failed").with_source(src);
        let dto: OmniaErrorDto = (&err).into();
        assert_eq!(dto.source_message.as_deref(), Some("pipe broke"));
        let json = serde_json::to_string(&dto).unwrap();
        let back: OmniaErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(dto, back);
    }

    #[test]
    fn all_codes_have_unique_as_str() {
        let mut seen = HashSet::new();
        for code in ALL_CODES {
            let s = code.as_str();
            assert!(seen.insert(s), "duplicate as_str value: {s}");
        }
        assert_eq!(seen.len(), ALL_CODES.len());
    }

    #[test]
    fn all_codes_serialize_to_as_str() {
        for code in ALL_CODES {
            let json = serde_json::to_string(code).unwrap();
            let expected = format!(r#""{}""#, code.as_str());
            assert_eq!(json, expected, "mismatch for {code:?}");
        }
    }

    #[test]
    fn all_codes_display_matches_as_str() {
        for code in ALL_CODES {
            assert_eq!(code.to_string(), code.as_str());
        }
    }
}
