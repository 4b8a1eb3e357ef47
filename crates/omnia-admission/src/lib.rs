//! omnia-admission
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Synchronously validates create/update/delete intents against structural
//! rules and hierarchical policies before they are durably recorded. Every
//! denial names the violated rule; license denials carry upgrade hints.

/// ArenaJob validation.
pub mod job;
/// SessionPrivacyPolicy hierarchy validation.
pub mod policy;
/// ArenaSource validation.
pub mod source;

use async_trait::async_trait;
use omnia_core::{ArenaJob, ArenaSource, Object, SessionPrivacyPolicy};
use omnia_license::License;
use omnia_store::{AdmissionHook, AdmissionRequest, AdmissionResponse, Store};
use tracing::debug;

/// The assembled admission validator set, installed as the store's hook.
pub struct OmniaAdmission {
    license: License,
}

impl OmniaAdmission {
    /// Build the validator set over the active license.
    pub fn new(license: License) -> Self {
        Self { license }
    }
}

#[async_trait]
impl AdmissionHook for OmniaAdmission {
    async fn review(&self, store: &dyn Store, request: &AdmissionRequest) -> AdmissionResponse {
        let response = match request.kind.as_str() {
            kind if kind == ArenaJob::KIND => job::review(&self.license, request),
            kind if kind == ArenaSource::KIND => source::review(&self.license, request),
            kind if kind == SessionPrivacyPolicy::KIND => policy::review(store, request).await,
            _ => AdmissionResponse::allow(),
        };
        if !response.allowed {
            debug!(
                kind = %request.kind,
                rule = response.denial.as_ref().map(|d| d.rule.as_str()).unwrap_or(""),
                "admission denied"
            );
        }
        response
    }
}

/// Normalise a cron expression to the six-field form the parser expects;
/// standard five-field expressions gain a leading seconds column.
pub fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}
