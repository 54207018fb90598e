//! Audit logging for access credential lifecycle events.
//!
//! Every event is emitted via `tracing::info!` as a JSON blob in the `audit`
//! field, so the trail is queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `edr.issued` | `obtain` created a credential |
//! | `edr.refreshed` | `refresh` rotated a credential |
//! | `edr.revoked` | `revoke` deleted a credential |
//! | `edr.denied` | `refresh` rejected a request |
//!
//! Token strings never appear in events. A token is identified by its `jti`
//! and, where useful, a short SHA-256 fingerprint.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Structured audit event emitted for every credential lifecycle transition.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"edr.issued"`).
    pub event: &'static str,
    /// Credential id (`jti` of the access token).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// Party the credential was issued to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Principal that authenticated the request (`iss` of the authentication token).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Originating transfer process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    /// Fingerprint of the access token handed out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Human-readable reason for revocation or denial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            token_id: None,
            audience: None,
            principal: None,
            process_id: None,
            fingerprint: None,
            reason: None,
        }
    }

    /// Construct an `edr.issued` event.
    #[must_use]
    pub fn issued(
        token_id: &str,
        audience: &str,
        process_id: Option<&str>,
        access_token: &str,
    ) -> Self {
        Self {
            token_id: Some(token_id.to_string()),
            audience: Some(audience.to_string()),
            process_id: process_id.map(str::to_string),
            fingerprint: Some(fingerprint(access_token)),
            ..Self::new("edr.issued")
        }
    }

    /// Construct an `edr.refreshed` event.
    #[must_use]
    pub fn refreshed(token_id: &str, principal: &str, access_token: &str) -> Self {
        Self {
            token_id: Some(token_id.to_string()),
            principal: Some(principal.to_string()),
            fingerprint: Some(fingerprint(access_token)),
            ..Self::new("edr.refreshed")
        }
    }

    /// Construct an `edr.revoked` event.
    #[must_use]
    pub fn revoked(token_id: &str, process_id: &str, reason: &str) -> Self {
        Self {
            token_id: Some(token_id.to_string()),
            process_id: Some(process_id.to_string()),
            reason: Some(reason.to_string()),
            ..Self::new("edr.revoked")
        }
    }

    /// Construct an `edr.denied` event.
    #[must_use]
    pub fn denied(token_id: Option<&str>, principal: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            token_id: token_id.map(str::to_string),
            principal: principal.map(str::to_string),
            reason: Some(reason.into()),
            ..Self::new("edr.denied")
        }
    }
}

/// First 16 hex chars of the SHA-256 of `token`.
#[must_use]
pub fn fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}

/// Emit an audit event via `tracing::info!` with structured fields.
///
/// ```text
/// INFO edr_token_refresh::refresh::audit audit={"event":"edr.issued","token_id":...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "edr audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
