//! Error types for the EDR token refresh protocol
//!
//! Every protocol failure is surfaced as a typed [`Error`] whose `Display`
//! output is the exact, human-readable reason handed back to the caller.
//! Component-level errors (store, vault, codec) convert into the matching
//! variant at the service boundary.

use std::io;

use thiserror::Error;

use crate::store::StoreError;
use crate::token::TokenError;
use crate::vault::VaultError;

/// Result type alias for the token refresh protocol
pub type Result<T> = std::result::Result<T, Error>;

/// Token refresh protocol errors
#[derive(Error, Debug)]
pub enum Error {
    /// A token was malformed, expired, replayed or otherwise rejected
    #[error("{0}")]
    Validation(String),

    /// No `AccessTokenData` exists for the token id
    #[error("{0}")]
    NotFound(String),

    /// Signing a new token failed
    #[error("{0}")]
    Generation(String),

    /// The credential store rejected a write (duplicate id or lost update)
    #[error("{0}")]
    StoreConflict(String),

    /// The credential store itself failed (unreachable, I/O, ...)
    #[error("{0}")]
    Store(String),

    /// The secret vault could not be read or written
    #[error("{0}")]
    Vault(String),

    /// The caller supplied incomplete or inconsistent input
    #[error("{0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Short machine-readable category, used in audit events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Generation(_) => "generation",
            Self::StoreConflict(_) => "store_conflict",
            Self::Store(_) => "store",
            Self::Vault(_) => "vault",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(err.to_string()),
            StoreError::AlreadyExists(_) | StoreError::Conflict { .. } => {
                Self::StoreConflict(err.to_string())
            }
            StoreError::Backend(_) => Self::Store(err.to_string()),
        }
    }
}

impl From<VaultError> for Error {
    fn from(err: VaultError) -> Self {
        Self::Vault(err.to_string())
    }
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(_) | TokenError::Key(_) => Self::Generation(err.to_string()),
            TokenError::Malformed(_) | TokenError::Verification(_) | TokenError::Rules(_) => {
                Self::Validation(err.to_string())
            }
        }
    }
}
