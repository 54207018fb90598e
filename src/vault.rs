//! Secret vault: keyed storage for refresh material.
//!
//! The vault only stores opaque strings. [`RefreshMaterial`] is the JSON
//! payload the refresh service keeps under each credential id.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Vault failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    /// The backend could not be reached or rejected the operation.
    #[error("Vault unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be (de)serialized.
    #[error("Vault entry '{key}' is corrupt: {reason}")]
    Corrupt {
        /// Vault key.
        key: String,
        /// Parse failure.
        reason: String,
    },
}

/// Trait abstracting the secret storage backend.
#[async_trait::async_trait]
pub trait SecretVault: Send + Sync + 'static {
    /// Store (or overwrite) `value` under `key`.
    async fn store_secret(&self, key: &str, value: &str) -> Result<(), VaultError>;

    /// Read the value under `key`, `None` if absent.
    async fn resolve_secret(&self, key: &str) -> Result<Option<String>, VaultError>;

    /// Remove `key`. Deleting an absent key succeeds.
    async fn delete_secret(&self, key: &str) -> Result<(), VaultError>;
}

/// In-memory vault. Last writer wins.
#[derive(Debug, Default)]
pub struct InMemoryVault {
    secrets: DashMap<String, String>,
}

impl InMemoryVault {
    /// Create an empty vault.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait::async_trait]
impl SecretVault for InMemoryVault {
    async fn store_secret(&self, key: &str, value: &str) -> Result<(), VaultError> {
        self.secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn resolve_secret(&self, key: &str) -> Result<Option<String>, VaultError> {
        Ok(self.secrets.get(key).map(|v| v.clone()))
    }

    async fn delete_secret(&self, key: &str) -> Result<(), VaultError> {
        self.secrets.remove(key);
        Ok(())
    }
}

/// The refresh secret currently valid for one credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshMaterial {
    /// The refresh secret itself.
    pub value: String,
    /// When the secret stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// Where the holder sends refresh requests.
    pub refresh_endpoint: String,
}

impl RefreshMaterial {
    /// `true` once `expires_at` has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Read the material stored under `key`.
    pub async fn load(vault: &dyn SecretVault, key: &str) -> Result<Option<Self>, VaultError> {
        let Some(raw) = vault.resolve_secret(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| VaultError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    /// Write this material under `key`.
    pub async fn save(&self, vault: &dyn SecretVault, key: &str) -> Result<(), VaultError> {
        let json = self.to_json().map_err(|e| VaultError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        vault.store_secret(key, &json).await
    }
}
