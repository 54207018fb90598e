//! Configuration management

use std::{path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Default access token lifetime (5 minutes).
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);
/// Default refresh secret lifetime (24 hours).
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default clock-skew tolerance.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identity and signing key of this system
    pub issuer: IssuerConfig,
    /// Token lifetimes and refresh behaviour
    pub refresh: RefreshConfig,
    /// Replay ledger maintenance
    pub replay: ReplayConfig,
    /// Public keys of participants (holders)
    pub participants: ParticipantsConfig,
}

/// Issuer identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    /// Identifier used as `iss`/`sub` of issued tokens and as the expected
    /// audience of authentication tokens (usually a DID)
    pub id: String,
    /// Signing key
    pub signing_key: SigningKeyConfig,
}

/// PEM-encoded signing key pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningKeyConfig {
    /// Key id placed in the JOSE header
    pub kid: String,
    /// Signature algorithm
    pub algorithm: Algorithm,
    /// Private key (PKCS#8 PEM)
    pub private_key_path: PathBuf,
    /// Public key (SPKI PEM)
    pub public_key_path: PathBuf,
}

impl Default for SigningKeyConfig {
    fn default() -> Self {
        Self {
            kid: String::new(),
            algorithm: Algorithm::ES256,
            private_key_path: PathBuf::from("keys/private.pem"),
            public_key_path: PathBuf::from("keys/public.pem"),
        }
    }
}

/// Refresh protocol settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Public URL holders send refresh requests to
    pub endpoint: String,
    /// Access token lifetime
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
    /// Refresh secret lifetime
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,
    /// Clock-skew tolerance for `exp`/`iat`/`nbf`
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
    /// Only the holder a credential was issued to may refresh it
    pub enforce_principal_binding: bool,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token_ttl: DEFAULT_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            clock_skew: DEFAULT_CLOCK_SKEW,
            enforce_principal_binding: true,
        }
    }
}

/// Replay ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// How often expired ledger entries are evicted
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Participant key material
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantsConfig {
    /// JWK Set files whose keys are looked up by `kid`
    pub jwks_files: Vec<PathBuf>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // EDR_REFRESH_REFRESH__TOKEN_TTL=10m -> refresh.token_ttl
        figment = figment.merge(Env::prefixed("EDR_REFRESH_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject configurations the service cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.id.trim().is_empty() {
            return Err(Error::Config("issuer.id must not be empty".to_string()));
        }
        Url::parse(&self.refresh.endpoint).map_err(|e| {
            Error::Config(format!(
                "refresh.endpoint '{}' is not a valid URL: {e}",
                self.refresh.endpoint
            ))
        })?;
        if self.refresh.token_ttl.is_zero() {
            return Err(Error::Config("refresh.token_ttl must be positive".to_string()));
        }
        if self.refresh.refresh_token_ttl.is_zero() {
            return Err(Error::Config(
                "refresh.refresh_token_ttl must be positive".to_string(),
            ));
        }
        if self.replay.reap_interval.is_zero() {
            return Err(Error::Config("replay.reap_interval must be positive".to_string()));
        }
        Ok(())
    }

    /// Key id for the signing key, defaulting to `<issuer>#key-1`.
    #[must_use]
    pub fn signing_kid(&self) -> String {
        if self.issuer.signing_key.kid.is_empty() {
            format!("{}#key-1", self.issuer.id)
        } else {
            self.issuer.signing_key.kid.clone()
        }
    }
}
