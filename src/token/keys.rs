//! Key material: signing keys for this issuer and public-key resolution.
//!
//! Two independent [`PublicKeyResolver`] instances are used by the refresh
//! protocol: one scoped to the issuer's own keys (tokens this system signed)
//! and one scoped to participant keys addressed by DID URL key ids
//! (`did:web:bob#key-1`). How a DID document is fetched is outside this
//! crate; [`KeyRing`] and [`JwkSetResolver`] cover static key material.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey,
    jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet},
};
use rcgen::KeyPair;
use tracing::debug;

/// Key lookup and parsing failures.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// No key is registered under the key id.
    #[error("No public key found for key ID '{0}'")]
    NotFound(String),

    /// Key material could not be parsed or does not match the algorithm.
    #[error("Invalid key material: {0}")]
    Invalid(String),

    /// The private key is not available (missing file, unreadable, ...).
    #[error("Private key unavailable: {0}")]
    Unavailable(String),
}

// ── Signing ───────────────────────────────────────────────────────────────────

/// A private key together with the `kid` and algorithm it signs with.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: Algorithm,
    key: EncodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Parse a PEM-encoded private key (PKCS#8 for EC and Ed25519).
    pub fn from_pem(
        kid: impl Into<String>,
        algorithm: Algorithm,
        pem: &[u8],
    ) -> Result<Self, KeyError> {
        let key = match algorithm {
            Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem),
            Algorithm::EdDSA => EncodingKey::from_ed_pem(pem),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => EncodingKey::from_rsa_pem(pem),
            other => {
                return Err(KeyError::Invalid(format!(
                    "algorithm {other:?} is not an asymmetric signature algorithm"
                )));
            }
        }
        .map_err(|e| KeyError::Invalid(e.to_string()))?;

        Ok(Self {
            kid: kid.into(),
            algorithm,
            key,
        })
    }

    /// Key id written into the `kid` header of every token signed with this key.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Signature algorithm.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.key
    }
}

/// Supplies the issuer's private key at signing time.
///
/// Resolution happens per token so that a rotated or removed key file is
/// picked up (or fails) without restarting the service.
pub trait SigningKeyProvider: Send + Sync {
    /// Return the current signing key.
    fn signing_key(&self) -> Result<SigningKey, KeyError>;
}

impl SigningKeyProvider for SigningKey {
    fn signing_key(&self) -> Result<SigningKey, KeyError> {
        Ok(self.clone())
    }
}

/// Signing key read from a PEM file on every use.
#[derive(Debug, Clone)]
pub struct PemFileSigningKey {
    kid: String,
    algorithm: Algorithm,
    path: PathBuf,
}

impl PemFileSigningKey {
    /// Create a provider for the PEM file at `path`.
    #[must_use]
    pub fn new(kid: impl Into<String>, algorithm: Algorithm, path: impl Into<PathBuf>) -> Self {
        Self {
            kid: kid.into(),
            algorithm,
            path: path.into(),
        }
    }
}

impl SigningKeyProvider for PemFileSigningKey {
    fn signing_key(&self) -> Result<SigningKey, KeyError> {
        let pem = std::fs::read(&self.path).map_err(|e| {
            KeyError::Unavailable(format!("cannot read {}: {e}", self.path.display()))
        })?;
        SigningKey::from_pem(self.kid.clone(), self.algorithm, &pem)
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

/// A public key and the algorithms it may verify.
#[derive(Clone)]
pub struct VerificationKey {
    key: DecodingKey,
    algorithms: Vec<Algorithm>,
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

impl VerificationKey {
    /// Parse a PEM-encoded public key (SPKI) for `algorithm`.
    pub fn from_pem(algorithm: Algorithm, pem: &[u8]) -> Result<Self, KeyError> {
        let key = match algorithm {
            Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
            Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
            other => {
                return Err(KeyError::Invalid(format!(
                    "algorithm {other:?} is not an asymmetric signature algorithm"
                )));
            }
        }
        .map_err(|e| KeyError::Invalid(e.to_string()))?;

        Ok(Self {
            key,
            algorithms: vec![algorithm],
        })
    }

    /// Convert a JWK into a verification key.
    ///
    /// Symmetric (`oct`) keys are rejected: tokens in this protocol are always
    /// signed asymmetrically.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, KeyError> {
        let (key, algorithms) = match &jwk.algorithm {
            AlgorithmParameters::RSA(rsa) => (
                DecodingKey::from_rsa_components(&rsa.n, &rsa.e),
                vec![
                    Algorithm::RS256,
                    Algorithm::RS384,
                    Algorithm::RS512,
                    Algorithm::PS256,
                    Algorithm::PS384,
                    Algorithm::PS512,
                ],
            ),
            AlgorithmParameters::EllipticCurve(ec) => {
                let alg = match ec.curve {
                    EllipticCurve::P256 => Algorithm::ES256,
                    EllipticCurve::P384 => Algorithm::ES384,
                    ref other => {
                        return Err(KeyError::Invalid(format!("unsupported EC curve {other:?}")));
                    }
                };
                (DecodingKey::from_ec_components(&ec.x, &ec.y), vec![alg])
            }
            AlgorithmParameters::OctetKeyPair(okp) => (
                DecodingKey::from_ed_components(&okp.x),
                vec![Algorithm::EdDSA],
            ),
            AlgorithmParameters::OctetKey(_) => {
                return Err(KeyError::Invalid("symmetric keys are not accepted".to_string()));
            }
        };

        Ok(Self {
            key: key.map_err(|e| KeyError::Invalid(e.to_string()))?,
            algorithms,
        })
    }

    /// `true` if a signature made with `algorithm` can be checked by this key.
    #[must_use]
    pub fn supports(&self, algorithm: Algorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    pub(crate) fn algorithms(&self) -> &[Algorithm] {
        &self.algorithms
    }
}

/// Resolves a public key by key id (`kid` header).
///
/// Implementations must be `Send + Sync` because one resolver is shared
/// across all concurrent validations.
#[async_trait]
pub trait PublicKeyResolver: Send + Sync {
    /// Look up the key registered under `key_id`.
    async fn resolve_key(&self, key_id: &str) -> Result<VerificationKey, KeyError>;
}

/// In-memory key id → public key map.
#[derive(Debug, Default)]
pub struct KeyRing {
    keys: DashMap<String, VerificationKey>,
}

impl KeyRing {
    /// Create an empty key ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
        }
    }

    /// Register (or replace) a key.
    pub fn insert(&self, key_id: impl Into<String>, key: VerificationKey) {
        self.keys.insert(key_id.into(), key);
    }

    /// Remove a key. Returns `true` if it was registered.
    pub fn remove(&self, key_id: &str) -> bool {
        self.keys.remove(key_id).is_some()
    }

    /// Number of registered keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// `true` when no keys are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl PublicKeyResolver for KeyRing {
    async fn resolve_key(&self, key_id: &str) -> Result<VerificationKey, KeyError> {
        self.keys
            .get(key_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))
    }
}

/// Resolver backed by one or more JWK Sets.
///
/// Keys without a `kid`, or of an unsupported type, are skipped.
#[derive(Debug, Default)]
pub struct JwkSetResolver {
    ring: KeyRing,
}

impl JwkSetResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every usable key of `set`. Returns how many were added.
    pub fn add_set(&self, set: &JwkSet) -> usize {
        let mut added = 0;
        for jwk in &set.keys {
            let Some(kid) = jwk.common.key_id.as_deref() else {
                debug!("Skipping JWK without 'kid'");
                continue;
            };
            match VerificationKey::from_jwk(jwk) {
                Ok(key) => {
                    self.ring.insert(kid, key);
                    added += 1;
                }
                Err(e) => debug!(kid = %kid, error = %e, "Skipping unusable JWK"),
            }
        }
        added
    }

    /// Load a JWK Set JSON document from disk.
    pub fn add_file(&self, path: &Path) -> Result<usize, KeyError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KeyError::Invalid(format!("cannot read {}: {e}", path.display())))?;
        let set: JwkSet = serde_json::from_str(&raw)
            .map_err(|e| KeyError::Invalid(format!("{} is not a JWK Set: {e}", path.display())))?;
        Ok(self.add_set(&set))
    }

    /// Number of loaded keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// `true` when no keys are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[async_trait]
impl PublicKeyResolver for JwkSetResolver {
    async fn resolve_key(&self, key_id: &str) -> Result<VerificationKey, KeyError> {
        self.ring.resolve_key(key_id).await
    }
}

// ── Generation ────────────────────────────────────────────────────────────────

/// A freshly generated P-256 key pair in PEM form.
#[derive(Debug, Clone)]
pub struct GeneratedKeyPair {
    /// PKCS#8 private key.
    pub private_key_pem: String,
    /// SPKI public key.
    pub public_key_pem: String,
}

impl GeneratedKeyPair {
    /// Generate a new ECDSA P-256 key pair (ES256).
    pub fn generate() -> Result<Self, KeyError> {
        let key_pair =
            KeyPair::generate().map_err(|e| KeyError::Invalid(format!("key generation failed: {e}")))?;
        Ok(Self {
            private_key_pem: key_pair.serialize_pem(),
            public_key_pem: key_pair.public_key_pem(),
        })
    }

    /// Build the signing half under `kid`.
    pub fn signing_key(&self, kid: impl Into<String>) -> Result<SigningKey, KeyError> {
        SigningKey::from_pem(kid, Algorithm::ES256, self.private_key_pem.as_bytes())
    }

    /// Build the verifying half.
    pub fn verification_key(&self) -> Result<VerificationKey, KeyError> {
        VerificationKey::from_pem(Algorithm::ES256, self.public_key_pem.as_bytes())
    }

    /// Write `<stem>.key.pem` and `<stem>.pub.pem` under `dir`.
    pub fn write_to(&self, dir: &Path, stem: &str) -> std::io::Result<(PathBuf, PathBuf)> {
        std::fs::create_dir_all(dir)?;
        let private_path = dir.join(format!("{stem}.key.pem"));
        let public_path = dir.join(format!("{stem}.pub.pem"));
        std::fs::write(&private_path, &self.private_key_pem)?;
        std::fs::write(&public_path, &self.public_key_pem)?;
        Ok((private_path, public_path))
    }
}
