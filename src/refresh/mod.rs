//! Token refresh service: issue, resolve, refresh and revoke access credentials.
//!
//! This module ties the codec, rule chain, store, vault and replay ledger
//! together into the four protocol operations:
//!
//! 1. **Obtain**: sign an access token and a refresh secret for a resource,
//!    persist the [`AccessTokenData`] record and the [`RefreshMaterial`].
//!
//! 2. **Resolve**: verify an access token against the local key and return
//!    the record it refers to.
//!
//! 3. **Refresh**: a holder presents the refresh secret together with a
//!    self-signed authentication token that embeds the access token. On
//!    success the pair is rotated; the old secret stops working.
//!
//! 4. **Revoke**: delete every credential of a transfer process.
//!
//! # Refresh flow
//!
//! ```text
//! authentication token
//!   -> verify against participant keys + authentication rules (one-time jti)
//!   -> embedded access token: verify against local key + access rules
//!   -> load record by jti                          (NotFound after revoke)
//!   -> principal binding: auth iss == record audience
//!   -> refresh secret matches record digest, vault material unexpired
//!   -> sign new pair
//!   -> versioned store update                      (one concurrent winner)
//!   -> overwrite vault material
//! ```
//!
//! Every operation emits an audit event (see [`audit`]).

pub mod audit;
pub mod grant;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};

use crate::config::{
    Config, DEFAULT_CLOCK_SKEW, DEFAULT_REFRESH_TOKEN_TTL, DEFAULT_TOKEN_TTL,
};
use crate::replay::{InMemoryReplayLedger, ReplayLedger};
use crate::rules::{self, Rule};
use crate::store::{
    AUDIENCE_PROPERTY, AUTH_TYPE_PROPERTY, AccessTokenData, BEARER, Criterion, DataAddress,
    InMemoryTokenStore, PROCESS_ID_PROPERTY, QuerySpec, StoreError, TokenStore,
};
use crate::token::claims::{AUD, EXP, IAT, ISS, JTI, NONCE, SUB, TOKEN, now_epoch_secs};
use crate::token::{
    ClaimSet, HeaderParams, JwkSetResolver, KeyRing, PemFileSigningKey, PublicKeyResolver,
    REFRESH_TOKEN_TYPE, SigningKeyProvider, TokenGenerator, TokenValidator, VerificationKey,
};
use crate::vault::{InMemoryVault, RefreshMaterial, SecretVault};
use crate::{Error, Result};

pub use audit::AuditEvent;
pub use grant::{GrantError, HolderRefreshRequest, RefreshGrantRequest, refresh_url};

/// Credential property carrying the refresh secret.
pub const REFRESH_TOKEN_PROPERTY: &str = "refreshToken";
/// Credential property carrying the refresh endpoint URL.
pub const REFRESH_ENDPOINT_PROPERTY: &str = "refreshEndpoint";
/// Credential property carrying the access token lifetime in seconds.
pub const EXPIRES_IN_PROPERTY: &str = "expiresIn";
/// Record property holding the SHA-256 of the live refresh secret.
pub const REFRESH_DIGEST_PROPERTY: &str = "refreshTokenDigest";

/// Keys the service owns in credentials; callers cannot set them.
const RESERVED_PROPERTIES: [&str; 4] = [
    REFRESH_TOKEN_PROPERTY,
    REFRESH_ENDPOINT_PROPERTY,
    EXPIRES_IN_PROPERTY,
    REFRESH_DIGEST_PROPERTY,
];

/// Prefix of every authentication token failure.
const AUTHENTICATION_FAILED: &str = "Authentication token validation failed: ";

// ── Settings ─────────────────────────────────────────────────────────────────

/// Runtime settings of the service.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// This system's identifier (`iss`/`sub` of issued tokens).
    pub issuer_id: String,
    /// Refresh endpoint URL handed to holders.
    pub refresh_endpoint: String,
    /// Access token lifetime.
    pub token_ttl: Duration,
    /// Refresh secret lifetime.
    pub refresh_token_ttl: Duration,
    /// Clock-skew tolerance for temporal rules.
    pub clock_skew: Duration,
    /// Reject refreshes by anyone but the credential's audience.
    pub enforce_principal_binding: bool,
}

impl RefreshSettings {
    /// Settings with default lifetimes.
    #[must_use]
    pub fn new(issuer_id: impl Into<String>, refresh_endpoint: &str) -> Self {
        Self {
            issuer_id: issuer_id.into(),
            refresh_endpoint: refresh_url(refresh_endpoint),
            token_ttl: DEFAULT_TOKEN_TTL,
            refresh_token_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            clock_skew: DEFAULT_CLOCK_SKEW,
            enforce_principal_binding: true,
        }
    }
}

impl From<&Config> for RefreshSettings {
    fn from(config: &Config) -> Self {
        Self {
            issuer_id: config.issuer.id.clone(),
            refresh_endpoint: refresh_url(&config.refresh.endpoint),
            token_ttl: config.refresh.token_ttl,
            refresh_token_ttl: config.refresh.refresh_token_ttl,
            clock_skew: config.refresh.clock_skew,
            enforce_principal_binding: config.refresh.enforce_principal_binding,
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────────────────

/// Result of `obtain`: the access token plus its metadata.
///
/// Serializes flat: `{"accessToken": ..., "refreshToken": ..., "refreshEndpoint": ...,
/// "expiresIn": ..., "authType": "bearer", <caller properties>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCredential {
    /// Signed access token.
    pub access_token: String,
    /// Caller properties merged with the service-owned entries.
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

impl AccessCredential {
    /// The refresh secret.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.additional.get(REFRESH_TOKEN_PROPERTY).and_then(Value::as_str)
    }

    /// The refresh endpoint URL.
    #[must_use]
    pub fn refresh_endpoint(&self) -> Option<&str> {
        self.additional
            .get(REFRESH_ENDPOINT_PROPERTY)
            .and_then(Value::as_str)
    }

    /// Access token lifetime in seconds.
    #[must_use]
    pub fn expires_in(&self) -> Option<u64> {
        self.additional.get(EXPIRES_IN_PROPERTY).and_then(Value::as_u64)
    }
}

/// Result of `refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// New access token.
    pub access_token: String,
    /// New refresh secret.
    pub refresh_token: String,
    /// Lifetime of the access token in seconds.
    pub expires_in: u64,
    /// Always `bearer`.
    pub token_type: String,
}

/// What a refresh had established about the caller before it failed.
#[derive(Debug, Default)]
struct RefreshAttempt {
    token_id: Option<String>,
    principal: Option<String>,
}

/// A freshly signed access token / refresh secret pair.
struct TokenPair {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
    material: RefreshMaterial,
}

// ── Service ──────────────────────────────────────────────────────────────────

/// The access credential protocol.
///
/// All collaborators sit behind `Arc<dyn _>` so the service can be shared
/// across tasks; nothing here takes a global lock.
pub struct TokenRefreshService {
    settings: RefreshSettings,
    generator: TokenGenerator,
    validator: TokenValidator,
    local_keys: Arc<dyn PublicKeyResolver>,
    participant_keys: Arc<dyn PublicKeyResolver>,
    store: Arc<dyn TokenStore>,
    vault: Arc<dyn SecretVault>,
    ledger: Arc<dyn ReplayLedger>,
}

impl TokenRefreshService {
    /// Create a service with in-memory store, vault and replay ledger.
    ///
    /// `local_keys` verifies tokens this service signed; `participant_keys`
    /// verifies holders' authentication tokens.
    #[must_use]
    pub fn new(
        settings: RefreshSettings,
        signer: Arc<dyn SigningKeyProvider>,
        local_keys: Arc<dyn PublicKeyResolver>,
        participant_keys: Arc<dyn PublicKeyResolver>,
    ) -> Self {
        Self {
            settings,
            generator: TokenGenerator::new(signer),
            validator: TokenValidator::new(),
            local_keys,
            participant_keys,
            store: Arc::new(InMemoryTokenStore::new()),
            vault: Arc::new(InMemoryVault::new()),
            ledger: Arc::new(InMemoryReplayLedger::new()),
        }
    }

    /// Build from configuration: PEM signing key, its public half as the
    /// local key, participant keys from JWK Set files.
    pub fn from_config(config: &Config) -> Result<Self> {
        let key = &config.issuer.signing_key;
        let kid = config.signing_kid();

        let signer = Arc::new(PemFileSigningKey::new(
            kid.clone(),
            key.algorithm,
            &key.private_key_path,
        ));

        let public_pem = std::fs::read(&key.public_key_path).map_err(|e| {
            Error::Config(format!(
                "cannot read public key {}: {e}",
                key.public_key_path.display()
            ))
        })?;
        let local = KeyRing::new();
        local.insert(
            kid,
            VerificationKey::from_pem(key.algorithm, &public_pem)
                .map_err(|e| Error::Config(e.to_string()))?,
        );

        let participants = JwkSetResolver::new();
        for path in &config.participants.jwks_files {
            let added = participants
                .add_file(path)
                .map_err(|e| Error::Config(e.to_string()))?;
            debug!(path = %path.display(), keys = added, "Loaded participant keys");
        }

        Ok(Self::new(
            RefreshSettings::from(config),
            signer,
            Arc::new(local),
            Arc::new(participants),
        ))
    }

    /// Use `store` instead of the in-memory default.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = store;
        self
    }

    /// Use `vault` instead of the in-memory default.
    #[must_use]
    pub fn with_vault(mut self, vault: Arc<dyn SecretVault>) -> Self {
        self.vault = vault;
        self
    }

    /// Use `ledger` instead of the in-memory default.
    #[must_use]
    pub fn with_replay_ledger(mut self, ledger: Arc<dyn ReplayLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    /// The replay ledger (for the background reaper).
    #[must_use]
    pub fn replay_ledger(&self) -> Arc<dyn ReplayLedger> {
        Arc::clone(&self.ledger)
    }

    /// Rules applied to access tokens this service issued.
    #[must_use]
    pub fn access_token_rules(&self) -> Vec<Arc<dyn Rule>> {
        rules::access_token_rules(&self.settings.issuer_id, self.settings.clock_skew.as_secs())
    }

    // ── obtain ───────────────────────────────────────────────────────────────

    /// Issue a credential for `data_address`.
    ///
    /// `properties` must contain `audience`; everything else passes through
    /// to the stored record and the returned credential. A `jti` is generated
    /// when `claims` has none.
    pub async fn obtain(
        &self,
        mut claims: ClaimSet,
        data_address: DataAddress,
        properties: Map<String, Value>,
    ) -> Result<AccessCredential> {
        let audience = properties
            .get(AUDIENCE_PROPERTY)
            .and_then(Value::as_str)
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "Missing required property '{AUDIENCE_PROPERTY}'."
                ))
            })?
            .to_string();

        let id = if let Some(jti) = claims.jti() {
            jti.to_string()
        } else {
            let jti = uuid::Uuid::new_v4().to_string();
            debug!(jti = %jti, "No 'jti' supplied, generated one");
            claims.insert(JTI, jti.clone());
            jti
        };

        let pair = self.generate_pair(&id, &claims, &audience)?;

        let mut stored = properties.clone();
        for key in RESERVED_PROPERTIES {
            stored.remove(key);
        }
        stored.insert(AUDIENCE_PROPERTY.to_string(), Value::from(audience.as_str()));
        stored.insert(AUTH_TYPE_PROPERTY.to_string(), Value::from(BEARER));
        stored.insert(
            REFRESH_DIGEST_PROPERTY.to_string(),
            Value::from(secret_digest(&pair.refresh_token)),
        );

        let process_id = properties
            .get(PROCESS_ID_PROPERTY)
            .and_then(Value::as_str)
            .map(str::to_string);

        self.store
            .create(AccessTokenData::new(
                id.clone(),
                claims,
                data_address,
                stored,
            ))
            .await?;

        if let Err(e) = pair.material.save(self.vault.as_ref(), &id).await {
            warn!(id = %id, error = %e, "Storing refresh material failed, rolling back record");
            if let Err(rollback) = self.store.delete_by_id(&id).await {
                warn!(id = %id, error = %rollback, "Rolling back access token data failed");
            }
            return Err(e.into());
        }

        audit::emit(&AuditEvent::issued(
            &id,
            &audience,
            process_id.as_deref(),
            &pair.access_token,
        ));

        let mut additional = properties;
        additional.remove(REFRESH_DIGEST_PROPERTY);
        additional.insert(
            REFRESH_TOKEN_PROPERTY.to_string(),
            Value::from(pair.refresh_token),
        );
        additional.insert(
            REFRESH_ENDPOINT_PROPERTY.to_string(),
            Value::from(self.settings.refresh_endpoint.as_str()),
        );
        additional.insert(EXPIRES_IN_PROPERTY.to_string(), Value::from(pair.expires_in));
        additional.insert(AUTH_TYPE_PROPERTY.to_string(), Value::from(BEARER));

        Ok(AccessCredential {
            access_token: pair.access_token,
            additional,
        })
    }

    // ── resolve ──────────────────────────────────────────────────────────────

    /// Verify `token` against the local key and `rules`, then load its record.
    ///
    /// Refresh secrets are refused whatever `rules` contains.
    pub async fn resolve(&self, token: &str, rules: &[Arc<dyn Rule>]) -> Result<AccessTokenData> {
        let mut chain: Vec<Arc<dyn Rule>> =
            vec![Arc::new(rules::RejectTokenTypeRule::new(REFRESH_TOKEN_TYPE))];
        chain.extend(rules.iter().cloned());

        let claims = self
            .validator
            .validate(token, self.local_keys.as_ref(), &chain)
            .await?;
        let id = claims.jti().ok_or_else(|| {
            Error::Validation(format!("Required claim '{JTI}' not present on token."))
        })?;
        self.load(id).await
    }

    // ── refresh ──────────────────────────────────────────────────────────────

    /// Exchange `refresh_token` for a new pair.
    ///
    /// `authentication_token` must be signed by the holder the credential was
    /// issued to and embed the current access token in its `token` claim.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        authentication_token: &str,
    ) -> Result<TokenResponse> {
        let mut attempt = RefreshAttempt::default();
        let result = self
            .refresh_inner(refresh_token, authentication_token, &mut attempt)
            .await;
        if let Err(ref e) = result {
            debug!(kind = e.kind(), error = %e, "Refresh rejected");
            audit::emit(&AuditEvent::denied(
                attempt.token_id.as_deref(),
                attempt.principal.as_deref(),
                e.to_string(),
            ));
        }
        result
    }

    async fn refresh_inner(
        &self,
        refresh_token: &str,
        authentication_token: &str,
        attempt: &mut RefreshAttempt,
    ) -> Result<TokenResponse> {
        let leeway = self.settings.clock_skew.as_secs();

        let auth_rules = rules::authentication_token_rules(
            &self.settings.issuer_id,
            Arc::clone(&self.ledger),
            leeway,
        );
        let auth_claims = self
            .validator
            .validate(
                authentication_token,
                self.participant_keys.as_ref(),
                &auth_rules,
            )
            .await
            .map_err(|e| Error::Validation(format!("{AUTHENTICATION_FAILED}{e}")))?;

        let access_token = auth_claims.string_claim(TOKEN).ok_or_else(|| {
            Error::Validation(format!(
                "{AUTHENTICATION_FAILED}Required claim '{TOKEN}' not present on token."
            ))
        })?;
        let principal = auth_claims.issuer().unwrap_or_default();
        attempt.principal = Some(principal.to_string());

        let access_claims = self
            .validator
            .validate(access_token, self.local_keys.as_ref(), &self.access_token_rules())
            .await?;
        let id = access_claims.jti().ok_or_else(|| {
            Error::Validation(format!("Required claim '{JTI}' not present on token."))
        })?;
        attempt.token_id = Some(id.to_string());

        let record = self.load(id).await?;

        if self.settings.enforce_principal_binding && record.audience() != Some(principal) {
            return Err(Error::Validation(format!(
                "Principal '{principal}' is not authorized to refresh this token."
            )));
        }

        self.check_refresh_secret(&record, refresh_token).await?;

        let audience = record.audience().unwrap_or(principal).to_string();
        let pair = self
            .generate_pair(id, &record.claims, &audience)
            .map_err(|e| {
                Error::Generation(format!("Failed to regenerate access/refresh token pair: {e}"))
            })?;

        let mut updated = record;
        updated.additional_properties.insert(
            REFRESH_DIGEST_PROPERTY.to_string(),
            Value::from(secret_digest(&pair.refresh_token)),
        );
        self.store.update(updated).await?;

        pair.material.save(self.vault.as_ref(), id).await?;

        audit::emit(&AuditEvent::refreshed(id, principal, &pair.access_token));

        Ok(TokenResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            expires_in: pair.expires_in,
            token_type: BEARER.to_string(),
        })
    }

    /// The presented secret must be the live one for `record` and its vault
    /// material must not have expired.
    async fn check_refresh_secret(&self, record: &AccessTokenData, presented: &str) -> Result<()> {
        let material = RefreshMaterial::load(self.vault.as_ref(), &record.id)
            .await?
            .ok_or_else(|| {
                Error::Validation(format!(
                    "No refresh token is registered for ID '{}'.",
                    record.id
                ))
            })?;
        if material.is_expired_at(Utc::now()) {
            return Err(Error::Validation(format!(
                "Refresh token for ID '{}' has expired.",
                record.id
            )));
        }

        let expected = record.property(REFRESH_DIGEST_PROPERTY).unwrap_or_default();
        let actual = secret_digest(presented);
        if !bool::from(expected.as_bytes().ct_eq(actual.as_bytes())) {
            return Err(Error::Validation(format!(
                "Refresh token for ID '{}' is invalid or has already been used.",
                record.id
            )));
        }
        Ok(())
    }

    // ── revoke ───────────────────────────────────────────────────────────────

    /// Delete every credential issued for `process_id`. Returns how many were
    /// revoked; an unknown process id revokes nothing and succeeds.
    pub async fn revoke(&self, process_id: &str, reason: &str) -> Result<usize> {
        let spec = QuerySpec::new().with(Criterion::equals(
            format!("additionalProperties.{PROCESS_ID_PROPERTY}"),
            process_id,
        ));
        let records = self.store.query(&spec).await?;

        let mut revoked = 0;
        for record in records {
            if !self.store.delete_by_id(&record.id).await? {
                debug!(id = %record.id, "Access token data already gone");
                continue;
            }
            if let Err(e) = self.vault.delete_secret(&record.id).await {
                warn!(id = %record.id, error = %e, "Failed to delete refresh material");
            }
            audit::emit(&AuditEvent::revoked(&record.id, process_id, reason));
            revoked += 1;
        }

        info!(process_id, revoked, reason, "Revoked access credentials");
        Ok(revoked)
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    async fn load(&self, id: &str) -> Result<AccessTokenData> {
        self.store
            .get_by_id(id)
            .await
            .ok_or_else(|| StoreError::NotFound(id.to_string()).into())
    }

    fn generate_pair(&self, id: &str, claims: &ClaimSet, audience: &str) -> Result<TokenPair> {
        let now = now_epoch_secs();
        let expires_in = self.settings.token_ttl.as_secs();
        let refresh_ttl = self.settings.refresh_token_ttl.as_secs();

        let access_claims = claims
            .clone()
            .with(JTI, id)
            .with(ISS, self.settings.issuer_id.as_str())
            .with(SUB, self.settings.issuer_id.as_str())
            .with(AUD, audience)
            .with(IAT, now)
            .with(EXP, now + expires_in);
        let access_token = self
            .generator
            .generate(&access_claims, &HeaderParams::default())
            .map_err(|e| Error::Generation(format!("Could not generate access token: {e}")))?;

        let refresh_claims = ClaimSet::new()
            .with(JTI, id)
            .with(IAT, now)
            .with(EXP, now + refresh_ttl)
            .with(NONCE, random_nonce());
        let refresh_token = self
            .generator
            .generate(&refresh_claims, &HeaderParams::typed(REFRESH_TOKEN_TYPE))
            .map_err(|e| Error::Generation(format!("Could not generate refresh token: {e}")))?;

        let expires_at = TimeDelta::from_std(self.settings.refresh_token_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let material = RefreshMaterial {
            value: refresh_token.clone(),
            expires_at,
            refresh_endpoint: self.settings.refresh_endpoint.clone(),
        };

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in,
            material,
        })
    }
}

/// 128 random bits, URL-safe base64.
fn random_nonce() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

fn secret_digest(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}
