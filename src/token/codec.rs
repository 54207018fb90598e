//! Signed-token codec: compact JWS generation and validation.
//!
//! # Validation flow
//!
//! 1. Decode the JOSE header (no verification) to extract `kid` and `alg`.
//! 2. Resolve the public key for `kid` through the supplied resolver.
//! 3. Verify the signature. Registered-claim checks of `jsonwebtoken` are
//!    switched off: `exp`, `nbf`, `aud` and friends are the job of the rule
//!    chain so that every failure carries its own reason.
//! 4. Run the rule chain and merge all failures.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header, Validation};
use serde::Serialize;
use tracing::debug;

use super::TokenError;
use super::claims::{ClaimSet, now_epoch_secs};
use super::keys::{PublicKeyResolver, SigningKeyProvider};
use crate::rules::{self, Rule, RuleContext};

/// Reason reported when the signature does not verify.
pub const VERIFICATION_FAILED: &str = "Token verification failed";

/// `typ` header of refresh secrets. Access tokens use the default `JWT`.
pub const REFRESH_TOKEN_TYPE: &str = "refresh+jwt";

/// Optional JOSE header parameters for [`TokenGenerator::generate`].
///
/// `alg` and `kid` always come from the signing key.
#[derive(Debug, Clone, Default)]
pub struct HeaderParams {
    /// Media type (`typ`); defaults to `JWT`.
    pub typ: Option<String>,
    /// Content type (`cty`).
    pub cty: Option<String>,
}

impl HeaderParams {
    /// Header with an explicit `typ`.
    #[must_use]
    pub fn typed(typ: impl Into<String>) -> Self {
        Self {
            typ: Some(typ.into()),
            cty: None,
        }
    }
}

/// The parts of a JOSE header the rule chain looks at.
#[derive(Debug, Clone, Serialize)]
pub struct TokenHeader {
    /// Signature algorithm.
    pub algorithm: Algorithm,
    /// Key id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Media type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// `true` when the header ships its own public key (`jwk`).
    pub embedded_jwk: bool,
}

impl From<&Header> for TokenHeader {
    fn from(header: &Header) -> Self {
        Self {
            algorithm: header.alg,
            kid: header.kid.clone(),
            typ: header.typ.clone(),
            embedded_jwk: header.jwk.is_some(),
        }
    }
}

/// Signs claim sets with the issuer's private key.
#[derive(Clone)]
pub struct TokenGenerator {
    signer: Arc<dyn SigningKeyProvider>,
}

impl TokenGenerator {
    /// Create a generator around a signing key provider.
    #[must_use]
    pub fn new(signer: Arc<dyn SigningKeyProvider>) -> Self {
        Self { signer }
    }

    /// Sign `claims` and return the compact serialization.
    pub fn generate(&self, claims: &ClaimSet, params: &HeaderParams) -> Result<String, TokenError> {
        let key = self.signer.signing_key()?;

        let mut header = Header::new(key.algorithm());
        header.kid = Some(key.kid().to_string());
        header.typ = Some(params.typ.clone().unwrap_or_else(|| "JWT".to_string()));
        header.cty.clone_from(&params.cty);

        jsonwebtoken::encode(&header, claims, key.encoding_key())
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

/// Verifies signatures and applies a rule chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenValidator;

impl TokenValidator {
    /// Create a validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate `token` against keys from `resolver` and the given rules.
    ///
    /// Returns the verified claim set, or the first structural/signature
    /// failure, or the merged failures of all rules.
    pub async fn validate(
        &self,
        token: &str,
        resolver: &dyn PublicKeyResolver,
        rules: &[Arc<dyn Rule>],
    ) -> Result<ClaimSet, TokenError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| TokenError::Malformed("token header has no 'kid'".to_string()))?;

        let key = resolver.resolve_key(kid).await.map_err(|e| {
            debug!(kid = %kid, error = %e, "Public key resolution failed");
            TokenError::Verification(e.to_string())
        })?;

        if !key.supports(header.alg) {
            debug!(kid = %kid, alg = ?header.alg, accepted = ?key.algorithms(), "Algorithm not accepted for key");
            return Err(TokenError::Verification(VERIFICATION_FAILED.to_string()));
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims::<&str>(&[]);

        let claims = jsonwebtoken::decode::<ClaimSet>(token, key.decoding_key(), &validation)
            .map_err(|e| {
                debug!(kid = %kid, error = %e, "Signature verification failed");
                TokenError::Verification(VERIFICATION_FAILED.to_string())
            })?
            .claims;

        let header = TokenHeader::from(&header);
        let ctx = RuleContext {
            header: &header,
            now: now_epoch_secs(),
        };
        rules::evaluate(rules, &claims, &ctx).map_err(TokenError::Rules)?;

        Ok(claims)
    }
}

/// Decode header and claims without verifying anything.
///
/// For diagnostics and for reading routing information (such as the `iss` of
/// an access token a holder wants to refresh). Never trust the result.
pub fn decode_unverified(token: &str) -> Result<(TokenHeader, ClaimSet), TokenError> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| TokenError::Malformed(e.to_string()))?;

    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| TokenError::Malformed("token has no payload segment".to_string()))?;
    let bytes = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, payload)
        .map_err(|e| TokenError::Malformed(format!("invalid payload encoding: {e}")))?;
    let claims: ClaimSet = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("invalid payload JSON: {e}")))?;

    Ok((TokenHeader::from(&header), claims))
}
