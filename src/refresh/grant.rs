//! Refresh grant surface, independent of any HTTP framework.
//!
//! # Provider side
//!
//! A holder refreshes a credential by posting a form to the refresh endpoint:
//!
//! ```text
//! POST /token
//! Authorization: <authentication token>
//! Content-Type: application/x-www-form-urlencoded
//!
//! grant_type=refresh_token&refresh_token=<refresh secret>
//! ```
//!
//! [`RefreshGrantRequest::parse`] checks those three inputs and hands back the
//! pair the service needs, or a [`GrantError`] with a status hint for the
//! transport to map.
//!
//! # Holder side
//!
//! [`HolderRefreshRequest::build`] produces the same three inputs from a
//! credential: it signs a fresh authentication token (`iss = sub = holder`,
//! `aud = issuer of the access token`) that embeds the access token.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::{AccessCredential, TokenRefreshService, TokenResponse};
use crate::token::claims::{AUD, EXP, IAT, ISS, JTI, SUB, TOKEN, now_epoch_secs};
use crate::token::{ClaimSet, HeaderParams, SigningKeyProvider, TokenGenerator, decode_unverified};
use crate::{Error, Result};

/// The only grant type accepted by the refresh endpoint.
pub const REFRESH_TOKEN_GRANT: &str = "refresh_token";

/// Path segment of the refresh endpoint.
pub const TOKEN_PATH: &str = "/token";

/// Lifetime of holder-built authentication tokens.
pub const AUTHENTICATION_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// Reasons a refresh request is rejected before reaching the service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrantError {
    /// `grant_type` absent.
    #[error("Parameter 'grant_type' is required.")]
    MissingGrantType,

    /// `grant_type` is not `refresh_token`.
    #[error("Unsupported grant type '{0}', expected 'refresh_token'.")]
    UnsupportedGrantType(String),

    /// `refresh_token` absent or blank.
    #[error("Parameter 'refresh_token' is required.")]
    MissingRefreshToken,

    /// No `Authorization` header.
    #[error("Authorization header is required.")]
    MissingAuthorization,
}

impl GrantError {
    /// HTTP status the transport should answer with.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingAuthorization => 401,
            Self::MissingGrantType | Self::UnsupportedGrantType(_) | Self::MissingRefreshToken => {
                400
            }
        }
    }
}

impl From<GrantError> for Error {
    fn from(err: GrantError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// A syntactically valid refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshGrantRequest {
    /// The presented refresh secret.
    pub refresh_token: String,
    /// The holder's signed authentication token.
    pub authentication_token: String,
}

impl RefreshGrantRequest {
    /// Check the form parameters and `Authorization` header of a refresh call.
    ///
    /// A leading `Bearer ` on the header is tolerated and stripped.
    pub fn parse(
        grant_type: Option<&str>,
        refresh_token: Option<&str>,
        authorization: Option<&str>,
    ) -> std::result::Result<Self, GrantError> {
        let grant_type = grant_type.ok_or(GrantError::MissingGrantType)?;
        if grant_type != REFRESH_TOKEN_GRANT {
            return Err(GrantError::UnsupportedGrantType(grant_type.to_string()));
        }

        let refresh_token = refresh_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GrantError::MissingRefreshToken)?;

        let authentication_token = authorization
            .map(strip_bearer)
            .filter(|t| !t.is_empty())
            .ok_or(GrantError::MissingAuthorization)?;

        Ok(Self {
            refresh_token: refresh_token.to_string(),
            authentication_token: authentication_token.to_string(),
        })
    }

    /// Run the refresh against `service`.
    pub async fn execute(&self, service: &TokenRefreshService) -> Result<TokenResponse> {
        service
            .refresh(&self.refresh_token, &self.authentication_token)
            .await
    }
}

/// Drop a leading `Bearer` scheme (any case) and surrounding whitespace.
fn strip_bearer(header: &str) -> &str {
    let header = header.trim();
    match header.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer") => {
            let rest = &header[6..];
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                rest.trim()
            } else {
                header
            }
        }
        _ => header,
    }
}

/// The refresh endpoint URL for a configured base: `/token` is appended
/// unless already present.
#[must_use]
pub fn refresh_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with(TOKEN_PATH) {
        base.to_string()
    } else {
        format!("{base}{TOKEN_PATH}")
    }
}

/// Everything a holder sends to refresh one credential.
#[derive(Debug, Clone, Serialize)]
pub struct HolderRefreshRequest {
    /// Where to send the request.
    #[serde(skip)]
    pub url: String,
    /// Always `refresh_token`.
    pub grant_type: &'static str,
    /// The refresh secret from the credential.
    pub refresh_token: String,
    /// Value for the `Authorization` header.
    #[serde(skip)]
    pub authorization: String,
}

impl HolderRefreshRequest {
    /// Build a refresh request for `credential` on behalf of `holder_id`.
    ///
    /// The authentication token is addressed to the issuer of the access
    /// token, read from its (unverified) `iss` claim.
    pub fn build(
        credential: &AccessCredential,
        holder_id: &str,
        signer: Arc<dyn SigningKeyProvider>,
    ) -> Result<Self> {
        let refresh_token = credential.refresh_token().ok_or_else(|| {
            Error::InvalidRequest("Credential carries no refresh token.".to_string())
        })?;
        let endpoint = credential.refresh_endpoint().ok_or_else(|| {
            Error::InvalidRequest("Credential carries no refresh endpoint.".to_string())
        })?;

        let (_, access_claims) = decode_unverified(&credential.access_token)?;
        let issuer = access_claims.issuer().ok_or_else(|| {
            Error::InvalidRequest("Access token has no 'iss' claim.".to_string())
        })?;

        let now = now_epoch_secs();
        let claims = ClaimSet::new()
            .with(JTI, uuid::Uuid::new_v4().to_string())
            .with(ISS, holder_id)
            .with(SUB, holder_id)
            .with(AUD, issuer)
            .with(IAT, now)
            .with(EXP, now + AUTHENTICATION_TOKEN_TTL.as_secs())
            .with(TOKEN, credential.access_token.as_str());

        let authorization =
            TokenGenerator::new(signer).generate(&claims, &HeaderParams::default())?;

        Ok(Self {
            url: refresh_url(endpoint),
            grant_type: REFRESH_TOKEN_GRANT,
            refresh_token: refresh_token.to_string(),
            authorization,
        })
    }

    /// Form body of the request.
    #[must_use]
    pub fn form(&self) -> [(&'static str, &str); 2] {
        [
            ("grant_type", self.grant_type),
            ("refresh_token", self.refresh_token.as_str()),
        ]
    }

    /// Feed the request straight into a provider-side parser.
    pub fn to_grant(&self) -> std::result::Result<RefreshGrantRequest, GrantError> {
        RefreshGrantRequest::parse(
            Some(self.grant_type),
            Some(&self.refresh_token),
            Some(&self.authorization),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_accepts_well_formed_request() {
        let req = RefreshGrantRequest::parse(
            Some("refresh_token"),
            Some("secret"),
            Some("Bearer auth.jwt.sig"),
        )
        .unwrap();
        assert_eq!(req.refresh_token, "secret");
        assert_eq!(req.authentication_token, "auth.jwt.sig");

        // raw header without the Bearer prefix
        let raw = RefreshGrantRequest::parse(Some("refresh_token"), Some("s"), Some("a.b.c")).unwrap();
        assert_eq!(raw.authentication_token, "a.b.c");
    }

    #[test]
    fn parse_rejects_wrong_grant_type_with_400() {
        let err =
            RefreshGrantRequest::parse(Some("client_credentials"), Some("s"), Some("a")).unwrap_err();
        assert_eq!(err, GrantError::UnsupportedGrantType("client_credentials".to_string()));
        assert_eq!(err.status(), 400);

        let err = RefreshGrantRequest::parse(None, Some("s"), Some("a")).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn parse_rejects_blank_refresh_token_with_400() {
        let err = RefreshGrantRequest::parse(Some("refresh_token"), Some("  "), Some("a")).unwrap_err();
        assert_eq!(err, GrantError::MissingRefreshToken);
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn parse_rejects_missing_authorization_with_401() {
        let err = RefreshGrantRequest::parse(Some("refresh_token"), Some("s"), None).unwrap_err();
        assert_eq!(err, GrantError::MissingAuthorization);
        assert_eq!(err.status(), 401);

        let err =
            RefreshGrantRequest::parse(Some("refresh_token"), Some("s"), Some("Bearer ")).unwrap_err();
        assert_eq!(err, GrantError::MissingAuthorization);
        assert_eq!(err.status(), 401);
    }

    #[test]
    fn bare_bearer_scheme_is_not_a_token() {
        // GIVEN: headers that carry the scheme but no credential
        for header in ["Bearer", "bearer   ", "  BEARER\t"] {
            // WHEN: parsed
            let err = RefreshGrantRequest::parse(Some("refresh_token"), Some("s"), Some(header))
                .unwrap_err();

            // THEN: it is treated as missing
            assert_eq!(err, GrantError::MissingAuthorization, "{header:?}");
        }
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let req =
            RefreshGrantRequest::parse(Some("refresh_token"), Some("s"), Some("bearer  a.b.c "))
                .unwrap();
        assert_eq!(req.authentication_token, "a.b.c");

        // a token that merely starts with the letters is kept whole
        let req =
            RefreshGrantRequest::parse(Some("refresh_token"), Some("s"), Some("Bearerish.b.c"))
                .unwrap();
        assert_eq!(req.authentication_token, "Bearerish.b.c");
    }

    #[test]
    fn refresh_url_appends_token_path_once() {
        assert_eq!(refresh_url("https://p.example/api/public"), "https://p.example/api/public/token");
        assert_eq!(refresh_url("https://p.example/api/public/"), "https://p.example/api/public/token");
        assert_eq!(refresh_url("https://p.example/api/public/token"), "https://p.example/api/public/token");
    }

    #[test]
    fn grant_error_becomes_invalid_request() {
        let err: Error = GrantError::MissingRefreshToken.into();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
