//! Signed tokens: claim sets, key material and the JWS codec.

pub mod claims;
pub mod codec;
pub mod keys;

pub use claims::ClaimSet;
pub use codec::{
    HeaderParams, REFRESH_TOKEN_TYPE, TokenGenerator, TokenHeader, TokenValidator, decode_unverified,
};
pub use keys::{
    GeneratedKeyPair, JwkSetResolver, KeyError, KeyRing, PemFileSigningKey, PublicKeyResolver,
    SigningKey, SigningKeyProvider, VerificationKey,
};

/// Token encoding and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Not a compact JWS, or header/payload cannot be decoded.
    #[error("Token could not be decoded: {0}")]
    Malformed(String),

    /// Key resolution or signature verification failed.
    #[error("{0}")]
    Verification(String),

    /// One or more validation rules failed.
    #[error("{}", .0.join(", "))]
    Rules(Vec<String>),

    /// The signing key could not be obtained.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// The signer rejected the claims or key.
    #[error("Token signing failed: {0}")]
    Signing(String),
}
