//! Claim sets carried by access, refresh and authentication tokens.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Token identifier.
pub const JTI: &str = "jti";
/// Issuer.
pub const ISS: &str = "iss";
/// Subject.
pub const SUB: &str = "sub";
/// Audience (string or array).
pub const AUD: &str = "aud";
/// Expiry (Unix seconds).
pub const EXP: &str = "exp";
/// Issued-at (Unix seconds).
pub const IAT: &str = "iat";
/// Not-before (Unix seconds).
pub const NBF: &str = "nbf";
/// Embedded access token presented inside an authentication token.
pub const TOKEN: &str = "token";
/// Self-attested public key; never trusted.
pub const SUB_JWK: &str = "sub_jwk";
/// Random salt on refresh secrets.
pub const NONCE: &str = "nonce";

/// A decoded JWT payload.
///
/// Values keep their JSON type (string, number, list); accessors return
/// `None` when a claim is absent or has an unexpected type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(Map<String, Value>);

impl ClaimSet {
    /// Create an empty claim set.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or overwrite a claim.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Remove a claim, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Raw claim value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// `true` if the claim exists and is not JSON `null`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|v| !v.is_null())
    }

    /// String claim value.
    #[must_use]
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// Numeric claim value, truncated to whole seconds.
    ///
    /// Accepts integers and floats since some issuers emit fractional epochs.
    #[must_use]
    pub fn numeric_claim(&self, name: &str) -> Option<u64> {
        let value = self.0.get(name)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    }

    /// Audience values; a single string is returned as a one-element list.
    #[must_use]
    pub fn audiences(&self) -> Vec<&str> {
        match self.0.get(AUD) {
            Some(Value::String(s)) => vec![s.as_str()],
            Some(Value::Array(arr)) => arr.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Token id (`jti`).
    #[must_use]
    pub fn jti(&self) -> Option<&str> {
        self.string_claim(JTI)
    }

    /// Issuer (`iss`).
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.string_claim(ISS)
    }

    /// Subject (`sub`).
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.string_claim(SUB)
    }

    /// Iterate over all claims.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of claims.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when no claims are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying JSON map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for ClaimSet {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<ClaimSet> for Map<String, Value> {
    fn from(claims: ClaimSet) -> Self {
        claims.0
    }
}

impl FromIterator<(String, Value)> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Current Unix time in seconds.
#[must_use]
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
