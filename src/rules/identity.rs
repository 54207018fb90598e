//! Rules about who issued a token, for whom, and with which key.

use super::{Rule, RuleContext, RuleOutcome};
use crate::token::{ClaimSet, claims};

/// `iss` and `sub` must both be present and identical (self-issued token).
#[derive(Debug, Clone, Copy, Default)]
pub struct IssuerEqualsSubjectRule;

impl Rule for IssuerEqualsSubjectRule {
    fn evaluate(&self, claims: &ClaimSet, _ctx: &RuleContext<'_>) -> RuleOutcome {
        match (claims.issuer(), claims.subject()) {
            (Some(iss), Some(sub)) if iss == sub => Ok(()),
            (Some(_), Some(_)) => {
                Err("The 'iss' and 'sub' claims must be identical.".to_string())
            }
            _ => Err("The 'iss' and 'sub' claims must both be present.".to_string()),
        }
    }
}

/// `sub` must be present and non-blank.
#[derive(Debug, Clone, Copy, Default)]
pub struct HasSubjectRule;

impl Rule for HasSubjectRule {
    fn evaluate(&self, claims: &ClaimSet, _ctx: &RuleContext<'_>) -> RuleOutcome {
        match claims.subject() {
            Some(sub) if !sub.trim().is_empty() => Ok(()),
            _ => Err("The 'sub' claim is missing or blank.".to_string()),
        }
    }
}

/// The token must not ship its own public key.
///
/// Keys are always resolved by `kid`; a key embedded in the header (`jwk`) or
/// in the `sub_jwk` claim would let the holder vouch for itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEmbeddedKeyRule;

impl Rule for NoEmbeddedKeyRule {
    fn evaluate(&self, claims: &ClaimSet, ctx: &RuleContext<'_>) -> RuleOutcome {
        if ctx.header.embedded_jwk {
            return Err("The token header must not contain a 'jwk'.".to_string());
        }
        if claims.contains(claims::SUB_JWK) {
            return Err(format!("The '{}' claim is not allowed.", claims::SUB_JWK));
        }
        Ok(())
    }
}

/// The signing key id must belong to the issuer.
///
/// Accepts `kid == iss` or a DID URL under the issuer (`<iss>#<fragment>`).
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyIdIssuerRule;

impl Rule for KeyIdIssuerRule {
    fn evaluate(&self, claims: &ClaimSet, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(kid) = ctx.header.kid.as_deref() else {
            return Err("The token header has no 'kid'.".to_string());
        };
        let Some(iss) = claims.issuer() else {
            return Err("The 'iss' claim is missing.".to_string());
        };

        let scoped = kid == iss
            || kid
                .strip_prefix(iss)
                .and_then(|rest| rest.strip_prefix('#'))
                .is_some_and(|fragment| !fragment.is_empty());
        if scoped {
            Ok(())
        } else {
            Err(format!("Key ID '{kid}' does not belong to issuer '{iss}'."))
        }
    }
}

/// `iss` must name this system.
#[derive(Debug, Clone)]
pub struct IssuerRule {
    expected: String,
}

impl IssuerRule {
    /// Require `iss == expected`.
    #[must_use]
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl Rule for IssuerRule {
    fn evaluate(&self, claims: &ClaimSet, _ctx: &RuleContext<'_>) -> RuleOutcome {
        match claims.issuer() {
            Some(iss) if iss == self.expected => Ok(()),
            Some(iss) => Err(format!(
                "Token issuer '{iss}' does not match '{}'.",
                self.expected
            )),
            None => Err(format!("Required claim '{}' not present on token.", claims::ISS)),
        }
    }
}

/// The `typ` header must not be `rejected`.
///
/// Keeps refresh secrets, which are signed with the same key as access
/// tokens, from being presented where an access token is expected.
#[derive(Debug, Clone)]
pub struct RejectTokenTypeRule {
    rejected: String,
}

impl RejectTokenTypeRule {
    /// Reject tokens whose `typ` equals `rejected` (ASCII case-insensitive).
    #[must_use]
    pub fn new(rejected: impl Into<String>) -> Self {
        Self {
            rejected: rejected.into(),
        }
    }
}

impl Rule for RejectTokenTypeRule {
    fn evaluate(&self, _claims: &ClaimSet, ctx: &RuleContext<'_>) -> RuleOutcome {
        match ctx.header.typ.as_deref() {
            Some(typ) if typ.eq_ignore_ascii_case(&self.rejected) => {
                Err(format!("Token type '{typ}' is not accepted here."))
            }
            _ => Ok(()),
        }
    }
}

/// `aud` (string or array) must contain the expected audience.
#[derive(Debug, Clone)]
pub struct AudienceRule {
    expected: String,
}

impl AudienceRule {
    /// Require `expected` among the token's audiences.
    #[must_use]
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl Rule for AudienceRule {
    fn evaluate(&self, claims: &ClaimSet, _ctx: &RuleContext<'_>) -> RuleOutcome {
        if claims.audiences().contains(&self.expected.as_str()) {
            Ok(())
        } else {
            Err(format!(
                "Token audience does not contain '{}'.",
                self.expected
            ))
        }
    }
}

/// A named claim must be present (and not `null`).
#[derive(Debug, Clone)]
pub struct ClaimIsPresentRule {
    claim: String,
}

impl ClaimIsPresentRule {
    /// Require `claim`.
    #[must_use]
    pub fn new(claim: impl Into<String>) -> Self {
        Self {
            claim: claim.into(),
        }
    }
}

impl Rule for ClaimIsPresentRule {
    fn evaluate(&self, claims: &ClaimSet, _ctx: &RuleContext<'_>) -> RuleOutcome {
        if claims.contains(&self.claim) {
            Ok(())
        } else {
            Err(format!("Required claim '{}' not present on token.", self.claim))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::header;
    use crate::token::claims::{AUD, ISS, SUB, SUB_JWK, TOKEN};
    use serde_json::json;

    fn check(rule: &dyn Rule, claims: &ClaimSet, kid: Option<&str>) -> RuleOutcome {
        let header = header(kid);
        rule.evaluate(claims, &RuleContext { header: &header, now: 0 })
    }

    #[test]
    fn issuer_equals_subject() {
        let same = ClaimSet::new().with(ISS, "did:web:bob").with(SUB, "did:web:bob");
        assert!(check(&IssuerEqualsSubjectRule, &same, None).is_ok());

        let different = ClaimSet::new().with(ISS, "did:web:bob").with(SUB, "did:web:trudy");
        assert!(check(&IssuerEqualsSubjectRule, &different, None).is_err());

        let missing = ClaimSet::new().with(ISS, "did:web:bob");
        assert!(check(&IssuerEqualsSubjectRule, &missing, None).is_err());
    }

    #[test]
    fn issuer_must_be_the_expected_one() {
        let rule = IssuerRule::new("did:web:provider");
        assert!(check(&rule, &ClaimSet::new().with(ISS, "did:web:provider"), None).is_ok());

        let err = check(&rule, &ClaimSet::new().with(ISS, "did:web:trudy"), None).unwrap_err();
        assert_eq!(err, "Token issuer 'did:web:trudy' does not match 'did:web:provider'.");

        let err = check(&rule, &ClaimSet::new(), None).unwrap_err();
        assert_eq!(err, "Required claim 'iss' not present on token.");
    }

    #[test]
    fn rejected_token_type_is_refused() {
        // GIVEN: a rule refusing refresh secrets
        let rule = RejectTokenTypeRule::new("refresh+jwt");

        // WHEN/THEN: a plain JWT passes, the refresh type does not
        assert!(check(&rule, &ClaimSet::new(), None).is_ok());

        let mut refresh = header(None);
        refresh.typ = Some("Refresh+JWT".to_string());
        let outcome = rule.evaluate(&ClaimSet::new(), &RuleContext { header: &refresh, now: 0 });
        assert_eq!(
            outcome.unwrap_err(),
            "Token type 'Refresh+JWT' is not accepted here."
        );
    }

    #[test]
    fn has_subject_rejects_blank() {
        assert!(check(&HasSubjectRule, &ClaimSet::new().with(SUB, "x"), None).is_ok());
        assert!(check(&HasSubjectRule, &ClaimSet::new().with(SUB, "  "), None).is_err());
        assert!(check(&HasSubjectRule, &ClaimSet::new(), None).is_err());
    }

    #[test]
    fn embedded_keys_are_rejected() {
        let claims = ClaimSet::new().with(SUB_JWK, json!({"kty": "EC"}));
        assert!(check(&NoEmbeddedKeyRule, &claims, None).is_err());

        let mut with_jwk = header(None);
        with_jwk.embedded_jwk = true;
        let outcome = NoEmbeddedKeyRule.evaluate(
            &ClaimSet::new(),
            &RuleContext { header: &with_jwk, now: 0 },
        );
        assert!(outcome.is_err());

        assert!(check(&NoEmbeddedKeyRule, &ClaimSet::new(), None).is_ok());
    }

    #[test]
    fn kid_must_be_scoped_under_issuer() {
        let claims = ClaimSet::new().with(ISS, "did:web:bob");

        assert!(check(&KeyIdIssuerRule, &claims, Some("did:web:bob#key-1")).is_ok());
        assert!(check(&KeyIdIssuerRule, &claims, Some("did:web:bob")).is_ok());
        assert!(check(&KeyIdIssuerRule, &claims, Some("did:web:trudy#key-1")).is_err());
        // prefix match alone is not enough
        assert!(check(&KeyIdIssuerRule, &claims, Some("did:web:bobby#key-1")).is_err());
        assert!(check(&KeyIdIssuerRule, &claims, Some("did:web:bob#")).is_err());
        assert!(check(&KeyIdIssuerRule, &claims, None).is_err());
    }

    #[test]
    fn audience_matches_string_or_array() {
        let rule = AudienceRule::new("did:web:alice");
        assert!(check(&rule, &ClaimSet::new().with(AUD, "did:web:alice"), None).is_ok());
        assert!(check(&rule, &ClaimSet::new().with(AUD, json!(["x", "did:web:alice"])), None).is_ok());
        assert!(check(&rule, &ClaimSet::new().with(AUD, "did:web:carol"), None).is_err());
        assert!(check(&rule, &ClaimSet::new(), None).is_err());
    }

    #[test]
    fn claim_is_present_message() {
        let err = check(&ClaimIsPresentRule::new(TOKEN), &ClaimSet::new(), None).unwrap_err();
        assert_eq!(err, "Required claim 'token' not present on token.");
    }
}
