//! Validation rule chain: composable predicates over a verified claim set.
//!
//! # Design
//!
//! A rule is a single check with a human-readable failure reason. Chains are
//! plain slices of `Arc<dyn Rule>`; callers build them by concatenating the
//! ready-made sets below with whatever extra rules their context needs.
//!
//! **Every** rule in a chain runs and all failures are reported together.
//!
//! | Set | Rules |
//! |-----|-------|
//! | [`access_token_rules`] | not a refresh secret, issued by this system, audience present, expiration/issued-at, not-before |
//! | [`authentication_token_rules`] | issuer = subject, no embedded key, expiration/issued-at, not-before, has subject, one-time use, `kid` scoped under issuer, audience, `token` claim present |

pub mod identity;
pub mod replay;
pub mod temporal;

use std::sync::Arc;

use crate::replay::ReplayLedger;
use crate::token::{ClaimSet, REFRESH_TOKEN_TYPE, TokenHeader, claims};

pub use identity::{
    AudienceRule, ClaimIsPresentRule, HasSubjectRule, IssuerEqualsSubjectRule, IssuerRule,
    KeyIdIssuerRule, NoEmbeddedKeyRule, RejectTokenTypeRule,
};
pub use replay::OneTimeUseRule;
pub use temporal::{ExpirationRule, NotBeforeRule};

/// Outcome of a single rule: `Err` carries the failure reason.
pub type RuleOutcome = Result<(), String>;

/// Context shared by all rules of one validation run.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// Decoded JOSE header of the token under validation.
    pub header: &'a TokenHeader,
    /// Evaluation time (Unix seconds).
    pub now: u64,
}

/// A single validation predicate.
pub trait Rule: Send + Sync {
    /// Check `claims`; return the reason on failure.
    fn evaluate(&self, claims: &ClaimSet, ctx: &RuleContext<'_>) -> RuleOutcome;
}

/// Run every rule and merge the failures.
pub fn evaluate(
    rules: &[Arc<dyn Rule>],
    claims: &ClaimSet,
    ctx: &RuleContext<'_>,
) -> Result<(), Vec<String>> {
    let failures: Vec<String> = rules
        .iter()
        .filter_map(|rule| rule.evaluate(claims, ctx).err())
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

/// Rules for access tokens this system issued itself. `issuer` is this
/// system's own identifier.
///
/// The signature is checked by the codec against the local key resolver.
/// Refresh secrets share that key, so they are told apart by `typ` and by
/// their missing `iss`/`aud`.
#[must_use]
pub fn access_token_rules(issuer: &str, leeway_secs: u64) -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(RejectTokenTypeRule::new(REFRESH_TOKEN_TYPE)),
        Arc::new(IssuerRule::new(issuer)),
        Arc::new(ClaimIsPresentRule::new(claims::AUD)),
        Arc::new(ExpirationRule::new(leeway_secs)),
        Arc::new(NotBeforeRule::new(leeway_secs)),
    ]
}

/// Rules for the self-signed authentication token a holder presents to
/// `refresh`. `audience` is this system's own identifier.
#[must_use]
pub fn authentication_token_rules(
    audience: &str,
    ledger: Arc<dyn ReplayLedger>,
    leeway_secs: u64,
) -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(IssuerEqualsSubjectRule),
        Arc::new(NoEmbeddedKeyRule),
        Arc::new(ExpirationRule::new(leeway_secs)),
        Arc::new(NotBeforeRule::new(leeway_secs)),
        Arc::new(HasSubjectRule),
        Arc::new(OneTimeUseRule::new(ledger, leeway_secs)),
        Arc::new(KeyIdIssuerRule),
        Arc::new(AudienceRule::new(audience)),
        Arc::new(ClaimIsPresentRule::new(claims::TOKEN)),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use jsonwebtoken::Algorithm;

    use crate::token::TokenHeader;

    pub fn header(kid: Option<&str>) -> TokenHeader {
        TokenHeader {
            algorithm: Algorithm::ES256,
            kid: kid.map(str::to_string),
            typ: Some("JWT".to_string()),
            embedded_jwk: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::InMemoryReplayLedger;
    use crate::token::claims::{AUD, EXP, IAT, ISS, JTI, SUB, TOKEN, now_epoch_secs};

    fn valid_auth_claims(now: u64) -> ClaimSet {
        ClaimSet::new()
            .with(JTI, "auth-jti-1")
            .with(ISS, "did:web:bob")
            .with(SUB, "did:web:bob")
            .with(AUD, "did:web:alice")
            .with(IAT, now)
            .with(EXP, now + 60)
            .with(TOKEN, "header.payload.signature")
    }

    #[test]
    fn authentication_rules_accept_well_formed_token() {
        // GIVEN: a complete authentication token claim set
        let now = now_epoch_secs();
        let ledger = Arc::new(InMemoryReplayLedger::new());
        let rules = authentication_token_rules("did:web:alice", ledger, 60);
        let header = test_support::header(Some("did:web:bob#key-1"));
        let ctx = RuleContext { header: &header, now };

        // WHEN/THEN: all rules pass
        assert_eq!(evaluate(&rules, &valid_auth_claims(now), &ctx), Ok(()));
    }

    #[test]
    fn authentication_rules_report_every_failure() {
        // GIVEN: a token with mismatched iss/sub, wrong audience and no embedded token
        let now = now_epoch_secs();
        let ledger = Arc::new(InMemoryReplayLedger::new());
        let rules = authentication_token_rules("did:web:alice", ledger, 60);
        let header = test_support::header(Some("did:web:bob#key-1"));
        let ctx = RuleContext { header: &header, now };

        let mut claims = valid_auth_claims(now)
            .with(SUB, "did:web:trudy")
            .with(AUD, "did:web:carol");
        claims.remove(TOKEN);

        // WHEN: evaluated
        let failures = evaluate(&rules, &claims, &ctx).unwrap_err();

        // THEN: three independent reasons are returned
        assert_eq!(failures.len(), 3, "{failures:?}");
        assert!(failures.iter().any(|f| f.contains("'iss'")));
        assert!(failures.iter().any(|f| f.contains("audience")));
        assert!(failures.iter().any(|f| f.contains("'token'")));
    }

    fn access_claims(now: u64) -> ClaimSet {
        ClaimSet::new()
            .with(JTI, "t1")
            .with(ISS, "did:web:alice")
            .with(SUB, "did:web:alice")
            .with(AUD, "did:web:bob")
            .with(EXP, now + 300)
    }

    #[test]
    fn access_rules_check_the_validity_window() {
        let now = now_epoch_secs();
        let rules = access_token_rules("did:web:alice", 0);
        let header = test_support::header(None);
        let ctx = RuleContext { header: &header, now };

        assert!(evaluate(&rules, &access_claims(now), &ctx).is_ok());

        let stale = access_claims(now).with(EXP, now - 1);
        assert!(evaluate(&rules, &stale, &ctx).is_err());
    }

    #[test]
    fn access_rules_reject_refresh_secrets() {
        // GIVEN: the claim shape of a refresh secret under its own header type
        let now = now_epoch_secs();
        let rules = access_token_rules("did:web:alice", 0);
        let mut header = test_support::header(None);
        header.typ = Some(REFRESH_TOKEN_TYPE.to_string());
        let ctx = RuleContext { header: &header, now };
        let secret = ClaimSet::new().with(JTI, "t1").with(IAT, now).with(EXP, now + 300);

        // WHEN: evaluated as an access token
        let failures = evaluate(&rules, &secret, &ctx).unwrap_err();

        // THEN: type, issuer and audience all fail
        assert_eq!(failures.len(), 3, "{failures:?}");
        assert!(failures.iter().any(|f| f.contains(REFRESH_TOKEN_TYPE)));
        assert!(failures.iter().any(|f| f.contains("'iss'")));
        assert!(failures.iter().any(|f| f.contains("'aud'")));
    }

    #[test]
    fn access_rules_reject_foreign_issuers() {
        let now = now_epoch_secs();
        let rules = access_token_rules("did:web:alice", 0);
        let header = test_support::header(None);
        let ctx = RuleContext { header: &header, now };

        let foreign = access_claims(now).with(ISS, "did:web:trudy");
        let failures = evaluate(&rules, &foreign, &ctx).unwrap_err();
        assert_eq!(failures.len(), 1, "{failures:?}");
    }

    #[test]
    fn empty_chain_always_passes() {
        let header = test_support::header(None);
        let ctx = RuleContext { header: &header, now: 0 };
        assert!(evaluate(&[], &ClaimSet::new(), &ctx).is_ok());
    }
}
