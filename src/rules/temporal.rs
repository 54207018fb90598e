//! Validity-window rules (`exp`, `iat`, `nbf`).

use super::{Rule, RuleContext, RuleOutcome};
use crate::token::{ClaimSet, claims};

/// `exp` must be present and in the future; `iat`, if present, must not be
/// in the future. Both tolerate `leeway` seconds of clock skew.
#[derive(Debug, Clone, Copy)]
pub struct ExpirationRule {
    leeway: u64,
}

impl ExpirationRule {
    /// Create the rule with `leeway_secs` of clock-skew tolerance.
    #[must_use]
    pub fn new(leeway_secs: u64) -> Self {
        Self {
            leeway: leeway_secs,
        }
    }
}

impl Rule for ExpirationRule {
    fn evaluate(&self, claims: &ClaimSet, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(exp) = claims.numeric_claim(claims::EXP) else {
            return Err("Required expiration time (exp) claim is missing in token".to_string());
        };
        if exp.saturating_add(self.leeway) <= ctx.now {
            return Err("Token has expired (exp)".to_string());
        }
        if let Some(iat) = claims.numeric_claim(claims::IAT) {
            if iat > ctx.now.saturating_add(self.leeway) {
                return Err("Current date/time before issued at (iat) claim in token".to_string());
            }
            if iat > exp {
                return Err("Issued at (iat) claim is after expiration time (exp) claim in token".to_string());
            }
        }
        Ok(())
    }
}

/// `nbf`, if present, must not be in the future beyond `leeway`.
#[derive(Debug, Clone, Copy)]
pub struct NotBeforeRule {
    leeway: u64,
}

impl NotBeforeRule {
    /// Create the rule with `leeway_secs` of clock-skew tolerance.
    #[must_use]
    pub fn new(leeway_secs: u64) -> Self {
        Self {
            leeway: leeway_secs,
        }
    }
}

impl Rule for NotBeforeRule {
    fn evaluate(&self, claims: &ClaimSet, ctx: &RuleContext<'_>) -> RuleOutcome {
        match claims.numeric_claim(claims::NBF) {
            Some(nbf) if nbf > ctx.now.saturating_add(self.leeway) => {
                Err("Current date/time before not before (nbf) claim in token".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::header;
    use crate::token::claims::{EXP, IAT, NBF};

    const NOW: u64 = 1_700_000_000;

    fn check(rule: &dyn Rule, claims: &ClaimSet) -> RuleOutcome {
        let header = header(None);
        rule.evaluate(claims, &RuleContext { header: &header, now: NOW })
    }

    #[test]
    fn expiration_requires_exp() {
        let err = check(&ExpirationRule::new(0), &ClaimSet::new()).unwrap_err();
        assert!(err.contains("exp"));
    }

    #[test]
    fn expiration_honours_leeway() {
        let expired = ClaimSet::new().with(EXP, NOW - 30);
        assert!(check(&ExpirationRule::new(0), &expired).is_err());
        assert!(check(&ExpirationRule::new(60), &expired).is_ok());
    }

    #[test]
    fn issued_in_the_future_is_rejected() {
        let claims = ClaimSet::new().with(EXP, NOW + 600).with(IAT, NOW + 120);
        assert!(check(&ExpirationRule::new(60), &claims).is_err());

        let skewed = ClaimSet::new().with(EXP, NOW + 600).with(IAT, NOW + 30);
        assert!(check(&ExpirationRule::new(60), &skewed).is_ok());
    }

    #[test]
    fn issued_after_expiry_is_rejected() {
        let claims = ClaimSet::new().with(EXP, NOW + 10).with(IAT, NOW + 20);
        assert!(check(&ExpirationRule::new(60), &claims).is_err());
    }

    #[test]
    fn not_before_is_optional() {
        assert!(check(&NotBeforeRule::new(0), &ClaimSet::new()).is_ok());
        assert!(check(&NotBeforeRule::new(0), &ClaimSet::new().with(NBF, NOW)).is_ok());
        assert!(check(&NotBeforeRule::new(0), &ClaimSet::new().with(NBF, NOW + 5)).is_err());
        assert!(check(&NotBeforeRule::new(10), &ClaimSet::new().with(NBF, NOW + 5)).is_ok());
    }
}
