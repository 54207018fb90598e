//! One-time use of authentication tokens.

use std::sync::Arc;

use super::{Rule, RuleContext, RuleOutcome};
use crate::replay::ReplayLedger;
use crate::token::{ClaimSet, claims};

/// The token's `jti` must not have been seen before; accepting it records it.
///
/// Retention is `exp + leeway` so the entry outlives every moment at which
/// the expiration rule would still accept the token.
pub struct OneTimeUseRule {
    ledger: Arc<dyn ReplayLedger>,
    leeway: u64,
}

impl OneTimeUseRule {
    /// Create the rule over `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<dyn ReplayLedger>, leeway_secs: u64) -> Self {
        Self {
            ledger,
            leeway: leeway_secs,
        }
    }
}

impl std::fmt::Debug for OneTimeUseRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimeUseRule")
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl Rule for OneTimeUseRule {
    fn evaluate(&self, claims: &ClaimSet, ctx: &RuleContext<'_>) -> RuleOutcome {
        let Some(jti) = claims.jti() else {
            return Err("The 'jti' claim is missing.".to_string());
        };
        let expires_at = claims
            .numeric_claim(claims::EXP)
            .unwrap_or(ctx.now)
            .saturating_add(self.leeway);

        self.ledger
            .check_and_insert(jti, expires_at)
            .map_err(|e| e.to_string())
    }
}
