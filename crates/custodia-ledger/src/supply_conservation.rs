//! Supply conservation invariant checker.
//!
//! ```text
//! ∀ token: Σ(available + locked + blocked) == Σ(credits) - Σ(settled)
//! ```
//!
//! Lock, unlock, block, unblock and refund move value between components
//! of one row and never change a token's supply. If this breaks, a
//! mutation escaped the guarded row operations.

use custodia_types::{CustodiaError, Result};
use dashmap::DashMap;
use rust_decimal::Decimal;

/// Running per-token inflow and outflow totals.
#[derive(Debug, Default)]
pub struct SupplyConservation {
    credits: DashMap<String, Decimal>,
    settled: DashMap<String, Decimal>,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_credit(&self, token: &str, amount: Decimal) {
        *self.credits.entry(token.to_string()).or_default() += amount;
    }

    pub fn record_settle(&self, token: &str, amount: Decimal) {
        *self.settled.entry(token.to_string()).or_default() += amount;
    }

    #[must_use]
    pub fn total_credits(&self, token: &str) -> Decimal {
        self.credits.get(token).map_or(Decimal::ZERO, |v| *v)
    }

    #[must_use]
    pub fn total_settled(&self, token: &str) -> Decimal {
        self.settled.get(token).map_or(Decimal::ZERO, |v| *v)
    }

    /// Credits minus settlements for a token.
    #[must_use]
    pub fn expected_supply(&self, token: &str) -> Decimal {
        self.total_credits(token) - self.total_settled(token)
    }

    /// Compare the ledger's actual supply with the expected one.
    ///
    /// # Errors
    /// Returns [`CustodiaError::SupplyInvariantViolation`] if they differ.
    pub fn verify(&self, token: &str, actual_supply: Decimal) -> Result<()> {
        let expected = self.expected_supply(token);
        if actual_supply != expected {
            tracing::error!(token, %actual_supply, %expected, "Supply invariant violated");
            return Err(CustodiaError::SupplyInvariantViolation {
                reason: format!(
                    "token {token}: actual supply {actual_supply} != expected {expected} \
                     (credits={}, settled={})",
                    self.total_credits(token),
                    self.total_settled(token),
                ),
            });
        }
        Ok(())
    }

    /// Every token seen so far, sorted.
    #[must_use]
    pub fn tracked_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.credits.iter().map(|e| e.key().clone()).collect();
        for entry in &self.settled {
            if !tokens.contains(entry.key()) {
                tokens.push(entry.key().clone());
            }
        }
        tokens.sort();
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_supply_is_zero() {
        let sc = SupplyConservation::new();
        assert_eq!(sc.expected_supply("USDT"), Decimal::ZERO);
        assert!(sc.verify("USDT", Decimal::ZERO).is_ok());
    }

    #[test]
    fn settlements_decrease_expected() {
        let sc = SupplyConservation::new();
        sc.record_credit("USDT", Decimal::new(1000, 0));
        sc.record_credit("USDT", Decimal::new(500, 0));
        sc.record_settle("USDT", Decimal::new(300, 0));
        assert_eq!(sc.expected_supply("USDT"), Decimal::new(1200, 0));
        assert!(sc.verify("USDT", Decimal::new(1200, 0)).is_ok());
    }

    #[test]
    fn verify_fails_when_imbalanced() {
        let sc = SupplyConservation::new();
        sc.record_credit("ETH", Decimal::new(10, 0));
        let err = sc.verify("ETH", Decimal::new(11, 0)).unwrap_err();
        assert!(matches!(err, CustodiaError::SupplyInvariantViolation { .. }));
    }

    #[test]
    fn tokens_tracked_independently() {
        let sc = SupplyConservation::new();
        sc.record_credit("USDC", Decimal::new(5, 0));
        sc.record_credit("USDT", Decimal::new(7, 0));
        assert_eq!(sc.tracked_tokens(), vec!["USDC", "USDT"]);
        assert!(sc.verify("USDC", Decimal::new(5, 0)).is_ok());
        assert!(sc.verify("USDT", Decimal::new(5, 0)).is_err());
    }
}
