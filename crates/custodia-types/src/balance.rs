//! Balance tracking types for the custodial ledger.
//!
//! Every (user, token) row has three non-negative components:
//! - `available`: free to withdraw
//! - `locked`: reserved by an open withdrawal awaiting settlement
//! - `blocked`: reserved to satisfy a rank's minimum-holding requirement

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single ledger row for a (user, token) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    /// Free to withdraw or block.
    pub available: Decimal,
    /// Held by a withdrawal between request and settlement.
    pub locked: Decimal,
    /// Counted toward the owner's rank.
    pub blocked: Decimal,
}

impl Balance {
    /// Create a zero balance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
            blocked: Decimal::ZERO,
        }
    }

    /// Total holdings (available + locked + blocked).
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.available + self.locked + self.blocked
    }

    /// Combined balance a user could draw a withdrawal from.
    #[must_use]
    pub fn withdrawable(&self) -> Decimal {
        self.available + self.blocked
    }

    /// Whether this row has no balance at all.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.available.is_zero() && self.locked.is_zero() && self.blocked.is_zero()
    }

    /// Whether every component is non-negative.
    #[must_use]
    pub fn is_sound(&self) -> bool {
        !self.available.is_sign_negative()
            && !self.locked.is_sign_negative()
            && !self.blocked.is_sign_negative()
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::new()
    }
}

/// Type alias for token symbols (e.g., "USDT", "USDC", "ETH").
pub type TokenSymbol = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_default_is_zero() {
        let entry = Balance::default();
        assert_eq!(entry.available, Decimal::ZERO);
        assert_eq!(entry.locked, Decimal::ZERO);
        assert!(entry.is_zero());
        assert!(entry.is_sound());
    }

    #[test]
    fn balance_total_and_withdrawable() {
        let entry = Balance {
            available: Decimal::new(20, 0),
            locked: Decimal::new(30, 0),
            blocked: Decimal::new(60, 0),
        };
        assert_eq!(entry.total(), Decimal::new(110, 0));
        assert_eq!(entry.withdrawable(), Decimal::new(80, 0));
        assert!(!entry.is_zero());
    }

    #[test]
    fn negative_component_is_unsound() {
        let entry = Balance {
            available: Decimal::new(-1, 0),
            ..Balance::default()
        };
        assert!(!entry.is_sound());
    }
}
