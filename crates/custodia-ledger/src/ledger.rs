//! Per-(user, token) balance rows with guarded atomic updates.
//!
//! Every operation touches exactly one row and holds that row's shard
//! write lock for the whole check-and-apply, so a debit guard can never be
//! satisfied by a value that changed before the write. Callers that chain
//! several operations (settle then recompute rank) get per-step atomicity
//! only; [`Ledger::unblock_and_lock`] exists so a withdrawal funded from
//! blocked balance is a single step.

use custodia_types::{Balance, CustodiaError, Result, TokenSymbol, UserId};
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::SupplyConservation;

/// Source of truth for user balances.
#[derive(Debug, Default)]
pub struct Ledger {
    rows: DashMap<(UserId, TokenSymbol), Balance>,
    supply: SupplyConservation,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increase `available`. Creates the row on first credit.
    ///
    /// # Errors
    /// Returns `InvalidAmount` unless `amount > 0`.
    pub fn credit(&self, user_id: UserId, token: &str, amount: Decimal) -> Result<Balance> {
        ensure_positive(amount)?;
        let mut row = self.rows.entry((user_id, token.to_string())).or_default();
        row.available += amount;
        self.supply.record_credit(token, amount);
        tracing::debug!(user = %user_id, token, %amount, "Ledger credit");
        Ok(row.clone())
    }

    /// Move `available → locked`, guarded on `available >= amount`.
    ///
    /// # Errors
    /// Returns `InsufficientBalance` if the guard fails; the row is unchanged.
    pub fn lock(&self, user_id: UserId, token: &str, amount: Decimal) -> Result<Balance> {
        self.guarded(user_id, token, amount, |row| {
            if row.available < amount {
                return Err(CustodiaError::InsufficientBalance {
                    needed: amount,
                    available: row.available,
                });
            }
            row.available -= amount;
            row.locked += amount;
            Ok(())
        })
    }

    /// Move `locked → available`. Used when a pending withdrawal is rejected.
    ///
    /// # Errors
    /// Returns `InsufficientLocked` if `locked < amount`.
    pub fn unlock(&self, user_id: UserId, token: &str, amount: Decimal) -> Result<Balance> {
        self.guarded(user_id, token, amount, |row| {
            take_locked(row, amount)?;
            row.available += amount;
            Ok(())
        })
    }

    /// Decrease `locked` for a completed withdrawal. Funds leave the platform.
    ///
    /// # Errors
    /// Returns `InsufficientLocked` if `locked < amount`.
    pub fn settle(&self, user_id: UserId, token: &str, amount: Decimal) -> Result<Balance> {
        let balance = self.guarded(user_id, token, amount, |row| take_locked(row, amount))?;
        self.supply.record_settle(token, amount);
        Ok(balance)
    }

    /// Move `locked → available` after a permanent settlement failure.
    ///
    /// # Errors
    /// Returns `InsufficientLocked` if `locked < amount`.
    pub fn refund_locked(&self, user_id: UserId, token: &str, amount: Decimal) -> Result<Balance> {
        self.guarded(user_id, token, amount, |row| {
            take_locked(row, amount)?;
            row.available += amount;
            Ok(())
        })
    }

    /// Move `available → blocked` (rank reservation).
    ///
    /// # Errors
    /// Returns `InsufficientBalance` if `available < amount`.
    pub fn block(&self, user_id: UserId, token: &str, amount: Decimal) -> Result<Balance> {
        self.guarded(user_id, token, amount, |row| {
            if row.available < amount {
                return Err(CustodiaError::InsufficientBalance {
                    needed: amount,
                    available: row.available,
                });
            }
            row.available -= amount;
            row.blocked += amount;
            Ok(())
        })
    }

    /// Move `blocked → available`.
    ///
    /// # Errors
    /// Returns `InsufficientBlocked` if `blocked < amount`.
    pub fn unblock(&self, user_id: UserId, token: &str, amount: Decimal) -> Result<Balance> {
        self.guarded(user_id, token, amount, |row| {
            if row.blocked < amount {
                return Err(CustodiaError::InsufficientBlocked {
                    needed: amount,
                    blocked: row.blocked,
                });
            }
            row.blocked -= amount;
            row.available += amount;
            Ok(())
        })
    }

    /// Release `release` from `blocked` and lock `amount` in one step.
    ///
    /// # Errors
    /// `InsufficientBlocked` if `blocked < release`, `InsufficientBalance`
    /// if `available + release < amount`. Either way the row is unchanged.
    pub fn unblock_and_lock(
        &self,
        user_id: UserId,
        token: &str,
        amount: Decimal,
        release: Decimal,
    ) -> Result<Balance> {
        if release < Decimal::ZERO {
            return Err(CustodiaError::InvalidAmount {
                reason: format!("release must not be negative, got {release}"),
            });
        }
        self.guarded(user_id, token, amount, |row| {
            if row.blocked < release {
                return Err(CustodiaError::InsufficientBlocked {
                    needed: release,
                    blocked: row.blocked,
                });
            }
            if row.available + release < amount {
                return Err(CustodiaError::InsufficientBalance {
                    needed: amount,
                    available: row.available + release,
                });
            }
            row.blocked -= release;
            row.available = row.available + release - amount;
            row.locked += amount;
            Ok(())
        })
    }

    /// Snapshot of one row; zero if it does not exist yet.
    #[must_use]
    pub fn balance(&self, user_id: UserId, token: &str) -> Balance {
        self.rows
            .get(&(user_id, token.to_string()))
            .map(|row| row.clone())
            .unwrap_or_default()
    }

    /// Sum of `blocked` over `tokens` for one user.
    #[must_use]
    pub fn blocked_total(&self, user_id: UserId, tokens: &[String]) -> Decimal {
        tokens
            .iter()
            .map(|token| self.balance(user_id, token).blocked)
            .sum()
    }

    /// All rows of one user, sorted by token symbol.
    #[must_use]
    pub fn user_balances(&self, user_id: UserId) -> Vec<(TokenSymbol, Balance)> {
        let mut rows: Vec<(TokenSymbol, Balance)> = self
            .rows
            .iter()
            .filter(|entry| entry.key().0 == user_id)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Sum of every row's total for a token.
    #[must_use]
    pub fn total_supply(&self, token: &str) -> Decimal {
        self.rows
            .iter()
            .filter(|entry| entry.key().1 == token)
            .map(|entry| entry.value().total())
            .sum()
    }

    /// Check `Σ rows == Σ credits − Σ settled` for a token.
    ///
    /// Meaningful only when no mutation on `token` is in flight.
    ///
    /// # Errors
    /// Returns `SupplyInvariantViolation` on mismatch.
    pub fn verify_supply(&self, token: &str) -> Result<()> {
        self.supply.verify(token, self.total_supply(token))
    }

    /// Check every token that has ever been credited.
    ///
    /// # Errors
    /// Returns the first `SupplyInvariantViolation` found.
    pub fn verify_all_supply(&self) -> Result<()> {
        for token in self.supply.tracked_tokens() {
            self.verify_supply(&token)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn supply(&self) -> &SupplyConservation {
        &self.supply
    }

    /// Apply `op` to an existing row under its write lock. On error the
    /// row is left exactly as it was.
    fn guarded<F>(&self, user_id: UserId, token: &str, amount: Decimal, op: F) -> Result<Balance>
    where
        F: FnOnce(&mut Balance) -> Result<()>,
    {
        ensure_positive(amount)?;
        let Some(mut row) = self.rows.get_mut(&(user_id, token.to_string())) else {
            // Every guard fails against an all-zero row.
            op(&mut Balance::default())?;
            return Err(CustodiaError::Internal(format!(
                "no ledger row for {user_id}/{token}"
            )));
        };
        let mut next = row.clone();
        op(&mut next)?;
        debug_assert!(next.is_sound());
        *row = next.clone();
        Ok(next)
    }
}

fn ensure_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(CustodiaError::InvalidAmount {
            reason: format!("ledger amount must be positive, got {amount}"),
        });
    }
    Ok(())
}

fn take_locked(row: &mut Balance, amount: Decimal) -> Result<()> {
    if row.locked < amount {
        return Err(CustodiaError::InsufficientLocked {
            needed: amount,
            locked: row.locked,
        });
    }
    row.locked -= amount;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn funded(amount: i64) -> (Ledger, UserId) {
        let ledger = Ledger::new();
        let user = UserId::new();
        ledger.credit(user, "USDT", dec(amount)).unwrap();
        (ledger, user)
    }

    #[test]
    fn credit_creates_row_lazily() {
        let ledger = Ledger::new();
        let user = UserId::new();
        assert!(ledger.balance(user, "USDT").is_zero());
        let bal = ledger.credit(user, "USDT", dec(100)).unwrap();
        assert_eq!(bal.available, dec(100));
        assert_eq!(ledger.user_balances(user).len(), 1);
    }

    #[test]
    fn non_positive_amounts_rejected() {
        let (ledger, user) = funded(100);
        for amount in [Decimal::ZERO, dec(-5)] {
            assert!(matches!(
                ledger.credit(user, "USDT", amount).unwrap_err(),
                CustodiaError::InvalidAmount { .. }
            ));
            assert!(ledger.lock(user, "USDT", amount).is_err());
        }
        assert_eq!(ledger.balance(user, "USDT").available, dec(100));
    }

    #[test]
    fn lock_guard_leaves_row_untouched() {
        let (ledger, user) = funded(100);
        let err = ledger.lock(user, "USDT", dec(150)).unwrap_err();
        assert!(matches!(
            err,
            CustodiaError::InsufficientBalance { needed, available }
                if needed == dec(150) && available == dec(100)
        ));
        let bal = ledger.balance(user, "USDT");
        assert_eq!(bal.available, dec(100));
        assert_eq!(bal.locked, Decimal::ZERO);
    }

    #[test]
    fn lock_on_missing_row_is_insufficient() {
        let ledger = Ledger::new();
        let err = ledger.lock(UserId::new(), "USDT", dec(1)).unwrap_err();
        assert!(matches!(err, CustodiaError::InsufficientBalance { .. }));
    }

    #[test]
    fn lock_unlock_roundtrip() {
        let (ledger, user) = funded(100);
        ledger.lock(user, "USDT", dec(40)).unwrap();
        let bal = ledger.unlock(user, "USDT", dec(40)).unwrap();
        assert_eq!(bal.available, dec(100));
        assert_eq!(bal.locked, Decimal::ZERO);
        assert!(matches!(
            ledger.unlock(user, "USDT", dec(1)).unwrap_err(),
            CustodiaError::InsufficientLocked { .. }
        ));
    }

    #[test]
    fn settle_removes_locked_and_supply() {
        let (ledger, user) = funded(100);
        ledger.lock(user, "USDT", dec(80)).unwrap();
        let bal = ledger.settle(user, "USDT", dec(80)).unwrap();
        assert_eq!(bal.available, dec(20));
        assert_eq!(bal.locked, Decimal::ZERO);
        assert_eq!(ledger.supply().expected_supply("USDT"), dec(20));
        ledger.verify_supply("USDT").unwrap();
    }

    #[test]
    fn refund_restores_available() {
        let (ledger, user) = funded(100);
        ledger.lock(user, "USDT", dec(80)).unwrap();
        let bal = ledger.refund_locked(user, "USDT", dec(80)).unwrap();
        assert_eq!(bal.available, dec(100));
        assert_eq!(bal.locked, Decimal::ZERO);
    }

    #[test]
    fn block_and_unblock() {
        let (ledger, user) = funded(100);
        ledger.block(user, "USDT", dec(60)).unwrap();
        assert_eq!(
            ledger.blocked_total(user, &["USDT".into(), "USDC".into()]),
            dec(60)
        );
        assert!(matches!(
            ledger.block(user, "USDT", dec(41)).unwrap_err(),
            CustodiaError::InsufficientBalance { .. }
        ));
        assert!(matches!(
            ledger.unblock(user, "USDT", dec(61)).unwrap_err(),
            CustodiaError::InsufficientBlocked { .. }
        ));
        let bal = ledger.unblock(user, "USDT", dec(60)).unwrap();
        assert_eq!(bal.available, dec(100));
        assert_eq!(bal.blocked, Decimal::ZERO);
    }

    #[test]
    fn unblock_and_lock_is_all_or_nothing() {
        let (ledger, user) = funded(100);
        ledger.block(user, "USDT", dec(60)).unwrap();

        // 40 available + 30 released is short of 80.
        assert!(matches!(
            ledger.unblock_and_lock(user, "USDT", dec(80), dec(30)).unwrap_err(),
            CustodiaError::InsufficientBalance { available, .. } if available == dec(70)
        ));
        assert!(matches!(
            ledger.unblock_and_lock(user, "USDT", dec(80), dec(61)).unwrap_err(),
            CustodiaError::InsufficientBlocked { .. }
        ));
        let bal = ledger.balance(user, "USDT");
        assert_eq!((bal.available, bal.blocked, bal.locked), (dec(40), dec(60), Decimal::ZERO));

        let bal = ledger.unblock_and_lock(user, "USDT", dec(80), dec(40)).unwrap();
        assert_eq!((bal.available, bal.blocked, bal.locked), (Decimal::ZERO, dec(20), dec(80)));
        assert_eq!(bal.total(), dec(100));
    }

    #[test]
    fn concurrent_locks_never_overdraw() {
        let (ledger, user) = funded(100);
        let ledger = std::sync::Arc::new(ledger);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.lock(user, "USDT", dec(10)).is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 10);
        let bal = ledger.balance(user, "USDT");
        assert_eq!(bal.available, Decimal::ZERO);
        assert_eq!(bal.locked, dec(100));
    }

    // =====================================================================
    // Randomized sequences: no negative components, exact conservation
    // =====================================================================

    #[test]
    fn random_sequences_preserve_invariants() {
        let mut rng = StdRng::seed_from_u64(0x00c0_ffee);
        let ledger = Ledger::new();
        let users: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();

        for _ in 0..2_000 {
            let user = users[rng.gen_range(0..users.len())];
            let amount = Decimal::new(rng.gen_range(1..5_000), 2);
            let before = ledger.balance(user, "USDC");
            let op = rng.gen_range(0..7);
            let result = match op {
                0 => ledger.credit(user, "USDC", amount),
                1 => ledger.lock(user, "USDC", amount),
                2 => ledger.unlock(user, "USDC", amount),
                3 => ledger.settle(user, "USDC", amount),
                4 => ledger.refund_locked(user, "USDC", amount),
                5 => ledger.block(user, "USDC", amount),
                _ => ledger.unblock(user, "USDC", amount),
            };
            let after = ledger.balance(user, "USDC");
            assert!(after.is_sound(), "negative component after op {op}");

            match (op, result.is_ok()) {
                (_, false) => assert_eq!(after, before, "failed op {op} mutated"),
                (0, true) => assert_eq!(after.total(), before.total() + amount),
                (3, true) => assert_eq!(after.total(), before.total() - amount),
                (_, true) => assert_eq!(after.total(), before.total()),
            }
        }
        ledger.verify_all_supply().unwrap();
    }
}
