//! Withdrawal admission and the approval hooks.
//!
//! Admission runs every read-only check first (destination, amount,
//! floor, open slot, daily ceiling, fee). Only then does it mutate: it
//! reserves the user's open slot, locks the amount in one ledger step
//! (drawing any shortfall from blocked balance), and fills the slot with
//! the PENDING_APPROVAL row. A failed lock gives the slot back, so a
//! rejected request leaves no funds moved and no rank changed.

use std::sync::Arc;

use chrono::Utc;
use custodia_ledger::Ledger;
use custodia_rank::{RankChange, RankEngine};
use custodia_types::{
    Address, CustodiaError, Notification, NotificationKind, NotificationSink, PriceProvider, Rank,
    Result, Token, TokenRegistry, UserId, Withdrawal, WithdrawalConfig, WithdrawalId,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::withdrawal_store::WithdrawalStore;

/// A user's withdrawal request.
#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub user_id: UserId,
    pub token: String,
    /// Token units, fee included.
    pub amount: Decimal,
    /// Raw destination as entered by the user.
    pub destination: String,
    /// The user accepted the rank loss shown in a prior
    /// [`WithdrawalOutcome::RequiresConfirmation`].
    pub confirmed_rank_loss: bool,
}

/// What unblocking the shortfall would do to the user's rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankImpactNotice {
    /// Amount that must leave `blocked` to fund the request.
    pub deficit: Decimal,
    pub blocked_balance: Decimal,
    pub current_rank: Rank,
    pub projected_rank: Rank,
    /// USD thresholds of the two ranks, for display.
    pub current_required_blocked: Decimal,
    pub projected_required_blocked: Decimal,
}

#[derive(Debug, Clone)]
pub enum WithdrawalOutcome {
    Created {
        withdrawal: Withdrawal,
        /// Blocked balance released to fund the request.
        unblocked: Decimal,
        rank_change: Option<RankChange>,
    },
    /// Nothing changed. Resubmit with `confirmed_rank_loss` to proceed.
    RequiresConfirmation(RankImpactNotice),
}

pub struct WithdrawalManager {
    config: WithdrawalConfig,
    registry: Arc<TokenRegistry>,
    ledger: Arc<Ledger>,
    rank: Arc<RankEngine>,
    store: Arc<WithdrawalStore>,
    prices: Arc<dyn PriceProvider>,
    sink: Arc<dyn NotificationSink>,
}

impl WithdrawalManager {
    #[must_use]
    pub fn new(
        config: WithdrawalConfig,
        registry: Arc<TokenRegistry>,
        ledger: Arc<Ledger>,
        rank: Arc<RankEngine>,
        store: Arc<WithdrawalStore>,
        prices: Arc<dyn PriceProvider>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            registry,
            ledger,
            rank,
            store,
            prices,
            sink,
        }
    }

    /// Admit a withdrawal request.
    ///
    /// # Errors
    /// Validation errors (`InvalidDestination`, `InvalidAmount`,
    /// `UnsupportedToken`, `BelowWithdrawalFloor`, `FeeExceedsAmount`) and
    /// conflicts (`InsufficientBalance`, `WithdrawalAlreadyOpen`,
    /// `DailyLimitExceeded`) leave no state behind.
    pub async fn request_withdrawal(&self, req: WithdrawalRequest) -> Result<WithdrawalOutcome> {
        let destination = Address::parse(&req.destination)?;
        if req.amount <= Decimal::ZERO {
            return Err(CustodiaError::InvalidAmount {
                reason: format!("withdrawal amount must be positive, got {}", req.amount),
            });
        }
        let token = self
            .registry
            .by_symbol(&req.token)
            .cloned()
            .ok_or_else(|| CustodiaError::UnsupportedToken(req.token.clone()))?;
        let user = self.rank.user(req.user_id)?;
        let price = self.price_of(&token).await?;
        let amount_usd = req.amount * price;
        if amount_usd < self.config.min_amount {
            return Err(CustodiaError::InvalidAmount {
                reason: format!(
                    "withdrawal of ${amount_usd} is below the ${} minimum",
                    self.config.min_amount
                ),
            });
        }

        let balance = self.ledger.balance(req.user_id, &token.symbol);
        let holding_usd = balance.withdrawable() * price;
        if holding_usd < self.config.min_balance_to_withdraw {
            return Err(CustodiaError::BelowWithdrawalFloor {
                total: holding_usd,
                minimum: self.config.min_balance_to_withdraw,
            });
        }

        if let Some(open) = self.store.open_for(req.user_id) {
            return Err(CustodiaError::WithdrawalAlreadyOpen {
                user: req.user_id,
                existing: open.id,
            });
        }

        let now = Utc::now();
        let limit = self
            .rank
            .table()
            .tier(user.current_rank)
            .daily_withdrawal_limit;
        let used = self.store.daily_used(req.user_id, now);
        if used + amount_usd > limit {
            return Err(CustodiaError::DailyLimitExceeded {
                limit,
                used,
                requested: amount_usd,
            });
        }

        let fee = self.fee_in(&token, price)?;
        if fee >= req.amount {
            return Err(CustodiaError::FeeExceedsAmount {
                fee,
                amount: req.amount,
            });
        }

        let deficit = (req.amount - balance.available).max(Decimal::ZERO);
        if deficit > Decimal::ZERO {
            if !token.is_qualifying() || deficit > balance.blocked {
                return Err(CustodiaError::InsufficientBalance {
                    needed: req.amount,
                    available: balance.available,
                });
            }
            let projected = self.rank.projected_rank_after_unblock(req.user_id, deficit)?;
            if projected < user.current_rank && !req.confirmed_rank_loss {
                let table = self.rank.table();
                tracing::info!(
                    user = %req.user_id,
                    %deficit,
                    from = %user.current_rank,
                    to = %projected,
                    "Withdrawal needs rank-loss confirmation"
                );
                return Ok(WithdrawalOutcome::RequiresConfirmation(RankImpactNotice {
                    deficit,
                    blocked_balance: self.ledger.blocked_total(req.user_id, self.rank.qualifying_symbols()),
                    current_rank: user.current_rank,
                    projected_rank: projected,
                    current_required_blocked: table.required_blocked(user.current_rank),
                    projected_required_blocked: table.required_blocked(projected),
                }));
            }
        }

        let id = self.store.reserve(req.user_id)?;
        let funded = if deficit > Decimal::ZERO {
            self.rank
                .unblock_and_lock(req.user_id, &token.symbol, req.amount, deficit)
        } else {
            self.ledger
                .lock(req.user_id, &token.symbol, req.amount)
                .map(|_| None)
        };
        let rank_change = match funded {
            Ok(change) => change,
            Err(err) => {
                self.store.release(req.user_id, id);
                return Err(err);
            }
        };

        let mut withdrawal = Withdrawal::new(
            req.user_id,
            &token.symbol,
            req.amount,
            fee,
            destination,
            deficit,
        );
        withdrawal.id = id;
        withdrawal.amount_usd = amount_usd;
        let withdrawal = self.store.insert_reserved(withdrawal)?;
        let unblocked = deficit;

        tracing::info!(
            withdrawal = %withdrawal.id,
            user = %withdrawal.user_id,
            token = %withdrawal.token_symbol,
            amount = %withdrawal.amount,
            fee = %withdrawal.fee,
            %unblocked,
            destination = withdrawal.destination.short(),
            "Withdrawal requested"
        );
        Ok(WithdrawalOutcome::Created {
            withdrawal,
            unblocked,
            rank_change,
        })
    }

    /// PENDING_APPROVAL → APPROVED.
    pub fn approve(&self, id: WithdrawalId) -> Result<Withdrawal> {
        let withdrawal = self.store.transition(id, |w| w.approve(Utc::now()))?;
        tracing::info!(withdrawal = %id, user = %withdrawal.user_id, "Withdrawal approved");
        Ok(withdrawal)
    }

    /// PENDING_APPROVAL → REJECTED. The locked amount returns to
    /// `available`; released blocked balance is not re-blocked.
    pub fn reject(&self, id: WithdrawalId, reason: &str) -> Result<Withdrawal> {
        let withdrawal = self.store.transition(id, |w| {
            w.reject(reason, Utc::now())?;
            self.ledger
                .unlock(w.user_id, &w.token_symbol, w.amount)
                .map(|_| ())
        })?;
        tracing::info!(withdrawal = %id, user = %withdrawal.user_id, reason, "Withdrawal rejected");
        self.sink.enqueue(Notification::new(
            withdrawal.user_id,
            NotificationKind::WithdrawalRejected,
            "Withdrawal rejected",
            format!(
                "Your withdrawal of {} {} was rejected: {reason}. The funds are available again.",
                withdrawal.amount, withdrawal.token_symbol
            ),
            serde_json::json!({
                "withdrawal_id": withdrawal.id,
                "reason": reason,
            }),
        ));
        Ok(withdrawal)
    }

    /// FAILED(RECOVERABLE) → APPROVED for another settlement attempt.
    /// Funds stay locked.
    pub fn requeue(&self, id: WithdrawalId) -> Result<Withdrawal> {
        let withdrawal = self.store.transition(id, |w| w.requeue(Utc::now()))?;
        tracing::info!(withdrawal = %id, user = %withdrawal.user_id, "Withdrawal requeued");
        Ok(withdrawal)
    }

    pub fn get(&self, id: WithdrawalId) -> Result<Withdrawal> {
        self.store.get(id)
    }

    /// USD price of one unit. Qualifying tokens are pegged at 1.
    async fn price_of(&self, token: &Token) -> Result<Decimal> {
        if token.is_qualifying() {
            return Ok(Decimal::ONE);
        }
        let price = self.prices.price_usd(&token.symbol).await?;
        if price <= Decimal::ZERO {
            return Err(CustodiaError::PriceUnavailable(token.symbol.clone()));
        }
        Ok(price)
    }

    /// Flat USD fee in token units, rounded up to the token's precision.
    fn fee_in(&self, token: &Token, price: Decimal) -> Result<Decimal> {
        let fee = self
            .config
            .fee_usd
            .checked_div(price)
            .ok_or_else(|| CustodiaError::PriceUnavailable(token.symbol.clone()))?;
        Ok(fee.round_dp_with_strategy(token.decimals, RoundingStrategy::AwayFromZero))
    }
}
