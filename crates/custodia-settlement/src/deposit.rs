//! Deposit ingestion.
//!
//! ```text
//!   event ──▶ validate ──▶ lookup txHash ──┬─ CONFIRMED ────────────▶ no-op
//!                                         ├─ PENDING + confirmed ──▶ promote + credit ─▶ post-effects
//!                                         ├─ PENDING + unconfirmed ▶ no-op
//!                                         └─ absent ──▶ attribute ─▶ record (+ credit) ─▶ post-effects
//! ```
//!
//! Delivery is at-least-once and unordered. The transaction hash is the
//! idempotency key: the ledger credit happens exactly once per hash, at
//! the moment its record becomes CONFIRMED, under the record's lock.

use std::sync::Arc;

use chrono::Utc;
use custodia_ledger::{AddressBook, Ledger, PromoteOutcome, RecordOutcome, TxLog};
use custodia_rank::RankEngine;
use custodia_types::{
    Address, CustodiaError, DepositConfig, DepositEvent, Notification, NotificationKind,
    NotificationSink, RawValueError, Result, TokenRegistry, TxDirection, TxHash, TxStatus,
    WalletTransaction, WalletTxId,
};
use rust_decimal::Decimal;

use crate::effects::{EffectList, EffectReport};

/// Why an event was dropped without any state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyTxHash,
    MissingDestination,
    MalformedDestination,
    MalformedTokenAddress,
    MalformedValue,
    /// uint256 amount past what the ledger can represent.
    ValueOutOfRange,
    ZeroValue,
}

/// Informational result of processing one event.
#[derive(Debug, Clone)]
pub enum DepositOutcome {
    Ignored(IgnoreReason),
    /// Funds arrived at an address with no active owner. Nothing credited.
    Unattributed { address: Address },
    /// Amount under the dust threshold. Nothing recorded.
    BelowMinimum { amount: Decimal },
    /// The hash was already CONFIRMED.
    AlreadyConfirmed,
    /// The hash is PENDING and this delivery is still unconfirmed.
    StillPending,
    /// New PENDING record; credit deferred until confirmation.
    RecordedPending(WalletTransaction),
    /// The record became CONFIRMED and the ledger was credited.
    Credited {
        transaction: WalletTransaction,
        effects: Vec<EffectReport>,
    },
}

pub struct DepositProcessor {
    config: DepositConfig,
    registry: Arc<TokenRegistry>,
    ledger: Arc<Ledger>,
    tx_log: Arc<TxLog>,
    addresses: Arc<AddressBook>,
    rank: Arc<RankEngine>,
    sink: Arc<dyn NotificationSink>,
}

impl DepositProcessor {
    #[must_use]
    pub fn new(
        config: DepositConfig,
        registry: Arc<TokenRegistry>,
        ledger: Arc<Ledger>,
        tx_log: Arc<TxLog>,
        addresses: Arc<AddressBook>,
        rank: Arc<RankEngine>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            registry,
            ledger,
            tx_log,
            addresses,
            rank,
            sink,
        }
    }

    /// Process one deposit event.
    ///
    /// # Errors
    /// Only for failures of the primary mutation (e.g. an amount that
    /// cannot be represented). Malformed or unattributable events return
    /// an informational [`DepositOutcome`].
    pub fn process(&self, event: &DepositEvent) -> Result<DepositOutcome> {
        let Some(tx_hash) = TxHash::new(&event.tx_hash) else {
            return Ok(DepositOutcome::Ignored(IgnoreReason::EmptyTxHash));
        };
        let Some(to) = event.to.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(DepositOutcome::Ignored(IgnoreReason::MissingDestination));
        };
        let raw = match event.raw_value() {
            Ok(raw) => raw,
            Err(err) => {
                let reason = match err {
                    RawValueError::Malformed => IgnoreReason::MalformedValue,
                    RawValueError::TooLarge => IgnoreReason::ValueOutOfRange,
                };
                tracing::warn!(
                    tx = %tx_hash,
                    raw_value = %event.value,
                    ?reason,
                    "Deposit value unusable, event dropped"
                );
                return Ok(DepositOutcome::Ignored(reason));
            }
        };
        if raw == 0 {
            return Ok(DepositOutcome::Ignored(IgnoreReason::ZeroValue));
        }

        if let Some(existing) = self.tx_log.get(&tx_hash) {
            return self.redelivery(&existing, event);
        }

        let Ok(to) = Address::parse(to) else {
            return Ok(DepositOutcome::Ignored(IgnoreReason::MalformedDestination));
        };
        let token_address = match event.token_address.as_deref().map(Address::parse) {
            None => None,
            Some(Ok(address)) => Some(address),
            Some(Err(_)) => {
                return Ok(DepositOutcome::Ignored(IgnoreReason::MalformedTokenAddress));
            }
        };
        let Some(user_id) = self.addresses.lookup_active(&to) else {
            tracing::warn!(
                tx = %tx_hash,
                address = %to,
                raw_value = %event.value,
                "Deposit to unknown or inactive address, not credited"
            );
            return Ok(DepositOutcome::Unattributed { address: to });
        };

        let token = self
            .registry
            .resolve(token_address.as_ref(), event.token_decimals);
        let amount = token.amount_from_raw(raw)?;
        if amount < self.config.min_deposit {
            tracing::debug!(tx = %tx_hash, %amount, token = %token.symbol, "Dust deposit ignored");
            return Ok(DepositOutcome::BelowMinimum { amount });
        }

        let now = Utc::now();
        let record = WalletTransaction {
            id: WalletTxId::new(),
            tx_hash: tx_hash.clone(),
            user_id,
            direction: TxDirection::Credit,
            token_symbol: token.symbol.clone(),
            token_address: token.address.clone(),
            amount,
            status: if event.confirmed {
                TxStatus::Confirmed
            } else {
                TxStatus::Pending
            },
            from_address: event.from.as_deref().and_then(|f| Address::parse(f).ok()),
            to_address: to,
            block_number: Some(event.block.number),
            is_test: self.config.test_mode,
            created_at: now,
            confirmed_at: event.confirmed.then_some(now),
        };

        match self.tx_log.insert_new(record, |tx| self.credit(tx))? {
            RecordOutcome::Created(tx) if tx.is_confirmed() => {
                tracing::info!(
                    tx = %tx.tx_hash,
                    user = %tx.user_id,
                    token = %tx.token_symbol,
                    class = %token.class,
                    amount = %tx.amount,
                    "Deposit credited"
                );
                Ok(self.confirmed(tx, event))
            }
            RecordOutcome::Created(tx) => {
                tracing::info!(tx = %tx.tx_hash, user = %tx.user_id, amount = %tx.amount, "Deposit pending");
                Ok(DepositOutcome::RecordedPending(tx))
            }
            // Lost an insert race with a concurrent delivery of the same hash.
            RecordOutcome::Existing(existing) => self.redelivery(&existing, event),
        }
    }

    fn redelivery(&self, existing: &WalletTransaction, event: &DepositEvent) -> Result<DepositOutcome> {
        if existing.is_confirmed() {
            return Ok(DepositOutcome::AlreadyConfirmed);
        }
        if !event.confirmed {
            return Ok(DepositOutcome::StillPending);
        }
        match self
            .tx_log
            .promote(&existing.tx_hash, Utc::now(), |tx| self.credit(tx))?
        {
            PromoteOutcome::Promoted(tx) => {
                tracing::info!(tx = %tx.tx_hash, user = %tx.user_id, amount = %tx.amount, "Pending deposit confirmed");
                Ok(self.confirmed(tx, event))
            }
            PromoteOutcome::AlreadyConfirmed => Ok(DepositOutcome::AlreadyConfirmed),
            PromoteOutcome::NotFound => Err(CustodiaError::Internal(format!(
                "transaction {} vanished from the log",
                existing.tx_hash
            ))),
        }
    }

    fn credit(&self, tx: &WalletTransaction) -> Result<()> {
        self.ledger
            .credit(tx.user_id, &tx.token_symbol, tx.amount)
            .map(|_| ())
    }

    /// Post-confirmation chain. Runs once per hash, right after the credit.
    fn confirmed(&self, tx: WalletTransaction, event: &DepositEvent) -> DepositOutcome {
        let user_id = tx.user_id;
        let mut effects = EffectList::new().then("notify_deposit", || {
            self.sink.enqueue(Notification::new(
                user_id,
                NotificationKind::DepositConfirmed,
                "Deposit confirmed",
                format!("{} {} credited to your balance.", tx.amount, tx.token_symbol),
                serde_json::json!({
                    "tx_hash": tx.tx_hash,
                    "token": tx.token_symbol,
                    "amount": tx.amount.to_string(),
                }),
            ));
            Ok(())
        });

        if self.rank.is_qualifying(&tx.token_symbol) {
            effects = effects
                .then("network_volume", || {
                    self.rank
                        .record_network_volume(user_id, tx.amount, &tx.tx_hash, event.block.timestamp)
                        .map(|_| ())
                })
                .then("activation", || {
                    let cumulative = self.confirmed_qualifying_total(&tx);
                    self.rank
                        .check_activation(user_id, cumulative, Utc::now())
                        .map(|_| ())
                })
                .then("rank_progression", || {
                    self.rank.check_rank_progression(user_id).map(|_| ())
                })
                .then("auto_block", || {
                    self.rank
                        .auto_block(user_id, &tx.token_symbol, tx.amount)
                        .map(|_| ())
                });
        }

        let reports = effects.run(tx.tx_hash.as_str());
        DepositOutcome::Credited {
            transaction: tx,
            effects: reports,
        }
    }

    /// Sum of the user's confirmed qualifying credits, including `tx`.
    fn confirmed_qualifying_total(&self, tx: &WalletTransaction) -> Decimal {
        self.tx_log
            .for_user(tx.user_id)
            .iter()
            .filter(|t| {
                t.direction == TxDirection::Credit
                    && t.is_confirmed()
                    && self.rank.is_qualifying(&t.token_symbol)
            })
            .map(|t| t.amount)
            .sum()
    }
}
