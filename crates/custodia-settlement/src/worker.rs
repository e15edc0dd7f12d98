//! On-chain settlement of approved withdrawals.
//!
//! ```text
//!   APPROVED ──guard(processed_at)──▶ PROCESSING ──send + confirm──┬─▶ COMPLETED  (settle, DEBIT record)
//!                                                                 ├─▶ FAILED/RECOVERABLE (funds stay locked)
//!                                                                 └─▶ FAILED/PERMANENT   (refund locked)
//! ```
//!
//! The processing guard is the idempotency boundary: a second invocation
//! for the same id is rejected before any chain call is made. The hash of a
//! submitted transfer is stored on the withdrawal before confirmation is
//! awaited; a requeued withdrawal waits on that hash and never sends twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use custodia_ledger::{Ledger, RecordOutcome, TxLog};
use custodia_rank::{RankChange, RankEngine};
use custodia_types::{
    Address, ChainClient, ChainError, ChainErrorKind, CustodiaError, FailureClass, Notification,
    NotificationKind, NotificationSink, Result, TokenRegistry, TxDirection, TxHash, TxStatus,
    WalletTransaction, WalletTxId, Withdrawal, WithdrawalConfig, WithdrawalId,
};

use crate::effects::{EffectList, EffectReport};
use crate::withdrawal_store::WithdrawalStore;

/// Result of one settlement attempt.
#[derive(Debug)]
pub enum SettlementOutcome {
    Completed {
        withdrawal: Withdrawal,
        tx_hash: TxHash,
        /// `false` when the transfer was already in the log.
        debit_recorded: bool,
        rank_change: Option<RankChange>,
        effects: Vec<EffectReport>,
    },
    /// The transfer failed. `error` is always
    /// [`CustodiaError::SettlementFailed`] carrying the classification.
    Failed {
        withdrawal: Withdrawal,
        error: CustodiaError,
    },
}

pub struct SettlementWorker {
    config: WithdrawalConfig,
    registry: Arc<TokenRegistry>,
    treasury: Address,
    chain: Arc<dyn ChainClient>,
    ledger: Arc<Ledger>,
    tx_log: Arc<TxLog>,
    rank: Arc<RankEngine>,
    store: Arc<WithdrawalStore>,
    sink: Arc<dyn NotificationSink>,
}

impl SettlementWorker {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: WithdrawalConfig,
        registry: Arc<TokenRegistry>,
        treasury: Address,
        chain: Arc<dyn ChainClient>,
        ledger: Arc<Ledger>,
        tx_log: Arc<TxLog>,
        rank: Arc<RankEngine>,
        store: Arc<WithdrawalStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            registry,
            treasury,
            chain,
            ledger,
            tx_log,
            rank,
            store,
            sink,
        }
    }

    /// Settle one APPROVED withdrawal.
    ///
    /// # Errors
    /// `AlreadyProcessed` on a duplicate invocation, `WithdrawalNotFound`,
    /// `InvalidWithdrawalTransition` when the row is not APPROVED. A failed
    /// transfer is not an error: it returns [`SettlementOutcome::Failed`].
    pub async fn process_withdrawal(&self, id: WithdrawalId) -> Result<SettlementOutcome> {
        let withdrawal = self.store.transition(id, |w| w.begin_processing(Utc::now()))?;
        tracing::info!(
            withdrawal = %id,
            user = %withdrawal.user_id,
            token = %withdrawal.token_symbol,
            net = %withdrawal.net_amount(),
            destination = withdrawal.destination.short(),
            "Settlement started"
        );

        let tx_hash = match withdrawal.submitted_tx_hash.clone() {
            Some(tx_hash) => {
                tracing::info!(withdrawal = %id, tx = %tx_hash, "Resuming wait on submitted transfer");
                tx_hash
            }
            None => match self.submit(&withdrawal).await {
                Ok(tx_hash) => {
                    self.store
                        .transition(id, |w| w.record_submission(tx_hash.clone(), Utc::now()))?;
                    tx_hash
                }
                Err(err) => return self.failed(&withdrawal, &err),
            },
        };

        match self.confirm(&withdrawal, &tx_hash).await {
            Ok(()) => self.completed(&withdrawal, tx_hash),
            Err(err) => self.failed(&withdrawal, &err),
        }
    }

    /// Submit the net amount from the treasury, bounded by the
    /// confirmation timeout.
    async fn submit(&self, w: &Withdrawal) -> std::result::Result<TxHash, ChainError> {
        let token = self.registry.by_symbol(&w.token_symbol).ok_or_else(|| {
            ChainError::new(
                ChainErrorKind::UnsupportedAsset,
                format!("token {} is not listed", w.token_symbol),
            )
        })?;
        let deadline = Duration::from_secs(self.config.confirmation_timeout_secs);
        let amount = w.net_amount();

        let send = async {
            if token.is_native() {
                self.chain
                    .send_native(&self.treasury, &w.destination, amount)
                    .await
            } else {
                self.chain
                    .send_token(token, &self.treasury, &w.destination, amount)
                    .await
            }
        };
        let tx_hash = tokio::time::timeout(deadline, send).await.map_err(|_| {
            ChainError::new(ChainErrorKind::Timeout, "transfer submission timed out")
        })??;
        tracing::debug!(withdrawal = %w.id, tx = %tx_hash, "Transfer submitted");
        Ok(tx_hash)
    }

    async fn confirm(&self, w: &Withdrawal, tx_hash: &TxHash) -> std::result::Result<(), ChainError> {
        let deadline = Duration::from_secs(self.config.confirmation_timeout_secs);
        let confirm = self.chain.wait_for_confirmation(
            tx_hash,
            self.config.required_confirmations,
            deadline,
        );
        tokio::time::timeout(deadline, confirm).await.map_err(|_| {
            ChainError::new(
                ChainErrorKind::Timeout,
                format!("{tx_hash} unconfirmed after {}s", deadline.as_secs()),
            )
        })??;
        tracing::debug!(withdrawal = %w.id, tx = %tx_hash, "Transfer confirmed");
        Ok(())
    }

    fn completed(&self, withdrawal: &Withdrawal, tx_hash: TxHash) -> Result<SettlementOutcome> {
        let now = Utc::now();
        let withdrawal = self.store.transition(withdrawal.id, |w| {
            w.complete(tx_hash.clone(), now)?;
            self.ledger
                .settle(w.user_id, &w.token_symbol, w.amount)
                .map(|_| ())
        })?;

        let debit = WalletTransaction {
            id: WalletTxId::new(),
            tx_hash: tx_hash.clone(),
            user_id: withdrawal.user_id,
            direction: TxDirection::Debit,
            token_symbol: withdrawal.token_symbol.clone(),
            token_address: self
                .registry
                .by_symbol(&withdrawal.token_symbol)
                .and_then(|t| t.address.clone()),
            amount: withdrawal.net_amount(),
            status: TxStatus::Confirmed,
            from_address: Some(self.treasury.clone()),
            to_address: withdrawal.destination.clone(),
            block_number: None,
            is_test: false,
            created_at: now,
            confirmed_at: Some(now),
        };
        let debit_recorded = matches!(self.tx_log.record_debit(debit), RecordOutcome::Created(_));
        tracing::info!(
            withdrawal = %withdrawal.id,
            user = %withdrawal.user_id,
            tx = %tx_hash,
            amount = %withdrawal.amount,
            debit_recorded,
            "Withdrawal settled"
        );

        let user_id = withdrawal.user_id;
        let qualifying = self.rank.is_qualifying(&withdrawal.token_symbol);
        let mut rank_change = None;
        let mut effects = EffectList::new().then("notify_completed", || {
            self.sink.enqueue(Notification::new(
                user_id,
                NotificationKind::WithdrawalCompleted,
                "Withdrawal completed",
                format!(
                    "{} {} was sent to {}.",
                    withdrawal.net_amount(),
                    withdrawal.token_symbol,
                    withdrawal.destination.short()
                ),
                serde_json::json!({
                    "withdrawal_id": withdrawal.id,
                    "tx_hash": tx_hash,
                    "amount": withdrawal.net_amount().to_string(),
                    "fee": withdrawal.fee.to_string(),
                }),
            ));
            Ok(())
        });
        if qualifying {
            effects = effects.then("rank_check", || {
                rank_change = self.rank.check_rank_after_balance_change(user_id)?;
                Ok(())
            });
        }
        let effects = effects.run(withdrawal.id.to_string().as_str());

        Ok(SettlementOutcome::Completed {
            withdrawal,
            tx_hash,
            debit_recorded,
            rank_change,
            effects,
        })
    }

    fn failed(&self, withdrawal: &Withdrawal, err: &ChainError) -> Result<SettlementOutcome> {
        let class = err.failure_class();
        let reason = err.to_string();
        let withdrawal = self.store.transition(withdrawal.id, |w| {
            w.fail(class, &reason, Utc::now())?;
            if class == FailureClass::Permanent {
                self.ledger
                    .refund_locked(w.user_id, &w.token_symbol, w.amount)?;
            }
            Ok(())
        })?;
        tracing::warn!(
            withdrawal = %withdrawal.id,
            user = %withdrawal.user_id,
            %class,
            kind = %err.kind,
            reason = %reason,
            "Settlement failed"
        );

        let (kind, title, message) = match class {
            FailureClass::Recoverable => (
                NotificationKind::WithdrawalDelayed,
                "Withdrawal delayed",
                format!(
                    "Your withdrawal of {} {} is temporarily delayed and will be retried. Your funds remain reserved.",
                    withdrawal.amount, withdrawal.token_symbol
                ),
            ),
            FailureClass::Permanent => (
                NotificationKind::WithdrawalCancelled,
                "Withdrawal cancelled",
                format!(
                    "Your withdrawal of {} {} could not be sent and was cancelled. The funds are back in your balance.",
                    withdrawal.amount, withdrawal.token_symbol
                ),
            ),
        };
        self.sink.enqueue(Notification::new(
            withdrawal.user_id,
            kind,
            title,
            message,
            serde_json::json!({
                "withdrawal_id": withdrawal.id,
                "class": class,
            }),
        ));

        Ok(SettlementOutcome::Failed {
            withdrawal,
            error: CustodiaError::SettlementFailed { class, reason },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_rank::ReferralDirectory;
    use custodia_types::testing::{MockChainClient, RecordingSink};
    use custodia_types::{PlatformConfig, UserId, WithdrawalStatus};
    use rust_decimal::Decimal;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    struct Fixture {
        worker: SettlementWorker,
        chain: Arc<MockChainClient>,
        ledger: Arc<Ledger>,
        tx_log: Arc<TxLog>,
        store: Arc<WithdrawalStore>,
        rank: Arc<RankEngine>,
        sink: Arc<RecordingSink>,
        treasury: Address,
    }

    fn setup() -> Fixture {
        let config = PlatformConfig::default();
        let registry = Arc::new(TokenRegistry::from_config(&config.tokens).unwrap());
        let ledger = Arc::new(Ledger::new());
        let tx_log = Arc::new(TxLog::new());
        let sink = Arc::new(RecordingSink::new());
        let chain = Arc::new(MockChainClient::new());
        let store = Arc::new(WithdrawalStore::new());
        let rank = Arc::new(RankEngine::new(
            &config,
            &registry,
            ledger.clone(),
            Arc::new(ReferralDirectory::new()),
            sink.clone(),
        ));
        let treasury = Address::numbered(0xfe);
        let worker = SettlementWorker::new(
            config.withdrawal.clone(),
            registry,
            treasury.clone(),
            chain.clone(),
            ledger.clone(),
            tx_log.clone(),
            rank.clone(),
            store.clone(),
            sink.clone(),
        );
        Fixture {
            worker,
            chain,
            ledger,
            tx_log,
            store,
            rank,
            sink,
            treasury,
        }
    }

    /// APPROVED withdrawal of `amount` (fee 1) by a registered user.
    fn approved(f: &Fixture, token: &str, amount: Decimal) -> Withdrawal {
        let user = UserId::new();
        f.rank.register_user(user, None).unwrap();
        approved_for(f, user, token, amount)
    }

    /// APPROVED withdrawal of `amount` (fee 1) with the funds locked.
    fn approved_for(f: &Fixture, user: UserId, token: &str, amount: Decimal) -> Withdrawal {
        f.ledger.credit(user, token, amount).unwrap();
        f.ledger.lock(user, token, amount).unwrap();
        let w = Withdrawal::new(user, token, amount, dec(1), Address::numbered(0x55), Decimal::ZERO);
        let w = f.store.insert_if_no_open(w).unwrap();
        f.store.transition(w.id, |w| w.approve(Utc::now())).unwrap()
    }

    #[tokio::test]
    async fn success_settles_and_records_debit() {
        let f = setup();
        let w = approved(&f, "USDC", dec(50));
        let SettlementOutcome::Completed {
            withdrawal,
            tx_hash,
            debit_recorded,
            effects,
            ..
        } = f.worker.process_withdrawal(w.id).await.unwrap()
        else {
            panic!("expected completion");
        };

        assert_eq!(withdrawal.status, WithdrawalStatus::Completed);
        assert_eq!(withdrawal.tx_hash.as_ref(), Some(&tx_hash));
        assert!(debit_recorded);
        assert!(effects.iter().all(EffectReport::succeeded));

        let sends = f.chain.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].amount, dec(49));
        assert_eq!(sends[0].from, f.treasury);
        assert_eq!(sends[0].token_symbol, "USDC");

        let bal = f.ledger.balance(w.user_id, "USDC");
        assert!(bal.is_zero());
        f.ledger.verify_supply("USDC").unwrap();

        let debit = f.tx_log.get(&tx_hash).unwrap();
        assert_eq!(debit.direction, TxDirection::Debit);
        assert_eq!(debit.amount, dec(49));
        assert_eq!(f.sink.count(NotificationKind::WithdrawalCompleted), 1);
    }

    #[tokio::test]
    async fn failing_rank_check_still_completes() {
        let f = setup();
        // Never registered with the rank engine.
        let w = approved_for(&f, UserId::new(), "USDC", dec(50));
        let SettlementOutcome::Completed { withdrawal, effects, .. } =
            f.worker.process_withdrawal(w.id).await.unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(withdrawal.status, WithdrawalStatus::Completed);
        let failed: Vec<_> = effects.iter().filter(|e| !e.succeeded()).map(|e| e.name).collect();
        assert_eq!(failed, ["rank_check"]);
        assert!(f.ledger.balance(w.user_id, "USDC").is_zero());
        assert_eq!(f.sink.count(NotificationKind::WithdrawalCompleted), 1);
    }

    #[tokio::test]
    async fn native_asset_uses_native_send() {
        let f = setup();
        let w = approved(&f, "ETH", dec(3));
        f.worker.process_withdrawal(w.id).await.unwrap();
        assert_eq!(f.chain.sends()[0].token_symbol, "NATIVE");
        assert_eq!(f.chain.sends()[0].amount, dec(2));
    }

    #[tokio::test]
    async fn second_invocation_is_rejected() {
        let f = setup();
        let w = approved(&f, "USDC", dec(50));
        f.worker.process_withdrawal(w.id).await.unwrap();
        let err = f.worker.process_withdrawal(w.id).await.unwrap_err();
        assert!(matches!(err, CustodiaError::AlreadyProcessed(id) if id == w.id));
        assert_eq!(f.chain.sends().len(), 1);
    }

    #[tokio::test]
    async fn unapproved_withdrawal_is_not_sent() {
        let f = setup();
        let user = UserId::new();
        f.ledger.credit(user, "USDC", dec(20)).unwrap();
        f.ledger.lock(user, "USDC", dec(20)).unwrap();
        let w = f
            .store
            .insert_if_no_open(Withdrawal::new(
                user,
                "USDC",
                dec(20),
                dec(1),
                Address::numbered(0x55),
                Decimal::ZERO,
            ))
            .unwrap();
        let err = f.worker.process_withdrawal(w.id).await.unwrap_err();
        assert!(matches!(err, CustodiaError::InvalidWithdrawalTransition { .. }));
        assert!(f.chain.sends().is_empty());
    }

    #[tokio::test]
    async fn permanent_failure_refunds() {
        let f = setup();
        let w = approved(&f, "USDC", dec(50));
        f.chain.fail_next_send(ChainErrorKind::InvalidDestination);

        let SettlementOutcome::Failed { withdrawal, error } =
            f.worker.process_withdrawal(w.id).await.unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(withdrawal.status, WithdrawalStatus::Failed);
        assert_eq!(withdrawal.failure_class, Some(FailureClass::Permanent));
        assert!(matches!(
            error,
            CustodiaError::SettlementFailed { class: FailureClass::Permanent, .. }
        ));

        let bal = f.ledger.balance(w.user_id, "USDC");
        assert_eq!((bal.available, bal.locked), (dec(50), Decimal::ZERO));
        assert_eq!(f.sink.count(NotificationKind::WithdrawalCancelled), 1);
        assert!(f.store.open_for(w.user_id).is_none());
    }

    #[tokio::test]
    async fn recoverable_failure_keeps_funds_locked() {
        let f = setup();
        let w = approved(&f, "USDC", dec(50));
        f.chain.fail_next_confirmation(ChainErrorKind::Rpc);

        let SettlementOutcome::Failed { withdrawal, .. } =
            f.worker.process_withdrawal(w.id).await.unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(withdrawal.failure_class, Some(FailureClass::Recoverable));
        let bal = f.ledger.balance(w.user_id, "USDC");
        assert_eq!((bal.available, bal.locked), (Decimal::ZERO, dec(50)));
        assert_eq!(f.sink.count(NotificationKind::WithdrawalDelayed), 1);
        assert!(f.store.open_for(w.user_id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_timeout_is_recoverable() {
        let f = setup();
        let w = approved(&f, "USDC", dec(50));
        f.chain.hang_confirmations();

        let SettlementOutcome::Failed { withdrawal, error } =
            f.worker.process_withdrawal(w.id).await.unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(withdrawal.failure_class, Some(FailureClass::Recoverable));
        assert!(error.to_string().contains("timeout"));
        assert_eq!(f.ledger.balance(w.user_id, "USDC").locked, dec(50));
    }

    #[tokio::test]
    async fn requeue_after_unconfirmed_send_waits_instead_of_resending() {
        let f = setup();
        let w = approved(&f, "USDC", dec(50));
        f.chain.fail_next_confirmation(ChainErrorKind::Timeout);

        let SettlementOutcome::Failed { withdrawal, .. } =
            f.worker.process_withdrawal(w.id).await.unwrap()
        else {
            panic!("expected failure");
        };
        assert_eq!(withdrawal.failure_class, Some(FailureClass::Recoverable));
        let first = f.chain.sends()[0].tx_hash.clone();
        assert_eq!(f.store.get(w.id).unwrap().submitted_tx_hash, Some(first.clone()));

        f.store.transition(w.id, |w| w.requeue(Utc::now())).unwrap();
        let SettlementOutcome::Completed { tx_hash, .. } =
            f.worker.process_withdrawal(w.id).await.unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(tx_hash, first);
        assert_eq!(f.chain.sends().len(), 1);
        let bal = f.ledger.balance(w.user_id, "USDC");
        assert!(bal.is_zero());
        f.ledger.verify_supply("USDC").unwrap();
    }

    #[tokio::test]
    async fn failed_send_leaves_nothing_to_wait_on() {
        let f = setup();
        let w = approved(&f, "USDC", dec(50));
        f.chain.fail_next_send(ChainErrorKind::Rpc);
        f.worker.process_withdrawal(w.id).await.unwrap();
        assert!(f.store.get(w.id).unwrap().submitted_tx_hash.is_none());

        f.store.transition(w.id, |w| w.requeue(Utc::now())).unwrap();
        let outcome = f.worker.process_withdrawal(w.id).await.unwrap();
        assert!(matches!(outcome, SettlementOutcome::Completed { .. }));
        assert_eq!(f.chain.sends().len(), 1);
    }

    #[tokio::test]
    async fn debit_already_seen_is_not_duplicated() {
        let f = setup();
        let w = approved(&f, "USDC", dec(50));
        // The mock numbers its hashes; pre-seed the first one.
        let seen = TxHash::synthetic("mock-send-0");
        f.tx_log.record_debit(WalletTransaction {
            id: WalletTxId::new(),
            tx_hash: seen.clone(),
            user_id: w.user_id,
            direction: TxDirection::Debit,
            token_symbol: "USDC".into(),
            token_address: None,
            amount: dec(49),
            status: TxStatus::Confirmed,
            from_address: None,
            to_address: w.destination.clone(),
            block_number: Some(1),
            is_test: false,
            created_at: Utc::now(),
            confirmed_at: Some(Utc::now()),
        });

        let SettlementOutcome::Completed { tx_hash, debit_recorded, .. } =
            f.worker.process_withdrawal(w.id).await.unwrap()
        else {
            panic!("expected completion");
        };
        assert_eq!(tx_hash, seen);
        assert!(!debit_recorded);
        assert_eq!(f.tx_log.len(), 1);
        assert!(f.ledger.balance(w.user_id, "USDC").is_zero());
    }
}
