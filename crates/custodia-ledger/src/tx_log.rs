//! Append-only wallet transaction log keyed by transaction hash.
//!
//! The hash is the idempotency key for deposit ingestion: a record is
//! created at most once, and a PENDING record is promoted at most once.
//! Both the creation of a CONFIRMED record and a promotion run their
//! ledger credit while the hash's shard lock is held, so a concurrent
//! redelivery of the same hash observes either "absent" or "confirmed and
//! credited", never a confirmed record without its credit.

use chrono::{DateTime, Utc};
use custodia_types::{Result, TxDirection, TxHash, UserId, WalletTransaction};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Result of inserting a record.
#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Created(WalletTransaction),
    /// A record with this hash already existed and was left untouched.
    Existing(WalletTransaction),
}

/// Result of promoting a PENDING record.
#[derive(Debug, Clone)]
pub enum PromoteOutcome {
    Promoted(WalletTransaction),
    AlreadyConfirmed,
    NotFound,
}

#[derive(Debug, Default)]
pub struct TxLog {
    by_hash: DashMap<TxHash, WalletTransaction>,
}

impl TxLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record unless its hash is already known.
    ///
    /// When the record is CONFIRMED, `on_confirmed` runs first under the
    /// hash lock; if it fails nothing is inserted and the error is returned.
    pub fn insert_new<F>(&self, tx: WalletTransaction, on_confirmed: F) -> Result<RecordOutcome>
    where
        F: FnOnce(&WalletTransaction) -> Result<()>,
    {
        match self.by_hash.entry(tx.tx_hash.clone()) {
            Entry::Occupied(existing) => Ok(RecordOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                if tx.is_confirmed() {
                    on_confirmed(&tx)?;
                }
                slot.insert(tx.clone());
                Ok(RecordOutcome::Created(tx))
            }
        }
    }

    /// Promote PENDING → CONFIRMED, running `on_promote` under the hash lock.
    ///
    /// If `on_promote` fails the record stays PENDING so a redelivery can
    /// try again.
    pub fn promote<F>(&self, tx_hash: &TxHash, at: DateTime<Utc>, on_promote: F) -> Result<PromoteOutcome>
    where
        F: FnOnce(&WalletTransaction) -> Result<()>,
    {
        let Some(mut record) = self.by_hash.get_mut(tx_hash) else {
            return Ok(PromoteOutcome::NotFound);
        };
        if record.is_confirmed() {
            return Ok(PromoteOutcome::AlreadyConfirmed);
        }
        on_promote(&record)?;
        record.confirm(at);
        Ok(PromoteOutcome::Promoted(record.clone()))
    }

    /// Record an outbound settlement. Skipped if the hash is already
    /// present (e.g. the chain monitor saw the transfer first).
    pub fn record_debit(&self, tx: WalletTransaction) -> RecordOutcome {
        debug_assert_eq!(tx.direction, TxDirection::Debit);
        match self.by_hash.entry(tx.tx_hash.clone()) {
            Entry::Occupied(existing) => {
                tracing::info!(tx = %tx.tx_hash, "Debit already recorded, skipping");
                RecordOutcome::Existing(existing.get().clone())
            }
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
                RecordOutcome::Created(tx)
            }
        }
    }

    #[must_use]
    pub fn get(&self, tx_hash: &TxHash) -> Option<WalletTransaction> {
        self.by_hash.get(tx_hash).map(|r| r.clone())
    }

    /// A user's records, oldest first.
    #[must_use]
    pub fn for_user(&self, user_id: UserId) -> Vec<WalletTransaction> {
        let mut records: Vec<WalletTransaction> = self
            .by_hash
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_types::{Address, CustodiaError, TxStatus, WalletTxId};
    use rust_decimal::Decimal;
    use std::cell::Cell;

    fn record(seed: &str, status: TxStatus, direction: TxDirection) -> WalletTransaction {
        WalletTransaction {
            id: WalletTxId::new(),
            tx_hash: TxHash::synthetic(seed),
            user_id: UserId::new(),
            direction,
            token_symbol: "USDT".into(),
            token_address: None,
            amount: Decimal::new(100, 0),
            status,
            from_address: None,
            to_address: Address::numbered(1),
            block_number: Some(1),
            is_test: false,
            created_at: Utc::now(),
            confirmed_at: None,
        }
    }

    #[test]
    fn confirmed_insert_runs_callback_once() {
        let log = TxLog::new();
        let calls = Cell::new(0);
        let tx = record("a", TxStatus::Confirmed, TxDirection::Credit);

        let first = log
            .insert_new(tx.clone(), |_| {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap();
        assert!(matches!(first, RecordOutcome::Created(_)));

        let second = log
            .insert_new(tx, |_| {
                calls.set(calls.get() + 1);
                Ok(())
            })
            .unwrap();
        assert!(matches!(second, RecordOutcome::Existing(_)));
        assert_eq!(calls.get(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn pending_insert_skips_callback() {
        let log = TxLog::new();
        let tx = record("p", TxStatus::Pending, TxDirection::Credit);
        log.insert_new(tx, |_| panic!("must not credit pending"))
            .unwrap();
    }

    #[test]
    fn failed_callback_inserts_nothing() {
        let log = TxLog::new();
        let tx = record("f", TxStatus::Confirmed, TxDirection::Credit);
        let hash = tx.tx_hash.clone();
        let err = log
            .insert_new(tx, |_| Err(CustodiaError::Internal("ledger down".into())))
            .unwrap_err();
        assert!(matches!(err, CustodiaError::Internal(_)));
        assert!(log.get(&hash).is_none());
    }

    #[test]
    fn promote_exactly_once() {
        let log = TxLog::new();
        let tx = record("q", TxStatus::Pending, TxDirection::Credit);
        let hash = tx.tx_hash.clone();
        log.insert_new(tx, |_| Ok(())).unwrap();

        let calls = Cell::new(0);
        let bump = |_: &WalletTransaction| {
            calls.set(calls.get() + 1);
            Ok(())
        };
        let first = log.promote(&hash, Utc::now(), bump).unwrap();
        assert!(matches!(first, PromoteOutcome::Promoted(ref t) if t.is_confirmed()));
        let second = log.promote(&hash, Utc::now(), bump).unwrap();
        assert!(matches!(second, PromoteOutcome::AlreadyConfirmed));
        assert_eq!(calls.get(), 1);

        let missing = log
            .promote(&TxHash::synthetic("nope"), Utc::now(), bump)
            .unwrap();
        assert!(matches!(missing, PromoteOutcome::NotFound));
    }

    #[test]
    fn failed_promotion_stays_pending() {
        let log = TxLog::new();
        let tx = record("r", TxStatus::Pending, TxDirection::Credit);
        let hash = tx.tx_hash.clone();
        log.insert_new(tx, |_| Ok(())).unwrap();
        assert!(
            log.promote(&hash, Utc::now(), |_| Err(CustodiaError::Internal("x".into())))
                .is_err()
        );
        assert!(!log.get(&hash).unwrap().is_confirmed());
    }

    #[test]
    fn debit_skips_existing_hash() {
        let log = TxLog::new();
        let credit = record("shared", TxStatus::Confirmed, TxDirection::Credit);
        log.insert_new(credit, |_| Ok(())).unwrap();
        let debit = record("shared", TxStatus::Confirmed, TxDirection::Debit);
        assert!(matches!(log.record_debit(debit), RecordOutcome::Existing(_)));
        assert_eq!(log.len(), 1);

        let fresh = record("fresh", TxStatus::Confirmed, TxDirection::Debit);
        let user = fresh.user_id;
        assert!(matches!(log.record_debit(fresh), RecordOutcome::Created(_)));
        assert_eq!(log.for_user(user).len(), 1);
    }
}
