//! Withdrawal records plus the one-open-request-per-user index.
//!
//! Lock order is `open` then `rows`. [`WithdrawalStore::transition`] holds
//! only a `rows` guard while mutating and touches `open` after dropping it.
//!
//! Admission claims the slot with [`WithdrawalStore::reserve`] before it
//! moves any funds, then fills it with [`WithdrawalStore::insert_reserved`]
//! or gives it back with [`WithdrawalStore::release`].

use chrono::{DateTime, Utc};
use custodia_types::{CustodiaError, Result, UserId, Withdrawal, WithdrawalId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;

#[derive(Debug, Default)]
pub struct WithdrawalStore {
    rows: DashMap<WithdrawalId, Withdrawal>,
    /// User → the request holding their open slot.
    open: DashMap<UserId, WithdrawalId>,
}

impl WithdrawalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the user's open slot for a request not inserted yet.
    ///
    /// # Errors
    /// [`CustodiaError::WithdrawalAlreadyOpen`] naming the holder.
    pub fn reserve(&self, user_id: UserId) -> Result<WithdrawalId> {
        match self.open.entry(user_id) {
            Entry::Occupied(slot) => Err(CustodiaError::WithdrawalAlreadyOpen {
                user: user_id,
                existing: *slot.get(),
            }),
            Entry::Vacant(slot) => {
                let id = WithdrawalId::new();
                slot.insert(id);
                Ok(id)
            }
        }
    }

    /// Store a request under the slot reserved for its id.
    ///
    /// # Errors
    /// `Internal` if the slot is not held by `withdrawal.id`.
    pub fn insert_reserved(&self, withdrawal: Withdrawal) -> Result<Withdrawal> {
        let slot = self.open.get(&withdrawal.user_id);
        if slot.as_deref() != Some(&withdrawal.id) {
            return Err(CustodiaError::Internal(format!(
                "withdrawal {} does not hold the open slot of {}",
                withdrawal.id, withdrawal.user_id
            )));
        }
        self.rows.insert(withdrawal.id, withdrawal.clone());
        drop(slot);
        Ok(withdrawal)
    }

    /// Give back a reservation that was never filled.
    pub fn release(&self, user_id: UserId, id: WithdrawalId) {
        if !self.rows.contains_key(&id) {
            self.open.remove_if(&user_id, |_, open| *open == id);
        }
    }

    /// Reserve and insert in one call.
    ///
    /// # Errors
    /// [`CustodiaError::WithdrawalAlreadyOpen`] naming the existing request.
    pub fn insert_if_no_open(&self, mut withdrawal: Withdrawal) -> Result<Withdrawal> {
        withdrawal.id = self.reserve(withdrawal.user_id)?;
        self.insert_reserved(withdrawal)
    }

    /// # Errors
    /// [`CustodiaError::WithdrawalNotFound`].
    pub fn get(&self, id: WithdrawalId) -> Result<Withdrawal> {
        self.rows
            .get(&id)
            .map(|w| w.clone())
            .ok_or(CustodiaError::WithdrawalNotFound(id))
    }

    /// Apply `change` under the row lock. On error the row is untouched.
    /// Frees the user's open slot when the request stops holding it.
    pub fn transition<F>(&self, id: WithdrawalId, change: F) -> Result<Withdrawal>
    where
        F: FnOnce(&mut Withdrawal) -> Result<()>,
    {
        let updated = {
            let mut row = self
                .rows
                .get_mut(&id)
                .ok_or(CustodiaError::WithdrawalNotFound(id))?;
            let mut draft = row.clone();
            change(&mut draft)?;
            *row = draft.clone();
            draft
        };
        if !updated.holds_open_slot() {
            self.open.remove_if(&updated.user_id, |_, open| *open == id);
        }
        Ok(updated)
    }

    /// The user's open request, if any.
    #[must_use]
    pub fn open_for(&self, user_id: UserId) -> Option<Withdrawal> {
        let id = *self.open.get(&user_id)?;
        self.rows.get(&id).map(|w| w.clone())
    }

    /// USD already consumed today (UTC) by the user's requests.
    #[must_use]
    pub fn daily_used(&self, user_id: UserId, now: DateTime<Utc>) -> Decimal {
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map_or(now, |midnight| midnight.and_utc());
        self.rows
            .iter()
            .filter(|w| {
                w.user_id == user_id && w.created_at >= day_start && w.counts_toward_daily_limit()
            })
            .map(|w| w.amount_usd)
            .sum()
    }

    /// The user's requests, oldest first.
    #[must_use]
    pub fn for_user(&self, user_id: UserId) -> Vec<Withdrawal> {
        let mut list: Vec<Withdrawal> = self
            .rows
            .iter()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.clone())
            .collect();
        list.sort_by_key(|w| w.created_at);
        list
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
