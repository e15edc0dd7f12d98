//! User accounts and the referral tree.
//!
//! Referrers are fixed at registration and must already exist, so the
//! tree is acyclic and upline walks terminate.

use chrono::{DateTime, Utc};
use custodia_types::{CustodiaError, Result, TxHash, UserAccount, UserId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;

/// Network volume credited to an upline by one downline deposit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeEntry {
    pub amount: Decimal,
    pub source: UserId,
    /// Deposit that produced the volume. One entry per (upline, deposit).
    pub reference: TxHash,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ReferralDirectory {
    users: DashMap<UserId, UserAccount>,
    directs: DashMap<UserId, Vec<UserId>>,
    volume: DashMap<UserId, Vec<VolumeEntry>>,
}

impl ReferralDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user. Re-registering an existing id returns the stored
    /// account unchanged.
    ///
    /// # Errors
    /// Returns `UserNotFound` if `referrer` is not registered.
    pub fn register(&self, id: UserId, referrer: Option<UserId>) -> Result<UserAccount> {
        if let Some(sponsor) = referrer {
            if !self.users.contains_key(&sponsor) {
                return Err(CustodiaError::UserNotFound(sponsor));
            }
        }
        match self.users.entry(id) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                let account = UserAccount::new(id, referrer);
                slot.insert(account.clone());
                if let Some(sponsor) = referrer {
                    self.directs.entry(sponsor).or_default().push(id);
                }
                Ok(account)
            }
        }
    }

    #[must_use]
    pub fn get(&self, id: UserId) -> Option<UserAccount> {
        self.users.get(&id).map(|u| u.clone())
    }

    /// # Errors
    /// Returns `UserNotFound` if unknown.
    pub fn require(&self, id: UserId) -> Result<UserAccount> {
        self.get(id).ok_or(CustodiaError::UserNotFound(id))
    }

    /// Mutate one account under its row lock. `f` must not call back into
    /// the directory.
    ///
    /// # Errors
    /// Returns `UserNotFound` if unknown.
    pub fn update<T>(&self, id: UserId, f: impl FnOnce(&mut UserAccount) -> T) -> Result<T> {
        let mut account = self
            .users
            .get_mut(&id)
            .ok_or(CustodiaError::UserNotFound(id))?;
        Ok(f(&mut account))
    }

    /// Up to `depth` ancestors, nearest first.
    #[must_use]
    pub fn uplines(&self, id: UserId, depth: usize) -> Vec<UserId> {
        let mut chain = Vec::with_capacity(depth);
        let mut cursor = self.users.get(&id).and_then(|u| u.referrer);
        while let Some(upline) = cursor {
            if chain.len() == depth {
                break;
            }
            chain.push(upline);
            cursor = self.users.get(&upline).and_then(|u| u.referrer);
        }
        chain
    }

    /// Direct referrals of `id`.
    #[must_use]
    pub fn directs(&self, id: UserId) -> Vec<UserId> {
        self.directs.get(&id).map(|d| d.clone()).unwrap_or_default()
    }

    /// Append a volume entry. Returns `false` if this deposit was already
    /// credited to `upline`.
    pub fn record_volume(&self, upline: UserId, entry: VolumeEntry) -> bool {
        let mut entries = self.volume.entry(upline).or_default();
        if entries.iter().any(|e| e.reference == entry.reference) {
            return false;
        }
        entries.push(entry);
        true
    }

    /// Network volume credited to `id` in `[from, to)`.
    #[must_use]
    pub fn volume_between(&self, id: UserId, from: DateTime<Utc>, to: DateTime<Utc>) -> Decimal {
        self.volume.get(&id).map_or(Decimal::ZERO, |entries| {
            entries
                .iter()
                .filter(|e| e.at >= from && e.at < to)
                .map(|e| e.amount)
                .sum()
        })
    }

    /// Every registered id, sorted.
    #[must_use]
    pub fn user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.users.iter().map(|u| *u.key()).collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn unknown_referrer_rejected() {
        let dir = ReferralDirectory::new();
        let ghost = UserId::new();
        let err = dir.register(UserId::new(), Some(ghost)).unwrap_err();
        assert!(matches!(err, CustodiaError::UserNotFound(id) if id == ghost));
        assert!(dir.is_empty());
    }

    #[test]
    fn uplines_bounded_by_depth() {
        let dir = ReferralDirectory::new();
        let mut chain = vec![UserId::new()];
        dir.register(chain[0], None).unwrap();
        for i in 1..6 {
            let id = UserId::new();
            dir.register(id, Some(chain[i - 1])).unwrap();
            chain.push(id);
        }
        let leaf = chain[5];
        assert_eq!(dir.uplines(leaf, 2), vec![chain[4], chain[3]]);
        assert_eq!(dir.uplines(leaf, 10).len(), 5);
        assert!(dir.uplines(chain[0], 10).is_empty());
        assert_eq!(dir.directs(chain[0]), vec![chain[1]]);
    }

    #[test]
    fn register_is_idempotent() {
        let dir = ReferralDirectory::new();
        let root = UserId::new();
        let child = UserId::new();
        dir.register(root, None).unwrap();
        dir.register(child, Some(root)).unwrap();
        dir.register(child, Some(root)).unwrap();
        assert_eq!(dir.directs(root).len(), 1);
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn volume_window_is_half_open() {
        let dir = ReferralDirectory::new();
        let id = UserId::new();
        let t0 = Utc::now();
        for (days, amount) in [(0, 100), (10, 50), (30, 25)] {
            assert!(dir.record_volume(
                id,
                VolumeEntry {
                    amount: Decimal::new(amount, 0),
                    source: UserId::new(),
                    reference: TxHash::synthetic(&format!("vol-{days}")),
                    at: t0 + Duration::days(days),
                },
            ));
        }
        let replay = VolumeEntry {
            amount: Decimal::new(100, 0),
            source: UserId::new(),
            reference: TxHash::synthetic("vol-0"),
            at: t0,
        };
        assert!(!dir.record_volume(id, replay));
        assert_eq!(
            dir.volume_between(id, t0, t0 + Duration::days(30)),
            Decimal::new(150, 0)
        );
        assert_eq!(dir.volume_between(UserId::new(), t0, t0), Decimal::ZERO);
    }
}
