//! The rank-relevant facet of a user account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Rank, RankStatus, UserId};

/// Rank and referral state of one user.
///
/// Only the rank engine mutates `current_rank`, `rank_status`,
/// `warning_count`, `original_rank` and `grace_period_ends_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    /// Direct upline, if the user joined through a referral.
    pub referrer: Option<UserId>,
    pub is_activated: bool,
    pub activated_at: Option<DateTime<Utc>>,
    /// Cumulative confirmed qualifying deposits (USD).
    pub total_qualifying_deposits: Decimal,
    pub current_rank: Rank,
    pub rank_status: RankStatus,
    /// Sum of blocked qualifying-token balance across ledger rows.
    pub blocked_balance: Decimal,
    /// 0..=3; position on the downgrade ladder.
    pub warning_count: u8,
    /// Rank snapshotted on entering WARNING.
    pub original_rank: Option<Rank>,
    pub grace_period_ends_at: Option<DateTime<Utc>>,
    /// Activated direct referrals.
    pub total_directs: u32,
    /// Cumulative deposit volume of the downline network (USD).
    pub lifetime_volume: Decimal,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    #[must_use]
    pub fn new(id: UserId, referrer: Option<UserId>) -> Self {
        Self {
            id,
            referrer,
            is_activated: false,
            activated_at: None,
            total_qualifying_deposits: Decimal::ZERO,
            current_rank: Rank::Recruit,
            rank_status: RankStatus::Active,
            blocked_balance: Decimal::ZERO,
            warning_count: 0,
            original_rank: None,
            grace_period_ends_at: None,
            total_directs: 0,
            lifetime_volume: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    /// Whether the user is somewhere on the downgrade ladder.
    #[must_use]
    pub fn in_ladder(&self) -> bool {
        matches!(
            self.rank_status,
            RankStatus::Warning | RankStatus::TemporaryDownrank
        )
    }

    /// Clear every ladder marker and return to ACTIVE.
    pub fn reset_ladder(&mut self) {
        self.rank_status = RankStatus::Active;
        self.warning_count = 0;
        self.original_rank = None;
        self.grace_period_ends_at = None;
    }
}

/// Trailing-period snapshot evaluated against maintenance requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceStats {
    pub active_directs: u32,
    pub monthly_volume: Decimal,
    pub blocked_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_user_is_active_recruit() {
        let user = UserAccount::new(UserId::new(), None);
        assert_eq!(user.current_rank, Rank::Recruit);
        assert_eq!(user.rank_status, RankStatus::Active);
        assert!(!user.is_activated);
        assert!(!user.in_ladder());
    }

    #[test]
    fn reset_ladder_clears_markers() {
        let mut user = UserAccount::new(UserId::new(), None);
        user.rank_status = RankStatus::TemporaryDownrank;
        user.warning_count = 2;
        user.original_rank = Some(Rank::Gold);
        user.grace_period_ends_at = Some(Utc::now());
        assert!(user.in_ladder());

        user.reset_ladder();
        assert_eq!(user.rank_status, RankStatus::Active);
        assert_eq!(user.warning_count, 0);
        assert!(user.original_rank.is_none());
        assert!(user.grace_period_ends_at.is_none());
    }
}
