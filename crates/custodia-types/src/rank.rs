//! Rank tiers, rank status, and the per-tier requirement table.
//!
//! ## Maintenance ladder (`RankStatus`)
//!
//! ```text
//!   ACTIVE ──miss──▶ WARNING ──miss──▶ TEMPORARY_DOWNRANK ──miss──▶ DOWNRANKED
//!     ▲                 │                      │                        │
//!     └────────── requirements met (single step, any depth) ───────────┘
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CustodiaError, Result};

/// Rank tiers, lowest first. Ordering follows tier height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    Recruit,
    Bronze,
    Silver,
    Gold,
}

impl Rank {
    /// All ranks, lowest first.
    pub const ALL: [Self; 4] = [Self::Recruit, Self::Bronze, Self::Silver, Self::Gold];

    #[must_use]
    pub fn tier(self) -> usize {
        match self {
            Self::Recruit => 0,
            Self::Bronze => 1,
            Self::Silver => 2,
            Self::Gold => 3,
        }
    }

    #[must_use]
    pub fn from_tier(tier: usize) -> Self {
        Self::ALL[tier.min(Self::ALL.len() - 1)]
    }

    /// The next rank up, if any.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.tier() + 1).copied()
    }

    /// Reduce by `tiers`, floored at RECRUIT.
    #[must_use]
    pub fn down(self, tiers: usize) -> Self {
        Self::from_tier(self.tier().saturating_sub(tiers))
    }
}

impl std::fmt::Display for Rank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recruit => write!(f, "RECRUIT"),
            Self::Bronze => write!(f, "BRONZE"),
            Self::Silver => write!(f, "SILVER"),
            Self::Gold => write!(f, "GOLD"),
        }
    }
}

/// Position on the maintenance ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RankStatus {
    Active,
    Warning,
    TemporaryDownrank,
    Downranked,
}

impl std::fmt::Display for RankStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Warning => write!(f, "WARNING"),
            Self::TemporaryDownrank => write!(f, "TEMPORARY_DOWNRANK"),
            Self::Downranked => write!(f, "DOWNRANKED"),
        }
    }
}

/// What it takes to reach a rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConquestRequirement {
    pub min_directs: u32,
    /// Blocked qualifying balance, USD.
    pub min_blocked: Decimal,
    /// Cumulative network deposit volume, USD.
    pub min_network_volume: Decimal,
}

/// What it takes to keep a rank for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRequirement {
    pub min_active_directs: u32,
    /// Network deposit volume within the period, USD.
    pub min_monthly_volume: Decimal,
    pub min_blocked: Decimal,
}

/// Everything configured for one rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankTier {
    pub conquest: ConquestRequirement,
    pub maintenance: MaintenanceRequirement,
    /// Daily withdrawal ceiling, USD.
    pub daily_withdrawal_limit: Decimal,
}

impl RankTier {
    fn new(
        directs: u32,
        blocked: i64,
        volume: i64,
        active_directs: u32,
        monthly: i64,
        daily_limit: i64,
    ) -> Self {
        Self {
            conquest: ConquestRequirement {
                min_directs: directs,
                min_blocked: Decimal::new(blocked, 0),
                min_network_volume: Decimal::new(volume, 0),
            },
            maintenance: MaintenanceRequirement {
                min_active_directs: active_directs,
                min_monthly_volume: Decimal::new(monthly, 0),
                min_blocked: Decimal::new(blocked, 0),
            },
            daily_withdrawal_limit: Decimal::new(daily_limit, 0),
        }
    }
}

/// Requirement table for every rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankTable {
    pub recruit: RankTier,
    pub bronze: RankTier,
    pub silver: RankTier,
    pub gold: RankTier,
}

impl Default for RankTable {
    fn default() -> Self {
        Self {
            recruit: RankTier::new(0, 0, 0, 0, 0, 100),
            bronze: RankTier::new(3, 60, 500, 2, 100, 500),
            silver: RankTier::new(6, 300, 5_000, 4, 1_000, 2_000),
            gold: RankTier::new(10, 1_000, 25_000, 6, 5_000, 10_000),
        }
    }
}

impl RankTable {
    #[must_use]
    pub fn tier(&self, rank: Rank) -> &RankTier {
        match rank {
            Rank::Recruit => &self.recruit,
            Rank::Bronze => &self.bronze,
            Rank::Silver => &self.silver,
            Rank::Gold => &self.gold,
        }
    }

    /// Blocked balance (USD) a rank requires.
    #[must_use]
    pub fn required_blocked(&self, rank: Rank) -> Decimal {
        self.tier(rank).conquest.min_blocked
    }

    /// Check that thresholds never decrease as rank increases.
    ///
    /// # Errors
    /// Returns [`CustodiaError::InvalidRankTable`] naming the first violation.
    pub fn validate(&self) -> Result<()> {
        for pair in Rank::ALL.windows(2) {
            let (lo, hi) = (self.tier(pair[0]), self.tier(pair[1]));
            let ok = lo.conquest.min_directs <= hi.conquest.min_directs
                && lo.conquest.min_blocked <= hi.conquest.min_blocked
                && lo.conquest.min_network_volume <= hi.conquest.min_network_volume
                && lo.daily_withdrawal_limit <= hi.daily_withdrawal_limit;
            if !ok {
                return Err(CustodiaError::InvalidRankTable(format!(
                    "{} thresholds exceed {}",
                    pair[0], pair[1]
                )));
            }
        }
        let negative = Rank::ALL.iter().any(|r| {
            let t = self.tier(*r);
            t.conquest.min_blocked.is_sign_negative()
                || t.maintenance.min_blocked.is_sign_negative()
                || t.daily_withdrawal_limit.is_sign_negative()
        });
        if negative {
            return Err(CustodiaError::InvalidRankTable(
                "negative threshold".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_ordering_and_steps() {
        assert!(Rank::Gold > Rank::Silver);
        assert_eq!(Rank::Recruit.next(), Some(Rank::Bronze));
        assert_eq!(Rank::Gold.next(), None);
        assert_eq!(Rank::Gold.down(2), Rank::Bronze);
        assert_eq!(Rank::Bronze.down(2), Rank::Recruit);
        assert_eq!(Rank::Recruit.down(1), Rank::Recruit);
    }

    #[test]
    fn default_table_is_valid() {
        let table = RankTable::default();
        table.validate().unwrap();
        assert_eq!(table.required_blocked(Rank::Bronze), Decimal::new(60, 0));
        assert_eq!(table.required_blocked(Rank::Recruit), Decimal::ZERO);
    }

    #[test]
    fn decreasing_table_rejected() {
        let mut table = RankTable::default();
        table.silver.conquest.min_blocked = Decimal::new(10, 0);
        let err = table.validate().unwrap_err();
        assert!(matches!(err, CustodiaError::InvalidRankTable(_)));
    }

    #[test]
    fn status_display() {
        assert_eq!(
            RankStatus::TemporaryDownrank.to_string(),
            "TEMPORARY_DOWNRANK"
        );
        assert_eq!(Rank::Silver.to_string(), "SILVER");
    }
}
