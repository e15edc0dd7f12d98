//! Threshold checks. Pure functions over the rank table and a snapshot of
//! the user's numbers; nothing here reads or writes state.

use custodia_types::{MaintenanceStats, Rank, RankTable};
use rust_decimal::Decimal;
use serde::Serialize;

/// The numbers conquest is judged on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConquestSnapshot {
    pub directs: u32,
    pub blocked: Decimal,
    pub network_volume: Decimal,
}

/// One unmet threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shortfall {
    pub metric: &'static str,
    pub required: Decimal,
    pub actual: Decimal,
}

/// Outcome of comparing a snapshot against one rank's thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementCheck {
    pub rank: Rank,
    pub shortfalls: Vec<Shortfall>,
}

impl RequirementCheck {
    #[must_use]
    pub fn met(&self) -> bool {
        self.shortfalls.is_empty()
    }
}

fn compare(shortfalls: &mut Vec<Shortfall>, metric: &'static str, required: Decimal, actual: Decimal) {
    if actual < required {
        shortfalls.push(Shortfall {
            metric,
            required,
            actual,
        });
    }
}

/// Compare `snapshot` with the conquest thresholds of `target`.
#[must_use]
pub fn check_conquest(table: &RankTable, target: Rank, snapshot: &ConquestSnapshot) -> RequirementCheck {
    let req = &table.tier(target).conquest;
    let mut shortfalls = Vec::new();
    compare(
        &mut shortfalls,
        "directs",
        Decimal::from(req.min_directs),
        Decimal::from(snapshot.directs),
    );
    compare(&mut shortfalls, "blocked", req.min_blocked, snapshot.blocked);
    compare(
        &mut shortfalls,
        "network_volume",
        req.min_network_volume,
        snapshot.network_volume,
    );
    RequirementCheck {
        rank: target,
        shortfalls,
    }
}

/// Compare last period's `stats` with the upkeep thresholds of `rank`.
#[must_use]
pub fn check_maintenance(table: &RankTable, rank: Rank, stats: &MaintenanceStats) -> RequirementCheck {
    let req = &table.tier(rank).maintenance;
    let mut shortfalls = Vec::new();
    compare(
        &mut shortfalls,
        "active_directs",
        Decimal::from(req.min_active_directs),
        Decimal::from(stats.active_directs),
    );
    compare(
        &mut shortfalls,
        "monthly_volume",
        req.min_monthly_volume,
        stats.monthly_volume,
    );
    compare(&mut shortfalls, "blocked", req.min_blocked, stats.blocked_balance);
    RequirementCheck { rank, shortfalls }
}

/// Highest rank reachable from `current` by climbing one tier at a time
/// while each next tier's conquest thresholds are met.
#[must_use]
pub fn conquerable_rank(table: &RankTable, current: Rank, snapshot: &ConquestSnapshot) -> Rank {
    let mut rank = current;
    while let Some(next) = rank.next() {
        if !check_conquest(table, next, snapshot).met() {
            break;
        }
        rank = next;
    }
    rank
}

/// Highest rank at or below `current` whose blocked-balance floor is
/// covered by `blocked`. Never promotes.
#[must_use]
pub fn rank_for_blocked(table: &RankTable, current: Rank, blocked: Decimal) -> Rank {
    let mut rank = current;
    while rank > Rank::Recruit && blocked < table.required_blocked(rank) {
        rank = rank.down(1);
    }
    rank
}
