//! The rank engine.
//!
//! Owns every write to the rank facet of a [`UserAccount`]: activation,
//! conquest promotion, auto-blocking of qualifying deposits, demotion
//! when blocked balance drops, and the maintenance ladder.
//!
//! `User.blocked_balance` is a cache of `Σ blocked` over qualifying ledger
//! rows; every operation that depends on it recomputes it first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use custodia_ledger::Ledger;
use custodia_types::{
    MaintenanceStats, Notification, NotificationKind, NotificationSink, PlatformConfig, Rank,
    RankTable, Result, TokenRegistry, TxHash, UserAccount, UserId,
};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::directory::{ReferralDirectory, VolumeEntry};
use crate::ladder::{self, LadderOutcome};
use crate::requirements::{self, ConquestSnapshot};

/// A rank transition outside the maintenance ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankChange {
    pub user_id: UserId,
    pub from: Rank,
    pub to: Rank,
}

pub struct RankEngine {
    table: RankTable,
    grace_period_days: i64,
    activation_threshold: Decimal,
    network_depth: usize,
    qualifying: Vec<String>,
    ledger: Arc<Ledger>,
    directory: Arc<ReferralDirectory>,
    sink: Arc<dyn NotificationSink>,
}

impl RankEngine {
    #[must_use]
    pub fn new(
        config: &PlatformConfig,
        registry: &TokenRegistry,
        ledger: Arc<Ledger>,
        directory: Arc<ReferralDirectory>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            table: config.rank.table.clone(),
            grace_period_days: config.rank.grace_period_days,
            activation_threshold: config.deposit.activation_threshold_usd,
            network_depth: config.deposit.network_depth,
            qualifying: registry.qualifying_symbols(),
            ledger,
            directory,
            sink,
        }
    }

    #[must_use]
    pub fn table(&self) -> &RankTable {
        &self.table
    }

    #[must_use]
    pub fn directory(&self) -> &ReferralDirectory {
        &self.directory
    }

    #[must_use]
    pub fn is_qualifying(&self, token: &str) -> bool {
        self.qualifying.iter().any(|q| q == token)
    }

    #[must_use]
    pub fn qualifying_symbols(&self) -> &[String] {
        &self.qualifying
    }

    pub fn register_user(&self, id: UserId, referrer: Option<UserId>) -> Result<UserAccount> {
        let account = self.directory.register(id, referrer)?;
        tracing::debug!(user = %id, referrer = ?referrer, "User registered");
        Ok(account)
    }

    /// # Errors
    /// Returns `UserNotFound` if unknown.
    pub fn user(&self, id: UserId) -> Result<UserAccount> {
        self.directory.require(id)
    }

    // =====================================================================
    // Deposit-driven steps
    // =====================================================================

    /// Credit `amount` of network volume to up to `network_depth` uplines
    /// of `source`. Replaying the same deposit is a no-op. Returns the
    /// number of uplines credited.
    pub fn record_network_volume(
        &self,
        source: UserId,
        amount: Decimal,
        reference: &TxHash,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        self.directory.require(source)?;
        let mut credited = 0;
        for upline in self.directory.uplines(source, self.network_depth) {
            let entry = VolumeEntry {
                amount,
                source,
                reference: reference.clone(),
                at,
            };
            if self.directory.record_volume(upline, entry) {
                self.directory
                    .update(upline, |u| u.lifetime_volume += amount)?;
                credited += 1;
            }
        }
        tracing::debug!(user = %source, %amount, uplines = credited, "Network volume recorded");
        Ok(credited)
    }

    /// Activate the user once cumulative confirmed qualifying deposits
    /// reach the threshold. Activation bumps the referrer's direct count.
    /// Returns `true` only on the call that activates.
    pub fn check_activation(
        &self,
        user_id: UserId,
        cumulative_deposits: Decimal,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let threshold = self.activation_threshold;
        let activated = self.directory.update(user_id, |u| {
            u.total_qualifying_deposits = u.total_qualifying_deposits.max(cumulative_deposits);
            if u.is_activated || u.total_qualifying_deposits < threshold {
                return None;
            }
            u.is_activated = true;
            u.activated_at = Some(now);
            Some(u.referrer)
        })?;
        let Some(referrer) = activated else {
            return Ok(false);
        };

        if let Some(sponsor) = referrer {
            self.directory.update(sponsor, |s| s.total_directs += 1)?;
        }
        tracing::info!(user = %user_id, total = %cumulative_deposits, "Account activated");
        self.notify(
            user_id,
            NotificationKind::AccountActivated,
            "Account activated",
            format!("Your deposits reached ${threshold}; your account is now active."),
            serde_json::json!({ "threshold": threshold.to_string() }),
        );
        Ok(true)
    }

    /// Promote while the next tier's conquest thresholds are met. Only
    /// activated users progress. A promotion ends any maintenance ladder.
    pub fn check_rank_progression(&self, user_id: UserId) -> Result<Option<RankChange>> {
        let blocked = self.recompute_blocked(user_id)?;
        let table = &self.table;
        let change = self.directory.update(user_id, |u| {
            if !u.is_activated {
                return None;
            }
            let snapshot = ConquestSnapshot {
                directs: u.total_directs,
                blocked,
                network_volume: u.lifetime_volume,
            };
            let target = requirements::conquerable_rank(table, u.current_rank, &snapshot);
            if target <= u.current_rank {
                return None;
            }
            let from = u.current_rank;
            u.current_rank = target;
            u.reset_ladder();
            Some(RankChange {
                user_id: u.id,
                from,
                to: target,
            })
        })?;
        if let Some(change) = change {
            self.announce(change, "promoted");
        }
        Ok(change)
    }

    /// Move up to `deposit_amount` of a qualifying token into `blocked`,
    /// capped by what the next rank requires, then re-check progression.
    /// Returns the amount blocked.
    pub fn auto_block(&self, user_id: UserId, token: &str, deposit_amount: Decimal) -> Result<Decimal> {
        if !self.is_qualifying(token) {
            return Ok(Decimal::ZERO);
        }
        let user = self.directory.require(user_id)?;
        if !user.is_activated {
            return Ok(Decimal::ZERO);
        }
        let blocked = self.recompute_blocked(user_id)?;
        let target_rank = user.current_rank.next().unwrap_or(user.current_rank);
        let needed = self.table.required_blocked(target_rank) - blocked;
        let available = self.ledger.balance(user_id, token).available;
        let amount = deposit_amount.min(available).min(needed);
        if amount <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        self.ledger.block(user_id, token, amount)?;
        let blocked = self.recompute_blocked(user_id)?;
        tracing::info!(user = %user_id, token, %amount, %blocked, "Auto-blocked toward next rank");
        self.check_rank_progression(user_id)?;
        Ok(amount)
    }

    // =====================================================================
    // Balance-triggered demotion
    // =====================================================================

    /// Refresh `blocked_balance` from the ledger.
    pub fn recompute_blocked(&self, user_id: UserId) -> Result<Decimal> {
        let blocked = self.ledger.blocked_total(user_id, &self.qualifying);
        self.directory
            .update(user_id, |u| u.blocked_balance = blocked)?;
        Ok(blocked)
    }

    /// Demote immediately to the highest rank the current blocked balance
    /// still justifies. Independent of the monthly cycle.
    pub fn check_rank_after_balance_change(&self, user_id: UserId) -> Result<Option<RankChange>> {
        let blocked = self.recompute_blocked(user_id)?;
        let table = &self.table;
        let change = self.directory.update(user_id, |u| {
            let target = requirements::rank_for_blocked(table, u.current_rank, blocked);
            if target >= u.current_rank {
                return None;
            }
            let from = u.current_rank;
            u.current_rank = target;
            Some(RankChange {
                user_id: u.id,
                from,
                to: target,
            })
        })?;
        if let Some(change) = change {
            self.announce(change, "demoted");
        }
        Ok(change)
    }

    /// Rank the user would hold if `deficit` were unblocked.
    pub fn projected_rank_after_unblock(&self, user_id: UserId, deficit: Decimal) -> Result<Rank> {
        let user = self.directory.require(user_id)?;
        let blocked = self.ledger.blocked_total(user_id, &self.qualifying);
        let remaining = (blocked - deficit).max(Decimal::ZERO);
        Ok(requirements::rank_for_blocked(
            &self.table,
            user.current_rank,
            remaining,
        ))
    }

    /// Lock `amount` of `token`, drawing `release` of it from blocked
    /// balance, then apply any resulting demotion.
    ///
    /// The ledger step is atomic: on error nothing moved and the rank is
    /// untouched. A failed rank recheck after a successful lock is logged
    /// and reported as no change; the next balance event re-evaluates it.
    pub fn unblock_and_lock(
        &self,
        user_id: UserId,
        token: &str,
        amount: Decimal,
        release: Decimal,
    ) -> Result<Option<RankChange>> {
        self.ledger.unblock_and_lock(user_id, token, amount, release)?;
        tracing::info!(user = %user_id, token, %amount, %release, "Blocked balance released into lock");
        match self.check_rank_after_balance_change(user_id) {
            Ok(change) => Ok(change),
            Err(err) => {
                tracing::warn!(user = %user_id, code = err.code(), error = %err, "Rank recheck after unblock failed");
                Ok(None)
            }
        }
    }

    // =====================================================================
    // Maintenance
    // =====================================================================

    /// Snapshot of `[from, to)` used for the upkeep check. A direct counts
    /// as active when activated and holding blocked balance.
    pub fn maintenance_stats(
        &self,
        user_id: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<MaintenanceStats> {
        let blocked_balance = self.recompute_blocked(user_id)?;
        let active_directs = self
            .directory
            .directs(user_id)
            .into_iter()
            .filter(|d| {
                self.directory.get(*d).is_some_and(|u| u.is_activated)
                    && self.ledger.blocked_total(*d, &self.qualifying) > Decimal::ZERO
            })
            .count();
        Ok(MaintenanceStats {
            active_directs: u32::try_from(active_directs).unwrap_or(u32::MAX),
            monthly_volume: self.directory.volume_between(user_id, from, to),
            blocked_balance,
        })
    }

    /// Run one ladder step for `user_id`.
    ///
    /// The user is judged against their current rank, except a user who
    /// has already been pushed down to RECRUIT mid-ladder, who is judged
    /// against the rank they held when the ladder began.
    pub fn apply_maintenance(
        &self,
        user_id: UserId,
        stats: &MaintenanceStats,
        now: DateTime<Utc>,
    ) -> Result<LadderOutcome> {
        let table = &self.table;
        let grace = self.grace_period_days;
        let outcome = self.directory.update(user_id, |u| {
            let judged = match (u.current_rank, u.original_rank) {
                (Rank::Recruit, Some(original)) => original,
                (current, _) => current,
            };
            let met = requirements::check_maintenance(table, judged, stats).met();
            ladder::apply(u, met, now, grace)
        })?;
        self.notify_ladder(user_id, outcome);
        Ok(outcome)
    }

    fn notify_ladder(&self, user_id: UserId, outcome: LadderOutcome) {
        let data = serde_json::to_value(outcome).unwrap_or(serde_json::Value::Null);
        match outcome {
            LadderOutcome::Unchanged => {}
            LadderOutcome::Warned { rank } => {
                tracing::warn!(user = %user_id, %rank, "Maintenance missed, warning issued");
                self.notify(
                    user_id,
                    NotificationKind::MaintenanceWarning,
                    "Rank maintenance warning",
                    format!(
                        "You did not meet {rank} maintenance (${} blocked required). \
                         You have {} days to recover.",
                        self.table.tier(rank).maintenance.min_blocked,
                        self.grace_period_days
                    ),
                    data,
                );
            }
            LadderOutcome::TemporarilyDownranked { from, to } | LadderOutcome::Downranked { from, to } => {
                tracing::warn!(user = %user_id, %from, %to, "Maintenance downrank");
                self.notify(
                    user_id,
                    NotificationKind::MaintenanceDownrank,
                    "Rank reduced",
                    format!("Your rank changed from {from} to {to} after missed maintenance."),
                    data,
                );
            }
            LadderOutcome::Recovered { rank } => {
                tracing::info!(user = %user_id, %rank, "Maintenance recovered");
                self.notify(
                    user_id,
                    NotificationKind::MaintenanceRecovered,
                    "Rank status restored",
                    format!("You met maintenance requirements; {rank} is active again."),
                    data,
                );
            }
        }
    }

    fn announce(&self, change: RankChange, verb: &str) {
        tracing::info!(user = %change.user_id, from = %change.from, to = %change.to, "Rank {verb}");
        self.notify(
            change.user_id,
            NotificationKind::RankChanged,
            "Rank changed",
            format!("Your rank changed from {} to {}.", change.from, change.to),
            serde_json::json!({
                "from": change.from,
                "to": change.to,
                "from_required_blocked": self.table.required_blocked(change.from).to_string(),
                "to_required_blocked": self.table.required_blocked(change.to).to_string(),
            }),
        );
    }

    fn notify(
        &self,
        user_id: UserId,
        kind: NotificationKind,
        title: &str,
        message: String,
        data: serde_json::Value,
    ) {
        self.sink
            .enqueue(Notification::new(user_id, kind, title, message, data));
    }
}
