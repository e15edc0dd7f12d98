//! Monthly maintenance scheduler.
//!
//! A single-flight batch: an in-flight flag rejects overlapping runs and a
//! watermark of the last completed period rejects re-running a period.
//! Users are evaluated sequentially; a failure on one user is logged and
//! counted, never aborting the batch.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use custodia_types::{CustodiaError, Rank, Result, UserId};
use serde::Serialize;

use crate::engine::RankEngine;
use crate::ladder::LadderOutcome;

/// A calendar month in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MonthPeriod {
    pub year: i32,
    /// 1-based.
    pub month: u32,
}

impl MonthPeriod {
    /// # Errors
    /// Returns `InvalidAmount` if `month` is not 1..=12.
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(CustodiaError::InvalidAmount {
                reason: format!("month {month} out of range"),
            });
        }
        Ok(Self { year, month })
    }

    #[must_use]
    pub fn containing(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// The month before the one containing `at`; the period a run at `at`
    /// evaluates.
    #[must_use]
    pub fn preceding(at: DateTime<Utc>) -> Self {
        Self::containing(at).previous()
    }

    #[must_use]
    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    #[must_use]
    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First instant of the month.
    #[must_use]
    pub fn start(self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// First instant of the following month (exclusive bound).
    #[must_use]
    pub fn end(self) -> DateTime<Utc> {
        self.next().start()
    }

    fn ordinal(self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }
}

impl fmt::Display for MonthPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Aggregate counts of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub period: MonthPeriod,
    pub evaluated: usize,
    pub unchanged: usize,
    pub warnings: usize,
    pub temporary_downgrades: usize,
    pub permanent_downgrades: usize,
    pub recoveries: usize,
    pub failures: usize,
}

impl MaintenanceReport {
    fn new(period: MonthPeriod) -> Self {
        Self {
            period,
            evaluated: 0,
            unchanged: 0,
            warnings: 0,
            temporary_downgrades: 0,
            permanent_downgrades: 0,
            recoveries: 0,
            failures: 0,
        }
    }

    fn tally(&mut self, outcome: LadderOutcome) {
        self.evaluated += 1;
        match outcome {
            LadderOutcome::Unchanged => self.unchanged += 1,
            LadderOutcome::Warned { .. } => self.warnings += 1,
            LadderOutcome::TemporarilyDownranked { .. } => self.temporary_downgrades += 1,
            LadderOutcome::Downranked { .. } => self.permanent_downgrades += 1,
            LadderOutcome::Recovered { .. } => self.recoveries += 1,
        }
    }
}

const NO_PERIOD: i64 = i64::MIN;

pub struct MaintenanceScheduler {
    engine: Arc<RankEngine>,
    running: AtomicBool,
    last_period: AtomicI64,
}

/// Clears the in-flight flag on every exit path.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MaintenanceScheduler {
    #[must_use]
    pub fn new(engine: Arc<RankEngine>) -> Self {
        Self {
            engine,
            running: AtomicBool::new(false),
            last_period: AtomicI64::new(NO_PERIOD),
        }
    }

    /// Resume from a persisted watermark.
    #[must_use]
    pub fn with_watermark(engine: Arc<RankEngine>, last_period: MonthPeriod) -> Self {
        let scheduler = Self::new(engine);
        scheduler
            .last_period
            .store(last_period.ordinal(), Ordering::Release);
        scheduler
    }

    /// Users subject to maintenance: anyone above RECRUIT, plus anyone
    /// already on the ladder.
    #[must_use]
    pub fn eligible_users(&self) -> Vec<UserId> {
        let directory = self.engine.directory();
        directory
            .user_ids()
            .into_iter()
            .filter(|id| {
                directory
                    .get(*id)
                    .is_some_and(|u| u.current_rank > Rank::Recruit || u.in_ladder())
            })
            .collect()
    }

    /// Evaluate every eligible user for `period`.
    ///
    /// # Errors
    /// `MaintenanceInProgress` if another run is in flight;
    /// `MaintenanceAlreadyRan` if `period` is not after the watermark.
    pub fn run(&self, period: MonthPeriod, now: DateTime<Utc>) -> Result<MaintenanceReport> {
        let _guard = self.acquire(period)?;
        let users = self.eligible_users();
        Ok(self.evaluate(&users, period, now))
    }

    /// Like [`run`](Self::run) but over an explicit user list.
    ///
    /// # Errors
    /// Same as [`run`](Self::run).
    pub fn run_for(
        &self,
        users: &[UserId],
        period: MonthPeriod,
        now: DateTime<Utc>,
    ) -> Result<MaintenanceReport> {
        let _guard = self.acquire(period)?;
        Ok(self.evaluate(users, period, now))
    }

    #[must_use]
    pub fn last_period(&self) -> Option<i64> {
        match self.last_period.load(Ordering::Acquire) {
            NO_PERIOD => None,
            ordinal => Some(ordinal),
        }
    }

    fn acquire(&self, period: MonthPeriod) -> Result<RunGuard<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CustodiaError::MaintenanceInProgress);
        }
        let guard = RunGuard(&self.running);
        if period.ordinal() <= self.last_period.load(Ordering::Acquire) {
            return Err(CustodiaError::MaintenanceAlreadyRan(period.to_string()));
        }
        Ok(guard)
    }

    fn evaluate(&self, users: &[UserId], period: MonthPeriod, now: DateTime<Utc>) -> MaintenanceReport {
        tracing::info!(%period, users = users.len(), "Maintenance run started");
        let mut report = MaintenanceReport::new(period);

        for &user_id in users {
            let outcome = self
                .engine
                .maintenance_stats(user_id, period.start(), period.end())
                .and_then(|stats| self.engine.apply_maintenance(user_id, &stats, now));
            match outcome {
                Ok(outcome) => report.tally(outcome),
                Err(err) => {
                    report.failures += 1;
                    tracing::error!(user = %user_id, %period, error = %err, "Maintenance failed for user, continuing");
                }
            }
        }

        self.last_period.store(period.ordinal(), Ordering::Release);
        tracing::info!(
            %period,
            evaluated = report.evaluated,
            warnings = report.warnings,
            temporary = report.temporary_downgrades,
            permanent = report.permanent_downgrades,
            recoveries = report.recoveries,
            failures = report.failures,
            "Maintenance run complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ReferralDirectory;
    use custodia_ledger::Ledger;
    use custodia_types::testing::RecordingSink;
    use custodia_types::{PlatformConfig, RankStatus, TokenRegistry};

    fn setup() -> (Arc<RankEngine>, MaintenanceScheduler) {
        let config = PlatformConfig::default();
        let registry = TokenRegistry::from_config(&config.tokens).unwrap();
        let engine = Arc::new(RankEngine::new(
            &config,
            &registry,
            Arc::new(Ledger::new()),
            Arc::new(ReferralDirectory::new()),
            Arc::new(RecordingSink::new()),
        ));
        let scheduler = MaintenanceScheduler::new(engine.clone());
        (engine, scheduler)
    }

    fn ranked(engine: &RankEngine, rank: Rank) -> UserId {
        let id = UserId::new();
        engine.register_user(id, None).unwrap();
        engine
            .directory()
            .update(id, |u| u.current_rank = rank)
            .unwrap();
        id
    }

    #[test]
    fn period_arithmetic() {
        let jan = MonthPeriod::new(2026, 1).unwrap();
        assert_eq!(jan.previous(), MonthPeriod::new(2025, 12).unwrap());
        assert_eq!(jan.to_string(), "2026-01");
        assert_eq!(jan.end(), MonthPeriod::new(2026, 2).unwrap().start());
        assert!(MonthPeriod::new(2026, 13).is_err());
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 0, 5, 0).unwrap();
        assert_eq!(MonthPeriod::preceding(at), MonthPeriod::new(2026, 2).unwrap());
    }

    #[test]
    fn recruits_are_not_eligible() {
        let (engine, scheduler) = setup();
        let recruit = ranked(&engine, Rank::Recruit);
        let bronze = ranked(&engine, Rank::Bronze);
        let eligible = scheduler.eligible_users();
        assert!(eligible.contains(&bronze));
        assert!(!eligible.contains(&recruit));
    }

    #[test]
    fn three_runs_walk_the_ladder() {
        let (engine, scheduler) = setup();
        let user = ranked(&engine, Rank::Silver);
        let mut period = MonthPeriod::new(2026, 1).unwrap();
        let now = Utc::now();

        let r1 = scheduler.run(period, now).unwrap();
        assert_eq!(r1.warnings, 1);
        period = period.next();
        let r2 = scheduler.run(period, now).unwrap();
        assert_eq!(r2.temporary_downgrades, 1);
        period = period.next();
        let r3 = scheduler.run(period, now).unwrap();
        assert_eq!(r3.permanent_downgrades, 1);

        let account = engine.user(user).unwrap();
        assert_eq!(account.rank_status, RankStatus::Downranked);
        assert_eq!(account.current_rank, Rank::Recruit);
        assert_eq!(account.warning_count, 0);
        assert!(account.original_rank.is_none());
    }

    #[test]
    fn same_period_twice_rejected() {
        let (engine, scheduler) = setup();
        ranked(&engine, Rank::Bronze);
        let period = MonthPeriod::new(2026, 4).unwrap();
        scheduler.run(period, Utc::now()).unwrap();
        let err = scheduler.run(period, Utc::now()).unwrap_err();
        assert!(matches!(err, CustodiaError::MaintenanceAlreadyRan(p) if p == "2026-04"));
        let err = scheduler.run(period.previous(), Utc::now()).unwrap_err();
        assert!(matches!(err, CustodiaError::MaintenanceAlreadyRan(_)));
        // A rejected run must release the in-flight flag.
        scheduler.run(period.next(), Utc::now()).unwrap();
    }

    #[test]
    fn in_flight_run_blocks_second() {
        let (_engine, scheduler) = setup();
        let _held = scheduler.acquire(MonthPeriod::new(2026, 1).unwrap()).unwrap();
        let err = scheduler
            .run(MonthPeriod::new(2026, 2).unwrap(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, CustodiaError::MaintenanceInProgress));
    }

    #[test]
    fn per_user_failure_is_isolated() {
        let (engine, scheduler) = setup();
        let good = ranked(&engine, Rank::Bronze);
        let ghost = UserId::new();
        let report = scheduler
            .run_for(&[ghost, good], MonthPeriod::new(2026, 5).unwrap(), Utc::now())
            .unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.warnings, 1);
        assert_eq!(engine.user(good).unwrap().rank_status, RankStatus::Warning);
    }

    #[test]
    fn watermark_resumes() {
        let (engine, _) = setup();
        let scheduler =
            MaintenanceScheduler::with_watermark(engine, MonthPeriod::new(2026, 6).unwrap());
        assert!(scheduler.run(MonthPeriod::new(2026, 6).unwrap(), Utc::now()).is_err());
        assert!(scheduler.run(MonthPeriod::new(2026, 7).unwrap(), Utc::now()).is_ok());
    }
}
