//! The maintenance downgrade ladder.
//!
//! ```text
//!            miss              miss                    miss
//!   ACTIVE ───────▶ WARNING ───────▶ TEMPORARY_DOWNRANK ───────▶ DOWNRANKED
//!     ▲   (snapshot rank,      (current − 1)           (snapshot − 2,
//!     │    grace period)                                counters reset)
//!     │                                                      │ miss
//!     │            met (from any non-ACTIVE state)           ▼
//!     └──────────────────────────────────────────────── WARNING
//! ```
//!
//! Recovery is a single step: meeting the requirements in any period
//! returns the user to ACTIVE at whatever rank they currently hold.

use chrono::{DateTime, Duration, Utc};
use custodia_types::{Rank, RankStatus, UserAccount};
use serde::Serialize;

/// What one maintenance evaluation did to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LadderOutcome {
    /// Requirements met while ACTIVE.
    Unchanged,
    /// First miss; rank kept, grace period started.
    Warned { rank: Rank },
    /// Second consecutive miss.
    TemporarilyDownranked { from: Rank, to: Rank },
    /// Third consecutive miss.
    Downranked { from: Rank, to: Rank },
    /// Requirements met after one or more misses.
    Recovered { rank: Rank },
}

/// Apply one period's verdict to `user`.
pub fn apply(user: &mut UserAccount, met: bool, now: DateTime<Utc>, grace_days: i64) -> LadderOutcome {
    if met {
        if user.rank_status == RankStatus::Active {
            return LadderOutcome::Unchanged;
        }
        user.reset_ladder();
        return LadderOutcome::Recovered {
            rank: user.current_rank,
        };
    }

    match user.rank_status {
        RankStatus::Active | RankStatus::Downranked => {
            user.rank_status = RankStatus::Warning;
            user.warning_count = 1;
            user.original_rank = Some(user.current_rank);
            user.grace_period_ends_at = Some(now + Duration::days(grace_days));
            LadderOutcome::Warned {
                rank: user.current_rank,
            }
        }
        RankStatus::Warning => {
            let from = user.current_rank;
            user.current_rank = from.down(1);
            user.rank_status = RankStatus::TemporaryDownrank;
            user.warning_count = 2;
            LadderOutcome::TemporarilyDownranked {
                from,
                to: user.current_rank,
            }
        }
        RankStatus::TemporaryDownrank => {
            let from = user.current_rank;
            let anchor = user.original_rank.unwrap_or(from);
            user.current_rank = anchor.down(2);
            user.rank_status = RankStatus::Downranked;
            user.warning_count = 0;
            user.original_rank = None;
            user.grace_period_ends_at = None;
            LadderOutcome::Downranked {
                from,
                to: user.current_rank,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_types::UserId;

    fn user_at(rank: Rank) -> UserAccount {
        let mut user = UserAccount::new(UserId::new(), None);
        user.current_rank = rank;
        user
    }

    #[test]
    fn three_misses_end_two_below_snapshot() {
        for (start, expected) in [
            (Rank::Gold, Rank::Bronze),
            (Rank::Silver, Rank::Recruit),
            (Rank::Bronze, Rank::Recruit),
        ] {
            let mut user = user_at(start);
            let now = Utc::now();

            assert_eq!(apply(&mut user, false, now, 7), LadderOutcome::Warned { rank: start });
            assert_eq!(user.original_rank, Some(start));
            assert_eq!(user.grace_period_ends_at, Some(now + Duration::days(7)));

            apply(&mut user, false, now, 7);
            assert_eq!(user.rank_status, RankStatus::TemporaryDownrank);
            assert_eq!(user.current_rank, start.down(1));
            assert_eq!(user.warning_count, 2);

            let outcome = apply(&mut user, false, now, 7);
            assert!(matches!(outcome, LadderOutcome::Downranked { to, .. } if to == expected));
            assert_eq!(user.rank_status, RankStatus::Downranked);
            assert_eq!(user.current_rank, expected);
            assert_eq!(user.warning_count, 0);
            assert!(user.original_rank.is_none());
            assert!(user.grace_period_ends_at.is_none());
        }
    }

    #[test]
    fn recovery_is_single_step_from_any_depth() {
        for misses in 1..=3 {
            let mut user = user_at(Rank::Gold);
            for _ in 0..misses {
                apply(&mut user, false, Utc::now(), 7);
            }
            let held = user.current_rank;
            let outcome = apply(&mut user, true, Utc::now(), 7);
            assert_eq!(outcome, LadderOutcome::Recovered { rank: held });
            assert_eq!(user.rank_status, RankStatus::Active);
            assert_eq!(user.warning_count, 0);
            assert!(user.original_rank.is_none());
        }
    }

    #[test]
    fn met_while_active_is_noop() {
        let mut user = user_at(Rank::Silver);
        assert_eq!(apply(&mut user, true, Utc::now(), 7), LadderOutcome::Unchanged);
        assert_eq!(user.current_rank, Rank::Silver);
    }

    #[test]
    fn miss_after_downrank_restarts_ladder() {
        let mut user = user_at(Rank::Gold);
        for _ in 0..3 {
            apply(&mut user, false, Utc::now(), 7);
        }
        assert_eq!(user.current_rank, Rank::Bronze);
        let outcome = apply(&mut user, false, Utc::now(), 7);
        assert_eq!(outcome, LadderOutcome::Warned { rank: Rank::Bronze });
        assert_eq!(user.original_rank, Some(Rank::Bronze));
    }
}
