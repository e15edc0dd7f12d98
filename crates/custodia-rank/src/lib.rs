//! # custodia-rank
//!
//! **Rank Engine** and **Monthly Maintenance Scheduler**.
//!
//! ## Layout
//!
//! - [`requirements`]: pure threshold checks against the [`RankTable`](custodia_types::RankTable)
//! - [`ladder`]: pure WARNING → TEMPORARY_DOWNRANK → DOWNRANKED transitions
//! - [`directory`]: user accounts, referral tree, timestamped network volume
//! - [`engine`]: activation, progression, auto-block, balance-triggered demotion
//! - [`maintenance`]: single-flight monthly batch over ranked users
//!
//! Rank fields of a [`UserAccount`](custodia_types::UserAccount) are only
//! written through [`RankEngine`].

pub mod directory;
pub mod engine;
pub mod ladder;
pub mod maintenance;
pub mod requirements;

pub use directory::{ReferralDirectory, VolumeEntry};
pub use engine::{RankChange, RankEngine};
pub use ladder::LadderOutcome;
pub use maintenance::{MaintenanceReport, MaintenanceScheduler, MonthPeriod};
pub use requirements::{ConquestSnapshot, RequirementCheck, Shortfall};
