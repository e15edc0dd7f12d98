//! # custodia-settlement
//!
//! The money-moving flows of the settlement core.
//!
//! ## Components
//!
//! - [`DepositProcessor`]: idempotent ingestion of chain deposit events
//! - [`WithdrawalManager`]: admission of withdrawal requests (funds locked)
//!   plus the approval workflow hooks (approve, reject, requeue)
//! - [`SettlementWorker`]: guarded APPROVED → PROCESSING, chain transfer,
//!   reconciliation on success or classified failure
//! - [`EffectList`]: named, independently failing post-effects
//!
//! ## Saga model
//!
//! Each flow has one primary mutation that is atomic on its own row
//! (ledger credit with transaction record, ledger lock, settle). Whatever
//! follows (network volume, activation, rank checks, notifications) runs
//! through an [`EffectList`]: a failing effect is logged and reported, it
//! never rolls back the primary mutation or stops its siblings.

pub mod deposit;
pub mod effects;
pub mod withdrawal;
pub mod withdrawal_store;
pub mod worker;

pub use deposit::{DepositOutcome, DepositProcessor, IgnoreReason};
pub use effects::{EffectList, EffectReport};
pub use withdrawal::{RankImpactNotice, WithdrawalManager, WithdrawalOutcome, WithdrawalRequest};
pub use withdrawal_store::WithdrawalStore;
pub use worker::{SettlementOutcome, SettlementWorker};
