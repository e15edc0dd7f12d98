//! # custodia-collection
//!
//! Read-only planning of fund consolidation: which deposit wallets hold
//! what, and what it costs in gas to sweep them into the treasury.
//!
//! The [`CollectionPlanner`] queries balances concurrently and returns a
//! [`CollectionPlan`]. Nothing here sends transactions or touches the
//! ledger; an executor outside this workspace consumes the plan.

pub mod plan;
pub mod planner;

pub use plan::{CollectionPlan, PhaseEstimate, TokenHolding, TokenTotal, WalletHoldings};
pub use planner::CollectionPlanner;
