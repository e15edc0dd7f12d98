//! # custodia-ledger
//!
//! **Ledger**: the source of truth for user balances and on-chain
//! movements. Pure state plus invariant enforcement, no I/O.
//!
//! ## Components
//!
//! - [`Ledger`]: per-(user, token) rows with guarded single-row mutations
//!   (`credit`, `lock`, `unlock`, `settle`, `refund_locked`, `block`,
//!   `unblock`). Every debit-side operation checks its precondition under
//!   the row's shard lock, so there is no read-then-write window.
//! - [`TxLog`]: append-only [`custodia_types::WalletTransaction`] log,
//!   unique per transaction hash.
//! - [`AddressBook`]: deposit addresses and the treasury wallet.
//! - [`SupplyConservation`]: per-token `Σ rows == Σ credits − Σ settled`.

pub mod address_book;
pub mod ledger;
pub mod supply_conservation;
pub mod tx_log;

pub use address_book::AddressBook;
pub use ledger::Ledger;
pub use supply_conservation::SupplyConservation;
pub use tx_log::{PromoteOutcome, RecordOutcome, TxLog};
