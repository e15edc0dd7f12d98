//! # custodia-types
//!
//! Shared types, errors, ports and configuration for the **Custodia**
//! settlement core.
//!
//! This crate is the leaf dependency of the workspace. Every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`UserId`], [`WithdrawalId`], [`WalletTxId`], [`Address`], [`TxHash`]
//! - **Ledger model**: [`Balance`], [`TokenSymbol`]
//! - **Token model**: [`Token`], [`TokenClass`], [`TokenRegistry`]
//! - **Transaction log**: [`WalletTransaction`], [`TxDirection`], [`TxStatus`]
//! - **Withdrawal model**: [`Withdrawal`], [`WithdrawalStatus`], [`FailureClass`]
//! - **Rank model**: [`Rank`], [`RankStatus`], [`RankTable`], [`UserAccount`]
//! - **Deposit model**: [`DepositEvent`], [`DepositAddress`], [`GlobalWallet`]
//! - **Ports**: [`ChainClient`], [`PriceProvider`], [`NotificationSink`]
//! - **Configuration**: [`PlatformConfig`]
//! - **Errors**: [`CustodiaError`] with `CU_ERR_` prefix codes

pub mod balance;
pub mod config;
pub mod constants;
pub mod deposit;
pub mod error;
pub mod ids;
pub mod notification;
pub mod ports;
pub mod rank;
pub mod token;
pub mod transaction;
pub mod user;
pub mod withdrawal;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use balance::*;
pub use self::config::*;
pub use deposit::*;
pub use error::*;
pub use ids::*;
pub use notification::*;
pub use ports::*;
pub use rank::*;
pub use token::*;
pub use transaction::*;
pub use user::*;
pub use withdrawal::*;

// Constants are accessed via `custodia_types::constants::FOO`
// (not re-exported to avoid name collisions).
