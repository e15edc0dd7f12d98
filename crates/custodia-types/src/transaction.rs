//! Append-only log of on-chain wallet movements.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  confirmed   ┌───────────┐
//!   │ PENDING ├─────────────▶│ CONFIRMED │
//!   └─────────┘              └───────────┘
//! ```
//!
//! CONFIRMED is terminal. A late "unconfirmed" redelivery of a confirmed
//! hash never demotes it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, TxHash, UserId, WalletTxId};

/// Direction of funds relative to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxDirection {
    /// Inbound deposit.
    Credit,
    /// Outbound withdrawal settlement.
    Debit,
}

impl std::fmt::Display for TxDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credit => write!(f, "CREDIT"),
            Self::Debit => write!(f, "DEBIT"),
        }
    }
}

/// Confirmation status of a wallet transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Confirmed,
}

impl TxStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!((self, target), (Self::Pending, Self::Confirmed))
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
        }
    }
}

/// Immutable record of one on-chain movement, unique per `tx_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: WalletTxId,
    pub tx_hash: TxHash,
    pub user_id: UserId,
    pub direction: TxDirection,
    pub token_symbol: String,
    /// Contract address; `None` for the native asset.
    pub token_address: Option<Address>,
    /// Token units, derived from the raw amount and token decimals.
    pub amount: Decimal,
    pub status: TxStatus,
    pub from_address: Option<Address>,
    pub to_address: Address,
    pub block_number: Option<u64>,
    pub is_test: bool,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl WalletTransaction {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.status == TxStatus::Confirmed
    }

    /// Promote PENDING → CONFIRMED. Returns `false` if already confirmed.
    pub fn confirm(&mut self, at: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(TxStatus::Confirmed) {
            return false;
        }
        self.status = TxStatus::Confirmed;
        self.confirmed_at = Some(at);
        true
    }
}
