//! Inbound deposit events and the addresses they are attributed to.

use std::num::IntErrorKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Address, UserId};

/// Block reference carried by a deposit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
}

/// A chain-monitor delivery. Delivery is at-least-once and may arrive
/// out of order (confirmed first, unconfirmed later).
///
/// Fields are kept in their wire form; the deposit processor validates
/// them and turns malformed input into an informational outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositEvent {
    pub confirmed: bool,
    pub tx_hash: String,
    pub to: Option<String>,
    pub from: Option<String>,
    /// Raw integer amount, decimal or `0x` hex.
    pub value: String,
    pub token_address: Option<String>,
    pub token_decimals: Option<u32>,
    pub block: BlockRef,
}

/// Why a raw `value` could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawValueError {
    /// Not an unsigned decimal or `0x` hex integer.
    Malformed,
    /// A valid integer wider than 128 bits.
    TooLarge,
}

impl DepositEvent {
    /// Parse `value` as an unsigned raw integer.
    ///
    /// # Errors
    /// [`RawValueError::TooLarge`] for uint256 values past `u128::MAX`,
    /// [`RawValueError::Malformed`] for anything else unparseable.
    pub fn raw_value(&self) -> std::result::Result<u128, RawValueError> {
        let v = self.value.trim();
        let parsed = match v.strip_prefix("0x") {
            Some("") => return Err(RawValueError::Malformed),
            Some(hex_digits) => u128::from_str_radix(hex_digits, 16),
            None => v.parse::<u128>(),
        };
        parsed.map_err(|err| match err.kind() {
            IntErrorKind::PosOverflow => RawValueError::TooLarge,
            _ => RawValueError::Malformed,
        })
    }
}

/// A user's deposit address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub user_id: UserId,
    pub address: Address,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// The treasury wallet that pays settlements and receives collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalWallet {
    pub address: Address,
    pub label: String,
}
