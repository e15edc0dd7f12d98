//! Ports to external collaborators: the chain client and the price feed.
//!
//! The chain client reports failures as a typed [`ChainErrorKind`]. The
//! RECOVERABLE / PERMANENT decision is an exhaustive match on that kind
//! ([`ChainErrorKind::failure_class`]); message text is never inspected.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{Address, FailureClass, Result, Token, TxHash};

/// Cause of a chain-client failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainErrorKind {
    /// Transport or node error.
    Rpc,
    /// No answer or confirmation within the deadline.
    Timeout,
    /// Treasury lacks gas to pay for the transfer.
    InsufficientGas,
    /// Nonce collision or replacement race.
    NonceConflict,
    /// Gas price too low to be mined.
    Underpriced,
    /// Treasury lacks the token balance itself.
    InsufficientTreasuryFunds,
    /// Destination rejected by the chain (malformed, blacklisted).
    InvalidDestination,
    /// Token contract reverted the transfer.
    ContractRevert,
    /// The asset cannot be sent by this client.
    UnsupportedAsset,
}

impl ChainErrorKind {
    /// Whether funds should stay locked (retry) or be refunded.
    #[must_use]
    pub fn failure_class(self) -> FailureClass {
        match self {
            Self::Rpc
            | Self::Timeout
            | Self::InsufficientGas
            | Self::NonceConflict
            | Self::Underpriced
            | Self::InsufficientTreasuryFunds => FailureClass::Recoverable,
            Self::InvalidDestination | Self::ContractRevert | Self::UnsupportedAsset => {
                FailureClass::Permanent
            }
        }
    }
}

impl std::fmt::Display for ChainErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rpc => "rpc",
            Self::Timeout => "timeout",
            Self::InsufficientGas => "insufficient_gas",
            Self::NonceConflict => "nonce_conflict",
            Self::Underpriced => "underpriced",
            Self::InsufficientTreasuryFunds => "insufficient_treasury_funds",
            Self::InvalidDestination => "invalid_destination",
            Self::ContractRevert => "contract_revert",
            Self::UnsupportedAsset => "unsupported_asset",
        };
        f.write_str(s)
    }
}

/// Failure reported by a [`ChainClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ChainError {
    pub kind: ChainErrorKind,
    pub message: String,
}

impl ChainError {
    #[must_use]
    pub fn new(kind: ChainErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failure_class(&self) -> FailureClass {
        self.kind.failure_class()
    }
}

/// Blockchain access used by settlement and collection planning.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Send the native asset. Returns the submitted transaction hash.
    async fn send_native(
        &self,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> std::result::Result<TxHash, ChainError>;

    /// ERC20-style `transfer` of `token`.
    async fn send_token(
        &self,
        token: &Token,
        from: &Address,
        to: &Address,
        amount: Decimal,
    ) -> std::result::Result<TxHash, ChainError>;

    /// Wait until `tx` has `confirmations` confirmations. Implementations
    /// may bound the wait themselves; callers also apply `timeout`.
    async fn wait_for_confirmation(
        &self,
        tx: &TxHash,
        confirmations: u64,
        timeout: Duration,
    ) -> std::result::Result<(), ChainError>;

    /// Native-asset balance of `address`, in token units.
    async fn native_balance(&self, address: &Address) -> std::result::Result<Decimal, ChainError>;

    /// Token balance of `address`, in token units.
    async fn token_balance(
        &self,
        token: &Token,
        address: &Address,
    ) -> std::result::Result<Decimal, ChainError>;

    /// Current gas price, in native-asset units per gas unit.
    async fn gas_price(&self) -> std::result::Result<Decimal, ChainError>;
}

/// USD rate provider.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Price of one unit of `symbol` in USD.
    async fn price_usd(&self, symbol: &str) -> Result<Decimal>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds_are_recoverable() {
        for kind in [
            ChainErrorKind::Rpc,
            ChainErrorKind::Timeout,
            ChainErrorKind::InsufficientGas,
            ChainErrorKind::NonceConflict,
            ChainErrorKind::Underpriced,
            ChainErrorKind::InsufficientTreasuryFunds,
        ] {
            assert_eq!(kind.failure_class(), FailureClass::Recoverable, "{kind}");
        }
    }

    #[test]
    fn rejection_kinds_are_permanent() {
        for kind in [
            ChainErrorKind::InvalidDestination,
            ChainErrorKind::ContractRevert,
            ChainErrorKind::UnsupportedAsset,
        ] {
            assert_eq!(kind.failure_class(), FailureClass::Permanent, "{kind}");
        }
    }

    #[test]
    fn classification_ignores_message() {
        let err = ChainError::new(ChainErrorKind::Rpc, "execution reverted: invalid address");
        assert_eq!(err.failure_class(), FailureClass::Recoverable);
        assert_eq!(err.to_string(), "rpc: execution reverted: invalid address");
    }
}
