//! Error types for the Custodia settlement core.
//!
//! All errors use the `CU_ERR_` prefix convention for easy grepping in logs,
//! and [`CustodiaError::code`] exposes the bare code so the presentation
//! layer can localise without parsing text. Codes are grouped by subsystem:
//! - 1xx: Validation errors
//! - 2xx: Balance errors
//! - 3xx: Withdrawal errors
//! - 4xx: Deposit errors
//! - 5xx: Rank / maintenance errors
//! - 6xx: Settlement / chain errors
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{FailureClass, UserId, WithdrawalId, WithdrawalStatus};

/// Where an error sits in the failure taxonomy.
///
/// The category decides what the caller may do next: validation and
/// conflict errors leave state untouched, recoverable errors keep funds
/// locked for an operator retry, permanent errors return funds to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    Conflict,
    Recoverable,
    Permanent,
    Internal,
}

/// Central error enum for all Custodia operations.
#[derive(Debug, Error)]
pub enum CustodiaError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// The destination is not a `0x`-prefixed 20-byte hex address.
    #[error("CU_ERR_100: Invalid destination address: {0}")]
    InvalidDestination(String),

    /// The amount is zero, negative, or outside configured bounds.
    #[error("CU_ERR_101: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// The token symbol is not listed for this operation.
    #[error("CU_ERR_102: Unsupported token: {0}")]
    UnsupportedToken(String),

    /// The transaction hash is not a 32-byte hex string.
    #[error("CU_ERR_103: Invalid transaction hash: {0}")]
    InvalidTxHash(String),

    // =================================================================
    // Balance Errors (2xx)
    // =================================================================
    /// Not enough available balance at the guarded-update boundary.
    #[error("CU_ERR_200: Insufficient available balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    /// Not enough locked balance to unlock, settle or refund.
    #[error("CU_ERR_201: Insufficient locked balance: need {needed}, have {locked}")]
    InsufficientLocked { needed: Decimal, locked: Decimal },

    /// Not enough blocked balance to unblock.
    #[error("CU_ERR_202: Insufficient blocked balance: need {needed}, have {blocked}")]
    InsufficientBlocked { needed: Decimal, blocked: Decimal },

    /// The user's combined balance is under the withdrawal eligibility floor.
    #[error("CU_ERR_203: Balance {total} below minimum {minimum} required to withdraw")]
    BelowWithdrawalFloor { total: Decimal, minimum: Decimal },

    // =================================================================
    // Withdrawal Errors (3xx)
    // =================================================================
    /// The withdrawal was not found.
    #[error("CU_ERR_300: Withdrawal not found: {0}")]
    WithdrawalNotFound(WithdrawalId),

    /// The user already has a non-terminal withdrawal.
    #[error("CU_ERR_301: User {user} already has open withdrawal {existing}")]
    WithdrawalAlreadyOpen {
        user: UserId,
        existing: WithdrawalId,
    },

    /// The per-rank daily ceiling would be exceeded.
    #[error("CU_ERR_302: Daily withdrawal limit exceeded: limit {limit}, used {used}, requested {requested}")]
    DailyLimitExceeded {
        limit: Decimal,
        used: Decimal,
        requested: Decimal,
    },

    /// The withdrawal is not in the state the transition requires.
    #[error("CU_ERR_303: Invalid withdrawal transition for {id}: {from} -> {to}")]
    InvalidWithdrawalTransition {
        id: WithdrawalId,
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },

    /// Settlement already began for this withdrawal (duplicate invocation).
    #[error("CU_ERR_304: Withdrawal already processed: {0}")]
    AlreadyProcessed(WithdrawalId),

    /// The fee would consume the whole withdrawal.
    #[error("CU_ERR_305: Fee {fee} not covered by amount {amount}")]
    FeeExceedsAmount { fee: Decimal, amount: Decimal },

    // =================================================================
    // Deposit Errors (4xx)
    // =================================================================
    /// The raw on-chain amount could not be represented.
    #[error("CU_ERR_400: Unrepresentable deposit amount {raw} with {decimals} decimals")]
    AmountOverflow { raw: String, decimals: u32 },

    // =================================================================
    // Rank Errors (5xx)
    // =================================================================
    /// The user is not registered in the rank directory.
    #[error("CU_ERR_500: User not found: {0}")]
    UserNotFound(UserId),

    /// A maintenance run for this (or a later) period already completed.
    #[error("CU_ERR_501: Maintenance already ran for period {0}")]
    MaintenanceAlreadyRan(String),

    /// Another maintenance run is still in flight.
    #[error("CU_ERR_502: Maintenance run already in progress")]
    MaintenanceInProgress,

    /// The rank table is inconsistent.
    #[error("CU_ERR_503: Invalid rank table: {0}")]
    InvalidRankTable(String),

    // =================================================================
    // Settlement / Chain Errors (6xx)
    // =================================================================
    /// The settlement transfer failed with a classified cause.
    #[error("CU_ERR_600: Settlement failed ({class}): {reason}")]
    SettlementFailed { class: FailureClass, reason: String },

    /// A chain query (balance, gas price) failed.
    #[error("CU_ERR_601: Chain query failed: {0}")]
    ChainQuery(String),

    /// The price provider could not quote a token.
    #[error("CU_ERR_602: Price unavailable for {0}")]
    PriceUnavailable(String),

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("CU_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Ledger rows no longer sum to net inflows for a token.
    #[error("CU_ERR_901: Supply invariant violated: {reason}")]
    SupplyInvariantViolation { reason: String },

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("CU_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl CustodiaError {
    /// Stable machine-readable code, e.g. `"CU_ERR_200"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidDestination(_) => "CU_ERR_100",
            Self::InvalidAmount { .. } => "CU_ERR_101",
            Self::UnsupportedToken(_) => "CU_ERR_102",
            Self::InvalidTxHash(_) => "CU_ERR_103",
            Self::InsufficientBalance { .. } => "CU_ERR_200",
            Self::InsufficientLocked { .. } => "CU_ERR_201",
            Self::InsufficientBlocked { .. } => "CU_ERR_202",
            Self::BelowWithdrawalFloor { .. } => "CU_ERR_203",
            Self::WithdrawalNotFound(_) => "CU_ERR_300",
            Self::WithdrawalAlreadyOpen { .. } => "CU_ERR_301",
            Self::DailyLimitExceeded { .. } => "CU_ERR_302",
            Self::InvalidWithdrawalTransition { .. } => "CU_ERR_303",
            Self::AlreadyProcessed(_) => "CU_ERR_304",
            Self::FeeExceedsAmount { .. } => "CU_ERR_305",
            Self::AmountOverflow { .. } => "CU_ERR_400",
            Self::UserNotFound(_) => "CU_ERR_500",
            Self::MaintenanceAlreadyRan(_) => "CU_ERR_501",
            Self::MaintenanceInProgress => "CU_ERR_502",
            Self::InvalidRankTable(_) => "CU_ERR_503",
            Self::SettlementFailed { .. } => "CU_ERR_600",
            Self::ChainQuery(_) => "CU_ERR_601",
            Self::PriceUnavailable(_) => "CU_ERR_602",
            Self::Internal(_) => "CU_ERR_900",
            Self::SupplyInvariantViolation { .. } => "CU_ERR_901",
            Self::Configuration(_) => "CU_ERR_902",
        }
    }

    /// Taxonomy bucket of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidDestination(_)
            | Self::InvalidAmount { .. }
            | Self::UnsupportedToken(_)
            | Self::InvalidTxHash(_)
            | Self::BelowWithdrawalFloor { .. }
            | Self::DailyLimitExceeded { .. }
            | Self::FeeExceedsAmount { .. }
            | Self::AmountOverflow { .. } => ErrorCategory::Validation,
            Self::InsufficientBalance { .. }
            | Self::InsufficientLocked { .. }
            | Self::InsufficientBlocked { .. }
            | Self::WithdrawalNotFound(_)
            | Self::WithdrawalAlreadyOpen { .. }
            | Self::InvalidWithdrawalTransition { .. }
            | Self::AlreadyProcessed(_)
            | Self::UserNotFound(_)
            | Self::MaintenanceAlreadyRan(_)
            | Self::MaintenanceInProgress => ErrorCategory::Conflict,
            Self::SettlementFailed {
                class: FailureClass::Permanent,
                ..
            } => ErrorCategory::Permanent,
            Self::SettlementFailed { .. } | Self::ChainQuery(_) | Self::PriceUnavailable(_) => {
                ErrorCategory::Recoverable
            }
            Self::InvalidRankTable(_)
            | Self::Internal(_)
            | Self::SupplyInvariantViolation { .. }
            | Self::Configuration(_) => ErrorCategory::Internal,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, CustodiaError>;

impl From<config::ConfigError> for CustodiaError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_starts_with_code() {
        let errors = vec![
            CustodiaError::InvalidDestination("0x12".into()),
            CustodiaError::AlreadyProcessed(WithdrawalId::new()),
            CustodiaError::MaintenanceInProgress,
            CustodiaError::Internal("boom".into()),
            CustodiaError::SettlementFailed {
                class: FailureClass::Recoverable,
                reason: "rpc".into(),
            },
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with(err.code()),
                "Display {msg} does not start with {}",
                err.code()
            );
        }
    }

    #[test]
    fn insufficient_balance_display() {
        let err = CustodiaError::InsufficientBalance {
            needed: Decimal::new(100, 0),
            available: Decimal::new(50, 0),
        };
        let msg = format!("{err}");
        assert!(msg.contains("CU_ERR_200"));
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[test]
    fn settlement_category_follows_failure_class() {
        let permanent = CustodiaError::SettlementFailed {
            class: FailureClass::Permanent,
            reason: "revert".into(),
        };
        let recoverable = CustodiaError::SettlementFailed {
            class: FailureClass::Recoverable,
            reason: "timeout".into(),
        };
        assert_eq!(permanent.category(), ErrorCategory::Permanent);
        assert_eq!(recoverable.category(), ErrorCategory::Recoverable);
    }

    #[test]
    fn validation_errors_are_validation() {
        let err = CustodiaError::InvalidAmount {
            reason: "zero".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(err.code(), "CU_ERR_101");
    }
}
