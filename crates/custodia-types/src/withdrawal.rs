//! Withdrawal request lifecycle.
//!
//! ## State Machine
//!
//! ```text
//!   ┌──────────────────┐ approve ┌──────────┐ begin  ┌────────────┐ success ┌───────────┐
//!   │ PENDING_APPROVAL ├────────▶│ APPROVED ├───────▶│ PROCESSING ├────────▶│ COMPLETED │
//!   └────────┬─────────┘         └──────────┘        └─────┬──────┘         └───────────┘
//!            │ reject                  ▲                   │ failure
//!            ▼                         │ requeue           ▼
//!      ┌──────────┐                    │ (recoverable)┌────────┐
//!      │ REJECTED │                    └──────────────┤ FAILED │
//!      └──────────┘                                   └────────┘
//! ```
//!
//! Every transition is a guarded function on the current record: it either
//! returns the new state or a typed rejection, never a partial update.
//! `processed_at` is written exactly once per settlement attempt and is the
//! duplicate-invocation guard for APPROVED → PROCESSING. `submitted_tx_hash`
//! outlives a requeue: once a transfer is on the wire, retries wait on it
//! rather than send again.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Address, CustodiaError, Result, TxHash, UserId, WithdrawalId};

/// Lifecycle state of a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    PendingApproval,
    Approved,
    Processing,
    Completed,
    Rejected,
    Failed,
}

impl WithdrawalStatus {
    /// Can a withdrawal in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::PendingApproval, Self::Approved | Self::Rejected)
                | (Self::Approved, Self::Processing)
                | (Self::Processing, Self::Completed | Self::Failed)
                | (Self::Failed, Self::Approved)
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Failed)
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingApproval => write!(f, "PENDING_APPROVAL"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Classification of a settlement failure.
///
/// RECOVERABLE keeps funds locked for an operator retry. PERMANENT refunds
/// the locked amount to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    Recoverable,
    Permanent,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recoverable => write!(f, "RECOVERABLE"),
            Self::Permanent => write!(f, "PERMANENT"),
        }
    }
}

/// One user withdrawal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: WithdrawalId,
    pub user_id: UserId,
    pub token_symbol: String,
    /// Amount locked in the ledger (fee included).
    pub amount: Decimal,
    /// USD value at request time. Counts toward the daily ceiling.
    pub amount_usd: Decimal,
    /// Flat fee in token units, retained by the platform.
    pub fee: Decimal,
    pub destination: Address,
    pub status: WithdrawalStatus,
    /// Set only on COMPLETED.
    pub tx_hash: Option<TxHash>,
    /// Transfer handed to the chain, confirmed or not.
    pub submitted_tx_hash: Option<TxHash>,
    pub rejected_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub failure_class: Option<FailureClass>,
    /// Blocked balance released to fund this request.
    pub unblocked: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when settlement begins; the duplicate-invocation guard.
    pub processed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Withdrawal {
    /// Create a new request in PENDING_APPROVAL.
    #[must_use]
    pub fn new(
        user_id: UserId,
        token_symbol: &str,
        amount: Decimal,
        fee: Decimal,
        destination: Address,
        unblocked: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WithdrawalId::new(),
            user_id,
            token_symbol: token_symbol.to_string(),
            amount,
            amount_usd: amount,
            fee,
            destination,
            status: WithdrawalStatus::PendingApproval,
            tx_hash: None,
            submitted_tx_hash: None,
            rejected_reason: None,
            failure_reason: None,
            failure_class: None,
            unblocked,
            created_at: now,
            updated_at: now,
            processed_at: None,
            completed_at: None,
        }
    }

    /// Amount actually sent on-chain.
    #[must_use]
    pub fn net_amount(&self) -> Decimal {
        self.amount - self.fee
    }

    /// Whether this request still holds the user's single open slot.
    ///
    /// A recoverable failure keeps its funds locked and may be requeued, so
    /// it keeps the slot too.
    #[must_use]
    pub fn holds_open_slot(&self) -> bool {
        match self.status {
            WithdrawalStatus::Completed | WithdrawalStatus::Rejected => false,
            WithdrawalStatus::Failed => self.failure_class == Some(FailureClass::Recoverable),
            _ => true,
        }
    }

    /// Whether this request consumes the daily withdrawal allowance.
    #[must_use]
    pub fn counts_toward_daily_limit(&self) -> bool {
        !matches!(
            self.status,
            WithdrawalStatus::Rejected | WithdrawalStatus::Failed
        )
    }

    fn guard(&self, target: WithdrawalStatus) -> Result<()> {
        if self.status.can_transition_to(target) {
            Ok(())
        } else {
            Err(CustodiaError::InvalidWithdrawalTransition {
                id: self.id,
                from: self.status,
                to: target,
            })
        }
    }

    /// PENDING_APPROVAL → APPROVED.
    pub fn approve(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(WithdrawalStatus::Approved)?;
        if self.status != WithdrawalStatus::PendingApproval {
            return Err(CustodiaError::InvalidWithdrawalTransition {
                id: self.id,
                from: self.status,
                to: WithdrawalStatus::Approved,
            });
        }
        self.status = WithdrawalStatus::Approved;
        self.updated_at = now;
        Ok(())
    }

    /// PENDING_APPROVAL → REJECTED.
    pub fn reject(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.guard(WithdrawalStatus::Rejected)?;
        self.status = WithdrawalStatus::Rejected;
        self.rejected_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// APPROVED → PROCESSING, guarded by `processed_at` being unset.
    ///
    /// # Errors
    /// [`CustodiaError::AlreadyProcessed`] if settlement already began.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.processed_at.is_some()
            || matches!(
                self.status,
                WithdrawalStatus::Processing | WithdrawalStatus::Completed
            )
        {
            return Err(CustodiaError::AlreadyProcessed(self.id));
        }
        self.guard(WithdrawalStatus::Processing)?;
        self.status = WithdrawalStatus::Processing;
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Record the hash of the transfer just submitted. PROCESSING only,
    /// and only once per withdrawal.
    pub fn record_submission(&mut self, tx_hash: TxHash, now: DateTime<Utc>) -> Result<()> {
        if self.status != WithdrawalStatus::Processing {
            return Err(CustodiaError::InvalidWithdrawalTransition {
                id: self.id,
                from: self.status,
                to: WithdrawalStatus::Processing,
            });
        }
        if let Some(existing) = &self.submitted_tx_hash {
            if *existing != tx_hash {
                return Err(CustodiaError::Internal(format!(
                    "withdrawal {} already submitted as {existing}",
                    self.id
                )));
            }
        }
        self.submitted_tx_hash = Some(tx_hash);
        self.updated_at = now;
        Ok(())
    }

    /// PROCESSING → COMPLETED with the settlement hash.
    pub fn complete(&mut self, tx_hash: TxHash, now: DateTime<Utc>) -> Result<()> {
        self.guard(WithdrawalStatus::Completed)?;
        self.status = WithdrawalStatus::Completed;
        self.tx_hash = Some(tx_hash);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// PROCESSING → FAILED with a classified reason.
    pub fn fail(&mut self, class: FailureClass, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.guard(WithdrawalStatus::Failed)?;
        self.status = WithdrawalStatus::Failed;
        self.failure_class = Some(class);
        self.failure_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// FAILED(RECOVERABLE) → APPROVED, clearing the processing guard so an
    /// operator can retry settlement. A submitted hash is kept.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard(WithdrawalStatus::Approved)?;
        if self.status != WithdrawalStatus::Failed
            || self.failure_class != Some(FailureClass::Recoverable)
        {
            return Err(CustodiaError::InvalidWithdrawalTransition {
                id: self.id,
                from: self.status,
                to: WithdrawalStatus::Approved,
            });
        }
        self.status = WithdrawalStatus::Approved;
        self.processed_at = None;
        self.failure_class = None;
        self.failure_reason = None;
        self.updated_at = now;
        Ok(())
    }
}
