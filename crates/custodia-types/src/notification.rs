//! User notifications produced by the core.
//!
//! The core only enqueues; delivery is the sink's concern and is
//! fire-and-forget from the caller's point of view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    DepositConfirmed,
    AccountActivated,
    WithdrawalCompleted,
    /// Recoverable settlement failure; funds stay locked pending retry.
    WithdrawalDelayed,
    /// Permanent settlement failure; funds returned.
    WithdrawalCancelled,
    WithdrawalRejected,
    RankChanged,
    MaintenanceWarning,
    MaintenanceDownrank,
    MaintenanceRecovered,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DepositConfirmed => "DEPOSIT_CONFIRMED",
            Self::AccountActivated => "ACCOUNT_ACTIVATED",
            Self::WithdrawalCompleted => "WITHDRAWAL_COMPLETED",
            Self::WithdrawalDelayed => "WITHDRAWAL_DELAYED",
            Self::WithdrawalCancelled => "WITHDRAWAL_CANCELLED",
            Self::WithdrawalRejected => "WITHDRAWAL_REJECTED",
            Self::RankChanged => "RANK_CHANGED",
            Self::MaintenanceWarning => "MAINTENANCE_WARNING",
            Self::MaintenanceDownrank => "MAINTENANCE_DOWNRANK",
            Self::MaintenanceRecovered => "MAINTENANCE_RECOVERED",
        };
        f.write_str(s)
    }
}

/// One queued notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Structured payload for the presentation layer.
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    #[must_use]
    pub fn new(
        user_id: UserId,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            data,
            created_at: Utc::now(),
        }
    }
}

/// Outbound notification queue.
pub trait NotificationSink: Send + Sync {
    /// Enqueue without waiting for delivery. Must not fail the caller.
    fn enqueue(&self, notification: Notification);
}

/// Sink that only logs. Useful where no queue is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn enqueue(&self, notification: Notification) {
        tracing::info!(
            user = %notification.user_id,
            kind = %notification.kind,
            title = %notification.title,
            "Notification enqueued"
        );
    }
}
