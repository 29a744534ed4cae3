//! Nudge data model: ledger records, statuses, and fire outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a nudge ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NudgeStatus {
    /// Timer handed to the gateway, reminder not yet fired.
    Scheduled,
    /// Reminder fired and passed validation.
    Sent,
    /// Retired before firing, usually because the question was answered.
    Cancelled,
}

impl NudgeStatus {
    /// Whether a record in this status may move to `target`.
    /// The only legal moves are out of `Scheduled`.
    pub fn can_transition_to(&self, target: NudgeStatus) -> bool {
        matches!(
            (self, target),
            (Self::Scheduled, Self::Sent) | (Self::Scheduled, Self::Cancelled)
        )
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Cancelled)
    }
}

impl std::fmt::Display for NudgeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Sent => write!(f, "sent"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for NudgeStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "sent" => Ok(Self::Sent),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown nudge status: {}", s)),
        }
    }
}

/// One row in the nudge ledger.
///
/// Identity is the `(user_id, question_id, nudge_count)` triple; the store
/// enforces uniqueness on it. Records are only ever appended and then moved
/// through at most one status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeRecord {
    /// User this reminder belongs to.
    pub user_id: String,
    /// Question the user is stalled on.
    pub question_id: i64,
    /// Reminder ordinal for this question, starting at 1.
    pub nudge_count: u32,
    /// Current lifecycle state.
    pub status: NudgeStatus,
    /// When the gateway is expected to fire the reminder.
    pub scheduled_for: DateTime<Utc>,
    /// When the reminder actually fired, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    /// Delay that was requested from the gateway, in minutes.
    pub delay_minutes: u32,
    /// Reminder text chosen for this ordinal.
    pub message: String,
    /// Opaque cancellation handle returned by the gateway.
    pub external_handle: String,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    /// When the record last changed status.
    pub updated_at: DateTime<Utc>,
}

impl NudgeRecord {
    /// Create a new record in `Scheduled` status.
    #[allow(clippy::too_many_arguments)]
    pub fn scheduled(
        user_id: impl Into<String>,
        question_id: i64,
        nudge_count: u32,
        delay_minutes: u32,
        scheduled_for: DateTime<Utc>,
        message: impl Into<String>,
        external_handle: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            question_id,
            nudge_count,
            status: NudgeStatus::Scheduled,
            scheduled_for,
            sent_at: None,
            delay_minutes,
            message: message.into(),
            external_handle: external_handle.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Payload handed to the gateway at schedule time and returned to the
/// engine verbatim when the timer fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderPayload {
    pub user_id: String,
    pub question_id: i64,
    /// Reminder ordinal, matching the ledger record's `nudge_count`.
    pub nudge_count: u32,
    pub message: String,
}

/// Result of processing a fired reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FireOutcome {
    /// Reminder passed validation and was handed to delivery.
    Delivered { message: String },
    /// Reminder was stale or unverifiable and dropped without effect.
    Skipped { reason: SkipReason },
}

/// Why a fired reminder was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No such user in the store.
    UserNotFound,
    /// User was deactivated after the timer was set.
    UserInactive,
    /// No progress row for this user and question.
    QuestionNotTracked,
    /// Question was answered while the timer was pending.
    QuestionAnswered,
    /// No ledger record matches the payload; an orphaned timer.
    NoMatchingRecord,
    /// The record already left `Scheduled`, e.g. a duplicate fire.
    AlreadyResolved,
}
