//! User accounts, questions, and per-question progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a question expects to be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Free-form text.
    Text,
    /// Pick one of the configured options.
    MultipleChoice,
    /// Numeric rating.
    Rating,
}

impl Default for QuestionKind {
    fn default() -> Self {
        Self::Text
    }
}

impl std::fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::MultipleChoice => write!(f, "multiple_choice"),
            Self::Rating => write!(f, "rating"),
        }
    }
}

impl std::str::FromStr for QuestionKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "multiple_choice" => Ok(Self::MultipleChoice),
            "rating" => Ok(Self::Rating),
            _ => Err(format!("Unknown question kind: {}", s)),
        }
    }
}

/// One question in the fixed sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Stable numeric ID, unique across the sequence.
    pub question_id: i64,
    /// The question text shown to the user.
    pub text: String,
    /// Answer format.
    #[serde(default)]
    pub kind: QuestionKind,
    /// Choices for multiple-choice questions; empty otherwise.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// Position in the sequence (users answer in ascending order).
    pub position: i64,
    /// Inactive questions are skipped everywhere.
    pub is_active: bool,
}

impl Question {
    /// Create an active free-text question.
    pub fn text_question(question_id: i64, text: impl Into<String>, position: i64) -> Self {
        Self {
            question_id,
            text: text.into(),
            kind: QuestionKind::Text,
            options: Vec::new(),
            position,
            is_active: true,
        }
    }
}

/// A user working through the question sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Unique user ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Cleared when the nudge budget runs out; inactive users are left alone.
    pub is_active: bool,
    /// ID of the question the user is currently on.
    pub current_question: i64,
    /// Last time the user answered something.
    pub last_activity: DateTime<Utc>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account last changed.
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// Create a new active user positioned at the start of the sequence.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            is_active: true,
            current_question: 0,
            last_activity: now,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-question progress for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionProgress {
    pub question_id: i64,
    pub answered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    /// How many reminders have been sent for this question.
    pub nudge_count: u32,
    /// When the most recent reminder was scheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_nudge_sent: Option<DateTime<Utc>>,
}

/// Aggregate progress for a user, derived from their progress rows.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    /// Question the user is currently on.
    pub current: i64,
    /// Total questions in the sequence.
    pub total: usize,
    /// How many have been answered.
    pub completed: usize,
    /// Completion percentage, rounded to the nearest whole number.
    pub percentage: u32,
}

impl ProgressSummary {
    /// Summarize a user's progress rows.
    pub fn from_rows(current: i64, rows: &[QuestionProgress]) -> Self {
        let total = rows.len();
        let completed = rows.iter().filter(|p| p.answered).count();
        let percentage = if total == 0 {
            0
        } else {
            ((completed * 100) as f64 / total as f64).round() as u32
        };
        Self {
            current,
            total,
            completed,
            percentage,
        }
    }
}
