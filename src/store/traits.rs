//! Unified `Store` trait: single async interface for all persistence.
//!
//! Covers user accounts, the question sequence, per-user progress, and the
//! append-only nudge ledger.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::nudge::model::NudgeRecord;
use crate::progress::model::{Question, QuestionProgress, UserAccount};

/// Backend-agnostic persistence trait.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Create a user and initialize progress rows for every active question.
    async fn create_user(&self, name: &str) -> Result<UserAccount, StoreError>;

    /// Get a user by ID.
    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, StoreError>;

    /// Flip a user's active flag. Inactive users are never nudged.
    async fn set_user_active(&self, user_id: &str, active: bool) -> Result<(), StoreError>;

    // ── Questions ───────────────────────────────────────────────────

    /// Insert any questions not already present. Returns how many were added.
    async fn seed_questions(&self, questions: &[Question]) -> Result<usize, StoreError>;

    /// All active questions in sequence order.
    async fn list_questions(&self) -> Result<Vec<Question>, StoreError>;

    /// Get an active question by ID.
    async fn get_question(&self, question_id: i64) -> Result<Option<Question>, StoreError>;

    // ── Question progress ───────────────────────────────────────────

    /// First unanswered question for the user, in sequence order.
    async fn next_unanswered_question(&self, user_id: &str) -> Result<Option<i64>, StoreError>;

    /// Progress row for one user and question.
    async fn question_progress(
        &self,
        user_id: &str,
        question_id: i64,
    ) -> Result<Option<QuestionProgress>, StoreError>;

    /// All progress rows for a user, in sequence order.
    async fn user_progress(&self, user_id: &str) -> Result<Vec<QuestionProgress>, StoreError>;

    /// Bump the sent-reminder counter for a question after a schedule.
    async fn increment_nudge_count(
        &self,
        user_id: &str,
        question_id: i64,
    ) -> Result<(), StoreError>;

    /// Record an answer and advance the user's position.
    ///
    /// Fails with `InvalidTransition` if the question was already answered,
    /// so concurrent answers collapse to a single winner.
    async fn answer_question(
        &self,
        user_id: &str,
        question_id: i64,
        answer: &str,
    ) -> Result<(), StoreError>;

    // ── Nudge ledger ────────────────────────────────────────────────

    /// Append a ledger record.
    ///
    /// Fails with `DuplicateKey` if a record with the same
    /// `(user_id, question_id, nudge_count)` identity already exists.
    async fn create_nudge(&self, record: &NudgeRecord) -> Result<(), StoreError>;

    /// Look up a ledger record by its identity triple.
    async fn find_nudge(
        &self,
        user_id: &str,
        question_id: i64,
        nudge_count: u32,
    ) -> Result<Option<NudgeRecord>, StoreError>;

    /// All still-scheduled records for one user and question.
    async fn pending_nudges(
        &self,
        user_id: &str,
        question_id: i64,
    ) -> Result<Vec<NudgeRecord>, StoreError>;

    /// Move a record from `scheduled` to `sent`, stamping `sent_at`.
    ///
    /// The update is conditional on the record still being `scheduled`; a
    /// record in any other state fails with `InvalidTransition`.
    async fn mark_nudge_sent(
        &self,
        user_id: &str,
        question_id: i64,
        nudge_count: u32,
    ) -> Result<(), StoreError>;

    /// Move a record from `scheduled` to `cancelled`, same conditions as
    /// `mark_nudge_sent`.
    async fn mark_nudge_cancelled(
        &self,
        user_id: &str,
        question_id: i64,
        nudge_count: u32,
    ) -> Result<(), StoreError>;

    /// Ledger records for a user, most recent first, up to `limit`.
    async fn nudge_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NudgeRecord>, StoreError>;
}
