//! Nudge orchestrator.
//!
//! Coordinates the backoff policy, the ledger, and the reminder gateway:
//! `schedule` places the next escalating reminder, `cancel` retires pending
//! ones, `fire` handles a reminder coming back from the gateway.
//!
//! All mutating operations for one user are serialized behind a per-user
//! async lock, so ordinals are assigned race-free without database
//! transactions.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::NudgeConfig;
use crate::error::{NudgeError, Result, StoreError};
use crate::gateway::ReminderGateway;
use crate::nudge::backoff;
use crate::nudge::model::{FireOutcome, NudgeRecord, NudgeStatus, ReminderPayload, SkipReason};
use crate::store::Store;

/// Drives the nudge lifecycle end to end.
pub struct NudgeEngine {
    config: NudgeConfig,
    store: Arc<dyn Store>,
    gateway: Arc<dyn ReminderGateway>,
    /// One lock per user id, created on first use and removed again once
    /// the last operation holding it finishes.
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl NudgeEngine {
    pub fn new(
        config: NudgeConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn ReminderGateway>,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The backoff policy in effect.
    pub fn config(&self) -> &NudgeConfig {
        &self.config
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the registry entry once ours is the only outstanding clone.
    async fn release_user_lock(&self, user_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock().await;
        // Two holders left means the map and us; nobody is using or
        // waiting on this lock.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
    }

    /// Schedule the next nudge for a user's current unanswered question.
    ///
    /// The gateway is called before the ledger is written. A crash between
    /// the two leaves an orphaned timer that fire-time validation skips;
    /// the reverse order would leave a ledger row no timer will ever fire.
    pub async fn schedule(&self, user_id: &str) -> Result<NudgeRecord> {
        let lock = self.user_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.schedule_locked(user_id).await
        };
        self.release_user_lock(user_id, lock).await;
        result
    }

    async fn schedule_locked(&self, user_id: &str) -> Result<NudgeRecord> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| NudgeError::UserNotFound {
                user_id: user_id.to_string(),
            })?;

        if !user.is_active {
            return Err(NudgeError::BudgetExhausted {
                user_id: user_id.to_string(),
            }
            .into());
        }

        let question_id = self
            .store
            .next_unanswered_question(user_id)
            .await?
            .ok_or_else(|| NudgeError::NoPendingQuestion {
                user_id: user_id.to_string(),
            })?;

        let progress = self
            .store
            .question_progress(user_id, question_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "question_progress".to_string(),
                id: format!("{user_id}/q{question_id}"),
            })?;

        let Some(delay_minutes) = backoff::delay_minutes(&self.config, progress.nudge_count)
        else {
            // Budget spent. Deactivate so future attempts short-circuit.
            self.store.set_user_active(user_id, false).await?;
            warn!(
                user_id,
                question_id,
                nudges_sent = progress.nudge_count,
                "Nudge budget exhausted, user deactivated"
            );
            return Err(NudgeError::BudgetExhausted {
                user_id: user_id.to_string(),
            }
            .into());
        };

        let nudge_count = progress.nudge_count + 1;
        let message = backoff::message(&self.config, progress.nudge_count).to_string();
        let scheduled_for = Utc::now() + chrono::Duration::minutes(delay_minutes as i64);

        let payload = ReminderPayload {
            user_id: user_id.to_string(),
            question_id,
            nudge_count,
            message: message.clone(),
        };
        let handle = self.gateway.schedule(&payload, delay_minutes).await?;

        let record = NudgeRecord::scheduled(
            user_id,
            question_id,
            nudge_count,
            delay_minutes,
            scheduled_for,
            message,
            handle,
        );
        self.store.create_nudge(&record).await?;
        self.store
            .increment_nudge_count(user_id, question_id)
            .await?;

        info!(
            user_id,
            question_id,
            nudge_count,
            delay_minutes,
            "Nudge scheduled"
        );
        Ok(record)
    }

    /// Cancel every pending nudge for a question. Returns the number of
    /// ledger records retired.
    ///
    /// Gateway cancellation is best effort. A timer that cannot be removed
    /// fires into a cancelled ledger record and is skipped there, so the
    /// ledger is advanced regardless of the gateway outcome.
    pub async fn cancel(&self, user_id: &str, question_id: i64) -> Result<usize> {
        let lock = self.user_lock(user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.cancel_locked(user_id, question_id).await
        };
        self.release_user_lock(user_id, lock).await;
        result
    }

    async fn cancel_locked(&self, user_id: &str, question_id: i64) -> Result<usize> {
        let pending = self.store.pending_nudges(user_id, question_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let results = futures::future::join_all(
            pending
                .iter()
                .map(|record| self.gateway.cancel(&record.external_handle)),
        )
        .await;
        for (record, result) in pending.iter().zip(&results) {
            if let Err(e) = result {
                warn!(
                    user_id,
                    question_id,
                    nudge_count = record.nudge_count,
                    handle = %record.external_handle,
                    error = %e,
                    "Gateway cancel failed, retiring ledger record anyway"
                );
            }
        }

        let mut cancelled = 0usize;
        for record in &pending {
            match self
                .store
                .mark_nudge_cancelled(user_id, question_id, record.nudge_count)
                .await
            {
                Ok(()) => cancelled += 1,
                Err(StoreError::InvalidTransition { .. }) => {
                    // Resolved concurrently, nothing left to retire.
                    debug!(
                        user_id,
                        question_id,
                        nudge_count = record.nudge_count,
                        "Nudge already resolved during cancel"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        if cancelled > 0 {
            info!(user_id, question_id, cancelled, "Pending nudges cancelled");
        }
        Ok(cancelled)
    }

    /// Handle a reminder arriving from the gateway.
    ///
    /// Every check failure is a skip, not an error: the gateway has done its
    /// job even when the reminder is stale, and replays must stay no-ops.
    pub async fn fire(&self, payload: &ReminderPayload) -> Result<FireOutcome> {
        let lock = self.user_lock(&payload.user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.fire_locked(payload).await
        };
        self.release_user_lock(&payload.user_id, lock).await;
        result
    }

    async fn fire_locked(&self, payload: &ReminderPayload) -> Result<FireOutcome> {
        let Some(user) = self.store.get_user(&payload.user_id).await? else {
            return Ok(self.skip(payload, SkipReason::UserNotFound));
        };
        if !user.is_active {
            return Ok(self.skip(payload, SkipReason::UserInactive));
        }

        let Some(progress) = self
            .store
            .question_progress(&payload.user_id, payload.question_id)
            .await?
        else {
            return Ok(self.skip(payload, SkipReason::QuestionNotTracked));
        };
        if progress.answered {
            return Ok(self.skip(payload, SkipReason::QuestionAnswered));
        }

        let Some(record) = self
            .store
            .find_nudge(&payload.user_id, payload.question_id, payload.nudge_count)
            .await?
        else {
            return Ok(self.skip(payload, SkipReason::NoMatchingRecord));
        };
        if record.status != NudgeStatus::Scheduled {
            return Ok(self.skip(payload, SkipReason::AlreadyResolved));
        }

        // Compare-and-set closes the race with a concurrent cancel or replay.
        match self
            .store
            .mark_nudge_sent(&payload.user_id, payload.question_id, payload.nudge_count)
            .await
        {
            Ok(()) => {}
            Err(StoreError::InvalidTransition { .. }) => {
                return Ok(self.skip(payload, SkipReason::AlreadyResolved));
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            user_id = %payload.user_id,
            question_id = payload.question_id,
            nudge_count = payload.nudge_count,
            "Nudge delivered"
        );
        Ok(FireOutcome::Delivered {
            message: payload.message.clone(),
        })
    }

    /// The user's nudge ledger, most recent first.
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<NudgeRecord>> {
        Ok(self.store.nudge_history(user_id, limit).await?)
    }

    fn skip(&self, payload: &ReminderPayload, reason: SkipReason) -> FireOutcome {
        info!(
            user_id = %payload.user_id,
            question_id = payload.question_id,
            nudge_count = payload.nudge_count,
            reason = ?reason,
            "Nudge fire skipped"
        );
        FireOutcome::Skipped { reason }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;
    use crate::error::{Error, GatewayError};
    use crate::progress::model::Question;
    use crate::store::LibSqlStore;

    /// Records every call instead of talking to a real scheduler.
    struct FakeGateway {
        scheduled: std::sync::Mutex<Vec<(ReminderPayload, u32)>>,
        cancelled: std::sync::Mutex<Vec<String>>,
        fail_schedule: AtomicBool,
        fail_cancel: AtomicBool,
        next_handle: AtomicU64,
    }

    impl FakeGateway {
        fn new() -> Self {
            Self {
                scheduled: std::sync::Mutex::new(Vec::new()),
                cancelled: std::sync::Mutex::new(Vec::new()),
                fail_schedule: AtomicBool::new(false),
                fail_cancel: AtomicBool::new(false),
                next_handle: AtomicU64::new(1),
            }
        }

        fn scheduled(&self) -> Vec<(ReminderPayload, u32)> {
            self.scheduled.lock().unwrap().clone()
        }

        fn cancelled(&self) -> Vec<String> {
            self.cancelled.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ReminderGateway for FakeGateway {
        async fn schedule(
            &self,
            payload: &ReminderPayload,
            delay_minutes: u32,
        ) -> std::result::Result<String, GatewayError> {
            if self.fail_schedule.load(Ordering::SeqCst) {
                return Err(GatewayError::Unavailable {
                    reason: "scheduler offline".into(),
                });
            }
            let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
            self.scheduled
                .lock()
                .unwrap()
                .push((payload.clone(), delay_minutes));
            Ok(format!("job-{n}"))
        }

        async fn cancel(&self, handle: &str) -> std::result::Result<(), GatewayError> {
            if self.fail_cancel.load(Ordering::SeqCst) {
                return Err(GatewayError::Unavailable {
                    reason: "scheduler offline".into(),
                });
            }
            self.cancelled.lock().unwrap().push(handle.to_string());
            Ok(())
        }
    }

    struct Fixture {
        engine: NudgeEngine,
        store: Arc<LibSqlStore>,
        gateway: Arc<FakeGateway>,
        user_id: String,
    }

    async fn fixture() -> Fixture {
        fixture_with(NudgeConfig::default()).await
    }

    async fn fixture_with(config: NudgeConfig) -> Fixture {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        store
            .seed_questions(&[
                Question::text_question(1, "First?", 1),
                Question::text_question(2, "Second?", 2),
                Question::text_question(3, "Third?", 3),
            ])
            .await
            .unwrap();
        let user = store.create_user("Test User").await.unwrap();

        let gateway = Arc::new(FakeGateway::new());
        let engine = NudgeEngine::new(config, store.clone(), gateway.clone());
        Fixture {
            engine,
            store,
            gateway,
            user_id: user.id,
        }
    }

    fn payload_for(record: &NudgeRecord) -> ReminderPayload {
        ReminderPayload {
            user_id: record.user_id.clone(),
            question_id: record.question_id,
            nudge_count: record.nudge_count,
            message: record.message.clone(),
        }
    }

    #[tokio::test]
    async fn first_schedule_targets_the_first_question() {
        let fx = fixture().await;

        let record = fx.engine.schedule(&fx.user_id).await.unwrap();
        assert_eq!(record.question_id, 1);
        assert_eq!(record.nudge_count, 1);
        assert_eq!(record.delay_minutes, 1);
        assert_eq!(record.status, NudgeStatus::Scheduled);
        assert_eq!(record.external_handle, "job-1");

        let calls = fx.gateway.scheduled();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.nudge_count, 1);
        assert_eq!(calls[0].1, 1);

        let progress = fx
            .store
            .question_progress(&fx.user_id, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.nudge_count, 1);
    }

    #[tokio::test]
    async fn repeat_schedules_escalate_the_delay() {
        let fx = fixture().await;

        let delays: Vec<u32> = [
            fx.engine.schedule(&fx.user_id).await.unwrap(),
            fx.engine.schedule(&fx.user_id).await.unwrap(),
            fx.engine.schedule(&fx.user_id).await.unwrap(),
        ]
        .iter()
        .map(|r| r.delay_minutes)
        .collect();
        assert_eq!(delays, vec![1, 2, 4]);

        let ordinals: Vec<u32> = fx
            .gateway
            .scheduled()
            .iter()
            .map(|(p, _)| p.nudge_count)
            .collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn exhausted_budget_deactivates_the_user() {
        let fx = fixture_with(NudgeConfig {
            max_nudges: 2,
            ..NudgeConfig::default()
        })
        .await;

        fx.engine.schedule(&fx.user_id).await.unwrap();
        fx.engine.schedule(&fx.user_id).await.unwrap();

        let err = fx.engine.schedule(&fx.user_id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Nudge(NudgeError::BudgetExhausted { .. })
        ));

        let user = fx.store.get_user(&fx.user_id).await.unwrap().unwrap();
        assert!(!user.is_active);

        // Deactivated users short-circuit without touching the gateway
        let err = fx.engine.schedule(&fx.user_id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Nudge(NudgeError::BudgetExhausted { .. })
        ));
        assert_eq!(fx.gateway.scheduled().len(), 2);
    }

    #[tokio::test]
    async fn gateway_failure_leaves_no_ledger_entry() {
        let fx = fixture().await;
        fx.gateway.fail_schedule.store(true, Ordering::SeqCst);

        let err = fx.engine.schedule(&fx.user_id).await.unwrap_err();
        assert!(matches!(err, Error::Gateway(_)));

        assert!(fx.engine.history(&fx.user_id, 50).await.unwrap().is_empty());
        let progress = fx
            .store
            .question_progress(&fx.user_id, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress.nudge_count, 0);
    }

    #[tokio::test]
    async fn unknown_user_cannot_be_nudged() {
        let fx = fixture().await;
        let err = fx.engine.schedule("ghost").await.unwrap_err();
        assert!(matches!(err, Error::Nudge(NudgeError::UserNotFound { .. })));
    }

    #[tokio::test]
    async fn finished_sequence_has_no_pending_question() {
        let fx = fixture().await;
        for question_id in 1..=3 {
            fx.store
                .answer_question(&fx.user_id, question_id, "done")
                .await
                .unwrap();
        }

        let err = fx.engine.schedule(&fx.user_id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Nudge(NudgeError::NoPendingQuestion { .. })
        ));
    }

    #[tokio::test]
    async fn schedule_follows_the_answer_cursor() {
        let fx = fixture().await;
        fx.store
            .answer_question(&fx.user_id, 1, "blue")
            .await
            .unwrap();

        let record = fx.engine.schedule(&fx.user_id).await.unwrap();
        assert_eq!(record.question_id, 2);
        assert_eq!(record.nudge_count, 1);
    }

    #[tokio::test]
    async fn cancel_retires_all_pending_nudges() {
        let fx = fixture().await;
        let first = fx.engine.schedule(&fx.user_id).await.unwrap();
        let second = fx.engine.schedule(&fx.user_id).await.unwrap();

        let cancelled = fx.engine.cancel(&fx.user_id, 1).await.unwrap();
        assert_eq!(cancelled, 2);
        assert_eq!(
            fx.gateway.cancelled(),
            vec![first.external_handle, second.external_handle]
        );

        assert!(fx.store.pending_nudges(&fx.user_id, 1).await.unwrap().is_empty());
        let history = fx.engine.history(&fx.user_id, 50).await.unwrap();
        assert!(history
            .iter()
            .all(|r| r.status == NudgeStatus::Cancelled));
    }

    #[tokio::test]
    async fn cancel_without_pending_nudges_is_zero() {
        let fx = fixture().await;
        let cancelled = fx.engine.cancel(&fx.user_id, 1).await.unwrap();
        assert_eq!(cancelled, 0);
        assert!(fx.gateway.cancelled().is_empty());
    }

    #[tokio::test]
    async fn gateway_cancel_failure_still_retires_the_ledger() {
        let fx = fixture().await;
        fx.engine.schedule(&fx.user_id).await.unwrap();
        fx.gateway.fail_cancel.store(true, Ordering::SeqCst);

        let cancelled = fx.engine.cancel(&fx.user_id, 1).await.unwrap();
        assert_eq!(cancelled, 1);

        let history = fx.engine.history(&fx.user_id, 50).await.unwrap();
        assert_eq!(history[0].status, NudgeStatus::Cancelled);
    }

    #[tokio::test]
    async fn fire_delivers_once_then_skips_replays() {
        let fx = fixture().await;
        let record = fx.engine.schedule(&fx.user_id).await.unwrap();
        let payload = payload_for(&record);

        let outcome = fx.engine.fire(&payload).await.unwrap();
        assert!(matches!(
            outcome,
            FireOutcome::Delivered { ref message } if message == &record.message
        ));

        let stored = fx
            .store
            .find_nudge(&fx.user_id, 1, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, NudgeStatus::Sent);
        assert!(stored.sent_at.is_some());

        let replay = fx.engine.fire(&payload).await.unwrap();
        assert!(matches!(
            replay,
            FireOutcome::Skipped {
                reason: SkipReason::AlreadyResolved
            }
        ));
    }

    #[tokio::test]
    async fn fire_skips_stale_reminders() {
        let fx = fixture().await;

        // Unknown user
        let outcome = fx
            .engine
            .fire(&ReminderPayload {
                user_id: "ghost".into(),
                question_id: 1,
                nudge_count: 1,
                message: "hi".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            FireOutcome::Skipped {
                reason: SkipReason::UserNotFound
            }
        ));

        // Reminder with no ledger record behind it
        let outcome = fx
            .engine
            .fire(&ReminderPayload {
                user_id: fx.user_id.clone(),
                question_id: 1,
                nudge_count: 7,
                message: "hi".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            FireOutcome::Skipped {
                reason: SkipReason::NoMatchingRecord
            }
        ));

        // Question outside the tracked sequence
        let outcome = fx
            .engine
            .fire(&ReminderPayload {
                user_id: fx.user_id.clone(),
                question_id: 99,
                nudge_count: 1,
                message: "hi".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            FireOutcome::Skipped {
                reason: SkipReason::QuestionNotTracked
            }
        ));
    }

    #[tokio::test]
    async fn fire_skips_after_the_question_is_answered() {
        let fx = fixture().await;
        let record = fx.engine.schedule(&fx.user_id).await.unwrap();
        let payload = payload_for(&record);

        fx.store
            .answer_question(&fx.user_id, 1, "blue")
            .await
            .unwrap();

        let outcome = fx.engine.fire(&payload).await.unwrap();
        assert!(matches!(
            outcome,
            FireOutcome::Skipped {
                reason: SkipReason::QuestionAnswered
            }
        ));

        // The record stays scheduled rather than flipping to sent
        let stored = fx
            .store
            .find_nudge(&fx.user_id, 1, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, NudgeStatus::Scheduled);
    }

    #[tokio::test]
    async fn fire_skips_deactivated_users() {
        let fx = fixture().await;
        let record = fx.engine.schedule(&fx.user_id).await.unwrap();
        let payload = payload_for(&record);

        fx.store.set_user_active(&fx.user_id, false).await.unwrap();

        let outcome = fx.engine.fire(&payload).await.unwrap();
        assert!(matches!(
            outcome,
            FireOutcome::Skipped {
                reason: SkipReason::UserInactive
            }
        ));
    }

    #[tokio::test]
    async fn fire_skips_cancelled_records() {
        let fx = fixture().await;
        let record = fx.engine.schedule(&fx.user_id).await.unwrap();
        let payload = payload_for(&record);

        fx.engine.cancel(&fx.user_id, 1).await.unwrap();

        let outcome = fx.engine.fire(&payload).await.unwrap();
        assert!(matches!(
            outcome,
            FireOutcome::Skipped {
                reason: SkipReason::AlreadyResolved
            }
        ));
    }

    #[tokio::test]
    async fn concurrent_schedules_take_distinct_ordinals() {
        let fx = fixture().await;

        let (a, b) = tokio::join!(
            fx.engine.schedule(&fx.user_id),
            fx.engine.schedule(&fx.user_id)
        );
        let a = a.unwrap();
        let b = b.unwrap();

        let mut ordinals = vec![a.nudge_count, b.nudge_count];
        ordinals.sort_unstable();
        assert_eq!(ordinals, vec![1, 2]);

        let history = fx.engine.history(&fx.user_id, 50).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn lock_registry_drains_after_each_operation() {
        let fx = fixture().await;

        // Requests for made-up user ids must not pin registry entries.
        for i in 0..100 {
            let err = fx.engine.schedule(&format!("ghost-{i}")).await.unwrap_err();
            assert!(matches!(err, Error::Nudge(NudgeError::UserNotFound { .. })));
        }
        assert!(fx.engine.user_locks.lock().await.is_empty());

        // Real traffic leaves nothing behind either.
        fx.engine.schedule(&fx.user_id).await.unwrap();
        fx.engine.cancel(&fx.user_id, 1).await.unwrap();
        fx.engine
            .fire(&ReminderPayload {
                user_id: fx.user_id.clone(),
                question_id: 1,
                nudge_count: 1,
                message: "hi".into(),
            })
            .await
            .unwrap();
        assert!(fx.engine.user_locks.lock().await.is_empty());
    }
}
