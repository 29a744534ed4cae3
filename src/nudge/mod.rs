//! Nudge scheduling system, the heart of the engine.
//!
//! A nudge is one escalating reminder for one unanswered question. The
//! backoff policy decides when the next one fires, the ledger records every
//! one ever placed, and the orchestrator ties both to the external reminder
//! gateway.

pub mod backoff;
pub mod engine;
pub mod model;
pub mod routes;

pub use engine::NudgeEngine;
pub use model::{FireOutcome, NudgeRecord, NudgeStatus, ReminderPayload, SkipReason};
pub use routes::{NudgeRouteState, nudge_routes};
