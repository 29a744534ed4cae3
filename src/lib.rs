//! Nudge Engine: escalating reminders for unanswered questions.
//!
//! Users work through a fixed question sequence. When one goes unanswered,
//! the engine schedules reminders with exponentially growing delays through
//! an external delayed-delivery gateway, records each one in a durable
//! ledger, and validates every reminder when it comes back to fire.

pub mod config;
pub mod error;
pub mod gateway;
pub mod nudge;
pub mod progress;
pub mod store;
