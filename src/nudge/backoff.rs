//! Pure escalation arithmetic: delay growth and message rotation.

use crate::config::NudgeConfig;

/// Delay in minutes before the next reminder, given how many reminders have
/// already been sent for the question.
///
/// Grows as `initial * multiplier^sent`, capped at `delay_cap_minutes`.
/// Returns `None` once the budget of `max_nudges` is used up; the caller is
/// expected to stop nudging entirely at that point. Arithmetic saturates, so
/// absurd configs degrade to the cap instead of wrapping.
pub fn delay_minutes(config: &NudgeConfig, sent: u32) -> Option<u32> {
    if sent >= config.max_nudges {
        return None;
    }
    let raw = (config.initial_delay_minutes as u64)
        .saturating_mul((config.exponential_multiplier as u64).saturating_pow(sent));
    Some(raw.min(config.delay_cap_minutes as u64) as u32)
}

/// Reminder text for the next nudge, cycling through the configured
/// messages by ordinal.
///
/// `config.messages` is validated non-empty at construction.
pub fn message(config: &NudgeConfig, sent: u32) -> &str {
    let idx = sent as usize % config.messages.len();
    &config.messages[idx]
}
