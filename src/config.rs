//! Configuration types.

use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

/// Escalation policy for reminder scheduling.
///
/// Delays grow geometrically per nudge already sent for a question and are
/// capped at `delay_cap_minutes`. Once `max_nudges` reminders have gone out
/// for a single question, the user is considered unreachable.
#[derive(Debug, Clone, Serialize)]
pub struct NudgeConfig {
    /// Delay before the first reminder, in minutes.
    pub initial_delay_minutes: u32,
    /// Geometric growth factor applied per reminder already sent.
    pub exponential_multiplier: u32,
    /// Maximum reminders per question before the user is deactivated.
    pub max_nudges: u32,
    /// Upper bound on any single delay, in minutes.
    pub delay_cap_minutes: u32,
    /// Reminder texts, cycled in order by reminder ordinal.
    pub messages: Vec<String>,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            initial_delay_minutes: 1,
            exponential_multiplier: 2,
            max_nudges: 20,
            delay_cap_minutes: 1440, // 24 hours
            messages: default_messages(),
        }
    }
}

impl NudgeConfig {
    /// Build config from `NUDGE_*` environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// `NUDGE_MESSAGES` is a JSON array of strings; an unparseable or empty
    /// array is rejected rather than silently ignored.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let initial_delay_minutes: u32 = std::env::var("NUDGE_INITIAL_DELAY_MIN")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.initial_delay_minutes);

        let exponential_multiplier: u32 = std::env::var("NUDGE_MULTIPLIER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.exponential_multiplier);

        let max_nudges: u32 = std::env::var("NUDGE_MAX_COUNT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_nudges);

        let delay_cap_minutes: u32 = std::env::var("NUDGE_DELAY_CAP_MIN")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.delay_cap_minutes);

        let messages = match std::env::var("NUDGE_MESSAGES") {
            Ok(raw) => {
                serde_json::from_str::<Vec<String>>(&raw).map_err(|e| ConfigError::InvalidValue {
                    key: "NUDGE_MESSAGES".to_string(),
                    message: format!("expected a JSON array of strings: {}", e),
                })?
            }
            Err(_) => defaults.messages,
        };

        if messages.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "NUDGE_MESSAGES".to_string(),
                message: "at least one reminder message is required".to_string(),
            });
        }

        Ok(Self {
            initial_delay_minutes,
            exponential_multiplier,
            max_nudges,
            delay_cap_minutes,
            messages,
        })
    }
}

/// Delayed-delivery gateway configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the reminder scheduler service.
    pub endpoint: String,
    /// Optional bearer token sent with every gateway request.
    pub api_token: Option<secrecy::SecretString>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl GatewayConfig {
    /// Build config from environment variables.
    /// Fails if `NUDGE_GATEWAY_URL` is not set; the engine cannot run without
    /// a scheduler to hand timers to.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = std::env::var("NUDGE_GATEWAY_URL")
            .map_err(|_| ConfigError::MissingEnvVar("NUDGE_GATEWAY_URL".to_string()))?;

        let api_token = std::env::var("NUDGE_GATEWAY_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .map(secrecy::SecretString::from);

        let timeout_secs: u64 = std::env::var("NUDGE_GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_token,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn default_messages() -> Vec<String> {
    [
        "Hey there! Don't forget to continue with your questions.",
        "Just checking in - ready to continue?",
        "You're doing great! Let's keep going with the next question.",
        "Quick reminder: your questions are waiting for you!",
        "Almost there! Just a few more questions to go.",
        "Don't let the momentum stop - answer the next question!",
        "Your progress is important to us. Please continue!",
        "Time for the next question - you've got this!",
        "Keep going! You're making excellent progress.",
        "One more question awaits your answer!",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
