//! Error types for the nudge engine.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Nudge error: {0}")]
    Nudge(#[from] NudgeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ledger store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Duplicate nudge record for user {user_id}, question {question_id}, ordinal {nudge_count}")]
    DuplicateKey {
        user_id: String,
        question_id: i64,
        nudge_count: u32,
    },

    #[error("{entity} {id} is not {expected}, refusing transition")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        expected: &'static str,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Reminder gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Gateway request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Invalid response from gateway: {reason}")]
    InvalidResponse { reason: String },
}

/// Domain errors raised by the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum NudgeError {
    #[error("User {user_id} has no pending question to nudge about")]
    NoPendingQuestion { user_id: String },

    #[error("Nudge budget exhausted for user {user_id}")]
    BudgetExhausted { user_id: String },

    #[error("User {user_id} not found")]
    UserNotFound { user_id: String },

    #[error("Question {question_id} already answered by user {user_id}")]
    AlreadyAnswered { user_id: String, question_id: i64 },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
