//! REST endpoints for the nudge engine.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, NudgeError, StoreError};
use crate::nudge::engine::NudgeEngine;
use crate::nudge::model::{NudgeRecord, NudgeStatus, ReminderPayload};

/// Default page size for ledger queries.
const DEFAULT_HISTORY_LIMIT: usize = 50;
/// Upper bound on a single history page.
const MAX_HISTORY_LIMIT: usize = 500;

/// Shared state for nudge routes.
#[derive(Clone)]
pub struct NudgeRouteState {
    pub engine: Arc<NudgeEngine>,
}

/// Client-facing slice of a ledger record.
///
/// The gateway's cancellation handle and the row bookkeeping columns stay
/// server-side; clients see the identity and delivery details only.
#[derive(Serialize)]
struct NudgeView {
    question_id: i64,
    nudge_count: u32,
    status: NudgeStatus,
    scheduled_for: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    delay_minutes: u32,
    message: String,
}

impl From<NudgeRecord> for NudgeView {
    fn from(record: NudgeRecord) -> Self {
        Self {
            question_id: record.question_id,
            nudge_count: record.nudge_count,
            status: record.status,
            scheduled_for: record.scheduled_for,
            sent_at: record.sent_at,
            delay_minutes: record.delay_minutes,
            message: record.message,
        }
    }
}

/// Build the nudge REST routes.
pub fn nudge_routes(state: NudgeRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/nudges/schedule", post(schedule_nudge))
        .route("/api/nudges/cancel", post(cancel_nudges))
        .route("/api/nudges/fire", post(fire_nudge))
        .route("/api/nudges/history", get(nudge_history))
        .route("/api/nudges/config", get(nudge_config))
        .with_state(state)
}

// ── Handlers ────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "nudge-engine"
    }))
}

#[derive(Deserialize)]
struct ScheduleRequest {
    user_id: String,
}

/// POST /api/nudges/schedule
///
/// Schedule the next escalating nudge for the user's current question.
async fn schedule_nudge(
    State(state): State<NudgeRouteState>,
    Json(body): Json<ScheduleRequest>,
) -> Response {
    match state.engine.schedule(&body.user_id).await {
        Ok(record) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": "Nudge scheduled",
                "nudge": NudgeView::from(record),
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct CancelRequest {
    user_id: String,
    question_id: i64,
}

/// POST /api/nudges/cancel
///
/// Cancel every pending nudge for one question.
async fn cancel_nudges(
    State(state): State<NudgeRouteState>,
    Json(body): Json<CancelRequest>,
) -> Response {
    match state.engine.cancel(&body.user_id, body.question_id).await {
        Ok(cancelled_count) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "message": "Pending nudges cancelled",
                "cancelled_count": cancelled_count,
            })),
        )
            .into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/nudges/fire
///
/// Entry point for the reminder gateway. Stale reminders come back as
/// skipped outcomes with a 200, never as errors, so the gateway does
/// not retry them.
async fn fire_nudge(
    State(state): State<NudgeRouteState>,
    Json(payload): Json<ReminderPayload>,
) -> Response {
    match state.engine.fire(&payload).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => error_response(&e),
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    user_id: String,
    limit: Option<usize>,
}

/// GET /api/nudges/history?user_id=...&limit=...
///
/// The user's nudge ledger, most recent first.
async fn nudge_history(
    State(state): State<NudgeRouteState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    match state.engine.history(&query.user_id, limit).await {
        Ok(nudges) => {
            let nudges: Vec<NudgeView> = nudges.into_iter().map(NudgeView::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "user_id": query.user_id,
                    "nudges": nudges,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// GET /api/nudges/config
///
/// The backoff policy currently in effect.
async fn nudge_config(State(state): State<NudgeRouteState>) -> impl IntoResponse {
    Json(state.engine.config().clone())
}

// ── Error mapping ───────────────────────────────────────────────────

/// Map an engine error onto an HTTP status and a stable machine code.
pub(crate) fn error_response(err: &Error) -> Response {
    let (status, code) = match err {
        Error::Nudge(NudgeError::UserNotFound { .. }) => {
            (StatusCode::NOT_FOUND, "user_not_found")
        }
        Error::Nudge(NudgeError::NoPendingQuestion { .. }) => {
            (StatusCode::CONFLICT, "no_pending_question")
        }
        Error::Nudge(NudgeError::BudgetExhausted { .. }) => {
            (StatusCode::CONFLICT, "nudge_budget_exhausted")
        }
        Error::Nudge(NudgeError::AlreadyAnswered { .. }) => {
            (StatusCode::CONFLICT, "already_answered")
        }
        Error::Gateway(_) => (StatusCode::BAD_GATEWAY, "gateway_unavailable"),
        Error::Store(StoreError::NotFound { .. }) => (StatusCode::NOT_FOUND, "not_found"),
        Error::Store(StoreError::InvalidTransition { .. }) => {
            (StatusCode::CONFLICT, "invalid_transition")
        }
        Error::Store(StoreError::DuplicateKey { .. }) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "duplicate_nudge")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
    }

    (
        status,
        Json(serde_json::json!({
            "error": err.to_string(),
            "code": code,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;

    fn status_of(err: Error) -> StatusCode {
        error_response(&err).status()
    }

    #[test]
    fn domain_errors_map_to_conflict_or_not_found() {
        assert_eq!(
            status_of(Error::Nudge(NudgeError::UserNotFound {
                user_id: "u".into()
            })),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::Nudge(NudgeError::NoPendingQuestion {
                user_id: "u".into()
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(Error::Nudge(NudgeError::BudgetExhausted {
                user_id: "u".into()
            })),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn gateway_errors_map_to_bad_gateway() {
        assert_eq!(
            status_of(Error::Gateway(GatewayError::Unavailable {
                reason: "down".into()
            })),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn store_errors_map_by_kind() {
        assert_eq!(
            status_of(Error::Store(StoreError::NotFound {
                entity: "user".into(),
                id: "u".into()
            })),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::Store(StoreError::InvalidTransition {
                entity: "nudge",
                id: "u/q1#1".into(),
                expected: "scheduled"
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(Error::Store(StoreError::Query("boom".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
