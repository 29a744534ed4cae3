//! REST endpoints for users, questions, and answer progress.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::warn;

use crate::error::{NudgeError, StoreError};
use crate::nudge::engine::NudgeEngine;
use crate::nudge::routes::error_response;
use crate::progress::model::ProgressSummary;
use crate::store::Store;

/// Shared state for progress routes.
#[derive(Clone)]
pub struct ProgressRouteState {
    pub store: Arc<dyn Store>,
    pub engine: Arc<NudgeEngine>,
}

/// Build the user and question REST routes.
pub fn progress_routes(state: ProgressRouteState) -> Router {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/{user_id}", get(get_user))
        .route("/api/questions", get(list_questions))
        .route("/api/questions/current", get(current_question))
        .route("/api/questions/progress", get(user_progress))
        .route("/api/questions/answer", post(answer_question))
        .route("/api/questions/{question_id}", get(get_question))
        .with_state(state)
}

// ── Users ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateUserRequest {
    name: String,
}

/// POST /api/users
///
/// Register a user at the start of the question sequence.
async fn create_user(
    State(state): State<ProgressRouteState>,
    Json(body): Json<CreateUserRequest>,
) -> Response {
    let name = body.name.trim();
    if name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Name is required"})),
        )
            .into_response();
    }

    match state.store.create_user(name).await {
        Ok(user) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => error_response(&e.into()),
    }
}

/// GET /api/users/{user_id}
async fn get_user(
    State(state): State<ProgressRouteState>,
    Path(user_id): Path<String>,
) -> Response {
    match state.store.get_user(&user_id).await {
        Ok(Some(user)) => Json(user).into_response(),
        Ok(None) => error_response(&NudgeError::UserNotFound { user_id }.into()),
        Err(e) => error_response(&e.into()),
    }
}

// ── Questions ───────────────────────────────────────────────────────

/// GET /api/questions
///
/// All active questions in sequence order.
async fn list_questions(State(state): State<ProgressRouteState>) -> Response {
    match state.store.list_questions().await {
        Ok(questions) => Json(questions).into_response(),
        Err(e) => error_response(&e.into()),
    }
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: String,
}

/// GET /api/questions/current?user_id=...
///
/// The user's next unanswered question, or a completion marker.
async fn current_question(
    State(state): State<ProgressRouteState>,
    Query(query): Query<UserQuery>,
) -> Response {
    let user = match state.store.get_user(&query.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return error_response(
                &NudgeError::UserNotFound {
                    user_id: query.user_id,
                }
                .into(),
            );
        }
        Err(e) => return error_response(&e.into()),
    };

    let next = match state.store.next_unanswered_question(&user.id).await {
        Ok(next) => next,
        Err(e) => return error_response(&e.into()),
    };
    let Some(question_id) = next else {
        return Json(serde_json::json!({
            "message": "All questions completed!",
            "completed": true,
            "question": null,
        }))
        .into_response();
    };

    let question = match state.store.get_question(question_id).await {
        Ok(Some(question)) => question,
        Ok(None) => {
            return error_response(
                &StoreError::NotFound {
                    entity: "question".to_string(),
                    id: question_id.to_string(),
                }
                .into(),
            );
        }
        Err(e) => return error_response(&e.into()),
    };

    let rows = match state.store.user_progress(&user.id).await {
        Ok(rows) => rows,
        Err(e) => return error_response(&e.into()),
    };

    Json(serde_json::json!({
        "question": question,
        "progress": ProgressSummary::from_rows(user.current_question, &rows),
    }))
    .into_response()
}

/// GET /api/questions/progress?user_id=...
///
/// Completion summary plus every recorded answer.
async fn user_progress(
    State(state): State<ProgressRouteState>,
    Query(query): Query<UserQuery>,
) -> Response {
    let user = match state.store.get_user(&query.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return error_response(
                &NudgeError::UserNotFound {
                    user_id: query.user_id,
                }
                .into(),
            );
        }
        Err(e) => return error_response(&e.into()),
    };

    let rows = match state.store.user_progress(&user.id).await {
        Ok(rows) => rows,
        Err(e) => return error_response(&e.into()),
    };
    let summary = ProgressSummary::from_rows(user.current_question, &rows);

    let answers: Vec<serde_json::Value> = rows
        .iter()
        .filter(|p| p.answered)
        .map(|p| {
            serde_json::json!({
                "question_id": p.question_id,
                "answer": p.answer,
                "answered_at": p.answered_at,
            })
        })
        .collect();

    Json(serde_json::json!({
        "current": summary.current,
        "total": summary.total,
        "completed": summary.completed,
        "percentage": summary.percentage,
        "answers": answers,
    }))
    .into_response()
}

/// GET /api/questions/{question_id}
async fn get_question(
    State(state): State<ProgressRouteState>,
    Path(question_id): Path<i64>,
) -> Response {
    match state.store.get_question(question_id).await {
        Ok(Some(question)) => Json(question).into_response(),
        Ok(None) => error_response(
            &StoreError::NotFound {
                entity: "question".to_string(),
                id: question_id.to_string(),
            }
            .into(),
        ),
        Err(e) => error_response(&e.into()),
    }
}

// ── Answers ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AnswerRequest {
    user_id: String,
    question_id: i64,
    answer: String,
}

/// POST /api/questions/answer
///
/// Record an answer, then retire any pending nudges for the question.
/// The answer is saved first: a reminder that slips through before the
/// cancel lands is skipped at fire time because the question is answered.
async fn answer_question(
    State(state): State<ProgressRouteState>,
    Json(body): Json<AnswerRequest>,
) -> Response {
    let user = match state.store.get_user(&body.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return error_response(
                &NudgeError::UserNotFound {
                    user_id: body.user_id,
                }
                .into(),
            );
        }
        Err(e) => return error_response(&e.into()),
    };

    match state.store.get_question(body.question_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                &StoreError::NotFound {
                    entity: "question".to_string(),
                    id: body.question_id.to_string(),
                }
                .into(),
            );
        }
        Err(e) => return error_response(&e.into()),
    }

    match state.store.question_progress(&user.id, body.question_id).await {
        Ok(Some(progress)) if progress.answered => {
            return error_response(
                &NudgeError::AlreadyAnswered {
                    user_id: user.id,
                    question_id: body.question_id,
                }
                .into(),
            );
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                &StoreError::NotFound {
                    entity: "question_progress".to_string(),
                    id: format!("{}/q{}", user.id, body.question_id),
                }
                .into(),
            );
        }
        Err(e) => return error_response(&e.into()),
    }

    match state
        .store
        .answer_question(&user.id, body.question_id, &body.answer)
        .await
    {
        Ok(()) => {}
        // Lost the race to another answer for the same question.
        Err(StoreError::InvalidTransition { .. }) => {
            return error_response(
                &NudgeError::AlreadyAnswered {
                    user_id: user.id,
                    question_id: body.question_id,
                }
                .into(),
            );
        }
        Err(e) => return error_response(&e.into()),
    }

    // The answer is durable at this point. Nudge cleanup must not undo it.
    let cancelled_nudges = match state.engine.cancel(&user.id, body.question_id).await {
        Ok(count) => count,
        Err(e) => {
            warn!(
                user_id = %user.id,
                question_id = body.question_id,
                error = %e,
                "Failed to cancel pending nudges after answer"
            );
            0
        }
    };

    let next_question_id = match state.store.next_unanswered_question(&user.id).await {
        Ok(next) => next,
        Err(e) => return error_response(&e.into()),
    };
    let next_question = match next_question_id {
        Some(id) => match state.store.get_question(id).await {
            Ok(question) => question,
            Err(e) => return error_response(&e.into()),
        },
        None => None,
    };

    let rows = match state.store.user_progress(&user.id).await {
        Ok(rows) => rows,
        Err(e) => return error_response(&e.into()),
    };

    Json(serde_json::json!({
        "message": "Answer saved successfully",
        "cancelled_nudges": cancelled_nudges,
        "next_question": next_question,
        "progress": ProgressSummary::from_rows(body.question_id + 1, &rows),
        "completed": next_question_id.is_none(),
    }))
    .into_response()
}
