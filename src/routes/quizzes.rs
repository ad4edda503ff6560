use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};

use crate::{
    dto::{
        attempt_dto::{AttemptHistoryResponse, StartAttemptResponse},
        quiz_dto::QuizOverviewResponse,
    },
    error::Result,
    utils::token::Claims,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/quizzes/{quiz_id}",
    params(
        ("quiz_id" = i64, Path, description = "Quiz ID")
    ),
    responses(
        (status = 200, description = "Quiz summary and the caller's attempt budget", body = QuizOverviewResponse),
        (status = 404, description = "Quiz not found")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn get_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let overview = state
        .attempt_service
        .quiz_overview(claims.user_id()?, quiz_id)
        .await?;
    Ok(Json(QuizOverviewResponse::from(overview)))
}

#[utoipa::path(
    post,
    path = "/api/quizzes/{quiz_id}/attempts",
    params(
        ("quiz_id" = i64, Path, description = "Quiz ID")
    ),
    responses(
        (status = 201, description = "Attempt started", body = StartAttemptResponse),
        (status = 403, description = "No attempts left"),
        (status = 404, description = "Quiz not found"),
        (status = 409, description = "An attempt is already in progress"),
        (status = 422, description = "Quiz is not open")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let view = state
        .attempt_service
        .start(claims.user_id()?, quiz_id)
        .await?;
    Ok((StatusCode::CREATED, Json(StartAttemptResponse::from(view))))
}

#[utoipa::path(
    get,
    path = "/api/quizzes/{quiz_id}/attempts",
    params(
        ("quiz_id" = i64, Path, description = "Quiz ID")
    ),
    responses(
        (status = 200, description = "The caller's attempts, newest first", body = AttemptHistoryResponse),
        (status = 404, description = "Quiz not found")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn list_attempts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let history = state
        .attempt_service
        .history(claims.user_id()?, quiz_id)
        .await?;
    Ok(Json(AttemptHistoryResponse::from(history)))
}
