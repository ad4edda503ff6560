use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::attempt_dto::{
        AttemptStatusResponse, SaveAnswerRequest, SaveAnswerResponse, SubmitAttemptRequest,
        SubmitAttemptResponse,
    },
    error::Result,
    services::attempt_service::AnswerInput,
    utils::token::Claims,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/attempts/{id}",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Attempt status and countdowns", body = AttemptStatusResponse),
        (status = 403, description = "Attempt belongs to another student"),
        (status = 404, description = "Attempt not found")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn get_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state.attempt_service.status(claims.user_id()?, id).await?;
    Ok(Json(AttemptStatusResponse::from(view)))
}

#[utoipa::path(
    patch,
    path = "/api/attempts/{id}/answers",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    request_body = SaveAnswerRequest,
    responses(
        (status = 200, description = "Answer saved", body = SaveAnswerResponse),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "Attempt or question not found"),
        (status = 409, description = "Attempt finished or question window closed")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let question_id = payload.question_id;
    let view = state
        .attempt_service
        .record_answer(claims.user_id()?, id, AnswerInput::from(payload))
        .await?;
    Ok(Json(SaveAnswerResponse::new(question_id, &view)))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/questions/{question_id}/skip",
    params(
        ("id" = Uuid, Path, description = "Attempt ID"),
        ("question_id" = i64, Path, description = "Question ID")
    ),
    responses(
        (status = 200, description = "Question skipped", body = SaveAnswerResponse),
        (status = 404, description = "Attempt or question not found"),
        (status = 409, description = "Attempt finished or question window closed")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn skip_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, question_id)): Path<(Uuid, i64)>,
) -> Result<impl IntoResponse> {
    let view = state
        .attempt_service
        .skip_question(claims.user_id()?, id, question_id)
        .await?;
    Ok(Json(SaveAnswerResponse::new(question_id, &view)))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/next",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Moved to the next question", body = AttemptStatusResponse),
        (status = 409, description = "Attempt finished")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn next_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state
        .attempt_service
        .next_question(claims.user_id()?, id)
        .await?;
    Ok(Json(AttemptStatusResponse::from(view)))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/heartbeat",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Activity recorded", body = AttemptStatusResponse),
        (status = 409, description = "Attempt finished")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn heartbeat(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state
        .attempt_service
        .heartbeat(claims.user_id()?, id)
        .await?;
    Ok(Json(AttemptStatusResponse::from(view)))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/submit",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    request_body = SubmitAttemptRequest,
    responses(
        (status = 200, description = "Attempt graded, or the stored result of an earlier submission", body = SubmitAttemptResponse),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "Attempt not found")
    ),
    security(("bearer_auth" = []))
)]
#[axum::debug_handler]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let answers = payload.answers.into_iter().map(AnswerInput::from).collect();
    let outcome = state
        .attempt_service
        .submit(claims.user_id()?, id, answers)
        .await?;
    Ok(Json(SubmitAttemptResponse::from(outcome)))
}
