use axum::Json;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::dto::attempt_dto::{
    AttemptHistoryResponse, AttemptResultDto, AttemptStatusResponse, AttemptSummary,
    GradedAnswerDto, PublicOption, PublicQuestion, SaveAnswerRequest, SaveAnswerResponse,
    StartAttemptResponse, SubmitAttemptRequest, SubmitAttemptResponse,
};
use crate::dto::quiz_dto::QuizOverviewResponse;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(title = "LMS quiz attempt API"),
    paths(
        crate::routes::health::health,
        crate::routes::quizzes::get_quiz,
        crate::routes::quizzes::start_attempt,
        crate::routes::quizzes::list_attempts,
        crate::routes::attempts::get_attempt,
        crate::routes::attempts::save_answer,
        crate::routes::attempts::skip_question,
        crate::routes::attempts::next_question,
        crate::routes::attempts::heartbeat,
        crate::routes::attempts::submit_attempt,
    ),
    components(schemas(
        QuizOverviewResponse,
        StartAttemptResponse,
        PublicQuestion,
        PublicOption,
        SaveAnswerRequest,
        SaveAnswerResponse,
        SubmitAttemptRequest,
        SubmitAttemptResponse,
        AttemptResultDto,
        GradedAnswerDto,
        AttemptStatusResponse,
        AttemptHistoryResponse,
        AttemptSummary,
    )),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

#[axum::debug_handler]
pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
