pub mod attempts;
pub mod docs;
pub mod health;
pub mod quizzes;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::middleware::auth::require_bearer_auth;
use crate::AppState;

/// All routes with state applied. Layers such as tracing and CORS are added
/// by the binary.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/quizzes/:quiz_id",
            get(quizzes::get_quiz),
        )
        .route(
            "/api/quizzes/:quiz_id/attempts",
            get(quizzes::list_attempts).post(quizzes::start_attempt),
        )
        .route("/api/attempts/:id", get(attempts::get_attempt))
        .route("/api/attempts/:id/answers", patch(attempts::save_answer))
        .route(
            "/api/attempts/:id/questions/:question_id/skip",
            post(attempts::skip_question),
        )
        .route("/api/attempts/:id/next", post(attempts::next_question))
        .route("/api/attempts/:id/heartbeat", post(attempts::heartbeat))
        .route("/api/attempts/:id/submit", post(attempts::submit_attempt))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_bearer_auth,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/openapi.json", get(docs::openapi_json))
        .merge(api)
        .with_state(state)
}
