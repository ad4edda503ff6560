use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

use lms_quiz_backend::database::memory_repository::InMemoryAttemptRepository;
use lms_quiz_backend::models::question::{Question, QuestionKind};
use lms_quiz_backend::models::quiz::{Quiz, QuizDefinition};
use lms_quiz_backend::routes::create_router;
use lms_quiz_backend::services::attempt_service::{AttemptService, EngineSettings};
use lms_quiz_backend::services::notification_service::TracingNotifier;
use lms_quiz_backend::utils::time::SystemClock;
use lms_quiz_backend::utils::token::issue_token;
use lms_quiz_backend::AppState;

const SECRET: &str = "test_secret_key";

fn app(max_attempts: Option<i32>) -> Router {
    let repo = Arc::new(InMemoryAttemptRepository::new());
    repo.put_quiz(QuizDefinition::new(
        Quiz {
            id: 1,
            lesson_id: Some(9),
            title: "Basics".into(),
            description: None,
            time_limit_seconds: Some(600),
            question_time_limit_seconds: None,
            max_attempts,
            passing_score: Decimal::from(70),
            shuffle_questions: false,
            shuffle_options: true,
            show_results_immediately: true,
            is_active: true,
            created_at: None,
            updated_at: None,
        },
        vec![
            Question {
                id: 11,
                quiz_id: 1,
                position: 1,
                prompt: "2 + 2?".into(),
                points: 5,
                kind: QuestionKind::MultipleChoice {
                    options: vec!["3".into(), "4".into(), "5".into()],
                    correct_option: 1,
                },
            },
            Question {
                id: 12,
                quiz_id: 1,
                position: 2,
                prompt: "The sky is green.".into(),
                points: 5,
                kind: QuestionKind::TrueFalse { correct: false },
            },
        ],
    ));

    let service = AttemptService::new(
        repo,
        Arc::new(TracingNotifier),
        Arc::new(SystemClock),
        EngineSettings::default(),
    );
    create_router(AppState::new(service, SECRET))
}

fn token(user_id: i64) -> String {
    issue_token(user_id, SECRET, chrono::Duration::hours(1)).expect("token")
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", t));
    }
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, json)
}

#[tokio::test]
async fn quiz_attempt_end_to_end() {
    let app = app(Some(2));
    let student = token(7);

    let (status, body) = send(&app, "GET", "/api/quizzes/1", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["question_count"], json!(2));
    assert_eq!(body["remaining_attempts"], json!(2));

    let (status, body) = send(&app, "POST", "/api/quizzes/1/attempts", Some(&student), None).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let attempt_id = body["attempt_id"].as_str().unwrap().to_string();
    assert_eq!(body["status"], json!("in_progress"));
    assert_eq!(body["questions"].as_array().unwrap().len(), 2);
    assert!(body["questions"][0].get("correct_option").is_none());
    assert_eq!(body["questions"][0]["options"].as_array().unwrap().len(), 3);
    assert!(body["attempt_remaining_seconds"].as_i64().unwrap() <= 600);

    let (status, body) = send(&app, "POST", "/api/quizzes/1/attempts", Some(&student), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], json!("attempt_already_active"));
    assert_eq!(body["attempt_id"], json!(attempt_id));

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/api/attempts/{}/answers", attempt_id),
        Some(&student),
        Some(json!({ "question_id": 11, "answer": 1, "time_spent_seconds": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["saved"], json!(true));
    assert_eq!(body["answered_count"], json!(1));

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/api/attempts/{}/answers", attempt_id),
        Some(&student),
        Some(json!({ "question_id": 0, "answer": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("invalid_payload"));

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/attempts/{}", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["answered_count"], json!(1));
    assert_eq!(body["total_questions"], json!(2));
    assert!(body.get("results").is_none());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        Some(&student),
        Some(json!({ "answers": [{ "question_id": 12, "answer": false }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], json!("completed"));
    assert_eq!(body["already_finalized"], json!(false));
    assert_eq!(body["results"]["percentage"], json!(100.0));
    assert_eq!(body["results"]["passed"], json!(true));
    assert_eq!(body["results"]["correct_answers"], json!(2));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        Some(&student),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_finalized"], json!(true));
    assert_eq!(body["results"]["percentage"], json!(100.0));

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/api/attempts/{}/answers", attempt_id),
        Some(&student),
        Some(json!({ "question_id": 11, "answer": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], json!("attempt_terminal"));
    assert_eq!(body["status"], json!("completed"));

    let (status, body) = send(&app, "GET", "/api/quizzes/1/attempts", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attempts_used"], json!(1));
    assert_eq!(body["remaining_attempts"], json!(1));
    assert_eq!(body["best_percentage"], json!(100.0));
}

#[tokio::test]
async fn attempt_limit_is_forbidden() {
    let app = app(Some(1));
    let student = token(3);

    let (_, body) = send(&app, "POST", "/api/quizzes/1/attempts", Some(&student), None).await;
    let attempt_id = body["attempt_id"].as_str().unwrap().to_string();
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        Some(&student),
        Some(json!({ "answers": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "POST", "/api/quizzes/1/attempts", Some(&student), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("attempt_limit_exceeded"));
    assert_eq!(body["max_attempts"], json!(1));
}

#[tokio::test]
async fn requests_need_a_valid_token() {
    let app = app(None);

    let (status, body) = send(&app, "GET", "/api/quizzes/1", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("missing_authorization"));

    let (status, body) = send(&app, "GET", "/api/quizzes/1", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], json!("invalid_token"));

    let forged = issue_token(7, "another_secret", chrono::Duration::hours(1)).unwrap();
    let (status, _) = send(&app, "GET", "/api/quizzes/1", Some(&forged), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn attempts_are_private_to_their_owner() {
    let app = app(None);
    let owner = token(7);
    let other = token(8);

    let (_, body) = send(&app, "POST", "/api/quizzes/1/attempts", Some(&owner), None).await;
    let attempt_id = body["attempt_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/attempts/{}", attempt_id),
        Some(&other),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("forbidden"));

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/attempts/{}/submit", attempt_id),
        Some(&other),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn skip_and_heartbeat_routes() {
    let app = app(None);
    let student = token(5);

    let (_, body) = send(&app, "POST", "/api/quizzes/1/attempts", Some(&student), None).await;
    let attempt_id = body["attempt_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/attempts/{}/questions/11/skip", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["answered_count"], json!(0));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/attempts/{}/questions/99/skip", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("question_not_found"));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/attempts/{}/next", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current_question_index"], json!(1));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/attempts/{}/heartbeat", attempt_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("in_progress"));
}

#[tokio::test]
async fn missing_resources_are_404() {
    let app = app(None);
    let student = token(1);

    let (status, body) = send(&app, "GET", "/api/quizzes/404", Some(&student), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("quiz_not_found"));

    let (status, body) = send(
        &app,
        "GET",
        &format!("/api/attempts/{}", uuid::Uuid::new_v4()),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("attempt_not_found"));
}

#[tokio::test]
async fn health_and_openapi_are_public() {
    let app = app(None);

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));

    let (status, body) = send(&app, "GET", "/api/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]
        .get("/api/attempts/{id}/submit")
        .is_some());
    assert!(body["components"]["securitySchemes"]
        .get("bearer_auth")
        .is_some());
}
