use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use uuid::Uuid;

use crate::models::attempt::AttemptStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Quiz {0} not found")]
    QuizNotFound(i64),

    #[error("Quiz {0} is not open for attempts")]
    QuizUnavailable(i64),

    #[error("Question {question_id} is not part of attempt {attempt_id}")]
    QuestionNotFound { attempt_id: Uuid, question_id: i64 },

    #[error("Attempt {0} not found")]
    AttemptNotFound(Uuid),

    #[error("All {max_attempts} attempts for this quiz have been used")]
    AttemptLimitExceeded { max_attempts: i32 },

    #[error("Attempt {attempt_id} is already in progress for this quiz")]
    AttemptAlreadyActive { attempt_id: Uuid },

    #[error("Attempt {attempt_id} is already {status}")]
    AttemptTerminal { attempt_id: Uuid, status: AttemptStatus },

    #[error("The answer window for question {question_id} is closed")]
    QuestionWindowClosed { question_id: i64 },

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::BadRequest(_) => "bad_request",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::NotFound(_) => "not_found",
            Error::QuizNotFound(_) => "quiz_not_found",
            Error::QuizUnavailable(_) => "quiz_unavailable",
            Error::QuestionNotFound { .. } => "question_not_found",
            Error::AttemptNotFound(_) => "attempt_not_found",
            Error::AttemptLimitExceeded { .. } => "attempt_limit_exceeded",
            Error::AttemptAlreadyActive { .. } => "attempt_already_active",
            Error::AttemptTerminal { .. } => "attempt_terminal",
            Error::QuestionWindowClosed { .. } => "question_window_closed",
            Error::Validation(_) | Error::Json(_) => "invalid_payload",
            _ => "internal_error",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let code = self.code();
        let status = match &self {
            Error::BadRequest(_) | Error::Validation(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) | Error::AttemptLimitExceeded { .. } => StatusCode::FORBIDDEN,
            Error::NotFound(_)
            | Error::QuizNotFound(_)
            | Error::QuestionNotFound { .. }
            | Error::AttemptNotFound(_) => StatusCode::NOT_FOUND,
            Error::QuizUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::AttemptAlreadyActive { .. }
            | Error::AttemptTerminal { .. }
            | Error::QuestionWindowClosed { .. } => StatusCode::CONFLICT,
            Error::Reqwest(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "An unexpected error occurred".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({ "error": code, "message": message });
        match &self {
            Error::AttemptAlreadyActive { attempt_id } => {
                body["attempt_id"] = json!(attempt_id);
            }
            Error::AttemptTerminal { attempt_id, status } => {
                body["attempt_id"] = json!(attempt_id);
                body["status"] = json!(status);
            }
            Error::AttemptLimitExceeded { max_attempts } => {
                body["max_attempts"] = json!(max_attempts);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
