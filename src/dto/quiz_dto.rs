use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::attempt_dto::decimal_to_f64;
use crate::services::attempt_service::QuizOverview;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuizOverviewResponse {
    pub id: i64,
    pub lesson_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub question_count: usize,
    pub total_points: i32,
    pub time_limit_seconds: Option<i32>,
    pub question_time_limit_seconds: Option<i32>,
    pub passing_score: f64,
    pub max_attempts: Option<i32>,
    pub attempts_used: i64,
    pub remaining_attempts: Option<i64>,
    pub open_attempt_id: Option<Uuid>,
    pub is_active: bool,
}

impl From<QuizOverview> for QuizOverviewResponse {
    fn from(o: QuizOverview) -> Self {
        Self {
            id: o.quiz.id,
            lesson_id: o.quiz.lesson_id,
            max_attempts: o.quiz.attempt_limit(),
            passing_score: decimal_to_f64(o.quiz.passing_score),
            time_limit_seconds: o.quiz.time_limit_seconds.filter(|s| *s > 0),
            question_time_limit_seconds: o.quiz.question_time_limit_seconds.filter(|s| *s > 0),
            is_active: o.quiz.is_active,
            title: o.quiz.title,
            description: o.quiz.description,
            question_count: o.question_count,
            total_points: o.total_points,
            attempts_used: o.attempts_used,
            remaining_attempts: o.remaining_attempts,
            open_attempt_id: o.open_attempt_id,
        }
    }
}
