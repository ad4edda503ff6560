use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::attempt::Attempt;

pub const ATTEMPT_FINALIZED_EVENT: &str = "attempt.finalized";

/// Sent once per attempt, when it leaves `in_progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptCompletedEvent {
    pub event: String,
    pub attempt_id: Uuid,
    pub quiz_id: i64,
    pub user_id: i64,
    pub attempt_number: i32,
    pub status: String,
    pub score: i32,
    pub total_points: i32,
    pub percentage: f64,
    pub passed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AttemptCompletedEvent {
    pub fn from_attempt(attempt: &Attempt) -> Self {
        use rust_decimal::prelude::ToPrimitive;

        let (score, total_points, percentage, passed) = match &attempt.result {
            Some(r) => (
                r.earned_points,
                r.total_points,
                r.percentage.to_f64().unwrap_or(0.0),
                r.passed,
            ),
            None => (0, 0, 0.0, false),
        };

        Self {
            event: ATTEMPT_FINALIZED_EVENT.to_string(),
            attempt_id: attempt.id,
            quiz_id: attempt.quiz_id,
            user_id: attempt.user_id,
            attempt_number: attempt.attempt_number,
            status: attempt.status.as_str().to_string(),
            score,
            total_points,
            percentage,
            passed,
            completed_at: attempt.completed_at,
        }
    }
}
