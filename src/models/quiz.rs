use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::question::Question;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quiz {
    pub id: i64,
    pub lesson_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    /// Whole-attempt limit. `None` means the attempt never times out.
    pub time_limit_seconds: Option<i32>,
    /// Limit applied to each question in turn.
    pub question_time_limit_seconds: Option<i32>,
    /// `None` (or a non-positive value) means unlimited retries.
    pub max_attempts: Option<i32>,
    pub passing_score: Decimal,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub show_results_immediately: bool,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Quiz {
    pub fn attempt_limit(&self) -> Option<i32> {
        self.max_attempts.filter(|max| *max > 0)
    }

    pub fn remaining_attempts(&self, used: i64) -> Option<i64> {
        self.attempt_limit()
            .map(|max| (i64::from(max) - used).max(0))
    }
}

/// A quiz with its question bank in presentation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDefinition {
    pub quiz: Quiz,
    pub questions: Vec<Question>,
}

impl QuizDefinition {
    pub fn new(quiz: Quiz, mut questions: Vec<Question>) -> Self {
        questions.sort_by_key(|q| (q.position, q.id));
        Self { quiz, questions }
    }

    pub fn question(&self, question_id: i64) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    /// Questions in the order recorded on an attempt. Ids that no longer
    /// exist in the bank are dropped.
    pub fn ordered(&self, order: &[i64]) -> Vec<Question> {
        order
            .iter()
            .filter_map(|id| self.question(*id).cloned())
            .collect()
    }
}
