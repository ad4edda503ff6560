use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::database::repository::AttemptRepository;
use crate::error::{Error, Result};
use crate::models::attempt::{AnswerSheet, Attempt, AttemptResult};
use crate::models::question::{Question, QuestionKind};
use crate::models::quiz::{Quiz, QuizDefinition};
use crate::services::grading_service::GradedAnswer;

const ATTEMPT_COLUMNS: &str = r#"
    id, quiz_id, user_id, attempt_number, status, question_order, answers,
    current_question_index, question_started_at, started_at, deadline_at,
    last_activity_at, completed_at, correct_answers, earned_points, total_points,
    percentage, passed, graded_answers
"#;

#[derive(Debug, FromRow)]
struct QuestionRow {
    id: i64,
    quiz_id: i64,
    position: i32,
    prompt: String,
    points: i32,
    definition: Json<QuestionKind>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Question {
            id: row.id,
            quiz_id: row.quiz_id,
            position: row.position,
            prompt: row.prompt,
            points: row.points,
            kind: row.definition.0,
        }
    }
}

#[derive(Debug, FromRow)]
struct AttemptRow {
    id: Uuid,
    quiz_id: i64,
    user_id: i64,
    attempt_number: i32,
    status: String,
    question_order: Json<Vec<i64>>,
    answers: Json<AnswerSheet>,
    current_question_index: i32,
    question_started_at: DateTime<Utc>,
    started_at: DateTime<Utc>,
    deadline_at: Option<DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    correct_answers: Option<i32>,
    earned_points: Option<i32>,
    total_points: Option<i32>,
    percentage: Option<Decimal>,
    passed: Option<bool>,
    graded_answers: Option<Json<Vec<GradedAnswer>>>,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = Error;

    fn try_from(row: AttemptRow) -> Result<Self> {
        let result = match (
            row.correct_answers,
            row.earned_points,
            row.total_points,
            row.percentage,
            row.passed,
        ) {
            (
                Some(correct_answers),
                Some(earned_points),
                Some(total_points),
                Some(percentage),
                Some(passed),
            ) => Some(AttemptResult {
                correct_answers,
                earned_points,
                total_points,
                percentage,
                passed,
                graded_answers: row.graded_answers.map(|g| g.0).unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Attempt {
            id: row.id,
            quiz_id: row.quiz_id,
            user_id: row.user_id,
            attempt_number: row.attempt_number,
            status: row.status.parse()?,
            question_order: row.question_order.0,
            answers: row.answers.0,
            current_question_index: row.current_question_index,
            question_started_at: row.question_started_at,
            started_at: row.started_at,
            deadline_at: row.deadline_at,
            last_activity_at: row.last_activity_at,
            completed_at: row.completed_at,
            result,
        })
    }
}

fn into_attempts(rows: Vec<AttemptRow>) -> Result<Vec<Attempt>> {
    rows.into_iter().map(Attempt::try_from).collect()
}

#[derive(Clone)]
pub struct PgAttemptRepository {
    pool: PgPool,
}

impl PgAttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptRepository for PgAttemptRepository {
    async fn find_quiz(&self, quiz_id: i64) -> Result<Option<QuizDefinition>> {
        let quiz = sqlx::query_as::<_, Quiz>(
            r#"
            SELECT id, lesson_id, title, description, time_limit_seconds,
                   question_time_limit_seconds, max_attempts, passing_score,
                   shuffle_questions, shuffle_options, show_results_immediately,
                   is_active, created_at, updated_at
            FROM quizzes WHERE id = $1
            "#,
        )
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(quiz) = quiz else { return Ok(None) };

        let questions = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT id, quiz_id, position, prompt, points, definition
            FROM quiz_questions
            WHERE quiz_id = $1
            ORDER BY position ASC, id ASC
            "#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(QuizDefinition::new(
            quiz,
            questions.into_iter().map(Question::from).collect(),
        )))
    }

    async fn count_attempts(&self, user_id: i64, quiz_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM quiz_attempts WHERE user_id = $1 AND quiz_id = $2"#,
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_open_attempt(&self, user_id: i64, quiz_id: i64) -> Result<Option<Attempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM quiz_attempts WHERE user_id = $1 AND quiz_id = $2 AND status = 'in_progress'",
            ATTEMPT_COLUMNS
        ))
        .bind(user_id)
        .bind(quiz_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Attempt::try_from).transpose()
    }

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO quiz_attempts (
                id, quiz_id, user_id, attempt_number, status, question_order, answers,
                current_question_index, question_started_at, started_at, deadline_at,
                last_activity_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.quiz_id)
        .bind(attempt.user_id)
        .bind(attempt.attempt_number)
        .bind(attempt.status.as_str())
        .bind(serde_json::to_value(&attempt.question_order)?)
        .bind(serde_json::to_value(&attempt.answers)?)
        .bind(attempt.current_question_index)
        .bind(attempt.question_started_at)
        .bind(attempt.started_at)
        .bind(attempt.deadline_at)
        .bind(attempt.last_activity_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                let existing = self
                    .find_open_attempt(attempt.user_id, attempt.quiz_id)
                    .await?;
                Err(Error::AttemptAlreadyActive {
                    attempt_id: existing.map(|a| a.id).unwrap_or(attempt.id),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM quiz_attempts WHERE id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Attempt::try_from).transpose()
    }

    async fn save_progress(&self, attempt: &Attempt) -> Result<bool> {
        let done = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET answers = $2, current_question_index = $3, question_started_at = $4,
                last_activity_at = $5, updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(attempt.id)
        .bind(serde_json::to_value(&attempt.answers)?)
        .bind(attempt.current_question_index)
        .bind(attempt.question_started_at)
        .bind(attempt.last_activity_at)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn finalize_attempt(&self, attempt: &Attempt) -> Result<bool> {
        let result = attempt
            .result
            .as_ref()
            .ok_or_else(|| Error::Internal("finalizing an attempt without a result".to_string()))?;

        let done = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET status = $2, completed_at = $3, answers = $4, current_question_index = $5,
                last_activity_at = $6, correct_answers = $7, earned_points = $8,
                total_points = $9, percentage = $10, passed = $11, graded_answers = $12,
                updated_at = NOW()
            WHERE id = $1 AND status = 'in_progress'
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.status.as_str())
        .bind(attempt.completed_at)
        .bind(serde_json::to_value(&attempt.answers)?)
        .bind(attempt.current_question_index)
        .bind(attempt.last_activity_at)
        .bind(result.correct_answers)
        .bind(result.earned_points)
        .bind(result.total_points)
        .bind(result.percentage)
        .bind(result.passed)
        .bind(serde_json::to_value(&result.graded_answers)?)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn list_attempts(&self, user_id: i64, quiz_id: i64) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM quiz_attempts WHERE user_id = $1 AND quiz_id = $2 ORDER BY started_at DESC, attempt_number DESC",
            ATTEMPT_COLUMNS
        ))
        .bind(user_id)
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;
        into_attempts(rows)
    }

    async fn list_overdue_attempts(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM quiz_attempts WHERE status = 'in_progress' AND deadline_at < $1 ORDER BY deadline_at ASC LIMIT $2",
            ATTEMPT_COLUMNS
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        into_attempts(rows)
    }

    async fn list_idle_attempts(
        &self,
        idle_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Attempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM quiz_attempts WHERE status = 'in_progress' AND deadline_at IS NULL AND last_activity_at < $1 ORDER BY last_activity_at ASC LIMIT $2",
            ATTEMPT_COLUMNS
        ))
        .bind(idle_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        into_attempts(rows)
    }
}
