use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::attempt::{AnswerValue, Attempt, AttemptResult, AttemptStatus};
use crate::models::question::{Question, QuestionKind};
use crate::services::attempt_service::{AnswerInput, AttemptHistory, AttemptView, SubmitOutcome};
use crate::services::grading_service::GradedAnswer;

pub(crate) fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicOption {
    /// Index in the quiz definition. This is what the client submits.
    pub index: usize,
    pub text: String,
}

/// A question as shown to the student, without its answer key.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicQuestion {
    pub id: i64,
    pub position: usize,
    pub prompt: String,
    pub points: i32,
    pub question_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<PublicOption>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operands: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_interval_ms: Option<u32>,
}

impl PublicQuestion {
    /// With a seed the options come out shuffled, the same way on every call
    /// for that seed.
    pub fn from_question(question: &Question, position: usize, shuffle_seed: Option<u64>) -> Self {
        let (options, operands, display_interval_ms) = match &question.kind {
            QuestionKind::MultipleChoice { options, .. } => {
                let mut listed: Vec<PublicOption> = options
                    .iter()
                    .enumerate()
                    .map(|(index, text)| PublicOption {
                        index,
                        text: text.clone(),
                    })
                    .collect();
                if let Some(seed) = shuffle_seed {
                    let mut rng = StdRng::seed_from_u64(seed ^ question.id as u64);
                    listed.shuffle(&mut rng);
                }
                (Some(listed), None, None)
            }
            QuestionKind::MentalArithmetic {
                operands,
                display_interval_ms,
                ..
            } => (None, Some(operands.clone()), *display_interval_ms),
            QuestionKind::TrueFalse { .. } | QuestionKind::TextAnswer { .. } => (None, None, None),
        };

        Self {
            id: question.id,
            position,
            prompt: question.prompt.clone(),
            points: question.max_points(),
            question_type: question.kind.type_name().to_string(),
            options,
            operands,
            display_interval_ms,
        }
    }
}

fn public_questions(view: &AttemptView) -> Vec<PublicQuestion> {
    let seed = view
        .quiz
        .shuffle_options
        .then(|| view.attempt.id.as_u128() as u64);
    view.questions
        .iter()
        .enumerate()
        .map(|(position, q)| PublicQuestion::from_question(q, position, seed))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartAttemptResponse {
    pub attempt_id: Uuid,
    pub quiz_id: i64,
    pub attempt_number: i32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub time_limit_seconds: Option<i32>,
    pub question_time_limit_seconds: Option<i32>,
    pub current_question_index: i32,
    pub attempt_remaining_seconds: Option<i64>,
    pub question_remaining_seconds: Option<i64>,
    pub questions: Vec<PublicQuestion>,
}

impl From<AttemptView> for StartAttemptResponse {
    fn from(view: AttemptView) -> Self {
        let questions = public_questions(&view);
        Self {
            attempt_id: view.attempt.id,
            quiz_id: view.attempt.quiz_id,
            attempt_number: view.attempt.attempt_number,
            status: view.attempt.status.to_string(),
            started_at: view.attempt.started_at,
            deadline_at: view.attempt.deadline_at,
            time_limit_seconds: view.quiz.time_limit_seconds.filter(|s| *s > 0),
            question_time_limit_seconds: view.quiz.question_time_limit_seconds.filter(|s| *s > 0),
            current_question_index: view.attempt.current_question_index,
            attempt_remaining_seconds: view.countdown.attempt_remaining_seconds,
            question_remaining_seconds: view.countdown.question_remaining_seconds,
            questions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SaveAnswerRequest {
    #[validate(range(min = 1))]
    pub question_id: i64,
    /// `null` or absent counts as a skip.
    #[schema(value_type = Option<Object>)]
    #[serde(default)]
    pub answer: Option<serde_json::Value>,
    #[serde(default)]
    pub skipped: bool,
    #[validate(range(min = 0))]
    pub time_spent_seconds: Option<i32>,
}

impl From<SaveAnswerRequest> for AnswerInput {
    fn from(req: SaveAnswerRequest) -> Self {
        AnswerInput {
            question_id: req.question_id,
            value: AnswerValue::from_payload(req.answer, req.skipped),
            time_spent_seconds: req.time_spent_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaveAnswerResponse {
    pub saved: bool,
    pub question_id: i64,
    pub saved_at: DateTime<Utc>,
    pub current_question_index: i32,
    pub answered_count: usize,
    pub total_questions: usize,
    pub attempt_remaining_seconds: Option<i64>,
    pub question_remaining_seconds: Option<i64>,
}

impl SaveAnswerResponse {
    pub fn new(question_id: i64, view: &AttemptView) -> Self {
        Self {
            saved: true,
            question_id,
            saved_at: view.attempt.last_activity_at,
            current_question_index: view.attempt.current_question_index,
            answered_count: view.attempt.answered_count(),
            total_questions: view.attempt.question_order.len(),
            attempt_remaining_seconds: view.countdown.attempt_remaining_seconds,
            question_remaining_seconds: view.countdown.question_remaining_seconds,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct SubmitAttemptRequest {
    #[serde(default)]
    #[validate(nested)]
    pub answers: Vec<SaveAnswerRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GradedAnswerDto {
    pub question_id: i64,
    pub question_type: String,
    pub outcome: String,
    pub points_earned: i32,
    pub max_points: i32,
}

impl From<&GradedAnswer> for GradedAnswerDto {
    fn from(g: &GradedAnswer) -> Self {
        Self {
            question_id: g.question_id,
            question_type: g.question_type.clone(),
            outcome: g.outcome.as_str().to_string(),
            points_earned: g.points_earned,
            max_points: g.max_points,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttemptResultDto {
    pub correct_answers: i32,
    pub earned_points: i32,
    pub total_points: i32,
    pub percentage: f64,
    pub passed: bool,
    pub graded_answers: Vec<GradedAnswerDto>,
}

impl From<&AttemptResult> for AttemptResultDto {
    fn from(r: &AttemptResult) -> Self {
        Self {
            correct_answers: r.correct_answers,
            earned_points: r.earned_points,
            total_points: r.total_points,
            percentage: decimal_to_f64(r.percentage),
            passed: r.passed,
            graded_answers: r.graded_answers.iter().map(GradedAnswerDto::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitAttemptResponse {
    pub attempt_id: Uuid,
    pub status: String,
    /// True when the attempt had been finalized before this request.
    pub already_finalized: bool,
    pub show_results: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<AttemptResultDto>,
    /// Submitted answers that were not merged into the attempt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_question_ids: Vec<i64>,
    pub message: String,
}

impl From<SubmitOutcome> for SubmitAttemptResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        let show_results = outcome.quiz.show_results_immediately;
        let message = match outcome.attempt.status {
            AttemptStatus::Expired => "Time is up. Your recorded answers have been graded.",
            AttemptStatus::Abandoned => "This attempt was closed after inactivity.",
            AttemptStatus::Completed | AttemptStatus::InProgress => "Quiz submitted successfully.",
        };
        Self {
            attempt_id: outcome.attempt.id,
            status: outcome.attempt.status.to_string(),
            already_finalized: !outcome.newly_finalized,
            show_results,
            results: show_results.then(|| AttemptResultDto::from(&outcome.result)),
            ignored_question_ids: outcome.ignored_question_ids,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttemptStatusResponse {
    pub attempt_id: Uuid,
    pub quiz_id: i64,
    pub attempt_number: i32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_question_index: i32,
    pub current_question_id: Option<i64>,
    pub answered_count: usize,
    pub total_questions: usize,
    pub attempt_remaining_seconds: Option<i64>,
    pub question_remaining_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<AttemptResultDto>,
}

impl From<AttemptView> for AttemptStatusResponse {
    fn from(view: AttemptView) -> Self {
        let results = if view.quiz.show_results_immediately {
            view.attempt.result.as_ref().map(AttemptResultDto::from)
        } else {
            None
        };
        Self {
            attempt_id: view.attempt.id,
            quiz_id: view.attempt.quiz_id,
            attempt_number: view.attempt.attempt_number,
            status: view.attempt.status.to_string(),
            started_at: view.attempt.started_at,
            deadline_at: view.attempt.deadline_at,
            completed_at: view.attempt.completed_at,
            current_question_index: view.attempt.current_question_index,
            current_question_id: view.attempt.current_question_id(),
            answered_count: view.attempt.answered_count(),
            total_questions: view.attempt.question_order.len(),
            attempt_remaining_seconds: view.countdown.attempt_remaining_seconds,
            question_remaining_seconds: view.countdown.question_remaining_seconds,
            results,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttemptSummary {
    pub attempt_id: Uuid,
    pub attempt_number: i32,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub percentage: Option<f64>,
    pub passed: Option<bool>,
}

impl From<&Attempt> for AttemptSummary {
    fn from(a: &Attempt) -> Self {
        Self {
            attempt_id: a.id,
            attempt_number: a.attempt_number,
            status: a.status.to_string(),
            started_at: a.started_at,
            completed_at: a.completed_at,
            percentage: a.result.as_ref().map(|r| decimal_to_f64(r.percentage)),
            passed: a.result.as_ref().map(|r| r.passed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttemptHistoryResponse {
    pub quiz_id: i64,
    pub attempts_used: i64,
    pub max_attempts: Option<i32>,
    pub remaining_attempts: Option<i64>,
    pub best_percentage: Option<f64>,
    pub attempts: Vec<AttemptSummary>,
}

impl From<AttemptHistory> for AttemptHistoryResponse {
    fn from(h: AttemptHistory) -> Self {
        Self {
            quiz_id: h.quiz.id,
            attempts_used: h.attempts_used,
            max_attempts: h.quiz.attempt_limit(),
            remaining_attempts: h.remaining_attempts,
            best_percentage: h.best_percentage.map(decimal_to_f64),
            attempts: h.attempts.iter().map(AttemptSummary::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn choice() -> Question {
        Question {
            id: 4,
            quiz_id: 1,
            position: 0,
            prompt: "Capital of France?".into(),
            points: 2,
            kind: QuestionKind::MultipleChoice {
                options: vec!["Rome".into(), "Paris".into(), "Oslo".into(), "Bern".into()],
                correct_option: 1,
            },
        }
    }

    #[test]
    fn public_question_hides_the_key() {
        let value = serde_json::to_value(PublicQuestion::from_question(&choice(), 0, None)).unwrap();
        assert_eq!(value["question_type"], json!("multiple_choice"));
        assert_eq!(value["options"][1]["text"], json!("Paris"));
        assert!(value.get("correct_option").is_none());
        assert!(value.get("operands").is_none());
    }

    #[test]
    fn shuffled_options_keep_their_indices() {
        let a = PublicQuestion::from_question(&choice(), 0, Some(42));
        let b = PublicQuestion::from_question(&choice(), 0, Some(42));
        let a_idx: Vec<usize> = a.options.unwrap().iter().map(|o| o.index).collect();
        let b_idx: Vec<usize> = b.options.clone().unwrap().iter().map(|o| o.index).collect();
        assert_eq!(a_idx, b_idx);

        for option in b.options.unwrap() {
            assert_eq!(
                option.text,
                ["Rome", "Paris", "Oslo", "Bern"][option.index].to_string()
            );
        }
    }

    #[test]
    fn null_answer_becomes_skip() {
        let req: SaveAnswerRequest =
            serde_json::from_value(json!({ "question_id": 3, "answer": null })).unwrap();
        let input = AnswerInput::from(req);
        assert_eq!(input.value, AnswerValue::Skipped);
    }

    #[test]
    fn negative_time_spent_fails_validation() {
        let req = SaveAnswerRequest {
            question_id: 3,
            answer: Some(json!(true)),
            skipped: false,
            time_spent_seconds: Some(-1),
        };
        assert!(req.validate().is_err());
    }
}
