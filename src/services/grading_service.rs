use crate::models::attempt::{AnswerSheet, AnswerValue, AttemptResult};
use crate::models::question::{Question, QuestionKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// A question or answer that cannot be graded. Never escapes the scorer:
/// the affected question scores zero and grading continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GradingError {
    #[error("malformed question: {0}")]
    MalformedQuestion(String),

    #[error("{question_type} answer has an unsupported shape: {detail}")]
    MalformedAnswer {
        question_type: &'static str,
        detail: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeOutcome {
    Correct,
    Incorrect,
    Skipped,
    Unanswered,
    Ungradable,
}

impl GradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeOutcome::Correct => "correct",
            GradeOutcome::Incorrect => "incorrect",
            GradeOutcome::Skipped => "skipped",
            GradeOutcome::Unanswered => "unanswered",
            GradeOutcome::Ungradable => "ungradable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedAnswer {
    pub question_id: i64,
    pub question_type: String,
    pub outcome: GradeOutcome,
    pub points_earned: i32,
    pub max_points: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeReport {
    pub graded_answers: Vec<GradedAnswer>,
    pub correct_answers: i32,
    pub earned_points: i32,
    pub total_points: i32,
}

impl GradeReport {
    /// earned / total × 100, rounded to two places; zero for an empty quiz.
    pub fn percentage(&self) -> Decimal {
        self.exact_percentage().round_dp(2)
    }

    fn exact_percentage(&self) -> Decimal {
        if self.total_points <= 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.earned_points) * Decimal::ONE_HUNDRED / Decimal::from(self.total_points)
    }

    pub fn passed(&self, passing_score: Decimal) -> bool {
        self.exact_percentage() >= passing_score
    }
}

pub struct GradingService;

impl GradingService {
    /// Grades `answers` against `questions`. Pure: the same inputs always
    /// produce the same report, so it is safe to recompute.
    pub fn grade(questions: &[Question], answers: &AnswerSheet) -> GradeReport {
        let mut graded = Vec::with_capacity(questions.len());
        let mut correct_answers = 0;
        let mut earned_points: i32 = 0;
        let mut total_points: i32 = 0;

        for q in questions {
            // Points that no longer fit in the total are left out of it.
            let Some(new_total) = total_points.checked_add(q.max_points()) else {
                tracing::warn!(
                    question_id = q.id,
                    points = q.points,
                    "question points overflow the quiz total"
                );
                graded.push(GradedAnswer {
                    question_id: q.id,
                    question_type: q.kind.type_name().to_string(),
                    outcome: GradeOutcome::Ungradable,
                    points_earned: 0,
                    max_points: 0,
                    note: Some("point value overflows the quiz total".to_string()),
                });
                continue;
            };
            total_points = new_total;
            let max_points = q.max_points();

            let (outcome, note) = match answers.get(&q.id).map(|a| &a.value) {
                None => (GradeOutcome::Unanswered, None),
                Some(AnswerValue::Skipped) => (GradeOutcome::Skipped, None),
                Some(AnswerValue::Response(value)) => match Self::check(&q.kind, value) {
                    Ok(true) => (GradeOutcome::Correct, None),
                    Ok(false) => (GradeOutcome::Incorrect, None),
                    Err(err) => {
                        tracing::warn!(question_id = q.id, error = %err, "question could not be graded");
                        (GradeOutcome::Ungradable, Some(err.to_string()))
                    }
                },
            };

            let points_earned = if outcome == GradeOutcome::Correct {
                correct_answers += 1;
                max_points
            } else {
                0
            };
            earned_points += points_earned;

            graded.push(GradedAnswer {
                question_id: q.id,
                question_type: q.kind.type_name().to_string(),
                outcome,
                points_earned,
                max_points,
                note,
            });
        }

        GradeReport {
            graded_answers: graded,
            correct_answers,
            earned_points,
            total_points,
        }
    }

    /// Sum of question points as counted by [`GradingService::grade`].
    pub fn total_points(questions: &[Question]) -> i32 {
        questions.iter().fold(0i32, |total, q| {
            total.checked_add(q.max_points()).unwrap_or(total)
        })
    }

    pub fn evaluate(
        questions: &[Question],
        answers: &AnswerSheet,
        passing_score: Decimal,
    ) -> AttemptResult {
        let report = Self::grade(questions, answers);
        AttemptResult {
            correct_answers: report.correct_answers,
            earned_points: report.earned_points,
            total_points: report.total_points,
            percentage: report.percentage(),
            passed: report.passed(passing_score),
            graded_answers: report.graded_answers,
        }
    }

    fn check(kind: &QuestionKind, value: &JsonValue) -> Result<bool, GradingError> {
        kind.check_definition()?;
        match kind {
            QuestionKind::MultipleChoice {
                options,
                correct_option,
            } => Self::check_choice(options, *correct_option, value),
            QuestionKind::TrueFalse { correct } => Self::check_bool(*correct, value),
            QuestionKind::MentalArithmetic { .. } => {
                let target = kind.arithmetic_target().unwrap_or(Decimal::ZERO);
                Self::check_number(target, value)
            }
            QuestionKind::TextAnswer {
                accepted_answers,
                exact_match,
            } => Self::check_text(accepted_answers, *exact_match, value),
        }
    }

    fn check_choice(
        options: &[String],
        correct_option: usize,
        value: &JsonValue,
    ) -> Result<bool, GradingError> {
        let selected = match value {
            JsonValue::Number(_) => Some(value),
            JsonValue::Object(map) => map.get("selected"),
            JsonValue::String(text) => {
                return Ok(options.get(correct_option).map(|o| o == text).unwrap_or(false));
            }
            _ => None,
        };
        let index = selected.and_then(|v| v.as_u64()).ok_or_else(|| {
            GradingError::MalformedAnswer {
                question_type: "multiple_choice",
                detail: format!("expected an option index, got {}", value),
            }
        })?;
        Ok(usize::try_from(index).map(|i| i == correct_option).unwrap_or(false))
    }

    fn check_bool(correct: bool, value: &JsonValue) -> Result<bool, GradingError> {
        let given = match value {
            JsonValue::Bool(b) => *b,
            JsonValue::String(s) if s == "true" => true,
            JsonValue::String(s) if s == "false" => false,
            other => {
                return Err(GradingError::MalformedAnswer {
                    question_type: "true_false",
                    detail: format!("expected true or false, got {}", other),
                })
            }
        };
        Ok(given == correct)
    }

    fn check_number(target: Decimal, value: &JsonValue) -> Result<bool, GradingError> {
        let given = match value {
            JsonValue::Number(n) => parse_decimal(&n.to_string()),
            JsonValue::String(s) => parse_decimal(s.trim()),
            other => {
                return Err(GradingError::MalformedAnswer {
                    question_type: "mental_arithmetic",
                    detail: format!("expected a number, got {}", other),
                })
            }
        };
        Ok(given.map(|g| g == target).unwrap_or(false))
    }

    fn check_text(
        accepted: &[String],
        exact_match: bool,
        value: &JsonValue,
    ) -> Result<bool, GradingError> {
        let given = match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Number(n) => n.to_string(),
            other => {
                return Err(GradingError::MalformedAnswer {
                    question_type: "text_answer",
                    detail: format!("expected text, got {}", other),
                })
            }
        };
        if exact_match {
            return Ok(accepted.iter().any(|a| *a == given));
        }
        let given = normalize_text(&given);
        Ok(accepted.iter().any(|a| normalize_text(a) == given))
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

/// Lowercase, trimmed, inner whitespace runs collapsed to one space.
fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attempt::RecordedAnswer;
    use chrono::Utc;
    use serde_json::json;

    fn question(id: i64, points: i32, kind: QuestionKind) -> Question {
        Question {
            id,
            quiz_id: 1,
            position: id as i32,
            prompt: format!("Question {}", id),
            points,
            kind,
        }
    }

    fn answer(value: JsonValue) -> RecordedAnswer {
        RecordedAnswer {
            value: AnswerValue::Response(value),
            answered_at: Utc::now(),
            time_spent_seconds: None,
        }
    }

    fn skipped() -> RecordedAnswer {
        RecordedAnswer {
            value: AnswerValue::Skipped,
            answered_at: Utc::now(),
            time_spent_seconds: None,
        }
    }

    fn two_true_false() -> Vec<Question> {
        vec![
            question(1, 5, QuestionKind::TrueFalse { correct: true }),
            question(2, 5, QuestionKind::TrueFalse { correct: false }),
        ]
    }

    #[test]
    fn all_correct_scores_full_marks() {
        let mut sheet = AnswerSheet::new();
        sheet.insert(1, answer(json!(true)));
        sheet.insert(2, answer(json!(false)));

        let result = GradingService::evaluate(&two_true_false(), &sheet, Decimal::from(70));
        assert_eq!(result.correct_answers, 2);
        assert_eq!(result.earned_points, 10);
        assert_eq!(result.percentage, Decimal::from(100));
        assert!(result.passed);
    }

    #[test]
    fn one_correct_one_skipped_is_half() {
        let mut sheet = AnswerSheet::new();
        sheet.insert(1, answer(json!(true)));
        sheet.insert(2, skipped());

        let result = GradingService::evaluate(&two_true_false(), &sheet, Decimal::from(70));
        assert_eq!(result.correct_answers, 1);
        assert_eq!(result.percentage, Decimal::from(50));
        assert!(!result.passed);
        assert_eq!(result.graded_answers[1].outcome, GradeOutcome::Skipped);
        assert_eq!(result.graded_answers[1].points_earned, 0);
    }

    #[test]
    fn no_answers_scores_zero() {
        let result =
            GradingService::evaluate(&two_true_false(), &AnswerSheet::new(), Decimal::from(1));
        assert_eq!(result.percentage, Decimal::ZERO);
        assert!(!result.passed);
        assert!(result
            .graded_answers
            .iter()
            .all(|g| g.outcome == GradeOutcome::Unanswered));
    }

    #[test]
    fn empty_quiz_is_zero_percent() {
        let report = GradingService::grade(&[], &AnswerSheet::new());
        assert_eq!(report.total_points, 0);
        assert_eq!(report.percentage(), Decimal::ZERO);
        assert!(report.passed(Decimal::ZERO));
    }

    #[test]
    fn multiple_choice_accepts_index_selected_object_and_option_text() {
        let kind = QuestionKind::MultipleChoice {
            options: vec!["1".into(), "2".into(), "3".into(), "4".into()],
            correct_option: 3,
        };
        assert_eq!(GradingService::check(&kind, &json!(3)), Ok(true));
        assert_eq!(GradingService::check(&kind, &json!({"selected": 3})), Ok(true));
        assert_eq!(GradingService::check(&kind, &json!("4")), Ok(true));
        assert_eq!(GradingService::check(&kind, &json!(0)), Ok(false));
        assert_eq!(GradingService::check(&kind, &json!(17)), Ok(false));
        assert!(GradingService::check(&kind, &json!(-1)).is_err());
        assert!(GradingService::check(&kind, &json!([3])).is_err());
    }

    #[test]
    fn true_false_is_exact() {
        let kind = QuestionKind::TrueFalse { correct: true };
        assert_eq!(GradingService::check(&kind, &json!(true)), Ok(true));
        assert_eq!(GradingService::check(&kind, &json!("true")), Ok(true));
        assert_eq!(GradingService::check(&kind, &json!(false)), Ok(false));
        assert!(GradingService::check(&kind, &json!("TRUE")).is_err());
        assert!(GradingService::check(&kind, &json!(1)).is_err());
    }

    #[test]
    fn mental_arithmetic_compares_numerically() {
        let kind = QuestionKind::MentalArithmetic {
            operands: vec![12, -5, 9],
            display_interval_ms: Some(700),
            expected: None,
        };
        assert_eq!(GradingService::check(&kind, &json!(16)), Ok(true));
        assert_eq!(GradingService::check(&kind, &json!(16.0)), Ok(true));
        assert_eq!(GradingService::check(&kind, &json!(" 16 ")), Ok(true));
        assert_eq!(GradingService::check(&kind, &json!("16.00")), Ok(true));
        assert_eq!(GradingService::check(&kind, &json!(15)), Ok(false));
        assert_eq!(GradingService::check(&kind, &json!("sixteen")), Ok(false));
        assert!(GradingService::check(&kind, &json!(true)).is_err());
    }

    #[test]
    fn text_answers_ignore_case_and_spacing_unless_exact() {
        let relaxed = QuestionKind::TextAnswer {
            accepted_answers: vec!["New York".into(), "NYC".into()],
            exact_match: false,
        };
        assert_eq!(GradingService::check(&relaxed, &json!("  new   york ")), Ok(true));
        assert_eq!(GradingService::check(&relaxed, &json!("nyc")), Ok(true));
        assert_eq!(GradingService::check(&relaxed, &json!("New Yor")), Ok(false));

        let exact = QuestionKind::TextAnswer {
            accepted_answers: vec!["H2O".into()],
            exact_match: true,
        };
        assert_eq!(GradingService::check(&exact, &json!("H2O")), Ok(true));
        assert_eq!(GradingService::check(&exact, &json!("h2o")), Ok(false));
        assert_eq!(GradingService::check(&exact, &json!(" H2O")), Ok(false));
    }

    #[test]
    fn ungradable_question_scores_zero_without_aborting() {
        let questions = vec![
            question(
                1,
                4,
                QuestionKind::MultipleChoice {
                    options: vec![],
                    correct_option: 0,
                },
            ),
            question(2, 4, QuestionKind::TrueFalse { correct: true }),
        ];
        let mut sheet = AnswerSheet::new();
        sheet.insert(1, answer(json!(0)));
        sheet.insert(2, answer(json!(true)));

        let report = GradingService::grade(&questions, &sheet);
        assert_eq!(report.graded_answers[0].outcome, GradeOutcome::Ungradable);
        assert!(report.graded_answers[0].note.is_some());
        assert_eq!(report.earned_points, 4);
        assert_eq!(report.total_points, 8);
        assert_eq!(report.percentage(), Decimal::from(50));
    }

    #[test]
    fn earned_never_exceeds_total_and_unknown_answers_are_ignored() {
        let questions = vec![
            question(1, 3, QuestionKind::TrueFalse { correct: true }),
            question(2, -2, QuestionKind::TrueFalse { correct: true }),
        ];
        let mut sheet = AnswerSheet::new();
        sheet.insert(1, answer(json!(true)));
        sheet.insert(2, answer(json!(true)));
        sheet.insert(99, answer(json!(true)));

        let report = GradingService::grade(&questions, &sheet);
        assert_eq!(report.total_points, 3);
        assert_eq!(report.earned_points, 3);
        assert!(report.percentage() <= Decimal::ONE_HUNDRED);
        assert_eq!(report.graded_answers.len(), 2);
    }

    #[test]
    fn oversized_point_values_do_not_overflow_the_total() {
        let questions = vec![
            question(1, i32::MAX, QuestionKind::TrueFalse { correct: true }),
            question(2, i32::MAX, QuestionKind::TrueFalse { correct: true }),
            question(3, 1, QuestionKind::TrueFalse { correct: true }),
        ];
        let mut sheet = AnswerSheet::new();
        sheet.insert(1, answer(json!(true)));
        sheet.insert(2, answer(json!(true)));
        sheet.insert(3, answer(json!(false)));

        let result = GradingService::evaluate(&questions, &sheet, Decimal::from(50));
        assert_eq!(result.total_points, i32::MAX);
        assert_eq!(result.earned_points, i32::MAX);
        assert_eq!(result.correct_answers, 1);
        assert_eq!(result.graded_answers[1].outcome, GradeOutcome::Ungradable);
        assert_eq!(result.graded_answers[1].points_earned, 0);
        assert_eq!(result.graded_answers[2].outcome, GradeOutcome::Ungradable);
        assert!(result.percentage >= Decimal::ZERO && result.percentage <= Decimal::ONE_HUNDRED);
        assert_eq!(GradingService::total_points(&questions), i32::MAX);
    }

    #[test]
    fn pass_threshold_uses_unrounded_percentage() {
        let questions: Vec<Question> = (1..=3)
            .map(|id| question(id, 1, QuestionKind::TrueFalse { correct: true }))
            .collect();
        let mut sheet = AnswerSheet::new();
        sheet.insert(1, answer(json!(true)));
        sheet.insert(2, answer(json!(true)));

        let report = GradingService::grade(&questions, &sheet);
        assert_eq!(report.percentage(), Decimal::from_str("66.67").unwrap());
        assert!(!report.passed(Decimal::from_str("66.67").unwrap()));
        assert!(report.passed(Decimal::from_str("66.66").unwrap()));
    }

    #[test]
    fn grading_is_deterministic() {
        let mut sheet = AnswerSheet::new();
        sheet.insert(1, answer(json!(true)));
        let first = GradingService::grade(&two_true_false(), &sheet);
        let second = GradingService::grade(&two_true_false(), &sheet);
        assert_eq!(first, second);
    }
}
