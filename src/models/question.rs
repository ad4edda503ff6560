use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::services::grading_service::GradingError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub quiz_id: i64,
    #[serde(default)]
    pub position: i32,
    pub prompt: String,
    #[serde(default = "default_points")]
    pub points: i32,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

fn default_points() -> i32 {
    1
}

/// Question body together with its correct answer.
/// Serialized with a `type` tag, which is also the JSONB shape stored in
/// `quiz_questions.definition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    /// A sequence of signed numbers flashed one at a time; the student types
    /// the running total.
    MentalArithmetic {
        operands: Vec<i64>,
        #[serde(default)]
        display_interval_ms: Option<u32>,
        #[serde(default)]
        expected: Option<Decimal>,
    },
    MultipleChoice {
        options: Vec<String>,
        correct_option: usize,
    },
    TrueFalse {
        correct: bool,
    },
    TextAnswer {
        accepted_answers: Vec<String>,
        #[serde(default)]
        exact_match: bool,
    },
}

impl QuestionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            QuestionKind::MentalArithmetic { .. } => "mental_arithmetic",
            QuestionKind::MultipleChoice { .. } => "multiple_choice",
            QuestionKind::TrueFalse { .. } => "true_false",
            QuestionKind::TextAnswer { .. } => "text_answer",
        }
    }

    pub fn check_definition(&self) -> Result<(), GradingError> {
        match self {
            QuestionKind::MentalArithmetic {
                operands, expected, ..
            } => {
                if operands.is_empty() && expected.is_none() {
                    return Err(GradingError::MalformedQuestion(
                        "mental arithmetic question has no operands".to_string(),
                    ));
                }
            }
            QuestionKind::MultipleChoice {
                options,
                correct_option,
            } => {
                if options.is_empty() {
                    return Err(GradingError::MalformedQuestion(
                        "multiple choice question has no options".to_string(),
                    ));
                }
                if *correct_option >= options.len() {
                    return Err(GradingError::MalformedQuestion(format!(
                        "correct option {} is out of range for {} options",
                        correct_option,
                        options.len()
                    )));
                }
            }
            QuestionKind::TrueFalse { .. } => {}
            QuestionKind::TextAnswer {
                accepted_answers, ..
            } => {
                if accepted_answers.iter().all(|a| a.trim().is_empty()) {
                    return Err(GradingError::MalformedQuestion(
                        "text question has no accepted answers".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Value a mental arithmetic answer is compared against.
    pub fn arithmetic_target(&self) -> Option<Decimal> {
        match self {
            QuestionKind::MentalArithmetic {
                operands, expected, ..
            } => Some(expected.unwrap_or_else(|| {
                operands
                    .iter()
                    .fold(Decimal::ZERO, |acc, n| acc + Decimal::from(*n))
            })),
            _ => None,
        }
    }
}

impl Question {
    /// Points this question contributes to the attempt total.
    pub fn max_points(&self) -> i32 {
        self.points.max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn question_reads_flattened_definition() {
        let q: Question = serde_json::from_value(json!({
            "id": 7,
            "quiz_id": 1,
            "prompt": "Capital of France?",
            "points": 5,
            "type": "text_answer",
            "accepted_answers": ["Paris"]
        }))
        .unwrap();
        assert_eq!(q.points, 5);
        assert_eq!(
            q.kind,
            QuestionKind::TextAnswer {
                accepted_answers: vec!["Paris".to_string()],
                exact_match: false
            }
        );
    }

    #[test]
    fn points_default_to_one() {
        let q: Question = serde_json::from_value(json!({
            "id": 1,
            "quiz_id": 1,
            "prompt": "The sky is blue",
            "type": "true_false",
            "correct": true
        }))
        .unwrap();
        assert_eq!(q.points, 1);
        assert_eq!(q.kind.type_name(), "true_false");
    }

    #[test]
    fn arithmetic_target_sums_operands_unless_overridden() {
        let summed = QuestionKind::MentalArithmetic {
            operands: vec![7, -3, 12],
            display_interval_ms: Some(800),
            expected: None,
        };
        assert_eq!(summed.arithmetic_target(), Some(Decimal::from(16)));

        let overridden = QuestionKind::MentalArithmetic {
            operands: vec![2, 2],
            display_interval_ms: None,
            expected: Some(Decimal::from(5)),
        };
        assert_eq!(overridden.arithmetic_target(), Some(Decimal::from(5)));
    }

    #[test]
    fn malformed_definitions_are_reported() {
        let bad_choice = QuestionKind::MultipleChoice {
            options: vec!["a".into(), "b".into()],
            correct_option: 2,
        };
        assert!(bad_choice.check_definition().is_err());

        let empty_text = QuestionKind::TextAnswer {
            accepted_answers: vec!["  ".into()],
            exact_match: false,
        };
        assert!(empty_text.check_definition().is_err());

        let ok = QuestionKind::TrueFalse { correct: false };
        assert!(ok.check_definition().is_ok());
    }

    #[test]
    fn negative_points_do_not_count() {
        let q = Question {
            id: 1,
            quiz_id: 1,
            position: 0,
            prompt: "?".into(),
            points: -4,
            kind: QuestionKind::TrueFalse { correct: true },
        };
        assert_eq!(q.max_points(), 0);
    }
}
