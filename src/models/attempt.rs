use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::services::grading_service::GradedAnswer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Expired,
    Abandoned,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Expired => "expired",
            AttemptStatus::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "completed" => Ok(AttemptStatus::Completed),
            "expired" => Ok(AttemptStatus::Expired),
            "abandoned" => Ok(AttemptStatus::Abandoned),
            other => Err(Error::Internal(format!("Unknown attempt status '{}'", other))),
        }
    }
}

/// What the student gave for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Skipped,
    Response(JsonValue),
}

impl AnswerValue {
    /// `null` and absent answers are treated as a skip.
    pub fn from_payload(answer: Option<JsonValue>, skipped: bool) -> Self {
        match answer {
            _ if skipped => AnswerValue::Skipped,
            None | Some(JsonValue::Null) => AnswerValue::Skipped,
            Some(value) => AnswerValue::Response(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAnswer {
    pub value: AnswerValue,
    pub answered_at: DateTime<Utc>,
    #[serde(default)]
    pub time_spent_seconds: Option<i32>,
}

/// question_id → latest answer.
pub type AnswerSheet = BTreeMap<i64, RecordedAnswer>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub correct_answers: i32,
    pub earned_points: i32,
    pub total_points: i32,
    pub percentage: Decimal,
    pub passed: bool,
    pub graded_answers: Vec<GradedAnswer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Uuid,
    pub quiz_id: i64,
    pub user_id: i64,
    pub attempt_number: i32,
    pub status: AttemptStatus,
    /// Question ids in the order this attempt presents them.
    pub question_order: Vec<i64>,
    pub answers: AnswerSheet,
    pub current_question_index: i32,
    pub question_started_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<AttemptResult>,
}

impl Attempt {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn ensure_in_progress(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(Error::AttemptTerminal {
                attempt_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn ensure_owner(&self, user_id: i64) -> Result<()> {
        if self.user_id != user_id {
            return Err(Error::Forbidden(
                "attempt belongs to another student".to_string(),
            ));
        }
        Ok(())
    }

    pub fn position_of(&self, question_id: i64) -> Option<usize> {
        self.question_order.iter().position(|id| *id == question_id)
    }

    pub fn current_question_id(&self) -> Option<i64> {
        usize::try_from(self.current_question_index)
            .ok()
            .and_then(|idx| self.question_order.get(idx).copied())
    }

    pub fn record(&mut self, question_id: i64, answer: RecordedAnswer) {
        self.last_activity_at = answer.answered_at;
        self.answers.insert(question_id, answer);
    }

    pub fn answered_count(&self) -> usize {
        self.answers
            .values()
            .filter(|a| matches!(a.value, AnswerValue::Response(_)))
            .count()
    }

    pub fn finish(&mut self, status: AttemptStatus, at: DateTime<Utc>, result: AttemptResult) {
        self.status = status;
        self.completed_at = Some(at);
        self.result = Some(result);
    }
}
