use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::database::repository::AttemptRepository;
use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, AttemptStatus};
use crate::models::quiz::QuizDefinition;

#[derive(Default)]
struct State {
    quizzes: HashMap<i64, QuizDefinition>,
    attempts: HashMap<Uuid, Attempt>,
}

/// Process-local store with the same atomicity guarantees as the Postgres
/// one. Backs the test suites and embedded use without a database.
#[derive(Default)]
pub struct InMemoryAttemptRepository {
    state: Mutex<State>,
}

impl InMemoryAttemptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_quiz(&self, definition: QuizDefinition) {
        self.lock().quizzes.insert(definition.quiz.id, definition);
    }

    pub fn remove_quiz(&self, quiz_id: i64) -> Option<QuizDefinition> {
        self.lock().quizzes.remove(&quiz_id)
    }

    pub fn attempt_count(&self) -> usize {
        self.lock().attempts.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory repository mutex poisoned")
    }
}

fn open_for(state: &State, user_id: i64, quiz_id: i64) -> Option<&Attempt> {
    state.attempts.values().find(|a| {
        a.user_id == user_id && a.quiz_id == quiz_id && a.status == AttemptStatus::InProgress
    })
}

#[async_trait]
impl AttemptRepository for InMemoryAttemptRepository {
    async fn find_quiz(&self, quiz_id: i64) -> Result<Option<QuizDefinition>> {
        Ok(self.lock().quizzes.get(&quiz_id).cloned())
    }

    async fn count_attempts(&self, user_id: i64, quiz_id: i64) -> Result<i64> {
        let count = self
            .lock()
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.quiz_id == quiz_id)
            .count();
        Ok(count as i64)
    }

    async fn find_open_attempt(&self, user_id: i64, quiz_id: i64) -> Result<Option<Attempt>> {
        Ok(open_for(&self.lock(), user_id, quiz_id).cloned())
    }

    async fn insert_attempt(&self, attempt: &Attempt) -> Result<()> {
        let mut state = self.lock();
        if let Some(existing) = open_for(&state, attempt.user_id, attempt.quiz_id) {
            return Err(Error::AttemptAlreadyActive {
                attempt_id: existing.id,
            });
        }
        state.attempts.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
        Ok(self.lock().attempts.get(&attempt_id).cloned())
    }

    async fn save_progress(&self, attempt: &Attempt) -> Result<bool> {
        let mut state = self.lock();
        match state.attempts.get_mut(&attempt.id) {
            Some(stored) if stored.status == AttemptStatus::InProgress => {
                stored.answers = attempt.answers.clone();
                stored.current_question_index = attempt.current_question_index;
                stored.question_started_at = attempt.question_started_at;
                stored.last_activity_at = attempt.last_activity_at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::AttemptNotFound(attempt.id)),
        }
    }

    async fn finalize_attempt(&self, attempt: &Attempt) -> Result<bool> {
        let mut state = self.lock();
        match state.attempts.get_mut(&attempt.id) {
            Some(stored) if stored.status == AttemptStatus::InProgress => {
                *stored = attempt.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(Error::AttemptNotFound(attempt.id)),
        }
    }

    async fn list_attempts(&self, user_id: i64, quiz_id: i64) -> Result<Vec<Attempt>> {
        let mut attempts: Vec<Attempt> = self
            .lock()
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.quiz_id == quiz_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then(b.attempt_number.cmp(&a.attempt_number))
        });
        Ok(attempts)
    }

    async fn list_overdue_attempts(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Attempt>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .attempts
            .values()
            .filter(|a| {
                a.status == AttemptStatus::InProgress
                    && a.deadline_at.map(|d| d < cutoff).unwrap_or(false)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_idle_attempts(
        &self,
        idle_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Attempt>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .lock()
            .attempts
            .values()
            .filter(|a| {
                a.status == AttemptStatus::InProgress
                    && a.deadline_at.is_none()
                    && a.last_activity_at < idle_before
            })
            .take(limit)
            .cloned()
            .collect())
    }
}
