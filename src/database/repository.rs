use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::attempt::Attempt;
use crate::models::quiz::QuizDefinition;

/// Storage the attempt engine reads quizzes from and keeps attempts in.
///
/// Implementations must make two writes atomic with respect to each other:
/// `insert_attempt` refuses a second open attempt for the same
/// (user, quiz), and `finalize_attempt` only succeeds while the stored
/// attempt is still in progress.
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    async fn find_quiz(&self, quiz_id: i64) -> Result<Option<QuizDefinition>>;

    /// Every attempt the student has started on the quiz, whatever its status.
    async fn count_attempts(&self, user_id: i64, quiz_id: i64) -> Result<i64>;

    async fn find_open_attempt(&self, user_id: i64, quiz_id: i64) -> Result<Option<Attempt>>;

    /// Fails with `Error::AttemptAlreadyActive` when the pair already has an
    /// open attempt.
    async fn insert_attempt(&self, attempt: &Attempt) -> Result<()>;

    async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>>;

    /// Stores answers, cursor and activity time. Returns false when the
    /// attempt was finalized in the meantime and nothing was written.
    async fn save_progress(&self, attempt: &Attempt) -> Result<bool>;

    /// Moves an in-progress attempt to its terminal status together with its
    /// result. Returns false when another caller finalized it first.
    async fn finalize_attempt(&self, attempt: &Attempt) -> Result<bool>;

    /// Newest first.
    async fn list_attempts(&self, user_id: i64, quiz_id: i64) -> Result<Vec<Attempt>>;

    /// In-progress attempts whose deadline is before `cutoff`.
    async fn list_overdue_attempts(&self, cutoff: DateTime<Utc>, limit: i64)
        -> Result<Vec<Attempt>>;

    /// In-progress attempts without a deadline and no activity since `idle_before`.
    async fn list_idle_attempts(
        &self,
        idle_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Attempt>>;
}
