use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::repository::AttemptRepository;
use crate::dto::webhook_dto::AttemptCompletedEvent;
use crate::error::{Error, Result};
use crate::models::attempt::{
    AnswerSheet, AnswerValue, Attempt, AttemptResult, AttemptStatus, RecordedAnswer,
};
use crate::models::question::Question;
use crate::models::quiz::{Quiz, QuizDefinition};
use crate::services::grading_service::GradingService;
use crate::services::notification_service::AttemptNotifier;
use crate::services::timer_service::{AttemptTimers, Countdown, TimerPolicy};
use crate::utils::time::Clock;

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub grace_seconds: i64,
    pub abandon_after_seconds: i64,
    /// Rows handled per sweep query.
    pub sweep_batch: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grace_seconds: 5,
            abandon_after_seconds: 86_400,
            sweep_batch: 200,
        }
    }
}

/// One answer as supplied by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerInput {
    pub question_id: i64,
    pub value: AnswerValue,
    pub time_spent_seconds: Option<i32>,
}

/// An attempt together with what the client needs to render it.
#[derive(Debug, Clone)]
pub struct AttemptView {
    pub attempt: Attempt,
    pub quiz: Quiz,
    /// Questions in this attempt's order.
    pub questions: Vec<Question>,
    pub countdown: Countdown,
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub attempt: Attempt,
    pub quiz: Quiz,
    pub result: AttemptResult,
    /// False when the attempt had already been finalized before this call.
    pub newly_finalized: bool,
    /// Payload answers that were not merged into the attempt.
    pub ignored_question_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct AttemptHistory {
    pub quiz: Quiz,
    pub attempts: Vec<Attempt>,
    pub attempts_used: i64,
    pub remaining_attempts: Option<i64>,
    pub best_percentage: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct QuizOverview {
    pub quiz: Quiz,
    pub question_count: usize,
    pub total_points: i32,
    pub attempts_used: i64,
    pub remaining_attempts: Option<i64>,
    pub open_attempt_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub abandoned: usize,
}

/// Where the clocks leave an open attempt at a given instant.
enum Settled {
    Open { moved: bool },
    /// A clock ran out; the attempt has to be expired.
    Overdue,
}

#[derive(Clone)]
pub struct AttemptService {
    repo: Arc<dyn AttemptRepository>,
    notifier: Arc<dyn AttemptNotifier>,
    clock: Arc<dyn Clock>,
    timers: Arc<AttemptTimers>,
    settings: EngineSettings,
}

impl AttemptService {
    pub fn new(
        repo: Arc<dyn AttemptRepository>,
        notifier: Arc<dyn AttemptNotifier>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            repo,
            notifier,
            clock,
            timers: Arc::new(AttemptTimers::new()),
            settings,
        }
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// Cancels every scheduled expiry. Open attempts are picked up by the
    /// next sweep after a restart.
    pub fn shutdown_timers(&self) {
        self.timers.shutdown();
    }

    fn policy(&self, quiz: &Quiz) -> TimerPolicy {
        TimerPolicy::for_quiz(quiz, self.settings.grace_seconds)
    }

    pub async fn start(&self, user_id: i64, quiz_id: i64) -> Result<AttemptView> {
        let def = self.load_quiz(quiz_id).await?;
        if !def.quiz.is_active {
            return Err(Error::QuizUnavailable(quiz_id));
        }
        let policy = self.policy(&def.quiz);

        if let Some(open) = self.repo.find_open_attempt(user_id, quiz_id).await? {
            let mut probe = open.clone();
            match Self::settle(&mut probe, &policy, self.clock.now()) {
                Settled::Overdue => {
                    tracing::info!(attempt_id = %open.id, "expiring overdue attempt before restart");
                    self.finalize(open, AttemptStatus::Expired, &def).await?;
                }
                Settled::Open { .. } => {
                    return Err(Error::AttemptAlreadyActive { attempt_id: open.id });
                }
            }
        }

        let used = self.repo.count_attempts(user_id, quiz_id).await?;
        if let Some(max_attempts) = def.quiz.attempt_limit() {
            if used >= i64::from(max_attempts) {
                return Err(Error::AttemptLimitExceeded { max_attempts });
            }
        }

        let now = self.clock.now();
        let question_order = question_order(&def, def.quiz.shuffle_questions);
        let attempt = Attempt {
            id: Uuid::new_v4(),
            quiz_id,
            user_id,
            attempt_number: i32::try_from(used + 1).unwrap_or(i32::MAX),
            status: AttemptStatus::InProgress,
            question_order,
            answers: AnswerSheet::new(),
            current_question_index: 0,
            question_started_at: now,
            started_at: now,
            deadline_at: policy.deadline(now),
            last_activity_at: now,
            completed_at: None,
            result: None,
        };
        self.repo.insert_attempt(&attempt).await?;

        if let Some(stop) = policy.hard_stop(now, attempt.question_order.len()) {
            self.schedule_expiry(attempt.id, stop, now);
        }

        tracing::info!(
            attempt_id = %attempt.id,
            user_id,
            quiz_id,
            attempt_number = attempt.attempt_number,
            deadline_at = ?attempt.deadline_at,
            "attempt started"
        );

        Ok(self.view(attempt, def, now))
    }

    pub async fn record_answer(
        &self,
        user_id: i64,
        attempt_id: Uuid,
        answer: AnswerInput,
    ) -> Result<AttemptView> {
        self.answer(user_id, attempt_id, answer, false).await
    }

    /// Records an explicit skip. Under a per-question limit the attempt also
    /// moves on to the next question.
    pub async fn skip_question(
        &self,
        user_id: i64,
        attempt_id: Uuid,
        question_id: i64,
    ) -> Result<AttemptView> {
        let answer = AnswerInput {
            question_id,
            value: AnswerValue::Skipped,
            time_spent_seconds: None,
        };
        self.answer(user_id, attempt_id, answer, true).await
    }

    async fn answer(
        &self,
        user_id: i64,
        attempt_id: Uuid,
        answer: AnswerInput,
        advance_after: bool,
    ) -> Result<AttemptView> {
        let (mut attempt, def) = self.load_owned(user_id, attempt_id).await?;
        attempt.ensure_in_progress()?;
        let question_id = answer.question_id;
        if attempt.position_of(question_id).is_none() {
            return Err(Error::QuestionNotFound {
                attempt_id,
                question_id,
            });
        }

        let now = self.clock.now();
        let policy = self.policy(&def.quiz);
        if !policy.accepts_at(attempt.deadline_at, now) {
            return self.expire_and_reject(attempt, &def).await;
        }

        if let Some(clock) = policy.question_clock() {
            let in_window = attempt.current_question_id() == Some(question_id)
                && clock.accepts(attempt.question_started_at, now);
            if !in_window {
                if let Settled::Overdue = Self::settle(&mut attempt, &policy, now) {
                    return self.expire_and_reject(attempt, &def).await;
                }
                if attempt.current_question_id() != Some(question_id) {
                    self.persist(&attempt).await?;
                    return Err(Error::QuestionWindowClosed { question_id });
                }
            }
        }

        attempt.record(
            question_id,
            RecordedAnswer {
                value: answer.value,
                answered_at: now,
                time_spent_seconds: answer.time_spent_seconds,
            },
        );

        if advance_after && policy.question_clock().is_some() {
            Self::step_forward(&mut attempt, now);
        }

        self.persist(&attempt).await?;
        tracing::debug!(%attempt_id, question_id, "answer recorded");
        Ok(self.view(attempt, def, now))
    }

    /// Moves the cursor to the next question and restarts the question clock.
    pub async fn next_question(&self, user_id: i64, attempt_id: Uuid) -> Result<AttemptView> {
        let (mut attempt, def) = self.load_owned(user_id, attempt_id).await?;
        attempt.ensure_in_progress()?;

        let now = self.clock.now();
        let policy = self.policy(&def.quiz);
        if let Settled::Overdue = Self::settle(&mut attempt, &policy, now) {
            return self.expire_and_reject(attempt, &def).await;
        }

        Self::step_forward(&mut attempt, now);
        attempt.last_activity_at = now;
        self.persist(&attempt).await?;
        Ok(self.view(attempt, def, now))
    }

    /// Current countdowns. An attempt whose clock has run out is expired
    /// here rather than waiting for its timer.
    pub async fn status(&self, user_id: i64, attempt_id: Uuid) -> Result<AttemptView> {
        let (mut attempt, def) = self.load_owned(user_id, attempt_id).await?;
        let now = self.clock.now();

        if !attempt.is_terminal() {
            let policy = self.policy(&def.quiz);
            match Self::settle(&mut attempt, &policy, now) {
                Settled::Overdue => {
                    let (done, _) = self.finalize(attempt, AttemptStatus::Expired, &def).await?;
                    attempt = done;
                }
                Settled::Open { moved: true } => self.persist(&attempt).await?,
                Settled::Open { moved: false } => {}
            }
        }

        Ok(self.view(attempt, def, now))
    }

    pub async fn heartbeat(&self, user_id: i64, attempt_id: Uuid) -> Result<AttemptView> {
        let (mut attempt, def) = self.load_owned(user_id, attempt_id).await?;
        attempt.ensure_in_progress()?;

        let now = self.clock.now();
        let policy = self.policy(&def.quiz);
        if let Settled::Overdue = Self::settle(&mut attempt, &policy, now) {
            return self.expire_and_reject(attempt, &def).await;
        }

        attempt.last_activity_at = now;
        self.persist(&attempt).await?;
        Ok(self.view(attempt, def, now))
    }

    /// Grades and completes the attempt. Calling it again on a finished
    /// attempt returns the stored result unchanged.
    pub async fn submit(
        &self,
        user_id: i64,
        attempt_id: Uuid,
        answers: Vec<AnswerInput>,
    ) -> Result<SubmitOutcome> {
        let (mut attempt, def) = self.load_owned(user_id, attempt_id).await?;
        if attempt.is_terminal() {
            return Self::outcome(attempt, def.quiz, false);
        }

        let now = self.clock.now();
        let policy = self.policy(&def.quiz);

        if !policy.accepts_at(attempt.deadline_at, now) {
            tracing::info!(%attempt_id, "late submission, grading recorded answers only");
            let (done, newly) = self.finalize(attempt, AttemptStatus::Expired, &def).await?;
            return Self::outcome(done, def.quiz, newly);
        }

        let open_question = match policy.question_clock() {
            Some(clock) if clock.accepts(attempt.question_started_at, now) => {
                attempt.current_question_id()
            }
            Some(_) => match Self::settle(&mut attempt, &policy, now) {
                Settled::Overdue => {
                    let (done, newly) =
                        self.finalize(attempt, AttemptStatus::Expired, &def).await?;
                    return Self::outcome(done, def.quiz, newly);
                }
                Settled::Open { .. } => attempt.current_question_id(),
            },
            None => None,
        };
        let timed_questions = policy.question_clock().is_some();

        // Under a question clock, questions whose window closed with an
        // answer on record keep that answer.
        let mut ignored = Vec::new();
        for answer in answers {
            let mergeable = attempt.position_of(answer.question_id).is_some()
                && (!timed_questions
                    || open_question == Some(answer.question_id)
                    || !attempt.answers.contains_key(&answer.question_id));
            if !mergeable {
                ignored.push(answer.question_id);
                continue;
            }
            attempt.record(
                answer.question_id,
                RecordedAnswer {
                    value: answer.value,
                    answered_at: now,
                    time_spent_seconds: answer.time_spent_seconds,
                },
            );
        }

        if !ignored.is_empty() {
            tracing::warn!(%attempt_id, question_ids = ?ignored, "submitted answers not merged");
        }

        let (done, newly) = self
            .finalize(attempt, AttemptStatus::Completed, &def)
            .await?;
        let mut outcome = Self::outcome(done, def.quiz, newly)?;
        outcome.ignored_question_ids = ignored;
        Ok(outcome)
    }

    /// Expires an open attempt with whatever answers it holds.
    pub async fn expire(&self, attempt_id: Uuid) -> Result<Attempt> {
        self.close(attempt_id, AttemptStatus::Expired).await
    }

    pub async fn abandon(&self, attempt_id: Uuid) -> Result<Attempt> {
        self.close(attempt_id, AttemptStatus::Abandoned).await
    }

    async fn close(&self, attempt_id: Uuid, status: AttemptStatus) -> Result<Attempt> {
        let (attempt, def) = self.load(attempt_id).await?;
        if attempt.is_terminal() {
            return Ok(attempt);
        }
        let (done, _) = self.finalize(attempt, status, &def).await?;
        Ok(done)
    }

    /// Background pass over attempts nobody is driving any more.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut quizzes: HashMap<i64, QuizDefinition> = HashMap::new();

        let overdue_before = now - Duration::seconds(self.settings.grace_seconds.max(0));
        let overdue = self
            .repo
            .list_overdue_attempts(overdue_before, self.settings.sweep_batch)
            .await?;
        for attempt in overdue {
            let attempt_id = attempt.id;
            // Untouched since start: the student walked away.
            let untouched =
                attempt.answers.is_empty() && attempt.last_activity_at == attempt.started_at;
            let status = if untouched {
                AttemptStatus::Abandoned
            } else {
                AttemptStatus::Expired
            };
            match self.sweep_one(attempt, status, &mut quizzes).await {
                Ok(true) if status == AttemptStatus::Abandoned => report.abandoned += 1,
                Ok(true) => report.expired += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(%attempt_id, error = %e, "failed to close overdue attempt"),
            }
        }

        let idle_before = now - Duration::seconds(self.settings.abandon_after_seconds.max(0));
        let idle = self
            .repo
            .list_idle_attempts(idle_before, self.settings.sweep_batch)
            .await?;
        for attempt in idle {
            let attempt_id = attempt.id;
            let status = match self.definition(attempt.quiz_id, &mut quizzes).await {
                Ok(def) => {
                    let policy = self.policy(&def.quiz);
                    let mut probe = attempt.clone();
                    match Self::settle(&mut probe, &policy, now) {
                        Settled::Overdue => AttemptStatus::Expired,
                        Settled::Open { .. } => AttemptStatus::Abandoned,
                    }
                }
                Err(e) => {
                    tracing::error!(%attempt_id, error = %e, "failed to load quiz for idle attempt");
                    continue;
                }
            };
            match self.sweep_one(attempt, status, &mut quizzes).await {
                Ok(true) if status == AttemptStatus::Expired => report.expired += 1,
                Ok(true) => report.abandoned += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(%attempt_id, error = %e, "failed to abandon attempt"),
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                expired = report.expired,
                abandoned = report.abandoned,
                "attempt sweep finished"
            );
        }
        Ok(report)
    }

    async fn sweep_one(
        &self,
        attempt: Attempt,
        status: AttemptStatus,
        quizzes: &mut HashMap<i64, QuizDefinition>,
    ) -> Result<bool> {
        let def = self.definition(attempt.quiz_id, quizzes).await?;
        let (_, newly) = self.finalize(attempt, status, &def).await?;
        Ok(newly)
    }

    async fn definition(
        &self,
        quiz_id: i64,
        cache: &mut HashMap<i64, QuizDefinition>,
    ) -> Result<QuizDefinition> {
        if let Some(def) = cache.get(&quiz_id) {
            return Ok(def.clone());
        }
        let def = self.load_quiz(quiz_id).await?;
        cache.insert(quiz_id, def.clone());
        Ok(def)
    }

    pub async fn history(&self, user_id: i64, quiz_id: i64) -> Result<AttemptHistory> {
        let def = self.load_quiz(quiz_id).await?;
        let attempts = self.repo.list_attempts(user_id, quiz_id).await?;
        let attempts_used = i64::try_from(attempts.len()).unwrap_or(i64::MAX);
        let best_percentage = attempts
            .iter()
            .filter_map(|a| a.result.as_ref().map(|r| r.percentage))
            .max();

        Ok(AttemptHistory {
            remaining_attempts: def.quiz.remaining_attempts(attempts_used),
            quiz: def.quiz,
            attempts,
            attempts_used,
            best_percentage,
        })
    }

    pub async fn quiz_overview(&self, user_id: i64, quiz_id: i64) -> Result<QuizOverview> {
        let def = self.load_quiz(quiz_id).await?;
        let attempts_used = self.repo.count_attempts(user_id, quiz_id).await?;
        let open_attempt_id = self
            .repo
            .find_open_attempt(user_id, quiz_id)
            .await?
            .map(|a| a.id);

        Ok(QuizOverview {
            question_count: def.questions.len(),
            total_points: GradingService::total_points(&def.questions),
            remaining_attempts: def.quiz.remaining_attempts(attempts_used),
            quiz: def.quiz,
            attempts_used,
            open_attempt_id,
        })
    }

    /// Grades `attempt` and moves it to `status` if it is still open in the
    /// store. Returns the stored attempt and whether this call finalized it.
    async fn finalize(
        &self,
        mut attempt: Attempt,
        status: AttemptStatus,
        def: &QuizDefinition,
    ) -> Result<(Attempt, bool)> {
        let now = self.clock.now();
        let questions = def.ordered(&attempt.question_order);
        let result = GradingService::evaluate(&questions, &attempt.answers, def.quiz.passing_score);
        attempt.finish(status, now, result);

        if !self.repo.finalize_attempt(&attempt).await? {
            let stored = self
                .repo
                .find_attempt(attempt.id)
                .await?
                .ok_or(Error::AttemptNotFound(attempt.id))?;
            return Ok((stored, false));
        }

        self.timers.cancel(attempt.id);
        tracing::info!(
            attempt_id = %attempt.id,
            status = %attempt.status,
            percentage = %attempt.result.as_ref().map(|r| r.percentage).unwrap_or_default(),
            "attempt finalized"
        );

        let event = AttemptCompletedEvent::from_attempt(&attempt);
        if let Err(e) = self.notifier.attempt_completed(&event).await {
            tracing::error!(attempt_id = %attempt.id, error = %e, "failed to publish attempt completion");
        }

        Ok((attempt, true))
    }

    async fn expire_and_reject<T>(&self, attempt: Attempt, def: &QuizDefinition) -> Result<T> {
        let (done, _) = self.finalize(attempt, AttemptStatus::Expired, def).await?;
        Err(Error::AttemptTerminal {
            attempt_id: done.id,
            status: done.status,
        })
    }

    async fn persist(&self, attempt: &Attempt) -> Result<()> {
        if self.repo.save_progress(attempt).await? {
            return Ok(());
        }
        let status = self
            .repo
            .find_attempt(attempt.id)
            .await?
            .map(|a| a.status)
            .ok_or(Error::AttemptNotFound(attempt.id))?;
        Err(Error::AttemptTerminal {
            attempt_id: attempt.id,
            status,
        })
    }

    fn settle(attempt: &mut Attempt, policy: &TimerPolicy, now: DateTime<Utc>) -> Settled {
        if !policy.accepts_at(attempt.deadline_at, now) {
            return Settled::Overdue;
        }
        let Some(clock) = policy.question_clock() else {
            return Settled::Open { moved: false };
        };

        let pos = clock.advance(
            attempt.current_question_index,
            attempt.question_started_at,
            now,
            attempt.question_order.len(),
        );
        if pos.exhausted && !clock.accepts(pos.started_at, now) {
            return Settled::Overdue;
        }

        let moved = pos.index != attempt.current_question_index
            || pos.started_at != attempt.question_started_at;
        attempt.current_question_index = pos.index;
        attempt.question_started_at = pos.started_at;
        Settled::Open { moved }
    }

    fn step_forward(attempt: &mut Attempt, now: DateTime<Utc>) {
        let last = i32::try_from(attempt.question_order.len()).unwrap_or(i32::MAX) - 1;
        if attempt.current_question_index < last {
            attempt.current_question_index += 1;
            attempt.question_started_at = now;
        }
    }

    fn schedule_expiry(&self, attempt_id: Uuid, stop: DateTime<Utc>, now: DateTime<Utc>) {
        let delay = (stop - now).to_std().unwrap_or_default();
        let svc = self.clone();
        self.timers.schedule(attempt_id, delay, async move {
            if let Err(e) = svc.expire(attempt_id).await {
                tracing::error!(%attempt_id, error = %e, "attempt timer failed to expire attempt");
                svc.timers.cancel(attempt_id);
            }
        });
    }

    fn view(&self, attempt: Attempt, def: QuizDefinition, now: DateTime<Utc>) -> AttemptView {
        let countdown = if attempt.is_terminal() {
            Countdown {
                attempt_remaining_seconds: attempt.deadline_at.map(|_| 0),
                question_remaining_seconds: None,
            }
        } else {
            self.policy(&def.quiz)
                .countdown(attempt.deadline_at, attempt.question_started_at, now)
        };
        let questions = def.ordered(&attempt.question_order);
        AttemptView {
            attempt,
            quiz: def.quiz,
            questions,
            countdown,
        }
    }

    fn outcome(attempt: Attempt, quiz: Quiz, newly_finalized: bool) -> Result<SubmitOutcome> {
        let result = attempt.result.clone().ok_or_else(|| {
            Error::Internal(format!("attempt {} is {} without a result", attempt.id, attempt.status))
        })?;
        Ok(SubmitOutcome {
            attempt,
            quiz,
            result,
            newly_finalized,
            ignored_question_ids: Vec::new(),
        })
    }

    async fn load_quiz(&self, quiz_id: i64) -> Result<QuizDefinition> {
        self.repo
            .find_quiz(quiz_id)
            .await?
            .ok_or(Error::QuizNotFound(quiz_id))
    }

    async fn load(&self, attempt_id: Uuid) -> Result<(Attempt, QuizDefinition)> {
        let attempt = self
            .repo
            .find_attempt(attempt_id)
            .await?
            .ok_or(Error::AttemptNotFound(attempt_id))?;
        let def = self.load_quiz(attempt.quiz_id).await?;
        Ok((attempt, def))
    }

    async fn load_owned(&self, user_id: i64, attempt_id: Uuid) -> Result<(Attempt, QuizDefinition)> {
        let (attempt, def) = self.load(attempt_id).await?;
        attempt.ensure_owner(user_id)?;
        Ok((attempt, def))
    }
}

fn question_order(def: &QuizDefinition, shuffle: bool) -> Vec<i64> {
    let mut order: Vec<i64> = def.questions.iter().map(|q| q.id).collect();
    if shuffle {
        order.shuffle(&mut rand::thread_rng());
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory_repository::InMemoryAttemptRepository;
    use crate::models::question::QuestionKind;
    use crate::services::notification_service::MockAttemptNotifier;
    use crate::utils::time::ManualClock;
    use serde_json::json;

    fn quiz(id: i64) -> Quiz {
        Quiz {
            id,
            lesson_id: Some(3),
            title: "Fractions".into(),
            description: None,
            time_limit_seconds: None,
            question_time_limit_seconds: None,
            max_attempts: Some(2),
            passing_score: Decimal::from(70),
            shuffle_questions: false,
            shuffle_options: false,
            show_results_immediately: true,
            is_active: true,
            created_at: None,
            updated_at: None,
        }
    }

    fn tf(id: i64, quiz_id: i64, correct: bool) -> Question {
        Question {
            id,
            quiz_id,
            position: i32::try_from(id).unwrap(),
            prompt: format!("Q{}", id),
            points: 5,
            kind: QuestionKind::TrueFalse { correct },
        }
    }

    struct Harness {
        svc: AttemptService,
        repo: Arc<InMemoryAttemptRepository>,
        clock: Arc<ManualClock>,
    }

    fn harness(q: Quiz, notifier: MockAttemptNotifier) -> Harness {
        let repo = Arc::new(InMemoryAttemptRepository::new());
        let id = q.id;
        repo.put_quiz(QuizDefinition::new(q, vec![tf(1, id, true), tf(2, id, false)]));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let svc = AttemptService::new(
            repo.clone(),
            Arc::new(notifier),
            clock.clone(),
            EngineSettings::default(),
        );
        Harness { svc, repo, clock }
    }

    fn answer(question_id: i64, value: serde_json::Value) -> AnswerInput {
        AnswerInput {
            question_id,
            value: AnswerValue::Response(value),
            time_spent_seconds: None,
        }
    }

    #[tokio::test]
    async fn double_submit_notifies_once() {
        let mut notifier = MockAttemptNotifier::new();
        notifier
            .expect_attempt_completed()
            .withf(|e| e.status == "completed" && e.passed)
            .times(1)
            .returning(|_| Ok(()));
        let h = harness(quiz(1), notifier);

        let view = h.svc.start(7, 1).await.unwrap();
        let id = view.attempt.id;
        let answers = vec![answer(1, json!(true)), answer(2, json!(false))];

        let first = h.svc.submit(7, id, answers.clone()).await.unwrap();
        assert!(first.newly_finalized);
        assert_eq!(first.result.percentage, Decimal::from(100));

        let second = h.svc.submit(7, id, vec![]).await.unwrap();
        assert!(!second.newly_finalized);
        assert_eq!(second.result, first.result);
    }

    #[tokio::test]
    async fn notifier_failure_does_not_fail_submit() {
        let mut notifier = MockAttemptNotifier::new();
        notifier
            .expect_attempt_completed()
            .times(1)
            .returning(|_| Err(Error::Internal("queue down".into())));
        let h = harness(quiz(1), notifier);

        let id = h.svc.start(7, 1).await.unwrap().attempt.id;
        let outcome = h.svc.submit(7, id, vec![answer(1, json!(true))]).await.unwrap();
        assert_eq!(outcome.attempt.status, AttemptStatus::Completed);
        assert_eq!(outcome.result.percentage, Decimal::from(50));
        assert!(!outcome.result.passed);
    }

    #[tokio::test]
    async fn other_students_cannot_touch_an_attempt() {
        let h = harness(quiz(1), MockAttemptNotifier::new());
        let id = h.svc.start(7, 1).await.unwrap().attempt.id;

        let err = h.svc.status(8, id).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        let err = h.svc.submit(8, id, vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[tokio::test]
    async fn late_answer_expires_the_attempt() {
        let mut notifier = MockAttemptNotifier::new();
        notifier
            .expect_attempt_completed()
            .withf(|e| e.status == "expired")
            .times(1)
            .returning(|_| Ok(()));
        let mut q = quiz(1);
        q.time_limit_seconds = Some(60);
        let h = harness(q, notifier);

        let id = h.svc.start(7, 1).await.unwrap().attempt.id;
        h.svc.record_answer(7, id, answer(1, json!(true))).await.unwrap();

        h.clock.advance(Duration::seconds(66));
        let err = h.svc.record_answer(7, id, answer(2, json!(false))).await.unwrap_err();
        assert!(matches!(
            err,
            Error::AttemptTerminal { status: AttemptStatus::Expired, .. }
        ));

        let stored = h.repo.find_attempt(id).await.unwrap().unwrap();
        let result = stored.result.unwrap();
        assert_eq!(result.correct_answers, 1);
        assert_eq!(result.percentage, Decimal::from(50));
    }

    #[tokio::test]
    async fn inactive_quiz_cannot_be_started() {
        let mut q = quiz(1);
        q.is_active = false;
        let h = harness(q, MockAttemptNotifier::new());
        assert!(matches!(
            h.svc.start(7, 1).await.unwrap_err(),
            Error::QuizUnavailable(1)
        ));
        assert_eq!(h.repo.attempt_count(), 0);
    }

    #[tokio::test]
    async fn unknown_question_is_rejected() {
        let h = harness(quiz(1), MockAttemptNotifier::new());
        let id = h.svc.start(7, 1).await.unwrap().attempt.id;
        let err = h.svc.record_answer(7, id, answer(99, json!(1))).await.unwrap_err();
        assert!(matches!(err, Error::QuestionNotFound { question_id: 99, .. }));
    }

    #[tokio::test]
    async fn expire_is_a_no_op_on_finished_attempts() {
        let mut notifier = MockAttemptNotifier::new();
        notifier.expect_attempt_completed().times(1).returning(|_| Ok(()));
        let h = harness(quiz(1), notifier);

        let id = h.svc.start(7, 1).await.unwrap().attempt.id;
        h.svc.submit(7, id, vec![]).await.unwrap();
        let after = h.svc.expire(id).await.unwrap();
        assert_eq!(after.status, AttemptStatus::Completed);
    }

    #[test]
    fn question_order_keeps_bank_order_without_shuffle() {
        let def = QuizDefinition::new(quiz(1), vec![tf(2, 1, true), tf(1, 1, false)]);
        assert_eq!(question_order(&def, false), vec![1, 2]);

        let mut shuffled = question_order(&def, true);
        shuffled.sort_unstable();
        assert_eq!(shuffled, vec![1, 2]);
    }
}
