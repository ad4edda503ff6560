use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::quiz::Quiz;
use crate::utils::time::seconds_until;

fn positive_seconds(limit: Option<i32>) -> Option<Duration> {
    limit
        .filter(|s| *s > 0)
        .map(|s| Duration::seconds(i64::from(s)))
}

/// Server-side view of both attempt clocks. The client runs its own
/// one-second countdowns; these values are the ones that count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPolicy {
    pub time_limit: Option<Duration>,
    pub question_time_limit: Option<Duration>,
    /// Slack granted to requests that left the client just before a deadline.
    pub grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    pub attempt_remaining_seconds: Option<i64>,
    pub question_remaining_seconds: Option<i64>,
}

impl TimerPolicy {
    pub fn for_quiz(quiz: &Quiz, grace_seconds: i64) -> Self {
        Self {
            time_limit: positive_seconds(quiz.time_limit_seconds),
            question_time_limit: positive_seconds(quiz.question_time_limit_seconds),
            grace: Duration::seconds(grace_seconds.max(0)),
        }
    }

    pub fn deadline(&self, started_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.time_limit.map(|limit| started_at + limit)
    }

    pub fn question_clock(&self) -> Option<QuestionClock> {
        self.question_time_limit.map(|limit| QuestionClock {
            limit,
            grace: self.grace,
        })
    }

    /// Latest moment the attempt can still be open, grace included. With a
    /// question clock and no overall limit this is the end of the last
    /// question window if no question is skipped early.
    pub fn hard_stop(
        &self,
        started_at: DateTime<Utc>,
        question_count: usize,
    ) -> Option<DateTime<Utc>> {
        let by_questions = self.question_time_limit.map(|limit| {
            let count = i32::try_from(question_count.max(1)).unwrap_or(i32::MAX);
            started_at + limit * count
        });
        let by_deadline = self.deadline(started_at);
        let stop = match (by_deadline, by_questions) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        stop.map(|at| at + self.grace)
    }

    /// True while a request stamped `at` still counts as on time.
    pub fn accepts_at(&self, deadline: Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
        match deadline {
            Some(deadline) => at <= deadline + self.grace,
            None => true,
        }
    }

    pub fn countdown(
        &self,
        deadline: Option<DateTime<Utc>>,
        question_started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Countdown {
        Countdown {
            attempt_remaining_seconds: deadline.map(|d| seconds_until(now, d)),
            question_remaining_seconds: self
                .question_clock()
                .map(|clock| clock.remaining_seconds(question_started_at, now)),
        }
    }
}

/// Per-question countdown. When a window runs out the attempt moves on to
/// the next question and the same limit starts again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionClock {
    limit: Duration,
    grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockPosition {
    pub index: i32,
    pub started_at: DateTime<Utc>,
    /// The clock ran past the last question.
    pub exhausted: bool,
}

impl QuestionClock {
    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn remaining_seconds(&self, started_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        seconds_until(now, started_at + self.limit)
    }

    /// Whether the window opened at `started_at` still takes an answer at `at`.
    pub fn accepts(&self, started_at: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        at <= started_at + self.limit + self.grace
    }

    pub fn advance(
        &self,
        index: i32,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        question_count: usize,
    ) -> ClockPosition {
        let limit_ms = self.limit.num_milliseconds().max(1);
        let elapsed_ms = (now - started_at).num_milliseconds().max(0);
        let windows = elapsed_ms / limit_ms;
        let last = i64::try_from(question_count).unwrap_or(i64::MAX) - 1;

        if last < 0 {
            return ClockPosition {
                index: 0,
                started_at,
                exhausted: true,
            };
        }

        let target = i64::from(index) + windows;
        if target > last {
            // Park on the last question, keeping the start of its window so
            // callers can still honour the grace period.
            let moves = (last - i64::from(index)).max(0);
            return ClockPosition {
                index: i32::try_from(last).unwrap_or(i32::MAX),
                started_at: started_at + Duration::milliseconds(moves * limit_ms),
                exhausted: true,
            };
        }

        ClockPosition {
            index: i32::try_from(target).unwrap_or(i32::MAX),
            started_at: started_at + Duration::milliseconds(windows * limit_ms),
            exhausted: false,
        }
    }
}

/// Expiry timers owned by the running engine, one per open attempt.
///
/// Each timer is a spawned task that sleeps until the attempt deadline and
/// then runs its callback, unless cancelled first. Dropping the registry or
/// calling [`AttemptTimers::shutdown`] cancels every pending timer.
#[derive(Debug, Default)]
pub struct AttemptTimers {
    root: CancellationToken,
    pending: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl AttemptTimers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, attempt_id: Uuid, delay: std::time::Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%attempt_id, "no async runtime, attempt timer not scheduled");
            return;
        };
        if self.root.is_cancelled() {
            return;
        }

        let token = self.root.child_token();
        {
            let mut pending = self.pending.lock().expect("timer registry mutex poisoned");
            if let Some(previous) = pending.insert(attempt_id, token.clone()) {
                previous.cancel();
            }
        }

        handle.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(%attempt_id, "attempt timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    tracing::debug!(%attempt_id, "attempt timer fired");
                    on_fire.await;
                }
            }
        });
    }

    /// Returns true if a pending timer was cancelled.
    pub fn cancel(&self, attempt_id: Uuid) -> bool {
        let token = self
            .pending
            .lock()
            .expect("timer registry mutex poisoned")
            .remove(&attempt_id);
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .expect("timer registry mutex poisoned")
            .len()
    }

    pub fn shutdown(&self) {
        self.root.cancel();
        self.pending
            .lock()
            .expect("timer registry mutex poisoned")
            .clear();
    }
}

impl Drop for AttemptTimers {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
