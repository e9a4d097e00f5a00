//! Frame-driven task scheduler.
//!
//! Steps are plain functions polled once per eligible tick. Each returns a
//! [`StepResult`]: `Done` advances the queue, `Retry` spends one attempt, and
//! `Pending` waits for the outside world without spending anything. At most
//! one task is in flight; tasks run in strict FIFO order and a task never
//! starts before its predecessor has resolved.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::budget::has_elapsed;
use crate::io::clock::Clock;
use crate::io::config::Settings;

/// Outcome of a single step invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// The step finished; the next task may start.
    Done,
    /// The step failed and should be attempted again (spends one attempt).
    Retry,
    /// The step is waiting on external state (spends nothing).
    Pending,
}

/// Fatal scheduler failure. The queue is cleared when one of these is raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("step '{label}' failed after {attempts} attempts")]
    AttemptsExhausted { label: String, attempts: u32 },
    #[error("step '{label}' timed out after {elapsed_ms} ms")]
    TimedOut { label: String, elapsed_ms: u64 },
}

/// What a call to [`TaskScheduler::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing queued and nothing in flight.
    Idle,
    /// A task is in flight but is gated by a delay or the step interval.
    Waiting,
    /// The in-flight step was invoked once.
    Invoked { label: String, result: StepResult },
    /// The scheduler gave up and cleared its queue.
    Aborted(SchedulerError),
}

type StepFn<C> = Box<dyn FnMut(&mut C) -> StepResult>;

/// One queued unit of work.
pub struct Task<C> {
    label: String,
    step: StepFn<C>,
    max_attempts: Option<u32>,
    delay: Duration,
    timeout: Option<Duration>,
    enqueued_at: Option<Instant>,
}

impl<C> Task<C> {
    pub fn new<F>(label: impl Into<String>, step: F) -> Self
    where
        F: FnMut(&mut C) -> StepResult + 'static,
    {
        Self {
            label: label.into(),
            step: Box::new(step),
            max_attempts: None,
            delay: Duration::ZERO,
            timeout: None,
            enqueued_at: None,
        }
    }

    /// Zero-work task whose only job is to hold the queue for `delay`.
    pub fn wait(label: impl Into<String>, delay: Duration) -> Self {
        Self::new(label, |_: &mut C| StepResult::Done)
            .max_attempts(1)
            .delay(delay)
    }

    /// Attempt budget for this task (overrides the scheduler default).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Minimum time after the previous task resolved before this one may run.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Wall-clock budget once the step has first been invoked.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Defaults applied to tasks that do not set their own policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerPolicy {
    pub max_attempts_default: u32,
    /// `None` disables the wall-clock budget.
    pub step_timeout: Option<Duration>,
    /// Minimum spacing after a `Done` or `Retry` before the next invocation.
    pub min_step_interval: Duration,
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SchedulerPolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            max_attempts_default: settings.max_attempts_default,
            step_timeout: Some(settings.step_timeout()),
            min_step_interval: settings.min_step_interval(),
        }
    }
}

struct InFlight<C> {
    task: Task<C>,
    attempts: u32,
    started_at: Option<Instant>,
}

/// FIFO queue of steps advanced by [`TaskScheduler::tick`].
pub struct TaskScheduler<C> {
    queue: VecDeque<Task<C>>,
    current: Option<InFlight<C>>,
    clock: Arc<dyn Clock>,
    policy: SchedulerPolicy,
    last_completed_at: Option<Instant>,
    last_commit_at: Option<Instant>,
    last_error: Option<SchedulerError>,
}

impl<C> TaskScheduler<C> {
    pub fn new(clock: Arc<dyn Clock>, policy: SchedulerPolicy) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            clock,
            policy,
            last_completed_at: None,
            last_commit_at: None,
            last_error: None,
        }
    }

    pub fn enqueue(&mut self, mut task: Task<C>) {
        task.enqueued_at = Some(self.clock.now());
        debug!(label = %task.label, queued = self.queue.len() + 1, "task enqueued");
        self.queue.push_back(task);
    }

    pub fn enqueue_delay(&mut self, label: impl Into<String>, delay: Duration) {
        self.enqueue(Task::wait(label, delay));
    }

    /// Drop every queued task and the in-flight one.
    pub fn abort(&mut self) {
        let dropped = self.queue.len() + usize::from(self.current.is_some());
        self.queue.clear();
        self.current = None;
        info!(dropped, "scheduler aborted");
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn current_label(&self) -> Option<&str> {
        self.current.as_ref().map(|inflight| inflight.task.label())
    }

    /// Attempts already spent by the in-flight task.
    pub fn current_attempts(&self) -> Option<u32> {
        self.current.as_ref().map(|inflight| inflight.attempts)
    }

    pub fn last_error(&self) -> Option<&SchedulerError> {
        self.last_error.as_ref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Advance at most one task by at most one invocation.
    pub fn tick(&mut self, ctx: &mut C) -> TickOutcome {
        let now = self.clock.now();

        if self.current.is_none() {
            let Some(task) = self.queue.pop_front() else {
                return TickOutcome::Idle;
            };
            debug!(label = %task.label, remaining = self.queue.len(), "task started");
            self.current = Some(InFlight {
                task,
                attempts: 0,
                started_at: None,
            });
        }

        let Some(inflight) = self.current.as_mut() else {
            return TickOutcome::Idle;
        };

        if let Some(started_at) = inflight.started_at {
            let budget = inflight.task.timeout.or(self.policy.step_timeout);
            if let Some(budget) = budget
                && has_elapsed(started_at, budget, now)
            {
                let elapsed = now.saturating_duration_since(started_at);
                let err = SchedulerError::TimedOut {
                    label: inflight.task.label.clone(),
                    elapsed_ms: elapsed.as_millis() as u64,
                };
                return self.fail(err);
            }
        } else {
            let enqueued_at = inflight.task.enqueued_at.unwrap_or(now);
            let window_start = match self.last_completed_at {
                Some(completed) if completed > enqueued_at => completed,
                _ => enqueued_at,
            };
            if !has_elapsed(window_start, inflight.task.delay, now) {
                return TickOutcome::Waiting;
            }
        }

        if let Some(last_commit) = self.last_commit_at
            && !has_elapsed(last_commit, self.policy.min_step_interval, now)
        {
            return TickOutcome::Waiting;
        }

        inflight.started_at.get_or_insert(now);
        let result = (inflight.task.step)(ctx);
        let label = inflight.task.label.clone();

        match result {
            StepResult::Done => {
                debug!(label = %label, attempts = inflight.attempts, "task completed");
                self.current = None;
                self.last_completed_at = Some(now);
                self.last_commit_at = Some(now);
            }
            StepResult::Retry => {
                inflight.attempts += 1;
                let max_attempts = inflight
                    .task
                    .max_attempts
                    .unwrap_or(self.policy.max_attempts_default);
                debug!(label = %label, attempts = inflight.attempts, max_attempts, "task retry");
                if inflight.attempts >= max_attempts {
                    let err = SchedulerError::AttemptsExhausted {
                        label,
                        attempts: inflight.attempts,
                    };
                    return self.fail(err);
                }
                self.last_commit_at = Some(now);
            }
            StepResult::Pending => {}
        }

        TickOutcome::Invoked { label, result }
    }

    fn fail(&mut self, err: SchedulerError) -> TickOutcome {
        warn!(error = %err, dropped = self.queue.len(), "scheduler giving up");
        self.queue.clear();
        self.current = None;
        self.last_error = Some(err.clone());
        TickOutcome::Aborted(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::clock::ManualClock;

    #[derive(Default)]
    struct Log {
        calls: Vec<String>,
    }

    fn scheduler(clock: &Arc<ManualClock>) -> TaskScheduler<Log> {
        TaskScheduler::new(
            clock.clone(),
            SchedulerPolicy {
                max_attempts_default: 5,
                step_timeout: None,
                min_step_interval: Duration::ZERO,
            },
        )
    }

    /// Step that records its label and succeeds on its `succeed_on`-th call.
    fn counting(label: &'static str, succeed_on: u32) -> Task<Log> {
        let mut calls = 0;
        Task::new(label, move |log: &mut Log| {
            calls += 1;
            log.calls.push(label.to_string());
            if calls >= succeed_on {
                StepResult::Done
            } else {
                StepResult::Retry
            }
        })
    }

    fn run_until_idle(scheduler: &mut TaskScheduler<Log>, log: &mut Log, max_ticks: usize) {
        for _ in 0..max_ticks {
            if scheduler.tick(log) == TickOutcome::Idle {
                return;
            }
        }
        panic!("scheduler did not go idle within {max_ticks} ticks");
    }

    #[test]
    fn runs_steps_in_fifo_order() {
        let clock = Arc::new(ManualClock::new());
        let mut scheduler = scheduler(&clock);
        scheduler.enqueue(counting("a", 1));
        scheduler.enqueue(counting("b", 3));
        scheduler.enqueue(counting("c", 2));

        let mut log = Log::default();
        run_until_idle(&mut scheduler, &mut log, 20);

        assert_eq!(log.calls, vec!["a", "b", "b", "b", "c", "c"]);
        assert!(scheduler.is_idle());
        assert!(scheduler.last_error().is_none());
    }

    #[test]
    fn one_invocation_per_tick() {
        let clock = Arc::new(ManualClock::new());
        let mut scheduler = scheduler(&clock);
        scheduler.enqueue(counting("a", 1));
        scheduler.enqueue(counting("b", 1));

        let mut log = Log::default();
        scheduler.tick(&mut log);
        assert_eq!(log.calls, vec!["a"]);
        scheduler.tick(&mut log);
        assert_eq!(log.calls, vec!["a", "b"]);
    }

    #[test]
    fn always_retry_is_invoked_exactly_max_attempts() {
        let clock = Arc::new(ManualClock::new());
        let mut scheduler = scheduler(&clock);
        scheduler.enqueue(counting("never", u32::MAX).max_attempts(4));
        scheduler.enqueue(counting("after", 1));

        let mut log = Log::default();
        let mut aborted = None;
        for _ in 0..10 {
            if let TickOutcome::Aborted(err) = scheduler.tick(&mut log) {
                aborted = Some(err);
                break;
            }
        }

        assert_eq!(log.calls, vec!["never"; 4]);
        assert_eq!(
            aborted,
            Some(SchedulerError::AttemptsExhausted {
                label: "never".to_string(),
                attempts: 4
            })
        );
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.tick(&mut log), TickOutcome::Idle);
    }

    #[test]
    fn pending_never_spends_attempts() {
        let clock = Arc::new(ManualClock::new());
        let mut scheduler = scheduler(&clock);
        scheduler.enqueue(
            Task::new("wait", |log: &mut Log| {
                log.calls.push("wait".to_string());
                StepResult::Pending
            })
            .max_attempts(1),
        );

        let mut log = Log::default();
        for _ in 0..500 {
            clock.advance_ms(100);
            assert!(matches!(
                scheduler.tick(&mut log),
                TickOutcome::Invoked {
                    result: StepResult::Pending,
                    ..
                }
            ));
        }
        assert_eq!(log.calls.len(), 500);
        assert_eq!(scheduler.current_attempts(), Some(0));

        scheduler.abort();
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.tick(&mut log), TickOutcome::Idle);
        assert_eq!(log.calls.len(), 500);
    }

    #[test]
    fn delay_gates_until_window_after_previous_completion() {
        let clock = Arc::new(ManualClock::new());
        let mut scheduler = scheduler(&clock);
        scheduler.enqueue(counting("first", 1));
        scheduler.enqueue_delay("settle", Duration::from_millis(300));
        scheduler.enqueue(counting("second", 1));

        let mut log = Log::default();
        scheduler.tick(&mut log);
        assert_eq!(log.calls, vec!["first"]);

        clock.advance_ms(100);
        assert_eq!(scheduler.tick(&mut log), TickOutcome::Waiting);
        clock.advance_ms(199);
        assert_eq!(scheduler.tick(&mut log), TickOutcome::Waiting);
        clock.advance_ms(1);
        assert!(matches!(
            scheduler.tick(&mut log),
            TickOutcome::Invoked {
                result: StepResult::Done,
                ..
            }
        ));
        scheduler.tick(&mut log);
        assert_eq!(log.calls, vec!["first", "second"]);
    }

    #[test]
    fn step_timeout_aborts_pending_step() {
        let clock = Arc::new(ManualClock::new());
        let mut scheduler = scheduler(&clock);
        scheduler.enqueue(
            Task::new("stuck", |_: &mut Log| StepResult::Pending)
                .timeout(Duration::from_millis(1_000)),
        );
        scheduler.enqueue(counting("never-runs", 1));

        let mut log = Log::default();
        scheduler.tick(&mut log);
        clock.advance_ms(999);
        assert!(matches!(
            scheduler.tick(&mut log),
            TickOutcome::Invoked { .. }
        ));
        clock.advance_ms(1);
        let outcome = scheduler.tick(&mut log);
        assert!(matches!(
            outcome,
            TickOutcome::Aborted(SchedulerError::TimedOut { ref label, .. }) if label == "stuck"
        ));
        assert!(scheduler.is_idle());
        assert!(log.calls.is_empty());
        assert!(scheduler.last_error().is_some());
    }

    #[test]
    fn min_step_interval_spaces_commits_but_not_pending_polls() {
        let clock = Arc::new(ManualClock::new());
        let mut scheduler = TaskScheduler::new(
            clock.clone(),
            SchedulerPolicy {
                max_attempts_default: 5,
                step_timeout: None,
                min_step_interval: Duration::from_millis(100),
            },
        );
        scheduler.enqueue(counting("a", 1));
        scheduler.enqueue(counting("b", 1));

        let mut log = Log::default();
        scheduler.tick(&mut log);
        assert_eq!(scheduler.tick(&mut log), TickOutcome::Waiting);
        clock.advance_ms(100);
        scheduler.tick(&mut log);
        assert_eq!(log.calls, vec!["a", "b"]);
    }

    #[test]
    fn abort_clears_queue_and_in_flight() {
        let clock = Arc::new(ManualClock::new());
        let mut scheduler = scheduler(&clock);
        scheduler.enqueue(counting("a", 3));
        scheduler.enqueue(counting("b", 1));
        let mut log = Log::default();
        scheduler.tick(&mut log);
        assert_eq!(scheduler.current_label(), Some("a"));

        scheduler.abort();
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.queued_len(), 0);
        assert!(scheduler.last_error().is_none());
    }
}
