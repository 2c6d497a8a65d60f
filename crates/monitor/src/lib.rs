//! Execution monitor: priority scheduling, task lifecycle, and history.
//!
//! The monitor is the single source of truth for task state. A priority
//! queue ordered by (priority desc, submitted-at asc) feeds a running set
//! bounded by the concurrency budget; terminal tasks land in a bounded
//! history ring. The registry mutex guards pointer shuffles only, never a
//! subprocess wait.

pub mod stats;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use opsmith_core::{
    Error, ExecutionPolicy, ExecutionRequest, ExecutionTask, Platform, Result, SafetyDecision,
    TaskErrorKind, TaskMetrics, TaskPriority, TaskResult, TaskState,
};
use opsmith_executor::{ExecutionOutcome, ExecutorError, ScriptExecutor};
use opsmith_safety::SafetyValidator;

pub use stats::MonitorStatistics;

/// Event handler invoked with a task snapshot after the state is durable
/// in the registry.
pub type TaskHandler = Arc<dyn Fn(&ExecutionTask) + Send + Sync>;

/// Callbacks bound at submission.
#[derive(Clone, Default)]
pub struct TaskCallbacks {
    /// At most once per transition.
    pub on_state_change: Option<TaskHandler>,
    /// Exactly once per terminal transition.
    pub on_complete: Option<TaskHandler>,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CancelOutcome {
    Cancelled,
    AlreadyTerminal,
    NotFound,
}

/// Filter for task listings.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub platform: Option<Platform>,
}

/// Scheduler tunables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub max_concurrent: usize,
    pub history_max: usize,
    pub max_timeout_seconds: u64,
    pub aging_threshold_seconds: u64,
    pub idle_tick_ms: u64,
    pub require_confirm_token_for_elevated: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            history_max: 500,
            max_timeout_seconds: 3600,
            aging_threshold_seconds: 300,
            idle_tick_ms: 1_000,
            require_confirm_token_for_elevated: false,
        }
    }
}

struct QueueEntry {
    id: String,
    priority: TaskPriority,
    submitted_at: DateTime<Utc>,
}

struct RunningEntry {
    cancel: Arc<AtomicBool>,
}

/// Everything behind the registry mutex. Q ∪ R ∪ H is indexed by `tasks`.
#[derive(Default)]
struct MonitorState {
    queue: Vec<QueueEntry>,
    running: HashMap<String, RunningEntry>,
    history: VecDeque<String>,
    tasks: HashMap<String, ExecutionTask>,
    callbacks: HashMap<String, TaskCallbacks>,
    /// (completed_at, success) samples for the rolling 24h success rate.
    completions: VecDeque<(DateTime<Utc>, bool)>,
    /// Per-platform (runs, total wall ms) for completed executions.
    wall_by_platform: HashMap<Platform, (u64, u64)>,
    terminal_counts: HashMap<TaskState, u64>,
    submitted_total: u64,
}

struct MonitorInner {
    config: MonitorConfig,
    safety: Arc<SafetyValidator>,
    executor: Arc<ScriptExecutor>,
    state: Mutex<MonitorState>,
}

/// Handle to the scheduler. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionMonitor {
    inner: Arc<MonitorInner>,
}

impl ExecutionMonitor {
    pub fn new(
        config: MonitorConfig,
        safety: Arc<SafetyValidator>,
        executor: Arc<ScriptExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                config,
                safety,
                executor,
                state: Mutex::new(MonitorState::default()),
            }),
        }
    }

    /// Spawn the idle ticker that keeps the queue draining even when no
    /// submit or completion event arrives.
    pub fn spawn_idle_ticker(&self) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        let period = std::time::Duration::from_millis(self.inner.config.idle_tick_ms.max(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                monitor.tick();
            }
        })
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Validate, safety-screen, and enqueue a request. A safety denial
    /// creates the task directly in `failed` with `policyDenied`.
    pub fn submit(
        &self,
        request: ExecutionRequest,
        priority: TaskPriority,
        callbacks: TaskCallbacks,
    ) -> Result<String> {
        self.validate_request(&request)?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let report =
            self.inner
                .safety
                .evaluate(&request.script, request.platform, request.policy);
        if report.decision == SafetyDecision::Deny {
            let citation = report
                .matched_rule
                .as_ref()
                .map(|rule| {
                    format!(
                        "denied by rule {} ({}); pattern: {}",
                        rule.rule_id, rule.message, rule.pattern
                    )
                })
                .unwrap_or_else(|| "denied by policy".to_string());
            tracing::warn!(task = %id, policy = %request.policy, %citation, "Submission denied");

            let task = ExecutionTask {
                id: id.clone(),
                submitted_at: now,
                started_at: None,
                completed_at: Some(now),
                request,
                priority,
                state: TaskState::Failed,
                result: Some(TaskResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: citation,
                    error_kind: Some(TaskErrorKind::PolicyDenied),
                }),
                metrics: TaskMetrics::default(),
            };

            let (snapshot, task_callbacks) = {
                let mut state = self.lock_state();
                state.submitted_total += 1;
                *state.terminal_counts.entry(TaskState::Failed).or_default() += 1;
                state.completions.push_back((now, false));
                state.tasks.insert(id.clone(), task.clone());
                state.history.push_back(id.clone());
                Self::enforce_history_cap(&mut state, self.inner.config.history_max);
                (task, callbacks)
            };
            if let Some(handler) = &task_callbacks.on_complete {
                handler(&snapshot);
            }
            return Ok(id);
        }

        let task = ExecutionTask {
            id: id.clone(),
            submitted_at: now,
            started_at: None,
            completed_at: None,
            request,
            priority,
            state: TaskState::Queued,
            result: None,
            metrics: TaskMetrics::default(),
        };

        let snapshot = {
            let mut state = self.lock_state();
            state.submitted_total += 1;
            state.queue.push(QueueEntry {
                id: id.clone(),
                priority,
                submitted_at: now,
            });
            state.tasks.insert(id.clone(), task.clone());
            state.callbacks.insert(id.clone(), callbacks.clone());
            task
        };

        tracing::info!(task = %id, priority = ?priority, "Task queued");
        if let Some(handler) = &callbacks.on_state_change {
            handler(&snapshot);
        }
        self.tick();
        Ok(id)
    }

    fn validate_request(&self, request: &ExecutionRequest) -> Result<()> {
        if request.script.trim().is_empty() {
            return Err(Error::validation("script must not be empty"));
        }
        let timeout = request.timeout_seconds;
        if timeout < 1 || timeout > self.inner.config.max_timeout_seconds {
            return Err(Error::validation(format!(
                "timeoutSeconds must be within [1, {}]",
                self.inner.config.max_timeout_seconds
            )));
        }
        if self.inner.config.require_confirm_token_for_elevated
            && request.policy == ExecutionPolicy::Elevated
            && request.confirm_token.is_none()
        {
            return Err(Error::validation(
                "elevated policy requires a confirm token",
            ));
        }
        Ok(())
    }

    // =========================================================================
    // Scheduler tick
    // =========================================================================

    /// Promote queued tasks while capacity allows. Invoked on submit, on
    /// terminal transitions, and from the idle ticker.
    pub fn tick(&self) {
        loop {
            let launched = {
                let mut state = self.lock_state();
                if state.running.len() >= self.inner.config.max_concurrent {
                    None
                } else {
                    self.pop_next(&mut state)
                }
            };

            let Some((snapshot, cancel)) = launched else {
                break;
            };

            let state_change = self.callbacks_for(&snapshot.id).on_state_change;
            if let Some(handler) = &state_change {
                handler(&snapshot);
            }

            let monitor = self.clone();
            let id = snapshot.id.clone();
            let request = snapshot.request.clone();
            tokio::spawn(async move {
                monitor.run_task(id, request, cancel).await;
            });
        }
    }

    /// Pop the best queued entry: effective priority desc, submit time
    /// asc. A queued low/normal task older than the aging threshold is
    /// considered one level higher so it cannot starve.
    fn pop_next(
        &self,
        state: &mut MonitorState,
    ) -> Option<(ExecutionTask, Arc<AtomicBool>)> {
        if state.queue.is_empty() {
            return None;
        }
        let now = Utc::now();
        let aging = ChronoDuration::seconds(self.inner.config.aging_threshold_seconds as i64);

        let mut best: usize = 0;
        for index in 1..state.queue.len() {
            let challenger = &state.queue[index];
            let incumbent = &state.queue[best];
            let challenger_priority = effective_priority(challenger, now, aging);
            let incumbent_priority = effective_priority(incumbent, now, aging);
            let wins = challenger_priority > incumbent_priority
                || (challenger_priority == incumbent_priority
                    && challenger.submitted_at < incumbent.submitted_at);
            if wins {
                best = index;
            }
        }

        let entry = state.queue.remove(best);
        let task = state.tasks.get_mut(&entry.id)?;
        task.state = TaskState::Preparing;
        task.started_at = Some(now);
        let snapshot = task.clone();

        let cancel = Arc::new(AtomicBool::new(false));
        state.running.insert(
            entry.id,
            RunningEntry {
                cancel: cancel.clone(),
            },
        );
        Some((snapshot, cancel))
    }

    async fn run_task(&self, id: String, request: ExecutionRequest, cancel: Arc<AtomicBool>) {
        match self.inner.executor.start(&request, cancel).await {
            Err(error) => {
                let kind = match &error {
                    ExecutorError::Materialize(_) | ExecutorError::Spawn { .. } => {
                        TaskErrorKind::SpawnFailed
                    }
                };
                tracing::error!(task = %id, %error, "Task failed to launch");
                self.finalize(
                    &id,
                    ExecutionOutcome {
                        exit_code: None,
                        stdout: String::new(),
                        stderr: error.to_string(),
                        error_kind: Some(kind),
                        metrics: TaskMetrics::default(),
                    },
                );
            }
            Ok(running) => {
                // the interpreter process exists: preparing -> running
                let snapshot = {
                    let mut state = self.lock_state();
                    match state.tasks.get_mut(&id) {
                        Some(task) => {
                            task.state = TaskState::Running;
                            Some(task.clone())
                        }
                        None => None,
                    }
                };
                if let Some(snapshot) = snapshot {
                    if let Some(handler) = &self.callbacks_for(&id).on_state_change {
                        handler(&snapshot);
                    }
                }

                let outcome = running.wait().await;
                self.finalize(&id, outcome);
            }
        }
    }

    /// Terminal bookkeeping: record the outcome, move the task from the
    /// running set into history, update aggregates, fire callbacks, and
    /// re-tick.
    fn finalize(&self, id: &str, outcome: ExecutionOutcome) {
        let now = Utc::now();
        let final_state = match outcome.error_kind {
            None => TaskState::Completed,
            Some(TaskErrorKind::Cancelled) => TaskState::Cancelled,
            // timeouts terminate as failed with errorKind timedOut
            Some(_) => TaskState::Failed,
        };

        let (snapshot, callbacks) = {
            let mut state = self.lock_state();
            state.running.remove(id);

            let Some(task) = state.tasks.get_mut(id) else {
                tracing::error!(task = %id, "Finalize for unknown task");
                return;
            };
            if task.state.is_terminal() {
                // terminal states are final; nothing to do
                return;
            }
            task.state = final_state;
            task.completed_at = Some(now);
            task.metrics = outcome.metrics.clone();
            task.result = Some(TaskResult {
                exit_code: outcome.exit_code,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                error_kind: outcome.error_kind,
            });
            let snapshot = task.clone();

            *state.terminal_counts.entry(final_state).or_default() += 1;
            state
                .completions
                .push_back((now, final_state == TaskState::Completed));
            prune_completions(&mut state.completions, now);
            if final_state == TaskState::Completed {
                let entry = state
                    .wall_by_platform
                    .entry(snapshot.request.platform)
                    .or_insert((0, 0));
                entry.0 += 1;
                entry.1 += snapshot.metrics.wall_time_ms;
            }

            state.history.push_back(id.to_string());
            Self::enforce_history_cap(&mut state, self.inner.config.history_max);

            let callbacks = state.callbacks.get(id).cloned().unwrap_or_default();
            (snapshot, callbacks)
        };

        tracing::info!(
            task = %id,
            state = ?snapshot.state,
            error_kind = ?snapshot.result.as_ref().and_then(|r| r.error_kind),
            wall_time_ms = snapshot.metrics.wall_time_ms,
            "Task terminal"
        );

        if let Some(handler) = &callbacks.on_state_change {
            handler(&snapshot);
        }
        if let Some(handler) = &callbacks.on_complete {
            handler(&snapshot);
        }
        self.tick();
    }

    fn enforce_history_cap(state: &mut MonitorState, cap: usize) {
        while state.history.len() > cap.max(1) {
            if let Some(evicted) = state.history.pop_front() {
                state.tasks.remove(&evicted);
                state.callbacks.remove(&evicted);
            }
        }
    }

    // =========================================================================
    // Cancellation & queries
    // =========================================================================

    /// Cancel a task. Queued tasks terminate immediately; running tasks
    /// converge through the executor's terminate-then-kill sequence.
    /// Idempotent.
    pub fn cancel(&self, id: &str) -> CancelOutcome {
        let (outcome, fired) = {
            let mut state = self.lock_state();
            let Some(task) = state.tasks.get(id) else {
                return CancelOutcome::NotFound;
            };
            if task.state.is_terminal() {
                return CancelOutcome::AlreadyTerminal;
            }

            if let Some(position) = state.queue.iter().position(|entry| entry.id == id) {
                state.queue.remove(position);
                let now = Utc::now();
                let task = state.tasks.get_mut(id).expect("indexed task must exist");
                task.state = TaskState::Cancelled;
                task.completed_at = Some(now);
                task.result = Some(TaskResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: "cancelled before start".to_string(),
                    error_kind: Some(TaskErrorKind::Cancelled),
                });
                let snapshot = task.clone();
                *state
                    .terminal_counts
                    .entry(TaskState::Cancelled)
                    .or_default() += 1;
                state.history.push_back(id.to_string());
                Self::enforce_history_cap(&mut state, self.inner.config.history_max);
                let callbacks = state.callbacks.get(id).cloned().unwrap_or_default();
                (CancelOutcome::Cancelled, Some((snapshot, callbacks)))
            } else {
                if let Some(running) = state.running.get(id) {
                    running.cancel.store(true, Ordering::Relaxed);
                }
                tracing::info!(task = %id, "Cancellation requested");
                (CancelOutcome::Cancelled, None)
            }
        };

        if let Some((snapshot, callbacks)) = fired {
            if let Some(handler) = &callbacks.on_state_change {
                handler(&snapshot);
            }
            if let Some(handler) = &callbacks.on_complete {
                handler(&snapshot);
            }
        }
        outcome
    }

    /// Snapshot of one task.
    pub fn get(&self, id: &str) -> Option<ExecutionTask> {
        self.lock_state().tasks.get(id).cloned()
    }

    /// All known tasks matching the filter, newest first.
    pub fn list(&self, filter: &TaskFilter) -> Vec<ExecutionTask> {
        let state = self.lock_state();
        let mut tasks: Vec<ExecutionTask> = state
            .tasks
            .values()
            .filter(|task| filter.state.is_none_or(|s| task.state == s))
            .filter(|task| filter.platform.is_none_or(|p| task.request.platform == p))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        tasks
    }

    /// Terminal tasks, newest first, with paging.
    pub fn history(
        &self,
        limit: usize,
        offset: usize,
        state_filter: Option<TaskState>,
    ) -> Vec<ExecutionTask> {
        let state = self.lock_state();
        state
            .history
            .iter()
            .rev()
            .filter_map(|id| state.tasks.get(id))
            .filter(|task| state_filter.is_none_or(|s| task.state == s))
            .skip(offset)
            .take(limit.max(1))
            .cloned()
            .collect()
    }

    /// Tasks currently holding a concurrency slot.
    pub fn running(&self) -> Vec<ExecutionTask> {
        let state = self.lock_state();
        let mut tasks: Vec<ExecutionTask> = state
            .running
            .keys()
            .filter_map(|id| state.tasks.get(id))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        tasks
    }

    /// Aggregate counters; constant-time from maintained state.
    pub fn statistics(&self) -> MonitorStatistics {
        let mut state = self.lock_state();
        let now = Utc::now();
        prune_completions(&mut state.completions, now);
        stats::build(&state, now)
    }

    fn callbacks_for(&self, id: &str) -> TaskCallbacks {
        self.lock_state()
            .callbacks
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MonitorState> {
        // a poisoned registry would mean a panic inside a shuffle-only
        // critical section; recover the data rather than wedging the server
        match self.inner.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn effective_priority(
    entry: &QueueEntry,
    now: DateTime<Utc>,
    aging_threshold: ChronoDuration,
) -> TaskPriority {
    if now - entry.submitted_at >= aging_threshold {
        entry.priority.bumped()
    } else {
        entry.priority
    }
}

fn prune_completions(completions: &mut VecDeque<(DateTime<Utc>, bool)>, now: DateTime<Utc>) {
    let cutoff = now - ChronoDuration::hours(24);
    while completions.front().is_some_and(|(at, _)| *at < cutoff) {
        completions.pop_front();
    }
}

#[cfg(test)]
mod tests;
