//! The in-memory task queue and its state machine.
//!
//! All mutation goes through methods that take the single store-wide write
//! lock, which is what makes claim/confirm/report atomic with respect to
//! each other and to the timeout sweep. Expected load is tens of workers,
//! so one coarse lock beats per-record locking here.
//!
//! Every method takes `now` explicitly so tests drive the clock instead of
//! sleeping through timeout windows.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use shutterq_core::error::CoreError;
use shutterq_core::protocol::StateCounts;
use shutterq_core::task::{Outcome, Task, TaskPayload, TaskResult, TaskState};
use shutterq_core::types::{TaskId, Timestamp};

/// What one sweep pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: usize,
    pub failed: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requeued == 0 && self.failed == 0
    }
}

/// Owner of every task record in the system. Handlers and the sweeper hold
/// this behind an `Arc`; everything handed out is a clone of the record at
/// the time of the call.
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    /// Ceiling on tasks in a non-terminal state. Terminal tasks awaiting
    /// eviction do not count against it.
    capacity: usize,
    /// Claim attempts a task may consume before a failure becomes terminal.
    max_attempts: u32,
}

impl TaskStore {
    pub fn new(capacity: usize, max_attempts: u32) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            capacity,
            max_attempts,
        }
    }

    /// Enqueue a new task in `Pending`.
    pub async fn submit(&self, payload: TaskPayload, now: Timestamp) -> Result<Task, CoreError> {
        self.submit_with_id(TaskId::now_v7(), payload, now).await
    }

    /// Enqueue a task under a caller-minted id. Upload submissions mint the
    /// id before storing the input files, so a task is never claimable ahead
    /// of its artifacts.
    pub async fn submit_with_id(
        &self,
        id: TaskId,
        payload: TaskPayload,
        now: Timestamp,
    ) -> Result<Task, CoreError> {
        let mut tasks = self.tasks.write().await;

        if tasks.contains_key(&id) {
            return Err(CoreError::Internal(format!("task id {id} already in use")));
        }
        let in_flight = tasks.values().filter(|t| !t.state.is_terminal()).count();
        if in_flight >= self.capacity {
            return Err(CoreError::Capacity(format!(
                "queue holds {in_flight} unfinished tasks, capacity is {}",
                self.capacity
            )));
        }

        let task = Task::with_id(id, payload, now);
        info!("Task {} submitted", task.id);
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    /// Atomically hand the oldest pending task to `client_id`, moving it to
    /// `Reading` and consuming one attempt. Returns `None` on an empty
    /// queue (the normal idle-poll answer).
    pub async fn claim_next(
        &self,
        client_id: &str,
        now: Timestamp,
    ) -> Result<Option<Task>, CoreError> {
        let mut tasks = self.tasks.write().await;

        let next_id = tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|t| t.id);

        let Some(id) = next_id else {
            debug!("Empty poll from {client_id}");
            return Ok(None);
        };

        // Lookup cannot fail: the id came from the map under the same lock.
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| CoreError::Internal(format!("claimed task {id} vanished")))?;
        task.transition(TaskState::Reading, now)?;
        task.assigned_client_id = Some(client_id.to_string());
        task.attempt_count += 1;

        info!(
            "Task {} claimed by {} (attempt {}/{})",
            task.id, client_id, task.attempt_count, self.max_attempts
        );
        Ok(Some(task.clone()))
    }

    /// A worker's confirmation that it pulled the inputs and is starting
    /// local processing. Only valid while the worker still owns the task in
    /// `Reading`; a stale confirmation after a sweep requeued the task is
    /// rejected, never absorbed.
    pub async fn confirm_processing(
        &self,
        task_id: TaskId,
        client_id: &str,
        now: Timestamp,
    ) -> Result<Task, CoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(CoreError::NotFound {
            entity: "task",
            id: task_id.to_string(),
        })?;

        if task.state != TaskState::Reading || !task.is_assigned_to(client_id) {
            return Err(stale_call_error("confirm", task, client_id));
        }

        task.transition(TaskState::Processing, now)?;
        info!("Task {} processing started by {}", task.id, client_id);
        Ok(task.clone())
    }

    /// A worker's final report. Success completes the task; failure either
    /// requeues it (budget remaining) or fails it terminally.
    pub async fn report_result(
        &self,
        task_id: TaskId,
        client_id: &str,
        outcome: Outcome,
        now: Timestamp,
    ) -> Result<Task, CoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id).ok_or(CoreError::NotFound {
            entity: "task",
            id: task_id.to_string(),
        })?;

        if task.state != TaskState::Processing || !task.is_assigned_to(client_id) {
            return Err(stale_call_error("report", task, client_id));
        }

        match outcome {
            Outcome::Success {
                result_file,
                elapsed_secs,
            } => {
                task.transition(TaskState::Completed, now)?;
                task.assigned_client_id = None;
                task.result = Some(TaskResult {
                    success: true,
                    result_file,
                    error: None,
                    elapsed_secs,
                    completed_at: now,
                });
                info!("Task {} completed by {}", task.id, client_id);
            }
            Outcome::Failure {
                error,
                elapsed_secs,
            } => {
                if task.attempt_count < self.max_attempts {
                    task.transition(TaskState::Pending, now)?;
                    task.assigned_client_id = None;
                    warn!(
                        "Task {} failed on {} (attempt {}/{}), requeued: {}",
                        task.id, client_id, task.attempt_count, self.max_attempts, error
                    );
                } else {
                    task.transition(TaskState::Failed, now)?;
                    task.assigned_client_id = None;
                    task.result = Some(TaskResult {
                        success: false,
                        result_file: None,
                        error: Some(error.clone()),
                        elapsed_secs,
                        completed_at: now,
                    });
                    warn!(
                        "Task {} failed terminally after {} attempts: {}",
                        task.id, task.attempt_count, error
                    );
                }
            }
        }

        Ok(task.clone())
    }

    /// Reclaim tasks stuck in `Reading` or `Processing` past their window,
    /// plus any task held by a client in `stale_clients` regardless of
    /// window. Requeues while budget remains, fails terminally otherwise.
    pub async fn sweep(
        &self,
        now: Timestamp,
        reading_timeout: Duration,
        processing_timeout: Duration,
        stale_clients: &HashSet<String>,
    ) -> SweepReport {
        let mut tasks = self.tasks.write().await;
        let mut report = SweepReport::default();

        for task in tasks.values_mut() {
            let window = match task.state {
                TaskState::Reading => reading_timeout,
                TaskState::Processing => processing_timeout,
                _ => continue,
            };

            let owner_stale = task
                .assigned_client_id
                .as_ref()
                .is_some_and(|c| stale_clients.contains(c));
            let expired = task
                .state_age(now)
                .to_std()
                .map(|age| age > window)
                .unwrap_or(false);
            if !expired && !owner_stale {
                continue;
            }

            let why = if owner_stale {
                "client stale"
            } else {
                "state timeout"
            };
            let owner = task.assigned_client_id.take().unwrap_or_default();
            let from = task.state;

            if task.attempt_count < self.max_attempts {
                // Edges from Reading/Processing back to Pending always exist.
                if task.transition(TaskState::Pending, now).is_ok() {
                    warn!(
                        "Task {} reclaimed from {} ({why} in {from}), requeued (attempt {}/{})",
                        task.id, owner, task.attempt_count, self.max_attempts
                    );
                    report.requeued += 1;
                }
            } else if task.transition(TaskState::Failed, now).is_ok() {
                task.result = Some(TaskResult {
                    success: false,
                    result_file: None,
                    error: Some(format!(
                        "reclaimed by sweep ({why}) after {} attempts",
                        task.attempt_count
                    )),
                    elapsed_secs: None,
                    completed_at: now,
                });
                warn!(
                    "Task {} reclaimed from {} ({why}), no retry budget left, failed",
                    task.id, owner
                );
                report.failed += 1;
            }
        }

        report
    }

    /// Drop terminal tasks older than `retention`, returning their ids so
    /// the caller can clean up exchange files.
    pub async fn evict_terminal(&self, now: Timestamp, retention: Duration) -> Vec<TaskId> {
        let mut tasks = self.tasks.write().await;
        let expired: Vec<TaskId> = tasks
            .values()
            .filter(|t| {
                t.state.is_terminal()
                    && t.state_age(now)
                        .to_std()
                        .map(|age| age > retention)
                        .unwrap_or(false)
            })
            .map(|t| t.id)
            .collect();

        for id in &expired {
            tasks.remove(id);
            debug!("Task {id} evicted after retention window");
        }
        expired
    }

    pub async fn get(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    /// Queue depth per state, for stats and health reporting.
    pub async fn counts(&self) -> StateCounts {
        let tasks = self.tasks.read().await;
        let mut counts = StateCounts::default();
        for task in tasks.values() {
            match task.state {
                TaskState::Pending => counts.pending += 1,
                TaskState::Reading => counts.reading += 1,
                TaskState::Processing => counts.processing += 1,
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// Uniform rejection for confirms/reports that lost a race: wrong state,
/// reassigned task, or an owner mismatch. Mentions the current state so the
/// worker's log tells the whole story.
fn stale_call_error(call: &str, task: &Task, client_id: &str) -> CoreError {
    CoreError::InvalidTransition(format!(
        "{call} by {client_id} rejected: task {} is {} (owner: {})",
        task.id,
        task.state,
        task.assigned_client_id.as_deref().unwrap_or("none")
    ))
}
