//! Task supervision.
//!
//! Owns the task state machine and the process-wide (but explicitly owned,
//! never global) registry of in-flight tasks. The supervisor runs a task body
//! under a hard wall-clock deadline, exposes cooperative cancellation backed
//! by an out-of-band browser kill, and keeps terminal records queryable for a
//! bounded retention window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::driver::{BrowserAgent, BrowserSession};

/// Execution status of a tracked task. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Cancelled,
    TimedOut,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Runtime record for one task execution.
struct TaskRecord {
    status: TaskStatus,
    cancel_token: CancellationToken,

    /// Live browser resource, for out-of-band termination
    session: Option<Arc<dyn BrowserSession>>,

    /// Agent handle, for non-blocking partial-result snapshots
    agent: Option<Arc<dyn BrowserAgent>>,

    /// Snapshot captured at cancellation/timeout
    partial_result: Option<String>,
}

/// Handle returned by [`TaskSupervisor::register`].
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub task_id: String,
    cancel_token: CancellationToken,
}

impl TaskHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled { partial_result: Option<String> },
    /// Unknown id, or the task already reached a terminal state
    NotFound,
}

/// Outcome of running a task body under a deadline.
#[derive(Debug)]
pub enum DeadlineOutcome<T> {
    Finished(T),
    DeadlineExceeded,
    /// The execution body itself died (panic). Surfaced as a generic failure.
    Crashed(String),
}

/// Explicitly owned, lock-guarded task registry plus the state-machine
/// operations over it.
#[derive(Clone)]
pub struct TaskSupervisor {
    tasks: Arc<RwLock<HashMap<String, TaskRecord>>>,
    retention: Duration,
}

impl TaskSupervisor {
    pub fn new(retention: Duration) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Register a task before running it. The record starts in `Running`.
    pub async fn register(&self, task_id: &str) -> TaskHandle {
        let cancel_token = CancellationToken::new();
        let record = TaskRecord {
            status: TaskStatus::Running,
            cancel_token: cancel_token.clone(),
            session: None,
            agent: None,
            partial_result: None,
        };

        let mut tasks = self.tasks.write().await;
        if tasks.insert(task_id.to_string(), record).is_some() {
            tracing::warn!("Replacing existing task record (task_id={})", task_id);
        }

        TaskHandle {
            task_id: task_id.to_string(),
            cancel_token,
        }
    }

    /// Attach the live browser resource so cancellation can terminate it.
    pub async fn attach_session(&self, task_id: &str, session: Arc<dyn BrowserSession>) {
        if let Some(record) = self.tasks.write().await.get_mut(task_id) {
            record.session = Some(session);
        }
    }

    /// Attach the agent handle so partial results stay queryable.
    pub async fn attach_agent(&self, task_id: &str, agent: Arc<dyn BrowserAgent>) {
        if let Some(record) = self.tasks.write().await.get_mut(task_id) {
            record.agent = Some(agent);
        }
    }

    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.read().await.get(task_id).map(|r| r.status)
    }

    /// Whether a cancellation already landed for this task.
    pub async fn is_cancelled(&self, task_id: &str) -> bool {
        matches!(self.status(task_id).await, Some(TaskStatus::Cancelled))
    }

    /// Run `fut` with a hard wall-clock deadline.
    ///
    /// The body is spawned so that on deadline expiry we can return
    /// immediately while the abandoned execution keeps running long enough to
    /// release its resources; it is signalled to stop via the cancel token
    /// and an out-of-band browser kill, never awaited.
    pub async fn run_under_deadline<T, F>(
        &self,
        handle: &TaskHandle,
        deadline: Duration,
        fut: F,
    ) -> DeadlineOutcome<T>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let join = tokio::spawn(fut);

        match tokio::time::timeout(deadline, join).await {
            Ok(Ok(value)) => DeadlineOutcome::Finished(value),
            Ok(Err(join_err)) => {
                tracing::error!(
                    "Task execution body died (task_id={}): {}",
                    handle.task_id,
                    join_err
                );
                self.mark_terminal(&handle.task_id, TaskStatus::Failed).await;
                DeadlineOutcome::Crashed(join_err.to_string())
            }
            Err(_elapsed) => {
                tracing::warn!("Task deadline expired (task_id={})", handle.task_id);
                self.expire(&handle.task_id).await;
                DeadlineOutcome::DeadlineExceeded
            }
        }
    }

    /// Cancel a running task: flip the state, snapshot whatever partial
    /// result the agent has, signal the token, and terminate the browser.
    ///
    /// Cancelling an unknown or already-terminal task is a safe no-op
    /// reported as `NotFound`.
    pub async fn cancel(&self, task_id: &str) -> CancelOutcome {
        let session = {
            let mut tasks = self.tasks.write().await;
            let Some(record) = tasks.get_mut(task_id) else {
                return CancelOutcome::NotFound;
            };
            if record.status.is_terminal() {
                return CancelOutcome::NotFound;
            }

            record.status = TaskStatus::Cancelled;
            record.partial_result = record.agent.as_ref().and_then(|a| a.current_state());
            record.cancel_token.cancel();
            record.session.clone()
        };

        if let Some(session) = session {
            if let Err(e) = session.kill().await {
                tracing::warn!("Failed to kill browser (task_id={}): {}", task_id, e);
            } else {
                tracing::info!("Sent termination signal to browser (task_id={})", task_id);
            }
        }

        self.schedule_removal(task_id);

        let partial_result = self.get_partial_result(task_id).await;
        CancelOutcome::Cancelled { partial_result }
    }

    /// Snapshot captured at cancellation/timeout, or the agent's last-known
    /// state. Never blocks on the execution itself.
    pub async fn get_partial_result(&self, task_id: &str) -> Option<String> {
        let tasks = self.tasks.read().await;
        let record = tasks.get(task_id)?;
        record
            .partial_result
            .clone()
            .or_else(|| record.agent.as_ref().and_then(|a| a.current_state()))
    }

    /// Transition a running task into a terminal state. A task that already
    /// reached a terminal state keeps it; losing this race is normal when
    /// cancellation and completion arrive together.
    pub async fn mark_terminal(&self, task_id: &str, status: TaskStatus) {
        debug_assert!(status.is_terminal());
        {
            let mut tasks = self.tasks.write().await;
            let Some(record) = tasks.get_mut(task_id) else {
                return;
            };
            if record.status.is_terminal() {
                return;
            }
            record.status = status;
        }
        self.schedule_removal(task_id);
    }

    /// Deadline-expiry path: snapshot partial state, signal stop, kill the
    /// browser. The still-running execution body cleans itself up.
    async fn expire(&self, task_id: &str) {
        let session = {
            let mut tasks = self.tasks.write().await;
            let Some(record) = tasks.get_mut(task_id) else {
                return;
            };
            if record.status.is_terminal() {
                return;
            }
            record.status = TaskStatus::TimedOut;
            record.partial_result = record.agent.as_ref().and_then(|a| a.current_state());
            record.cancel_token.cancel();
            record.session.clone()
        };

        if let Some(session) = session {
            if let Err(e) = session.kill().await {
                tracing::warn!("Failed to kill browser after timeout (task_id={}): {}", task_id, e);
            }
        }

        self.schedule_removal(task_id);
    }

    /// Drop the record once the retention window passes. Records are only
    /// removed in a terminal state.
    fn schedule_removal(&self, task_id: &str) {
        let tasks = Arc::clone(&self.tasks);
        let retention = self.retention;
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let mut tasks = tasks.write().await;
            if tasks
                .get(&task_id)
                .is_some_and(|r| r.status.is_terminal())
            {
                tasks.remove(&task_id);
                tracing::debug!("Dropped terminal task record (task_id={})", task_id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{MockAgent, MockSession, StubHistory};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn supervisor() -> TaskSupervisor {
        TaskSupervisor::new(Duration::from_millis(50))
    }

    fn agent_with_state(state: &str) -> Arc<MockAgent> {
        Arc::new(MockAgent {
            history: StubHistory::default(),
            run_delay: None,
            state: Some(state.to_string()),
        })
    }

    #[tokio::test]
    async fn cancel_running_task_reports_partial_result() {
        let sup = supervisor();
        let handle = sup.register("task_1").await;
        let session = Arc::new(MockSession::default());
        sup.attach_session("task_1", session.clone()).await;
        sup.attach_agent("task_1", agent_with_state("step 3 of 10")).await;

        let outcome = sup.cancel("task_1").await;
        assert_eq!(
            outcome,
            CancelOutcome::Cancelled {
                partial_result: Some("step 3 of 10".to_string())
            }
        );
        assert!(handle.cancel_token().is_cancelled());
        assert!(session.killed.load(Ordering::SeqCst));
        assert_eq!(sup.status("task_1").await, Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_safe_on_unknown_ids() {
        let sup = supervisor();
        sup.register("task_1").await;

        assert!(matches!(
            sup.cancel("task_1").await,
            CancelOutcome::Cancelled { .. }
        ));
        assert_eq!(sup.cancel("task_1").await, CancelOutcome::NotFound);
        assert_eq!(sup.cancel("no_such_task").await, CancelOutcome::NotFound);
    }

    #[tokio::test]
    async fn cancel_after_completion_is_not_found() {
        let sup = supervisor();
        sup.register("task_1").await;
        sup.mark_terminal("task_1", TaskStatus::Completed).await;

        assert_eq!(sup.cancel("task_1").await, CancelOutcome::NotFound);
        assert_eq!(sup.status("task_1").await, Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn terminal_states_are_final() {
        let sup = supervisor();
        sup.register("task_1").await;
        sup.cancel("task_1").await;
        sup.mark_terminal("task_1", TaskStatus::Completed).await;
        assert_eq!(sup.status("task_1").await, Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn deadline_allows_fast_executions() {
        let sup = supervisor();
        let handle = sup.register("task_1").await;

        let outcome = sup
            .run_under_deadline(&handle, Duration::from_secs(5), async { 42 })
            .await;
        assert!(matches!(outcome, DeadlineOutcome::Finished(42)));
    }

    #[tokio::test]
    async fn deadline_expiry_returns_immediately_and_kills_browser() {
        let sup = supervisor();
        let handle = sup.register("task_1").await;
        let session = Arc::new(MockSession::default());
        sup.attach_session("task_1", session.clone()).await;
        sup.attach_agent("task_1", agent_with_state("mid-flight")).await;

        let cleanup_ran = Arc::new(AtomicBool::new(false));
        let cleanup_flag = cleanup_ran.clone();
        let token = handle.cancel_token();

        let outcome = sup
            .run_under_deadline(&handle, Duration::from_millis(30), async move {
                // Hung execution that only reacts to the stop signal
                token.cancelled().await;
                cleanup_flag.store(true, Ordering::SeqCst);
            })
            .await;

        assert!(matches!(outcome, DeadlineOutcome::DeadlineExceeded));
        assert_eq!(sup.status("task_1").await, Some(TaskStatus::TimedOut));
        assert!(session.killed.load(Ordering::SeqCst));
        assert_eq!(
            sup.get_partial_result("task_1").await,
            Some("mid-flight".to_string())
        );

        // The abandoned execution still runs its own cleanup asynchronously
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cleanup_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn crashed_execution_surfaces_as_failed() {
        let sup = supervisor();
        let handle = sup.register("task_1").await;

        let outcome: DeadlineOutcome<()> = sup
            .run_under_deadline(&handle, Duration::from_secs(5), async {
                panic!("boom");
            })
            .await;
        assert!(matches!(outcome, DeadlineOutcome::Crashed(_)));
        assert_eq!(sup.status("task_1").await, Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn terminal_records_are_swept_after_retention() {
        let sup = supervisor();
        sup.register("task_1").await;
        sup.mark_terminal("task_1", TaskStatus::Completed).await;

        assert_eq!(sup.status("task_1").await, Some(TaskStatus::Completed));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(sup.status("task_1").await, None);
    }

    #[tokio::test]
    async fn running_records_survive_the_sweep() {
        let sup = supervisor();
        sup.register("task_1").await;
        // A stray sweep must not remove a running record
        sup.schedule_removal("task_1");
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(sup.status("task_1").await, Some(TaskStatus::Running));
    }
}
