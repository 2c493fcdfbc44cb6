//! Dispatch loop: one heap, one armed timer, one task of control.
//!
//! All heap mutation happens inside [`ReminderEngine::run`]. Callers talk to
//! it through an [`EngineHandle`], whose requests are queued on an mpsc
//! channel and served one at a time. Task executions run in spawned tasks
//! and report back over a second channel, so a slow port never delays the
//! next timer.
//!
//! The engine owns each task's failure count. The stored count is only a
//! lower bound, since the port that persists it may be the one failing.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinError;
use tokio::time::{Instant, Sleep, sleep_until};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{PortError, SchedulerError};
use crate::heap::TimerHeap;
use crate::ports::{ExecutionPort, NotificationPort, TaskLoadPort};
use crate::recurrence::next_occurrence;
use crate::types::{
    EngineState, EngineStatus, ExecutionOutcome, ExecutionStatus, ScheduledTask, TriggeredEvent,
};

/// Result of [`EngineHandle::add_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The task was queued.
    Scheduled,
    /// The id is already queued or executing; nothing changed.
    AlreadyScheduled,
    /// The load port has no such task.
    NotFound,
    /// The task is disabled or no longer pending.
    Ineligible,
    /// The load port returned an error; see the logs.
    LoadFailed,
    /// The engine is not running.
    NotRunning,
}

/// Requests served by the engine actor.
enum EngineOp {
    Start {
        response: oneshot::Sender<()>,
    },
    Stop {
        response: oneshot::Sender<()>,
    },
    AddTask {
        id: String,
        response: oneshot::Sender<AddOutcome>,
    },
    RemoveTask {
        id: String,
        response: oneshot::Sender<bool>,
    },
    Status {
        response: oneshot::Sender<EngineStatus>,
    },
    Shutdown,
}

/// Where a known task id currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Queued,
    /// Popped and executing. `cancelled` suppresses re-insertion.
    ///
    /// Survives `stop()`, so a restart cannot dispatch the same id while
    /// the earlier run is still going.
    InFlight { cancelled: bool },
}

impl Presence {
    fn is_in_flight(&self) -> bool {
        matches!(self, Presence::InFlight { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TimerPurpose {
    Dispatch { task_id: String },
    Reload,
}

struct ArmedTimer {
    sleep: Pin<Box<Sleep>>,
    purpose: TimerPurpose,
}

/// What the engine should do with a task once its execution finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Recurring; `next_run_at` already advanced.
    Reschedule,
    Completed,
    /// Failed below the threshold; left for a later add or reload.
    Retry,
    Failed,
}

struct Completion {
    task: ScheduledTask,
    disposition: Disposition,
}

/// The reminder dispatch loop.
pub struct ReminderEngine {
    loader: Arc<dyn TaskLoadPort>,
    executor: Arc<dyn ExecutionPort>,
    notifier: Arc<dyn NotificationPort>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    heap: TimerHeap<ScheduledTask>,
    index: HashMap<String, Presence>,
    /// Consecutive failures per task id, cleared on success or removal.
    failures: HashMap<String, u32>,
    armed: Option<ArmedTimer>,
    state: EngineState,
    op_rx: mpsc::Receiver<EngineOp>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
}

impl ReminderEngine {
    /// Create a stopped engine wired to the given ports.
    ///
    /// Returns the engine and a handle for sending it requests. The engine
    /// does nothing until [`ReminderEngine::run`] is polled and
    /// [`EngineHandle::start`] is called.
    pub fn new(
        loader: Arc<dyn TaskLoadPort>,
        executor: Arc<dyn ExecutionPort>,
        notifier: Arc<dyn NotificationPort>,
        config: EngineConfig,
    ) -> Result<(Self, EngineHandle), SchedulerError> {
        config.validate()?;

        let (op_tx, op_rx) = mpsc::channel(config.command_buffer);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let engine = Self {
            loader,
            executor,
            notifier,
            clock: Arc::new(SystemClock),
            config,
            heap: TimerHeap::new(),
            index: HashMap::new(),
            failures: HashMap::new(),
            armed: None,
            state: EngineState::Stopped,
            op_rx,
            done_tx,
            done_rx,
        };
        Ok((engine, EngineHandle { op_tx }))
    }

    /// Replace the wall clock used for due-time comparisons.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the engine loop as a background task.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the engine loop.
    ///
    /// Serves requests, timer expirations and execution results until a
    /// shutdown request arrives or every handle is dropped.
    pub async fn run(mut self) {
        debug!("reminder engine loop started");

        loop {
            tokio::select! {
                op = self.op_rx.recv() => match op {
                    Some(EngineOp::Shutdown) | None => break,
                    Some(op) => self.handle_op(op).await,
                },
                Some(done) = self.done_rx.recv() => self.on_execution_finished(done),
                purpose = wait_for_timer(&mut self.armed) => {
                    self.armed = None;
                    self.on_timer_fired(purpose).await;
                }
            }
        }

        self.stop();
        debug!("reminder engine loop stopped");
    }

    async fn handle_op(&mut self, op: EngineOp) {
        match op {
            EngineOp::Start { response } => {
                self.start().await;
                let _ = response.send(());
            }
            EngineOp::Stop { response } => {
                self.stop();
                let _ = response.send(());
            }
            EngineOp::AddTask { id, response } => {
                let outcome = self.add_task(id).await;
                let _ = response.send(outcome);
            }
            EngineOp::RemoveTask { id, response } => {
                let removed = self.remove_task(&id);
                let _ = response.send(removed);
            }
            EngineOp::Status { response } => {
                let _ = response.send(self.status());
            }
            EngineOp::Shutdown => {}
        }
    }

    #[tracing::instrument(skip(self))]
    async fn start(&mut self) {
        if self.state == EngineState::Running {
            debug!("engine already running");
            return;
        }

        self.state = EngineState::Starting;
        let loaded = self.load_pending().await;
        self.state = EngineState::Running;
        info!(loaded, in_flight = self.in_flight(), "reminder engine running");

        self.schedule_next();
    }

    fn stop(&mut self) {
        self.disarm();
        self.heap.clear();
        self.index.retain(|_, presence| presence.is_in_flight());
        if self.state != EngineState::Stopped {
            info!("reminder engine stopped");
        }
        self.state = EngineState::Stopped;
    }

    #[tracing::instrument(skip(self))]
    async fn add_task(&mut self, id: String) -> AddOutcome {
        if self.state != EngineState::Running {
            return AddOutcome::NotRunning;
        }
        if self.index.contains_key(&id) {
            debug!(task_id = %id, "task already scheduled");
            return AddOutcome::AlreadyScheduled;
        }

        let task = match self.loader.load_task_by_id(&id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(task_id = %id, "task not found");
                return AddOutcome::NotFound;
            }
            Err(e) => {
                warn!(task_id = %id, error = %e, "failed to load task");
                return AddOutcome::LoadFailed;
            }
        };

        if !self.insert(task) {
            return AddOutcome::Ineligible;
        }

        info!(task_id = %id, "task added");
        self.schedule_next();
        AddOutcome::Scheduled
    }

    fn remove_task(&mut self, id: &str) -> bool {
        self.failures.remove(id);

        match self.index.get_mut(id) {
            Some(Presence::InFlight { cancelled }) => {
                *cancelled = true;
                info!(task_id = %id, "task is executing; cancelled future runs");
                return true;
            }
            Some(Presence::Queued) => {}
            None => return false,
        }

        let was_armed = self.armed_task_id() == Some(id);
        let Some(task) = self.heap.take_where(|task| task.id == id) else {
            return false;
        };
        self.index.remove(id);
        info!(task_id = %id, next_run_at = %task.next_run_at, "task removed");

        if was_armed {
            self.schedule_next();
        }
        true
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state,
            running: self.state == EngineState::Running,
            queue_size: self.heap.len(),
            next_execution_time: self.heap.peek().map(|entry| entry.value.next_run_at),
            queued_ids: self
                .heap
                .to_ordered_snapshot()
                .into_iter()
                .map(|task| task.id.clone())
                .collect(),
            in_flight: self.in_flight(),
        }
    }

    fn in_flight(&self) -> usize {
        self.index.values().filter(|p| p.is_in_flight()).count()
    }

    /// Pull every pending task from the load port into the heap.
    ///
    /// Ids already queued or in flight are skipped. Returns how many tasks
    /// were added.
    async fn load_pending(&mut self) -> usize {
        match self.loader.load_pending_tasks().await {
            Ok(tasks) => {
                let mut added = 0;
                for task in tasks {
                    if self.insert(task) {
                        added += 1;
                    }
                }
                added
            }
            Err(e) => {
                warn!(error = %e, "failed to load pending tasks");
                0
            }
        }
    }

    fn insert(&mut self, mut task: ScheduledTask) -> bool {
        if !task.is_schedulable() {
            debug!(task_id = %task.id, status = ?task.status, enabled = task.enabled, "skipping unschedulable task");
            return false;
        }
        if self.index.contains_key(&task.id) {
            return false;
        }
        if let Some(&failures) = self.failures.get(&task.id) {
            if failures >= self.config.failure_threshold {
                debug!(task_id = %task.id, failures, "skipping task with exhausted failure budget");
                return false;
            }
            task.failure_count = task.failure_count.max(failures);
        }

        self.index.insert(task.id.clone(), Presence::Queued);
        let priority = task.heap_priority();
        self.heap.enqueue(task, priority);
        true
    }

    /// Dispatch everything that is due, then arm a timer for what remains.
    fn schedule_next(&mut self) {
        self.disarm();
        if self.state != EngineState::Running {
            return;
        }

        loop {
            let Some((priority, task_id)) = self
                .heap
                .peek()
                .map(|entry| (entry.priority, entry.value.id.clone()))
            else {
                debug!(
                    delay_ms = self.config.fallback_reload_interval.as_millis() as u64,
                    "queue empty, arming reload timer"
                );
                self.arm(self.config.fallback_reload_interval, TimerPurpose::Reload);
                return;
            };

            let delay_ms = priority.saturating_sub(self.clock.now().timestamp_millis());
            if delay_ms <= 0 {
                self.dispatch_next();
                continue;
            }

            let delay = Duration::from_millis(delay_ms.unsigned_abs());
            let clamped = delay > self.config.max_timer_delay;
            let delay = delay.min(self.config.max_timer_delay);
            debug!(task_id = %task_id, delay_ms = delay.as_millis() as u64, clamped, "arming timer");
            self.arm(delay, TimerPurpose::Dispatch { task_id });
            return;
        }
    }

    async fn on_timer_fired(&mut self, purpose: TimerPurpose) {
        if self.state != EngineState::Running {
            debug!(?purpose, "ignoring timer fired while stopped");
            return;
        }

        if purpose == TimerPurpose::Reload {
            let added = self.load_pending().await;
            debug!(added, "reload timer fired");
        }

        self.schedule_next();
    }

    fn dispatch_next(&mut self) {
        let Some(task) = self.heap.dequeue() else {
            return;
        };

        debug!(task_id = %task.id, next_run_at = %task.next_run_at, "dispatching task");
        self.index
            .insert(task.id.clone(), Presence::InFlight { cancelled: false });

        let run = TaskRun {
            executor: Arc::clone(&self.executor),
            notifier: Arc::clone(&self.notifier),
            clock: Arc::clone(&self.clock),
            failure_threshold: self.config.failure_threshold,
            done_tx: self.done_tx.clone(),
        };
        tokio::spawn(run.supervise(task));
    }

    fn on_execution_finished(&mut self, done: Completion) {
        let Completion { task, disposition } = done;

        let cancelled = matches!(
            self.index.remove(&task.id),
            Some(Presence::InFlight { cancelled: true })
        );

        match disposition {
            Disposition::Retry | Disposition::Failed if !cancelled => {
                self.failures.insert(task.id.clone(), task.failure_count);
            }
            _ => {
                self.failures.remove(&task.id);
            }
        }

        if disposition != Disposition::Reschedule {
            return;
        }
        if cancelled {
            debug!(task_id = %task.id, "task removed during execution, not rescheduling");
            return;
        }
        if self.state != EngineState::Running {
            debug!(task_id = %task.id, "engine stopped, leaving task for the next start");
            return;
        }

        debug!(task_id = %task.id, next_run_at = %task.next_run_at, "rescheduling recurring task");
        if self.insert(task) {
            self.schedule_next();
        }
    }

    fn arm(&mut self, delay: Duration, purpose: TimerPurpose) {
        self.disarm();
        self.armed = Some(ArmedTimer {
            sleep: Box::pin(sleep_until(Instant::now() + delay)),
            purpose,
        });
    }

    fn disarm(&mut self) {
        self.armed = None;
    }

    fn armed_task_id(&self) -> Option<&str> {
        match &self.armed {
            Some(ArmedTimer {
                purpose: TimerPurpose::Dispatch { task_id },
                ..
            }) => Some(task_id),
            _ => None,
        }
    }
}

async fn wait_for_timer(armed: &mut Option<ArmedTimer>) -> TimerPurpose {
    match armed {
        Some(timer) => {
            timer.sleep.as_mut().await;
            timer.purpose.clone()
        }
        None => std::future::pending().await,
    }
}

/// Everything a spawned execution needs, detached from the engine.
#[derive(Clone)]
struct TaskRun {
    executor: Arc<dyn ExecutionPort>,
    notifier: Arc<dyn NotificationPort>,
    clock: Arc<dyn Clock>,
    failure_threshold: u32,
    done_tx: mpsc::UnboundedSender<Completion>,
}

impl TaskRun {
    /// Execute `task` in a child task and always report back, even if a
    /// port panics.
    async fn supervise(self, task: ScheduledTask) {
        let attempt = tokio::spawn(self.clone().execute(task.clone()));
        let (task, disposition) = match attempt.await {
            Ok(done) => done,
            Err(e) => self.on_aborted(task, e).await,
        };

        // The engine may have shut down; nothing to report to then.
        let _ = self.done_tx.send(Completion { task, disposition });
    }

    async fn execute(self, mut task: ScheduledTask) -> (ScheduledTask, Disposition) {
        let started_at = self.clock.now();
        let published = self
            .notifier
            .publish_triggered(TriggeredEvent::for_task(&task, started_at))
            .await;

        let outcome = ExecutionOutcome {
            status: if published.is_ok() {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Failure
            },
            started_at,
            completed_at: self.clock.now(),
            error: published.as_ref().err().map(ToString::to_string),
        };
        let recorded = self.executor.record_execution(&task.id, &outcome).await;

        let disposition = match published.and(recorded) {
            Ok(()) => self.on_success(&mut task).await,
            Err(e) => self.on_failure(&mut task, e).await,
        };
        (task, disposition)
    }

    async fn on_aborted(
        &self,
        mut task: ScheduledTask,
        error: JoinError,
    ) -> (ScheduledTask, Disposition) {
        if error.is_panic() {
            error!(task_id = %task.id, "task execution panicked");
        }
        let disposition = self.on_failure(&mut task, error).await;
        (task, disposition)
    }

    async fn on_success(&self, task: &mut ScheduledTask) -> Disposition {
        task.execution_count += 1;

        let next = task
            .recurrence_rule
            .as_ref()
            .and_then(|rule| next_occurrence(task.next_run_at, rule, self.clock.now()));

        match next {
            Some(next) => {
                task.next_run_at = next;
                task.failure_count = 0;
                self.log_port_error(
                    &task.id,
                    "update next run",
                    self.executor.update_next_run_at(&task.id, Some(next)).await,
                );
                info!(task_id = %task.id, next_run_at = %next, "task fired, next occurrence scheduled");
                Disposition::Reschedule
            }
            None => {
                self.log_port_error(
                    &task.id,
                    "clear next run",
                    self.executor.update_next_run_at(&task.id, None).await,
                );
                self.log_port_error(
                    &task.id,
                    "mark completed",
                    self.executor.mark_completed(&task.id).await,
                );
                info!(task_id = %task.id, "task fired and completed");
                Disposition::Completed
            }
        }
    }

    async fn on_failure(&self, task: &mut ScheduledTask, error: impl fmt::Display) -> Disposition {
        task.failure_count += 1;

        if task.failure_count >= self.failure_threshold {
            error!(
                task_id = %task.id,
                failure_count = task.failure_count,
                error = %error,
                "task exhausted its failure budget"
            );
            self.log_port_error(
                &task.id,
                "mark failed",
                self.executor.mark_failed(&task.id).await,
            );
            Disposition::Failed
        } else {
            warn!(
                task_id = %task.id,
                failure_count = task.failure_count,
                error = %error,
                "task execution failed"
            );
            Disposition::Retry
        }
    }

    fn log_port_error(&self, task_id: &str, action: &str, result: Result<(), PortError>) {
        if let Err(e) = result {
            warn!(task_id = %task_id, action, error = %e, "execution port call failed");
        }
    }
}

/// Handle for sending requests to a [`ReminderEngine`].
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone)]
pub struct EngineHandle {
    op_tx: mpsc::Sender<EngineOp>,
}

impl EngineHandle {
    /// Load pending tasks and begin dispatching. No-op if already running.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.request(|response| EngineOp::Start { response }).await
    }

    /// Cancel the armed timer and drop every queued task. Idempotent.
    ///
    /// Executions already running are left to finish. The engine can be
    /// started again afterwards; it will not re-dispatch those tasks while
    /// they are still running.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.request(|response| EngineOp::Stop { response }).await
    }

    /// Queue a task by id, fetching it from the load port.
    ///
    /// A task whose `next_run_at` is already past is accepted and fires
    /// immediately. Calling this for an id that is already queued or
    /// executing changes nothing. A task that has used up its failure
    /// budget in this engine is `Ineligible` until it is removed.
    pub async fn add_task(&self, id: impl Into<String>) -> Result<AddOutcome, SchedulerError> {
        let id = id.into();
        self.request(|response| EngineOp::AddTask { id, response })
            .await
    }

    /// Stop a task from firing again.
    ///
    /// Returns `false` if the id is unknown to the engine. A task that is
    /// already executing finishes, but is not rescheduled. Removing also
    /// forgets the task's failure count.
    pub async fn remove_task(&self, id: impl Into<String>) -> Result<bool, SchedulerError> {
        let id = id.into();
        self.request(|response| EngineOp::RemoveTask { id, response })
            .await
    }

    /// Diagnostic snapshot of the queue.
    pub async fn status(&self) -> Result<EngineStatus, SchedulerError> {
        self.request(|response| EngineOp::Status { response }).await
    }

    /// Terminate the engine loop.
    ///
    /// After calling this, no more requests can be sent.
    pub async fn shutdown(&self) {
        if let Err(e) = self.op_tx.send(EngineOp::Shutdown).await {
            warn!(error = %e, "failed to send shutdown to engine");
        }
    }

    /// Check if the engine channel is closed.
    pub fn is_closed(&self) -> bool {
        self.op_tx.is_closed()
    }

    async fn request<T>(
        &self,
        op: impl FnOnce(oneshot::Sender<T>) -> EngineOp,
    ) -> Result<T, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.op_tx
            .send(op(response_tx))
            .await
            .map_err(|_| SchedulerError::EngineClosed)?;
        response_rx.await.map_err(|_| SchedulerError::EngineClosed)
    }
}
