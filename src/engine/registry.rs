//! Task registry: identity allocation, the per-task driver loop, and
//! the HTTP result binder.
//!
//! All notification deliveries, timer firings, and state mutations for
//! one task pass through its driver loop, so a decision function never
//! observes partial updates and duplicate or out-of-order signals after
//! finalization are never delivered.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bus::{BusError, SignalEvent, Subscription, SystemBus};
use crate::engine::task::{Payload, TaskCtl, TaskData, TaskState};
use crate::engine::timer::DeadlineTimer;
use crate::messages;

/// What pollers are told to wait between monitor polls.
const RETRY_AFTER_SECONDS: &str = "30";

/// An event delivered to a decision function.
#[derive(Debug)]
pub enum TaskEvent {
    /// A bus notification matching the task's subscription rule.
    Notification(SignalEvent),
    /// The task's deadline expired.
    Timeout,
}

/// Whether the task keeps running after a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pending,
    Finished,
}

/// Caller-supplied decision logic: event plus current task state in,
/// verdict out.
pub type DecisionFn = Box<dyn FnMut(TaskEvent, &mut TaskCtl<'_>) -> Verdict + Send>;

#[derive(Debug, Error)]
pub enum CreateTaskError {
    #[error("failed to open bus subscription: {0}")]
    Subscribe(#[source] BusError),

    #[error("task registry is shutting down")]
    ShuttingDown,
}

/// One tracked long-running operation, shared between its driver loop
/// and the HTTP layer.
pub struct Task {
    id: u64,
    data: RwLock<TaskData>,
}

impl Task {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// A consistent copy of the current task record.
    pub async fn snapshot(&self) -> TaskData {
        self.data.read().await.clone()
    }

    /// Store the originating-request snapshot for the terminal response.
    pub async fn attach_payload(&self, payload: Payload) {
        self.data.write().await.payload = Some(payload);
    }

    /// Bind the task to an HTTP response.
    ///
    /// Still running: 202 Accepted plus a monitor location to poll.
    /// Terminal: the terminal result directly, with any headers decision
    /// functions queued. Idempotent; callable before or after
    /// finalization.
    pub async fn populate_response(&self) -> Response {
        let data = self.data.read().await;
        if data.state.is_terminal() {
            let mut response = (StatusCode::OK, Json(data.to_resource())).into_response();
            let headers = response.headers_mut();
            for line in &data.http_headers {
                let Some((name, value)) = line.split_once(": ") else {
                    continue;
                };
                if let (Ok(name), Ok(value)) =
                    (HeaderName::try_from(name), HeaderValue::try_from(value))
                {
                    headers.insert(name, value);
                }
            }
            response
        } else {
            let monitor = format!("/redfish/v1/TaskService/Tasks/{}/Monitor", self.id);
            let mut response = (StatusCode::ACCEPTED, Json(data.to_resource())).into_response();
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::try_from(monitor) {
                headers.insert(header::LOCATION, value);
            }
            headers.insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECONDS));
            response
        }
    }
}

/// Process-wide task registry. One instance is shared by all request
/// handlers; tests may run several side by side.
pub struct TaskRegistry {
    bus: Arc<dyn SystemBus>,
    next_id: AtomicU64,
    /// Tasks whose driver loop is still running.
    live: RwLock<HashMap<u64, JoinHandle<()>>>,
    /// Bounded record of tasks for rendering; oldest evicted first.
    records: RwLock<VecDeque<Arc<Task>>>,
    max_records: usize,
    shutdown: CancellationToken,
}

impl TaskRegistry {
    pub fn new(bus: Arc<dyn SystemBus>, max_records: usize) -> Self {
        Self {
            bus,
            next_id: AtomicU64::new(0),
            live: RwLock::new(HashMap::new()),
            records: RwLock::new(VecDeque::new()),
            max_records: max_records.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a tracked task: open the subscription, arm the deadline,
    /// and start the driver loop.
    ///
    /// Fails without consuming an id if the subscription cannot be
    /// opened.
    pub async fn create_task<F>(
        self: &Arc<Self>,
        match_rule: &str,
        decision: F,
        initial_timeout: Duration,
    ) -> Result<Arc<Task>, CreateTaskError>
    where
        F: FnMut(TaskEvent, &mut TaskCtl<'_>) -> Verdict + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(CreateTaskError::ShuttingDown);
        }
        let mut subscription = self
            .bus
            .subscribe(match_rule)
            .await
            .map_err(CreateTaskError::Subscribe)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut data = TaskData::new(id, match_rule, initial_timeout);
        data.messages.push(messages::task_started(id));
        let task = Arc::new(Task { id, data: RwLock::new(data) });

        // Spawn while holding the live lock: the driver's removal of the
        // entry then always serializes behind this insert, and a
        // `shutdown` that has already drained the map cannot miss the
        // new handle.
        {
            let mut live = self.live.write().await;
            if self.shutdown.is_cancelled() {
                subscription.close();
                return Err(CreateTaskError::ShuttingDown);
            }
            let handle = tokio::spawn(drive(
                Arc::clone(self),
                Arc::clone(&task),
                subscription,
                Box::new(decision),
                initial_timeout,
            ));
            live.insert(id, handle);
        }

        {
            let mut records = self.records.write().await;
            records.push_back(Arc::clone(&task));
            while records.len() > self.max_records {
                records.pop_front();
            }
        }
        tracing::info!(task = id, rule = match_rule, "created task");
        Ok(task)
    }

    /// Look up a task by id, live or retained.
    pub async fn get(&self, id: u64) -> Option<Arc<Task>> {
        self.records.read().await.iter().find(|task| task.id == id).cloned()
    }

    /// All retained tasks, oldest first.
    pub async fn all(&self) -> Vec<Arc<Task>> {
        self.records.read().await.iter().cloned().collect()
    }

    /// Number of tasks whose driver loop is still running.
    pub async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }

    /// Forcibly finalize every live task as `Cancelled` and release its
    /// subscription and timer. Used at process shutdown; no subscription
    /// may outlive the registry.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut live = self.live.write().await;
            live.drain().map(|(_, handle)| handle).collect()
        };
        let count = handles.len();
        let _ = futures::future::join_all(handles).await;
        if count > 0 {
            tracing::info!(tasks = count, "cancelled live tasks at shutdown");
        }
    }
}

/// Close out the record in the same critical section that committed the
/// terminal state, so no reader sees a terminal task with a deadline
/// still outstanding.
fn finalize_record(data: &mut TaskData) {
    data.deadline = None;
    data.end_time = Some(Utc::now());
}

/// Per-task driver loop: the single place events reach the decision
/// function and the single place resources are torn down.
async fn drive(
    registry: Arc<TaskRegistry>,
    task: Arc<Task>,
    mut subscription: Subscription,
    mut decision: DecisionFn,
    initial_timeout: Duration,
) {
    let mut timer = DeadlineTimer::start(initial_timeout);
    let shutdown = registry.shutdown.clone();

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => None,
            signal = subscription.recv() => signal.map(TaskEvent::Notification),
            _ = timer.expired() => Some(TaskEvent::Timeout),
        };

        let Some(event) = event else {
            // registry teardown, or the bus side went away
            let mut data = task.data.write().await;
            if !data.state.is_terminal() {
                data.messages.push(messages::task_cancelled(task.id));
                data.state = TaskState::Cancelled;
            }
            finalize_record(&mut data);
            break;
        };

        let timed_out = matches!(event, TaskEvent::Timeout);
        let mut data = task.data.write().await;
        let mut ctl = TaskCtl::new(&mut data, &mut timer);
        let verdict = decision(event, &mut ctl);
        let extended = ctl.extended();

        match verdict {
            Verdict::Finished => {
                if !data.state.is_terminal() {
                    data.state = TaskState::Completed;
                    data.messages.push(messages::task_completed_ok(task.id));
                }
                finalize_record(&mut data);
                break;
            }
            Verdict::Pending if timed_out && !extended => {
                // default deadline policy: the expiry is terminal
                if !data.state.is_terminal() {
                    data.messages.push(messages::task_aborted(task.id));
                    data.state = TaskState::Cancelled;
                }
                finalize_record(&mut data);
                tracing::warn!(task = task.id, "task deadline expired");
                break;
            }
            Verdict::Pending => {}
        }
    }

    // teardown runs exactly once, on every exit path
    timer.cancel();
    subscription.close();
    registry.live.write().await.remove(&task.id);
    tracing::debug!(task = task.id, "task retired");
}
