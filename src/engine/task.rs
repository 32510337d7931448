//! Task record types and the mutable handle handed to decision
//! functions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::engine::timer::DeadlineTimer;
use crate::messages::Message;

/// Lifecycle state of a tracked task.
///
/// `Running` and `Stopping` are live; the other three are terminal and
/// no transition out of a terminal state is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Running,
    Stopping,
    Completed,
    Exception,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Exception | TaskState::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Running => "Running",
            TaskState::Stopping => "Stopping",
            TaskState::Completed => "Completed",
            TaskState::Exception => "Exception",
            TaskState::Cancelled => "Cancelled",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        if self == next {
            return true;
        }
        match self {
            TaskState::Running => true,
            TaskState::Stopping => next.is_terminal(),
            TaskState::Completed | TaskState::Exception | TaskState::Cancelled => false,
        }
    }
}

/// Snapshot of the originating HTTP request, kept so the terminal
/// response can be composed from data only the original request had.
/// Owned exclusively by the task once attached; the engine never
/// mutates it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Payload {
    pub http_operation: String,
    pub target_uri: String,
    pub json_body: Value,
}

impl Payload {
    pub fn new(
        http_operation: impl Into<String>,
        target_uri: impl Into<String>,
        json_body: Value,
    ) -> Self {
        Self {
            http_operation: http_operation.into(),
            target_uri: target_uri.into(),
            json_body,
        }
    }
}

/// The mutable record for one tracked task.
#[derive(Debug, Clone)]
pub struct TaskData {
    pub id: u64,
    pub state: TaskState,
    /// Optional numeric result codes, set only at finalization.
    pub status_code: Option<u16>,
    pub substatus: Option<u16>,
    pub percent_complete: u8,
    /// Append-only; insertion order is chronological progress.
    pub messages: Vec<Message>,
    /// Absolute expiry of the outstanding deadline; `None` once
    /// terminal.
    pub deadline: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub payload: Option<Payload>,
    /// Headers emitted with the terminal response, as "Name: value"
    /// lines appended by decision functions.
    pub http_headers: Vec<String>,
    pub match_rule: String,
}

impl TaskData {
    pub(crate) fn new(id: u64, match_rule: &str, initial_timeout: Duration) -> Self {
        Self {
            id,
            state: TaskState::Running,
            status_code: None,
            substatus: None,
            percent_complete: 0,
            messages: Vec::new(),
            deadline: Some(Utc::now() + timeout_delta(initial_timeout)),
            start_time: Utc::now(),
            end_time: None,
            payload: None,
            http_headers: Vec::new(),
            match_rule: match_rule.to_string(),
        }
    }

    /// Render the task in Redfish Task resource shape.
    pub fn to_resource(&self) -> Value {
        let mut resource = json!({
            "@odata.type": "#Task.v1_4_3.Task",
            "@odata.id": format!("/redfish/v1/TaskService/Tasks/{}", self.id),
            "Id": self.id.to_string(),
            "Name": format!("Task {}", self.id),
            "TaskState": self.state.as_str(),
            "PercentComplete": self.percent_complete,
            "Messages": self.messages,
            "StartTime": self.start_time.to_rfc3339(),
        });
        let fields = resource.as_object_mut().expect("resource is an object");
        if let Some(end_time) = self.end_time {
            fields.insert("EndTime".to_string(), json!(end_time.to_rfc3339()));
        }
        if let Some(status_code) = self.status_code {
            fields.insert("StatusCode".to_string(), json!(status_code));
        }
        if let Some(substatus) = self.substatus {
            fields.insert("SubStatusCode".to_string(), json!(substatus));
        }
        if let Some(payload) = &self.payload {
            fields.insert(
                "Payload".to_string(),
                json!({
                    "HttpOperation": payload.http_operation,
                    "TargetUri": payload.target_uri,
                    "JsonBody": payload.json_body,
                    "HttpHeaders": self.http_headers,
                }),
            );
        }
        resource
    }
}

fn timeout_delta(timeout: Duration) -> chrono::Duration {
    chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Mutable handle a decision function uses to update its task.
///
/// Only live while the decision function runs; all mutation is
/// serialized through the task's driver loop.
pub struct TaskCtl<'a> {
    data: &'a mut TaskData,
    timer: &'a mut DeadlineTimer,
    extended: bool,
}

impl<'a> TaskCtl<'a> {
    pub(crate) fn new(data: &'a mut TaskData, timer: &'a mut DeadlineTimer) -> Self {
        Self { data, timer, extended: false }
    }

    pub fn id(&self) -> u64 {
        self.data.id
    }

    pub fn state(&self) -> TaskState {
        self.data.state
    }

    pub fn percent_complete(&self) -> u8 {
        self.data.percent_complete
    }

    /// Request a state transition. Transitions the state machine
    /// forbids are ignored.
    pub fn set_state(&mut self, next: TaskState) {
        if self.data.state.can_transition_to(next) {
            self.data.state = next;
        } else {
            tracing::warn!(
                task = self.data.id,
                from = self.data.state.as_str(),
                to = next.as_str(),
                "rejected task state transition"
            );
        }
    }

    pub fn set_status_code(&mut self, code: u16) {
        self.data.status_code = Some(code);
    }

    pub fn set_substatus(&mut self, code: u16) {
        self.data.substatus = Some(code);
    }

    /// Monotonic non-decrease is a caller convention, not checked here.
    pub fn set_percent(&mut self, percent: u8) {
        self.data.percent_complete = percent.min(100);
    }

    pub fn push_message(&mut self, message: Message) {
        self.data.messages.push(message);
    }

    /// Queue a "Name: value" header for the terminal response.
    pub fn add_response_header(&mut self, header: impl Into<String>) {
        self.data.http_headers.push(header.into());
    }

    /// Replace the outstanding deadline with `timeout` from now.
    pub fn extend(&mut self, timeout: Duration) {
        self.timer.extend(timeout);
        self.data.deadline = Some(Utc::now() + timeout_delta(timeout));
        self.extended = true;
    }

    pub(crate) fn extended(&self) -> bool {
        self.extended
    }
}
