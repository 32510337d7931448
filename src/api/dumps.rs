//! Diagnostic dump collection, tracked as a task with the
//! progress-polling policy.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::bus::{properties_changed_rule, Notification};
use crate::engine::{Payload, TaskCtl, TaskEvent, TaskState, Verdict};
use crate::messages;

use super::redfish_error;
use super::routes::AppState;

const DUMP_MANAGER_SERVICE: &str = "xyz.openbmc_project.Dump.Manager";
const DUMP_MANAGER_PATH: &str = "/xyz/openbmc_project/dump/bmc";
const PROGRESS_INTERFACE: &str = "xyz.openbmc_project.Common.Progress";
const ACTION_URI: &str =
    "/redfish/v1/Managers/bmc/LogServices/Dump/Actions/LogService.CollectDiagnosticData";

/// Budget within which the requested dump must be collected.
const DUMP_TIMEOUT: Duration = Duration::from_secs(6 * 60);

#[derive(Debug, Deserialize)]
struct CollectDiagnosticDataRequest {
    #[serde(rename = "DiagnosticDataType")]
    diagnostic_data_type: Option<String>,
}

/// What a progress notification means for a dump task. Raw property
/// bags are inspected here once and never re-parsed downstream.
#[derive(Debug, PartialEq, Eq)]
enum DumpSignal {
    InProgress,
    Completed,
    Failed,
    Malformed,
    Unrelated,
}

fn classify(notification: &Notification) -> DumpSignal {
    if notification.interface != PROGRESS_INTERFACE {
        return DumpSignal::Unrelated;
    }
    match notification.properties.get("Status") {
        None => DumpSignal::Unrelated,
        Some(Value::String(status)) => {
            if status.ends_with("Completed") {
                DumpSignal::Completed
            } else if status.ends_with("Failed") || status.ends_with("Aborted") {
                DumpSignal::Failed
            } else if status.ends_with("InProgress") {
                DumpSignal::InProgress
            } else {
                DumpSignal::Unrelated
            }
        }
        Some(_) => DumpSignal::Malformed,
    }
}

/// Decision logic for a dump-collection task. On completion the created
/// entry's location is queued for the terminal response.
pub fn dump_decision(
    entry_uri: String,
) -> impl FnMut(TaskEvent, &mut TaskCtl<'_>) -> Verdict + Send + 'static {
    move |event, ctl| {
        let id = ctl.id();
        let signal_event = match event {
            // engine default: the expiry cancels the task
            TaskEvent::Timeout => return Verdict::Pending,
            TaskEvent::Notification(signal_event) => signal_event,
        };
        if let Some(error) = &signal_event.error {
            tracing::error!(task = id, %error, "dump task received bus error");
            ctl.push_message(messages::internal_error());
            ctl.set_state(TaskState::Cancelled);
            return Verdict::Finished;
        }
        match classify(&signal_event.notification) {
            DumpSignal::Unrelated => Verdict::Pending,
            DumpSignal::InProgress => {
                // a dump still reporting progress keeps its full budget
                ctl.extend(DUMP_TIMEOUT);
                Verdict::Pending
            }
            DumpSignal::Failed => {
                ctl.push_message(messages::task_aborted(id));
                ctl.set_state(TaskState::Cancelled);
                Verdict::Finished
            }
            DumpSignal::Malformed => {
                ctl.push_message(messages::internal_error());
                ctl.set_state(TaskState::Exception);
                Verdict::Finished
            }
            DumpSignal::Completed => {
                ctl.push_message(messages::success());
                ctl.add_response_header(format!("Location: {entry_uri}"));
                ctl.set_state(TaskState::Completed);
                tracing::debug!(task = id, "dump collection completed");
                Verdict::Finished
            }
        }
    }
}

/// `LogService.CollectDiagnosticData`: start a dump and return a
/// trackable task.
pub async fn collect_diagnostic_data(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let request: CollectDiagnosticDataRequest = match serde_json::from_value(body.clone()) {
        Ok(request) => request,
        Err(_) => {
            return redfish_error(
                StatusCode::BAD_REQUEST,
                messages::action_parameter_value_error("DiagnosticDataType", "CollectDiagnosticData"),
            );
        }
    };
    let Some(data_type) = request.diagnostic_data_type else {
        return redfish_error(
            StatusCode::BAD_REQUEST,
            messages::action_parameter_missing("CollectDiagnosticData", "DiagnosticDataType"),
        );
    };
    if data_type != "Manager" {
        return redfish_error(
            StatusCode::BAD_REQUEST,
            messages::action_parameter_value_error("DiagnosticDataType", "CollectDiagnosticData"),
        );
    }

    let created = match state
        .bus
        .call(DUMP_MANAGER_SERVICE, DUMP_MANAGER_PATH, "CreateDump", json!({}))
        .await
    {
        Ok(created) => created,
        Err(error) => {
            tracing::error!(%error, "CreateDump bus call failed");
            return redfish_error(StatusCode::INTERNAL_SERVER_ERROR, messages::internal_error());
        }
    };
    let Some(created_path) = created.as_str().filter(|path| !path.is_empty()) else {
        tracing::error!(?created, "CreateDump returned an invalid object path");
        return redfish_error(StatusCode::INTERNAL_SERVER_ERROR, messages::internal_error());
    };
    let dump_id = created_path.rsplit('/').next().unwrap_or_default();
    let entry_uri = format!("/redfish/v1/Managers/bmc/LogServices/Dump/Entries/{dump_id}");

    let rule = properties_changed_rule(created_path);
    let task = match state
        .registry
        .create_task(&rule, dump_decision(entry_uri), DUMP_TIMEOUT)
        .await
    {
        Ok(task) => task,
        Err(error) => {
            tracing::error!(%error, "failed to create dump task");
            return redfish_error(StatusCode::INTERNAL_SERVER_ERROR, messages::internal_error());
        }
    };
    task.attach_payload(Payload::new("POST", ACTION_URI, body)).await;
    task.populate_response().await
}
