//! Firmware update, tracked as a task with the staged-workflow policy.
//!
//! A firmware update often ends in a reboot, so the task may never see
//! an "Active" signal: a staged image parks the task in `Stopping` with
//! a long grace deadline while the user completes the update, and
//! progress ticks keep the base deadline alive.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::bus::{properties_changed_rule, Notification};
use crate::engine::{AdmissionTicket, Payload, TaskCtl, TaskEvent, TaskState, Verdict};
use crate::messages;

use super::redfish_error;
use super::routes::AppState;

const UPDATER_SERVICE: &str = "xyz.openbmc_project.Software.BMC.Updater";
const SOFTWARE_PATH: &str = "/xyz/openbmc_project/software";
const ACTIVATION_INTERFACE: &str = "xyz.openbmc_project.Software.Activation";
const ACTIVATION_PROGRESS_INTERFACE: &str = "xyz.openbmc_project.Software.ActivationProgress";
const ACTION_URI: &str = "/redfish/v1/UpdateService/Actions/UpdateService.SimpleUpdate";

/// Base budget for the update task.
const UPDATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Grace period while a staged image waits for the user-triggered
/// reset.
const STAGED_TIMEOUT: Duration = Duration::from_secs(5 * 60 * 60);
/// Keep-alive applied on every progress tick.
const PROGRESS_EXTENSION: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
struct SimpleUpdateRequest {
    #[serde(rename = "ImageURI")]
    image_uri: Option<String>,
}

/// What an activation notification means for an update task.
#[derive(Debug, PartialEq, Eq)]
enum ActivationSignal {
    Failed,
    Staged,
    Active,
    Progress(u8),
    Malformed,
    Unrelated,
}

fn classify(notification: &Notification) -> ActivationSignal {
    if notification.interface == ACTIVATION_INTERFACE {
        match notification.properties.get("Activation") {
            None => ActivationSignal::Unrelated,
            Some(Value::String(activation)) => {
                if activation.ends_with("Invalid") || activation.ends_with("Failed") {
                    ActivationSignal::Failed
                } else if activation.ends_with("Staged") {
                    ActivationSignal::Staged
                } else if activation.ends_with("Active") {
                    ActivationSignal::Active
                } else {
                    ActivationSignal::Unrelated
                }
            }
            Some(_) => ActivationSignal::Malformed,
        }
    } else if notification.interface == ACTIVATION_PROGRESS_INTERFACE {
        match notification.properties.get("Progress") {
            None => ActivationSignal::Unrelated,
            Some(value) => match value.as_u64() {
                Some(progress) if progress <= 100 => ActivationSignal::Progress(progress as u8),
                _ => ActivationSignal::Malformed,
            },
        }
    } else {
        ActivationSignal::Unrelated
    }
}

/// Decision logic for a firmware-update task. The admission ticket is
/// released in the terminal branch, reopening the gate for the next
/// update.
pub fn update_decision(
    ticket: AdmissionTicket,
) -> impl FnMut(TaskEvent, &mut TaskCtl<'_>) -> Verdict + Send + 'static {
    let mut ticket = Some(ticket);
    move |event, ctl| {
        let id = ctl.id();
        let verdict = match event {
            // engine default: the expiry cancels the task, whether the
            // base deadline or the staged grace period ran out
            TaskEvent::Timeout => Verdict::Pending,
            TaskEvent::Notification(signal_event) => {
                if let Some(error) = &signal_event.error {
                    tracing::error!(task = id, %error, "update task received bus error");
                    ctl.push_message(messages::internal_error());
                    ctl.set_state(TaskState::Exception);
                    ctl.set_status_code(500);
                    Verdict::Finished
                } else {
                    match classify(&signal_event.notification) {
                        ActivationSignal::Unrelated => Verdict::Pending,
                        ActivationSignal::Failed => {
                            ctl.push_message(messages::task_aborted(id));
                            ctl.set_state(TaskState::Exception);
                            ctl.set_status_code(500);
                            Verdict::Finished
                        }
                        ActivationSignal::Malformed => {
                            ctl.push_message(messages::internal_error());
                            ctl.set_state(TaskState::Exception);
                            ctl.set_status_code(500);
                            Verdict::Finished
                        }
                        ActivationSignal::Staged => {
                            // staged: the user still has to cycle the
                            // system before activation completes
                            ctl.push_message(messages::task_paused(id));
                            ctl.set_state(TaskState::Stopping);
                            ctl.extend(STAGED_TIMEOUT);
                            Verdict::Pending
                        }
                        ActivationSignal::Active => {
                            ctl.push_message(messages::task_completed_ok(id));
                            ctl.set_state(TaskState::Completed);
                            ctl.set_status_code(200);
                            Verdict::Finished
                        }
                        ActivationSignal::Progress(progress) => {
                            ctl.set_percent(progress);
                            ctl.push_message(messages::task_progress_changed(id, progress));
                            // still alive, push the deadline out
                            ctl.extend(PROGRESS_EXTENSION);
                            Verdict::Pending
                        }
                    }
                }
            }
        };
        if verdict == Verdict::Finished {
            ticket.take();
        }
        verdict
    }
}

/// `UpdateService.SimpleUpdate`: start a firmware update and return a
/// trackable task. At most one update runs at a time.
pub async fn simple_update(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    let request: SimpleUpdateRequest = match serde_json::from_value(body.clone()) {
        Ok(request) => request,
        Err(_) => {
            return redfish_error(
                StatusCode::BAD_REQUEST,
                messages::action_parameter_value_error("ImageURI", "SimpleUpdate"),
            );
        }
    };
    let Some(image_uri) = request.image_uri else {
        return redfish_error(
            StatusCode::BAD_REQUEST,
            messages::action_parameter_missing("SimpleUpdate", "ImageURI"),
        );
    };

    // admission check happens before any subscription is opened
    let Some(ticket) = state.update_guard.try_acquire() else {
        return redfish_error(StatusCode::SERVICE_UNAVAILABLE, messages::resource_in_use());
    };

    let started = match state
        .bus
        .call(UPDATER_SERVICE, SOFTWARE_PATH, "StartUpdate", json!({ "ImageURI": image_uri }))
        .await
    {
        Ok(started) => started,
        Err(error) => {
            tracing::error!(%error, "StartUpdate bus call failed");
            return redfish_error(StatusCode::INTERNAL_SERVER_ERROR, messages::internal_error());
        }
    };
    let Some(software_path) = started.as_str().filter(|path| !path.is_empty()) else {
        tracing::error!(?started, "StartUpdate returned an invalid object path");
        return redfish_error(StatusCode::INTERNAL_SERVER_ERROR, messages::internal_error());
    };

    let rule = properties_changed_rule(software_path);
    let task = match state
        .registry
        .create_task(&rule, update_decision(ticket), UPDATE_TIMEOUT)
        .await
    {
        Ok(task) => task,
        Err(error) => {
            tracing::error!(%error, "failed to create update task");
            return redfish_error(StatusCode::INTERNAL_SERVER_ERROR, messages::internal_error());
        }
    };
    task.attach_payload(Payload::new("POST", ACTION_URI, body)).await;
    task.populate_response().await
}
