//! On-demand crash-data collection, tracked as a fire-once task: the
//! first notification always signals full completion.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::bus::properties_changed_rule;
use crate::engine::{Payload, TaskCtl, TaskEvent, TaskState, Verdict};
use crate::messages;

use super::redfish_error;
use super::routes::AppState;

const CRASHDUMP_SERVICE: &str = "com.intel.crashdump";
const CRASHDUMP_PATH: &str = "/com/intel/crashdump";
const ACTION_URI: &str =
    "/redfish/v1/Systems/system/LogServices/Crashdump/Actions/LogService.CollectDiagnosticData";

/// Budget within which the crash data must be collected.
const CRASHDUMP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
struct CollectCrashDataRequest {
    #[serde(rename = "DiagnosticDataType")]
    diagnostic_data_type: Option<String>,
    #[serde(rename = "OEMDiagnosticDataType")]
    oem_diagnostic_data_type: Option<String>,
}

/// Fire-once decision: any notification finalizes the task.
pub fn crashdump_decision() -> impl FnMut(TaskEvent, &mut TaskCtl<'_>) -> Verdict + Send + 'static {
    move |event, ctl| {
        let id = ctl.id();
        match event {
            // engine default: the expiry cancels the task
            TaskEvent::Timeout => Verdict::Pending,
            TaskEvent::Notification(signal_event) => {
                if let Some(error) = &signal_event.error {
                    tracing::error!(task = id, %error, "crashdump task received bus error");
                    ctl.push_message(messages::internal_error());
                    ctl.set_state(TaskState::Cancelled);
                } else {
                    ctl.push_message(messages::success());
                    ctl.set_state(TaskState::Completed);
                }
                Verdict::Finished
            }
        }
    }
}

/// `LogService.CollectDiagnosticData` on the crashdump service.
pub async fn collect_crash_data(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let request: CollectCrashDataRequest = match serde_json::from_value(body.clone()) {
        Ok(request) => request,
        Err(_) => {
            return redfish_error(
                StatusCode::BAD_REQUEST,
                messages::action_parameter_value_error("DiagnosticDataType", "CollectDiagnosticData"),
            );
        }
    };
    if request.diagnostic_data_type.as_deref() != Some("OEM")
        || request.oem_diagnostic_data_type.as_deref() != Some("OnDemand")
    {
        return redfish_error(
            StatusCode::BAD_REQUEST,
            messages::action_parameter_missing(
                "CollectDiagnosticData",
                "DiagnosticDataType & OEMDiagnosticDataType",
            ),
        );
    }

    if let Err(error) = state
        .bus
        .call(CRASHDUMP_SERVICE, CRASHDUMP_PATH, "GenerateOnDemandLog", json!({}))
        .await
    {
        tracing::error!(%error, "GenerateOnDemandLog bus call failed");
        return redfish_error(StatusCode::INTERNAL_SERVER_ERROR, messages::internal_error());
    }

    let rule = properties_changed_rule(CRASHDUMP_PATH);
    let task = match state
        .registry
        .create_task(&rule, crashdump_decision(), CRASHDUMP_TIMEOUT)
        .await
    {
        Ok(task) => task,
        Err(error) => {
            tracing::error!(%error, "failed to create crashdump task");
            return redfish_error(StatusCode::INTERNAL_SERVER_ERROR, messages::internal_error());
        }
    };
    task.attach_payload(Payload::new("POST", ACTION_URI, body)).await;
    task.populate_response().await
}
