//! Redfish-style structured status messages.
//!
//! The full message-registry substitution system lives outside this
//! service; this module carries only the fixed set of messages the task
//! call sites append to their progress logs and error responses.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single structured status message in Redfish `Message` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    #[serde(rename = "@odata.type")]
    pub odata_type: String,
    pub message_id: String,
    pub message: String,
    pub message_args: Vec<String>,
    pub severity: String,
    pub resolution: String,
}

fn message(
    message_id: &str,
    message: String,
    message_args: Vec<String>,
    severity: &str,
    resolution: &str,
) -> Message {
    Message {
        odata_type: "#Message.v1_1_1.Message".to_string(),
        message_id: message_id.to_string(),
        message,
        message_args,
        severity: severity.to_string(),
        resolution: resolution.to_string(),
    }
}

pub fn task_started(task_id: u64) -> Message {
    message(
        "TaskEvent.1.0.3.TaskStarted",
        format!("The task with Id '{task_id}' has started."),
        vec![task_id.to_string()],
        "OK",
        "None.",
    )
}

pub fn task_progress_changed(task_id: u64, percent: u8) -> Message {
    message(
        "TaskEvent.1.0.3.TaskProgressChanged",
        format!("The task with Id '{task_id}' has changed to progress {percent} percent complete."),
        vec![task_id.to_string(), percent.to_string()],
        "OK",
        "None.",
    )
}

pub fn task_paused(task_id: u64) -> Message {
    message(
        "TaskEvent.1.0.3.TaskPaused",
        format!("The task with Id '{task_id}' has been paused."),
        vec![task_id.to_string()],
        "Warning",
        "None.",
    )
}

pub fn task_aborted(task_id: u64) -> Message {
    message(
        "TaskEvent.1.0.3.TaskAborted",
        format!("The task with Id '{task_id}' has completed with errors."),
        vec![task_id.to_string()],
        "Critical",
        "None.",
    )
}

pub fn task_cancelled(task_id: u64) -> Message {
    message(
        "TaskEvent.1.0.3.TaskCancelled",
        format!("The task with Id '{task_id}' has been cancelled."),
        vec![task_id.to_string()],
        "Warning",
        "None.",
    )
}

pub fn task_completed_ok(task_id: u64) -> Message {
    message(
        "TaskEvent.1.0.3.TaskCompletedOK",
        format!("The task with Id '{task_id}' has completed."),
        vec![task_id.to_string()],
        "OK",
        "None.",
    )
}

pub fn success() -> Message {
    message(
        "Base.1.11.0.Success",
        "The request completed successfully.".to_string(),
        Vec::new(),
        "OK",
        "None.",
    )
}

pub fn internal_error() -> Message {
    message(
        "Base.1.11.0.InternalError",
        "The request failed due to an internal service error. The service is still operational."
            .to_string(),
        Vec::new(),
        "Critical",
        "Resubmit the request. If the problem persists, consider resetting the service.",
    )
}

pub fn action_parameter_missing(action: &str, parameter: &str) -> Message {
    message(
        "Base.1.11.0.ActionParameterMissing",
        format!("The action {action} requires the parameter {parameter} to be present in the request body."),
        vec![action.to_string(), parameter.to_string()],
        "Critical",
        "Supply the action with the required parameter in the request body when the request is resubmitted.",
    )
}

pub fn action_parameter_value_error(parameter: &str, action: &str) -> Message {
    message(
        "Base.1.11.0.ActionParameterValueError",
        format!("The value for the parameter {parameter} in the action {action} is invalid."),
        vec![parameter.to_string(), action.to_string()],
        "Critical",
        "Correct the value for the parameter in the request body and resubmit the request.",
    )
}

pub fn resource_in_use() -> Message {
    message(
        "Base.1.11.0.ResourceInUse",
        "The change to the requested resource failed because the resource is in use or in transition."
            .to_string(),
        Vec::new(),
        "Warning",
        "Remove the condition and resubmit the request if the operation failed.",
    )
}

pub fn resource_not_found(resource_type: &str, resource_id: &str) -> Message {
    message(
        "Base.1.11.0.ResourceNotFound",
        format!("The requested resource of type {resource_type} named '{resource_id}' was not found."),
        vec![resource_type.to_string(), resource_id.to_string()],
        "Critical",
        "Provide a valid resource identifier and resubmit the request.",
    )
}

/// Wrap a message in the Redfish error object shape.
pub fn error_body(message: &Message) -> Value {
    json!({
        "error": {
            "code": message.message_id,
            "message": message.message,
            "@Message.ExtendedInfo": [message],
        }
    })
}
