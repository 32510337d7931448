//! TaskService resources: collection, per-task resource, and the
//! monitor pollers follow to completion.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::messages;

use super::redfish_error;
use super::routes::AppState;

pub async fn task_service(State(_state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "@odata.type": "#TaskService.v1_1_4.TaskService",
        "@odata.id": "/redfish/v1/TaskService",
        "Id": "TaskService",
        "Name": "Task Service",
        "ServiceEnabled": true,
        "Tasks": { "@odata.id": "/redfish/v1/TaskService/Tasks" },
    }))
}

pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tasks = state.registry.all().await;
    let members: Vec<Value> = tasks
        .iter()
        .map(|task| json!({ "@odata.id": format!("/redfish/v1/TaskService/Tasks/{}", task.id()) }))
        .collect();
    Json(json!({
        "@odata.type": "#TaskCollection.TaskCollection",
        "@odata.id": "/redfish/v1/TaskService/Tasks",
        "Name": "Task Collection",
        "Members@odata.count": members.len(),
        "Members": members,
    }))
}

pub async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.registry.get(id).await {
        Some(task) => {
            let snapshot = task.snapshot().await;
            (StatusCode::OK, Json(snapshot.to_resource())).into_response()
        }
        None => task_not_found(id),
    }
}

pub async fn task_monitor(State(state): State<Arc<AppState>>, Path(id): Path<u64>) -> Response {
    match state.registry.get(id).await {
        Some(task) => task.populate_response().await,
        None => task_not_found(id),
    }
}

fn task_not_found(id: u64) -> Response {
    redfish_error(
        StatusCode::NOT_FOUND,
        messages::resource_not_found("Task", &id.to_string()),
    )
}
