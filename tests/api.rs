//! Handler-level flows: the three task-producing actions driven end to
//! end over the loopback bus.

use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::Json;
use serde_json::{json, Value};

use mgmtd::api::routes::AppState;
use mgmtd::api::{crashdump, dumps, update};
use mgmtd::bus::{LoopbackBus, Notification, SystemBus};
use mgmtd::engine::{AdmissionGuard, Task, TaskData, TaskRegistry, TaskState};
use mgmtd::Config;

fn setup() -> (Arc<LoopbackBus>, Arc<AppState>) {
    let bus = Arc::new(LoopbackBus::new());
    let shared: Arc<dyn SystemBus> = Arc::clone(&bus) as Arc<dyn SystemBus>;
    let registry = Arc::new(TaskRegistry::new(Arc::clone(&shared), 100));
    let state = Arc::new(AppState {
        config: Config::default(),
        bus: shared,
        registry,
        update_guard: AdmissionGuard::new("firmware-update"),
    });
    (bus, state)
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn wait_until<F>(task: &Arc<Task>, mut pred: F) -> TaskData
where
    F: FnMut(&TaskData) -> bool,
{
    for _ in 0..1000 {
        let snapshot = task.snapshot().await;
        if pred(&snapshot) {
            return snapshot;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached, task state: {:?}", task.snapshot().await.state);
}

async fn wait_terminal(task: &Arc<Task>) -> TaskData {
    wait_until(task, |snapshot| snapshot.state.is_terminal()).await
}

#[tokio::test]
async fn dump_collection_runs_to_a_terminal_monitor_result() {
    let (bus, state) = setup();
    bus.register_method("/xyz/openbmc_project/dump/bmc", "CreateDump", |_| {
        Ok(json!("/xyz/openbmc_project/dump/bmc/entry/3"))
    })
    .await;

    let response = dumps::collect_diagnostic_data(
        State(Arc::clone(&state)),
        Json(json!({ "DiagnosticDataType": "Manager" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/redfish/v1/TaskService/Tasks/0/Monitor"
    );
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "30");

    let task = state.registry.get(0).await.unwrap();
    let entry = "/xyz/openbmc_project/dump/bmc/entry/3";
    let progress = "xyz.openbmc_project.Common.Progress";
    bus.publish(Notification::property_changed(
        entry,
        progress,
        json!({ "Status": "xyz.openbmc_project.Common.Progress.OperationStatus.InProgress" }),
    ))
    .await;
    bus.publish(Notification::property_changed(
        entry,
        progress,
        json!({ "Status": "xyz.openbmc_project.Common.Progress.OperationStatus.Completed" }),
    ))
    .await;

    let snapshot = wait_terminal(&task).await;
    assert_eq!(snapshot.state, TaskState::Completed);

    let monitor = task.populate_response().await;
    assert_eq!(monitor.status(), StatusCode::OK);
    assert_eq!(
        monitor.headers().get(header::LOCATION).unwrap(),
        "/redfish/v1/Managers/bmc/LogServices/Dump/Entries/3"
    );
    let body = body_json(monitor).await;
    assert_eq!(body["TaskState"], "Completed");
    assert_eq!(
        body["Payload"]["TargetUri"],
        "/redfish/v1/Managers/bmc/LogServices/Dump/Actions/LogService.CollectDiagnosticData"
    );
    assert_eq!(bus.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn dump_in_progress_ticks_keep_the_deadline_alive() {
    use tokio::time::{advance, Duration};

    let (bus, state) = setup();
    bus.register_method("/xyz/openbmc_project/dump/bmc", "CreateDump", |_| {
        Ok(json!("/xyz/openbmc_project/dump/bmc/entry/7"))
    })
    .await;

    let response = dumps::collect_diagnostic_data(
        State(Arc::clone(&state)),
        Json(json!({ "DiagnosticDataType": "Manager" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let task = state.registry.get(0).await.unwrap();

    let entry = "/xyz/openbmc_project/dump/bmc/entry/7";
    let progress = "xyz.openbmc_project.Common.Progress";

    // shortly before the six-minute budget runs out, the dump is still
    // reporting progress
    advance(Duration::from_secs(5 * 60)).await;
    bus.publish(Notification::property_changed(
        entry,
        progress,
        json!({ "Status": "xyz.openbmc_project.Common.Progress.OperationStatus.InProgress" }),
    ))
    .await;
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }

    // well past the original deadline, inside the refreshed one
    advance(Duration::from_secs(5 * 60)).await;
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    assert_eq!(task.snapshot().await.state, TaskState::Running);

    bus.publish(Notification::property_changed(
        entry,
        progress,
        json!({ "Status": "xyz.openbmc_project.Common.Progress.OperationStatus.Completed" }),
    ))
    .await;
    let snapshot = wait_terminal(&task).await;
    assert_eq!(snapshot.state, TaskState::Completed);
}

#[tokio::test]
async fn dump_request_validation() {
    let (bus, state) = setup();

    let missing =
        dumps::collect_diagnostic_data(State(Arc::clone(&state)), Json(json!({}))).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    let body = body_json(missing).await;
    assert_eq!(body["error"]["code"], "Base.1.11.0.ActionParameterMissing");

    let wrong = dumps::collect_diagnostic_data(
        State(Arc::clone(&state)),
        Json(json!({ "DiagnosticDataType": "FaultLog" })),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);

    // nothing was started
    assert!(state.registry.all().await.is_empty());
    assert_eq!(bus.opened(), 0);
}

#[tokio::test]
async fn dump_bus_failure_creates_no_task() {
    let (bus, state) = setup();
    // no CreateDump handler registered

    let response = dumps::collect_diagnostic_data(
        State(Arc::clone(&state)),
        Json(json!({ "DiagnosticDataType": "Manager" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(state.registry.all().await.is_empty());
    assert_eq!(bus.opened(), 0);
}

#[tokio::test]
async fn dump_subscription_failure_creates_no_task() {
    let (bus, state) = setup();
    bus.register_method("/xyz/openbmc_project/dump/bmc", "CreateDump", |_| {
        Ok(json!("/xyz/openbmc_project/dump/bmc/entry/5"))
    })
    .await;
    bus.fail_next_subscribe();

    let response = dumps::collect_diagnostic_data(
        State(Arc::clone(&state)),
        Json(json!({ "DiagnosticDataType": "Manager" })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(state.registry.all().await.is_empty());
    assert_eq!(bus.active(), 0);
}

#[tokio::test]
async fn update_flow_staged_then_active_with_single_admission() {
    let (bus, state) = setup();
    bus.register_method("/xyz/openbmc_project/software", "StartUpdate", |_| {
        Ok(json!("/xyz/openbmc_project/software/abc"))
    })
    .await;

    let request = json!({ "ImageURI": "http://example/image.tar" });
    let first =
        update::simple_update(State(Arc::clone(&state)), Json(request.clone())).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(bus.opened(), 1);

    // a concurrent update is refused before it touches the bus
    let second =
        update::simple_update(State(Arc::clone(&state)), Json(request.clone())).await;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(second).await;
    assert_eq!(body["error"]["code"], "Base.1.11.0.ResourceInUse");
    assert_eq!(bus.opened(), 1);

    let task = state.registry.get(0).await.unwrap();
    let software = "/xyz/openbmc_project/software/abc";
    bus.publish(Notification::property_changed(
        software,
        "xyz.openbmc_project.Software.ActivationProgress",
        json!({ "Progress": 30 }),
    ))
    .await;
    wait_until(&task, |snapshot| snapshot.percent_complete == 30).await;

    bus.publish(Notification::property_changed(
        software,
        "xyz.openbmc_project.Software.Activation",
        json!({ "Activation": "xyz.openbmc_project.Software.Activation.Activations.Staged" }),
    ))
    .await;
    let staged = wait_until(&task, |snapshot| snapshot.state == TaskState::Stopping).await;
    assert!(staged
        .messages
        .iter()
        .any(|m| m.message_id == "TaskEvent.1.0.3.TaskPaused"));

    bus.publish(Notification::property_changed(
        software,
        "xyz.openbmc_project.Software.Activation",
        json!({ "Activation": "xyz.openbmc_project.Software.Activation.Activations.Active" }),
    ))
    .await;
    let snapshot = wait_terminal(&task).await;
    assert_eq!(snapshot.state, TaskState::Completed);
    assert_eq!(snapshot.status_code, Some(200));

    // the gate reopens once the update task finalizes
    let third = update::simple_update(State(Arc::clone(&state)), Json(request)).await;
    assert_eq!(third.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn update_failure_releases_the_admission_gate() {
    let (bus, state) = setup();
    bus.register_method("/xyz/openbmc_project/software", "StartUpdate", |_| {
        Ok(json!("/xyz/openbmc_project/software/bad"))
    })
    .await;

    let request = json!({ "ImageURI": "http://example/image.tar" });
    let response =
        update::simple_update(State(Arc::clone(&state)), Json(request.clone())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let task = state.registry.get(0).await.unwrap();
    bus.publish(Notification::property_changed(
        "/xyz/openbmc_project/software/bad",
        "xyz.openbmc_project.Software.Activation",
        json!({ "Activation": "xyz.openbmc_project.Software.Activation.Activations.Failed" }),
    ))
    .await;
    let snapshot = wait_terminal(&task).await;
    assert_eq!(snapshot.state, TaskState::Exception);
    assert_eq!(snapshot.status_code, Some(500));

    let retry = update::simple_update(State(Arc::clone(&state)), Json(request)).await;
    assert_eq!(retry.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn update_request_validation() {
    let (bus, state) = setup();

    let missing = update::simple_update(State(Arc::clone(&state)), Json(json!({}))).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    // a rejected request never consumes the admission gate
    assert!(state.update_guard.try_acquire().is_some());
    assert_eq!(bus.opened(), 0);
}

#[tokio::test]
async fn crashdump_completes_on_first_notification() {
    let (bus, state) = setup();
    bus.register_method("/com/intel/crashdump", "GenerateOnDemandLog", |_| Ok(json!(null)))
        .await;

    let response = crashdump::collect_crash_data(
        State(Arc::clone(&state)),
        Json(json!({
            "DiagnosticDataType": "OEM",
            "OEMDiagnosticDataType": "OnDemand",
        })),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let task = state.registry.get(0).await.unwrap();
    bus.publish(Notification::property_changed(
        "/com/intel/crashdump",
        "com.intel.crashdump.Stored",
        json!({ "Log": "/com/intel/crashdump/0" }),
    ))
    .await;
    let snapshot = wait_terminal(&task).await;
    assert_eq!(snapshot.state, TaskState::Completed);
    assert!(snapshot.messages.iter().any(|m| m.message_id == "Base.1.11.0.Success"));
    assert_eq!(bus.active(), 0);
}

#[tokio::test]
async fn crashdump_requires_the_oem_on_demand_pair() {
    let (bus, state) = setup();

    let wrong = crashdump::collect_crash_data(
        State(Arc::clone(&state)),
        Json(json!({ "DiagnosticDataType": "OEM" })),
    )
    .await;
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);
    assert!(state.registry.all().await.is_empty());
    assert_eq!(bus.opened(), 0);
}
