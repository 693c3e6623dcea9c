//! HTTP surface tests: requests go through the router with `oneshot`, no
//! listener is bound.

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use opsdeck::api::{AppState, create_router};
use opsdeck::connectivity::Connectivity;
use opsdeck::handlers::{HandlerTable, SyncHandler};
use opsdeck::models::{OfflineSyncItem, SyncModule};
use opsdeck::order::ModuleOrderEngine;
use opsdeck::orchestrator::SyncOrchestrator;
use opsdeck::queue::SyncQueue;
use opsdeck::registry::Registry;
use opsdeck::store::Store;

#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SyncHandler for Recorder {
    async fn apply(&self, item: &OfflineSyncItem) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(item.label());
        if item.data.get("fail") == Some(&json!(true)) {
            anyhow::bail!("rejected by backend");
        }
        Ok(())
    }
}

struct TestApp {
    router: Router,
    recorder: Arc<Recorder>,
}

fn app(online: bool) -> TestApp {
    let store = Arc::new(Store::in_memory());
    let engine = ModuleOrderEngine::new(store.clone(), Arc::new(Registry::default()));

    let recorder = Arc::new(Recorder::default());
    let handlers = HandlerTable::new()
        .with(SyncModule::Tickets, recorder.clone())
        .with(SyncModule::Villas, recorder.clone());

    let orchestrator = SyncOrchestrator::new(
        Arc::new(SyncQueue::new(store)),
        handlers,
        Connectivity::new(online),
        Duration::from_secs(2),
    );

    TestApp {
        router: create_router(AppState::new(engine, orchestrator)),
        recorder,
    }
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn module_ids(modules: &Value) -> Vec<String> {
    modules
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app(true);
    let (status, json) = send(&app.router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn modules_are_filtered_by_role() {
    let app = app(true);
    let (status, json) = send(&app.router, Method::GET, "/api/v1/roles/technician/modules", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        module_ids(&json),
        vec!["tickets", "technical_resources", "villas", "settings"]
    );
    assert_eq!(json[0]["is_pinned"], false);
}

#[tokio::test]
async fn unknown_role_is_bad_request() {
    let app = app(true);
    let (status, json) = send(&app.router, Method::GET, "/api/v1/roles/guest/modules", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "unknown role: guest");
}

#[tokio::test]
async fn commands_update_order_and_flags() {
    let app = app(true);
    let uri = "/api/v1/roles/technician/modules/commands";

    send(&app.router, Method::POST, uri, Some(json!({ "command": "toggle_pin", "id": "villas" }))).await;
    let (status, json) = send(
        &app.router,
        Method::POST,
        uri,
        Some(json!({ "command": "move_up", "id": "villas" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        module_ids(&json),
        vec!["tickets", "villas", "technical_resources", "settings"]
    );
    assert_eq!(json[1]["is_pinned"], true);

    let (status, json) = send(
        &app.router,
        Method::POST,
        uri,
        Some(json!({ "command": "move", "from": 0, "to": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("out of range"));
}

#[tokio::test]
async fn offline_changes_drain_on_force_sync() {
    let app = app(false);

    for body in [
        json!({ "module": "tickets", "action": "create", "data": { "id": "t1" } }),
        json!({ "module": "villas", "action": "delete", "data": { "id": 4, "fail": true } }),
        json!({ "module": "invoices", "action": "create", "data": { "id": 9 } }),
    ] {
        let (status, _) = send(&app.router, Method::POST, "/api/v1/sync/queue", Some(body)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (_, queue) = send(&app.router, Method::GET, "/api/v1/sync/queue", None).await;
    assert_eq!(queue.as_array().unwrap().len(), 3);

    let (_, outcome) = send(&app.router, Method::POST, "/api/v1/sync/force", None).await;
    assert_eq!(outcome["outcome"], "skipped");
    assert_eq!(outcome["reason"], "offline");

    let (_, status) = send(
        &app.router,
        Method::PUT,
        "/api/v1/connectivity",
        Some(json!({ "online": true })),
    )
    .await;
    assert_eq!(status["online"], true);
    assert_eq!(status["pending"], 3);

    let (_, outcome) = send(&app.router, Method::POST, "/api/v1/sync/force", None).await;
    assert_eq!(outcome["outcome"], "completed");
    assert_eq!(outcome["total_items"], 3);
    assert_eq!(outcome["success_count"], 1);
    assert_eq!(outcome["error_count"], 2);

    assert_eq!(
        *app.recorder.calls.lock().unwrap(),
        vec!["tickets create t1", "villas delete 4"]
    );

    let (_, history) = send(&app.router, Method::GET, "/api/v1/sync/history", None).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["details"][2], "invoices create 9: failed: unsupported module");

    let (status, _) = send(&app.router, Method::DELETE, "/api/v1/sync/history", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, status) = send(&app.router, Method::GET, "/api/v1/sync/status", None).await;
    assert_eq!(status["pending"], 0);
    assert_eq!(status["history_len"], 0);
}
