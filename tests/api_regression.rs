//! API Regression Tests
//!
//! In-process tests that build the Axum app via `create_app()` and exercise
//! every /api/* endpoint using `tower::ServiceExt::oneshot()`.
//! No binary spawn, no network port.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{fast_config, test_plane};
use health_plane::api::create_app;
use health_plane::{ControlPlane, PlaneConfig};

async fn send(plane: &ControlPlane, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = create_app(plane.clone()).oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|e| panic!("{uri}: body is not JSON: {e}"))
    };
    (status, value)
}

async fn get(plane: &ControlPlane, uri: &str) -> (StatusCode, Value) {
    send(plane, Method::GET, uri, None).await
}

async fn post(plane: &ControlPlane, uri: &str, body: Value) -> (StatusCode, Value) {
    send(plane, Method::POST, uri, Some(body)).await
}

fn descriptor(id: &str) -> Value {
    json!({
        "id": id,
        "probeEndpoint": format!("http://{id}:8080/health"),
        "restartCommand": format!("systemctl restart {id}"),
        "failureThreshold": 3
    })
}

/// All collection GET endpoints should return 200 on an empty plane.
#[tokio::test]
async fn test_get_endpoints_return_200() {
    let t = test_plane(fast_config(), true);

    let endpoints = [
        "/api/health",
        "/api/health/system",
        "/api/services",
        "/api/circuit",
        "/api/events/history",
        "/api/events/types",
        "/api/healing/history",
        "/api/analytics/report",
        "/api/analytics/services/anything",
    ];

    for endpoint in &endpoints {
        let (status, _) = get(&t.plane, endpoint).await;
        assert!(status.is_success(), "GET {endpoint} returned status {status}");
    }
}

#[tokio::test]
async fn test_plane_health_reports_version_and_count() {
    let t = test_plane(fast_config(), true);
    post(&t.plane, "/api/services/register", descriptor("svc-1")).await;

    let (status, body) = get(&t.plane, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["servicesTracked"], 1);
    assert_eq!(body["probing"], false);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_system_health_with_no_services_is_100_percent() {
    let t = test_plane(fast_config(), true);
    let (_, body) = get(&t.plane, "/api/health/system").await;
    assert_eq!(body["totalServices"], 0);
    assert_eq!(body["healthPercentage"], 100.0);
    assert_eq!(body["totalRestarts"], 0);
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test]
async fn test_register_and_list_services() {
    let t = test_plane(fast_config(), true);

    let (status, body) = post(&t.plane, "/api/services/register", descriptor("svc-b")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "svc-b");
    post(&t.plane, "/api/services/register", descriptor("svc-a")).await;

    let (_, list) = get(&t.plane, "/api/services").await;
    let ids: Vec<&str> = list.as_array().unwrap().iter().map(|d| d["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["svc-a", "svc-b"]);

    // Registration creates a Closed breaker and a service.registered event
    let (status, circuit) = get(&t.plane, "/api/circuit/svc-a").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(circuit["state"], "Closed");
    let (_, events) = get(&t.plane, "/api/events/history?type=service.registered").await;
    assert_eq!(events.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicate_registration_is_400() {
    let t = test_plane(fast_config(), true);
    post(&t.plane, "/api/services/register", descriptor("svc-1")).await;

    let (status, body) = post(&t.plane, "/api/services/register", descriptor("svc-1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "DuplicateServiceError");
    assert!(body["error"]["message"].as_str().unwrap().contains("svc-1"));
}

#[tokio::test]
async fn test_malformed_descriptor_is_400() {
    let t = test_plane(fast_config(), true);

    let (status, body) = post(&t.plane, "/api/services/register", json!({ "id": "no-endpoint" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "InvalidRequest");

    let (status, body) = post(
        &t.plane,
        "/api/services/register",
        json!({ "id": "zero", "probeEndpoint": "http://zero/health", "probeIntervalMs": 0 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "InvalidRequest");
}

#[tokio::test]
async fn test_unknown_service_is_404_everywhere() {
    let t = test_plane(fast_config(), true);

    for uri in [
        "/api/services/ghost/health",
        "/api/services/ghost/health?cached=true",
        "/api/circuit/ghost",
        "/api/healing/services/ghost",
        "/api/healing/services/ghost/history",
    ] {
        let (status, body) = get(&t.plane, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "GET {uri}");
        assert_eq!(body["error"]["kind"], "UnknownServiceError", "GET {uri}");
        assert!(body["meta"]["version"].is_string());
    }

    let (status, body) = post(&t.plane, "/api/healing/services/ghost/heal", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "UnknownServiceError");
}

#[tokio::test]
async fn test_health_endpoint_probes_unless_cached() {
    let t = test_plane(fast_config(), true);
    post(&t.plane, "/api/services/register", descriptor("svc-1")).await;

    let (_, cached) = get(&t.plane, "/api/services/svc-1/health?cached=true").await;
    assert_eq!(cached["status"], "Unknown");
    assert_eq!(cached["totalProbes"], 0);

    let (status, probed) = get(&t.plane, "/api/services/svc-1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(probed["status"], "Healthy");
    assert_eq!(probed["totalProbes"], 1);
    assert_eq!(probed["consecutiveFailures"], 0);

    t.prober.set_up("svc-1", false);
    let (_, degraded) = get(&t.plane, "/api/services/svc-1/health").await;
    assert_eq!(degraded["status"], "Degraded");
    assert_eq!(degraded["consecutiveFailures"], 1);
    assert!(degraded["lastError"].as_str().unwrap().contains("refused"));

    let (_, events) = get(&t.plane, "/api/events/history?type=service.degraded").await;
    assert_eq!(events.as_array().unwrap().len(), 1);
    assert_eq!(events[0]["payload"]["serviceId"], "svc-1");
}

#[tokio::test]
async fn test_deregister_removes_service() {
    let t = test_plane(fast_config(), true);
    post(&t.plane, "/api/services/register", descriptor("svc-1")).await;

    let (status, removed) = send(&t.plane, Method::DELETE, "/api/services/svc-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(removed, json!(true));

    let (_, again) = send(&t.plane, Method::DELETE, "/api/services/svc-1", None).await;
    assert_eq!(again, json!(false));

    let (status, _) = get(&t.plane, "/api/circuit/svc-1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Re-registration is allowed once the id is free
    let (status, _) = post(&t.plane, "/api/services/register", descriptor("svc-1")).await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Circuit breakers
// ============================================================================

#[tokio::test]
async fn test_circuit_opens_and_resets() {
    let t = test_plane(fast_config(), true);
    let mut desc = descriptor("svc-1");
    desc["breakerThreshold"] = json!(2);
    post(&t.plane, "/api/services/register", desc).await;

    t.prober.set_up("svc-1", false);
    get(&t.plane, "/api/services/svc-1/health").await;
    get(&t.plane, "/api/services/svc-1/health").await;

    let (_, circuit) = get(&t.plane, "/api/circuit/svc-1").await;
    assert_eq!(circuit["state"], "Open");
    assert_eq!(circuit["failureCount"], 2);
    assert!(circuit["openedAt"].is_string());

    let (_, reset) = post(&t.plane, "/api/circuit/svc-1/reset", json!({})).await;
    assert_eq!(reset, json!(true));
    let (_, circuit) = get(&t.plane, "/api/circuit/svc-1").await;
    assert_eq!(circuit["state"], "Closed");
    assert_eq!(circuit["failureCount"], 0);

    let (_, unknown) = post(&t.plane, "/api/circuit/ghost/reset", json!({})).await;
    assert_eq!(unknown, json!(false));

    let (_, all) = get(&t.plane, "/api/circuit").await;
    assert_eq!(all.as_array().unwrap().len(), 1);
}

// ============================================================================
// Event bus
// ============================================================================

/// 150 events into a ring of 100: only the last 100 survive, in order.
#[tokio::test]
async fn test_event_history_keeps_last_100_in_order() {
    let t = test_plane(PlaneConfig::default(), true);

    for n in 0..150 {
        let (status, _) = post(
            &t.plane,
            "/api/events/publish",
            json!({ "type": "test.tick", "payload": { "n": n } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, events) = get(&t.plane, "/api/events/history?limit=100").await;
    let ns: Vec<i64> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["payload"]["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, (50..150).collect::<Vec<i64>>());

    // Asking for more than the ring holds returns what is retained
    let (_, all) = get(&t.plane, "/api/events/history?limit=1000").await;
    assert_eq!(all.as_array().unwrap().len(), 100);
    assert!(all.as_array().unwrap().iter().all(|e| e["payload"]["n"].as_i64().unwrap() >= 50));
}

#[tokio::test]
async fn test_publish_defaults_source_and_rejects_empty_type() {
    let t = test_plane(fast_config(), true);

    let (status, event) = post(&t.plane, "/api/events/publish", json!({ "type": "deploy.finished" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["type"], "deploy.finished");
    assert_eq!(event["sourceComponent"], "http-api");
    assert!(event["id"].is_string());

    let (status, body) = post(&t.plane, "/api/events/publish", json!({ "type": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "InvalidRequest");
}

#[tokio::test]
async fn test_event_types_lists_internal_subscribers() {
    let t = test_plane(fast_config(), true);
    let (_, types) = get(&t.plane, "/api/events/types").await;

    let count = |name: &str| {
        types
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["type"] == name)
            .and_then(|s| s["subscribers"].as_u64())
            .unwrap_or(0)
    };
    assert!(count("service.failed") >= 1, "{types}");
    assert!(count("breaker.opened") >= 1, "{types}");
    assert!(count("task.completed") >= 1, "{types}");
}

#[tokio::test]
async fn test_bad_history_query_is_400() {
    let t = test_plane(fast_config(), true);
    let (status, body) = get(&t.plane, "/api/events/history?limit=lots").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "InvalidRequest");
}

// ============================================================================
// Analytics
// ============================================================================

#[tokio::test]
async fn test_task_outcomes_via_http_and_bus() {
    let t = test_plane(fast_config(), true);

    for (task, status, duration) in [("t1", "completed", 100), ("t2", "completed", 300), ("t3", "failed", 200)] {
        let (code, _) = post(
            &t.plane,
            "/api/analytics/tasks",
            json!({ "taskId": task, "serviceId": "billing", "status": status, "durationMs": duration }),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
    }

    // Bus-fed outcome: the event type decides the status
    post(
        &t.plane,
        "/api/events/publish",
        json!({ "type": "task.failed", "payload": { "taskId": "t4", "serviceId": "search", "durationMs": 50 } }),
    )
    .await;

    let (_, report) = get(&t.plane, "/api/analytics/report").await;
    assert_eq!(report["total"], 4);
    assert_eq!(report["completed"], 2);
    assert_eq!(report["failed"], 2);
    assert_eq!(report["avgDuration"], 162.5);
    assert_eq!(report["byService"]["billing"]["total"], 3);
    assert_eq!(report["byService"]["search"]["failed"], 1);

    let (_, perf) = get(&t.plane, "/api/analytics/services/billing").await;
    assert_eq!(perf["totalTasks"], 3);
    assert_eq!(perf["avgDuration"], 200.0);
    let rate = perf["successRate"].as_f64().unwrap();
    assert!((rate - 2.0 / 3.0).abs() < 1e-9);
}

/// A window longer than the clock can express reports over the whole series.
#[tokio::test]
async fn test_oversized_report_window_is_200() {
    let t = test_plane(fast_config(), true);
    post(
        &t.plane,
        "/api/analytics/tasks",
        json!({ "taskId": "t1", "serviceId": "billing", "status": "completed", "durationMs": 10 }),
    )
    .await;

    for window in ["100000000000000000", "18446744073709551615"] {
        let (status, report) = get(&t.plane, &format!("/api/analytics/report?windowMs={window}")).await;
        assert_eq!(status, StatusCode::OK, "windowMs={window}");
        assert_eq!(report["total"], 1);
    }
}

#[tokio::test]
async fn test_task_without_service_is_400() {
    let t = test_plane(fast_config(), true);
    let (status, body) = post(
        &t.plane,
        "/api/analytics/tasks",
        json!({ "taskId": "t1", "serviceId": "", "status": "completed", "durationMs": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "InvalidRequest");
}

// ============================================================================
// Healing
// ============================================================================

#[tokio::test]
async fn test_healing_status_and_history_shapes() {
    let t = test_plane(fast_config(), true);
    post(&t.plane, "/api/services/register", descriptor("svc-1")).await;

    let (status, body) = get(&t.plane, "/api/healing/services/svc-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "Watching");
    assert_eq!(body["restartsInWindow"], 0);

    let (_, history) = get(&t.plane, "/api/healing/history?limit=5").await;
    assert!(history.as_array().unwrap().is_empty());
}

/// Operator-triggered heal restarts a failed service and the per-service
/// history shows the restart.
#[tokio::test(start_paused = true)]
async fn test_manual_heal_and_service_history() {
    let t = test_plane(fast_config(), true);
    let mut desc = descriptor("svc-1");
    desc["failureThreshold"] = json!(1);
    post(&t.plane, "/api/services/register", desc).await;
    post(&t.plane, "/api/services/register", descriptor("svc-2")).await;

    t.prober.set_up("svc-1", false);
    let (_, record) = get(&t.plane, "/api/services/svc-1/health").await;
    assert_eq!(record["status"], "Failed");

    let (status, outcome) = post(&t.plane, "/api/healing/services/svc-1/heal", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["serviceId"], "svc-1");
    assert_eq!(outcome["phase"], "Healed");
    assert_eq!(t.supervisor.calls(), 1);

    let (status, history) = get(&t.plane, "/api/healing/services/svc-1/history?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["serviceId"], "svc-1");
    assert_eq!(history[0]["action"], "Restart");
    assert_eq!(history[0]["success"], true);

    // Healthy service: nothing to do, no restart
    let (_, outcome) = post(&t.plane, "/api/healing/services/svc-1/heal", json!({})).await;
    assert_eq!(outcome["phase"], "Healed");
    assert_eq!(t.supervisor.calls(), 1);

    let (_, other) = get(&t.plane, "/api/healing/services/svc-2/history").await;
    assert!(other.as_array().unwrap().is_empty());
}
