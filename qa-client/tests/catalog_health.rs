mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use common::{
    TEST_TIMEOUT, client_for, json_response, spawn_mock, spawn_mock_on, unused_addr,
};
use qa_client::{QaClient, QaClientConfig};
use tokio::time::timeout;
use context_gating::ProcessSource;
use qa_client::catalog::{fetch_processes, fetch_roles, fetch_tasks};
use qa_client::error_handler::ErrorKind;

fn catalog_app() -> Router {
    Router::new()
        .route(
            "/api/bpmn/definitions",
            get(|| async {
                json_response(
                    StatusCode::OK,
                    r#"{"ok":true,"definitions":[{"id":"d1","name":"urlaub.bpmn","processCount":1,"processes":[{"id":"p1","name":"Urlaub"}]}]}"#,
                )
            }),
        )
        .route(
            "/api/search/process-names",
            get(|| async {
                json_response(
                    StatusCode::OK,
                    r#"{"ok":true,"process_names":[{"name":"URLAUB","doc_count":3,"has_model":false},{"name":"Einkauf","doc_count":1,"has_model":false}]}"#,
                )
            }),
        )
        .route(
            "/api/bpmn/processes/p1/combo",
            get(|| async {
                json_response(
                    StatusCode::OK,
                    r#"{"ok":true,"id":"p1","name":"Urlaub","lanes":[],"nodes":[
                        {"id":"t1","name":"Antrag stellen","type":"userTask","laneId":"l1"},
                        {"id":"e1","name":"Start","type":"startEvent"},
                        {"id":"t2","name":"Antrag genehmigen","type":"userTask","laneId":"l2"}]}"#,
                )
            }),
        )
        .route(
            "/api/bpmn/processes/p1/lanes",
            get(|| async {
                json_response(
                    StatusCode::OK,
                    r#"{"ok":true,"lanes":[{"id":"l1","name":"Mitarbeiter","task_count":1},{"id":"l2","name":"Teamleitung"}]}"#,
                )
            }),
        )
        .route(
            "/api/bpmn/processes/p2/combo",
            get(|| async {
                json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    r#"{"error":{"code":"NEO4J_UNAVAILABLE","message":"graph down"}}"#,
                )
            }),
        )
        .route("/health", get(|| async { json_response(StatusCode::OK, r#"{"status":"ok"}"#) }))
}

#[tokio::test]
async fn processes_are_merged_modeled_first() {
    let mock = spawn_mock(catalog_app()).await;
    let client = client_for(&mock, 2_000, 2_000);

    let processes = fetch_processes(&client).await.expect("processes");
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[0].id, "p1");
    assert_eq!(processes[0].source, ProcessSource::Modeled);
    assert_eq!(processes[0].doc_count, Some(3));
    assert_eq!(processes[1].id, "doc_Einkauf");
    assert!(!processes[1].has_model);
}

#[tokio::test]
async fn tasks_and_roles_of_a_modeled_process() {
    let mock = spawn_mock(catalog_app()).await;
    let client = client_for(&mock, 2_000, 2_000);

    let tasks = fetch_tasks(&client, "p1").await;
    let names: Vec<_> = tasks.iter().map(|t| t.task_name.as_str()).collect();
    assert_eq!(names, vec!["Antrag stellen", "Antrag genehmigen"]);

    let roles = fetch_roles(&client, "p1").await;
    assert_eq!(roles.len(), 2);
    assert_eq!(roles[0].task_count, Some(1));
}

#[tokio::test]
async fn catalog_failures_degrade_to_empty_lists() {
    let mock = spawn_mock(catalog_app()).await;
    let client = client_for(&mock, 2_000, 2_000);

    assert!(fetch_tasks(&client, "p2").await.is_empty());
    assert!(fetch_roles(&client, "unknown").await.is_empty());
}

#[tokio::test]
async fn missing_definitions_endpoint_is_an_error() {
    let mock = spawn_mock(Router::new()).await;
    let client = client_for(&mock, 2_000, 2_000);

    let err = fetch_processes(&client).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnknownError);
    assert!(!err.retryable);
}

#[tokio::test]
async fn health_probe_reports_ok_and_down() {
    let mock = spawn_mock(catalog_app()).await;
    let client = client_for(&mock, 2_000, 2_000);
    let status = client.health().await;
    assert!(status.ok);
    assert_eq!(status.status, Some(200));
    assert!(status.endpoint.ends_with("/health"));

    let down = spawn_mock(Router::new()).await;
    let client = client_for(&down, 2_000, 2_000);
    let status = client.health().await;
    assert!(!status.ok);
}

#[tokio::test]
async fn catalog_get_retries_until_backend_comes_up() {
    let addr = unused_addr().await;
    let client = QaClient::new(QaClientConfig::with_base_url(format!("http://{addr}")))
        .expect("client")
        .with_retry_delay(Duration::from_millis(100));

    // Attempts at ~0ms and ~100ms are refused; the one at ~300ms succeeds.
    let started = Instant::now();
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        spawn_mock_on(&addr.to_string(), catalog_app()).await
    });

    let processes = timeout(TEST_TIMEOUT, fetch_processes(&client))
        .await
        .expect("retries finished in time")
        .expect("processes after retry");
    assert_eq!(processes[0].id, "p1");
    assert!(started.elapsed() >= Duration::from_millis(150));

    drop(late.await.expect("late mock"));
}

#[tokio::test]
async fn catalog_get_gives_up_after_three_retries() {
    let addr = unused_addr().await;
    let client = QaClient::new(QaClientConfig::with_base_url(format!("http://{addr}")))
        .expect("client")
        .with_retry_delay(Duration::from_millis(20));

    // Back-off is linear: 20 + 40 + 60 ms before the last attempt.
    let started = Instant::now();
    let err = timeout(TEST_TIMEOUT, fetch_processes(&client))
        .await
        .expect("retries finished in time")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NetworkError);
    assert!(started.elapsed() >= Duration::from_millis(120));
}

#[tokio::test]
async fn catalog_get_does_not_retry_http_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counted = hits.clone();
    let app = Router::new().route(
        "/api/bpmn/definitions",
        get(move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    r#"{"error":{"code":"SERVICE_UNAVAILABLE","message":"busy"}}"#,
                )
            }
        }),
    );
    let mock = spawn_mock(app).await;
    let client = client_for(&mock, 2_000, 2_000);

    let err = fetch_processes(&client).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
