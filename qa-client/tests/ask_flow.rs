mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use common::{RequestLog, TEST_TIMEOUT, json_response, spawn_mock};
use context_gating::AskRequest;
use qa_client::error_handler::ErrorKind;
use qa_client::{QaClient, QaClientConfig};
use serde_json::Value;
use tokio::time::timeout;

const ASK_PATH: &str = "/api/qa/ask";

fn request() -> AskRequest {
    AskRequest {
        query: "Wer genehmigt den Urlaubsantrag?".into(),
        process_id: Some("p1".into()),
        force_process_context: Some(true),
        ..AskRequest::default()
    }
}

fn client_with_ask_timeout(base_url: &str, ask_timeout: Duration) -> QaClient {
    let config = QaClientConfig {
        connect_timeout: Duration::from_millis(100),
        ask_timeout,
        ..QaClientConfig::with_base_url(base_url)
    };
    QaClient::new(config).expect("client")
}

#[tokio::test]
async fn ask_round_trip_posts_request_and_decodes_answer() {
    let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();
    let app = Router::new().route(
        ASK_PATH,
        post(move |Json(body): Json<Value>| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(body);
                json_response(
                    StatusCode::OK,
                    r#"{"answer":"Die Teamleitung.","context":[{"chunk_id":"c1","text":"Antrag","rerank_score":2.0}],
                        "gating_mode":"PROCESS_CONTEXT","gating_hint":null,"gating_metadata":null,
                        "whitelist":false,"used_model":"m","used_hyde":false,"used_rerank":true,
                        "top_k":5,"position":null,"process_overview":{"all_lanes":["Mitarbeiter"],"all_steps":[],"key_decisions":null}}"#,
                )
            }
        }),
    );
    let mock = spawn_mock(app).await;
    let client = client_with_ask_timeout(&mock.base_url, Duration::from_secs(2));

    let resp = timeout(TEST_TIMEOUT, client.ask(&request()))
        .await
        .expect("ask finished in time")
        .expect("ask succeeded");

    assert_eq!(resp.answer, "Die Teamleitung.");
    assert_eq!(resp.context.len(), 1);
    assert_eq!(resp.gating_mode, "PROCESS_CONTEXT");
    assert!(resp.gating_hint.is_empty());
    assert_eq!(resp.top_k, Some(5));
    let overview = resp.process_overview.expect("overview");
    assert_eq!(overview.all_lanes, vec!["Mitarbeiter".to_string()]);
    assert!(overview.key_decisions.is_empty());

    let bodies = log.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["query"], "Wer genehmigt den Urlaubsantrag?");
    assert_eq!(bodies[0]["process_id"], "p1");
    assert_eq!(bodies[0]["force_process_context"], true);
    assert!(bodies[0].get("current_node_id").is_none());
}

#[tokio::test]
async fn ask_validation_error_surfaces_backend_message() {
    let app = Router::new().route(
        ASK_PATH,
        post(|| async {
            json_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"error":{"code":"VALIDATION_ERROR","message":"query must not be empty","request_id":"r-1"}}"#,
            )
        }),
    );
    let mock = spawn_mock(app).await;
    let client = client_with_ask_timeout(&mock.base_url, Duration::from_secs(2));

    let err = client.ask(&request()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ValidationError);
    assert!(!err.retryable);
    assert_eq!(err.user_message, "query must not be empty");
    assert_eq!(err.request_id.as_deref(), Some("r-1"));
}

#[tokio::test]
async fn ask_outlives_the_connection_timer_but_not_its_own_bound() {
    let app = Router::new().route(
        ASK_PATH,
        post(|| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            json_response(StatusCode::OK, r#"{"answer":"spät"}"#)
        }),
    );
    let mock = spawn_mock(app).await;

    // Generation takes longer than the 100ms connection timer.
    let patient = client_with_ask_timeout(&mock.base_url, Duration::from_secs(2));
    let resp = patient.ask(&request()).await.expect("ask succeeded");
    assert_eq!(resp.answer, "spät");

    let impatient = client_with_ask_timeout(&mock.base_url, Duration::from_millis(100));
    let err = timeout(TEST_TIMEOUT, impatient.ask(&request()))
        .await
        .expect("ask timeout fired in time")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::LlmTimeout);
    assert!(err.retryable);
}
