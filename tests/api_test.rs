//! REST API tests against the in-memory stack.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{audit_config, block_time, memory_ledger, TestLedger, PRINCIPLE_VII};
use provenance_ledger::audit::AuditEngine;
use provenance_ledger::server::{build_router, cors_layer, AppState};
use provenance_ledger::service::IntakeQueue;

// ============================================================================
// Test Helpers
// ============================================================================

fn app(ledger: &TestLedger) -> Router {
    let state = AppState {
        service: ledger.service.clone(),
        intake: Arc::new(IntakeQueue::spawn(ledger.service.clone(), 2, 8)),
        audit: Arc::new(AuditEngine::new(ledger.store.clone(), audit_config())),
        worker: None,
    };
    build_router().with_state(state)
}

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn submission(identity: &str, body: &str) -> Value {
    json!({
        "identity": identity,
        "format": "txt",
        "content": b64(body.as_bytes()),
        "storage_location": format!("docs/{identity}.txt"),
    })
}

// ============================================================================
// Documents
// ============================================================================

#[tokio::test]
async fn test_submit_created_then_ok() {
    let ledger = memory_ledger();
    let app = app(&ledger);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/documents",
        Some(submission("Principle-VII v1.0", PRINCIPLE_VII)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["created"], true);
    let fingerprint = body["fingerprint"].as_str().unwrap().to_string();
    assert_eq!(fingerprint.len(), 64);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/documents",
        Some(submission("Principle-VII v1.0", PRINCIPLE_VII)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);
    assert_eq!(body["fingerprint"], fingerprint.as_str());

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/v1/documents/Principle-VII%20v1.0",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["versions"].as_array().unwrap().len(), 1);
    assert_eq!(body["versions"][0]["fingerprint"], fingerprint.as_str());

    let uri = format!("/api/v1/proofs/{fingerprint}");
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
}

#[tokio::test]
async fn test_submit_rejects_bad_input() {
    let ledger = memory_ledger();
    let app = app(&ledger);

    let mut bad_base64 = submission("Doc", "x");
    bad_base64["content"] = json!("not base64!!");
    let (status, body) = send(&app, Method::POST, "/api/v1/documents", Some(bad_base64)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_FIELD_VALUE");

    let mut bad_format = submission("Doc", "x");
    bad_format["format"] = json!("docx");
    let (status, body) = send(&app, Method::POST, "/api/v1/documents", Some(bad_format)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "UNSUPPORTED_FORMAT");

    let blank = Some(submission("  ", "x"));
    let (status, _) = send(&app, Method::POST, "/api/v1/documents", blank).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(ledger.calendar.submit_calls(), 0);
}

#[tokio::test]
async fn test_unknown_document_and_proof() {
    let ledger = memory_ledger();
    let app = app(&ledger);

    let (status, body) = send(&app, Method::GET, "/api/v1/documents/Nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RESOURCE_NOT_FOUND");

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/v1/proofs/{}", "00".repeat(32)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RECORD_NOT_FOUND");
    assert_eq!(body["error"]["numeric_code"], 2002);

    let (status, body) = send(&app, Method::GET, "/api/v1/proofs/xyz", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_FINGERPRINT");
}

// ============================================================================
// Verification
// ============================================================================

#[tokio::test]
async fn test_verify_confirmed_and_altered() {
    let ledger = memory_ledger();
    let app = app(&ledger);

    send(
        &app,
        Method::POST,
        "/api/v1/documents",
        Some(submission("Principle-VII v1.0", PRINCIPLE_VII)),
    )
    .await;
    ledger.seal(block_time());
    assert_eq!(ledger.worker(3).poll_once().await.unwrap().confirmed, 1);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/verify",
        Some(json!({ "format": "txt", "content": b64(PRINCIPLE_VII.as_bytes()) })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["outcome"], "confirmed");

    // An altered copy checked against the ledger's record
    let record = ledger
        .service
        .history(&"Principle-VII v1.0".into())
        .await
        .unwrap()[0]
        .clone();
    let altered = PRINCIPLE_VII.replace("truth", "trust");
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/verify",
        Some(json!({
            "format": "txt",
            "content": b64(altered.as_bytes()),
            "proof": record,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["outcome"], "content_mismatch");
    assert_ne!(body["fingerprint"], body["result"]["expected"]);
}

// ============================================================================
// Audit
// ============================================================================

#[tokio::test]
async fn test_duplicate_claim_finding_and_acknowledgement() {
    let ledger = memory_ledger();
    let app = app(&ledger);

    send(&app, Method::POST, "/api/v1/documents", Some(submission("Doc-A", "shared"))).await;
    let second = Some(submission("Doc-B", "shared"));
    let (_, body) = send(&app, Method::POST, "/api/v1/documents", second).await;
    let fingerprint = body["fingerprint"].clone();

    let (status, body) = send(&app, Method::GET, "/api/v1/audit/findings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["findings"][0]["severity"], "duplicate_claim");
    assert_eq!(body["findings"][0]["documents"], json!(["Doc-A", "Doc-B"]));

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/documents/Doc-B/intentional-duplicates",
        Some(json!({ "fingerprint": fingerprint })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, Method::GET, "/api/v1/audit/findings", None).await;
    assert_eq!(body["count"], 0);

    let page = "/api/v1/audit/events?after=1&limit=2";
    let (status, body) = send(&app, Method::GET, page, None).await;
    assert_eq!(status, StatusCode::OK);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["sequence"], 2);
    assert_eq!(body["next_after"], 3);
}

#[tokio::test]
async fn test_poll_without_worker_is_unavailable() {
    let ledger = memory_ledger();
    let (status, body) = send(&app(&ledger), Method::POST, "/api/v1/anchors/poll", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "ANCHOR_UNAVAILABLE");
}

// ============================================================================
// Health checks
// ============================================================================

#[tokio::test]
async fn test_health_and_readiness() {
    let ledger = memory_ledger();
    let app = app(&ledger);

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    send(&app, Method::POST, "/api/v1/documents", Some(submission("Doc", "body"))).await;
    let (status, body) = send(&app, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["pending_proofs"], 1);
    assert_eq!(body["authority"], "memory");
    assert_eq!(body["confirmation_worker"], false);
}

#[tokio::test]
async fn test_cors_preflight_allows_listed_origin() {
    let ledger = memory_ledger();
    let origins = "https://audit.example, https://docs.example";
    let app = app(&ledger).layer(cors_layer(origins).unwrap());

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/v1/verify")
        .header("origin", "https://docs.example")
        .header("access-control-request-method", "POST")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://docs.example"
    );

    assert!(cors_layer("https://ok.example,\u{7f}bad").is_err());
}
