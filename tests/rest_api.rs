mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;

// ── Test infrastructure ──────────────────────────────────────

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn authed(method: &str, uri: &str, holder: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {TOKEN}"))
        .header("x-holder-id", holder)
}

async fn post(app: &Router, path: &str, holder: &str, body: Value) -> (StatusCode, Value) {
    let req = authed("POST", path, holder)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    call(app, req).await
}

async fn get(app: &Router, path: &str, holder: &str) -> (StatusCode, Value) {
    call(app, authed("GET", path, holder).body(Body::empty()).unwrap()).await
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_needs_no_credentials() {
    let app = test_app(&test_state());
    let req = Request::get("/healthz").body(Body::empty()).unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn credentials_required() {
    let app = test_app(&test_state());

    let req = Request::post("/slots/hold")
        .header("content-type", "application/json")
        .body(Body::from(json!({"slot_id": 42}).to_string()))
        .unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": "unauthorized"}));

    let req = Request::get("/slots/42/status")
        .header("authorization", "Bearer wrong")
        .header("x-holder-id", "A")
        .body(Body::empty())
        .unwrap();
    assert_eq!(call(&app, req).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn hold_conflict_release_retry() {
    let app = test_app(&test_state());

    let (status, body) = post(&app, "/slots/hold", "A", json!({"slot_id": 42})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"ok": true, "slot_id": 42, "owner": "A", "ttl": 120, "renewed": false})
    );

    let (status, body) = post(&app, "/slots/hold", "B", json!({"slot_id": 42})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "slot_on_hold");
    assert_eq!(body["held_by"], "A");
    assert!(body["ttl"].as_u64().unwrap() > 115);

    let (status, body) = post(&app, "/slots/hold", "A", json!({"slot_id": 42})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["renewed"], true);

    let (status, body) = post(&app, "/slots/release", "A", json!({"slot_id": 42})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true, "released": true}));

    let (_, body) = post(&app, "/slots/release", "A", json!({"slot_id": 42})).await;
    assert_eq!(body, json!({"ok": true, "released": false}));

    let (status, body) = post(&app, "/slots/hold", "B", json!({"slot_id": 42})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner"], "B");
}

#[tokio::test]
async fn release_by_other_holder_forbidden() {
    let app = test_app(&test_state());
    post(&app, "/slots/hold", "A", json!({"slot_id": 42})).await;

    let (status, body) = post(&app, "/slots/release", "B", json!({"slot_id": 42})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({"error": "not_owner"}));

    let (_, body) = get(&app, "/slots/42/status", "B").await;
    assert_eq!(body["status"], "HOLD");
}

#[tokio::test]
async fn one_hold_per_holder() {
    let app = test_app(&test_state());
    post(&app, "/slots/hold", "A", json!({"slot_id": 42})).await;

    let (status, body) = post(&app, "/slots/hold", "A", json!({"slot_id": 43})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "user_has_other_hold");
    assert_eq!(body["slot_id"], 42);
}

#[tokio::test]
async fn validation_errors() {
    let app = test_app(&test_state());

    let (status, body) = post(&app, "/slots/hold", "A", json!({"slot_id": 50})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"error": "day_not_enabled", "enabled_days": ["2025-03-01"]})
    );

    let (status, body) = post(&app, "/slots/hold", "A", json!({"slot_id": 999})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "slot_not_found"}));

    let (status, body) = post(&app, "/slots/hold", "A", json!({"slot_id": 44})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({"error": "slot_booked"}));

    let (status, body) = post(&app, "/slots/hold", "A", json!({"slot_id": "abc"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");

    let (status, body) = get(&app, "/slots/abc/status", "A").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn unseeded_tenant_has_no_active_period() {
    let app = test_app(&test_state());
    let req = authed("POST", "/slots/hold", "A")
        .header("x-tenant", "elsewhere")
        .header("content-type", "application/json")
        .body(Body::from(json!({"slot_id": 42}).to_string()))
        .unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, json!({"error": "no_active_period"}));
}

#[tokio::test]
async fn status_reports_owner_and_ttl() {
    let app = test_app(&test_state());

    let (status, body) = get(&app, "/slots/42/status", "A").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"slot_id": 42, "status": "FREE"}));

    post(&app, "/slots/hold", "A", json!({"slot_id": 42})).await;
    let (_, body) = get(&app, "/slots/42/status", "B").await;
    assert_eq!(body["status"], "HOLD");
    assert_eq!(body["owner"], "A");
    assert!(body["ttl"].as_u64().unwrap() <= 120);

    let (_, body) = get(&app, "/slots/44/status", "A").await;
    assert_eq!(body, json!({"slot_id": 44, "status": "BOOKED"}));
}

#[tokio::test]
async fn hold_listing_is_for_coordinators() {
    let app = test_app(&test_state());
    post(&app, "/slots/hold", "A", json!({"slot_id": 43})).await;

    let (status, body) = get(&app, "/slots/holds", "A").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({"error": "forbidden"}));

    let req = authed("GET", "/slots/holds", "boss")
        .header("x-role", "coordinator")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["slot_id"], 43);
    assert_eq!(items[0]["owner"], "A");
    assert_eq!(items[0]["day"], DAY);
}

#[tokio::test]
async fn commit_books_the_slot() {
    let app = test_app(&test_state());

    let (status, body) = post(&app, "/slots/commit", "A", json!({"slot_id": 42})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({"error": "no_hold"}));

    post(&app, "/slots/hold", "A", json!({"slot_id": 42})).await;
    let (status, _) = post(&app, "/slots/commit", "B", json!({"slot_id": 42})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = post(&app, "/slots/commit", "A", json!({"slot_id": 42})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true, "slot_id": 42, "status": "BOOKED"}));

    let (_, body) = get(&app, "/slots/42/status", "A").await;
    assert_eq!(body["status"], "BOOKED");

    // The holder is free to hold again
    let (status, _) = post(&app, "/slots/hold", "A", json!({"slot_id": 43})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn day_snapshot() {
    let app = test_app(&test_state());
    post(&app, "/slots/hold", "A", json!({"slot_id": 43})).await;

    let (status, body) = get(&app, &format!("/days/{DAY}/snapshot"), "A").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["day"], DAY);
    assert_eq!(body["booked"], json!([44]));
    assert_eq!(body["held"][0]["slot_id"], 43);

    let (status, _) = get(&app, "/days/not-a-day/snapshot", "A").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
