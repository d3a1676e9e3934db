//! Integration tests for the HTTP API.
//!
//! Requests go through the full router (middleware included) against an
//! in-memory store.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use table_pool::{Amount, MemoryStore, PlayerId, SeededRandom, TableEngine};
use tower::ServiceExt; // For `oneshot` method
use tp_server::api::{AppState, create_router};

const BOT: &str = "TestBot";

fn create_test_server() -> (axum::Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = TableEngine::new(store.clone()).with_random(Arc::new(SeededRandom::new(11)));
    let app = create_router(AppState::new(engine, None, BOT));
    (app, store)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_table(app: &axum::Router, kind: &str, fee: &str) -> Value {
    let (status, body) = send(
        app,
        post_json("/api/v1/tables", json!({"kind": kind, "entry_fee": fee})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

async fn join(app: &axum::Router, table_id: i64, player_id: PlayerId) -> (StatusCode, Value) {
    send(
        app,
        post_json(
            &format!("/api/v1/tables/{table_id}/join"),
            json!({"player_id": player_id}),
        ),
    )
    .await
}

// ============================================================================
// Health Check Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let (app, _) = create_test_server();

    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["open_tables"], 0);
}

#[tokio::test]
async fn test_request_id_header_is_set_and_echoed() {
    let (app, _) = create_test_server();

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    let generated = response.headers().get("x-request-id").unwrap();
    assert!(!generated.is_empty());

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");
}

// ============================================================================
// Table Creation & Queries
// ============================================================================

#[tokio::test]
async fn test_create_table() {
    let (app, _) = create_test_server();

    let body = create_table(&app, "LINEAR", "5.00").await;

    assert_eq!(body["kind"], "LINEAR");
    assert_eq!(body["status"], "OPEN");
    assert_eq!(body["entry_fee"], "5.00");
    assert_eq!(body["prize_fund"], "45.00");
    assert_eq!(body["max_seats"], 15);
    assert_eq!(body["seat_count"], 0);
    assert!(
        body["invite_link"]
            .as_str()
            .unwrap()
            .starts_with("https://t.me/TestBot?start=table_")
    );
}

#[tokio::test]
async fn test_create_table_accepts_numeric_fee() {
    let (app, _) = create_test_server();

    let body = create_table(&app, "random", "3").await;
    assert_eq!(body["kind"], "RANDOM");
    assert_eq!(body["prize_fund"], "21.60");

    let (status, _) = send(
        &app,
        post_json("/api/v1/tables", json!({"kind": "LINEAR", "entry_fee": 10})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_create_duplicate_open_table_conflicts() {
    let (app, _) = create_test_server();
    create_table(&app, "LINEAR", "5.00").await;

    let (status, body) = send(
        &app,
        post_json("/api/v1/tables", json!({"kind": "LINEAR", "entry_fee": "5.00"})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "duplicate_open_table");
}

#[tokio::test]
async fn test_create_table_validation() {
    let (app, _) = create_test_server();

    let bad_requests = [
        json!({"kind": "LINEAR", "entry_fee": "4.00"}),
        json!({"kind": "LINEAR", "entry_fee": "5.001"}),
        json!({"kind": "SPIRAL", "entry_fee": "5.00"}),
        json!({"kind": "RANDOM", "entry_fee": "-3"}),
    ];

    for request in bad_requests {
        let (status, body) = send(&app, post_json("/api/v1/tables", request.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{request}");
        assert_eq!(body["code"], "invalid_request");
    }
}

#[tokio::test]
async fn test_list_tables_with_filter() {
    let (app, _) = create_test_server();
    create_table(&app, "LINEAR", "3.00").await;
    create_table(&app, "LINEAR", "5.00").await;
    create_table(&app, "RANDOM", "5.00").await;

    let (status, body) = send(&app, get("/api/v1/tables")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (_, body) = send(&app, get("/api/v1/tables?kind=RANDOM&status=OPEN")).await;
    let tables = body.as_array().unwrap();
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0]["kind"], "RANDOM");

    let (status, _) = send(&app, get("/api/v1/tables?status=PENDING")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_table_errors() {
    let (app, _) = create_test_server();

    let (status, body) = send(&app, get("/api/v1/tables/999")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = send(&app, get("/api/v1/tables/0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resolve_invite() {
    let (app, _) = create_test_server();
    let table = create_table(&app, "LINEAR", "10.00").await;
    let link = table["invite_link"].as_str().unwrap();
    let token = link.rsplit_once("table_").unwrap().1;

    let (status, body) = send(&app, get(&format!("/api/v1/tables/invite/{token}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], table["id"]);

    let (status, body) = send(&app, get("/api/v1/tables/invite/nosuchtoken")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Invite link is not valid");

    let (status, _) = send(&app, get("/api/v1/tables/invite/not-a-token")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Joins
// ============================================================================

#[tokio::test]
async fn test_join_table() {
    let (app, store) = create_test_server();
    let table = create_table(&app, "LINEAR", "5.00").await;
    let table_id = table["id"].as_i64().unwrap();
    let player = store.add_player(Amount::from_major(12)).await;

    let (status, body) = join(&app, table_id, player).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["balance"], "7.00");
    assert_eq!(body["seat"]["player_id"], player);
    assert_eq!(body["seat"]["is_first_entry"], true);
    assert_eq!(body["table"]["seat_count"], 1);
    assert_eq!(body["table"]["prize_fund"], "50.00");
    assert_eq!(body["transition"]["type"], "open");
}

#[tokio::test]
async fn test_join_rejections() {
    let (app, store) = create_test_server();
    let table = create_table(&app, "LINEAR", "5.00").await;
    let table_id = table["id"].as_i64().unwrap();
    let rich = store.add_player(Amount::from_major(100)).await;
    let poor = store.add_player(Amount::from_major(2)).await;

    let (status, _) = join(&app, table_id, rich).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = join(&app, table_id, rich).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "duplicate_seat");

    let (status, body) = join(&app, table_id, poor).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "insufficient_funds");
    assert_eq!(body["error"], "Insufficient funds: entry fee is 5.00");

    let (status, body) = join(&app, table_id, 9_999).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "player_not_found");

    let (status, body) = join(&app, 9_999, rich).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "table_unavailable");

    let (status, _) = send(
        &app,
        post_json(
            &format!("/api/v1/tables/{table_id}/join"),
            json!({"player_id": -1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_filling_random_table_settles() {
    let (app, store) = create_test_server();
    let table = create_table(&app, "RANDOM", "3.00").await;
    let table_id = table["id"].as_i64().unwrap();

    let mut last = Value::Null;
    for i in 0..12 {
        let player = store.add_player(Amount::from_major(10)).await;
        let (status, body) = join(&app, table_id, player).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        if i < 11 {
            assert_eq!(body["transition"]["type"], "open");
        }
        last = body;
    }

    assert_eq!(last["transition"]["type"], "settled");
    assert_eq!(last["table"]["status"], "FINISHED");
    assert_eq!(last["table"]["prize_fund"], "57.60");

    let winners = last["transition"]["winners"].as_array().unwrap();
    let amounts: Vec<&str> = winners
        .iter()
        .map(|w| w["amount"].as_str().unwrap())
        .collect();
    assert_eq!(amounts, ["28.80", "17.28", "11.52"]);

    let replacement = last["transition"]["replacement"].as_i64().unwrap();
    let (status, body) = send(&app, get(&format!("/api/v1/tables/{replacement}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OPEN");
    assert_eq!(body["prize_fund"], "21.60");

    let late = store.add_player(Amount::from_major(10)).await;
    let (status, body) = join(&app, table_id, late).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "table_unavailable");
}

#[tokio::test]
async fn test_filling_linear_table_splits() {
    let (app, store) = create_test_server();
    let table = create_table(&app, "LINEAR", "5.00").await;
    let table_id = table["id"].as_i64().unwrap();

    let mut first = None;
    let mut last = Value::Null;
    for _ in 0..15 {
        let player = store.add_player(Amount::from_major(10)).await;
        first.get_or_insert(player);
        let (status, body) = join(&app, table_id, player).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        last = body;
    }

    let transition = &last["transition"];
    assert_eq!(transition["type"], "split");
    assert_eq!(transition["winner"], first.unwrap());
    assert_eq!(transition["prize"], "120.00");
    assert_eq!(transition["children"].as_array().unwrap().len(), 2);
    assert_eq!(last["table"]["status"], "FINISHED");
}
