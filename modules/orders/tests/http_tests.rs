//! HTTP surface, driven through the router without a socket

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use orders_rs::outbox::{RelayMetrics, ORDER_CREATED, ORDER_DEACTIVATED};
use orders_rs::repos::InMemoryStore;
use orders_rs::routes::{router, AppState};
use orders_rs::services::OrderService;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app(store: &InMemoryStore) -> Router {
    router(AppState {
        orders: Arc::new(OrderService::new(Arc::new(store.clone()))),
        metrics: RelayMetrics::new().unwrap(),
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn new_order() -> Value {
    json!({
        "customer_name": "Ana Souza",
        "order_date": "2026-09-14",
        "amount": "250.50",
        "description": "Office chairs",
        "status": "PENDING"
    })
}

#[tokio::test]
async fn test_create_get_and_list() {
    let store = InMemoryStore::new();
    let app = app(&store);

    let (status, created) = send(&app, "POST", "/api/orders", Some(new_order())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "PENDING");
    assert_eq!(created["amount"], "250.50");
    assert_eq!(created["active"], true);

    let id = created["id"].as_str().unwrap();
    let (status, fetched) = send(&app, "GET", &format!("/api/orders/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, page) = send(&app, "GET", "/api/orders?page=0&size=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total_elements"], 1);
    assert_eq!(page["content"][0]["id"], created["id"]);

    assert_eq!(store.outbox_records()[0].event_type, ORDER_CREATED);
}

#[tokio::test]
async fn test_update_and_delete() {
    let store = InMemoryStore::new();
    let app = app(&store);
    let (_, created) = send(&app, "POST", "/api/orders", Some(new_order())).await;
    let uri = format!("/api/orders/{}", created["id"].as_str().unwrap());

    let mut change = new_order();
    change["status"] = json!("DELIVERED");
    let (status, updated) = send(&app, "PUT", &uri, Some(change)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "DELIVERED");

    let (status, deleted) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["active"], false);

    let (status, body) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let last = store.outbox_records().pop().unwrap();
    assert_eq!(last.event_type, ORDER_DEACTIVATED);
}

#[tokio::test]
async fn test_validation_errors_are_bad_requests() {
    let store = InMemoryStore::new();
    let app = app(&store);

    let mut negative = new_order();
    negative["amount"] = json!("-1.00");
    let (status, body) = send(&app, "POST", "/api/orders", Some(negative)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = send(&app, "POST", "/api/orders", Some(json!({"amount": "1"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/orders/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/orders?size=500", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(store.outbox_records().is_empty());
}

#[tokio::test]
async fn test_unknown_order_is_not_found() {
    let store = InMemoryStore::new();
    let app = app(&store);
    let uri = format!("/api/orders/{}", uuid::Uuid::new_v4());

    let (status, _) = send(&app, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(store.outbox_records().is_empty());
}

#[tokio::test]
async fn test_health_and_metrics() {
    let app = app(&InMemoryStore::new());

    let (status, body) = send(&app, "GET", "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "orders-rs");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
