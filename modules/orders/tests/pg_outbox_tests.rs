//! Postgres-backed outbox tests
//!
//! Need a reachable database:
//! `DATABASE_URL=postgres://... cargo test -p orders-rs --test pg_outbox_tests -- --ignored`

mod common;

use chrono::Utc;
use common::{get_test_pool, order_request};
use event_bus::EventEnvelope;
use orders_rs::models::OrderResponse;
use orders_rs::outbox::{OutboxError, OutboxStore, ORDER_CREATED, ORDER_UPDATED};
use orders_rs::repos::postgres::insert_outbox_message;
use orders_rs::repos::{OrderStore, PgStore};
use orders_rs::services::OrderService;
use rust_decimal::Decimal;
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;

async fn clean(pool: &PgPool) {
    sqlx::query("DELETE FROM outbox_messages")
        .execute(pool)
        .await
        .expect("Failed to clean outbox");
    sqlx::query("DELETE FROM orders")
        .execute(pool)
        .await
        .expect("Failed to clean orders");
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_insert_is_invisible_until_commit() {
    let pool = get_test_pool().await;
    clean(&pool).await;
    let store = PgStore::new(pool.clone());

    let mut tx = pool.begin().await.unwrap();
    let id = insert_outbox_message(&mut tx, ORDER_CREATED, "{}").await.unwrap();

    assert!(store.fetch_unpublished(ORDER_CREATED, 20).await.unwrap().is_empty());

    tx.commit().await.unwrap();

    let records = store.fetch_unpublished(ORDER_CREATED, 20).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, id);
    assert!(!records[0].published);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_rolled_back_insert_leaves_nothing() {
    let pool = get_test_pool().await;
    clean(&pool).await;
    let store = PgStore::new(pool.clone());

    let mut tx = pool.begin().await.unwrap();
    insert_outbox_message(&mut tx, ORDER_CREATED, "{}").await.unwrap();
    tx.rollback().await.unwrap();

    assert!(store.fetch_unpublished(ORDER_CREATED, 20).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_empty_event_type_rejected_before_sql() {
    let pool = get_test_pool().await;
    let mut tx = pool.begin().await.unwrap();

    let err = insert_outbox_message(&mut tx, "", "{}").await.unwrap_err();
    assert!(matches!(err, OutboxError::EmptyEventType));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_fetch_order_limit_and_idempotent_mark() {
    let pool = get_test_pool().await;
    clean(&pool).await;
    let store = PgStore::new(pool.clone());

    let mut ids = Vec::new();
    for i in 0..5 {
        let mut tx = pool.begin().await.unwrap();
        ids.push(
            insert_outbox_message(&mut tx, ORDER_CREATED, &format!("p{i}"))
                .await
                .unwrap(),
        );
        tx.commit().await.unwrap();
    }

    let batch = store.fetch_unpublished(ORDER_CREATED, 3).await.unwrap();
    let fetched: Vec<i64> = batch.iter().map(|r| r.id).collect();
    assert_eq!(fetched, ids[..3].to_vec());

    assert!(store.mark_published(ids[0], Utc::now()).await.unwrap());
    assert!(!store.mark_published(ids[0], Utc::now()).await.unwrap());

    let err = store.mark_published(-1, Utc::now()).await.unwrap_err();
    assert!(matches!(err, OutboxError::NotFound(-1)));

    let remaining = store.fetch_unpublished(ORDER_CREATED, 20).await.unwrap();
    assert_eq!(remaining.len(), 4);
    assert_eq!(remaining[0].id, ids[1]);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_order_service_writes_order_and_event_together() {
    let pool = get_test_pool().await;
    clean(&pool).await;
    let store = PgStore::new(pool.clone());
    let orders = OrderService::new(Arc::new(store.clone()));

    let mut request = order_request("Ana Souza");
    request.amount = Decimal::new(10_050, 2);
    let created = orders.create_order(request).await.unwrap();

    let stored = store.get_active_order(created.id).await.unwrap().unwrap();
    assert_eq!(created, OrderResponse::from(&stored));

    let records = store.fetch_unpublished(ORDER_CREATED, 20).await.unwrap();
    assert_eq!(records.len(), 1);
    let envelope: EventEnvelope<OrderResponse> =
        serde_json::from_str(&records[0].payload).unwrap();
    assert_eq!(envelope.payload, OrderResponse::from(&stored));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_updated_event_matches_stored_row() {
    let pool = get_test_pool().await;
    clean(&pool).await;
    let store = PgStore::new(pool.clone());
    let orders = OrderService::new(Arc::new(store.clone()));
    let created = orders.create_order(order_request("Ana Souza")).await.unwrap();

    let mut change = order_request("Ana Lima");
    change.status = "SHIPPED".to_string();
    let updated = orders.update_order(created.id, change).await.unwrap();

    let stored = store.get_active_order(created.id).await.unwrap().unwrap();
    assert_eq!(updated, OrderResponse::from(&stored));
    assert_eq!(stored.updated_at.timestamp_subsec_nanos() % 1_000, 0);

    let records = store.fetch_unpublished(ORDER_UPDATED, 20).await.unwrap();
    let envelope: EventEnvelope<OrderResponse> =
        serde_json::from_str(&records[0].payload).unwrap();
    assert_eq!(envelope.payload, updated);
}
