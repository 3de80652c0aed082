//! Postgres-backed order and outbox storage

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{OrderStore, StoreError, UnitOfWork};
use crate::models::{Order, OrderRow, Page, PageRequest};
use crate::outbox::{validate_event_type, OutboxError, OutboxRecord, OutboxStore};

const ORDER_COLUMNS: &str = "id, customer_name, order_date, amount, description, status, \
                             active, created_at, updated_at";

fn into_order(row: OrderRow) -> Result<Order, StoreError> {
    let id = row.id;
    Order::try_from(row).map_err(|reason| StoreError::CorruptRow { id, reason })
}

/// Insert an outbox record inside the caller's transaction
///
/// Never opens or commits a transaction of its own; the record becomes
/// visible to relays only when the caller commits.
pub async fn insert_outbox_message(
    tx: &mut Transaction<'_, Postgres>,
    event_type: &str,
    payload: &str,
) -> Result<i64, OutboxError> {
    validate_event_type(event_type)?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO outbox_messages (event_type, payload)
        VALUES ($1, $2)
        RETURNING id
        "#,
    )
    .bind(event_type)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await?;

    tracing::debug!(outbox_id = id, event_type = %event_type, "Event staged in outbox");

    Ok(id)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn insert_order(&mut self, order: &Order) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            INSERT INTO orders
                (id, customer_name, order_date, amount, description, status,
                 active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.id)
        .bind(&order.customer_name)
        .bind(order.order_date)
        .bind(order.amount)
        .bind(&order.description)
        .bind(order.status.as_str())
        .bind(order.active)
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;

        into_order(row)
    }

    async fn find_active_order(&mut self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND active FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(into_order).transpose()
    }

    async fn update_order(&mut self, order: &Order) -> Result<Order, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            r#"
            UPDATE orders
            SET customer_name = $2,
                order_date = $3,
                amount = $4,
                description = $5,
                status = $6,
                active = $7,
                updated_at = $8
            WHERE id = $1
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.id)
        .bind(&order.customer_name)
        .bind(order.order_date)
        .bind(order.amount)
        .bind(&order.description)
        .bind(order.status.as_str())
        .bind(order.active)
        .bind(order.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;

        into_order(row)
    }

    async fn insert_outbox(&mut self, event_type: &str, payload: &str) -> Result<i64, OutboxError> {
        insert_outbox_message(&mut self.tx, event_type, payload).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn get_active_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND active"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_order).transpose()
    }

    async fn list_active_orders(&self, page: PageRequest) -> Result<Page<Order>, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE active")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE active \
             ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(page.size))
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        let orders = rows
            .into_iter()
            .map(into_order)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(orders, page, total))
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn fetch_unpublished(
        &self,
        event_type: &str,
        limit: i64,
    ) -> Result<Vec<OutboxRecord>, OutboxError> {
        let records = sqlx::query_as::<_, OutboxRecord>(
            r#"
            SELECT id, event_type, payload, created_at, published, transmitted_at
            FROM outbox_messages
            WHERE published = FALSE
              AND event_type = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(event_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn mark_published(
        &self,
        id: i64,
        transmitted_at: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        // The published = FALSE guard makes a repeated mark a no-op
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET published = TRUE,
                transmitted_at = $2
            WHERE id = $1
              AND published = FALSE
            "#,
        )
        .bind(id)
        .bind(transmitted_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            tracing::debug!(outbox_id = id, "Marked outbox record as published");
            return Ok(true);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM outbox_messages WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        if exists {
            Ok(false)
        } else {
            Err(OutboxError::NotFound(id))
        }
    }
}
