//! Order write path and queries
//!
//! Every mutation persists the order and stages the event announcing it in
//! one unit of work. The event body is an [`EventEnvelope`] wrapping the
//! order as it stands after the change, so consumers can dedupe on
//! `event_id` when a relay delivers the same record twice.

use chrono::Utc;
use event_bus::{EnvelopeError, EventEnvelope};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    CreateOrderRequest, Order, OrderResponse, OrderStatus, Page, PageRequest, UpdateOrderRequest,
};
use crate::outbox::{OutboxError, ORDER_CREATED, ORDER_DEACTIVATED, ORDER_UPDATED};
use crate::repos::{OrderStore, StoreError, UnitOfWork};

const SOURCE_MODULE: &str = "orders";

/// `orders.amount` is `NUMERIC(14, 2)`
const AMOUNT_SCALE: u32 = 2;
const AMOUNT_LIMIT: i64 = 1_000_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Event serialization error: {0}")]
    Serialization(String),
}

impl From<EnvelopeError> for OrderError {
    fn from(e: EnvelopeError) -> Self {
        OrderError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for OrderError {
    fn from(e: serde_json::Error) -> Self {
        OrderError::Serialization(e.to_string())
    }
}

pub type OrderResult<T> = Result<T, OrderError>;

/// Business fields shared by create and update, after validation
struct OrderFields {
    customer_name: String,
    order_date: chrono::NaiveDate,
    amount: Decimal,
    description: String,
    status: OrderStatus,
}

fn validate(req: CreateOrderRequest) -> OrderResult<OrderFields> {
    let customer_name = req.customer_name.trim();
    if customer_name.is_empty() {
        return Err(OrderError::Validation("customer_name cannot be blank".into()));
    }
    let description = req.description.trim();
    if description.is_empty() {
        return Err(OrderError::Validation("description cannot be blank".into()));
    }
    if req.amount <= Decimal::ZERO {
        return Err(OrderError::Validation(format!(
            "amount must be positive, got {}",
            req.amount
        )));
    }
    if req.amount.normalize().scale() > AMOUNT_SCALE {
        return Err(OrderError::Validation(format!(
            "amount has more than {AMOUNT_SCALE} decimal places, got {}",
            req.amount
        )));
    }
    if req.amount >= Decimal::from(AMOUNT_LIMIT) {
        return Err(OrderError::Validation(format!(
            "amount must be below {AMOUNT_LIMIT}, got {}",
            req.amount
        )));
    }
    let status = req.status.parse::<OrderStatus>().map_err(OrderError::Validation)?;

    Ok(OrderFields {
        customer_name: customer_name.to_string(),
        order_date: req.order_date,
        amount: req.amount,
        description: description.to_string(),
        status,
    })
}

fn validate_page(page: PageRequest) -> OrderResult<PageRequest> {
    if page.size == 0 || page.size > PageRequest::MAX_SIZE {
        return Err(OrderError::Validation(format!(
            "size must be between 1 and {}",
            PageRequest::MAX_SIZE
        )));
    }
    Ok(page)
}

/// Serialize the order into an envelope and stage it in the unit of work
///
/// `order` must be the row as returned by the store, so the event carries
/// exactly what was persisted.
async fn stage_event(
    uow: &mut Box<dyn UnitOfWork>,
    event_type: &str,
    order: &Order,
) -> OrderResult<i64> {
    let envelope = EventEnvelope::new(event_type, SOURCE_MODULE, OrderResponse::from(order))
        .with_source_version(env!("CARGO_PKG_VERSION"));
    envelope.validate()?;
    let payload = serde_json::to_string(&envelope)?;

    let outbox_id = uow.insert_outbox(event_type, &payload).await?;
    Ok(outbox_id)
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
}

impl OrderService {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Persist a new active order and stage `OrderCreated` atomically
    pub async fn create_order(&self, req: CreateOrderRequest) -> OrderResult<OrderResponse> {
        let fields = validate(req)?;
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            customer_name: fields.customer_name,
            order_date: fields.order_date,
            amount: fields.amount,
            description: fields.description,
            status: fields.status,
            active: true,
            created_at: now,
            updated_at: now,
        };

        let mut uow = self.store.begin().await?;
        let order = uow.insert_order(&order).await?;
        let outbox_id = stage_event(&mut uow, ORDER_CREATED, &order).await?;
        uow.commit().await?;

        tracing::info!(
            order_id = %order.id,
            outbox_id,
            event_type = ORDER_CREATED,
            "Order created"
        );

        Ok(OrderResponse::from(&order))
    }

    /// Replace the business fields of an active order and stage `OrderUpdated`
    pub async fn update_order(
        &self,
        id: Uuid,
        req: UpdateOrderRequest,
    ) -> OrderResult<OrderResponse> {
        let fields = validate(req)?;

        let mut uow = self.store.begin().await?;
        let mut order = uow
            .find_active_order(id)
            .await?
            .ok_or(OrderError::NotFound(id))?;

        order.customer_name = fields.customer_name;
        order.order_date = fields.order_date;
        order.amount = fields.amount;
        order.description = fields.description;
        order.status = fields.status;
        order.updated_at = Utc::now();

        let order = uow.update_order(&order).await?;
        let outbox_id = stage_event(&mut uow, ORDER_UPDATED, &order).await?;
        uow.commit().await?;

        tracing::info!(
            order_id = %order.id,
            outbox_id,
            event_type = ORDER_UPDATED,
            "Order updated"
        );

        Ok(OrderResponse::from(&order))
    }

    /// Soft delete: the row stays, flagged inactive, and `OrderDeactivated` is staged
    pub async fn deactivate_order(&self, id: Uuid) -> OrderResult<OrderResponse> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .find_active_order(id)
            .await?
            .ok_or(OrderError::NotFound(id))?;

        order.active = false;
        order.updated_at = Utc::now();

        let order = uow.update_order(&order).await?;
        let outbox_id = stage_event(&mut uow, ORDER_DEACTIVATED, &order).await?;
        uow.commit().await?;

        tracing::info!(
            order_id = %order.id,
            outbox_id,
            event_type = ORDER_DEACTIVATED,
            "Order deactivated"
        );

        Ok(OrderResponse::from(&order))
    }

    pub async fn get_order(&self, id: Uuid) -> OrderResult<OrderResponse> {
        let order = self
            .store
            .get_active_order(id)
            .await?
            .ok_or(OrderError::NotFound(id))?;
        Ok(OrderResponse::from(&order))
    }

    /// Active orders, newest first
    pub async fn list_orders(&self, page: PageRequest) -> OrderResult<Page<OrderResponse>> {
        let page = validate_page(page)?;
        let orders = self.store.list_active_orders(page).await?;
        Ok(orders.map(|order| OrderResponse::from(&order)))
    }
}
