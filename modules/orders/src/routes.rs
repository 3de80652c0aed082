//! Order API routes
//!
//! `OrderError` is mapped to a JSON [`ErrorResponse`] here; extractor
//! rejections (bad JSON, malformed ids, bad query strings) are reported the
//! same way as validation failures.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::health::health;
use crate::models::{
    CreateOrderRequest, ErrorResponse, OrderResponse, Page, PageRequest, UpdateOrderRequest,
};
use crate::outbox::RelayMetrics;
use crate::services::{OrderError, OrderService};

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub metrics: RelayMetrics,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/orders", get(list_orders).post(create_order))
        .route(
            "/api/orders/{id}",
            get(get_order).put(update_order).delete(deactivate_order),
        )
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

fn error_body(status: StatusCode, error: &str, message: String) -> Response {
    let body = Json(ErrorResponse {
        error: error.to_string(),
        message,
    });
    (status, body).into_response()
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        match &self {
            OrderError::Validation(msg) => {
                error_body(StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            OrderError::NotFound(_) => {
                error_body(StatusCode::NOT_FOUND, "not_found", self.to_string())
            }
            OrderError::Storage(_) | OrderError::Outbox(_) | OrderError::Serialization(_) => {
                tracing::error!(error = %self, "Order request failed");
                error_body(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "The order could not be processed".to_string(),
                )
            }
        }
    }
}

fn bad_request(body_text: String) -> OrderError {
    OrderError::Validation(body_text)
}

/// POST /api/orders
async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderResponse>), OrderError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    let order = state.orders.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// PUT /api/orders/{id}
async fn update_order(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateOrderRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, OrderError> {
    let Path(id) = id.map_err(|e| bad_request(e.body_text()))?;
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    Ok(Json(state.orders.update_order(id, req).await?))
}

/// DELETE /api/orders/{id} - soft delete
async fn deactivate_order(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<OrderResponse>, OrderError> {
    let Path(id) = id.map_err(|e| bad_request(e.body_text()))?;
    Ok(Json(state.orders.deactivate_order(id).await?))
}

/// GET /api/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<OrderResponse>, OrderError> {
    let Path(id) = id.map_err(|e| bad_request(e.body_text()))?;
    Ok(Json(state.orders.get_order(id).await?))
}

/// GET /api/orders?page=0&size=20
async fn list_orders(
    State(state): State<AppState>,
    page: Result<Query<PageRequest>, QueryRejection>,
) -> Result<Json<Page<OrderResponse>>, OrderError> {
    let Query(page) = page.map_err(|e| bad_request(e.body_text()))?;
    Ok(Json(state.orders.list_orders(page).await?))
}

/// GET /metrics - Prometheus text exposition of relay metrics
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, format!("metrics error: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxError;
    use crate::repos::StoreError;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (OrderError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (OrderError::NotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                OrderError::Serialization("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                OrderError::Outbox(OutboxError::EmptyEventType),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                OrderError::Storage(StoreError::Conflict(Uuid::nil())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
