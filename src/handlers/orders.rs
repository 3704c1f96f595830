use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::Identity,
    entities::order::{Model as OrderModel, OrderStatus},
    errors::ApiError,
    handlers::common::{created_response, json_body},
    services::orders::{CheckoutInput, PaidItem, Settlement},
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/paid-items", get(list_paid_items))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/status", put(update_order_status))
}

/// POST /api/v1/checkout
///
/// Cash-on-delivery checkout: the order is created already settled and the
/// cart is cleared.
pub async fn checkout_cash(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<CheckoutInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let input = json_body(payload)?;
    let order = state
        .services
        .orders
        .create_order_from_cart(&identity, input, Settlement::CashOnDelivery)
        .await?;
    Ok(created_response(order, "Order placed successfully"))
}

pub async fn list_orders(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ApiResponse<Vec<OrderModel>>>, ApiError> {
    let orders = state.services.orders.list_orders(&identity).await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn get_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderModel>>, ApiError> {
    let order = state.services.orders.get_order(&identity, id).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderModel>>, ApiError> {
    let order = state.services.orders.cancel_order(&identity, id).await?;
    Ok(Json(ApiResponse::success_with_message(order, "Order cancelled")))
}

/// PUT /api/v1/orders/:id/status (admin)
pub async fn update_order_status(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<OrderModel>>, ApiError> {
    let request = json_body(payload)?;
    let order = state
        .services
        .orders
        .advance_status(&identity, id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// GET /api/v1/orders/paid-items (admin)
pub async fn list_paid_items(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ApiResponse<Vec<PaidItem>>>, ApiError> {
    let items = state.services.orders.list_paid_items(&identity).await?;
    Ok(Json(ApiResponse::success(items)))
}
