use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use std::collections::BTreeMap;

use crate::{
    auth::Identity,
    errors::ApiError,
    services::cart::{CartDetails, CartMutation},
    ApiResponse, AppState,
};

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/details", get(get_cart_details))
        .route("/items/:product_id/increment", post(increment_item))
        .route("/items/:product_id/decrement", post(decrement_item))
}

/// POST /api/v1/cart/items/:product_id/increment
pub async fn increment_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(product_id): Path<i32>,
) -> Result<Json<ApiResponse<CartMutation>>, ApiError> {
    let outcome = state.services.cart.increment(&identity, product_id).await?;
    Ok(Json(ApiResponse::success_with_message(outcome, "Added")))
}

/// POST /api/v1/cart/items/:product_id/decrement
pub async fn decrement_item(
    State(state): State<AppState>,
    identity: Identity,
    Path(product_id): Path<i32>,
) -> Result<Json<ApiResponse<CartMutation>>, ApiError> {
    let outcome = state.services.cart.decrement(&identity, product_id).await?;
    Ok(Json(ApiResponse::success_with_message(outcome, "Removed")))
}

pub async fn get_cart(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ApiResponse<BTreeMap<i32, i32>>>, ApiError> {
    let cart = state.services.cart.get_cart(&identity).await?;
    Ok(Json(ApiResponse::success(cart)))
}

pub async fn get_cart_details(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ApiResponse<CartDetails>>, ApiError> {
    let details = state.services.cart.get_cart_details(&identity).await?;
    Ok(Json(ApiResponse::success(details)))
}
