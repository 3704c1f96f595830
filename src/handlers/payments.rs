use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Response,
    routing::post,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{
    auth::Identity,
    entities::order::Model as OrderModel,
    errors::ApiError,
    handlers::common::{created_response, json_body},
    services::{
        orders::CheckoutInput,
        payments::{ConfirmOutcome, PaymentIntentResponse},
    },
    ApiResponse, AppState,
};

/// Gateway checkout: the cart snapshot plus an optional payment description.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GatewayCheckoutRequest {
    #[serde(default, alias = "cartItems")]
    pub items: Option<BTreeMap<i32, i32>>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, alias = "orderInfo")]
    pub description: Option<String>,
}

impl GatewayCheckoutRequest {
    fn into_parts(self) -> (CheckoutInput, Option<String>) {
        (
            CheckoutInput {
                items: self.items,
                amount: self.amount,
                address: self.address,
            },
            self.description,
        )
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateIntentRequest {
    #[serde(alias = "orderId")]
    pub order_id: Uuid,
    #[serde(default, alias = "orderInfo")]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmPaymentResponse {
    /// `settled`, `already_confirmed` or `pending`
    pub outcome: &'static str,
    pub order: OrderModel,
}

impl From<ConfirmOutcome> for ConfirmPaymentResponse {
    fn from(outcome: ConfirmOutcome) -> Self {
        let label = outcome.label();
        let order = match outcome {
            ConfirmOutcome::Settled(order)
            | ConfirmOutcome::AlreadyConfirmed(order)
            | ConfirmOutcome::Pending(order) => order,
        };
        Self {
            outcome: label,
            order,
        }
    }
}

pub(crate) fn confirm_message(outcome: &ConfirmOutcome) -> &'static str {
    match outcome {
        ConfirmOutcome::Settled(_) => "Payment confirmed and order updated successfully",
        ConfirmOutcome::AlreadyConfirmed(_) => "Payment already confirmed",
        ConfirmOutcome::Pending(_) => "Payment not completed yet",
    }
}

pub fn payments_routes() -> Router<AppState> {
    Router::new()
        .route("/intents", post(create_payment_intent))
        .route("/confirm/:order_code", post(confirm_payment))
}

/// POST /api/v1/checkout/gateway
pub async fn checkout_gateway(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<GatewayCheckoutRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let (checkout, description) = json_body(payload)?.into_parts();
    let intent = state
        .services
        .payments
        .checkout_with_gateway(&identity, checkout, description)
        .await?;
    Ok(created_response(intent, "Payment link created successfully"))
}

/// POST /api/v1/payments/intents
///
/// Issues a new payment link for an order whose earlier link failed or expired.
pub async fn create_payment_intent(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<CreateIntentRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<PaymentIntentResponse>>, ApiError> {
    let request = json_body(payload)?;
    let intent = state
        .services
        .payments
        .create_payment_intent(&identity, request.order_id, request.description)
        .await?;
    Ok(Json(ApiResponse::success_with_message(
        intent,
        "Payment link created successfully",
    )))
}

/// POST /api/v1/payments/confirm/:order_code
pub async fn confirm_payment(
    State(state): State<AppState>,
    _identity: Identity,
    Path(order_code): Path<i64>,
) -> Result<Json<ApiResponse<ConfirmPaymentResponse>>, ApiError> {
    let outcome = state.services.payments.confirm_payment(order_code).await?;
    let message = confirm_message(&outcome);
    Ok(Json(ApiResponse::success_with_message(
        ConfirmPaymentResponse::from(outcome),
        message,
    )))
}
