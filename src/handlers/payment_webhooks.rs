use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;
use serde_json::Value;
use tracing::warn;

use crate::{
    errors::{ApiError, ServiceError},
    handlers::payments::{confirm_message, ConfirmPaymentResponse},
    services::payment_gateway::verify_hmac_hex,
    ApiResponse, AppState,
};

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// POST /api/v1/payments/webhook
///
/// Unauthenticated provider push. When a webhook secret is configured the
/// body must carry a valid `x-signature` over `"{x-timestamp}.{body}"`.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<ConfirmPaymentResponse>>, ApiError> {
    if let Some(secret) = state.config.payment.webhook_secret.as_deref() {
        let now = chrono::Utc::now().timestamp();
        if !verify_signature(
            &headers,
            &body,
            secret,
            state.config.payment.webhook_tolerance_secs,
            now,
        ) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized("invalid webhook signature".to_string()).into());
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid json: {}", e)))?;

    let outcome = state.services.payments.handle_webhook(&payload).await?;
    let message = confirm_message(&outcome);
    Ok(Json(ApiResponse::success_with_message(
        ConfirmPaymentResponse::from(outcome),
        message,
    )))
}

pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(timestamp), Some(signature)) = (header(TIMESTAMP_HEADER), header(SIGNATURE_HEADER))
    else {
        return false;
    };
    let Ok(sent_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if now.abs_diff(sent_at) > tolerance_secs {
        return false;
    }

    let mut signed = Vec::with_capacity(timestamp.len() + 1 + payload.len());
    signed.extend_from_slice(timestamp.as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(payload);
    verify_hmac_hex(secret.as_bytes(), &signed, signature)
}
