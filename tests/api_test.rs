//! End-to-end tests through the HTTP router.

mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::{json, Value};
use storefront_api::{
    handlers::payment_webhooks::{SIGNATURE_HEADER, TIMESTAMP_HEADER},
    services::payment_gateway::hmac_hex,
};

const WEBHOOK_SECRET: &str = "whsec_storefront_test";

fn cart_payload() -> Value {
    json!({
        "cartItems": {"3": 2, "7": 1},
        "amount": 500,
        "address": "123 St"
    })
}

#[tokio::test]
async fn health_reports_database_status() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert!(body["meta"]["timestamp"].is_string());
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let app = TestApp::new().await;

    let (status, body) = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "unauthorized");

    let (status, _) = app
        .request(Method::GET, "/api/v1/cart", None, Some("not-a-jwt"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cart_round_trip_over_http() {
    let app = TestApp::new().await;
    let token = app.customer_token("alice");

    for _ in 0..2 {
        let (status, _) = app
            .request(Method::POST, "/api/v1/cart/items/3/increment", None, Some(&token))
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = app
        .request(Method::POST, "/api/v1/cart/items/3/decrement", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["quantity"], 1);
    assert_eq!(body["message"], "Removed");

    let (_, body) = app.request(Method::GET, "/api/v1/cart", None, Some(&token)).await;
    assert_eq!(body["data"], json!({"3": 1}));

    let (status, body) = app
        .request(Method::GET, "/api/v1/cart/details", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["lines"][0]["name"], "Ceramic Mug");

    let (status, body) = app
        .request(Method::POST, "/api/v1/cart/items/300/increment", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn cash_checkout_over_http() {
    let app = TestApp::new().await;
    let token = app.customer_token("alice");

    let (status, body) = app
        .request(Method::POST, "/api/v1/checkout", Some(cart_payload()), Some(&token))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Order placed successfully");
    assert_eq!(body["data"]["status"], "Processing");
    assert_eq!(body["data"]["is_paid"], true);
    assert_eq!(body["data"]["items"], json!({"3": 2, "7": 1}));

    let order_id = body["data"]["id"].as_str().expect("order id").to_string();
    let (status, body) = app
        .request(Method::GET, &format!("/api/v1/orders/{}", order_id), None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], order_id.as_str());

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&app.customer_token("bob")),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn checkout_rejects_incomplete_payloads() {
    let app = TestApp::new().await;
    let token = app.customer_token("alice");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({"cartItems": {"3": 1}, "amount": 500})),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap_or_default().contains("Missing fields"));

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({"cartItems": {"5": 0}, "amount": 500, "address": "123 St"})),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(cart_payload()),
            Some(&app.admin_token()),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn gateway_checkout_and_confirmation_over_http() {
    let app = TestApp::new().await;
    let token = app.customer_token("alice");

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/checkout/gateway",
            Some(json!({
                "cartItems": {"3": 2, "7": 1},
                "amount": 500,
                "address": "123 St",
                "orderInfo": "Mugs and a tote"
            })),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["amount_minor"], 150_000);
    let order_code = body["data"]["order_code"].as_i64().expect("order code");

    let confirm_uri = format!("/api/v1/payments/confirm/{}", order_code);
    let (status, body) = app.request(Method::POST, &confirm_uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "pending");
    assert_eq!(body["message"], "Payment not completed yet");

    app.gateway.mark_paid();
    let (_, body) = app.request(Method::POST, &confirm_uri, None, Some(&token)).await;
    assert_eq!(body["data"]["outcome"], "settled");
    assert_eq!(body["data"]["order"]["status"], "Paid");

    let (_, body) = app.request(Method::POST, &confirm_uri, None, Some(&token)).await;
    assert_eq!(body["data"]["outcome"], "already_confirmed");
    assert_eq!(body["message"], "Payment already confirmed");

    let (status, _) = app
        .request(Method::POST, "/api/v1/payments/confirm/1", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn gateway_outage_is_reported_as_retryable() {
    let app = TestApp::new().await;
    let token = app.customer_token("alice");
    app.gateway.fail_links(true);

    let (status, body) = app
        .request(Method::POST, "/api/v1/checkout/gateway", Some(cart_payload()), Some(&token))
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["retryable"], true);

    let (_, body) = app.request(Method::GET, "/api/v1/orders", None, Some(&token)).await;
    let order_id = body["data"][0]["id"].as_str().expect("order kept").to_string();

    app.gateway.fail_links(false);
    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/payments/intents",
            Some(json!({"orderId": order_id})),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["checkout_url"].is_string());
}

#[tokio::test]
async fn signed_webhook_settles_the_order() {
    let app = TestApp::with_config(|cfg| {
        cfg.payment.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    })
    .await;
    let token = app.customer_token("alice");
    let (_, body) = app
        .request(Method::POST, "/api/v1/checkout/gateway", Some(cart_payload()), Some(&token))
        .await;
    let order_code = body["data"]["order_code"].as_i64().expect("order code");
    app.gateway.mark_paid();

    let payload = serde_json::to_vec(&json!({"code": "00", "data": {"orderCode": order_code}}))
        .unwrap();

    let (status, _) = app
        .request_raw(Method::POST, "/api/v1/payments/webhook", payload.clone(), &[])
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let timestamp = chrono::Utc::now().timestamp().to_string();
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(&payload);
    let signature = hmac_hex(WEBHOOK_SECRET.as_bytes(), &signed);

    let (status, body) = app
        .request_raw(
            Method::POST,
            "/api/v1/payments/webhook",
            payload,
            &[
                (TIMESTAMP_HEADER, timestamp.as_str()),
                (SIGNATURE_HEADER, signature.as_str()),
            ],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "settled");
}

#[tokio::test]
async fn unsigned_webhooks_are_accepted_without_a_secret() {
    let app = TestApp::new().await;

    let (status, body) = app
        .request_raw(
            Method::POST,
            "/api/v1/payments/webhook",
            br#"{"data":{"orderCode":123}}"#.to_vec(),
            &[],
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = app
        .request_raw(Method::POST, "/api/v1/payments/webhook", b"not json".to_vec(), &[])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_endpoints_require_the_admin_role() {
    let app = TestApp::new().await;
    let token = app.customer_token("alice");
    let (_, body) = app
        .request(Method::POST, "/api/v1/checkout", Some(cart_payload()), Some(&token))
        .await;
    let order_id = body["data"]["id"].as_str().expect("order id").to_string();

    let (status, _) = app
        .request(Method::GET, "/api/v1/orders/paid-items", None, Some(&token))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.admin_token();
    let (status, body) = app
        .request(Method::GET, "/api/v1/orders/paid-items", None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));

    let (status, body) = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({"status": "Completed"})),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "Completed");
}

#[tokio::test]
async fn feedback_over_http() {
    let app = TestApp::new().await;
    let token = app.customer_token("alice");
    let (_, body) = app
        .request(Method::POST, "/api/v1/checkout", Some(cart_payload()), Some(&token))
        .await;
    let order_id = body["data"]["id"].as_str().expect("order id").to_string();

    let (status, body) = app
        .request(
            Method::POST,
            "/api/v1/feedback",
            Some(json!({"productId": 3, "orderId": order_id, "rating": 5, "comment": "Lovely"})),
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let feedback_id = body["data"]["id"].as_str().expect("feedback id").to_string();

    let (status, body) = app
        .request(Method::GET, "/api/v1/feedback/product/3", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["user_name"], "Ada Lovelace");

    let (status, body) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/feedback/{}", feedback_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("data").is_none());
}

#[tokio::test]
async fn legacy_token_header_is_accepted() {
    let app = TestApp::new().await;
    let token = app.customer_token("alice");

    let (status, _) = app
        .request_raw(
            Method::GET,
            "/api/v1/cart",
            Vec::new(),
            &[("auth-token", token.as_str())],
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}
