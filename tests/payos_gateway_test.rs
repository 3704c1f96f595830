//! REST client against a mocked provider.

use assert_matches::assert_matches;
use serde_json::json;
use storefront_api::{
    config::PaymentConfig,
    errors::ServiceError,
    services::payment_gateway::{
        Buyer, GatewayPaymentStatus, PayOsGateway, PaymentGateway, PaymentLinkRequest,
    },
};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn gateway(server: &MockServer) -> PayOsGateway {
    PayOsGateway::new(&PaymentConfig {
        base_url: server.uri(),
        client_id: "client-1".into(),
        api_key: "api-key-1".into(),
        checksum_key: "checksum-1".into(),
        ..PaymentConfig::default()
    })
    .expect("gateway client")
}

fn link_request() -> PaymentLinkRequest {
    PaymentLinkRequest {
        order_code: 1_717_200_000_000,
        amount: 150_000,
        description: "Mugs".into(),
        return_url: "https://shop.test/success".into(),
        cancel_url: "https://shop.test/cancel".into(),
        buyer: Some(Buyer {
            name: "Ada Lovelace".into(),
            email: Some("ada@example.test".into()),
            phone: None,
        }),
    }
}

#[tokio::test]
async fn create_link_sends_a_signed_request() {
    let server = MockServer::start().await;
    let client = gateway(&server);
    let request = link_request();
    let signature = client.sign_request(&request);

    Mock::given(method("POST"))
        .and(path("/v2/payment-requests"))
        .and(header("x-client-id", "client-1"))
        .and(header("x-api-key", "api-key-1"))
        .and(body_partial_json(json!({
            "orderCode": 1_717_200_000_000i64,
            "amount": 150_000,
            "description": "Mugs",
            "buyerName": "Ada Lovelace",
            "signature": signature,
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "00",
            "desc": "success",
            "data": {
                "checkoutUrl": "https://pay.example.test/web/abc",
                "paymentLinkId": "abc"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let link = client.create_link(request).await.unwrap();

    assert_eq!(link.checkout_url, "https://pay.example.test/web/abc");
    assert_eq!(link.payment_link_id.as_deref(), Some("abc"));
}

#[tokio::test]
async fn provider_error_codes_become_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/payment-requests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "231",
            "desc": "Order code already exists",
            "data": null
        })))
        .mount(&server)
        .await;

    let err = gateway(&server).create_link(link_request()).await.unwrap_err();

    assert_matches!(err, ServiceError::GatewayError(msg) if msg.contains("already exists"));
}

#[tokio::test]
async fn unreadable_responses_become_gateway_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/payment-requests/42"))
        .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
        .mount(&server)
        .await;

    assert_matches!(
        gateway(&server).get_status(42).await,
        Err(ServiceError::GatewayError(_))
    );
}

#[tokio::test]
async fn status_reports_the_paid_amount() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/payment-requests/1717200000000"))
        .and(header("x-client-id", "client-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "00",
            "desc": "success",
            "data": {
                "orderCode": 1_717_200_000_000i64,
                "amount": 150_000,
                "amountPaid": 149_000,
                "status": "PAID",
                "transactions": [{
                    "reference": "FT123",
                    "transactionDateTime": "2024-06-01 10:15:00"
                }]
            }
        })))
        .mount(&server)
        .await;

    let payment = gateway(&server).get_status(1_717_200_000_000).await.unwrap();

    assert!(payment.is_paid());
    assert_eq!(payment.amount, 149_000);
    assert_eq!(payment.transactions[0].transaction_id.as_deref(), Some("FT123"));
    assert_eq!(
        payment.transactions[0].transaction_date_time.as_deref(),
        Some("2024-06-01 10:15:00")
    );
}

#[tokio::test]
async fn unpaid_status_falls_back_to_the_requested_amount() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/payment-requests/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": "00",
            "data": {"orderCode": 7, "amount": 3_000, "amountPaid": 0, "status": "PENDING"}
        })))
        .mount(&server)
        .await;

    let payment = gateway(&server).get_status(7).await.unwrap();

    assert_eq!(payment.status, GatewayPaymentStatus::Pending);
    assert!(!payment.is_paid());
    assert_eq!(payment.amount, 3_000);
    assert!(payment.transactions.is_empty());
}
