#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use storefront_api::{
    auth::{Identity, TokenVerifier},
    config::AppConfig,
    db::{self, DbConfig},
    entities::order::Model as OrderModel,
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        catalog::{CatalogProduct, StaticCatalog},
        orders::{CheckoutInput, Settlement},
        payment_gateway::{
            GatewayPayment, GatewayPaymentStatus, GatewayTransaction, PaymentGateway, PaymentLink,
            PaymentLinkRequest,
        },
    },
    AppState,
};
use tokio::sync::{mpsc, Barrier};
use tower::ServiceExt;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

#[derive(Debug, Default)]
struct GatewayState {
    paid: bool,
    /// Overrides the amount reported by `get_status`
    reported_amount: Option<i64>,
    fail_links: bool,
    issued: HashMap<i64, i64>,
    barrier: Option<Arc<Barrier>>,
}

/// Scriptable stand-in for the payment provider.
#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<GatewayState>,
    link_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn mark_paid(&self) {
        self.lock().paid = true;
    }

    pub fn report_amount(&self, amount: i64) {
        self.lock().reported_amount = Some(amount);
    }

    pub fn fail_links(&self, fail: bool) {
        self.lock().fail_links = fail;
    }

    /// Every `get_status` call waits until `parties` calls are in flight.
    pub fn hold_status_calls(&self, parties: usize) {
        self.lock().barrier = Some(Arc::new(Barrier::new(parties)));
    }

    pub fn link_calls(&self) -> usize {
        self.link_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.state.lock().expect("gateway state poisoned")
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_link(&self, request: PaymentLinkRequest) -> Result<PaymentLink, ServiceError> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock();
        if state.fail_links {
            return Err(ServiceError::GatewayError("provider unavailable".to_string()));
        }
        state.issued.insert(request.order_code, request.amount);
        Ok(PaymentLink {
            checkout_url: format!("https://pay.example.test/web/{}", request.order_code),
            payment_link_id: Some(format!("link-{}", request.order_code)),
        })
    }

    async fn get_status(&self, order_code: i64) -> Result<GatewayPayment, ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let barrier = self.lock().barrier.clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        let state = self.lock();
        let amount = state
            .reported_amount
            .or_else(|| state.issued.get(&order_code).copied())
            .unwrap_or_default();
        let (status, transactions) = if state.paid {
            (
                GatewayPaymentStatus::Paid,
                vec![GatewayTransaction {
                    transaction_id: Some(format!("FT{}", order_code)),
                    transaction_date_time: Some("2024-06-01 10:15:00".to_string()),
                }],
            )
        } else {
            (GatewayPaymentStatus::Pending, Vec::new())
        };

        Ok(GatewayPayment {
            order_code,
            status,
            amount,
            transactions,
        })
    }
}

/// Helper harness for spinning up the application against an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the caller tweak the configuration.
    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        customize(&mut cfg);

        // One connection, so every test sees the same in-memory database.
        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let services = AppServices::new(
            db.clone(),
            event_sender.clone(),
            &cfg,
            gateway.clone(),
            Arc::new(test_catalog()),
        );

        let state = AppState {
            db,
            config: cfg.clone(),
            event_sender,
            services,
            verifier: Arc::new(TokenVerifier::new(&cfg.jwt_secret)),
            started_at: Instant::now(),
        };
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    pub fn token(&self, user_id: &str, role: &str) -> String {
        let claims = json!({
            "sub": user_id,
            "role": role,
            "name": "Ada Lovelace",
            "email": format!("{}@example.test", user_id),
            "exp": chrono::Utc::now().timestamp() + 3600,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("failed to sign test token")
    }

    pub fn customer_token(&self, user_id: &str) -> String {
        self.token(user_id, "user")
    }

    pub fn admin_token(&self) -> String {
        self.token("admin-1", "admin")
    }

    /// Adds each `(product_id, quantity)` pair to the customer's cart.
    pub async fn fill_cart(&self, identity: &Identity, items: &[(i32, i32)]) {
        for (product_id, quantity) in items {
            for _ in 0..*quantity {
                self.services()
                    .cart
                    .increment(identity, *product_id)
                    .await
                    .expect("failed to fill cart");
            }
        }
    }

    /// Places a cash-on-delivery order for the given items.
    pub async fn cash_order(&self, identity: &Identity, items: &[(i32, i32)]) -> OrderModel {
        self.services()
            .orders
            .create_order_from_cart(identity, checkout_input(items), Settlement::CashOnDelivery)
            .await
            .expect("cash checkout failed")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("failed to serialize request body"))
            }
            None => Body::empty(),
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    /// Sends a raw body with explicit headers.
    pub async fn request_raw(
        &self,
        method: Method,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::from(body)).expect("failed to build request"))
            .await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request");
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body is not json")
        };
        (status, json)
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Products 3 and 7 are known to the catalog; everything else is not.
pub fn test_catalog() -> StaticCatalog {
    StaticCatalog::new([
        CatalogProduct {
            id: 3,
            name: "Ceramic Mug".to_string(),
            image: Some("/img/mug.png".to_string()),
            price: dec!(120),
        },
        CatalogProduct {
            id: 7,
            name: "Linen Tote".to_string(),
            image: None,
            price: dec!(260),
        },
    ])
}

/// Checkout payload for `items` with amount 500 and a valid address.
pub fn checkout_input(items: &[(i32, i32)]) -> CheckoutInput {
    CheckoutInput {
        items: Some(items.iter().copied().collect::<BTreeMap<i32, i32>>()),
        amount: Some(dec!(500)),
        address: Some("123 St".to_string()),
    }
}

pub fn customer(user_id: &str) -> Identity {
    Identity::customer(user_id).with_name("Ada Lovelace")
}
