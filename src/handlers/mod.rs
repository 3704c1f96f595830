pub mod cart;
pub mod common;
pub mod feedback;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    cart::CartService, catalog::Catalog, feedback::FeedbackService, orders::OrderService,
    payment_gateway::PaymentGateway, payments::PaymentService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub feedback: Arc<FeedbackService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        let orders = OrderService::new(db_pool.clone(), event_sender.clone(), config);
        let payments = PaymentService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway,
            orders.clone(),
            config.payment.clone(),
        );

        Self {
            cart: Arc::new(CartService::new(db_pool.clone(), config, catalog)),
            orders: Arc::new(orders),
            payments: Arc::new(payments),
            feedback: Arc::new(FeedbackService::new(db_pool, event_sender)),
        }
    }
}
