use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Domain state is already committed when events are emitted.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "dropping domain event");
            counter!("storefront_events.dropped", 1);
        }
    }
}

/// Domain events emitted after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        user_id: String,
        amount: Decimal,
        cash_on_delivery: bool,
    },
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentIntentCreated {
        order_id: Uuid,
        order_code: i64,
        amount_minor: i64,
    },
    PaymentIntentFailed {
        order_id: Uuid,
        order_code: i64,
        reason: String,
    },
    PaymentSettled {
        order_id: Uuid,
        order_code: Option<i64>,
        paid_at: DateTime<Utc>,
    },
    /// The provider reported a different amount than the order was charged for.
    PaymentAmountMismatch {
        order_id: Uuid,
        order_code: i64,
        expected_minor: i64,
        reported_minor: i64,
    },
    CartCleared {
        user_id: String,
    },
    FeedbackSubmitted {
        feedback_id: Uuid,
        product_id: i32,
        order_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::OrderCancelled(_) => "order_cancelled",
            Event::OrderStatusChanged { .. } => "order_status_changed",
            Event::PaymentIntentCreated { .. } => "payment_intent_created",
            Event::PaymentIntentFailed { .. } => "payment_intent_failed",
            Event::PaymentSettled { .. } => "payment_settled",
            Event::PaymentAmountMismatch { .. } => "payment_amount_mismatch",
            Event::CartCleared { .. } => "cart_cleared",
            Event::FeedbackSubmitted { .. } => "feedback_submitted",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        counter!("storefront_events.processed", 1, "event" => event.name());

        match &event {
            Event::PaymentAmountMismatch {
                order_id,
                order_code,
                expected_minor,
                reported_minor,
            } => {
                warn!(
                    %order_id,
                    order_code,
                    expected_minor,
                    reported_minor,
                    "payment settled with an amount different from the order total"
                );
            }
            Event::PaymentIntentFailed {
                order_id,
                order_code,
                reason,
            } => {
                warn!(%order_id, order_code, %reason, "payment link creation failed");
            }
            other => {
                info!(event = other.name(), payload = ?other, "domain event");
            }
        }
    }

    info!("Event processing loop stopped");
}
