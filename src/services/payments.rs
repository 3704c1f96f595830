use crate::{
    auth::Identity,
    config::PaymentConfig,
    db::{is_unique_violation, DbPool},
    entities::{
        order::{
            self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
            OrderStatus, PaymentInfo, PAYMENT_METHOD_GATEWAY,
        },
        payment_intent::{
            self, ActiveModel as IntentActiveModel, Entity as IntentEntity, IntentStatus,
        },
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::CartService,
        orders::{CheckoutInput, OrderService, Settlement},
        payment_gateway::{Buyer, PaymentGateway, PaymentLinkRequest},
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Attempts at finding a free order code before giving up.
const MAX_CODE_ATTEMPTS: usize = 3;

/// Largest integer the provider accepts as an order code.
pub const MAX_ORDER_CODE: i64 = 9_007_199_254_740_991;

/// Issues time-derived order codes that never repeat within a process.
///
/// Codes are epoch seconds scaled by 1000, bumped past the last issued code,
/// so many codes can be handed out within the same second.
#[derive(Debug, Default)]
pub struct OrderCodeSequence {
    last: AtomicI64,
}

impl OrderCodeSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let candidate = Utc::now().timestamp().saturating_mul(1000);
        let previous = self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(candidate.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        candidate.max(previous + 1)
    }
}

/// Returned to the buyer after a payment link was issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntentResponse {
    pub order_id: Uuid,
    pub order_code: i64,
    pub checkout_url: String,
    pub amount_minor: i64,
}

/// What a confirmation did to the order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    /// This call settled the order.
    Settled(OrderModel),
    /// The order had already been settled by an earlier confirmation.
    AlreadyConfirmed(OrderModel),
    /// The provider has not received the money yet.
    Pending(OrderModel),
}

impl ConfirmOutcome {
    pub fn order(&self) -> &OrderModel {
        match self {
            ConfirmOutcome::Settled(order)
            | ConfirmOutcome::AlreadyConfirmed(order)
            | ConfirmOutcome::Pending(order) => order,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConfirmOutcome::Settled(_) => "settled",
            ConfirmOutcome::AlreadyConfirmed(_) => "already_confirmed",
            ConfirmOutcome::Pending(_) => "pending",
        }
    }
}

/// Converts a stored order amount into the integer amount charged by the provider.
pub fn minor_amount(amount: Decimal, scale: i64) -> Result<i64, ServiceError> {
    amount
        .checked_mul(Decimal::from(scale))
        .map(|scaled| scaled.round())
        .and_then(|scaled| scaled.to_i64())
        .filter(|minor| *minor > 0)
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Amount {} cannot be charged through the payment gateway",
                amount
            ))
        })
}

/// Provider-facing description: trimmed, cut to `max_chars`, defaulting to the order code.
pub fn payment_description(raw: Option<&str>, order_code: i64, max_chars: usize) -> String {
    let trimmed: String = raw
        .map(str::trim)
        .unwrap_or_default()
        .chars()
        .take(max_chars)
        .collect();
    let trimmed = trimmed.trim_end().to_string();
    if trimmed.is_empty() {
        format!("Order {}", order_code)
            .chars()
            .take(max_chars)
            .collect()
    } else {
        trimmed
    }
}

/// Reads the order code out of a provider webhook body (`data.orderCode`).
pub fn webhook_order_code(payload: &serde_json::Value) -> Option<i64> {
    let code = payload.get("data")?.get("orderCode")?;
    code.as_i64()
        .or_else(|| code.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Payment reconciliation between the order ledger and the gateway.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    orders: OrderService,
    settings: PaymentConfig,
    codes: Arc<OrderCodeSequence>,
}

impl PaymentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        orders: OrderService,
        settings: PaymentConfig,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            gateway,
            orders,
            settings,
            codes: Arc::new(OrderCodeSequence::new()),
        }
    }

    /// Creates a gateway order from the submitted cart and issues its first payment link.
    ///
    /// The order survives a gateway failure in `Pending Payment`; the buyer
    /// retries through [`PaymentService::create_payment_intent`].
    #[instrument(skip(self, identity, input, description), fields(user_id = %identity.user_id))]
    pub async fn checkout_with_gateway(
        &self,
        identity: &Identity,
        input: CheckoutInput,
        description: Option<String>,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        identity.require_customer("make purchases")?;
        // An amount the provider cannot charge must fail before the order row exists.
        if let Some(amount) = input.amount.filter(|amount| *amount > Decimal::ZERO) {
            minor_amount(amount, self.settings.amount_scale)?;
        }
        let order = self
            .orders
            .create_order_from_cart(identity, input, Settlement::Gateway)
            .await?;
        self.issue_intent(identity, &order, description.as_deref())
            .await
    }

    /// Issues a fresh payment link for an unpaid gateway order.
    #[instrument(skip(self, identity, description), fields(user_id = %identity.user_id, order_id = %order_id))]
    pub async fn create_payment_intent(
        &self,
        identity: &Identity,
        order_id: Uuid,
        description: Option<String>,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        identity.require_customer("make purchases")?;
        let order = self.orders.get_order(identity, order_id).await?;

        if order.is_paid || order.status != OrderStatus::PendingPayment {
            return Err(ServiceError::Conflict(format!(
                "Order {} is not awaiting payment (status: {})",
                order_id, order.status
            )));
        }

        self.issue_intent(identity, &order, description.as_deref())
            .await
    }

    async fn issue_intent(
        &self,
        identity: &Identity,
        order: &OrderModel,
        description: Option<&str>,
    ) -> Result<PaymentIntentResponse, ServiceError> {
        let db = &*self.db_pool;
        let amount_minor = minor_amount(order.amount, self.settings.amount_scale)?;

        // The intent row exists before the provider ever sees the code.
        let mut attempt = 0;
        let intent = loop {
            attempt += 1;
            let order_code = self.codes.next();
            if order_code > MAX_ORDER_CODE {
                return Err(ServiceError::InternalError(
                    "Order code exceeds the gateway limit".to_string(),
                ));
            }
            let now = Utc::now();
            let row = IntentActiveModel {
                order_code: Set(order_code),
                order_id: Set(order.id),
                amount_minor: Set(amount_minor),
                description: Set(payment_description(
                    description,
                    order_code,
                    self.settings.description_max_len,
                )),
                checkout_url: Set(None),
                status: Set(IntentStatus::Created),
                failure_reason: Set(None),
                created_at: Set(now),
                updated_at: Set(now),
            };
            match row.insert(db).await {
                Ok(intent) => break intent,
                Err(e) if is_unique_violation(&e) && attempt < MAX_CODE_ATTEMPTS => {
                    warn!(order_code, attempt, "Order code already taken, issuing another");
                }
                Err(e) => {
                    error!(error = %e, order_id = %order.id, "Failed to record payment intent");
                    return Err(ServiceError::DatabaseError(e));
                }
            }
        };

        let request = PaymentLinkRequest {
            order_code: intent.order_code,
            amount: amount_minor,
            description: intent.description.clone(),
            return_url: self.settings.return_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            buyer: Some(Buyer {
                name: identity.display_name(),
                email: identity.email.clone(),
                phone: None,
            }),
        };

        let link = match self.gateway.create_link(request).await {
            Ok(link) => link,
            Err(err) => {
                let reason = err.to_string();
                self.mark_intent_failed(intent.order_code, &reason).await;
                counter!("storefront_payments.intent_failures", 1);
                self.event_sender
                    .send_or_log(Event::PaymentIntentFailed {
                        order_id: order.id,
                        order_code: intent.order_code,
                        reason,
                    })
                    .await;
                return Err(match err {
                    ServiceError::GatewayError(_) => err,
                    other => ServiceError::GatewayError(other.to_string()),
                });
            }
        };

        let now = Utc::now();
        let txn = db.begin().await?;
        IntentEntity::update_many()
            .set(IntentActiveModel {
                status: Set(IntentStatus::LinkIssued),
                checkout_url: Set(Some(link.checkout_url.clone())),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(payment_intent::Column::OrderCode.eq(intent.order_code))
            .exec(&txn)
            .await?;
        OrderEntity::update_many()
            .set(OrderActiveModel {
                order_code: Set(Some(intent.order_code)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        counter!("storefront_payments.intents_issued", 1);
        info!(order_id = %order.id, order_code = intent.order_code, amount_minor, "Payment link issued");
        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                order_id: order.id,
                order_code: intent.order_code,
                amount_minor,
            })
            .await;

        Ok(PaymentIntentResponse {
            order_id: order.id,
            order_code: intent.order_code,
            checkout_url: link.checkout_url,
            amount_minor,
        })
    }

    async fn mark_intent_failed(&self, order_code: i64, reason: &str) {
        let result = IntentEntity::update_many()
            .set(IntentActiveModel {
                status: Set(IntentStatus::Failed),
                failure_reason: Set(Some(reason.to_string())),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(payment_intent::Column::OrderCode.eq(order_code))
            .exec(&*self.db_pool)
            .await;
        if let Err(e) = result {
            error!(error = %e, order_code, "Failed to mark payment intent as failed");
        }
    }

    /// Finds the order a gateway code was issued for. Older codes of a
    /// retried checkout resolve through their intent row.
    pub async fn resolve_order(&self, order_code: i64) -> Result<Option<OrderModel>, ServiceError> {
        let db = &*self.db_pool;
        if let Some(intent) = IntentEntity::find_by_id(order_code).one(db).await? {
            return Ok(OrderEntity::find_by_id(intent.order_id).one(db).await?);
        }
        Ok(OrderEntity::find()
            .filter(order::Column::OrderCode.eq(order_code))
            .one(db)
            .await?)
    }

    /// Reconciles one order with the provider's view of its payment.
    ///
    /// Safe to call any number of times and concurrently: exactly one call
    /// settles the order and clears the owner's cart.
    #[instrument(skip(self))]
    pub async fn confirm_payment(&self, order_code: i64) -> Result<ConfirmOutcome, ServiceError> {
        let order = self.resolve_order(order_code).await?.ok_or_else(|| {
            ServiceError::NotFound(format!("Order not found for payment code {}", order_code))
        })?;

        let payment = self.gateway.get_status(order_code).await?;
        if !payment.is_paid() {
            debug!(order_id = %order.id, status = ?payment.status, "Payment not completed yet");
            return Ok(ConfirmOutcome::Pending(order));
        }

        if order.is_paid {
            counter!("storefront_payments.duplicate_confirmations", 1);
            return Ok(ConfirmOutcome::AlreadyConfirmed(order));
        }

        if !order.status.accepts_payment() {
            error!(
                order_id = %order.id,
                order_code,
                status = %order.status,
                "Provider reports a payment for an order that no longer accepts one"
            );
            counter!("storefront_payments.unreconciled", 1);
            return Err(ServiceError::Conflict(format!(
                "Order {} cannot be settled (status: {})",
                order.id, order.status
            )));
        }

        let expected_minor = minor_amount(order.amount, self.settings.amount_scale)?;
        let transaction = payment.transactions.first();
        let info = PaymentInfo {
            order_code: Some(order_code),
            transaction_id: transaction.and_then(|t| t.transaction_id.clone()),
            transaction_date_time: transaction.and_then(|t| t.transaction_date_time.clone()),
            payment_method: PAYMENT_METHOD_GATEWAY.to_string(),
            amount: Decimal::from(payment.amount),
        };

        let outcome = self.settle(&order, info, order_code).await?;

        if matches!(outcome, ConfirmOutcome::Settled(_)) && payment.amount != expected_minor {
            warn!(
                order_id = %order.id,
                order_code,
                expected_minor,
                reported_minor = payment.amount,
                "Settled amount differs from the order total"
            );
            counter!("storefront_payments.amount_mismatches", 1);
            self.event_sender
                .send_or_log(Event::PaymentAmountMismatch {
                    order_id: order.id,
                    order_code,
                    expected_minor,
                    reported_minor: payment.amount,
                })
                .await;
        }

        Ok(outcome)
    }

    /// Flips the order to paid and clears the cart in one transaction,
    /// guarded so that only one concurrent caller wins.
    async fn settle(
        &self,
        order: &OrderModel,
        info: PaymentInfo,
        order_code: i64,
    ) -> Result<ConfirmOutcome, ServiceError> {
        let now = Utc::now();
        let txn = self.db_pool.begin().await?;

        let result = OrderEntity::update_many()
            .set(OrderActiveModel {
                is_paid: Set(true),
                status: Set(OrderStatus::Paid),
                payment_info: Set(Some(info)),
                paid_at: Set(Some(now)),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::IsPaid.eq(false))
            .filter(
                order::Column::Status.is_in([OrderStatus::PendingPayment, OrderStatus::Processing]),
            )
            .exec(&txn)
            .await?;

        if result.rows_affected == 1 {
            let cleared = CartService::reset_within(&txn, &order.user_id).await?;
            txn.commit().await.map_err(|e| {
                error!(error = %e, order_id = %order.id, "Failed to commit payment settlement");
                ServiceError::DatabaseError(e)
            })?;

            counter!("storefront_payments.settled", 1);
            info!(order_id = %order.id, order_code, cleared_cart_rows = cleared, "Payment settled");
            self.event_sender
                .send_or_log(Event::PaymentSettled {
                    order_id: order.id,
                    order_code: Some(order_code),
                    paid_at: now,
                })
                .await;
            CartService::announce_reset(&self.event_sender, &order.user_id).await;

            let settled = self.orders.find(order.id).await?;
            return Ok(ConfirmOutcome::Settled(settled));
        }

        txn.rollback().await?;
        let current = self.orders.find(order.id).await?;
        if current.is_paid {
            counter!("storefront_payments.duplicate_confirmations", 1);
            debug!(order_id = %order.id, "Lost settlement race; order already paid");
            return Ok(ConfirmOutcome::AlreadyConfirmed(current));
        }

        error!(
            order_id = %order.id,
            order_code,
            status = %current.status,
            "Payment confirmed by provider but order changed state before settlement"
        );
        counter!("storefront_payments.unreconciled", 1);
        Err(ServiceError::Conflict(format!(
            "Order {} cannot be settled (status: {})",
            order.id, current.status
        )))
    }

    /// Provider push notification. The body only names the order code; the
    /// payment state is always re-read from the provider.
    #[instrument(skip(self, payload))]
    pub async fn handle_webhook(
        &self,
        payload: &serde_json::Value,
    ) -> Result<ConfirmOutcome, ServiceError> {
        let order_code = webhook_order_code(payload).ok_or_else(|| {
            ServiceError::ValidationError("Webhook payload has no data.orderCode".to_string())
        })?;
        let outcome = self.confirm_payment(order_code).await?;
        info!(order_code, outcome = outcome.label(), "Payment webhook processed");
        Ok(outcome)
    }
}
