use crate::{
    auth::Identity,
    config::AppConfig,
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderItems, OrderStatus, PaymentInfo,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::cart::CartService,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// How a new order is going to be paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    /// Paid on delivery; the order is settled at creation.
    CashOnDelivery,
    /// Paid through the external payment gateway.
    Gateway,
}

/// Upper bound for order amounts; `orders.amount` keeps 12 integer digits.
pub const MAX_ORDER_AMOUNT: i64 = 1_000_000_000_000;

/// Checkout payload. Every field is optional on the wire so that a missing
/// field is reported as a validation failure instead of a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutInput {
    #[serde(default, alias = "cartItems")]
    pub items: Option<BTreeMap<i32, i32>>,
    pub amount: Option<Decimal>,
    pub address: Option<String>,
}

/// One purchased line of a paid order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidItem {
    pub order_id: Uuid,
    pub user_id: String,
    pub product_id: i32,
    pub quantity: i32,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Order ledger operations.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    cart_slots: i32,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        Self {
            db_pool,
            event_sender,
            cart_slots: config.cart_slots,
        }
    }

    /// Turns the submitted cart snapshot into an order.
    ///
    /// Only entries with a positive quantity are kept. Cash-on-delivery
    /// orders are settled immediately and clear the cart in the same
    /// transaction; gateway orders wait for a payment confirmation.
    #[instrument(skip(self, identity, input), fields(user_id = %identity.user_id, settlement = ?settlement))]
    pub async fn create_order_from_cart(
        &self,
        identity: &Identity,
        input: CheckoutInput,
        settlement: Settlement,
    ) -> Result<OrderModel, ServiceError> {
        identity.require_customer("make purchases")?;

        let (items, amount, address) = match (input.items, input.amount, input.address) {
            (Some(items), Some(amount), Some(address)) => (items, amount, address),
            _ => return Err(ServiceError::ValidationError("Missing fields".to_string())),
        };

        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Amount must be greater than zero".to_string(),
            ));
        }
        if amount >= Decimal::from(MAX_ORDER_AMOUNT) {
            return Err(ServiceError::ValidationError(format!(
                "Amount must be below {}",
                MAX_ORDER_AMOUNT
            )));
        }
        let address = address.trim().to_string();
        if address.is_empty() {
            return Err(ServiceError::ValidationError(
                "Address is required".to_string(),
            ));
        }
        if let Some(product_id) = items
            .keys()
            .copied()
            .find(|id| *id < 0 || *id >= self.cart_slots)
        {
            return Err(ServiceError::ValidationError(format!(
                "Product id {} is out of range",
                product_id
            )));
        }

        let snapshot = OrderItems::positive(&items);
        if snapshot.is_empty() {
            return Err(ServiceError::ValidationError(
                "No items in cart with quantity greater than 0".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let cash = settlement == Settlement::CashOnDelivery;

        let mut active = OrderActiveModel {
            id: Set(order_id),
            user_id: Set(identity.user_id.clone()),
            items: Set(snapshot),
            amount: Set(amount),
            address: Set(address),
            status: Set(OrderStatus::PendingPayment),
            is_paid: Set(false),
            order_code: Set(None),
            payment_info: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        if cash {
            active.status = Set(OrderStatus::Processing);
            active.is_paid = Set(true);
            active.payment_info = Set(Some(PaymentInfo::cash_on_delivery(amount)));
            active.paid_at = Set(Some(now));
        }

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order = active.insert(&txn).await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to create order in database");
            ServiceError::DatabaseError(e)
        })?;

        if cash {
            CartService::reset_within(&txn, &identity.user_id).await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, %order_id, "Failed to commit order creation transaction");
            ServiceError::DatabaseError(e)
        })?;

        let settlement_label = if cash { "cash_on_delivery" } else { "gateway" };
        counter!("storefront_orders.created", 1, "settlement" => settlement_label);
        info!(%order_id, amount = %order.amount, status = %order.status, "Order created");

        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                user_id: order.user_id.clone(),
                amount: order.amount,
                cash_on_delivery: cash,
            })
            .await;
        if cash {
            self.event_sender
                .send_or_log(Event::PaymentSettled {
                    order_id,
                    order_code: None,
                    paid_at: now,
                })
                .await;
            CartService::announce_reset(&self.event_sender, &order.user_id).await;
        }

        Ok(order)
    }

    /// Orders of the caller, newest first. Admins own no orders.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn list_orders(&self, identity: &Identity) -> Result<Vec<OrderModel>, ServiceError> {
        if identity.is_admin() {
            return Ok(Vec::new());
        }

        let orders = OrderEntity::find()
            .filter(order::Column::UserId.eq(identity.user_id.as_str()))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?;
        Ok(orders)
    }

    /// Fetches one order visible to the caller (its owner, or an admin).
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id, order_id = %order_id))]
    pub async fn get_order(
        &self,
        identity: &Identity,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.find(order_id).await?;
        if !identity.is_admin() && order.user_id != identity.user_id {
            return Err(not_found(order_id));
        }
        Ok(order)
    }

    /// Cancels an order that has not been paid yet.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id, order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        identity: &Identity,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        self.get_order(identity, order_id).await?;

        let now = Utc::now();
        let result = OrderEntity::update_many()
            .set(OrderActiveModel {
                status: Set(OrderStatus::Cancelled),
                updated_at: Set(now),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::IsPaid.eq(false))
            .filter(
                order::Column::Status.is_in([OrderStatus::PendingPayment, OrderStatus::Processing]),
            )
            .exec(&*self.db_pool)
            .await?;

        let order = self.find(order_id).await?;
        if result.rows_affected == 0 {
            warn!(%order_id, status = %order.status, is_paid = order.is_paid, "Cancellation rejected");
            return Err(ServiceError::Conflict(format!(
                "Order {} can no longer be cancelled (status: {})",
                order_id, order.status
            )));
        }

        counter!("storefront_orders.cancelled", 1);
        info!(%order_id, "Order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled(order_id))
            .await;

        Ok(order)
    }

    /// Moves an order along its fulfillment path. `Paid` is reserved for
    /// payment settlement.
    #[instrument(skip(self, identity), fields(order_id = %order_id, target = %target))]
    pub async fn advance_status(
        &self,
        identity: &Identity,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        identity.require_admin()?;
        if target == OrderStatus::Paid {
            return Err(ServiceError::ValidationError(
                "Orders become Paid only through payment settlement".to_string(),
            ));
        }

        let current = self.find(order_id).await?;
        if !current.status.can_transition_to(target) {
            return Err(ServiceError::Conflict(format!(
                "Cannot move order from {} to {}",
                current.status, target
            )));
        }

        let result = OrderEntity::update_many()
            .set(OrderActiveModel {
                status: Set(target),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(current.status))
            .exec(&*self.db_pool)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order {} was modified concurrently",
                order_id
            )));
        }

        let updated = self.find(order_id).await?;
        info!(%order_id, from = %current.status, to = %target, "Order status advanced");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: current.status.to_string(),
                new_status: target.to_string(),
            })
            .await;

        Ok(updated)
    }

    /// Flattened lines of every paid order, most recently paid first.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn list_paid_items(&self, identity: &Identity) -> Result<Vec<PaidItem>, ServiceError> {
        identity.require_admin()?;

        let orders = OrderEntity::find()
            .filter(order::Column::IsPaid.eq(true))
            .order_by_desc(order::Column::PaidAt)
            .all(&*self.db_pool)
            .await?;

        Ok(orders
            .iter()
            .flat_map(|order| {
                order.items.iter().map(move |(product_id, quantity)| PaidItem {
                    order_id: order.id,
                    user_id: order.user_id.clone(),
                    product_id,
                    quantity,
                    paid_at: order.paid_at,
                })
            })
            .collect())
    }

    pub(crate) async fn find(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        OrderEntity::find_by_id(order_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| not_found(order_id))
    }
}

fn not_found(order_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Order {} not found", order_id))
}
