use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const PAYMENT_METHOD_CASH: &str = "Cash on Delivery";
pub const PAYMENT_METHOD_GATEWAY: &str = "PayOS";

/// Purchase record. `items`, `amount`, `address` and `user_id` are fixed at
/// checkout; only the payment and fulfillment columns change afterwards.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: String,
    #[sea_orm(column_type = "Json")]
    pub items: OrderItems,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    pub address: String,
    pub status: OrderStatus,
    pub is_paid: bool,
    /// Most recent gateway order code issued for this order
    #[sea_orm(unique, nullable)]
    pub order_code: Option<i64>,
    #[sea_orm(column_type = "Json", nullable)]
    pub payment_info: Option<PaymentInfo>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::payment_intent::Entity")]
    PaymentIntents,
    #[sea_orm(has_many = "super::feedback::Entity")]
    Feedback,
}

impl Related<super::payment_intent::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PaymentIntents.def()
    }
}

impl Related<super::feedback::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Feedback.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order lifecycle.
///
/// ```text
/// Pending Payment -> Processing | Paid | Cancelled
/// Processing      -> Paid | Completed | Cancelled
/// Paid            -> Completed
/// ```
/// `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "Pending Payment")]
    #[serde(rename = "Pending Payment")]
    PendingPayment,
    #[sea_orm(string_value = "Processing")]
    Processing,
    #[sea_orm(string_value = "Paid")]
    Paid,
    #[sea_orm(string_value = "Completed")]
    Completed,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
}

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (PendingPayment, Processing)
                | (PendingPayment, Paid)
                | (PendingPayment, Cancelled)
                | (Processing, Paid)
                | (Processing, Completed)
                | (Processing, Cancelled)
                | (Paid, Completed)
        )
    }

    /// Statuses from which a settlement may still land.
    pub fn accepts_payment(self) -> bool {
        matches!(self, OrderStatus::PendingPayment | OrderStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "Pending Payment",
            OrderStatus::Processing => "Processing",
            OrderStatus::Paid => "Paid",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the cart at checkout: product id to quantity, all quantities positive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(transparent)]
pub struct OrderItems(pub BTreeMap<i32, i32>);

impl OrderItems {
    /// Keeps only the entries with a positive quantity.
    pub fn positive(items: &BTreeMap<i32, i32>) -> Self {
        OrderItems(
            items
                .iter()
                .filter(|(_, quantity)| **quantity > 0)
                .map(|(product_id, quantity)| (*product_id, *quantity))
                .collect(),
        )
    }

    pub fn contains(&self, product_id: i32) -> bool {
        self.0.contains_key(&product_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_quantity(&self) -> i64 {
        self.0.values().map(|q| i64::from(*q)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.0.iter().map(|(p, q)| (*p, *q))
    }
}

/// Settlement record, written once when the order becomes paid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct PaymentInfo {
    /// Gateway order code; absent for cash settlement
    pub order_code: Option<i64>,
    pub transaction_id: Option<String>,
    pub transaction_date_time: Option<String>,
    pub payment_method: String,
    /// Amount as reported by the settling party
    pub amount: Decimal,
}

impl PaymentInfo {
    pub fn cash_on_delivery(amount: Decimal) -> Self {
        Self {
            order_code: None,
            transaction_id: None,
            transaction_date_time: None,
            payment_method: PAYMENT_METHOD_CASH.to_string(),
            amount,
        }
    }
}
