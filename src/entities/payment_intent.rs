use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A gateway payment link request. Every attempt gets its own order code so
/// retried checkouts never reuse a code the provider has already seen.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_intents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub order_code: i64,
    pub order_id: Uuid,
    /// Integer amount sent to the provider (order amount times the scale factor)
    pub amount_minor: i64,
    pub description: String,
    pub checkout_url: Option<String>,
    pub status: IntentStatus,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Recorded, provider not yet answered
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "link_issued")]
    LinkIssued,
    #[sea_orm(string_value = "failed")]
    Failed,
}
