use crate::{
    auth::Identity,
    config::AppConfig,
    db::DbPool,
    entities::cart_item::{self, Entity as CartItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::Catalog,
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Result of a single cart mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartMutation {
    pub product_id: i32,
    /// Quantity after the mutation
    pub quantity: i32,
    /// False when the mutation was a no-op (admin caller, or decrement at zero)
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: i32,
    pub quantity: i32,
    pub name: Option<String>,
    pub image: Option<String>,
    pub unit_price: Option<Decimal>,
    pub line_total: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartDetails {
    pub lines: Vec<CartLine>,
    /// Sum of the lines whose product is known to the catalog
    pub subtotal: Decimal,
    pub total_quantity: i64,
}

/// Per-user cart backed by one row per (user, product).
#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
    cart_slots: i32,
    catalog: Arc<dyn Catalog>,
}

impl CartService {
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            db_pool,
            cart_slots: config.cart_slots,
            catalog,
        }
    }

    pub fn cart_slots(&self) -> i32 {
        self.cart_slots
    }

    /// Rejects product ids outside `[0, cart_slots)`.
    pub fn check_product_id(&self, product_id: i32) -> Result<(), ServiceError> {
        if product_id < 0 || product_id >= self.cart_slots {
            return Err(ServiceError::ValidationError(format!(
                "Product id {} is out of range",
                product_id
            )));
        }
        Ok(())
    }

    /// Adds one unit of `product_id` in a single upsert statement.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn increment(
        &self,
        identity: &Identity,
        product_id: i32,
    ) -> Result<CartMutation, ServiceError> {
        if identity.is_admin() {
            return Ok(CartMutation {
                product_id,
                quantity: 0,
                applied: false,
            });
        }
        self.check_product_id(product_id)?;

        let db = &*self.db_pool;
        let row = cart_item::ActiveModel {
            user_id: Set(identity.user_id.clone()),
            product_id: Set(product_id),
            quantity: Set(1),
            updated_at: Set(Utc::now()),
        };

        CartItemEntity::insert(row)
            .on_conflict(
                OnConflict::columns([cart_item::Column::UserId, cart_item::Column::ProductId])
                    .value(
                        cart_item::Column::Quantity,
                        Expr::col((CartItemEntity, cart_item::Column::Quantity)).add(1),
                    )
                    .update_column(cart_item::Column::UpdatedAt)
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;

        let quantity = self.quantity_of(&identity.user_id, product_id).await?;
        counter!("storefront_cart.mutations", 1, "op" => "increment");
        debug!(product_id, quantity, "cart incremented");

        Ok(CartMutation {
            product_id,
            quantity,
            applied: true,
        })
    }

    /// Removes one unit of `product_id`; never goes below zero.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn decrement(
        &self,
        identity: &Identity,
        product_id: i32,
    ) -> Result<CartMutation, ServiceError> {
        if identity.is_admin() {
            return Ok(CartMutation {
                product_id,
                quantity: 0,
                applied: false,
            });
        }
        self.check_product_id(product_id)?;

        let db = &*self.db_pool;
        let result = CartItemEntity::update_many()
            .col_expr(
                cart_item::Column::Quantity,
                Expr::col(cart_item::Column::Quantity).sub(1),
            )
            .col_expr(cart_item::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart_item::Column::UserId.eq(identity.user_id.as_str()))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .filter(cart_item::Column::Quantity.gt(0))
            .exec(db)
            .await?;

        let quantity = self.quantity_of(&identity.user_id, product_id).await?;
        let applied = result.rows_affected == 1;
        if applied {
            counter!("storefront_cart.mutations", 1, "op" => "decrement");
        }
        debug!(product_id, quantity, applied, "cart decremented");

        Ok(CartMutation {
            product_id,
            quantity,
            applied,
        })
    }

    /// Non-zero cart entries of the caller. Admins have no cart.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn get_cart(&self, identity: &Identity) -> Result<BTreeMap<i32, i32>, ServiceError> {
        if identity.is_admin() {
            return Ok(BTreeMap::new());
        }

        let rows = CartItemEntity::find()
            .filter(cart_item::Column::UserId.eq(identity.user_id.as_str()))
            .filter(cart_item::Column::Quantity.gt(0))
            .order_by_asc(cart_item::Column::ProductId)
            .all(&*self.db_pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.product_id, row.quantity))
            .collect())
    }

    /// Cart lines decorated with catalog data. Products unknown to the catalog
    /// are still listed, without price.
    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn get_cart_details(&self, identity: &Identity) -> Result<CartDetails, ServiceError> {
        let cart = self.get_cart(identity).await?;

        let mut lines = Vec::with_capacity(cart.len());
        let mut subtotal = Decimal::ZERO;
        let mut total_quantity = 0i64;

        for (product_id, quantity) in cart {
            let product = self.catalog.product(product_id).await?;
            let line_total = product
                .as_ref()
                .map(|p| p.price * Decimal::from(quantity));
            if let Some(total) = line_total {
                subtotal += total;
            }
            total_quantity += i64::from(quantity);

            lines.push(CartLine {
                product_id,
                quantity,
                name: product.as_ref().map(|p| p.name.clone()),
                image: product.as_ref().and_then(|p| p.image.clone()),
                unit_price: product.as_ref().map(|p| p.price),
                line_total,
            });
        }

        Ok(CartDetails {
            lines,
            subtotal,
            total_quantity,
        })
    }

    /// Clears every entry of `user_id` on the given connection, so callers can
    /// make the reset part of their own transaction.
    pub async fn reset_within<C: ConnectionTrait>(conn: &C, user_id: &str) -> Result<u64, ServiceError> {
        let result = CartItemEntity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Emits the cart-cleared event once the resetting transaction committed.
    pub(crate) async fn announce_reset(event_sender: &EventSender, user_id: &str) {
        event_sender
            .send_or_log(Event::CartCleared {
                user_id: user_id.to_string(),
            })
            .await;
    }

    async fn quantity_of(&self, user_id: &str, product_id: i32) -> Result<i32, ServiceError> {
        let row = CartItemEntity::find_by_id((user_id.to_string(), product_id))
            .one(&*self.db_pool)
            .await?;
        Ok(row.map(|r| r.quantity).unwrap_or(0))
    }
}
