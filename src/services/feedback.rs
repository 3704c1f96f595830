use crate::{
    auth::Identity,
    db::{is_unique_violation, DbPool},
    entities::{
        feedback::{self, ActiveModel as FeedbackActiveModel, Entity as FeedbackEntity, Model as FeedbackModel},
        order::{self, Entity as OrderEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Comment must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitFeedbackRequest {
    #[serde(alias = "productId")]
    pub product_id: i32,
    #[serde(alias = "orderId")]
    pub order_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(min = 1, max = 2000), custom = "not_blank")]
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateFeedbackRequest {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(min = 1, max = 2000), custom = "not_blank")]
    pub comment: String,
}

/// Reviews, gated on a paid order that contains the reviewed product.
#[derive(Clone)]
pub struct FeedbackService {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl FeedbackService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    #[instrument(skip(self, identity, request), fields(user_id = %identity.user_id, product_id = request.product_id, order_id = %request.order_id))]
    pub async fn submit(
        &self,
        identity: &Identity,
        request: SubmitFeedbackRequest,
    ) -> Result<FeedbackModel, ServiceError> {
        identity.require_customer("submit feedback")?;
        request.validate()?;

        let db = &*self.db_pool;
        let order = OrderEntity::find_by_id(request.order_id)
            .filter(order::Column::UserId.eq(identity.user_id.as_str()))
            .filter(order::Column::IsPaid.eq(true))
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::Forbidden(
                    "You can only review products from your paid orders".to_string(),
                )
            })?;

        if !order.items.contains(request.product_id) {
            return Err(ServiceError::Forbidden(
                "Product not found in this order".to_string(),
            ));
        }

        let existing = FeedbackEntity::find()
            .filter(feedback::Column::UserId.eq(identity.user_id.as_str()))
            .filter(feedback::Column::ProductId.eq(request.product_id))
            .filter(feedback::Column::OrderId.eq(request.order_id))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(already_reviewed());
        }

        let now = Utc::now();
        let row = FeedbackActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(identity.user_id.clone()),
            user_name: Set(identity.display_name()),
            product_id: Set(request.product_id),
            order_id: Set(request.order_id),
            rating: Set(request.rating),
            comment: Set(request.comment.trim().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // The unique index decides between two concurrent submissions.
        let saved = row.insert(db).await.map_err(|e| {
            if is_unique_violation(&e) {
                warn!("Concurrent duplicate review rejected by unique index");
                already_reviewed()
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        counter!("storefront_feedback.submitted", 1);
        info!(feedback_id = %saved.id, "Feedback submitted");
        self.event_sender
            .send_or_log(Event::FeedbackSubmitted {
                feedback_id: saved.id,
                product_id: saved.product_id,
                order_id: saved.order_id,
            })
            .await;

        Ok(saved)
    }

    /// Public reviews of a product, newest first.
    pub async fn list_for_product(&self, product_id: i32) -> Result<Vec<FeedbackModel>, ServiceError> {
        Ok(FeedbackEntity::find()
            .filter(feedback::Column::ProductId.eq(product_id))
            .order_by_desc(feedback::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    pub async fn list_for_user(&self, identity: &Identity) -> Result<Vec<FeedbackModel>, ServiceError> {
        if identity.is_admin() {
            return Ok(Vec::new());
        }
        Ok(FeedbackEntity::find()
            .filter(feedback::Column::UserId.eq(identity.user_id.as_str()))
            .order_by_desc(feedback::Column::CreatedAt)
            .all(&*self.db_pool)
            .await?)
    }

    #[instrument(skip(self, identity, request), fields(user_id = %identity.user_id))]
    pub async fn update(
        &self,
        identity: &Identity,
        feedback_id: Uuid,
        request: UpdateFeedbackRequest,
    ) -> Result<FeedbackModel, ServiceError> {
        identity.require_customer("update feedback")?;
        request.validate()?;

        let result = FeedbackEntity::update_many()
            .set(FeedbackActiveModel {
                rating: Set(request.rating),
                comment: Set(request.comment.trim().to_string()),
                updated_at: Set(Utc::now()),
                ..Default::default()
            })
            .filter(feedback::Column::Id.eq(feedback_id))
            .filter(feedback::Column::UserId.eq(identity.user_id.as_str()))
            .exec(&*self.db_pool)
            .await?;
        if result.rows_affected == 0 {
            return Err(not_found_or_unauthorized());
        }

        FeedbackEntity::find_by_id(feedback_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(not_found_or_unauthorized)
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.user_id))]
    pub async fn delete(&self, identity: &Identity, feedback_id: Uuid) -> Result<(), ServiceError> {
        identity.require_customer("delete feedback")?;

        let result = FeedbackEntity::delete_many()
            .filter(feedback::Column::Id.eq(feedback_id))
            .filter(feedback::Column::UserId.eq(identity.user_id.as_str()))
            .exec(&*self.db_pool)
            .await?;
        if result.rows_affected == 0 {
            return Err(not_found_or_unauthorized());
        }
        info!(%feedback_id, "Feedback deleted");
        Ok(())
    }
}

fn already_reviewed() -> ServiceError {
    ServiceError::Conflict("You have already reviewed this product".to_string())
}

fn not_found_or_unauthorized() -> ServiceError {
    ServiceError::NotFound("Feedback not found or unauthorized".to_string())
}
