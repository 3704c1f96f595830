use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::Identity,
    entities::feedback::Model as FeedbackModel,
    errors::ApiError,
    handlers::common::{created_response, json_body},
    services::feedback::{SubmitFeedbackRequest, UpdateFeedbackRequest},
    ApiResponse, AppState,
};

pub fn feedback_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_feedback))
        .route("/mine", get(list_my_feedback))
        .route("/product/:product_id", get(list_product_feedback))
        .route("/:id", put(update_feedback).delete(delete_feedback))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    identity: Identity,
    payload: Result<Json<SubmitFeedbackRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;
    let feedback = state.services.feedback.submit(&identity, request).await?;
    Ok(created_response(feedback, "Feedback submitted successfully"))
}

/// GET /api/v1/feedback/product/:product_id (public)
pub async fn list_product_feedback(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<FeedbackModel>>>, ApiError> {
    let feedback = state.services.feedback.list_for_product(product_id).await?;
    Ok(Json(ApiResponse::success(feedback)))
}

pub async fn list_my_feedback(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<ApiResponse<Vec<FeedbackModel>>>, ApiError> {
    let feedback = state.services.feedback.list_for_user(&identity).await?;
    Ok(Json(ApiResponse::success(feedback)))
}

pub async fn update_feedback(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
    payload: Result<Json<UpdateFeedbackRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<FeedbackModel>>, ApiError> {
    let request = json_body(payload)?;
    let feedback = state
        .services
        .feedback
        .update(&identity, id, request)
        .await?;
    Ok(Json(ApiResponse::success_with_message(
        feedback,
        "Feedback updated successfully",
    )))
}

pub async fn delete_feedback(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    state.services.feedback.delete(&identity, id).await?;
    Ok(Json(ApiResponse::message("Feedback deleted successfully")))
}
