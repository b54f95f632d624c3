use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};

use crate::{
    dto::payment::{PaymentCallbackQuery, PaymentConfirmation},
    error::AppResult,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/{payment_id}", get(payment_callback))
}

/// Provider return/confirmation callback. Providers redirect the buyer here
/// after payment; the same URL may be hit more than once, so settlement is
/// idempotent.
#[utoipa::path(
    get,
    path = "/api/payment/{payment_id}",
    params(
        ("payment_id" = String, Path, description = "Provider payment id"),
        ("payment_link_id" = String, Query, description = "External payment link / session id"),
        ("signature" = Option<String>, Query, description = "Provider callback signature, when sent")
    ),
    responses(
        (status = 200, description = "Payment settled", body = ApiResponse<PaymentConfirmation>),
        (status = 404, description = "Unknown payment link"),
        (status = 422, description = "Verification with the provider failed")
    ),
    tag = "Payment"
)]
pub async fn payment_callback(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    Query(query): Query<PaymentCallbackQuery>,
) -> AppResult<Json<ApiResponse<PaymentConfirmation>>> {
    let resp = payment_service::settle(&state, &payment_id, query).await?;
    Ok(Json(resp))
}
