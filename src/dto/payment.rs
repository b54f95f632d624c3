use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Query half of the provider return callback. `payment_link_id` is the
/// external reference stored when the link was created; `signature` is only
/// sent by the link-based provider.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PaymentCallbackQuery {
    #[serde(alias = "paymentLinkId")]
    pub payment_link_id: String,
    pub signature: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentConfirmation {
    pub payment_order_id: Uuid,
    pub amount: i64,
    pub orders_settled: i64,
    /// False when this callback was a replay of an already settled payment.
    pub newly_settled: bool,
}
