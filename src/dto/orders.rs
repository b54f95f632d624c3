use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Order, OrderItem};

/// Shipping address submitted at checkout. Appended to the user's address
/// book when no identical row exists yet.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ShippingAddressRequest {
    pub name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub mobile: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentLinkResponse {
    pub payment_link_url: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}
