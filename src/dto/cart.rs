use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    pub size: Option<String>,
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartItemDto {
    pub id: Uuid,
    pub product: Product,
    pub size: String,
    pub quantity: i32,
    pub mrp_price: i64,
    pub selling_price: i64,
}

/// The cart aggregate. Totals and the discount percentage are recomputed on
/// every read; they are never stored.
#[derive(Debug, Serialize, ToSchema)]
pub struct CartView {
    pub items: Vec<CartItemDto>,
    pub total_mrp_price: i64,
    pub total_selling_price: i64,
    pub total_item: i32,
    pub discount: i64,
}
