use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Address {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub mobile: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub seller_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub mrp_price: i64,
    pub selling_price: i64,
    pub sizes: Option<String>,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
}

/// A cart line. Prices are snapshots taken when the item was added:
/// `selling_price = quantity * product.selling_price` at add time.
#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub size: String,
    pub quantity: i32,
    pub mrp_price: i64,
    pub selling_price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub seller_id: Uuid,
    pub shipping_address_id: Uuid,
    pub payment_order_id: Option<Uuid>,
    pub total_mrp_price: i64,
    pub total_selling_price: i64,
    pub total_item: i32,
    pub status: String,
    pub payment_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub size: String,
    pub quantity: i32,
    pub mrp_price: i64,
    pub selling_price: i64,
    pub created_at: DateTime<Utc>,
}

/// One aggregated payment request covering every order of a checkout.
#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct PaymentOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub status: String,
    pub payment_method: String,
    pub payment_link_id: Option<String>,
    pub payment_link_url: Option<String>,
    #[serde(skip_serializing)]
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub seller_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, FromRow)]
pub struct SellerReport {
    pub seller_id: Uuid,
    pub total_orders: i64,
    pub total_earnings: i64,
    pub total_sales: i64,
    pub canceled_orders: i64,
    pub total_refunds: i64,
    pub updated_at: DateTime<Utc>,
}
