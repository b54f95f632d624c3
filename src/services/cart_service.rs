use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    dto::cart::{AddToCartRequest, CartItemDto, CartView},
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{CartItem, Product},
    response::{ApiResponse, Meta},
};

#[derive(FromRow)]
struct CartWithProductRow {
    cart_id: Uuid,
    size: String,
    quantity: i32,
    item_mrp_price: i64,
    item_selling_price: i64,
    product_id: Uuid,
    seller_id: Uuid,
    name: String,
    description: Option<String>,
    mrp_price: i64,
    selling_price: i64,
    sizes: Option<String>,
    stock: i32,
    created_at: DateTime<Utc>,
}

/// Read the cart with totals and the discount percentage recomputed from the
/// line snapshots. Nothing here is persisted.
pub async fn get_cart(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<CartView>> {
    let rows = sqlx::query_as::<_, CartWithProductRow>(
        r#"
        SELECT ci.id AS cart_id, ci.size, ci.quantity,
               ci.mrp_price AS item_mrp_price, ci.selling_price AS item_selling_price,
               p.id AS product_id, p.seller_id, p.name, p.description,
               p.mrp_price, p.selling_price, p.sizes, p.stock, p.created_at
        FROM cart_items ci
        JOIN products p ON p.id = ci.product_id
        WHERE ci.user_id = $1
        ORDER BY ci.created_at DESC
        "#,
    )
    .bind(user.user_id)
    .fetch_all(pool)
    .await?;

    let mut total_mrp_price = 0i64;
    let mut total_selling_price = 0i64;
    let mut total_item = 0i32;

    let items: Vec<CartItemDto> = rows
        .into_iter()
        .map(|row| {
            total_mrp_price += row.item_mrp_price;
            total_selling_price += row.item_selling_price;
            total_item += row.quantity;
            CartItemDto {
                id: row.cart_id,
                product: Product {
                    id: row.product_id,
                    seller_id: row.seller_id,
                    name: row.name,
                    description: row.description,
                    mrp_price: row.mrp_price,
                    selling_price: row.selling_price,
                    sizes: row.sizes,
                    stock: row.stock,
                    created_at: row.created_at,
                },
                size: row.size,
                quantity: row.quantity,
                mrp_price: row.item_mrp_price,
                selling_price: row.item_selling_price,
            }
        })
        .collect();

    let view = CartView {
        items,
        total_mrp_price,
        total_selling_price,
        total_item,
        discount: discount_percentage(total_mrp_price, total_selling_price),
    };

    Ok(ApiResponse::success("OK", view, Some(Meta::empty())))
}

/// Add a product to the cart, snapshotting its prices at add time.
/// Re-adding the same (product, size) replaces the quantity and refreshes
/// the snapshot.
pub async fn add_to_cart(
    pool: &DbPool,
    user: &AuthUser,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }

    let product: Option<Product> = sqlx::query_as("SELECT * FROM products WHERE id = $1")
        .bind(payload.product_id)
        .fetch_optional(pool)
        .await?;
    let product = match product {
        Some(p) => p,
        None => return Err(AppError::BadRequest("product not found".to_string())),
    };

    let size = payload.size.unwrap_or_default();
    let quantity = payload.quantity as i64;
    let mrp_price = quantity * product.mrp_price;
    let selling_price = quantity * product.selling_price;

    let cart_item: CartItem = sqlx::query_as(
        r#"
        INSERT INTO cart_items (id, user_id, product_id, size, quantity, mrp_price, selling_price)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id, product_id, size) DO UPDATE SET
            quantity = EXCLUDED.quantity,
            mrp_price = EXCLUDED.mrp_price,
            selling_price = EXCLUDED.selling_price
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.user_id)
    .bind(payload.product_id)
    .bind(&size)
    .bind(payload.quantity)
    .bind(mrp_price)
    .bind(selling_price)
    .fetch_one(pool)
    .await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_update",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success("OK", cart_item, None))
}

pub async fn remove_from_cart(
    pool: &DbPool,
    user: &AuthUser,
    product_id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE product_id = $1 AND user_id = $2")
        .bind(product_id)
        .bind(user.user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "cart_remove",
        Some("cart_items"),
        Some(serde_json::json!({ "product_id": product_id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn discount_percentage(mrp_price: i64, selling_price: i64) -> i64 {
    if mrp_price <= 0 {
        return 0;
    }
    let discount = (mrp_price - selling_price) as f64;
    (discount / mrp_price as f64 * 100.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_is_zero_without_mrp() {
        assert_eq!(discount_percentage(0, 0), 0);
    }

    #[test]
    fn discount_rounds_down() {
        assert_eq!(discount_percentage(1000, 800), 20);
        assert_eq!(discount_percentage(300, 200), 33);
    }

    #[test]
    fn no_discount_when_selling_at_mrp() {
        assert_eq!(discount_percentage(500, 500), 0);
    }
}
