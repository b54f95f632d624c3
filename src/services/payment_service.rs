use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    domain::{OrderStatus, PaymentMethod, PaymentStatus},
    dto::payment::{PaymentCallbackQuery, PaymentConfirmation},
    entity::payment_orders::{
        ActiveModel as PaymentOrderActive, Column as PaymentOrderCol, Entity as PaymentOrders,
        Model as PaymentOrderModel,
    },
    error::{AppError, AppResult},
    gateway::PaymentLink,
    models::{Order, PaymentOrder},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// One cart line as it looked when checkout started. The idempotency key is
/// derived from these snapshots, so a retried checkout of an unchanged cart
/// maps onto the same payment order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CartLine {
    pub product_id: Uuid,
    pub size: String,
    pub quantity: i32,
    pub selling_price: i64,
}

pub fn idempotency_key(user_id: Uuid, lines: &[CartLine]) -> String {
    let mut sorted = lines.to_vec();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    for line in &sorted {
        hasher.update(line.product_id.as_bytes());
        hasher.update(line.size.as_bytes());
        hasher.update(line.quantity.to_be_bytes());
        hasher.update(line.selling_price.to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

/// An in-flight payment order for the same cart snapshot, if any.
pub async fn find_pending_by_key<C: ConnectionTrait>(
    conn: &C,
    key: &str,
) -> AppResult<Option<PaymentOrderModel>> {
    let existing = PaymentOrders::find()
        .filter(PaymentOrderCol::IdempotencyKey.eq(key))
        .filter(PaymentOrderCol::Status.eq(PaymentStatus::Pending.as_str()))
        .one(conn)
        .await?;
    Ok(existing)
}

/// Aggregate the orders of one checkout into a single payment request.
pub async fn create_payment_order<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    amount: i64,
    method: PaymentMethod,
    key: &str,
) -> AppResult<PaymentOrderModel> {
    let model = PaymentOrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        amount: Set(amount),
        status: Set(PaymentStatus::Pending.as_str().to_string()),
        payment_method: Set(method.as_str().to_string()),
        payment_link_id: Set(None),
        payment_link_url: Set(None),
        idempotency_key: Set(key.to_string()),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(conn)
    .await?;
    Ok(model)
}

/// Record the provider's external reference once the link request succeeded.
pub async fn attach_payment_link(
    pool: &sqlx::PgPool,
    payment_order_id: Uuid,
    link: &PaymentLink,
) -> AppResult<()> {
    sqlx::query(
        r#"
        UPDATE payment_orders
        SET payment_link_id = $2, payment_link_url = $3, updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(payment_order_id)
    .bind(&link.link_id)
    .bind(&link.url)
    .execute(pool)
    .await?;
    Ok(())
}

/// Settle a confirmed payment: verify it with the provider, then fan out
/// per-order transactions and seller-report increments.
///
/// The whole fan-out runs inside one database transaction guarded by a
/// compare-and-set on the payment order's status, so a replayed callback
/// settles nothing twice and a crash mid-way leaves no partial counters.
pub async fn settle(
    state: &AppState,
    payment_id: &str,
    query: PaymentCallbackQuery,
) -> AppResult<ApiResponse<PaymentConfirmation>> {
    let payment_order: Option<PaymentOrder> =
        sqlx::query_as("SELECT * FROM payment_orders WHERE payment_link_id = $1")
            .bind(&query.payment_link_id)
            .fetch_optional(&state.pool)
            .await?;
    let payment_order = payment_order.ok_or(AppError::NotFound)?;

    if payment_order.status == PaymentStatus::Paid.as_str() {
        return Ok(already_settled(&payment_order));
    }

    let method: PaymentMethod = payment_order.payment_method.parse()?;
    let verified = state
        .gateways
        .for_method(method)
        .verify(payment_id, &query.payment_link_id, query.signature.as_deref())
        .await?;
    if !verified {
        return Err(AppError::PaymentVerificationFailed);
    }

    let mut tx = state.pool.begin().await?;

    let claimed = sqlx::query(
        "UPDATE payment_orders SET status = 'paid', updated_at = now() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(payment_order.id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if claimed == 0 {
        // A concurrent delivery of the same callback won the race.
        tx.rollback().await?;
        return Ok(already_settled(&payment_order));
    }

    let orders: Vec<Order> =
        sqlx::query_as("SELECT * FROM orders WHERE payment_order_id = $1 FOR UPDATE")
            .bind(payment_order.id)
            .fetch_all(&mut *tx)
            .await?;

    let member_total: i64 = orders.iter().map(|o| o.total_selling_price).sum();
    if member_total != payment_order.amount {
        return Err(AppError::InvariantViolation(format!(
            "payment order {} amount {} does not match member orders total {}",
            payment_order.id, payment_order.amount, member_total
        )));
    }

    let mut orders_settled = 0i64;
    for order in &orders {
        if order.status == OrderStatus::Cancelled.as_str() {
            tracing::info!(order_id = %order.id, "skipping cancelled order during settlement");
            continue;
        }

        sqlx::query(
            "UPDATE orders SET payment_status = 'paid', status = 'placed', updated_at = now() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order.id)
        .execute(&mut *tx)
        .await?;

        let item_count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM order_items WHERE order_id = $1")
                .bind(order.id)
                .fetch_one(&mut *tx)
                .await?;

        let recorded = sqlx::query(
            r#"
            INSERT INTO transactions (id, order_id, seller_id, user_id, amount)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(order.id)
        .bind(order.seller_id)
        .bind(order.user_id)
        .bind(order.total_selling_price)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if recorded == 1 {
            sqlx::query(
                r#"
                INSERT INTO seller_reports (seller_id, total_orders, total_earnings, total_sales)
                VALUES ($1, 1, $2, $3)
                ON CONFLICT (seller_id) DO UPDATE SET
                    total_orders = seller_reports.total_orders + 1,
                    total_earnings = seller_reports.total_earnings + EXCLUDED.total_earnings,
                    total_sales = seller_reports.total_sales + EXCLUDED.total_sales,
                    updated_at = now()
                "#,
            )
            .bind(order.seller_id)
            .bind(order.total_selling_price)
            .bind(item_count.0)
            .execute(&mut *tx)
            .await?;
            orders_settled += 1;
        }
    }

    // The cart has served its purpose once its payment is confirmed.
    sqlx::query("DELETE FROM cart_items WHERE user_id = $1")
        .bind(payment_order.user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(payment_order.user_id),
        "payment_settled",
        Some("payment_orders"),
        Some(serde_json::json!({
            "payment_order_id": payment_order.id,
            "payment_id": payment_id,
            "orders_settled": orders_settled,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Payment successful",
        PaymentConfirmation {
            payment_order_id: payment_order.id,
            amount: payment_order.amount,
            orders_settled,
            newly_settled: true,
        },
        Some(Meta::empty()),
    ))
}

fn already_settled(payment_order: &PaymentOrder) -> ApiResponse<PaymentConfirmation> {
    ApiResponse::success(
        "Payment already settled",
        PaymentConfirmation {
            payment_order_id: payment_order.id,
            amount: payment_order.amount,
            orders_settled: 0,
            newly_settled: false,
        },
        Some(Meta::empty()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product: u128, size: &str, quantity: i32, price: i64) -> CartLine {
        CartLine {
            product_id: Uuid::from_u128(product),
            size: size.to_string(),
            quantity,
            selling_price: price,
        }
    }

    #[test]
    fn key_is_stable_across_line_order() {
        let user = Uuid::from_u128(7);
        let a = vec![line(1, "m", 2, 500), line(2, "", 1, 300)];
        let b = vec![line(2, "", 1, 300), line(1, "m", 2, 500)];
        assert_eq!(idempotency_key(user, &a), idempotency_key(user, &b));
    }

    #[test]
    fn key_changes_with_cart_contents() {
        let user = Uuid::from_u128(7);
        let a = vec![line(1, "m", 2, 500)];
        let b = vec![line(1, "m", 3, 500)];
        assert_ne!(idempotency_key(user, &a), idempotency_key(user, &b));
    }

    #[test]
    fn key_changes_with_user() {
        let lines = vec![line(1, "m", 2, 500)];
        assert_ne!(
            idempotency_key(Uuid::from_u128(7), &lines),
            idempotency_key(Uuid::from_u128(8), &lines)
        );
    }
}
