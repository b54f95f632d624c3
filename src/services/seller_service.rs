use chrono::Utc;
use uuid::Uuid;

use crate::{
    audit::log_audit,
    db::DbPool,
    domain::{OrderStatus, PaymentStatus},
    dto::orders::OrderList,
    dto::sellers::{TransactionList, UpdateOrderStatusRequest},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_seller},
    models::{Order, SellerReport, Transaction},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, Pagination, SortOrder},
};

/// The seller's lifetime counters. Reports are created lazily by the
/// settlement and cancellation paths, so a seller without any settled or
/// cancelled order simply sees zeros.
pub async fn get_report(pool: &DbPool, user: &AuthUser) -> AppResult<ApiResponse<SellerReport>> {
    ensure_seller(user)?;

    let report: Option<SellerReport> =
        sqlx::query_as("SELECT * FROM seller_reports WHERE seller_id = $1")
            .bind(user.user_id)
            .fetch_optional(pool)
            .await?;

    let report = report.unwrap_or(SellerReport {
        seller_id: user.user_id,
        total_orders: 0,
        total_earnings: 0,
        total_sales: 0,
        canceled_orders: 0,
        total_refunds: 0,
        updated_at: Utc::now(),
    });

    Ok(ApiResponse::success("Report", report, Some(Meta::empty())))
}

pub async fn list_transactions(
    pool: &DbPool,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<TransactionList>> {
    ensure_seller(user)?;
    let (page, limit, offset) = pagination.normalize();

    let items: Vec<Transaction> = sqlx::query_as(
        "SELECT * FROM transactions WHERE seller_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(user.user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE seller_id = $1")
        .bind(user.user_id)
        .fetch_one(pool)
        .await?;

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success(
        "Transactions",
        TransactionList { items },
        Some(meta),
    ))
}

pub async fn list_orders(
    pool: &DbPool,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_seller(user)?;
    let (page, limit, offset) = query.pagination.normalize();
    let sort = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };

    let status: Option<String> = query.status.clone().filter(|s| !s.is_empty());

    let sql = format!(
        "SELECT * FROM orders WHERE seller_id = $1 AND ($2::text IS NULL OR status = $2) \
         ORDER BY created_at {sort} LIMIT $3 OFFSET $4"
    );
    let items: Vec<Order> = sqlx::query_as(&sql)
        .bind(user.user_id)
        .bind(status.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

    let total: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM orders WHERE seller_id = $1 AND ($2::text IS NULL OR status = $2)",
    )
    .bind(user.user_id)
    .bind(status.as_deref())
    .fetch_one(pool)
    .await?;

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success(
        "Orders",
        OrderList { items },
        Some(meta),
    ))
}

/// Move one of the seller's orders through the fulfilment states. Only
/// settled (paid) orders can progress, and only forward.
pub async fn update_order_status(
    pool: &DbPool,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_seller(user)?;

    let target: OrderStatus = payload.status.parse()?;
    if !matches!(
        target,
        OrderStatus::Confirmed | OrderStatus::Shipped | OrderStatus::Delivered
    ) {
        return Err(AppError::BadRequest(format!(
            "sellers cannot move an order to {}",
            target.as_str()
        )));
    }

    let mut tx = pool.begin().await?;

    let order: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let order = order.ok_or(AppError::NotFound)?;

    if order.seller_id != user.user_id {
        return Err(AppError::Ownership);
    }

    let current: OrderStatus = order.status.parse()?;
    if current.is_terminal() {
        return Err(AppError::BadRequest(format!(
            "order in status {} cannot change anymore",
            order.status
        )));
    }
    if order.payment_status != PaymentStatus::Paid.as_str() {
        return Err(AppError::BadRequest(
            "order has not been paid yet".to_string(),
        ));
    }

    let updated: Order = sqlx::query_as(
        "UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(order.id)
    .bind(target.as_str())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    if let Err(err) = log_audit(
        pool,
        Some(user.user_id),
        "order_status_update",
        Some("orders"),
        Some(serde_json::json!({ "order_id": updated.id, "status": updated.status })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order updated",
        updated,
        Some(Meta::empty()),
    ))
}
