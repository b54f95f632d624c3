use std::collections::BTreeMap;

use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit::log_audit,
    domain::{OrderStatus, PaymentMethod, PaymentStatus},
    dto::orders::{OrderList, OrderWithItems, PaymentLinkResponse, ShippingAddressRequest},
    entity::{
        addresses::{ActiveModel as AddressActive, Column as AddressCol, Entity as Addresses},
        cart_items::{self, Column as CartCol, Entity as CartItems},
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems, Model as OrderItemModel},
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{self, Column as ProdCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderItem},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::payment_service::{self, CartLine},
    state::AppState,
};

/// Running totals for one seller's share of a checkout.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SellerTotals {
    pub total_mrp_price: i64,
    pub total_selling_price: i64,
    pub total_item: i32,
}

/// Group cart lines by seller and sum each group's totals. The price fields
/// are the cart's add-time snapshots, already multiplied by quantity.
fn seller_totals(lines: &[(Uuid, i64, i64, i32)]) -> BTreeMap<Uuid, SellerTotals> {
    let mut groups: BTreeMap<Uuid, SellerTotals> = BTreeMap::new();
    for (seller_id, mrp_price, selling_price, quantity) in lines {
        let entry = groups.entry(*seller_id).or_default();
        entry.total_mrp_price += mrp_price;
        entry.total_selling_price += selling_price;
        entry.total_item += quantity;
    }
    groups
}

/// Checkout: split the cart into per-seller orders, aggregate them into one
/// payment order, and request a payment link from the chosen provider.
///
/// Splitting and aggregation commit atomically. The gateway call happens
/// after the commit; if it fails the payment order stays pending without a
/// link, and re-running checkout with the unchanged cart retries only the
/// link request.
pub async fn checkout(
    state: &AppState,
    user: &AuthUser,
    payload: ShippingAddressRequest,
    method: PaymentMethod,
) -> AppResult<ApiResponse<PaymentLinkResponse>> {
    let buyer: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
        .bind(user.user_id)
        .fetch_optional(&state.pool)
        .await?;
    let (buyer_email,) = buyer.ok_or(AppError::NotFound)?;

    let txn = state.orm.begin().await?;

    let items = CartItems::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .lock(LockType::Update)
        .all(&txn)
        .await?;
    if items.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let product_map: BTreeMap<Uuid, products::Model> = Products::find()
        .filter(ProdCol::Id.is_in(product_ids))
        .all(&txn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let lines: Vec<CartLine> = items
        .iter()
        .map(|item| CartLine {
            product_id: item.product_id,
            size: item.size.clone(),
            quantity: item.quantity,
            selling_price: item.selling_price,
        })
        .collect();
    let key = payment_service::idempotency_key(user.user_id, &lines);

    // A client retry with an unchanged cart must not split the cart again.
    if let Some(existing) = payment_service::find_pending_by_key(&txn, &key).await? {
        txn.rollback().await?;
        return resume_pending_checkout(state, user, &buyer_email, existing).await;
    }

    let address_id = find_or_insert_address(&txn, user.user_id, &payload).await?;

    let mut grouped: BTreeMap<Uuid, Vec<&cart_items::Model>> = BTreeMap::new();
    let mut totals_input: Vec<(Uuid, i64, i64, i32)> = Vec::with_capacity(items.len());
    for item in &items {
        let product = product_map.get(&item.product_id).ok_or_else(|| {
            AppError::InvariantViolation(format!(
                "cart references missing product {}",
                item.product_id
            ))
        })?;
        grouped.entry(product.seller_id).or_default().push(item);
        totals_input.push((
            product.seller_id,
            item.mrp_price,
            item.selling_price,
            item.quantity,
        ));
    }
    let totals = seller_totals(&totals_input);

    let amount: i64 = totals.values().map(|t| t.total_selling_price).sum();
    let payment_order =
        payment_service::create_payment_order(&txn, user.user_id, amount, method, &key).await?;

    let mut order_count = 0usize;
    for (seller_id, seller_items) in &grouped {
        let seller_totals = &totals[seller_id];
        let order = OrderActive {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.user_id),
            seller_id: Set(*seller_id),
            shipping_address_id: Set(address_id),
            payment_order_id: Set(Some(payment_order.id)),
            total_mrp_price: Set(seller_totals.total_mrp_price),
            total_selling_price: Set(seller_totals.total_selling_price),
            total_item: Set(seller_totals.total_item),
            status: Set(OrderStatus::Pending.as_str().to_string()),
            payment_status: Set(PaymentStatus::Pending.as_str().to_string()),
            created_at: NotSet,
            updated_at: NotSet,
        }
        .insert(&txn)
        .await?;

        for item in seller_items {
            OrderItemActive {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(item.product_id),
                size: Set(item.size.clone()),
                quantity: Set(item.quantity),
                mrp_price: Set(item.mrp_price),
                selling_price: Set(item.selling_price),
                created_at: NotSet,
            }
            .insert(&txn)
            .await?;
        }
        order_count += 1;
    }

    txn.commit().await?;

    let link = state
        .gateways
        .for_method(method)
        .create_link(&buyer_email, payment_order.amount, payment_order.id)
        .await?;
    payment_service::attach_payment_link(&state.pool, payment_order.id, &link).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout",
        Some("orders"),
        Some(serde_json::json!({
            "payment_order_id": payment_order.id,
            "orders": order_count,
            "amount": payment_order.amount,
        })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Checkout created",
        PaymentLinkResponse {
            payment_link_url: link.url,
        },
        Some(Meta::empty()),
    ))
}

/// A pending payment order already exists for this exact cart. Reuse its
/// link, or request one now if the earlier gateway call failed.
async fn resume_pending_checkout(
    state: &AppState,
    user: &AuthUser,
    buyer_email: &str,
    existing: crate::entity::payment_orders::Model,
) -> AppResult<ApiResponse<PaymentLinkResponse>> {
    if let Some(url) = existing.payment_link_url {
        return Ok(ApiResponse::success(
            "Checkout pending",
            PaymentLinkResponse {
                payment_link_url: url,
            },
            Some(Meta::empty()),
        ));
    }

    let method: PaymentMethod = existing.payment_method.parse()?;
    let link = state
        .gateways
        .for_method(method)
        .create_link(buyer_email, existing.amount, existing.id)
        .await?;
    payment_service::attach_payment_link(&state.pool, existing.id, &link).await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "checkout_link_retry",
        Some("payment_orders"),
        Some(serde_json::json!({ "payment_order_id": existing.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Checkout pending",
        PaymentLinkResponse {
            payment_link_url: link.url,
        },
        Some(Meta::empty()),
    ))
}

/// Append the shipping address to the user's address book unless a row with
/// the same field values already exists.
async fn find_or_insert_address(
    txn: &sea_orm::DatabaseTransaction,
    user_id: Uuid,
    payload: &ShippingAddressRequest,
) -> AppResult<Uuid> {
    let existing = Addresses::find()
        .filter(
            Condition::all()
                .add(AddressCol::UserId.eq(user_id))
                .add(AddressCol::Name.eq(payload.name.clone()))
                .add(AddressCol::Street.eq(payload.street.clone()))
                .add(AddressCol::City.eq(payload.city.clone()))
                .add(AddressCol::State.eq(payload.state.clone()))
                .add(AddressCol::PostalCode.eq(payload.postal_code.clone()))
                .add(AddressCol::Mobile.eq(payload.mobile.clone())),
        )
        .one(txn)
        .await?;

    if let Some(address) = existing {
        return Ok(address.id);
    }

    let address = AddressActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        name: Set(payload.name.clone()),
        street: Set(payload.street.clone()),
        city: Set(payload.city.clone()),
        state: Set(payload.state.clone()),
        postal_code: Set(payload.postal_code.clone()),
        mobile: Set(payload.mobile.clone()),
        created_at: NotSet,
    }
    .insert(txn)
    .await?;
    Ok(address.id)
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination.normalize();
    let mut condition = Condition::all().add(OrderCol::UserId.eq(user.user_id));
    if let Some(status) = query.status.as_ref().filter(|s| !s.is_empty()) {
        condition = condition.add(OrderCol::Status.eq(status.clone()));
    }

    let sort_order = query.sort_order.unwrap_or(SortOrder::Desc);

    let mut finder = Orders::find().filter(condition);
    finder = match sort_order {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    let meta = Meta::new(page, limit, total);
    Ok(ApiResponse::success(
        "Ok",
        OrderList { items: orders },
        Some(meta),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = Orders::find()
        .filter(
            Condition::all()
                .add(OrderCol::UserId.eq(user.user_id))
                .add(OrderCol::Id.eq(id)),
        )
        .one(&state.orm)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Cancel one pending order and compensate the seller's running counters.
/// The order row is locked so a concurrent settlement serializes with us.
pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    let mut tx = state.pool.begin().await?;

    let order: Option<Order> = sqlx::query_as("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
    let order = order.ok_or(AppError::NotFound)?;

    if order.user_id != user.user_id {
        return Err(AppError::Ownership);
    }

    let status: OrderStatus = order.status.parse()?;
    if !status.is_cancellable() {
        return Err(AppError::BadRequest(format!(
            "order in status {} cannot be cancelled",
            order.status
        )));
    }

    let updated: Order = sqlx::query_as(
        "UPDATE orders SET status = 'cancelled', updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(order.id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO seller_reports (seller_id, canceled_orders, total_refunds)
        VALUES ($1, 1, $2)
        ON CONFLICT (seller_id) DO UPDATE SET
            canceled_orders = seller_reports.canceled_orders + 1,
            total_refunds = seller_reports.total_refunds + EXCLUDED.total_refunds,
            updated_at = now()
        "#,
    )
    .bind(order.seller_id)
    .bind(order.total_selling_price)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    if let Err(err) = log_audit(
        &state.pool,
        Some(user.user_id),
        "order_cancelled",
        Some("orders"),
        Some(serde_json::json!({ "order_id": order.id })),
    )
    .await
    {
        tracing::warn!(error = %err, "audit log failed");
    }

    Ok(ApiResponse::success(
        "Order cancelled",
        updated,
        Some(Meta::empty()),
    ))
}

fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        seller_id: model.seller_id,
        shipping_address_id: model.shipping_address_id,
        payment_order_id: model.payment_order_id,
        total_mrp_price: model.total_mrp_price,
        total_selling_price: model.total_selling_price,
        total_item: model.total_item,
        status: model.status,
        payment_status: model.payment_status,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        size: model.size,
        quantity: model.quantity,
        mrp_price: model.mrp_price,
        selling_price: model.selling_price,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_lines_by_seller_and_sums_totals() {
        let s1 = Uuid::from_u128(1);
        let s2 = Uuid::from_u128(2);
        let lines = vec![(s1, 600, 500, 2), (s2, 350, 300, 1), (s1, 100, 80, 3)];

        let totals = seller_totals(&lines);
        assert_eq!(totals.len(), 2);
        assert_eq!(
            totals[&s1],
            SellerTotals {
                total_mrp_price: 700,
                total_selling_price: 580,
                total_item: 5,
            }
        );
        assert_eq!(
            totals[&s2],
            SellerTotals {
                total_mrp_price: 350,
                total_selling_price: 300,
                total_item: 1,
            }
        );
    }

    #[test]
    fn single_seller_cart_produces_one_group() {
        let s1 = Uuid::from_u128(1);
        let lines = vec![(s1, 100, 90, 1), (s1, 200, 180, 2)];
        let totals = seller_totals(&lines);
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[&s1].total_selling_price, 270);
    }
}
