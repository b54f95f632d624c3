use std::sync::Arc;

use async_trait::async_trait;
use axum_marketplace_api::{
    db::{create_orm_conn, create_pool},
    domain::PaymentMethod,
    dto::cart::AddToCartRequest,
    dto::orders::ShippingAddressRequest,
    dto::payment::PaymentCallbackQuery,
    entity::{products::ActiveModel as ProductActive, users::ActiveModel as UserActive},
    error::{AppError, AppResult},
    gateway::{Gateways, PaymentGateway, PaymentLink},
    middleware::auth::AuthUser,
    models::{Order, PaymentOrder, SellerReport, Transaction},
    services::{cart_service, order_service, payment_service},
    state::AppState,
};
use sea_orm::ActiveValue::NotSet;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

// A provider double: links are fabricated locally and verification answers
// whatever the test configured, so no network is involved.
struct StubGateway {
    verify_result: bool,
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_link(
        &self,
        _buyer_email: &str,
        _amount: i64,
        payment_order_id: Uuid,
    ) -> AppResult<PaymentLink> {
        Ok(PaymentLink {
            url: format!("https://pay.example/{}", payment_order_id.simple()),
            link_id: format!("plink_{}", payment_order_id.simple()),
        })
    }

    async fn verify(
        &self,
        _payment_id: &str,
        _payment_link_id: &str,
        _signature: Option<&str>,
    ) -> AppResult<bool> {
        Ok(self.verify_result)
    }
}

fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()
}

async fn setup_state(database_url: &str, verify_result: bool) -> anyhow::Result<AppState> {
    let pool = create_pool(database_url).await?;
    let orm = create_orm_conn(database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let stub: Arc<dyn PaymentGateway> = Arc::new(StubGateway { verify_result });
    let gateways = Arc::new(Gateways::new(stub.clone(), stub));
    Ok(AppState {
        pool,
        orm,
        gateways,
    })
}

// Every test creates its own users and sellers, so tests can share one
// database without stepping on each other.
async fn create_user(state: &AppState, role: &str) -> anyhow::Result<AuthUser> {
    let user = UserActive {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{}-{}@example.com", role, Uuid::new_v4().simple())),
        password_hash: Set("dummy".into()),
        role: Set(role.into()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(AuthUser {
        user_id: user.id,
        role: role.into(),
    })
}

async fn create_product(
    state: &AppState,
    seller: &AuthUser,
    name: &str,
    mrp_price: i64,
    selling_price: i64,
) -> anyhow::Result<Uuid> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        seller_id: Set(seller.user_id),
        name: Set(name.into()),
        description: Set(Some("A product for testing".into())),
        mrp_price: Set(mrp_price),
        selling_price: Set(selling_price),
        sizes: Set(None),
        stock: Set(100),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(product.id)
}

async fn add_to_cart(
    state: &AppState,
    buyer: &AuthUser,
    product_id: Uuid,
    quantity: i32,
) -> anyhow::Result<()> {
    cart_service::add_to_cart(
        &state.pool,
        buyer,
        AddToCartRequest {
            product_id,
            size: None,
            quantity,
        },
    )
    .await?;
    Ok(())
}

fn shipping_address() -> ShippingAddressRequest {
    ShippingAddressRequest {
        name: "Test Buyer".into(),
        street: "1 Main St".into(),
        city: "Springfield".into(),
        state: "IL".into(),
        postal_code: "62704".into(),
        mobile: "5551234567".into(),
    }
}

async fn fetch_payment_order(state: &AppState, buyer: &AuthUser) -> anyhow::Result<PaymentOrder> {
    let po: PaymentOrder = sqlx::query_as("SELECT * FROM payment_orders WHERE user_id = $1")
        .bind(buyer.user_id)
        .fetch_one(&state.pool)
        .await?;
    Ok(po)
}

async fn fetch_orders(state: &AppState, buyer: &AuthUser) -> anyhow::Result<Vec<Order>> {
    let orders: Vec<Order> =
        sqlx::query_as("SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at")
            .bind(buyer.user_id)
            .fetch_all(&state.pool)
            .await?;
    Ok(orders)
}

async fn fetch_report(state: &AppState, seller: &AuthUser) -> anyhow::Result<Option<SellerReport>> {
    let report: Option<SellerReport> =
        sqlx::query_as("SELECT * FROM seller_reports WHERE seller_id = $1")
            .bind(seller.user_id)
            .fetch_optional(&state.pool)
            .await?;
    Ok(report)
}

async fn fetch_transactions(
    state: &AppState,
    seller: &AuthUser,
) -> anyhow::Result<Vec<Transaction>> {
    let txs: Vec<Transaction> = sqlx::query_as("SELECT * FROM transactions WHERE seller_id = $1")
        .bind(seller.user_id)
        .fetch_all(&state.pool)
        .await?;
    Ok(txs)
}

// Cart with items from two sellers (500 + 300) -> two orders, one payment
// order of 800, and after the callback both sellers' reports reflect their
// own share exactly once.
#[tokio::test]
async fn checkout_splits_cart_and_settlement_updates_reports() -> anyhow::Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run flow tests.");
        return Ok(());
    };
    let state = setup_state(&url, true).await?;

    let seller1 = create_user(&state, "seller").await?;
    let seller2 = create_user(&state, "seller").await?;
    let buyer = create_user(&state, "user").await?;

    let product_a = create_product(&state, &seller1, "Widget A", 600, 500).await?;
    let product_b = create_product(&state, &seller2, "Widget B", 350, 300).await?;
    add_to_cart(&state, &buyer, product_a, 1).await?;
    add_to_cart(&state, &buyer, product_b, 1).await?;

    let resp =
        order_service::checkout(&state, &buyer, shipping_address(), PaymentMethod::Razorpay)
            .await?;
    let link_url = resp.data.unwrap().payment_link_url;
    assert!(link_url.starts_with("https://pay.example/"));

    let orders = fetch_orders(&state, &buyer).await?;
    assert_eq!(orders.len(), 2);
    let order_s1 = orders.iter().find(|o| o.seller_id == seller1.user_id).unwrap();
    let order_s2 = orders.iter().find(|o| o.seller_id == seller2.user_id).unwrap();
    assert_eq!(order_s1.total_selling_price, 500);
    assert_eq!(order_s2.total_selling_price, 300);
    assert_eq!(order_s1.status, "pending");

    let po = fetch_payment_order(&state, &buyer).await?;
    assert_eq!(po.amount, 800);
    assert_eq!(po.status, "pending");
    let link_id = po.payment_link_id.clone().unwrap();

    let confirmation = payment_service::settle(
        &state,
        "pay_test_1",
        PaymentCallbackQuery {
            payment_link_id: link_id,
            signature: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert!(confirmation.newly_settled);
    assert_eq!(confirmation.orders_settled, 2);

    let report1 = fetch_report(&state, &seller1).await?.unwrap();
    assert_eq!(report1.total_orders, 1);
    assert_eq!(report1.total_earnings, 500);
    assert_eq!(report1.total_sales, 1);

    let report2 = fetch_report(&state, &seller2).await?.unwrap();
    assert_eq!(report2.total_orders, 1);
    assert_eq!(report2.total_earnings, 300);

    assert_eq!(fetch_transactions(&state, &seller1).await?.len(), 1);
    assert_eq!(fetch_transactions(&state, &seller2).await?.len(), 1);

    let orders = fetch_orders(&state, &buyer).await?;
    assert!(orders.iter().all(|o| o.payment_status == "paid"));
    assert!(orders.iter().all(|o| o.status == "placed"));

    // The cart was consumed by the settled checkout.
    let cart = cart_service::get_cart(&state.pool, &buyer).await?.data.unwrap();
    assert!(cart.items.is_empty());

    Ok(())
}

#[tokio::test]
async fn settlement_replay_is_idempotent() -> anyhow::Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run flow tests.");
        return Ok(());
    };
    let state = setup_state(&url, true).await?;

    let seller = create_user(&state, "seller").await?;
    let buyer = create_user(&state, "user").await?;
    let product = create_product(&state, &seller, "Widget", 600, 500).await?;
    add_to_cart(&state, &buyer, product, 2).await?;

    order_service::checkout(&state, &buyer, shipping_address(), PaymentMethod::Stripe).await?;
    let po = fetch_payment_order(&state, &buyer).await?;
    let link_id = po.payment_link_id.clone().unwrap();

    let callback = || PaymentCallbackQuery {
        payment_link_id: link_id.clone(),
        signature: None,
    };

    let first = payment_service::settle(&state, "pay_1", callback())
        .await?
        .data
        .unwrap();
    assert!(first.newly_settled);
    assert_eq!(first.orders_settled, 1);

    let replay = payment_service::settle(&state, "pay_1", callback())
        .await?
        .data
        .unwrap();
    assert!(!replay.newly_settled);
    assert_eq!(replay.orders_settled, 0);

    let report = fetch_report(&state, &seller).await?.unwrap();
    assert_eq!(report.total_orders, 1);
    assert_eq!(report.total_earnings, 1000);
    assert_eq!(fetch_transactions(&state, &seller).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn cancel_requires_ownership() -> anyhow::Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run flow tests.");
        return Ok(());
    };
    let state = setup_state(&url, true).await?;

    let seller = create_user(&state, "seller").await?;
    let buyer = create_user(&state, "user").await?;
    let intruder = create_user(&state, "user").await?;
    let product = create_product(&state, &seller, "Widget", 600, 500).await?;
    add_to_cart(&state, &buyer, product, 1).await?;

    order_service::checkout(&state, &buyer, shipping_address(), PaymentMethod::Razorpay).await?;
    let orders = fetch_orders(&state, &buyer).await?;

    let err = order_service::cancel_order(&state, &intruder, orders[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Ownership));

    // Nothing happened to the seller's counters.
    assert!(fetch_report(&state, &seller).await?.is_none());
    let orders = fetch_orders(&state, &buyer).await?;
    assert_eq!(orders[0].status, "pending");

    Ok(())
}

// Cancel the smaller order before the callback arrives: the cancelled
// seller is compensated, and settlement still pays out the surviving order.
#[tokio::test]
async fn cancel_before_settlement_skips_the_cancelled_order() -> anyhow::Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run flow tests.");
        return Ok(());
    };
    let state = setup_state(&url, true).await?;

    let seller1 = create_user(&state, "seller").await?;
    let seller2 = create_user(&state, "seller").await?;
    let buyer = create_user(&state, "user").await?;
    let product_a = create_product(&state, &seller1, "Widget A", 600, 500).await?;
    let product_b = create_product(&state, &seller2, "Widget B", 350, 300).await?;
    add_to_cart(&state, &buyer, product_a, 1).await?;
    add_to_cart(&state, &buyer, product_b, 1).await?;

    order_service::checkout(&state, &buyer, shipping_address(), PaymentMethod::Razorpay).await?;
    let orders = fetch_orders(&state, &buyer).await?;
    let order_s2 = orders.iter().find(|o| o.seller_id == seller2.user_id).unwrap();

    order_service::cancel_order(&state, &buyer, order_s2.id).await?;

    let report2 = fetch_report(&state, &seller2).await?.unwrap();
    assert_eq!(report2.canceled_orders, 1);
    assert_eq!(report2.total_refunds, 300);
    assert_eq!(report2.total_orders, 0);

    let po = fetch_payment_order(&state, &buyer).await?;
    let confirmation = payment_service::settle(
        &state,
        "pay_1",
        PaymentCallbackQuery {
            payment_link_id: po.payment_link_id.clone().unwrap(),
            signature: None,
        },
    )
    .await?
    .data
    .unwrap();
    assert_eq!(confirmation.orders_settled, 1);

    let report1 = fetch_report(&state, &seller1).await?.unwrap();
    assert_eq!(report1.total_orders, 1);
    assert_eq!(report1.total_earnings, 500);

    // No transaction and no earnings for the cancelled order.
    let report2 = fetch_report(&state, &seller2).await?.unwrap();
    assert_eq!(report2.total_orders, 0);
    assert_eq!(report2.total_earnings, 0);
    assert!(fetch_transactions(&state, &seller2).await?.is_empty());

    let orders = fetch_orders(&state, &buyer).await?;
    let cancelled = orders.iter().find(|o| o.id == order_s2.id).unwrap();
    assert_eq!(cancelled.status, "cancelled");
    assert_eq!(cancelled.payment_status, "pending");

    Ok(())
}

#[tokio::test]
async fn checkout_with_empty_cart_is_rejected() -> anyhow::Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run flow tests.");
        return Ok(());
    };
    let state = setup_state(&url, true).await?;

    let buyer = create_user(&state, "user").await?;
    let err = order_service::checkout(&state, &buyer, shipping_address(), PaymentMethod::Razorpay)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::EmptyCart));

    Ok(())
}

// A client retry with the unchanged cart lands on the same payment order
// instead of splitting the cart a second time.
#[tokio::test]
async fn checkout_retry_reuses_the_pending_payment_order() -> anyhow::Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run flow tests.");
        return Ok(());
    };
    let state = setup_state(&url, true).await?;

    let seller = create_user(&state, "seller").await?;
    let buyer = create_user(&state, "user").await?;
    let product = create_product(&state, &seller, "Widget", 600, 500).await?;
    add_to_cart(&state, &buyer, product, 1).await?;

    let first = order_service::checkout(&state, &buyer, shipping_address(), PaymentMethod::Razorpay)
        .await?
        .data
        .unwrap();
    let second =
        order_service::checkout(&state, &buyer, shipping_address(), PaymentMethod::Razorpay)
            .await?
            .data
            .unwrap();
    assert_eq!(first.payment_link_url, second.payment_link_url);

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM payment_orders WHERE user_id = $1")
        .bind(buyer.user_id)
        .fetch_one(&state.pool)
        .await?;
    assert_eq!(count.0, 1);

    let orders = fetch_orders(&state, &buyer).await?;
    assert_eq!(orders.len(), 1);

    Ok(())
}

#[tokio::test]
async fn failed_verification_leaves_everything_pending() -> anyhow::Result<()> {
    let Some(url) = test_database_url() else {
        eprintln!("Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run flow tests.");
        return Ok(());
    };
    let state = setup_state(&url, false).await?;

    let seller = create_user(&state, "seller").await?;
    let buyer = create_user(&state, "user").await?;
    let product = create_product(&state, &seller, "Widget", 600, 500).await?;
    add_to_cart(&state, &buyer, product, 1).await?;

    order_service::checkout(&state, &buyer, shipping_address(), PaymentMethod::Razorpay).await?;
    let po = fetch_payment_order(&state, &buyer).await?;

    let err = payment_service::settle(
        &state,
        "pay_bogus",
        PaymentCallbackQuery {
            payment_link_id: po.payment_link_id.clone().unwrap(),
            signature: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::PaymentVerificationFailed));

    let po = fetch_payment_order(&state, &buyer).await?;
    assert_eq!(po.status, "pending");
    assert!(fetch_report(&state, &seller).await?.is_none());
    assert!(fetch_transactions(&state, &seller).await?.is_empty());

    Ok(())
}
