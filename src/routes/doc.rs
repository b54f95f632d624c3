use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    domain::{OrderStatus, PaymentMethod, PaymentStatus},
    dto::{
        cart::{CartItemDto, CartView},
        orders::{OrderList, OrderWithItems, PaymentLinkResponse, ShippingAddressRequest},
        payment::PaymentConfirmation,
        products,
        sellers::{TransactionList, UpdateOrderStatusRequest},
    },
    models::{CartItem, Order, OrderItem, Product, SellerReport, Transaction, User},
    response::{ApiResponse, Meta},
    routes::{
        auth, cart, health, orders, params, payment, products as product_routes, sellers,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::login,
        auth::register,
        cart::get_cart,
        cart::add_to_cart,
        cart::remove_from_cart,
        product_routes::list_products,
        product_routes::create_product,
        product_routes::get_product,
        orders::checkout,
        orders::list_orders,
        orders::get_order,
        orders::cancel_order,
        payment::payment_callback,
        sellers::get_report,
        sellers::list_transactions,
        sellers::list_orders,
        sellers::update_order_status
    ),
    components(
        schemas(
            User,
            Product,
            CartItem,
            CartItemDto,
            CartView,
            Order,
            OrderItem,
            Transaction,
            SellerReport,
            OrderStatus,
            PaymentStatus,
            PaymentMethod,
            ShippingAddressRequest,
            PaymentLinkResponse,
            PaymentConfirmation,
            UpdateOrderStatusRequest,
            TransactionList,
            OrderList,
            OrderWithItems,
            params::Pagination,
            params::ProductQuery,
            params::OrderListQuery,
            products::ProductList,
            Meta,
            ApiResponse<Product>,
            ApiResponse<products::ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<PaymentLinkResponse>,
            ApiResponse<PaymentConfirmation>,
            ApiResponse<SellerReport>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Product endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Checkout, order history and cancellation"),
        (name = "Payment", description = "Provider confirmation callback"),
        (name = "Sellers", description = "Seller reports, transactions and fulfilment"),
        (name = "Auth", description = "Authentication endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
