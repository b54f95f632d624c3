pub mod addresses;
pub mod audit_logs;
pub mod cart_items;
pub mod order_items;
pub mod orders;
pub mod payment_orders;
pub mod products;
pub mod seller_reports;
pub mod transactions;
pub mod users;

pub use addresses::Entity as Addresses;
pub use audit_logs::Entity as AuditLogs;
pub use cart_items::Entity as CartItems;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use payment_orders::Entity as PaymentOrders;
pub use products::Entity as Products;
pub use seller_reports::Entity as SellerReports;
pub use transactions::Entity as Transactions;
pub use users::Entity as Users;
