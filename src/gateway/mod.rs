use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{config::GatewayConfig, domain::PaymentMethod, error::AppResult};

pub mod razorpay;
pub mod stripe;

pub use razorpay::RazorpayGateway;
pub use stripe::StripeGateway;

/// What a provider hands back after a link/session is created. `link_id` is
/// the external reference used to resolve the confirmation callback later.
#[derive(Debug, Clone)]
pub struct PaymentLink {
    pub url: String,
    pub link_id: String,
}

/// Uniform contract over the two payment providers. Implementations must not
/// retry failed calls; a transport failure or timeout surfaces as
/// `AppError::PaymentGateway` and the caller re-initiates checkout.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Request a hosted payment page for the aggregated amount.
    async fn create_link(
        &self,
        buyer_email: &str,
        amount: i64,
        payment_order_id: Uuid,
    ) -> AppResult<PaymentLink>;

    /// Confirm with the provider that the payment actually succeeded.
    /// `signature` is forwarded from the callback when the provider sends one.
    async fn verify(
        &self,
        payment_id: &str,
        payment_link_id: &str,
        signature: Option<&str>,
    ) -> AppResult<bool>;
}

/// Provider registry, selected per-request by the payment-method enum.
pub struct Gateways {
    razorpay: Arc<dyn PaymentGateway>,
    stripe: Arc<dyn PaymentGateway>,
}

impl Gateways {
    pub fn new(razorpay: Arc<dyn PaymentGateway>, stripe: Arc<dyn PaymentGateway>) -> Self {
        Self { razorpay, stripe }
    }

    pub fn from_config(cfg: &GatewayConfig) -> anyhow::Result<Self> {
        Ok(Self {
            razorpay: Arc::new(RazorpayGateway::new(cfg)?),
            stripe: Arc::new(StripeGateway::new(cfg)?),
        })
    }

    pub fn for_method(&self, method: PaymentMethod) -> &dyn PaymentGateway {
        match method {
            PaymentMethod::Razorpay => self.razorpay.as_ref(),
            PaymentMethod::Stripe => self.stripe.as_ref(),
        }
    }
}
