use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use crate::{
    config::GatewayConfig,
    error::{AppError, AppResult},
};

use super::{PaymentGateway, PaymentLink};

/// Session-based provider: creating a payment returns a hosted checkout URL.
/// The session id doubles as the external reference for callback resolution.
pub struct StripeGateway {
    http: Client,
    secret_key: String,
    base_url: String,
    callback_base_url: String,
}

impl StripeGateway {
    pub fn new(cfg: &GatewayConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            secret_key: cfg.stripe_secret_key.clone(),
            base_url: cfg.stripe_base_url.clone(),
            callback_base_url: cfg.callback_base_url.clone(),
        })
    }
}

fn gateway_err(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::PaymentGateway("provider call timed out".into())
    } else {
        AppError::PaymentGateway(err.to_string())
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_link(
        &self,
        buyer_email: &str,
        amount: i64,
        payment_order_id: Uuid,
    ) -> AppResult<PaymentLink> {
        let reference = payment_order_id.to_string();
        let amount_str = amount.to_string();
        let success_url = format!(
            "{}/api/payment/{{CHECKOUT_SESSION_ID}}?payment_link_id={{CHECKOUT_SESSION_ID}}",
            self.callback_base_url
        );
        let cancel_url = format!("{}/payment/cancel", self.callback_base_url);

        let params: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("client_reference_id", reference.as_str()),
            ("customer_email", buyer_email),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", "inr"),
            ("line_items[0][price_data][unit_amount]", amount_str.as_str()),
            (
                "line_items[0][price_data][product_data][name]",
                "Marketplace order",
            ),
        ];

        let resp = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(gateway_err)?;

        if !resp.status().is_success() {
            return Err(AppError::PaymentGateway(format!(
                "checkout session request failed with {}",
                resp.status()
            )));
        }

        let value: serde_json::Value = resp.json().await.map_err(gateway_err)?;
        let link_id = value["id"]
            .as_str()
            .ok_or_else(|| AppError::PaymentGateway("missing session id in response".into()))?
            .to_string();
        let url = value["url"]
            .as_str()
            .ok_or_else(|| AppError::PaymentGateway("missing session url in response".into()))?
            .to_string();

        Ok(PaymentLink { url, link_id })
    }

    async fn verify(
        &self,
        _payment_id: &str,
        payment_link_id: &str,
        _signature: Option<&str>,
    ) -> AppResult<bool> {
        let resp = self
            .http
            .get(format!(
                "{}/v1/checkout/sessions/{payment_link_id}",
                self.base_url
            ))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(gateway_err)?;

        if !resp.status().is_success() {
            return Err(AppError::PaymentGateway(format!(
                "session lookup failed with {}",
                resp.status()
            )));
        }

        let value: serde_json::Value = resp.json().await.map_err(gateway_err)?;
        Ok(value["payment_status"].as_str() == Some("paid"))
    }
}
