use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use uuid::Uuid;

use crate::{
    config::GatewayConfig,
    error::{AppError, AppResult},
};

use super::{PaymentGateway, PaymentLink};

type HmacSha256 = Hmac<Sha256>;

/// Link-based provider: creating a payment returns a short URL plus an opaque
/// link id, and the return callback may carry an HMAC signature.
pub struct RazorpayGateway {
    http: Client,
    key_id: String,
    key_secret: String,
    base_url: String,
    callback_base_url: String,
}

impl RazorpayGateway {
    pub fn new(cfg: &GatewayConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            key_id: cfg.razorpay_key_id.clone(),
            key_secret: cfg.razorpay_key_secret.clone(),
            base_url: cfg.razorpay_base_url.clone(),
            callback_base_url: cfg.callback_base_url.clone(),
        })
    }

    /// HMAC-SHA256 over `"{payment_link_id}|{payment_id}"`, keyed with the
    /// API secret, hex-encoded.
    fn signature_matches(&self, payment_link_id: &str, payment_id: &str, signature: &str) -> bool {
        let Ok(mut mac) = HmacSha256::new_from_slice(self.key_secret.as_bytes()) else {
            return false;
        };
        mac.update(payment_link_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        expected == signature
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
impl PaymentGateway for RazorpayGateway {
    async fn create_link(
        &self,
        buyer_email: &str,
        amount: i64,
        payment_order_id: Uuid,
    ) -> AppResult<PaymentLink> {
        let body = serde_json::json!({
            "amount": amount,
            "currency": "INR",
            "reference_id": payment_order_id,
            "customer": { "email": buyer_email },
            "callback_url": format!("{}/api/payment", self.callback_base_url),
            "callback_method": "get",
        });

        let resp = self
            .http
            .post(format!("{}/v1/payment_links", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(gateway_err)?;

        if !resp.status().is_success() {
            return Err(AppError::PaymentGateway(format!(
                "payment link request failed with {}",
                resp.status()
            )));
        }

        let value: serde_json::Value = resp.json().await.map_err(gateway_err)?;
        let link_id = value["id"]
            .as_str()
            .ok_or_else(|| AppError::PaymentGateway("missing link id in response".into()))?
            .to_string();
        let url = value["short_url"]
            .as_str()
            .ok_or_else(|| AppError::PaymentGateway("missing short_url in response".into()))?
            .to_string();

        Ok(PaymentLink { url, link_id })
    }

    async fn verify(
        &self,
        payment_id: &str,
        payment_link_id: &str,
        signature: Option<&str>,
    ) -> AppResult<bool> {
        if let Some(sig) = signature {
            if !self.signature_matches(payment_link_id, payment_id, sig) {
                return Ok(false);
            }
        }

        let resp = self
            .http
            .get(format!("{}/v1/payments/{payment_id}", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(gateway_err)?;

        if !resp.status().is_success() {
            return Err(AppError::PaymentGateway(format!(
                "payment lookup failed with {}",
                resp.status()
            )));
        }

        let value: serde_json::Value = resp.json().await.map_err(gateway_err)?;
        Ok(value["status"].as_str() == Some("captured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(&GatewayConfig {
            razorpay_key_id: "rzp_test_key".into(),
            razorpay_key_secret: "topsecret".into(),
            razorpay_base_url: "https://api.razorpay.com".into(),
            stripe_secret_key: String::new(),
            stripe_base_url: "https://api.stripe.com".into(),
            callback_base_url: "http://localhost:3000".into(),
            timeout_secs: 1,
        })
        .expect("client builds")
    }

    fn sign(secret: &str, link_id: &str, payment_id: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac");
        mac.update(link_id.as_bytes());
        mac.update(b"|");
        mac.update(payment_id.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_matching_signature() {
        let gw = gateway();
        let sig = sign("topsecret", "plink_1", "pay_1");
        assert!(gw.signature_matches("plink_1", "pay_1", &sig));
    }

    #[test]
    fn rejects_signature_for_other_payment() {
        let gw = gateway();
        let sig = sign("topsecret", "plink_1", "pay_1");
        assert!(!gw.signature_matches("plink_1", "pay_2", &sig));
    }

    #[test]
    fn rejects_signature_with_wrong_secret() {
        let gw = gateway();
        let sig = sign("othersecret", "plink_1", "pay_1");
        assert!(!gw.signature_matches("plink_1", "pay_1", &sig));
    }
}
