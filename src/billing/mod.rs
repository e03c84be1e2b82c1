//! Billing provider integration: outbound checkout session creation and
//! inbound webhook event types with signature verification.
//!
//! The provider is treated as a black box that hosts payment pages and emits
//! signed events; payment processing itself never touches this service.

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::Plan;

type HmacSha256 = Hmac<Sha256>;

/// Reject signed payloads older than this (replay window).
const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

#[derive(Clone)]
pub struct BillingClient {
    client: Client,
    api_key: String,
    api_base: String,
    webhook_secret: String,
}

impl BillingClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: config.billing_api_key.clone(),
            api_base: config.billing_api_base.clone(),
            webhook_secret: config.billing_webhook_secret.clone(),
        }
    }

    /// Create a hosted checkout session for the given plan.
    ///
    /// The plan is recorded in the session metadata so the completion event
    /// can be mapped back without guessing; one-time lifetime purchases use
    /// `mode=payment`, recurring plans `mode=subscription`.
    pub async fn create_checkout_session(
        &self,
        config: &Config,
        plan: Plan,
        price_id: &str,
    ) -> Result<CheckoutSession> {
        let mode = if plan.is_recurring() {
            "subscription"
        } else {
            "payment"
        };
        let success_url = format!("{}/checkout/success", config.base_url);
        let cancel_url = format!("{}/checkout/cancel", config.base_url);

        let params = [
            ("mode", mode),
            ("line_items[0][price]", price_id),
            ("line_items[0][quantity]", "1"),
            ("metadata[plan]", plan.as_ref()),
            ("success_url", success_url.as_str()),
            ("cancel_url", cancel_url.as_str()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.api_key)
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Internal(format!(
                "billing API error: {}",
                error_text
            )));
        }

        response.json().await.map_err(Into::into)
    }

    /// Verify a webhook signature header of the form `t=<unix ts>,v1=<hex hmac>`
    /// where the MAC is HMAC-SHA256 over `"{t}.{raw body}"`.
    ///
    /// Comparison is constant-time; the timestamp bounds the replay window.
    /// All failure modes collapse to `SignatureInvalid` so the response body
    /// leaks nothing about why verification failed.
    pub fn verify_webhook_signature(&self, payload: &[u8], header: &str, now: i64) -> Result<()> {
        let mut timestamp: Option<i64> = None;
        let mut signature: Option<Vec<u8>> = None;

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", ts)) => timestamp = ts.parse().ok(),
                Some(("v1", sig)) => signature = hex::decode(sig).ok(),
                _ => {}
            }
        }

        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(AppError::SignatureInvalid);
        };

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECONDS {
            return Err(AppError::SignatureInvalid);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::SignatureInvalid)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = mac.finalize().into_bytes();

        if expected.ct_eq(&signature[..]).into() {
            Ok(())
        } else {
            Err(AppError::SignatureInvalid)
        }
    }
}

/// Build a signature header for a payload. Test helper and reference for the
/// signing side of `verify_webhook_signature`.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

// ============ Wire types ============

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionCompleted {
    pub customer: String,
    /// Present when mode == subscription
    pub subscription: Option<String>,
    /// `payment` for one-time purchases, `subscription` for recurring
    pub mode: String,
    #[serde(default)]
    pub metadata: CheckoutMetadata,
    /// Price id of the purchased line item, when the provider includes it
    #[serde(default)]
    pub price_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckoutMetadata {
    pub plan: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceEvent {
    pub subscription: Option<String>,
    #[serde(default)]
    pub billing_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionEvent {
    pub id: String,
}

impl CheckoutSessionCompleted {
    /// Derive the plan for a completed checkout.
    ///
    /// One-time payments are always lifetime. Subscriptions are resolved from
    /// the price id against the configured plan prices, falling back to the
    /// plan recorded in the session metadata at checkout creation.
    pub fn derive_plan(&self, config: &Config) -> Option<Plan> {
        if self.mode == "payment" {
            return Some(Plan::Lifetime);
        }
        if let Some(price_id) = &self.price_id
            && let Some(plan) = config.plan_for_price(price_id)
        {
            return Some(plan);
        }
        self.metadata.plan.as_deref().and_then(|p| p.parse().ok())
    }
}
