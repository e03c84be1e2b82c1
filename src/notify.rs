//! Fire-and-forget delivery of freshly issued license keys.
//!
//! The actual customer-facing delivery (email, etc.) lives behind an external
//! endpoint; from the engine's perspective this is a side effect that must
//! never block or fail license issuance.

use reqwest::Client;
use serde_json::json;

use crate::models::License;

#[derive(Clone)]
pub struct Notifier {
    client: Client,
    notify_url: Option<String>,
}

impl Notifier {
    pub fn new(notify_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            notify_url,
        }
    }

    /// Spawn delivery of the key to the customer. Errors are logged and
    /// dropped; the license is already durably issued at this point.
    pub fn dispatch_key(&self, license: &License) {
        let Some(url) = self.notify_url.clone() else {
            tracing::info!(
                "no NOTIFY_URL configured; issued key for customer {} not dispatched",
                license.billing_customer_id
            );
            return;
        };

        let client = self.client.clone();
        let body = json!({
            "customer_id": license.billing_customer_id,
            "license_key": license.license_key,
            "plan": license.plan,
        });
        let customer = license.billing_customer_id.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!("dispatched license key to customer {}", customer);
                }
                Ok(resp) => {
                    tracing::error!(
                        "key notification for {} returned {}",
                        customer,
                        resp.status()
                    );
                }
                Err(e) => {
                    tracing::error!("key notification for {} failed: {}", customer, e);
                }
            }
        });
    }
}
