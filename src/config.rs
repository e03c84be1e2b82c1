use std::env;

use crate::models::Plan;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    /// Shared secret for billing webhook signature verification
    pub billing_webhook_secret: String,
    /// API key for outbound calls to the billing provider
    pub billing_api_key: String,
    pub billing_api_base: String,
    /// Billing price identifiers, used to derive the plan from checkout events
    pub monthly_price_id: String,
    pub annual_price_id: String,
    pub lifetime_price_id: String,
    /// Days past expiry during which validation still succeeds
    pub grace_period_days: i64,
    pub license_key_prefix: String,
    /// Per-plan machine caps
    pub monthly_machine_limit: i64,
    pub annual_machine_limit: i64,
    pub lifetime_machine_limit: i64,
    /// Where to deliver freshly issued keys (None = log only)
    pub notify_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let grace_period_days: i64 = env::var("GRACE_PERIOD_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let machine_limit = |var: &str, default: i64| -> i64 {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "axctl_license.db".to_string()),
            base_url,
            billing_webhook_secret: env::var("BILLING_WEBHOOK_SECRET").unwrap_or_default(),
            billing_api_key: env::var("BILLING_API_KEY").unwrap_or_default(),
            billing_api_base: env::var("BILLING_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            monthly_price_id: env::var("MONTHLY_PRICE_ID").unwrap_or_default(),
            annual_price_id: env::var("ANNUAL_PRICE_ID").unwrap_or_default(),
            lifetime_price_id: env::var("LIFETIME_PRICE_ID").unwrap_or_default(),
            grace_period_days,
            license_key_prefix: env::var("LICENSE_KEY_PREFIX")
                .unwrap_or_else(|_| "AXCTL-PRO".to_string()),
            monthly_machine_limit: machine_limit("MONTHLY_MACHINE_LIMIT", 1),
            annual_machine_limit: machine_limit("ANNUAL_MACHINE_LIMIT", 3),
            lifetime_machine_limit: machine_limit("LIFETIME_MACHINE_LIMIT", 5),
            notify_url: env::var("NOTIFY_URL").ok(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Machine cap for a plan. Total over the plan enum; config overrides
    /// the built-in defaults but cannot exempt a plan.
    pub fn machine_limit(&self, plan: Plan) -> i64 {
        match plan {
            Plan::Monthly => self.monthly_machine_limit,
            Plan::Annual => self.annual_machine_limit,
            Plan::Lifetime => self.lifetime_machine_limit,
        }
    }

    /// Map a billing price id to a plan, for checkout events that carry
    /// a subscription price rather than an explicit plan.
    pub fn plan_for_price(&self, price_id: &str) -> Option<Plan> {
        if price_id == self.monthly_price_id {
            Some(Plan::Monthly)
        } else if price_id == self.annual_price_id {
            Some(Plan::Annual)
        } else if price_id == self.lifetime_price_id {
            Some(Plan::Lifetime)
        } else {
            None
        }
    }
}
