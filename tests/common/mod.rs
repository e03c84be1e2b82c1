//! Shared test fixtures: temp-file database pools and a ready-to-use AppState.

#![allow(dead_code)]

use tempfile::TempDir;

use axctl_license::billing::BillingClient;
use axctl_license::config::Config;
use axctl_license::db::{self, AppState, DbPool};
use axctl_license::notify::Notifier;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

pub fn test_config(database_path: &str) -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_path: database_path.to_string(),
        base_url: "http://localhost".into(),
        billing_webhook_secret: TEST_WEBHOOK_SECRET.into(),
        billing_api_key: "sk_test".into(),
        billing_api_base: "http://localhost:9".into(),
        monthly_price_id: "price_monthly".into(),
        annual_price_id: "price_annual".into(),
        lifetime_price_id: "price_lifetime".into(),
        grace_period_days: 30,
        license_key_prefix: "AXCTL-PRO".into(),
        monthly_machine_limit: 1,
        annual_machine_limit: 3,
        lifetime_machine_limit: 5,
        notify_url: None,
    }
}

/// Pool backed by a temp file (in-memory SQLite is per-connection and cannot
/// be shared across a pool). Keep the TempDir alive for the test's duration.
pub fn test_pool() -> (DbPool, TempDir, Config) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("test.db");
    let path = path.to_str().expect("utf-8 path");
    let pool = db::create_pool(path).expect("create pool");
    {
        let conn = pool.get().expect("get connection");
        db::init_schema(&conn).expect("init schema");
    }
    let config = test_config(path);
    (pool, dir, config)
}

pub fn create_test_app_state() -> (AppState, TempDir) {
    let (pool, dir, config) = test_pool();
    let billing = BillingClient::new(&config);
    let notifier = Notifier::new(None);
    (
        AppState {
            db: pool,
            config,
            billing,
            notifier,
        },
        dir,
    )
}

pub const DAY: i64 = 86400;
