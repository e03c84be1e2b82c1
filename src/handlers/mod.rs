mod activate;
mod checkout;
mod validate;
mod webhook;

pub use activate::*;
pub use checkout::*;
pub use validate::*;
pub use webhook::*;

use axum::{
    Json, Router,
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/activate", post(activate_license))
        .route("/validate", post(validate_license))
        .route("/create-checkout", post(create_checkout))
        .route("/webhook/billing", post(handle_billing_webhook))
}
