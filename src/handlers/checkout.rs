use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::models::Plan;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub plan: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub checkout_url: String,
    pub session_id: String,
}

/// Delegate checkout to the billing provider's hosted payment page.
/// The license itself is only issued later, by the verified completion event.
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let plan: Plan = request
        .plan
        .parse()
        .map_err(|_| AppError::BadRequest("Unrecognized plan".into()))?;

    let price_id = match plan {
        Plan::Monthly => &state.config.monthly_price_id,
        Plan::Annual => &state.config.annual_price_id,
        Plan::Lifetime => &state.config.lifetime_price_id,
    };
    if price_id.is_empty() {
        return Err(AppError::BadRequest(format!(
            "No price configured for plan '{}'",
            plan.as_ref()
        )));
    }

    let session = state
        .billing
        .create_checkout_session(&state.config, plan, price_id)
        .await?;

    Ok(Json(CheckoutResponse {
        checkout_url: session.url,
        session_id: session.id,
    }))
}
