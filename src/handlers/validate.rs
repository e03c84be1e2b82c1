use axum::{Json, extract::State};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::AppState;
use crate::engine::{self, ValidationOutcome};
use crate::error::Result;
use crate::models::{LicenseStatus, Plan};

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub license_key: String,
    pub machine_id: String,
}

/// Always returned with 200 - business-logic failures are payload, not
/// status codes, so automated clients branch on `reason`.
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LicenseStatus>,
}

pub async fn validate_license(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<ValidateResponse>> {
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();

    match engine::validate(
        &conn,
        &state.config,
        &request.license_key,
        &request.machine_id,
        now,
    )? {
        ValidationOutcome::Valid { license } => Ok(Json(ValidateResponse {
            valid: true,
            reason: None,
            plan: Some(license.plan),
            expires: license.expires_at,
            status: Some(license.status),
        })),
        ValidationOutcome::Invalid { reason } => Ok(Json(ValidateResponse {
            valid: false,
            reason: Some(reason.as_str()),
            plan: None,
            expires: None,
            status: None,
        })),
    }
}
