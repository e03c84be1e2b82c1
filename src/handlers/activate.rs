use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::AppState;
use crate::engine::{self, ActivationOutcome};
use crate::error::{AppError, Result};
use crate::models::Plan;

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub license_key: String,
    pub machine_id: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub valid: bool,
    pub plan: Plan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    pub max_machines: i64,
    pub current_machines: i64,
    pub already_activated: bool,
    pub message: String,
}

pub async fn activate_license(
    State(state): State<AppState>,
    Json(request): Json<ActivateRequest>,
) -> Result<Response> {
    if request.license_key.is_empty() || request.machine_id.is_empty() {
        return Err(AppError::BadRequest(
            "license_key and machine_id are required".into(),
        ));
    }

    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();

    match engine::activate(
        &mut conn,
        &state.config,
        &request.license_key,
        &request.machine_id,
        now,
    )? {
        ActivationOutcome::Activated {
            license,
            already_activated,
            current_machines,
            max_machines,
        } => {
            let message = if already_activated {
                "Machine already activated".to_string()
            } else {
                format!("Machine activated ({}/{})", current_machines, max_machines)
            };
            Ok(Json(ActivateResponse {
                valid: true,
                plan: license.plan,
                expires: license.expires_at,
                max_machines,
                current_machines,
                already_activated,
                message,
            })
            .into_response())
        }
        ActivationOutcome::NotFound => Err(AppError::NotFound("License not found".into())),
        ActivationOutcome::Inactive { status } => Err(AppError::Forbidden(format!(
            "License is not active (status: {})",
            status.as_ref()
        ))),
        ActivationOutcome::Expired => Err(AppError::Forbidden("License has expired".into())),
        // Counts as structured fields so clients can branch without parsing
        // the message
        ActivationOutcome::LimitReached { current, max } => Ok((
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": format!("Machine limit reached ({}/{})", current, max),
                "current_machines": current,
                "max_machines": max,
            })),
        )
            .into_response()),
    }
}
