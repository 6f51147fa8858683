use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::error::Result;
use crate::models::access_log::{AccessLog, CreateAccessLogData};
use crate::services::access_validator::{self, AccessDecision};

#[derive(Debug, Deserialize)]
pub struct ValidateAccessRequest {
    /// Raw content of the scanned QR code
    pub credential: String,
    pub location_id: Uuid,
}

/// Called by the wash unit's scanner. Every attempt is recorded.
async fn validate_access(
    State(state): State<AppState>,
    Json(request): Json<ValidateAccessRequest>,
) -> Result<Json<AccessDecision>> {
    let (decision, appointment_id) = access_validator::validate_access(
        &state.pool,
        &state.signing_key,
        &request.credential,
        request.location_id,
        state.clock.now(),
    )
    .await?;

    AccessLog::create(
        &state.pool,
        CreateAccessLogData {
            appointment_id,
            location_id: request.location_id,
            granted: decision.valid,
            reason: decision.reason.as_str().to_string(),
            message: decision.message.clone(),
        },
    )
    .await?;

    if let (true, Some(appointment_id)) = (decision.valid, appointment_id) {
        let entries = AccessLog::count_granted_by_appointment(&state.pool, appointment_id).await?;
        tracing::info!(appointment_id = %appointment_id, entries, "Access granted");
    }

    Ok(Json(decision))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/access/validate", post(validate_access))
}
