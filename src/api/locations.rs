use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::middleware::session::AppState;
use crate::error::{AppError, Result};
use crate::models::location::Location;
use crate::services::slot_availability;

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub date: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct SlotsResponse {
    pub location_id: Uuid,
    pub date: NaiveDate,
    pub slots: Vec<String>,
}

async fn list_locations(State(state): State<AppState>) -> Result<Json<Vec<Location>>> {
    let locations = Location::list_active(&state.pool).await?;

    Ok(Json(locations))
}

async fn get_location(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
) -> Result<Json<Location>> {
    let location = Location::find_by_id(&state.pool, location_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Location not found".to_string()))?;

    Ok(Json(location))
}

async fn list_slots(
    State(state): State<AppState>,
    Path(location_id): Path<Uuid>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<SlotsResponse>> {
    let slots = slot_availability::available_slots(
        &state.pool,
        &state.config.operating_window(),
        location_id,
        query.date,
        state.clock.now(),
    )
    .await?;

    Ok(Json(SlotsResponse {
        location_id,
        date: query.date,
        slots,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/locations", get(list_locations))
        .route("/api/locations/:id", get(get_location))
        .route("/api/locations/:id/slots", get(list_slots))
}
