use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use uuid::Uuid;

use crate::api::middleware::{auth::get_authenticated_user, session::AppState};
use crate::error::{AppError, Result};
use crate::models::{
    access_log::AccessLog,
    appointment::{Appointment, AppointmentStatus},
    location::Location,
    payment::{Payment, PaymentStatus},
};
use crate::services::access_credential;
use crate::services::booking::{self, BookSlotRequest};
use crate::services::notifications::NotificationKind;

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub pet_id: Uuid,
    pub location_id: Uuid,
    pub date: NaiveDate,
    pub start_time: String,
}

#[derive(Debug, Serialize)]
pub struct AppointmentResponse {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub payment: Option<Payment>,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QrFormat {
    #[default]
    Svg,
    Png,
}

#[derive(Debug, Deserialize)]
pub struct QrQuery {
    #[serde(default)]
    pub format: QrFormat,
}

fn appointment_not_found() -> AppError {
    AppError::NotFound("Appointment not found".to_string())
}

/// Loads an appointment, hiding those of other users
async fn find_owned(state: &AppState, user_id: Uuid, appointment_id: Uuid) -> Result<Appointment> {
    Appointment::find_by_id(&state.pool, appointment_id)
        .await?
        .filter(|a| a.user_id == user_id)
        .ok_or_else(appointment_not_found)
}

async fn list_appointments(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<Appointment>>> {
    let auth = get_authenticated_user(&session).await?;

    let appointments = Appointment::list_by_user(&state.pool, auth.user_id).await?;

    Ok(Json(appointments))
}

async fn create_appointment(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>)> {
    let auth = get_authenticated_user(&session).await?;

    // Price is always taken from the location, never from the client
    let location = Location::find_by_id(&state.pool, request.location_id)
        .await?
        .filter(|l| l.is_active)
        .ok_or_else(|| AppError::NotFound("Location not found".to_string()))?;

    let appointment = booking::book_slot(
        &state.pool,
        &state.config.operating_window(),
        state.clock.now(),
        BookSlotRequest {
            user_id: auth.user_id,
            pet_id: request.pet_id,
            location_id: request.location_id,
            date: request.date,
            start_time: request.start_time,
            total_amount_cents: location.price_cents,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn get_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    session: Session,
) -> Result<Json<AppointmentResponse>> {
    let auth = get_authenticated_user(&session).await?;

    let appointment = find_owned(&state, auth.user_id, appointment_id).await?;
    let payment = Payment::find_by_appointment_id(&state.pool, appointment.id).await?;

    Ok(Json(AppointmentResponse {
        appointment,
        payment,
    }))
}

async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    session: Session,
) -> Result<Json<Appointment>> {
    let auth = get_authenticated_user(&session).await?;

    let appointment = booking::cancel_appointment(&state.pool, auth.user_id, appointment_id).await?;

    state
        .payments
        .notify(appointment.id, NotificationKind::Cancellation)
        .await;

    Ok(Json(appointment))
}

/// Serves the access credential of a paid appointment as a QR image
async fn appointment_qr(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Query(query): Query<QrQuery>,
    session: Session,
) -> Result<Response> {
    let auth = get_authenticated_user(&session).await?;

    let appointment = find_owned(&state, auth.user_id, appointment_id).await?;
    let paid = Payment::find_by_appointment_id(&state.pool, appointment.id)
        .await?
        .map(|p| p.status == PaymentStatus::Approved)
        .unwrap_or(false);

    let token = match (&appointment.status, paid, &appointment.access_token) {
        (AppointmentStatus::Confirmed, true, Some(token)) => token,
        _ => {
            return Err(AppError::Conflict(
                "Access QR code is available once the appointment is paid".to_string(),
            ))
        }
    };

    let response = match query.format {
        QrFormat::Svg => {
            let svg = access_credential::generate_qr_svg(token)?;
            ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response()
        }
        QrFormat::Png => {
            let png = access_credential::generate_qr_png(token)?;
            ([(header::CONTENT_TYPE, "image/png")], png).into_response()
        }
    };

    Ok(response)
}

async fn appointment_access_logs(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    session: Session,
) -> Result<Json<Vec<AccessLog>>> {
    let auth = get_authenticated_user(&session).await?;

    let appointment = find_owned(&state, auth.user_id, appointment_id).await?;
    let logs = AccessLog::list_by_appointment(&state.pool, appointment.id).await?;

    Ok(Json(logs))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/appointments",
            get(list_appointments).post(create_appointment),
        )
        .route("/api/appointments/:id", get(get_appointment))
        .route("/api/appointments/:id/cancel", post(cancel_appointment))
        .route("/api/appointments/:id/qr", get(appointment_qr))
        .route(
            "/api/appointments/:id/access-logs",
            get(appointment_access_logs),
        )
}
