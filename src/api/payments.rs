use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::api::middleware::{auth::get_authenticated_user, session::AppState};
use crate::error::Result;
use crate::models::payment::{Payment, PaymentMethod};

#[derive(Debug, Deserialize)]
pub struct StartPaymentRequest {
    pub method: PaymentMethod,
}

async fn start_payment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    session: Session,
    Json(request): Json<StartPaymentRequest>,
) -> Result<(StatusCode, Json<Payment>)> {
    let auth = get_authenticated_user(&session).await?;

    let payment = state
        .payments
        .start_payment(auth.user_id, appointment_id, request.method)
        .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    session: Session,
) -> Result<Json<Payment>> {
    let auth = get_authenticated_user(&session).await?;

    let payment = state.payments.get_payment(auth.user_id, payment_id).await?;

    Ok(Json(payment))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/appointments/:id/payments", post(start_payment))
        .route("/api/payments/:id", get(get_payment))
}
