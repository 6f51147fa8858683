use chrono::{Duration, NaiveDate, NaiveDateTime};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::models::{
    appointment::{Appointment, CreateAppointmentData},
    location::Location,
    pet::Pet,
};
use crate::services::slot_availability::{self, OperatingWindow, SLOT_MINUTES};

#[derive(thiserror::Error, Debug)]
pub enum BookingError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Pet not found")]
    PetNotFound,

    #[error("Location not found")]
    LocationNotFound,

    #[error("Invalid start time '{0}': expected a HH:MM slot inside opening hours")]
    InvalidStartTime(String),

    #[error("Cannot book a slot in the past")]
    SlotInPast,

    #[error("Total amount must be positive")]
    InvalidAmount,

    #[error("This time slot is no longer available, please choose another one")]
    SlotUnavailable,

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Appointment is already cancelled")]
    AlreadyCancelled,
}

/// Request to reserve a slot
#[derive(Debug, Clone)]
pub struct BookSlotRequest {
    pub user_id: Uuid,
    pub pet_id: Uuid,
    pub location_id: Uuid,
    pub date: NaiveDate,
    pub start_time: String,
    pub total_amount_cents: i64,
}

/// Reserves a slot by creating a PENDING appointment.
///
/// This function:
/// 1. Checks pet ownership and that the location is active
/// 2. Validates the start time against the slot grid and the current time
/// 3. Inside one transaction, locks the location row, re-checks overlaps
///    against live appointments and inserts
///
/// Two concurrent requests for the same slot serialize on the location lock;
/// the loser sees the winner's row and gets [`BookingError::SlotUnavailable`].
/// The partial unique index on `(location_id, start_time)` backs this up.
#[tracing::instrument(skip(pool, window, request), fields(location_id = %request.location_id, date = %request.date))]
pub async fn book_slot(
    pool: &PgPool,
    window: &OperatingWindow,
    now: NaiveDateTime,
    request: BookSlotRequest,
) -> Result<Appointment, BookingError> {
    if request.total_amount_cents <= 0 {
        return Err(BookingError::InvalidAmount);
    }

    Pet::find_for_user(pool, request.pet_id, request.user_id)
        .await?
        .ok_or(BookingError::PetNotFound)?;

    let location = Location::find_by_id(pool, request.location_id)
        .await?
        .ok_or(BookingError::LocationNotFound)?;
    if !location.is_active {
        return Err(BookingError::LocationNotFound);
    }

    let start_time = slot_availability::parse_slot_time(&request.start_time)
        .filter(|t| window.is_slot_start(*t))
        .ok_or_else(|| BookingError::InvalidStartTime(request.start_time.clone()))?;

    let start = request.date.and_time(start_time);
    if start <= now {
        return Err(BookingError::SlotInPast);
    }

    let data = CreateAppointmentData {
        user_id: request.user_id,
        pet_id: request.pet_id,
        location_id: request.location_id,
        appointment_date: request.date,
        start_time: start,
        total_amount_cents: request.total_amount_cents,
    };

    let mut tx = pool.begin().await?;

    let locked = Location::lock_for_booking(&mut *tx, request.location_id)
        .await?
        .ok_or(BookingError::LocationNotFound)?;
    if !locked.is_active {
        return Err(BookingError::LocationNotFound);
    }

    let live =
        Appointment::list_live_for_location_date(&mut *tx, request.location_id, request.date)
            .await?;
    let end = start + Duration::minutes(SLOT_MINUTES);
    if live
        .iter()
        .any(|a| slot_availability::overlaps(start, end, a.start_time, a.end_time))
    {
        tracing::info!(start = %start, "Slot taken between listing and booking");
        return Err(BookingError::SlotUnavailable);
    }

    let appointment = match Appointment::insert(&mut *tx, &data).await {
        Ok(appointment) => appointment,
        Err(e) if db::is_unique_violation(&e) => return Err(BookingError::SlotUnavailable),
        Err(e) => return Err(e.into()),
    };

    match tx.commit().await {
        Ok(()) => {}
        Err(e) if db::is_unique_violation(&e) => return Err(BookingError::SlotUnavailable),
        Err(e) => return Err(e.into()),
    }

    tracing::info!(
        appointment_id = %appointment.id,
        user_id = %appointment.user_id,
        start = %appointment.start_time,
        "Appointment reserved"
    );

    Ok(appointment)
}

/// Cancels an appointment owned by `user_id`, freeing its slot.
///
/// Appointments of other users are reported as not found.
#[tracing::instrument(skip(pool))]
pub async fn cancel_appointment(
    pool: &PgPool,
    user_id: Uuid,
    appointment_id: Uuid,
) -> Result<Appointment, BookingError> {
    let appointment = Appointment::find_by_id(pool, appointment_id)
        .await?
        .filter(|a| a.user_id == user_id)
        .ok_or(BookingError::AppointmentNotFound)?;

    if appointment.is_cancelled() {
        return Err(BookingError::AlreadyCancelled);
    }

    let cancelled = Appointment::cancel(pool, appointment_id)
        .await?
        .ok_or(BookingError::AlreadyCancelled)?;

    tracing::info!(appointment_id = %appointment_id, "Appointment cancelled");

    Ok(cancelled)
}
