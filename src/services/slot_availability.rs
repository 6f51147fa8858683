use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{appointment::Appointment, location::Location};

/// Length of every bookable slot
pub const SLOT_MINUTES: i64 = 30;

#[derive(thiserror::Error, Debug)]
pub enum SlotError {
    #[error("Date must not be in the past")]
    InvalidDate,

    #[error("Location not found")]
    LocationNotFound,

    #[error("Location is not accepting bookings")]
    LocationUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Daily bookable window `[opening, closing)` shared by all locations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingWindow {
    pub opening: NaiveTime,
    pub closing: NaiveTime,
}

impl OperatingWindow {
    pub fn new(opening: NaiveTime, closing: NaiveTime) -> Self {
        Self { opening, closing }
    }

    /// Every slot start that fits entirely inside the window, ascending.
    pub fn slot_starts(&self) -> Vec<NaiveTime> {
        let open = minutes_from_midnight(self.opening);
        let close = minutes_from_midnight(self.closing);

        let mut starts = Vec::new();
        let mut minute = open;
        while minute + SLOT_MINUTES <= close {
            if let Some(time) = NaiveTime::from_hms_opt((minute / 60) as u32, (minute % 60) as u32, 0)
            {
                starts.push(time);
            }
            minute += SLOT_MINUTES;
        }
        starts
    }

    /// Whether `start` is one of the slot starts of this window
    pub fn is_slot_start(&self, start: NaiveTime) -> bool {
        self.slot_starts().contains(&start)
    }
}

fn minutes_from_midnight(time: NaiveTime) -> i64 {
    (time.num_seconds_from_midnight() / 60) as i64
}

/// Half-open interval overlap: `[a_start, a_end)` and `[b_start, b_end)`
pub fn overlaps(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && a_end > b_start
}

/// Parses a "HH:MM" slot label
pub fn parse_slot_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

pub fn format_slot_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Computes the free slots of `date`.
///
/// `booked` holds the `[start, end)` intervals of every non-cancelled
/// appointment of the location on that day. When `date` is the current day,
/// slots that do not start strictly after `now` are dropped too.
pub fn compute_available_slots(
    window: &OperatingWindow,
    date: NaiveDate,
    booked: &[(NaiveDateTime, NaiveDateTime)],
    now: NaiveDateTime,
) -> Vec<String> {
    let is_today = date == now.date();

    window
        .slot_starts()
        .into_iter()
        .filter(|time| {
            let start = date.and_time(*time);
            let end = start + Duration::minutes(SLOT_MINUTES);

            if booked
                .iter()
                .any(|(booked_start, booked_end)| overlaps(start, end, *booked_start, *booked_end))
            {
                return false;
            }

            !(is_today && start <= now)
        })
        .map(format_slot_time)
        .collect()
}

/// Lists the bookable "HH:MM" slot starts of a location on a date.
///
/// An empty list is a valid answer; failures are reported through [`SlotError`].
#[tracing::instrument(skip(pool, window))]
pub async fn available_slots(
    pool: &PgPool,
    window: &OperatingWindow,
    location_id: Uuid,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<Vec<String>, SlotError> {
    if date < now.date() {
        return Err(SlotError::InvalidDate);
    }

    let location = Location::find_by_id(pool, location_id)
        .await?
        .ok_or(SlotError::LocationNotFound)?;

    if !location.is_active {
        tracing::debug!(location_id = %location_id, "Slot lookup on inactive location");
        return Err(SlotError::LocationUnavailable);
    }

    let appointments = Appointment::list_live_for_location_date(pool, location_id, date).await?;
    let booked: Vec<(NaiveDateTime, NaiveDateTime)> = appointments
        .iter()
        .map(|a| (a.start_time, a.end_time))
        .collect();

    let slots = compute_available_slots(window, date, &booked, now);

    tracing::debug!(
        location_id = %location_id,
        %date,
        booked = booked.len(),
        available = slots.len(),
        "Computed available slots"
    );

    Ok(slots)
}
