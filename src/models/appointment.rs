use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use crate::services::slot_availability::SLOT_MINUTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pet_id: Uuid,
    pub location_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveDateTime, // local business time
    pub end_time: NaiveDateTime,   // always start_time + 30 minutes
    pub status: AppointmentStatus,
    pub total_amount_cents: i64,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAppointmentData {
    pub user_id: Uuid,
    pub pet_id: Uuid,
    pub location_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveDateTime,
    pub total_amount_cents: i64,
}

impl CreateAppointmentData {
    pub fn end_time(&self) -> NaiveDateTime {
        self.start_time + Duration::minutes(SLOT_MINUTES)
    }
}

/// Appointment joined with everything a notification needs
#[derive(Debug, Clone, FromRow)]
pub struct AppointmentDetails {
    pub appointment_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub status: AppointmentStatus,
    pub user_name: String,
    pub user_email: String,
    pub user_phone: Option<String>,
    pub pet_name: String,
    pub location_name: String,
    pub location_address: String,
}

const DETAILS_SELECT: &str = r#"
    SELECT
        a.id AS appointment_id,
        a.appointment_date,
        a.start_time,
        a.end_time,
        a.status,
        u.name AS user_name,
        u.email AS user_email,
        u.phone AS user_phone,
        p.name AS pet_name,
        l.name AS location_name,
        l.address AS location_address
    FROM appointments a
    JOIN users u ON u.id = a.user_id
    JOIN pets p ON p.id = a.pet_id
    JOIN locations l ON l.id = a.location_id
"#;

impl Appointment {
    pub fn is_cancelled(&self) -> bool {
        self.status == AppointmentStatus::Cancelled
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let appointment = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT * FROM appointments WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(appointment)
    }

    /// Locks an appointment row for the rest of the transaction
    pub async fn lock_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let appointment = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT * FROM appointments WHERE id = $1 FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(appointment)
    }

    /// Lists a user's appointments, newest slot first
    pub async fn list_by_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let appointments = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT * FROM appointments
            WHERE user_id = $1
            ORDER BY start_time DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        Ok(appointments)
    }

    /// Lists the pending and confirmed appointments of one location on one day
    pub async fn list_live_for_location_date<'e, E>(
        executor: E,
        location_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let appointments = sqlx::query_as::<_, Appointment>(
            r#"
            SELECT * FROM appointments
            WHERE location_id = $1
              AND appointment_date = $2
              AND status <> 'cancelled'
            ORDER BY start_time ASC
            "#,
        )
        .bind(location_id)
        .bind(date)
        .fetch_all(executor)
        .await?;

        Ok(appointments)
    }

    /// Inserts a new PENDING appointment
    pub async fn insert<'e, E>(executor: E, data: &CreateAppointmentData) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let appointment = sqlx::query_as::<_, Appointment>(
            r#"
            INSERT INTO appointments (
                user_id, pet_id, location_id, appointment_date,
                start_time, end_time, status, total_amount_cents
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7)
            RETURNING *
            "#,
        )
        .bind(data.user_id)
        .bind(data.pet_id)
        .bind(data.location_id)
        .bind(data.appointment_date)
        .bind(data.start_time)
        .bind(data.end_time())
        .bind(data.total_amount_cents)
        .fetch_one(executor)
        .await?;

        Ok(appointment)
    }

    /// Cancels an appointment that is not cancelled yet.
    /// Returns `None` if it was already cancelled.
    pub async fn cancel(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let appointment = sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointments
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status <> 'cancelled'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(appointment)
    }

    /// Moves a PENDING appointment to CONFIRMED and stores its access credential.
    /// Returns `None` if the appointment was not pending.
    pub async fn confirm<'e, E>(
        executor: E,
        id: Uuid,
        access_token: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let appointment = sqlx::query_as::<_, Appointment>(
            r#"
            UPDATE appointments
            SET status = 'confirmed', access_token = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(access_token)
        .fetch_optional(executor)
        .await?;

        Ok(appointment)
    }

    pub async fn find_details(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<Option<AppointmentDetails>, sqlx::Error> {
        let query = format!("{} WHERE a.id = $1", DETAILS_SELECT);

        let details = sqlx::query_as::<_, AppointmentDetails>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(details)
    }

    /// Confirmed appointments starting in `[from, until]` that have not been reminded yet
    pub async fn find_due_for_reminder(
        pool: &PgPool,
        from: NaiveDateTime,
        until: NaiveDateTime,
        limit: i64,
    ) -> Result<Vec<AppointmentDetails>, sqlx::Error> {
        let query = format!(
            r#"{}
            WHERE a.status = 'confirmed'
              AND a.reminder_sent_at IS NULL
              AND a.start_time BETWEEN $1 AND $2
            ORDER BY a.start_time ASC
            LIMIT $3
            "#,
            DETAILS_SELECT
        );

        let details = sqlx::query_as::<_, AppointmentDetails>(&query)
            .bind(from)
            .bind(until)
            .bind(limit)
            .fetch_all(pool)
            .await?;

        Ok(details)
    }

    pub async fn mark_reminder_sent(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE appointments
            SET reminder_sent_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }
}
