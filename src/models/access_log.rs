use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Audit record of a single credential scan at a wash unit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessLog {
    pub id: Uuid,
    pub appointment_id: Option<Uuid>, // nullable: corrupted credentials carry no usable id
    pub location_id: Uuid,
    pub granted: bool,
    pub reason: String, // "granted", "wrong_location", "outside_window", ...
    pub message: String,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAccessLogData {
    pub appointment_id: Option<Uuid>,
    pub location_id: Uuid,
    pub granted: bool,
    pub reason: String,
    pub message: String,
}

impl AccessLog {
    pub async fn create(pool: &PgPool, data: CreateAccessLogData) -> Result<Self, sqlx::Error> {
        let log = sqlx::query_as::<_, AccessLog>(
            r#"
            INSERT INTO access_logs (appointment_id, location_id, granted, reason, message)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(data.appointment_id)
        .bind(data.location_id)
        .bind(data.granted)
        .bind(data.reason)
        .bind(data.message)
        .fetch_one(pool)
        .await?;

        Ok(log)
    }

    /// Scan history of one appointment, newest first
    pub async fn list_by_appointment(
        pool: &PgPool,
        appointment_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let logs = sqlx::query_as::<_, AccessLog>(
            r#"
            SELECT * FROM access_logs
            WHERE appointment_id = $1
            ORDER BY scanned_at DESC
            "#,
        )
        .bind(appointment_id)
        .fetch_all(pool)
        .await?;

        Ok(logs)
    }

    pub async fn count_granted_by_appointment(
        pool: &PgPool,
        appointment_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM access_logs
            WHERE appointment_id = $1 AND granted = TRUE
            "#,
        )
        .bind(appointment_id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
