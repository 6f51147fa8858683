use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl PaymentStatus {
    /// Maps a gateway status string onto the local status.
    ///
    /// Unknown or intermediate states ("in_process", "authorized", ...) stay pending.
    pub fn from_gateway(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "approved" => PaymentStatus::Approved,
            "rejected" => PaymentStatus::Rejected,
            "cancelled" | "canceled" | "refunded" | "charged_back" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Rejected => "rejected",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Pix,
    Card,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub external_id: Option<String>,
    pub pix_code: Option<String>,
    pub pix_expires_at: Option<DateTime<Utc>>,
    pub checkout_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UpsertPaymentData {
    pub appointment_id: Uuid,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub external_id: String,
    pub pix_code: Option<String>,
    pub pix_expires_at: Option<DateTime<Utc>>,
    pub checkout_url: Option<String>,
}

impl Payment {
    /// A pending PIX charge whose code can still be paid
    pub fn has_reusable_pix(&self, now: DateTime<Utc>) -> bool {
        self.method == PaymentMethod::Pix
            && self.status == PaymentStatus::Pending
            && self.pix_code.is_some()
            && self.pix_expires_at.map(|exp| exp > now).unwrap_or(false)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(payment)
    }

    pub async fn find_by_appointment_id<'e, E>(
        executor: E,
        appointment_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments WHERE appointment_id = $1
            "#,
        )
        .bind(appointment_id)
        .fetch_optional(executor)
        .await?;

        Ok(payment)
    }

    pub async fn find_by_external_id(
        pool: &PgPool,
        external_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT * FROM payments WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(pool)
        .await?;

        Ok(payment)
    }

    /// Creates the payment of an appointment, or replaces a previous unsuccessful attempt.
    ///
    /// Returns `None` when the existing payment is already approved.
    pub async fn upsert_for_appointment(
        pool: &PgPool,
        data: UpsertPaymentData,
    ) -> Result<Option<Self>, sqlx::Error> {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (
                appointment_id, amount_cents, method, status,
                external_id, pix_code, pix_expires_at, checkout_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (appointment_id) DO UPDATE
            SET
                amount_cents = EXCLUDED.amount_cents,
                method = EXCLUDED.method,
                status = EXCLUDED.status,
                external_id = EXCLUDED.external_id,
                pix_code = EXCLUDED.pix_code,
                pix_expires_at = EXCLUDED.pix_expires_at,
                checkout_url = EXCLUDED.checkout_url,
                updated_at = NOW()
            WHERE payments.status <> 'approved'
            RETURNING *
            "#,
        )
        .bind(data.appointment_id)
        .bind(data.amount_cents)
        .bind(data.method)
        .bind(data.status)
        .bind(data.external_id)
        .bind(data.pix_code)
        .bind(data.pix_expires_at)
        .bind(data.checkout_url)
        .fetch_optional(pool)
        .await?;

        Ok(payment)
    }

    /// Sets a new status unless the payment is already approved.
    ///
    /// `external_id` replaces the stored reference when given (card checkouts
    /// only learn the gateway payment id once the payer completes checkout).
    /// Returns `None` if the row was already approved.
    pub async fn update_status<'e, E>(
        executor: E,
        id: Uuid,
        status: PaymentStatus,
        external_id: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET
                status = $2,
                external_id = COALESCE($3, external_id),
                updated_at = NOW()
            WHERE id = $1 AND status <> 'approved'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(external_id)
        .fetch_optional(executor)
        .await?;

        Ok(payment)
    }
}
