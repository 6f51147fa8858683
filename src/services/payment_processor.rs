use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    appointment::{Appointment, AppointmentStatus},
    payment::{Payment, PaymentMethod, PaymentStatus, UpsertPaymentData},
    user::User,
};
use crate::services::access_credential::{AccessCredentialPayload, CredentialError};
use crate::services::notifications::{Notification, NotificationDispatcher, NotificationKind};
use crate::services::payment_gateway::{ChargeRequest, GatewayError, GatewayPayment, PaymentGateway};

#[derive(thiserror::Error, Debug)]
pub enum PaymentError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Payment gateway error: {0}")]
    GatewayError(#[from] GatewayError),

    #[error("Credential error: {0}")]
    CredentialError(#[from] CredentialError),

    #[error("Appointment not found")]
    AppointmentNotFound,

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("Appointment is cancelled")]
    AppointmentCancelled,

    #[error("Appointment is already paid")]
    AlreadyPaid,
}

/// What a reported gateway status does to a stored payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Ignore,
    Update(PaymentStatus),
    Approve,
}

fn transition(current: PaymentStatus, reported: PaymentStatus) -> Transition {
    match (current, reported) {
        // Approved is terminal
        (PaymentStatus::Approved, _) => Transition::Ignore,
        (_, PaymentStatus::Approved) => Transition::Approve,
        (current, reported) if current == reported => Transition::Ignore,
        (_, reported) => Transition::Update(reported),
    }
}

fn charge_description(appointment: &Appointment) -> String {
    format!(
        "Pet wash {} {}",
        appointment.appointment_date.format("%d/%m/%Y"),
        appointment.start_time.format("%H:%M")
    )
}

/// Drives payments from charge creation to appointment confirmation
#[derive(Clone)]
pub struct PaymentProcessor {
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    signing_key: [u8; 32],
    notifications: NotificationDispatcher,
}

impl PaymentProcessor {
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        signing_key: [u8; 32],
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            pool,
            gateway,
            signing_key,
            notifications,
        }
    }

    /// Starts (or restarts) the payment of an appointment owned by `user_id`.
    ///
    /// An unexpired pending PIX charge is handed back as is instead of
    /// creating a new one. A gateway failure leaves both the appointment and
    /// any previous payment row untouched.
    #[tracing::instrument(skip(self))]
    pub async fn start_payment(
        &self,
        user_id: Uuid,
        appointment_id: Uuid,
        method: PaymentMethod,
    ) -> Result<Payment, PaymentError> {
        let appointment = Appointment::find_by_id(&self.pool, appointment_id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or(PaymentError::AppointmentNotFound)?;

        match appointment.status {
            AppointmentStatus::Cancelled => return Err(PaymentError::AppointmentCancelled),
            AppointmentStatus::Confirmed => return Err(PaymentError::AlreadyPaid),
            AppointmentStatus::Pending => {}
        }

        let existing = Payment::find_by_appointment_id(&self.pool, appointment_id).await?;
        if let Some(payment) = &existing {
            if payment.status == PaymentStatus::Approved {
                return Err(PaymentError::AlreadyPaid);
            }
            if method == PaymentMethod::Pix && payment.has_reusable_pix(Utc::now()) {
                tracing::debug!(payment_id = %payment.id, "Reusing pending PIX charge");
                return Ok(payment.clone());
            }
        }

        let user = User::find_by_id(&self.pool, user_id)
            .await?
            .ok_or(PaymentError::AppointmentNotFound)?;

        let request = ChargeRequest {
            appointment_id,
            amount_cents: appointment.total_amount_cents,
            payer_email: user.email,
            description: charge_description(&appointment),
        };

        let (data, reported) = match method {
            PaymentMethod::Pix => {
                let charge = self.gateway.create_pix_charge(&request).await?;
                let reported = GatewayPayment {
                    external_id: charge.external_id.clone(),
                    status: charge.status.clone(),
                    external_reference: Some(appointment_id.to_string()),
                };
                let data = UpsertPaymentData {
                    appointment_id,
                    amount_cents: request.amount_cents,
                    method,
                    status: PaymentStatus::Pending,
                    external_id: charge.external_id,
                    pix_code: Some(charge.qr_code),
                    pix_expires_at: charge.expires_at,
                    checkout_url: None,
                };
                (data, Some(reported))
            }
            PaymentMethod::Card => {
                let checkout = self.gateway.create_card_checkout(&request).await?;
                let data = UpsertPaymentData {
                    appointment_id,
                    amount_cents: request.amount_cents,
                    method,
                    status: PaymentStatus::Pending,
                    external_id: checkout.external_id,
                    pix_code: None,
                    pix_expires_at: None,
                    checkout_url: Some(checkout.checkout_url),
                };
                (data, None)
            }
        };

        let mut payment = Payment::upsert_for_appointment(&self.pool, data)
            .await?
            .ok_or(PaymentError::AlreadyPaid)?;

        // Charges settled at creation are applied like a webhook
        if let Some(reported) = reported {
            if let Some(updated) = self.apply(&payment, &reported).await? {
                payment = updated;
            }
        }

        tracing::info!(
            payment_id = %payment.id,
            method = ?payment.method,
            external_id = ?payment.external_id,
            "Payment started"
        );

        Ok(payment)
    }

    /// Returns a payment owned by `user_id`, refreshed from the gateway while pending
    #[tracing::instrument(skip(self))]
    pub async fn get_payment(&self, user_id: Uuid, payment_id: Uuid) -> Result<Payment, PaymentError> {
        let payment = Payment::find_by_id(&self.pool, payment_id)
            .await?
            .ok_or(PaymentError::PaymentNotFound)?;

        let owned = Appointment::find_by_id(&self.pool, payment.appointment_id)
            .await?
            .map(|a| a.user_id == user_id)
            .unwrap_or(false);
        if !owned {
            return Err(PaymentError::PaymentNotFound);
        }

        if payment.status != PaymentStatus::Pending {
            return Ok(payment);
        }
        let Some(external_id) = payment.external_id.clone() else {
            return Ok(payment);
        };

        // Gateway errors fall back to the stored status
        let reported = match self.gateway.get_payment_status(&external_id).await {
            Ok(reported) => reported,
            Err(e) => {
                tracing::warn!(payment_id = %payment.id, error = %e, "Could not refresh payment status");
                return Ok(payment);
            }
        };

        Ok(self.apply(&payment, &reported).await?.unwrap_or(payment))
    }

    /// Handles a gateway notification about `external_id`.
    ///
    /// The status is always re-fetched from the gateway. Unknown payments
    /// are logged and reported as `Ok(None)`.
    #[tracing::instrument(skip(self))]
    pub async fn handle_notification(&self, external_id: &str) -> Result<Option<Payment>, PaymentError> {
        let reported = match self.gateway.get_payment_status(external_id).await {
            Ok(reported) => reported,
            Err(GatewayError::NotFound(_)) => {
                tracing::warn!(external_id = %external_id, "Notification for a payment the gateway does not know");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        self.apply_gateway_payment(&reported).await
    }

    /// Applies an authoritative gateway status to the matching local payment
    pub async fn apply_gateway_payment(
        &self,
        reported: &GatewayPayment,
    ) -> Result<Option<Payment>, PaymentError> {
        let mut payment = Payment::find_by_external_id(&self.pool, &reported.external_id).await?;

        // Card checkouts are stored under the preference id; the payment id
        // only arrives later, so fall back to our own reference.
        if payment.is_none() {
            if let Some(appointment_id) = reported
                .external_reference
                .as_deref()
                .and_then(|r| Uuid::parse_str(r).ok())
            {
                payment = Payment::find_by_appointment_id(&self.pool, appointment_id).await?;
            }
        }

        let Some(payment) = payment else {
            tracing::warn!(
                external_id = %reported.external_id,
                external_reference = ?reported.external_reference,
                "No local payment matches gateway payment"
            );
            return Ok(None);
        };

        let updated = self.apply(&payment, reported).await?;
        Ok(Some(updated.unwrap_or(payment)))
    }

    async fn apply(
        &self,
        payment: &Payment,
        reported: &GatewayPayment,
    ) -> Result<Option<Payment>, PaymentError> {
        let status = PaymentStatus::from_gateway(&reported.status);

        match transition(payment.status, status) {
            Transition::Ignore => Ok(None),
            Transition::Update(status) => {
                let updated = Payment::update_status(
                    &self.pool,
                    payment.id,
                    status,
                    Some(&reported.external_id),
                )
                .await?;

                tracing::info!(
                    payment_id = %payment.id,
                    status = status.as_str(),
                    "Payment status updated"
                );

                Ok(updated)
            }
            Transition::Approve => self.approve(payment, &reported.external_id).await,
        }
    }

    /// Approves the payment, confirms its appointment and issues the access
    /// credential in one transaction, then sends the confirmation.
    #[tracing::instrument(skip(self, payment), fields(payment_id = %payment.id))]
    async fn approve(
        &self,
        payment: &Payment,
        external_id: &str,
    ) -> Result<Option<Payment>, PaymentError> {
        let mut tx = self.pool.begin().await?;

        let Some(approved) = Payment::update_status(
            &mut *tx,
            payment.id,
            PaymentStatus::Approved,
            Some(external_id),
        )
        .await?
        else {
            // Someone else approved it first
            tx.rollback().await?;
            return Ok(None);
        };

        let appointment = Appointment::lock_by_id(&mut *tx, approved.appointment_id)
            .await?
            .ok_or(PaymentError::AppointmentNotFound)?;

        let confirmed = match appointment.status {
            AppointmentStatus::Pending => {
                let token = AccessCredentialPayload::for_appointment(&appointment, Utc::now())
                    .encode(&self.signing_key)?;
                Appointment::confirm(&mut *tx, appointment.id, &token).await?
            }
            AppointmentStatus::Cancelled => {
                tracing::warn!(
                    appointment_id = %appointment.id,
                    "Payment approved for a cancelled appointment; leaving it cancelled"
                );
                None
            }
            AppointmentStatus::Confirmed => None,
        };

        tx.commit().await?;

        tracing::info!(
            appointment_id = %approved.appointment_id,
            confirmed = confirmed.is_some(),
            "Payment approved"
        );

        if let Some(appointment) = confirmed {
            self.notify(appointment.id, NotificationKind::Confirmation).await;
        }

        Ok(Some(approved))
    }

    /// Queues a notification about an appointment; lookup failures are only logged
    pub async fn notify(&self, appointment_id: Uuid, kind: NotificationKind) {
        match Appointment::find_details(&self.pool, appointment_id).await {
            Ok(Some(details)) => {
                self.notifications
                    .dispatch(Notification::from_details(kind, &details));
            }
            Ok(None) => {
                tracing::warn!(appointment_id = %appointment_id, "Appointment vanished before notification");
            }
            Err(e) => {
                tracing::error!(appointment_id = %appointment_id, error = %e, "Failed to load notification details");
            }
        }
    }
}
