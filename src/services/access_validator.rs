use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{
    appointment::{Appointment, AppointmentStatus},
    payment::{Payment, PaymentStatus},
};
use crate::services::access_credential::AccessCredentialPayload;

/// How long before the reserved start the unit opens
pub const EARLY_ACCESS_MINUTES: i64 = 30;

/// Why a scan was granted or denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    Granted,
    InvalidCredential,
    WrongLocation,
    AppointmentNotFound,
    NotConfirmedOrUnpaid,
    WrongDay,
    OutsideWindow,
}

impl AccessReason {
    /// Returns the reason as a string for the audit log
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::Granted => "granted",
            AccessReason::InvalidCredential => "invalid_credential",
            AccessReason::WrongLocation => "wrong_location",
            AccessReason::AppointmentNotFound => "appointment_not_found",
            AccessReason::NotConfirmedOrUnpaid => "not_confirmed_or_unpaid",
            AccessReason::WrongDay => "wrong_day",
            AccessReason::OutsideWindow => "outside_window",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentSummary {
    pub appointment_id: Uuid,
    pub pet_id: Uuid,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub valid: bool,
    pub reason: AccessReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub appointment: Option<AppointmentSummary>,
}

impl AccessDecision {
    fn deny(reason: AccessReason, message: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason,
            message: message.into(),
            appointment: None,
        }
    }

    pub fn invalid_credential() -> Self {
        Self::deny(AccessReason::InvalidCredential, "Invalid or corrupted QR code")
    }
}

/// `[start - 30min, end]`, both ends inclusive
pub fn access_window(appointment: &Appointment) -> (NaiveDateTime, NaiveDateTime) {
    (
        appointment.start_time - Duration::minutes(EARLY_ACCESS_MINUTES),
        appointment.end_time,
    )
}

/// Checks the credential against the scanning unit.
///
/// Runs before any lookup so a foreign credential never touches the database.
pub fn check_location(
    credential: &AccessCredentialPayload,
    scanning_location: Uuid,
) -> Option<AccessDecision> {
    if credential.location_id != scanning_location {
        return Some(AccessDecision::deny(
            AccessReason::WrongLocation,
            "QR code not valid for this unit",
        ));
    }
    None
}

/// Decides whether an already-decoded credential grants access at `now`.
///
/// Checks short-circuit in order: appointment exists, appointment confirmed
/// and payment approved, date is today, `now` inside the access window.
pub fn evaluate(
    appointment: Option<&Appointment>,
    payment_status: Option<PaymentStatus>,
    now: NaiveDateTime,
) -> AccessDecision {
    let Some(appointment) = appointment else {
        return AccessDecision::deny(AccessReason::AppointmentNotFound, "Appointment not found");
    };

    if appointment.status != AppointmentStatus::Confirmed
        || payment_status != Some(PaymentStatus::Approved)
    {
        return AccessDecision::deny(
            AccessReason::NotConfirmedOrUnpaid,
            "Appointment not confirmed or not paid",
        );
    }

    if appointment.appointment_date != now.date() {
        return AccessDecision::deny(AccessReason::WrongDay, "QR code not valid for today");
    }

    let (opens, closes) = access_window(appointment);
    if now < opens || now > closes {
        return AccessDecision::deny(
            AccessReason::OutsideWindow,
            format!(
                "Access allowed only between {} and {}",
                opens.format("%H:%M"),
                closes.format("%H:%M")
            ),
        );
    }

    AccessDecision {
        valid: true,
        reason: AccessReason::Granted,
        message: "Access granted. Enjoy the wash!".to_string(),
        appointment: Some(AppointmentSummary {
            appointment_id: appointment.id,
            pet_id: appointment.pet_id,
            date: appointment.appointment_date,
            start_time: appointment.start_time.format("%H:%M").to_string(),
            end_time: appointment.end_time.format("%H:%M").to_string(),
        }),
    }
}

/// Validates a scanned token for a unit at `now`.
///
/// Malformed or forged tokens fail closed with a negative decision; only
/// database failures surface as errors. Writing the audit entry is left to
/// the caller.
#[tracing::instrument(skip(pool, signing_key, token), fields(token_len = token.len()))]
pub async fn validate_access(
    pool: &PgPool,
    signing_key: &[u8],
    token: &str,
    scanning_location: Uuid,
    now: NaiveDateTime,
) -> Result<(AccessDecision, Option<Uuid>), sqlx::Error> {
    let credential = match AccessCredentialPayload::decode(token, signing_key) {
        Ok(credential) => credential,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected unreadable access credential");
            return Ok((AccessDecision::invalid_credential(), None));
        }
    };

    let appointment = Appointment::find_by_id(pool, credential.appointment_id).await?;
    // Audit rows reference appointments, so a missing one is recorded without id
    let audited_id = appointment.as_ref().map(|a| a.id);

    if let Some(denied) = check_location(&credential, scanning_location) {
        return Ok((denied, audited_id));
    }

    let payment_status = match &appointment {
        Some(a) => Payment::find_by_appointment_id(pool, a.id)
            .await?
            .map(|p| p.status),
        None => None,
    };

    let decision = evaluate(appointment.as_ref(), payment_status, now);

    tracing::info!(
        appointment_id = %credential.appointment_id,
        location_id = %scanning_location,
        reason = decision.reason.as_str(),
        "Access credential evaluated"
    );

    Ok((decision, audited_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Utc};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_time(NaiveTime::from_hms_opt(h, m, 0).unwrap())
    }

    fn confirmed_appointment() -> Appointment {
        let start = at(10, 0);
        Appointment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            pet_id: Uuid::new_v4(),
            location_id: Uuid::new_v4(),
            appointment_date: day(),
            start_time: start,
            end_time: start + Duration::minutes(30),
            status: AppointmentStatus::Confirmed,
            total_amount_cents: 4990,
            access_token: None,
            reminder_sent_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn decide_at(now: NaiveDateTime) -> AccessDecision {
        evaluate(
            Some(&confirmed_appointment()),
            Some(PaymentStatus::Approved),
            now,
        )
    }

    #[test]
    fn test_window_boundaries() {
        let early = decide_at(at(9, 29));
        assert!(!early.valid);
        assert_eq!(early.reason, AccessReason::OutsideWindow);
        assert_eq!(early.message, "Access allowed only between 09:30 and 10:30");

        assert!(decide_at(at(9, 30)).valid);
        assert!(decide_at(at(10, 0)).valid);
        assert!(decide_at(at(10, 30)).valid);

        let late = decide_at(at(10, 31));
        assert!(!late.valid);
        assert_eq!(late.reason, AccessReason::OutsideWindow);
    }

    #[test]
    fn test_granted_decision_carries_summary() {
        let appointment = confirmed_appointment();
        let decision = evaluate(Some(&appointment), Some(PaymentStatus::Approved), at(10, 5));

        assert!(decision.valid);
        assert_eq!(decision.reason, AccessReason::Granted);
        let summary = decision.appointment.unwrap();
        assert_eq!(summary.appointment_id, appointment.id);
        assert_eq!(summary.start_time, "10:00");
        assert_eq!(summary.end_time, "10:30");
    }

    #[test]
    fn test_missing_appointment() {
        let decision = evaluate(None, None, at(10, 0));
        assert_eq!(decision.reason, AccessReason::AppointmentNotFound);
        assert!(decision.appointment.is_none());
    }

    #[test]
    fn test_unconfirmed_or_unpaid_is_denied() {
        let mut pending = confirmed_appointment();
        pending.status = AppointmentStatus::Pending;
        let decision = evaluate(Some(&pending), Some(PaymentStatus::Approved), at(10, 0));
        assert_eq!(decision.reason, AccessReason::NotConfirmedOrUnpaid);

        let mut cancelled = confirmed_appointment();
        cancelled.status = AppointmentStatus::Cancelled;
        let decision = evaluate(Some(&cancelled), Some(PaymentStatus::Approved), at(10, 0));
        assert_eq!(decision.reason, AccessReason::NotConfirmedOrUnpaid);

        let confirmed = confirmed_appointment();
        for status in [
            None,
            Some(PaymentStatus::Pending),
            Some(PaymentStatus::Rejected),
            Some(PaymentStatus::Cancelled),
        ] {
            let decision = evaluate(Some(&confirmed), status, at(10, 0));
            assert!(!decision.valid);
            assert_eq!(decision.reason, AccessReason::NotConfirmedOrUnpaid);
        }
    }

    #[test]
    fn test_wrong_day_is_denied() {
        let tomorrow = at(10, 0) + Duration::days(1);
        let decision = decide_at(tomorrow);
        assert_eq!(decision.reason, AccessReason::WrongDay);
        assert_eq!(decision.message, "QR code not valid for today");

        let yesterday = at(10, 0) - Duration::days(1);
        assert_eq!(decide_at(yesterday).reason, AccessReason::WrongDay);
    }

    #[test]
    fn test_payment_check_precedes_date_check() {
        let decision = evaluate(
            Some(&confirmed_appointment()),
            Some(PaymentStatus::Pending),
            at(10, 0) + Duration::days(3),
        );
        assert_eq!(decision.reason, AccessReason::NotConfirmedOrUnpaid);
    }

    #[test]
    fn test_location_check() {
        let appointment = confirmed_appointment();
        let credential = AccessCredentialPayload::for_appointment(&appointment, Utc::now());

        assert!(check_location(&credential, appointment.location_id).is_none());

        let denied = check_location(&credential, Uuid::new_v4()).unwrap();
        assert!(!denied.valid);
        assert_eq!(denied.reason, AccessReason::WrongLocation);
        assert_eq!(denied.message, "QR code not valid for this unit");
    }

    #[test]
    fn test_invalid_credential_decision() {
        let decision = AccessDecision::invalid_credential();
        assert!(!decision.valid);
        assert_eq!(decision.reason.as_str(), "invalid_credential");
    }

    #[test]
    fn test_decision_serialization() {
        let json = serde_json::to_value(AccessDecision::invalid_credential()).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["reason"], "invalid_credential");
        assert!(json.get("appointment").is_none());
    }
}
