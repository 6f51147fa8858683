//! Database-backed tests. Run with a disposable PostgreSQL:
//! `DATABASE_URL=postgres://... cargo test -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use petwash::models::access_log::{AccessLog, CreateAccessLogData};
use petwash::models::appointment::{Appointment, AppointmentStatus};
use petwash::models::payment::{PaymentMethod, PaymentStatus};
use petwash::services::access_credential::AccessCredentialPayload;
use petwash::services::access_validator::{self, AccessReason};
use petwash::services::booking::{self, BookSlotRequest, BookingError};
use petwash::services::notifications::NotificationDispatcher;
use petwash::services::payment_gateway::{
    CardCheckout, ChargeRequest, GatewayError, GatewayPayment, PaymentGateway, PixCharge,
    SimulatedGateway,
};
use petwash::services::payment_processor::{PaymentError, PaymentProcessor};
use petwash::services::signature;
use petwash::services::slot_availability::{self, OperatingWindow};

struct Fixture {
    user_id: Uuid,
    pet_id: Uuid,
    location_id: Uuid,
}

async fn seed(pool: &PgPool) -> Fixture {
    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (name, email, password_hash) VALUES ('Ana', 'ana@example.com', 'x') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    let pet_id: Uuid = sqlx::query_scalar(
        "INSERT INTO pets (user_id, name, species, size) VALUES ($1, 'Thor', 'dog', 'large') RETURNING id",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap();

    let location_id: Uuid = sqlx::query_scalar(
        "INSERT INTO locations (name, address, price_cents) VALUES ('Centro', 'Rua A, 100', 4990) RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap();

    Fixture {
        user_id,
        pet_id,
        location_id,
    }
}

fn window() -> OperatingWindow {
    OperatingWindow::new(
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
    )
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 6, 1).unwrap()
}

fn at(h: u32, m: u32) -> NaiveDateTime {
    day().and_hms_opt(h, m, 0).unwrap()
}

fn request(fixture: &Fixture, start: &str) -> BookSlotRequest {
    BookSlotRequest {
        user_id: fixture.user_id,
        pet_id: fixture.pet_id,
        location_id: fixture.location_id,
        date: day(),
        start_time: start.to_string(),
        total_amount_cents: 4990,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_bookings_of_one_slot(pool: PgPool) {
    let fixture = seed(&pool).await;
    let window = window();
    let now = at(7, 0);

    let (first, second) = tokio::join!(
        booking::book_slot(&pool, &window, now, request(&fixture, "10:00")),
        booking::book_slot(&pool, &window, now, request(&fixture, "10:00")),
    );

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Err(BookingError::SlotUnavailable)))
            .count(),
        1
    );
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_booking_and_cancelling_changes_availability(pool: PgPool) {
    let fixture = seed(&pool).await;
    let window = window();
    let now = at(7, 0);

    let before = slot_availability::available_slots(&pool, &window, fixture.location_id, day(), now)
        .await
        .unwrap();
    assert_eq!(before.len(), 20);
    assert!(before.contains(&"10:00".to_string()));

    let appointment = booking::book_slot(&pool, &window, now, request(&fixture, "10:00"))
        .await
        .unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Pending);
    assert_eq!(appointment.end_time, at(10, 30));

    let booked = slot_availability::available_slots(&pool, &window, fixture.location_id, day(), now)
        .await
        .unwrap();
    assert_eq!(booked.len(), 19);
    assert!(!booked.contains(&"10:00".to_string()));

    booking::cancel_appointment(&pool, fixture.user_id, appointment.id)
        .await
        .unwrap();
    assert!(matches!(
        booking::cancel_appointment(&pool, fixture.user_id, appointment.id).await,
        Err(BookingError::AlreadyCancelled)
    ));

    let after = slot_availability::available_slots(&pool, &window, fixture.location_id, day(), now)
        .await
        .unwrap();
    assert_eq!(after, before);

    // The freed slot can be booked again
    booking::book_slot(&pool, &window, now, request(&fixture, "10:00"))
        .await
        .unwrap();
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_approved_payment_grants_access(pool: PgPool) {
    let fixture = seed(&pool).await;
    let signing_key = signature::derive_key("integration-credential-secret");
    let (gateway, _approvals) =
        SimulatedGateway::new(Duration::from_secs(3600)..=Duration::from_secs(3600));
    let processor = PaymentProcessor::new(
        pool.clone(),
        Arc::new(gateway),
        signing_key,
        NotificationDispatcher::default(),
    );

    let appointment = booking::book_slot(&pool, &window(), at(7, 0), request(&fixture, "10:00"))
        .await
        .unwrap();

    let payment = processor
        .start_payment(fixture.user_id, appointment.id, PaymentMethod::Pix)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.pix_code.is_some());

    // An unexpired PIX charge is reused
    let again = processor
        .start_payment(fixture.user_id, appointment.id, PaymentMethod::Pix)
        .await
        .unwrap();
    assert_eq!(again.id, payment.id);
    assert_eq!(again.external_id, payment.external_id);

    let external_id = payment.external_id.clone().unwrap();
    let approved = GatewayPayment {
        external_id: external_id.clone(),
        status: "approved".to_string(),
        external_reference: Some(appointment.id.to_string()),
    };

    let applied = processor.apply_gateway_payment(&approved).await.unwrap().unwrap();
    assert_eq!(applied.status, PaymentStatus::Approved);

    // Replaying the same notification changes nothing
    let replayed = processor.apply_gateway_payment(&approved).await.unwrap().unwrap();
    assert_eq!(replayed.status, PaymentStatus::Approved);

    let confirmed = Appointment::find_by_id(&pool, appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    let token = confirmed.access_token.unwrap();

    let (decision, scanned) =
        access_validator::validate_access(&pool, &signing_key, &token, fixture.location_id, at(9, 45))
            .await
            .unwrap();
    assert!(decision.valid, "{}", decision.message);
    assert_eq!(scanned, Some(appointment.id));

    let (early, _) =
        access_validator::validate_access(&pool, &signing_key, &token, fixture.location_id, at(9, 29))
            .await
            .unwrap();
    assert_eq!(early.reason, AccessReason::OutsideWindow);

    let (elsewhere, _) =
        access_validator::validate_access(&pool, &signing_key, &token, Uuid::new_v4(), at(10, 0))
            .await
            .unwrap();
    assert_eq!(elsewhere.reason, AccessReason::WrongLocation);

    let (forged, scanned) =
        access_validator::validate_access(&pool, &signing_key, "garbage", fixture.location_id, at(10, 0))
            .await
            .unwrap();
    assert_eq!(forged.reason, AccessReason::InvalidCredential);
    assert_eq!(scanned, None);

    // Paying again is refused
    assert!(processor
        .start_payment(fixture.user_id, appointment.id, PaymentMethod::Card)
        .await
        .is_err());
}

/// Gateway that settles PIX charges the moment they are created
struct InstantApprovalGateway;

#[async_trait]
impl PaymentGateway for InstantApprovalGateway {
    async fn create_pix_charge(&self, _request: &ChargeRequest) -> Result<PixCharge, GatewayError> {
        Ok(PixCharge {
            external_id: "mp-1".to_string(),
            status: "approved".to_string(),
            qr_code: "00020126pix".to_string(),
            qr_code_base64: None,
            expires_at: None,
        })
    }

    async fn create_card_checkout(
        &self,
        _request: &ChargeRequest,
    ) -> Result<CardCheckout, GatewayError> {
        Err(GatewayError::ApiError("card checkout unavailable".to_string()))
    }

    async fn get_payment_status(&self, external_id: &str) -> Result<GatewayPayment, GatewayError> {
        Ok(GatewayPayment {
            external_id: external_id.to_string(),
            status: "approved".to_string(),
            external_reference: None,
        })
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_payment_approved_at_creation_confirms_appointment(pool: PgPool) {
    let fixture = seed(&pool).await;
    let processor = PaymentProcessor::new(
        pool.clone(),
        Arc::new(InstantApprovalGateway),
        signature::derive_key("integration-credential-secret"),
        NotificationDispatcher::default(),
    );

    let appointment = booking::book_slot(&pool, &window(), at(7, 0), request(&fixture, "10:00"))
        .await
        .unwrap();

    let payment = processor
        .start_payment(fixture.user_id, appointment.id, PaymentMethod::Pix)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);

    let confirmed = Appointment::find_by_id(&pool, appointment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
    assert!(confirmed.access_token.is_some());

    // A late webhook for the same charge is a no-op
    let notified = processor.handle_notification("mp-1").await.unwrap().unwrap();
    assert_eq!(notified.status, PaymentStatus::Approved);

    assert!(matches!(
        processor
            .start_payment(fixture.user_id, appointment.id, PaymentMethod::Pix)
            .await,
        Err(PaymentError::AlreadyPaid)
    ));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_scan_of_unknown_appointment_is_audited(pool: PgPool) {
    let fixture = seed(&pool).await;
    let signing_key = signature::derive_key("integration-credential-secret");

    let appointment = booking::book_slot(&pool, &window(), at(7, 0), request(&fixture, "10:00"))
        .await
        .unwrap();
    let mut payload = AccessCredentialPayload::for_appointment(&appointment, Utc::now());
    payload.appointment_id = Uuid::new_v4();
    let token = payload.encode(&signing_key).unwrap();

    for location_id in [fixture.location_id, Uuid::new_v4()] {
        let (decision, scanned) =
            access_validator::validate_access(&pool, &signing_key, &token, location_id, at(10, 0))
                .await
                .unwrap();
        assert!(!decision.valid);
        assert_eq!(scanned, None);

        AccessLog::create(
            &pool,
            CreateAccessLogData {
                appointment_id: scanned,
                location_id,
                granted: decision.valid,
                reason: decision.reason.as_str().to_string(),
                message: decision.message.clone(),
            },
        )
        .await
        .unwrap();
    }

    let (decision, _) =
        access_validator::validate_access(&pool, &signing_key, &token, fixture.location_id, at(10, 0))
            .await
            .unwrap();
    assert_eq!(decision.reason, AccessReason::AppointmentNotFound);
    assert_eq!(decision.message, "Appointment not found");
}
