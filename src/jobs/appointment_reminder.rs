use chrono::{Duration, NaiveDateTime};
use sqlx::PgPool;

use crate::models::appointment::Appointment;
use crate::services::clock::BusinessClock;
use crate::services::notifications::{Notification, NotificationDispatcher, NotificationKind};

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReminderStats {
    pub total_due: usize,
    pub reminded: usize,
    pub undelivered: usize,
    pub database_errors: usize,
}

/// Range of start times that are due a reminder at `now`
pub fn reminder_range(now: NaiveDateTime, lead_minutes: i64) -> (NaiveDateTime, NaiveDateTime) {
    (now, now + Duration::minutes(lead_minutes))
}

/// Background job that reminds customers of upcoming washes
///
/// For each confirmed appointment starting within the lead time that has not
/// been reminded yet:
/// 1. Deliver a reminder on every configured channel
/// 2. Mark the appointment as reminded, unless no channel accepted it
#[derive(Clone)]
pub struct ReminderJob {
    pool: PgPool,
    notifications: NotificationDispatcher,
    clock: BusinessClock,
    lead_minutes: i64,
}

impl ReminderJob {
    pub fn new(
        pool: PgPool,
        notifications: NotificationDispatcher,
        clock: BusinessClock,
        lead_minutes: i64,
    ) -> Self {
        Self {
            pool,
            notifications,
            clock,
            lead_minutes,
        }
    }

    pub async fn run(&self) -> Result<ReminderStats, sqlx::Error> {
        let mut stats = ReminderStats::default();

        let (from, until) = reminder_range(self.clock.now(), self.lead_minutes);
        let due = Appointment::find_due_for_reminder(&self.pool, from, until, BATCH_SIZE).await?;
        stats.total_due = due.len();

        if due.is_empty() {
            tracing::debug!("No appointments due for a reminder");
            return Ok(stats);
        }

        tracing::info!(total_due = stats.total_due, "Starting appointment reminder job");

        for details in due {
            let notification = Notification::from_details(NotificationKind::Reminder, &details);

            // Without any channel configured, keep the row unmarked so a
            // later run can still remind once one is set up.
            if self.notifications.deliver(&notification).await == 0 {
                stats.undelivered += 1;
                continue;
            }

            match Appointment::mark_reminder_sent(&self.pool, details.appointment_id).await {
                Ok(()) => stats.reminded += 1,
                Err(e) => {
                    tracing::error!(
                        appointment_id = %details.appointment_id,
                        error = %e,
                        "Failed to mark reminder as sent"
                    );
                    stats.database_errors += 1;
                }
            }
        }

        tracing::info!(?stats, "Appointment reminder job completed");

        Ok(stats)
    }
}
