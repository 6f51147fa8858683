// Background jobs

pub mod appointment_reminder;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use appointment_reminder::ReminderJob;

/// Every five minutes, on the minute
const REMINDER_SCHEDULE: &str = "0 */5 * * * *";

/// Builds and starts the scheduler with every periodic job registered
pub async fn start_scheduler(reminders: ReminderJob) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async(REMINDER_SCHEDULE, move |_id, _scheduler| {
        let reminders = reminders.clone();
        Box::pin(async move {
            if let Err(e) = reminders.run().await {
                tracing::error!(error = %e, "Appointment reminder job failed");
            }
        })
    })?;
    scheduler.add(job).await?;

    scheduler.start().await?;
    tracing::info!(schedule = REMINDER_SCHEDULE, "Job scheduler started");

    Ok(scheduler)
}
