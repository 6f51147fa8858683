// Outbound customer messaging: confirmations, reminders and cancellations

pub mod email;
pub mod whatsapp;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::appointment::AppointmentDetails;

pub use email::EmailNotifier;
pub use whatsapp::WhatsAppNotifier;

#[derive(thiserror::Error, Debug)]
pub enum NotificationError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Messaging API error: {0}")]
    ApiError(String),

    #[error("Recipient has no {0}")]
    MissingRecipient(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Confirmation,
    Reminder,
    Cancellation,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Confirmation => "confirmation",
            NotificationKind::Reminder => "reminder",
            NotificationKind::Cancellation => "cancellation",
        }
    }
}

/// A message about one appointment, ready to be rendered for any channel
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub appointment_id: Uuid,
    pub recipient_name: String,
    pub recipient_email: String,
    pub recipient_phone: Option<String>,
    pub pet_name: String,
    pub location_name: String,
    pub location_address: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
}

impl Notification {
    pub fn from_details(kind: NotificationKind, details: &AppointmentDetails) -> Self {
        Self {
            kind,
            appointment_id: details.appointment_id,
            recipient_name: details.user_name.clone(),
            recipient_email: details.user_email.clone(),
            recipient_phone: details.user_phone.clone(),
            pet_name: details.pet_name.clone(),
            location_name: details.location_name.clone(),
            location_address: details.location_address.clone(),
            date: details.appointment_date,
            start_time: details.start_time.format("%H:%M").to_string(),
            end_time: details.end_time.format("%H:%M").to_string(),
        }
    }

    pub fn subject(&self) -> String {
        match self.kind {
            NotificationKind::Confirmation => {
                format!("Your pet wash for {} is confirmed", self.pet_name)
            }
            NotificationKind::Reminder => {
                format!("Reminder: {}'s wash starts at {}", self.pet_name, self.start_time)
            }
            NotificationKind::Cancellation => {
                format!("Your pet wash for {} was cancelled", self.pet_name)
            }
        }
    }

    pub fn body(&self) -> String {
        let slot = format!(
            "{} from {} to {} at {} ({})",
            self.date.format("%d/%m/%Y"),
            self.start_time,
            self.end_time,
            self.location_name,
            self.location_address
        );

        match self.kind {
            NotificationKind::Confirmation => format!(
                "Hi {}! Payment received and {}'s wash is booked for {}. \
                 Show your QR code at the unit up to 30 minutes before the start.",
                self.recipient_name, self.pet_name, slot
            ),
            NotificationKind::Reminder => format!(
                "Hi {}! Just a reminder that {}'s wash is on {}. See you soon!",
                self.recipient_name, self.pet_name, slot
            ),
            NotificationKind::Cancellation => format!(
                "Hi {}. The wash for {} on {} has been cancelled.",
                self.recipient_name, self.pet_name, slot
            ),
        }
    }
}

/// One delivery channel
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Fans notifications out to every configured channel
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationDispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn channels(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.channel()).collect()
    }

    /// Sends on every channel and returns how many deliveries succeeded.
    /// Failures are logged, never returned.
    pub async fn deliver(&self, notification: &Notification) -> usize {
        let mut delivered = 0;

        for notifier in &self.notifiers {
            match notifier.send(notification).await {
                Ok(()) => {
                    delivered += 1;
                    tracing::info!(
                        channel = notifier.channel(),
                        kind = notification.kind.as_str(),
                        appointment_id = %notification.appointment_id,
                        "Notification sent"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        channel = notifier.channel(),
                        kind = notification.kind.as_str(),
                        appointment_id = %notification.appointment_id,
                        error = %e,
                        "Notification failed"
                    );
                }
            }
        }

        delivered
    }

    /// Fire-and-forget delivery on a background task
    pub fn dispatch(&self, notification: Notification) {
        if self.notifiers.is_empty() {
            tracing::debug!(
                kind = notification.kind.as_str(),
                "No notification channel configured"
            );
            return;
        }

        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher.deliver(&notification).await;
        });
    }
}
