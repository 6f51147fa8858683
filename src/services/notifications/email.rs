use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{Notification, NotificationError, Notifier};

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct MailRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

/// Transactional email over a v3 mail-send HTTP API
pub struct EmailNotifier {
    client: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl EmailNotifier {
    pub fn new(api_url: &str, api_key: &str, from: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        "email"
    }

    #[tracing::instrument(skip(self, notification), fields(appointment_id = %notification.appointment_id))]
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        if notification.recipient_email.trim().is_empty() {
            return Err(NotificationError::MissingRecipient("email address"));
        }

        let subject = notification.subject();
        let text = notification.body();
        let request_body = MailRequest {
            personalizations: vec![Personalization {
                to: vec![Address {
                    email: &notification.recipient_email,
                    name: Some(&notification.recipient_name),
                }],
            }],
            from: Address {
                email: &self.from,
                name: None,
            },
            subject: &subject,
            content: vec![Content {
                content_type: "text/plain",
                value: &text,
            }],
        };

        let url = format!("{}/v3/mail/send", self.api_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Mail API request failed");
            return Err(NotificationError::ApiError(format!(
                "Status {}: {}",
                status, body
            )));
        }

        Ok(())
    }
}
