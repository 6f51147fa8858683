use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{Notification, NotificationError, Notifier};

#[derive(Debug, Serialize)]
struct TextBody<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    message_type: &'static str,
    text: TextBody<'a>,
}

/// WhatsApp Cloud API text messages
pub struct WhatsAppNotifier {
    client: Client,
    api_url: String,
    access_token: String,
}

impl WhatsAppNotifier {
    pub fn new(api_url: &str, access_token: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }
}

/// Keeps digits only, the format the messaging API expects
fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    fn channel(&self) -> &'static str {
        "whatsapp"
    }

    #[tracing::instrument(skip(self, notification), fields(appointment_id = %notification.appointment_id))]
    async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let phone = notification
            .recipient_phone
            .as_deref()
            .map(normalize_phone)
            .filter(|p| !p.is_empty())
            .ok_or(NotificationError::MissingRecipient("phone number"))?;

        let text = notification.body();
        let request_body = MessageRequest {
            messaging_product: "whatsapp",
            to: &phone,
            message_type: "text",
            text: TextBody { body: &text },
        };

        let url = format!("{}/messages", self.api_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!(
                status = %status,
                error = %error_text,
                "WhatsApp API request failed"
            );
            return Err(NotificationError::ApiError(format!(
                "Status {}: {}",
                status, error_text
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifications::{tests::details, NotificationKind};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+55 (11) 99999-0000"), "5511999990000");
        assert_eq!(normalize_phone("abc"), "");
    }

    #[tokio::test]
    async fn test_send_text_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("authorization", "Bearer wa-token"))
            .and(body_partial_json(serde_json::json!({
                "messaging_product": "whatsapp",
                "to": "5511999990000",
                "type": "text"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "messages": [{"id": "wamid.1"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WhatsAppNotifier::new(&server.uri(), "wa-token");
        let notification = Notification::from_details(NotificationKind::Confirmation, &details());

        notifier.send(&notification).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_phone_is_rejected() {
        let notifier = WhatsAppNotifier::new("http://127.0.0.1:9", "wa-token");
        let mut details = details();
        details.user_phone = None;
        let notification = Notification::from_details(NotificationKind::Reminder, &details);

        assert!(matches!(
            notifier.send(&notification).await,
            Err(NotificationError::MissingRecipient(_))
        ));
    }

    #[tokio::test]
    async fn test_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let notifier = WhatsAppNotifier::new(&server.uri(), "wa-token");
        let notification = Notification::from_details(NotificationKind::Reminder, &details());

        assert!(matches!(
            notifier.send(&notification).await,
            Err(NotificationError::ApiError(msg)) if msg.contains("401")
        ));
    }
}
