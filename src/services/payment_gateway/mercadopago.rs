use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CardCheckout, ChargeRequest, GatewayError, GatewayPayment, PaymentGateway, PixCharge};

/// How long a PIX code stays payable
const PIX_EXPIRATION_MINUTES: i64 = 30;

#[derive(Debug, Serialize)]
struct Payer<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct PixPaymentRequest<'a> {
    transaction_amount: f64,
    description: &'a str,
    payment_method_id: &'static str,
    payer: Payer<'a>,
    external_reference: String,
    notification_url: &'a str,
    date_of_expiration: String,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    qr_code: Option<String>,
    qr_code_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PointOfInteraction {
    transaction_data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: serde_json::Value, // numeric in practice, string in some sandboxes
    status: String,
    external_reference: Option<String>,
    date_of_expiration: Option<DateTime<Utc>>,
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Debug, Serialize)]
struct PreferenceItem<'a> {
    title: &'a str,
    quantity: u32,
    unit_price: f64,
    currency_id: &'static str,
}

#[derive(Debug, Serialize)]
struct PreferenceRequest<'a> {
    items: Vec<PreferenceItem<'a>>,
    payer: Payer<'a>,
    external_reference: String,
    notification_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct PreferenceResponse {
    id: String,
    init_point: String,
}

fn id_to_string(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Mercado Pago REST client
#[derive(Clone)]
pub struct MercadoPagoGateway {
    client: Client,
    api_base_url: String,
    access_token: String,
    notification_url: String,
}

impl MercadoPagoGateway {
    pub fn new(api_base_url: &str, access_token: &str, notification_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            notification_url: notification_url.to_string(),
        }
    }

    async fn check_response(
        response: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        tracing::error!(
            status = %status,
            error = %error_text,
            "Mercado Pago {} failed",
            context
        );
        Err(GatewayError::ApiError(format!(
            "Status {}: {}",
            status, error_text
        )))
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    /// Calls POST /v1/payments with payment_method_id = pix
    #[tracing::instrument(skip(self, request), fields(appointment_id = %request.appointment_id))]
    async fn create_pix_charge(&self, request: &ChargeRequest) -> Result<PixCharge, GatewayError> {
        let expires_at = Utc::now() + Duration::minutes(PIX_EXPIRATION_MINUTES);
        let body = PixPaymentRequest {
            transaction_amount: request.amount(),
            description: &request.description,
            payment_method_id: "pix",
            payer: Payer {
                email: &request.payer_email,
            },
            external_reference: request.appointment_id.to_string(),
            notification_url: &self.notification_url,
            date_of_expiration: expires_at.format("%Y-%m-%dT%H:%M:%S%.3f+00:00").to_string(),
        };

        let url = format!("{}/v1/payments", self.api_base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await?;

        let response = Self::check_response(response, "PIX charge").await?;
        let payment: PaymentResponse = response.json().await.map_err(|e| {
            GatewayError::ApiError(format!("Failed to parse payment response: {}", e))
        })?;

        let transaction = payment
            .point_of_interaction
            .and_then(|p| p.transaction_data)
            .ok_or_else(|| GatewayError::ApiError("PIX response without transaction data".to_string()))?;
        let qr_code = transaction
            .qr_code
            .ok_or_else(|| GatewayError::ApiError("PIX response without qr_code".to_string()))?;

        let charge = PixCharge {
            external_id: id_to_string(&payment.id),
            status: payment.status,
            qr_code,
            qr_code_base64: transaction.qr_code_base64,
            expires_at: payment.date_of_expiration.or(Some(expires_at)),
        };

        tracing::info!(external_id = %charge.external_id, "PIX charge created");

        Ok(charge)
    }

    /// Calls POST /checkout/preferences
    #[tracing::instrument(skip(self, request), fields(appointment_id = %request.appointment_id))]
    async fn create_card_checkout(
        &self,
        request: &ChargeRequest,
    ) -> Result<CardCheckout, GatewayError> {
        let body = PreferenceRequest {
            items: vec![PreferenceItem {
                title: &request.description,
                quantity: 1,
                unit_price: request.amount(),
                currency_id: "BRL",
            }],
            payer: Payer {
                email: &request.payer_email,
            },
            external_reference: request.appointment_id.to_string(),
            notification_url: &self.notification_url,
        };

        let url = format!("{}/checkout/preferences", self.api_base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let response = Self::check_response(response, "checkout preference").await?;
        let preference: PreferenceResponse = response.json().await.map_err(|e| {
            GatewayError::ApiError(format!("Failed to parse preference response: {}", e))
        })?;

        tracing::info!(preference_id = %preference.id, "Card checkout created");

        Ok(CardCheckout {
            external_id: preference.id,
            checkout_url: preference.init_point,
        })
    }

    /// Calls GET /v1/payments/{id}
    #[tracing::instrument(skip(self))]
    async fn get_payment_status(&self, external_id: &str) -> Result<GatewayPayment, GatewayError> {
        let url = format!("{}/v1/payments/{}", self.api_base_url, external_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Err(GatewayError::NotFound(external_id.to_string()));
        }

        let response = Self::check_response(response, "payment lookup").await?;
        let payment: PaymentResponse = response.json().await.map_err(|e| {
            GatewayError::ApiError(format!("Failed to parse payment response: {}", e))
        })?;

        tracing::debug!(status = %payment.status, "Payment status retrieved");

        Ok(GatewayPayment {
            external_id: id_to_string(&payment.id),
            status: payment.status,
            external_reference: payment.external_reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn charge_request() -> ChargeRequest {
        ChargeRequest {
            appointment_id: Uuid::new_v4(),
            amount_cents: 4990,
            payer_email: "tutor@example.com".to_string(),
            description: "Pet wash 2024-06-01 10:00".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_pix_charge() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": 1234567890u64,
                "status": "pending",
                "external_reference": "ref",
                "date_of_expiration": "2024-06-01T10:30:00Z",
                "point_of_interaction": {
                    "transaction_data": {
                        "qr_code": "00020126580014br.gov.bcb.pix",
                        "qr_code_base64": "iVBORw0KGgo="
                    }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let gateway = MercadoPagoGateway::new(&server.uri(), "test-token", "https://petwash.test/hook");
        let charge = gateway.create_pix_charge(&charge_request()).await.unwrap();

        assert_eq!(charge.external_id, "1234567890");
        assert_eq!(charge.status, "pending");
        assert_eq!(charge.qr_code, "00020126580014br.gov.bcb.pix");
        assert!(charge.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_create_card_checkout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/checkout/preferences"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "pref-1",
                "init_point": "https://www.mercadopago.com.br/checkout/v1/redirect?pref_id=pref-1"
            })))
            .mount(&server)
            .await;

        let gateway = MercadoPagoGateway::new(&server.uri(), "test-token", "https://petwash.test/hook");
        let checkout = gateway.create_card_checkout(&charge_request()).await.unwrap();

        assert_eq!(checkout.external_id, "pref-1");
        assert!(checkout.checkout_url.contains("pref_id=pref-1"));
    }

    #[tokio::test]
    async fn test_get_payment_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 42,
                "status": "approved",
                "external_reference": "8f6d8f1e-0000-0000-0000-000000000000"
            })))
            .mount(&server)
            .await;

        let gateway = MercadoPagoGateway::new(&server.uri(), "test-token", "https://petwash.test/hook");
        let payment = gateway.get_payment_status("42").await.unwrap();

        assert_eq!(payment.external_id, "42");
        assert_eq!(payment.status, "approved");
        assert_eq!(
            payment.external_reference.as_deref(),
            Some("8f6d8f1e-0000-0000-0000-000000000000")
        );
    }

    #[tokio::test]
    async fn test_unknown_payment_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let gateway = MercadoPagoGateway::new(&server.uri(), "test-token", "https://petwash.test/hook");
        assert!(matches!(
            gateway.get_payment_status("404").await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_gateway_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let gateway = MercadoPagoGateway::new(&server.uri(), "test-token", "https://petwash.test/hook");
        let err = gateway.create_pix_charge(&charge_request()).await.unwrap_err();

        assert!(matches!(err, GatewayError::ApiError(msg) if msg.contains("500")));
    }
}
