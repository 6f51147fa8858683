// Payment gateway port and its implementations

pub mod mercadopago;
pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use mercadopago::MercadoPagoGateway;
pub use simulated::{PaymentSimulator, SimulatedGateway};

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Gateway API error: {0}")]
    ApiError(String),

    #[error("Payment {0} not found at gateway")]
    NotFound(String),
}

/// What is being charged, and to whom
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub appointment_id: Uuid,
    pub amount_cents: i64,
    pub payer_email: String,
    pub description: String,
}

impl ChargeRequest {
    /// Amount in currency units, as gateways expect it
    pub fn amount(&self) -> f64 {
        self.amount_cents as f64 / 100.0
    }
}

/// A PIX charge waiting to be paid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixCharge {
    pub external_id: String,
    pub status: String,
    /// Copy-and-paste PIX code
    pub qr_code: String,
    /// Gateway-rendered QR image (base64 PNG), when provided
    pub qr_code_base64: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A hosted card checkout session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardCheckout {
    pub external_id: String,
    pub checkout_url: String,
}

/// Current state of a payment as reported by the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub external_id: String,
    pub status: String,
    /// Our appointment id, echoed back by the gateway
    pub external_reference: Option<String>,
}

/// Capability set shared by the real and the simulated gateway
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a PIX charge
    async fn create_pix_charge(&self, request: &ChargeRequest) -> Result<PixCharge, GatewayError>;

    /// Opens a hosted card checkout
    async fn create_card_checkout(
        &self,
        request: &ChargeRequest,
    ) -> Result<CardCheckout, GatewayError>;

    /// Fetches the authoritative status of a payment
    async fn get_payment_status(&self, external_id: &str) -> Result<GatewayPayment, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_conversion() {
        let request = ChargeRequest {
            appointment_id: Uuid::new_v4(),
            amount_cents: 4990,
            payer_email: "tutor@example.com".to_string(),
            description: "Pet wash".to_string(),
        };
        assert!((request.amount() - 49.90).abs() < f64::EPSILON);
    }
}
