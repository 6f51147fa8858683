//! In-process stand-in for the payment gateway, for local and demo setups.
//!
//! Charges are approved after a randomized delay by a one-shot task owned by
//! [`PaymentSimulator`]. Each approval is announced on a channel, which the
//! application consumes the same way it handles gateway webhooks.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{CardCheckout, ChargeRequest, GatewayError, GatewayPayment, PaymentGateway, PixCharge};

#[derive(Debug, Clone)]
struct SimulatedCharge {
    status: String,
    external_reference: String,
}

type ChargeBook = Arc<Mutex<HashMap<String, SimulatedCharge>>>;

/// Owns the deferred approval tasks of simulated charges
#[derive(Clone)]
pub struct PaymentSimulator {
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    delay_ms: RangeInclusive<u64>,
    events: mpsc::UnboundedSender<String>,
}

impl PaymentSimulator {
    fn new(delay: RangeInclusive<Duration>, events: mpsc::UnboundedSender<String>) -> Self {
        let delay_ms = delay.start().as_millis() as u64..=delay.end().as_millis() as u64;
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            delay_ms,
            events,
        }
    }

    fn random_delay(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.delay_ms.clone());
        Duration::from_millis(ms)
    }

    /// Schedules the approval of `external_id`
    fn schedule_approval(&self, external_id: String, charges: ChargeBook) {
        let delay = self.random_delay();
        let events = self.events.clone();
        let tasks = Arc::clone(&self.tasks);
        let id = external_id.clone();

        // Held across spawn: a task must never deregister before it is registered
        let Ok(mut registry) = self.tasks.lock() else {
            tracing::error!(external_id = %external_id, "Simulator task registry poisoned");
            return;
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if let Ok(mut charges) = charges.lock() {
                if let Some(charge) = charges.get_mut(&id) {
                    charge.status = "approved".to_string();
                }
            }
            if let Ok(mut tasks) = tasks.lock() {
                tasks.remove(&id);
            }

            tracing::info!(external_id = %id, delay_ms = delay.as_millis() as u64, "Simulated payment approved");

            if events.send(id).is_err() {
                tracing::debug!("Simulated payment listener is gone");
            }
        });

        registry.insert(external_id, handle);
    }

    /// Number of approvals still waiting to fire
    pub fn pending(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Aborts every pending approval
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            let count = tasks.len();
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
            tracing::info!(cancelled = count, "Payment simulator stopped");
        }
    }
}

/// Gateway implementation that never leaves the process
#[derive(Clone)]
pub struct SimulatedGateway {
    charges: ChargeBook,
    simulator: PaymentSimulator,
}

impl SimulatedGateway {
    /// Creates the gateway and the receiver on which approved external ids are announced
    pub fn new(approval_delay: RangeInclusive<Duration>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Self {
            charges: Arc::new(Mutex::new(HashMap::new())),
            simulator: PaymentSimulator::new(approval_delay, tx),
        };
        (gateway, rx)
    }

    pub fn simulator(&self) -> &PaymentSimulator {
        &self.simulator
    }

    fn register(&self, prefix: &str, request: &ChargeRequest) -> Result<String, GatewayError> {
        let external_id = format!("{}-{}", prefix, uuid::Uuid::new_v4().simple());

        self.charges
            .lock()
            .map_err(|_| GatewayError::ApiError("simulated charge book poisoned".to_string()))?
            .insert(
                external_id.clone(),
                SimulatedCharge {
                    status: "pending".to_string(),
                    external_reference: request.appointment_id.to_string(),
                },
            );

        self.simulator
            .schedule_approval(external_id.clone(), Arc::clone(&self.charges));

        Ok(external_id)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn create_pix_charge(&self, request: &ChargeRequest) -> Result<PixCharge, GatewayError> {
        let external_id = self.register("sim-pix", request)?;

        Ok(PixCharge {
            qr_code: format!("SIMULATED-PIX-{}-{}", external_id, request.amount_cents),
            external_id,
            status: "pending".to_string(),
            qr_code_base64: None,
            expires_at: Some(Utc::now() + chrono::Duration::minutes(30)),
        })
    }

    async fn create_card_checkout(
        &self,
        request: &ChargeRequest,
    ) -> Result<CardCheckout, GatewayError> {
        let external_id = self.register("sim-card", request)?;

        Ok(CardCheckout {
            checkout_url: format!("https://checkout.simulated.invalid/{}", external_id),
            external_id,
        })
    }

    async fn get_payment_status(&self, external_id: &str) -> Result<GatewayPayment, GatewayError> {
        let charges = self
            .charges
            .lock()
            .map_err(|_| GatewayError::ApiError("simulated charge book poisoned".to_string()))?;

        let charge = charges
            .get(external_id)
            .ok_or_else(|| GatewayError::NotFound(external_id.to_string()))?;

        Ok(GatewayPayment {
            external_id: external_id.to_string(),
            status: charge.status.clone(),
            external_reference: Some(charge.external_reference.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge_request() -> ChargeRequest {
        ChargeRequest {
            appointment_id: uuid::Uuid::new_v4(),
            amount_cents: 4990,
            payer_email: "tutor@example.com".to_string(),
            description: "Pet wash".to_string(),
        }
    }

    #[tokio::test]
    async fn test_charge_is_approved_after_delay() {
        let (gateway, mut approvals) =
            SimulatedGateway::new(Duration::from_millis(10)..=Duration::from_millis(30));
        let request = charge_request();

        let charge = gateway.create_pix_charge(&request).await.unwrap();
        assert_eq!(charge.status, "pending");
        assert!(charge.qr_code.starts_with("SIMULATED-PIX-"));

        let announced = tokio::time::timeout(Duration::from_secs(2), approvals.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(announced, charge.external_id);

        let status = gateway.get_payment_status(&charge.external_id).await.unwrap();
        assert_eq!(status.status, "approved");
        assert_eq!(
            status.external_reference,
            Some(request.appointment_id.to_string())
        );
        assert_eq!(gateway.simulator().pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_approvals() {
        let (gateway, mut approvals) =
            SimulatedGateway::new(Duration::from_secs(60)..=Duration::from_secs(60));

        let checkout = gateway.create_card_checkout(&charge_request()).await.unwrap();
        assert_eq!(gateway.simulator().pending(), 1);

        gateway.simulator().shutdown();
        assert_eq!(gateway.simulator().pending(), 0);

        let status = gateway.get_payment_status(&checkout.external_id).await.unwrap();
        assert_eq!(status.status, "pending");

        // Aborted tasks drop their sender clones; only the gateway's remains
        assert!(approvals.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_charge() {
        let (gateway, _approvals) =
            SimulatedGateway::new(Duration::from_millis(1)..=Duration::from_millis(1));

        assert!(matches!(
            gateway.get_payment_status("nope").await,
            Err(GatewayError::NotFound(_))
        ));
    }
}
