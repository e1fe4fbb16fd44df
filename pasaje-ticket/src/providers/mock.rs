use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pasaje_core::payment::{
    CallbackStatus, CreateOrderRequest, NormalizedCallback, PaymentProvider, ProviderOrderRef,
    RawCallback,
};
use pasaje_core::{money, CoreResult, ReservationError};

use super::tokens_match;

pub const NAME: &str = "mock";

/// Deterministic gateway for development and tests. Order refs are derived
/// from our order ID; callbacks are JSON carrying a shared-secret token.
pub struct MockProvider {
    shared_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockCallback {
    pub order_ref: String,
    pub amount: String,
    /// `succeeded | declined | pending`
    pub status: String,
    pub token: String,
}

impl MockProvider {
    pub fn new(shared_secret: &str) -> Self {
        Self {
            shared_secret: shared_secret.to_string(),
        }
    }

    pub fn order_ref_for(order_id: &str) -> String {
        format!("mock_{}", order_id)
    }

    /// Body of a callback the mock gateway would send.
    pub fn callback_body(&self, order_ref: &str, amount: Decimal, status: &str) -> Vec<u8> {
        let callback = MockCallback {
            order_ref: order_ref.to_string(),
            amount: money::to_wire(amount),
            status: status.to_string(),
            token: self.shared_secret.clone(),
        };
        serde_json::to_vec(&callback).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> &str {
        NAME
    }

    async fn create_order(&self, request: &CreateOrderRequest) -> CoreResult<ProviderOrderRef> {
        money::validate_amount(request.amount)?;

        // Lets tests drive the circuit breaker
        if request.opts.get("simulate").and_then(|v| v.as_str()) == Some("unavailable") {
            return Err(ReservationError::ProviderUnavailable(
                "simulated gateway failure".to_string(),
            ));
        }

        Ok(ProviderOrderRef {
            order_ref: Self::order_ref_for(&request.order_id),
            checkout_url: Some(format!("https://mock.pay.test/checkout/{}", request.order_id)),
        })
    }

    async fn validate_callback(&self, raw: &RawCallback) -> NormalizedCallback {
        let Ok(payload) = serde_json::from_slice::<MockCallback>(&raw.body) else {
            return NormalizedCallback::rejected();
        };
        if !tokens_match(&self.shared_secret, &payload.token) {
            return NormalizedCallback::rejected();
        }

        let status = match payload.status.as_str() {
            "succeeded" => CallbackStatus::Succeeded,
            "declined" => CallbackStatus::Declined,
            "pending" => CallbackStatus::Pending,
            _ => return NormalizedCallback::rejected(),
        };
        let Ok(amount) = money::parse(&payload.amount) else {
            return NormalizedCallback::rejected();
        };

        NormalizedCallback {
            provider_order_ref: payload.order_ref,
            amount,
            status,
            signature_valid: true,
        }
    }
}
