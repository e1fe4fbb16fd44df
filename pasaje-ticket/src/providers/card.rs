use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use pasaje_core::payment::{
    CallbackStatus, CreateOrderRequest, NormalizedCallback, PaymentProvider, ProviderOrderRef,
    RawCallback,
};
use pasaje_core::{money, Clock, CoreResult};

use super::{unavailable, verify};

pub const NAME: &str = "card";
pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Clone)]
pub struct CardSettings {
    pub base_url: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub tolerance_seconds: i64,
    pub currency: String,
}

/// JSON REST card gateway. Callbacks are signed with
/// `X-Signature: t=<unix>,v1=<hex hmac(secret, "<t>.<body>")>`.
pub struct CardProvider {
    http: reqwest::Client,
    settings: CardSettings,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Deserialize)]
struct CreatedOrder {
    id: String,
    #[serde(default)]
    checkout_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardCallback {
    order_id: String,
    amount: String,
    status: String,
}

impl CardProvider {
    pub fn new(settings: CardSettings, clock: Arc<dyn Clock>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            settings,
            clock,
        }
    }

    /// Parses `t=..,v1=..[,v1=..]` and checks one of the signatures.
    fn signature_ok(&self, header: &str, body: &[u8]) -> bool {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = v.parse().ok(),
                Some(("v1", v)) => signatures.push(v),
                _ => {}
            }
        }

        let Some(timestamp) = timestamp else {
            debug!("card callback signature has no timestamp");
            return false;
        };

        let drift = (self.clock.now().timestamp() - timestamp).abs();
        if drift > self.settings.tolerance_seconds {
            warn!(drift, tolerance = self.settings.tolerance_seconds, "card callback outside tolerance");
            return false;
        }

        let mut signed = format!("{}.", timestamp).into_bytes();
        signed.extend_from_slice(body);

        signatures
            .iter()
            .any(|sig| verify(&self.settings.webhook_secret, &signed, sig))
    }
}

fn map_status(raw: &str) -> Option<CallbackStatus> {
    match raw {
        "succeeded" => Some(CallbackStatus::Succeeded),
        "failed" | "canceled" => Some(CallbackStatus::Declined),
        "processing" => Some(CallbackStatus::Pending),
        _ => None,
    }
}

#[async_trait]
impl PaymentProvider for CardProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_order(&self, request: &CreateOrderRequest) -> CoreResult<ProviderOrderRef> {
        let amount = money::validate_amount(request.amount)?;

        let response = self
            .http
            .post(format!("{}/v1/orders", self.settings.base_url.trim_end_matches('/')))
            .bearer_auth(&self.settings.api_key)
            .json(&json!({
                "reference": request.order_id,
                "amount": money::to_wire(amount),
                "currency": self.settings.currency,
                "description": request.description,
                "callback_url": request.callback_url,
                "metadata": request.opts,
            }))
            .send()
            .await
            .map_err(|e| unavailable(NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(NAME, format!("gateway answered {}", status)));
        }

        let created: CreatedOrder = response.json().await.map_err(|e| unavailable(NAME, e))?;
        debug!(order_ref = %created.id, "card order created");

        Ok(ProviderOrderRef {
            order_ref: created.id,
            checkout_url: created.checkout_url,
        })
    }

    async fn validate_callback(&self, raw: &RawCallback) -> NormalizedCallback {
        let Some(header) = raw.header(SIGNATURE_HEADER) else {
            return NormalizedCallback::rejected();
        };
        if !self.signature_ok(header, &raw.body) {
            return NormalizedCallback::rejected();
        }

        // Only trusted from here on
        let Ok(payload) = serde_json::from_slice::<CardCallback>(&raw.body) else {
            return NormalizedCallback::rejected();
        };
        let (Some(status), Ok(amount)) = (map_status(&payload.status), money::parse(&payload.amount)) else {
            return NormalizedCallback::rejected();
        };

        NormalizedCallback {
            provider_order_ref: payload.order_id,
            amount,
            status,
            signature_valid: true,
        }
    }
}

/// Builds the header a card gateway would send for `body` at `timestamp`.
pub fn signature_header(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(body);
    format!("t={},v1={}", timestamp, super::sign(secret, &signed))
}
