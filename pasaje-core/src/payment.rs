use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{CoreResult, ReservationError};

/// What the checkout flow asks a gateway to charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    /// Our reference, sent to the gateway and echoed back by some of them
    pub order_id: String,
    pub amount: Decimal,
    pub description: String,
    pub callback_url: String,
    #[serde(default)]
    pub opts: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOrderRef {
    /// The gateway's ID for the order; half of the idempotency key
    pub order_ref: String,
    /// Where to send the buyer, for redirect-style gateways
    pub checkout_url: Option<String>,
}

/// A callback exactly as delivered, before anything in it is trusted.
#[derive(Debug, Clone, Default)]
pub struct RawCallback {
    /// Header names are lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl RawCallback {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_form_encoded(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Succeeded,
    Declined,
    /// Gateway is still working on it; no final answer yet
    Pending,
}

/// Provider-independent shape every callback is reduced to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCallback {
    pub provider_order_ref: String,
    pub amount: Decimal,
    pub status: CallbackStatus,
    pub signature_valid: bool,
}

impl NormalizedCallback {
    /// A callback that failed authentication or could not be parsed.
    /// No field of it may be trusted.
    pub fn rejected() -> Self {
        Self {
            provider_order_ref: String::new(),
            amount: Decimal::ZERO,
            status: CallbackStatus::Pending,
            signature_valid: false,
        }
    }
}

/// Session token for gateways that require one before charging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub token: String,
    pub opened_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProviderSession {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    NotRequired,
    Live { expires_at: DateTime<Utc> },
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantValidation {
    pub merchant_id: String,
    pub validated_at: DateTime<Utc>,
}

/// Contract every gateway integration implements.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Registers an order with the gateway.
    ///
    /// The amount is validated before anything goes over the wire.
    async fn create_order(&self, request: &CreateOrderRequest) -> CoreResult<ProviderOrderRef>;

    /// Authenticates and normalizes a callback. Never fails: anything
    /// suspicious comes back with `signature_valid = false`.
    async fn validate_callback(&self, raw: &RawCallback) -> NormalizedCallback;

    fn session_status(&self) -> SessionStatus {
        SessionStatus::NotRequired
    }

    async fn open_session(&self) -> CoreResult<ProviderSession> {
        Err(ReservationError::InvalidRequest(format!(
            "provider {} does not use sessions",
            self.name()
        )))
    }

    async fn close_session(&self) -> CoreResult<()> {
        Err(ReservationError::InvalidRequest(format!(
            "provider {} does not use sessions",
            self.name()
        )))
    }

    async fn validate_merchant(&self) -> CoreResult<MerchantValidation> {
        Err(ReservationError::InvalidRequest(format!(
            "provider {} does not validate merchants",
            self.name()
        )))
    }

    /// Fails with `SessionExpired` for session-oriented providers without a
    /// live session.
    fn ensure_session(&self) -> CoreResult<()> {
        match self.session_status() {
            SessionStatus::NotRequired | SessionStatus::Live { .. } => Ok(()),
            SessionStatus::Expired => Err(ReservationError::SessionExpired(self.name().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_callback_headers_are_case_insensitive() {
        let raw = RawCallback::new("orderId=X1")
            .with_header("Content-Type", "application/x-www-form-urlencoded; charset=utf-8");

        assert!(raw.is_form_encoded());
        assert!(raw.header("CONTENT-TYPE").is_some());
        assert!(raw.header("x-signature").is_none());
    }

    #[test]
    fn test_rejected_callback_is_untrusted() {
        let cb = NormalizedCallback::rejected();
        assert!(!cb.signature_valid);
        assert!(cb.provider_order_ref.is_empty());
    }
}
