use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

use pasaje_core::payment::{
    CallbackStatus, CreateOrderRequest, MerchantValidation, NormalizedCallback, PaymentProvider,
    ProviderOrderRef, ProviderSession, RawCallback, SessionStatus,
};
use pasaje_core::{money, Clock, CoreResult, ReservationError};

use super::{sign, unavailable, verify};

pub const NAME: &str = "wallet";

#[derive(Debug, Clone)]
pub struct WalletSettings {
    pub base_url: String,
    pub merchant_id: String,
    pub secret_key: String,
    /// Merchant domain, part of every callback hash
    pub domain: String,
    pub session_ttl_seconds: i64,
}

/// Session-oriented mobile wallet. Orders and callbacks are only accepted
/// while a merchant session opened through `open_session` is live.
pub struct WalletProvider {
    http: reqwest::Client,
    settings: WalletSettings,
    clock: Arc<dyn Clock>,
    session: RwLock<Option<ProviderSession>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenedSession {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedOrder {
    order_ref: String,
    #[serde(default)]
    payment_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletCallback {
    order_id: String,
    status: String,
    amount: String,
    hash: String,
}

impl WalletProvider {
    pub fn new(settings: WalletSettings, clock: Arc<dyn Clock>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            settings,
            clock,
            session: RwLock::new(None),
        }
    }

    /// Reinstates a session token obtained earlier, e.g. after a restart.
    pub fn restore_session(&self, token: &str) -> ProviderSession {
        let session = self.fresh_session(token.to_string());
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        session
    }

    fn fresh_session(&self, token: String) -> ProviderSession {
        let now = self.clock.now();
        ProviderSession {
            token,
            opened_at: now,
            expires_at: now + Duration::seconds(self.settings.session_ttl_seconds),
        }
    }

    fn live_token(&self) -> CoreResult<String> {
        let now = self.clock.now();
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|s| s.is_live(now))
            .map(|s| s.token.clone())
            .ok_or_else(|| ReservationError::SessionExpired(NAME.to_string()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    /// `hex hmac(secret, orderId + status + amount + domain)`
    pub fn callback_hash(&self, order_id: &str, status: &str, amount: &str) -> String {
        sign(&self.settings.secret_key, self.hash_input(order_id, status, amount).as_bytes())
    }

    fn hash_input(&self, order_id: &str, status: &str, amount: &str) -> String {
        format!("{}{}{}{}", order_id, status, amount, self.settings.domain)
    }
}

fn map_status(code: &str) -> Option<CallbackStatus> {
    match code {
        "E" => Some(CallbackStatus::Succeeded),
        "R" | "C" | "X" => Some(CallbackStatus::Declined),
        "P" => Some(CallbackStatus::Pending),
        _ => None,
    }
}

#[async_trait]
impl PaymentProvider for WalletProvider {
    fn name(&self) -> &str {
        NAME
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_order(&self, request: &CreateOrderRequest) -> CoreResult<ProviderOrderRef> {
        let amount = money::validate_amount(request.amount)?;
        let token = self.live_token()?;

        let response = self
            .http
            .post(self.url("/orders"))
            .bearer_auth(token)
            .json(&json!({
                "merchantId": self.settings.merchant_id,
                "orderId": request.order_id,
                "amount": money::to_wire(amount),
                "description": request.description,
                "callbackUrl": request.callback_url,
                "extra": request.opts,
            }))
            .send()
            .await
            .map_err(|e| unavailable(NAME, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Gateway dropped our session before its advertised expiry
            *self.session.write().unwrap_or_else(|e| e.into_inner()) = None;
            return Err(ReservationError::SessionExpired(NAME.to_string()));
        }
        if !status.is_success() {
            return Err(unavailable(NAME, format!("gateway answered {}", status)));
        }

        let created: CreatedOrder = response.json().await.map_err(|e| unavailable(NAME, e))?;
        debug!(order_ref = %created.order_ref, "wallet order created");

        Ok(ProviderOrderRef {
            order_ref: created.order_ref,
            checkout_url: created.payment_url,
        })
    }

    async fn validate_callback(&self, raw: &RawCallback) -> NormalizedCallback {
        let Ok(payload) = serde_urlencoded::from_bytes::<WalletCallback>(&raw.body) else {
            return NormalizedCallback::rejected();
        };

        let input = self.hash_input(&payload.order_id, &payload.status, &payload.amount);
        if !verify(&self.settings.secret_key, input.as_bytes(), &payload.hash) {
            return NormalizedCallback::rejected();
        }

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

    fn session_status(&self) -> SessionStatus {
        let now = self.clock.now();
        match self.session.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(s) if s.is_live(now) => SessionStatus::Live { expires_at: s.expires_at },
            _ => SessionStatus::Expired,
        }
    }

    async fn open_session(&self) -> CoreResult<ProviderSession> {
        let timestamp = self.clock.now().timestamp().to_string();
        let signature = sign(
            &self.settings.secret_key,
            format!("{}{}", self.settings.merchant_id, timestamp).as_bytes(),
        );

        let response = self
            .http
            .post(self.url("/sessions"))
            .json(&json!({
                "merchantId": self.settings.merchant_id,
                "timestamp": timestamp,
                "signature": signature,
            }))
            .send()
            .await
            .map_err(|e| unavailable(NAME, e))?;

        if !response.status().is_success() {
            return Err(unavailable(NAME, format!("session refused with {}", response.status())));
        }

        let opened: OpenedSession = response.json().await.map_err(|e| unavailable(NAME, e))?;
        let session = self.fresh_session(opened.token);
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());

        info!(expires_at = %session.expires_at, "wallet session opened");
        Ok(session)
    }

    /// Local only: the gateway lets abandoned tokens lapse.
    async fn close_session(&self) -> CoreResult<()> {
        if self
            .session
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
        {
            info!("wallet session closed");
        }
        Ok(())
    }

    async fn validate_merchant(&self) -> CoreResult<MerchantValidation> {
        let token = self.live_token()?;

        let response = self
            .http
            .post(self.url("/merchants/validate"))
            .bearer_auth(token)
            .json(&json!({
                "merchantId": self.settings.merchant_id,
                "domain": self.settings.domain,
            }))
            .send()
            .await
            .map_err(|e| unavailable(NAME, e))?;

        if !response.status().is_success() {
            return Err(unavailable(NAME, format!("merchant validation answered {}", response.status())));
        }

        Ok(MerchantValidation {
            merchant_id: self.settings.merchant_id.clone(),
            validated_at: self.clock.now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pasaje_core::ManualClock;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn provider(clock: Arc<ManualClock>) -> WalletProvider {
        WalletProvider::new(
            WalletSettings {
                base_url: "http://127.0.0.1:9".to_string(),
                merchant_id: "M-100".to_string(),
                secret_key: "wallet-secret".to_string(),
                domain: "tickets.example.test".to_string(),
                session_ttl_seconds: 3600,
            },
            clock,
        )
    }

    fn form(wallet: &WalletProvider, order_id: &str, status: &str, amount: &str) -> RawCallback {
        let hash = wallet.callback_hash(order_id, status, amount);
        let body = serde_urlencoded::to_string([
            ("orderId", order_id),
            ("status", status),
            ("amount", amount),
            ("hash", hash.as_str()),
        ])
        .unwrap();
        RawCallback::new(body).with_header("content-type", "application/x-www-form-urlencoded")
    }

    #[tokio::test]
    async fn test_callback_hash_covers_domain() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let wallet = provider(clock);

        let cb = wallet.validate_callback(&form(&wallet, "W-77", "E", "10.70")).await;
        assert!(cb.signature_valid);
        assert_eq!(cb.status, CallbackStatus::Succeeded);
        assert_eq!(cb.amount, Decimal::from_str("10.70").unwrap());

        // Tampered amount no longer matches the hash
        let hash = wallet.callback_hash("W-77", "E", "10.70");
        let body = format!("orderId=W-77&status=E&amount=1.00&hash={}", hash);
        let cb = wallet.validate_callback(&RawCallback::new(body)).await;
        assert!(!cb.signature_valid);
    }

    #[tokio::test]
    async fn test_rejection_codes_decline() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let wallet = provider(clock);

        for code in ["R", "C", "X"] {
            let cb = wallet.validate_callback(&form(&wallet, "W-1", code, "3.00")).await;
            assert_eq!(cb.status, CallbackStatus::Declined);
        }
        let cb = wallet.validate_callback(&form(&wallet, "W-1", "Z", "3.00")).await;
        assert!(!cb.signature_valid);
    }

    #[tokio::test]
    async fn test_session_expires_and_blocks_orders() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let wallet = provider(clock.clone());
        assert_eq!(wallet.session_status(), SessionStatus::Expired);

        let session = wallet.restore_session("tok-1");
        assert_eq!(wallet.session_status(), SessionStatus::Live { expires_at: session.expires_at });
        assert!(wallet.ensure_session().is_ok());

        clock.advance(Duration::seconds(3601));
        assert_eq!(wallet.session_status(), SessionStatus::Expired);

        let request = CreateOrderRequest {
            order_id: "T-1".to_string(),
            amount: Decimal::from_str("10.70").unwrap(),
            description: "Panama - David".to_string(),
            callback_url: "https://example.test/v1/webhooks/wallet".to_string(),
            opts: serde_json::Value::Null,
        };
        assert_eq!(
            wallet.create_order(&request).await,
            Err(ReservationError::SessionExpired(NAME.to_string()))
        );
    }

    #[tokio::test]
    async fn test_close_session() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let wallet = provider(clock);
        wallet.restore_session("tok-1");

        wallet.close_session().await.unwrap();
        assert_eq!(wallet.session_status(), SessionStatus::Expired);
        assert!(matches!(
            wallet.validate_merchant().await,
            Err(ReservationError::SessionExpired(_))
        ));
    }
}
