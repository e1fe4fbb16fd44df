//! Gateway integrations and the registry that resolves them by name.

pub mod card;
pub mod mock;
pub mod wallet;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use pasaje_core::payment::PaymentProvider;
use pasaje_core::{CoreResult, ReservationError};

pub use card::{CardProvider, CardSettings};
pub use mock::MockProvider;
pub use wallet::{WalletProvider, WalletSettings};

type HmacSha256 = Hmac<Sha256>;

/// Resolves `provider_name -> provider`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn PaymentProvider>) {
        tracing::info!(provider = provider.name(), "payment provider registered");
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> CoreResult<Arc<dyn PaymentProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ReservationError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

/// Fingerprint of a callback body, stored on the payment record and audit rows.
pub fn callback_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Lowercase hex HMAC-SHA256.
pub fn sign(secret: &str, message: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC takes keys of any length
        Err(_) => return String::new(),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature.
pub fn verify(secret: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&signature).is_ok()
}

/// Constant-time equality for shared-secret tokens.
pub fn tokens_match(expected: &str, given: &str) -> bool {
    constant_time_eq::constant_time_eq(expected.as_bytes(), given.as_bytes())
}

/// Maps reqwest faults onto the only error a gateway transport may surface.
pub(crate) fn unavailable(provider: &str, err: impl std::fmt::Display) -> ReservationError {
    ReservationError::ProviderUnavailable(format!("{}: {}", provider, err))
}
