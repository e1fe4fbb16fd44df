use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failure detected, failing fast
    HalfOpen, // Testing if the gateway is back
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CircuitError {
    #[error("Circuit breaker [{0}] is open")]
    Open(String),
}

/// Fails gateway calls fast after repeated transport faults.
pub struct CircuitBreaker {
    name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    failure_threshold: usize,
    reset_timeout: Duration,
    last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    pub async fn check(&self) -> Result<(), CircuitError> {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let last_fail = *self.last_failure.read().await;
                if let Some(instant) = last_fail {
                    if instant.elapsed() >= self.reset_timeout {
                        let mut s = self.state.write().await;
                        *s = CircuitState::HalfOpen;
                        tracing::info!(breaker = %self.name, "circuit breaker moving to half-open");
                        return Ok(());
                    }
                }
                Err(CircuitError::Open(self.name.clone()))
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            tracing::info!(breaker = %self.name, "circuit breaker recovered to closed");
        }
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            let mut last = self.last_failure.write().await;
            *last = Some(Instant::now());
            tracing::error!(breaker = %self.name, failures = count, "circuit breaker tripped to open");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trips_after_threshold() {
        let cb = CircuitBreaker::new("card", 2, Duration::from_secs(60));

        cb.record_failure().await;
        assert!(cb.check().await.is_ok());

        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(cb.check().await, Err(CircuitError::Open("card".to_string())));
    }

    #[tokio::test]
    async fn test_half_open_recovers_on_success() {
        let cb = CircuitBreaker::new("wallet", 1, Duration::ZERO);

        cb.record_failure().await;
        assert!(cb.check().await.is_ok());
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new("mock", 2, Duration::from_secs(60));

        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }
}
