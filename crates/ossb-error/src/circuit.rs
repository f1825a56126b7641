use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::build_error::BuildError;
use crate::category::{ErrorCategory, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Bounded by `max_failures` and `reset_timeout` (`spec.md` §3/§4.A).
/// Transitions: Closed→Open on reaching `max_failures`; Open→HalfOpen when
/// `now − last_failure ≥ reset_timeout`; HalfOpen→Closed on success,
/// HalfOpen→Open on failure.
pub struct CircuitBreaker {
    max_failures: u32,
    reset_timeout: Duration,
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            max_failures,
            reset_timeout,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    fn poll_half_open(&mut self) {
        if self.state == CircuitState::Open {
            if let Some(last_failure) = self.last_failure {
                if last_failure.elapsed() >= self.reset_timeout {
                    self.state = CircuitState::HalfOpen;
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    fn record_failure(&mut self) {
        self.last_failure = Some(Instant::now());
        match self.state {
            CircuitState::HalfOpen => self.state = CircuitState::Open,
            _ => {
                self.failure_count += 1;
                if self.failure_count >= self.max_failures {
                    self.state = CircuitState::Open;
                }
            }
        }
    }

    /// `execute(operation, thunk)`: in `Open`, rejects immediately with a
    /// resource-category high-severity error before invoking the thunk.
    pub fn execute<T>(
        &mut self,
        operation: &str,
        thunk: impl FnOnce() -> Result<T, BuildError>,
    ) -> Result<T, BuildError> {
        self.poll_half_open();
        if self.state == CircuitState::Open {
            return Err(BuildError::builder(format!("circuit open for {operation}"))
                .category(ErrorCategory::Resource)
                .severity(Severity::High)
                .operation(operation)
                .retryable(true)
                .build());
        }
        match thunk() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}

/// Guards the registry client's per-host circuit breaker map so lookups
/// and state transitions are serializable (`spec.md` §5).
pub struct CircuitBreakerMap {
    max_failures: u32,
    reset_timeout: Duration,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerMap {
    pub fn new(max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            max_failures,
            reset_timeout,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn execute<T>(
        &self,
        key: &str,
        operation: &str,
        thunk: impl FnOnce() -> Result<T, BuildError>,
    ) -> Result<T, BuildError> {
        let mut guard = self.breakers.lock().unwrap();
        let breaker = guard
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.max_failures, self.reset_timeout));
        breaker.execute(operation, thunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_max_failures_and_rejects_without_invoking_thunk() {
        // Scenario S3: max_failures=1, after one failure the circuit is
        // Open and the next call is rejected without invoking the thunk.
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let first: Result<(), BuildError> = breaker.execute("blob-head", || {
            Err(BuildError::builder("503").category(ErrorCategory::Network).build())
        });
        assert!(first.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        let mut invoked = false;
        let second: Result<(), BuildError> = breaker.execute("blob-head", || {
            invoked = true;
            Ok(())
        });
        assert!(second.is_err());
        assert!(!invoked);
    }

    #[test]
    fn half_open_closes_on_success_and_reopens_on_failure() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(1));
        let _: Result<(), BuildError> = breaker.execute("op", || {
            Err(BuildError::builder("boom").category(ErrorCategory::Network).build())
        });
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));

        let ok: Result<(), BuildError> = breaker.execute("op", || Ok(()));
        assert!(ok.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
