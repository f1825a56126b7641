//! The categorized error substrate (`spec.md` §4.A): `BuildError`, retry
//! policy with bounded exponential backoff, a three-state circuit breaker,
//! category-dispatched recovery and graceful degradation, and a
//! priority-ordered cleanup registry. Every I/O-bound operation in the
//! other components is expected to surround itself with this substrate.

mod build_error;
mod cancellation;
mod category;
mod circuit;
mod cleanup;
mod collector;
mod recovery;
mod retry;

pub use build_error::{BuildError, ErrorBuilder};
pub use cancellation::CancellationToken;
pub use category::{ErrorCategory, Severity};
pub use circuit::{CircuitBreaker, CircuitBreakerMap, CircuitState};
pub use cleanup::CleanupRegistry;
pub use collector::ErrorCollector;
pub use recovery::{attempt as recovery_attempt, degrade, DegradationAction, RecoveryOutcome, RESERVED_TEMP_PREFIXES};
pub use retry::{is_retryable_by_message, retry, RetryConfig, RetryPolicy};
